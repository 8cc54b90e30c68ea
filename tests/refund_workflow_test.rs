//! Flow tests for the refund approval workflow.

mod common;

use assert_matches::assert_matches;
use common::{default_settings, harness, STAFF_CHANNEL};

use billing_engine::errors::ServiceError;
use billing_engine::models::{CreateRefundRequest, RefundStatus};
use billing_engine::sinks::RevenueLedger;

fn refund_request(invoice_id: &str) -> CreateRefundRequest {
    CreateRefundRequest {
        invoice_id: invoice_id.to_string(),
        customer_id: "cust-1".to_string(),
        requested_by: "cust-1".to_string(),
        reason: "wrong item delivered".to_string(),
        amount: 500_000,
    }
}

#[tokio::test]
async fn only_one_refund_request_may_be_open_per_invoice() {
    let h = harness(default_settings());

    h.refunds
        .create_refund_request(refund_request("INV-1"))
        .await
        .unwrap();
    assert_eq!(h.refunds.open_count(), 1);

    let second = h.refunds.create_refund_request(refund_request("INV-1")).await;
    assert_matches!(second, Err(ServiceError::Conflict(_)));

    // After denial the invoice may be refund-requested again
    h.refunds
        .process_refund_request("INV-1", "staff-9", false, Some("outside refund window"))
        .await
        .unwrap();
    assert!(h
        .refunds
        .create_refund_request(refund_request("INV-1"))
        .await
        .is_ok());
}

#[tokio::test]
async fn approval_reverses_revenue_exactly_once() {
    let h = harness(default_settings());

    // Revenue previously credited by the paid invoice
    h.ledger.credit(500_000).await;

    h.refunds
        .create_refund_request(refund_request("INV-1"))
        .await
        .unwrap();
    let processed = h
        .refunds
        .process_refund_request("INV-1", "staff-9", true, None)
        .await
        .unwrap();

    assert_eq!(processed.status, RefundStatus::Processed);
    assert_eq!(processed.processed_by.as_deref(), Some("staff-9"));
    assert!(processed.processed_at.is_some());
    assert_eq!(h.ledger.total().await, 0);

    // The request left the live registry; replaying the decision fails
    let replay = h
        .refunds
        .process_refund_request("INV-1", "staff-9", true, None)
        .await;
    assert_matches!(replay, Err(ServiceError::NotFound(_)));
    assert_eq!(h.ledger.total().await, 0);
}

#[tokio::test]
async fn denial_keeps_revenue_and_tells_the_customer_why() {
    let h = harness(default_settings());
    h.ledger.credit(500_000).await;

    h.refunds
        .create_refund_request(refund_request("INV-1"))
        .await
        .unwrap();
    let processed = h
        .refunds
        .process_refund_request("INV-1", "staff-9", false, Some("service already delivered"))
        .await
        .unwrap();

    assert_eq!(processed.status, RefundStatus::Denied);
    assert_eq!(h.ledger.total().await, 500_000);

    let messages = h.notifier.messages_for("cust-1");
    assert!(messages
        .iter()
        .any(|m| m.contains("service already delivered")));
}

#[tokio::test]
async fn processing_an_unknown_request_is_not_found() {
    let h = harness(default_settings());
    let result = h
        .refunds
        .process_refund_request("INV-404", "staff-9", true, None)
        .await;
    assert_matches!(result, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn staff_receive_an_actionable_alert_on_new_requests() {
    let h = harness(default_settings());
    h.refunds
        .create_refund_request(refund_request("INV-1"))
        .await
        .unwrap();

    let staff_messages = h.notifier.messages_for(STAFF_CHANNEL);
    assert_eq!(staff_messages.len(), 1);
    assert!(staff_messages[0].contains("INV-1"));
    assert!(staff_messages[0].contains("wrong item delivered"));

    let customer_messages = h.notifier.messages_for("cust-1");
    assert_eq!(customer_messages.len(), 1);

    assert_eq!(h.audit.kinds(), vec!["refund_requested".to_string()]);
}

#[tokio::test]
async fn invalid_refund_amounts_are_rejected() {
    let h = harness(default_settings());
    let mut request = refund_request("INV-1");
    request.amount = 0;

    let result = h.refunds.create_refund_request(request).await;
    assert_matches!(result, Err(ServiceError::Validation(_)));
    assert_eq!(h.refunds.open_count(), 0);
}
