use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::errors::ServiceError;
use crate::models::{CreateRefundRequest, RefundRequest, RefundStatus};
use crate::notifications::NotificationPort;
use crate::registry::RefundRegistry;
use crate::sinks::{AuditSink, RevenueLedger};

/// Secondary state machine tracking refund requests against paid
/// invoices. Consulted by the invoice side only for revenue reversal;
/// the originating invoice's own lifecycle is untouched.
pub struct RefundService {
    registry: Arc<RefundRegistry>,
    notifier: Arc<dyn NotificationPort>,
    ledger: Arc<dyn RevenueLedger>,
    audit: Arc<dyn AuditSink>,
    staff_channel_id: String,
}

impl RefundService {
    pub fn new(
        registry: Arc<RefundRegistry>,
        notifier: Arc<dyn NotificationPort>,
        ledger: Arc<dyn RevenueLedger>,
        audit: Arc<dyn AuditSink>,
        staff_channel_id: String,
    ) -> Self {
        Self {
            registry,
            notifier,
            ledger,
            audit,
            staff_channel_id,
        }
    }

    /// Opens a refund request. At most one open request may exist per
    /// invoice; a second attempt is rejected until the first resolves.
    #[instrument(skip(self, request), fields(invoice_id = %request.invoice_id))]
    pub async fn create_refund_request(
        &self,
        request: CreateRefundRequest,
    ) -> Result<RefundRequest, ServiceError> {
        request.validate()?;

        let refund = RefundRequest {
            invoice_id: request.invoice_id,
            customer_id: request.customer_id,
            requested_by: request.requested_by,
            reason: request.reason,
            amount: request.amount,
            status: RefundStatus::Requested,
            created_at: Utc::now(),
            processed_at: None,
            processed_by: None,
        };

        self.registry.insert_new(refund.clone())?;

        self.audit("refund_requested", &refund).await;

        self.notify(
            &self.staff_channel_id,
            &format!(
                "Refund requested for invoice {} by {} ({}): {}",
                refund.invoice_id, refund.requested_by, refund.amount, refund.reason
            ),
        )
        .await;
        self.notify(
            &refund.customer_id,
            &format!(
                "Your refund request for invoice {} has been received and is awaiting review.",
                refund.invoice_id
            ),
        )
        .await;

        info!(invoice_id = %refund.invoice_id, amount = refund.amount, "refund request opened");
        Ok(refund)
    }

    /// Resolves an open refund request. Approval runs the revenue
    /// reversal and records the request as PROCESSED; denial records the
    /// reason. Either way the request leaves the live registry.
    #[instrument(skip(self, reason))]
    pub async fn process_refund_request(
        &self,
        invoice_id: &str,
        staff_id: &str,
        approved: bool,
        reason: Option<&str>,
    ) -> Result<RefundRequest, ServiceError> {
        let Some(mut request) = self.registry.remove(invoice_id) else {
            return Err(ServiceError::NotFound(format!(
                "no refund request for invoice {invoice_id}"
            )));
        };

        request.processed_at = Some(Utc::now());
        request.processed_by = Some(staff_id.to_string());

        if approved {
            request.status = RefundStatus::Approved;

            // Reversal side effect, exactly once per approved request
            self.ledger.debit(request.amount).await;
            request.status = RefundStatus::Processed;

            self.audit("refund_processed", &request).await;
            self.notify(
                &request.customer_id,
                &format!(
                    "Your refund of {} for invoice {} was approved. Expect the funds within 3-5 business days.",
                    request.amount, request.invoice_id
                ),
            )
            .await;

            info!(
                invoice_id = %request.invoice_id,
                amount = request.amount,
                staff_id = %staff_id,
                "refund approved and processed"
            );
        } else {
            request.status = RefundStatus::Denied;
            let denial_reason = reason.unwrap_or("no reason given");

            self.audit("refund_denied", &request).await;
            self.notify(
                &request.customer_id,
                &format!(
                    "Your refund request for invoice {} was denied: {}",
                    request.invoice_id, denial_reason
                ),
            )
            .await;

            info!(
                invoice_id = %request.invoice_id,
                staff_id = %staff_id,
                reason = %denial_reason,
                "refund denied"
            );
        }

        Ok(request)
    }

    pub fn get_refund_request(&self, invoice_id: &str) -> Option<RefundRequest> {
        self.registry.get(invoice_id)
    }

    pub fn open_count(&self) -> usize {
        self.registry.open_count()
    }

    async fn notify(&self, user_id: &str, content: &str) {
        if let Err(err) = self.notifier.send(user_id, content).await {
            warn!(user_id = %user_id, error = %err, "notification failed");
        }
    }

    async fn audit(&self, kind: &str, request: &RefundRequest) {
        let payload = match serde_json::to_value(request) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "audit payload serialization failed");
                return;
            }
        };
        if let Err(err) = self.audit.record(kind, json!({ "refund": payload })).await {
            warn!(kind = %kind, error = %err, "audit record failed");
        }
    }
}
