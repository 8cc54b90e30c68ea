//! Shared stub ports for engine flow tests.
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use billing_engine::errors::ServiceError;
use billing_engine::gateway::{OrderInfo, PaymentGateway, PaymentLinkData};
use billing_engine::models::CreateInvoiceRequest;
use billing_engine::notifications::{NotificationError, NotificationPort};
use billing_engine::registry::{InvoiceRegistry, RefundRegistry};
use billing_engine::services::{InvoiceService, InvoiceSettings, RefundService};
use billing_engine::signature::SignatureCodec;
use billing_engine::sinks::{AccessGrantor, AuditSink, InMemoryRevenueLedger, SinkError};

pub const TEST_CHECKSUM_KEY: &str = "test-checksum-key-0123456789";
pub const STAFF_CHANNEL: &str = "staff-channel";

/// In-process stand-in for the remote payment gateway.
pub struct StubGateway {
    codec: SignatureCodec,
    next_order_code: AtomicU64,
    pub fail_create: AtomicBool,
    /// (invoice_id, amount) pairs sent to the gateway on order creation
    pub created: Mutex<Vec<(String, i64)>>,
    /// (order_code, reason) pairs from remote cancellations
    pub cancelled: Mutex<Vec<(u64, String)>>,
    /// Remote status returned by `get_payment_info`
    pub remote_status: Mutex<HashMap<u64, String>>,
}

impl StubGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            codec: SignatureCodec::new(TEST_CHECKSUM_KEY),
            next_order_code: AtomicU64::new(1_000_000_001),
            fail_create: AtomicBool::new(false),
            created: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            remote_status: Mutex::new(HashMap::new()),
        })
    }

    pub fn last_order_code(&self) -> u64 {
        self.next_order_code.load(Ordering::SeqCst) - 1
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_payment_link(
        &self,
        invoice: &billing_engine::models::InvoiceRecord,
    ) -> Result<PaymentLinkData, ServiceError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ServiceError::Gateway("gateway unreachable".into()));
        }
        let order_code = self.next_order_code.fetch_add(1, Ordering::SeqCst);
        self.created
            .lock()
            .unwrap()
            .push((invoice.invoice_id.clone(), invoice.payable_amount()));
        Ok(PaymentLinkData {
            order_code,
            checkout_url: format!("https://pay.example.com/{order_code}"),
            qr_code: format!("qr-{order_code}"),
        })
    }

    async fn get_payment_info(&self, order_code: u64) -> Result<OrderInfo, ServiceError> {
        let status = self
            .remote_status
            .lock()
            .unwrap()
            .get(&order_code)
            .cloned()
            .ok_or_else(|| ServiceError::Gateway("unknown remote order".into()))?;
        Ok(OrderInfo {
            order_code,
            status,
            amount: 0,
        })
    }

    async fn cancel_payment(&self, order_code: u64, reason: &str) -> Result<(), ServiceError> {
        self.cancelled
            .lock()
            .unwrap()
            .push((order_code, reason.to_string()));
        Ok(())
    }

    fn verify_webhook(&self, payload: &Value, signature: &str) -> bool {
        self.codec.verify(payload, signature)
    }
}

/// Captures every outbound notification.
#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages_for(&self, user_id: &str) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(user, _)| user == user_id)
            .map(|(_, content)| content.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationPort for RecordingNotifier {
    async fn send(&self, user_id: &str, content: &str) -> Result<(), NotificationError> {
        self.messages
            .lock()
            .unwrap()
            .push((user_id.to_string(), content.to_string()));
        Ok(())
    }
}

/// Counts access grants per customer.
#[derive(Default)]
pub struct CountingAccessGrantor {
    pub grants: Mutex<Vec<String>>,
}

impl CountingAccessGrantor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl AccessGrantor for CountingAccessGrantor {
    async fn grant_access(&self, customer_id: &str) {
        self.grants.lock().unwrap().push(customer_id.to_string());
    }
}

/// Remembers every audit record.
#[derive(Default)]
pub struct RecordingAuditSink {
    pub records: Mutex<Vec<(String, Value)>>,
}

impl RecordingAuditSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn kinds(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|(kind, _)| kind.clone())
            .collect()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, kind: &str, payload: Value) -> Result<(), SinkError> {
        self.records
            .lock()
            .unwrap()
            .push((kind.to_string(), payload));
        Ok(())
    }
}

/// Everything a flow test needs to drive the engine.
pub struct TestHarness {
    pub invoices: Arc<InvoiceService>,
    pub refunds: Arc<RefundService>,
    pub gateway: Arc<StubGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub ledger: Arc<InMemoryRevenueLedger>,
    pub access: Arc<CountingAccessGrantor>,
    pub audit: Arc<RecordingAuditSink>,
}

pub fn default_settings() -> InvoiceSettings {
    InvoiceSettings {
        max_invoice_amount: 100_000_000,
        invoice_ttl_secs: 1800,
        deposit_reminder_delay_secs: 3600,
    }
}

pub fn harness(settings: InvoiceSettings) -> TestHarness {
    let gateway = StubGateway::new();
    let notifier = RecordingNotifier::new();
    let ledger = Arc::new(InMemoryRevenueLedger::new());
    let access = CountingAccessGrantor::new();
    let audit = RecordingAuditSink::new();

    let invoices = Arc::new(InvoiceService::new(
        Arc::new(InvoiceRegistry::new()),
        gateway.clone(),
        notifier.clone(),
        ledger.clone(),
        access.clone(),
        audit.clone(),
        settings,
    ));
    let refunds = Arc::new(RefundService::new(
        Arc::new(RefundRegistry::new()),
        notifier.clone(),
        ledger.clone(),
        audit.clone(),
        STAFF_CHANNEL.to_string(),
    ));

    TestHarness {
        invoices,
        refunds,
        gateway,
        notifier,
        ledger,
        access,
        audit,
    }
}

pub fn invoice_request(amount: i64) -> CreateInvoiceRequest {
    CreateInvoiceRequest {
        staff_id: "staff-1".to_string(),
        customer_id: "cust-1".to_string(),
        product_name: "Logo design".to_string(),
        amount,
        is_deposit: false,
        deposit_amount: None,
        ticket_id: Some("ticket-77".to_string()),
    }
}
