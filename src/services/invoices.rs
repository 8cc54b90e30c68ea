use chrono::{Duration, Utc};
use rand::Rng;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::gateway::PaymentGateway;
use crate::models::{CreateInvoiceRequest, InvoiceRecord, InvoiceStatus, WebhookPayload};
use crate::notifications::NotificationPort;
use crate::registry::InvoiceRegistry;
use crate::sinks::{AccessGrantor, AuditSink, RevenueLedger};

/// Gateway status strings carried in webhooks and order lookups.
const GATEWAY_STATUS_PAID: &str = "PAID";
const GATEWAY_STATUS_CANCELLED: &str = "CANCELLED";

/// Tunables lifted out of [`AppConfig`] so tests can construct the
/// service without a full configuration.
#[derive(Debug, Clone)]
pub struct InvoiceSettings {
    /// Ceiling for a single invoice, minor currency units
    pub max_invoice_amount: i64,
    /// Pending invoices become sweepable this long after creation
    pub invoice_ttl_secs: u64,
    /// Delay before the balance-due reminder on deposit payments
    pub deposit_reminder_delay_secs: u64,
}

impl From<&AppConfig> for InvoiceSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_invoice_amount: config.max_invoice_amount,
            invoice_ttl_secs: config.invoice_ttl_secs,
            deposit_reminder_delay_secs: config.deposit_reminder_delay_secs,
        }
    }
}

/// Orchestrates the invoice lifecycle: creation against the gateway,
/// webhook-driven completion, cancellation, and status queries. This is
/// the only component that mutates [`InvoiceRegistry`] entries.
pub struct InvoiceService {
    registry: Arc<InvoiceRegistry>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn NotificationPort>,
    ledger: Arc<dyn RevenueLedger>,
    access: Arc<dyn AccessGrantor>,
    audit: Arc<dyn AuditSink>,
    settings: InvoiceSettings,
}

impl InvoiceService {
    pub fn new(
        registry: Arc<InvoiceRegistry>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationPort>,
        ledger: Arc<dyn RevenueLedger>,
        access: Arc<dyn AccessGrantor>,
        audit: Arc<dyn AuditSink>,
        settings: InvoiceSettings,
    ) -> Self {
        Self {
            registry,
            gateway,
            notifier,
            ledger,
            access,
            audit,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<InvoiceRegistry> {
        &self.registry
    }

    fn generate_invoice_id() -> String {
        let suffix: u32 = rand::thread_rng().gen_range(100..1000);
        format!("INV-{}-{}", Utc::now().timestamp_millis(), suffix)
    }

    /// Validates, registers, and issues a new invoice. The record is
    /// inserted tentatively before the gateway call; a gateway failure
    /// rolls it back so no partial state survives.
    #[instrument(skip(self, request), fields(customer_id = %request.customer_id))]
    pub async fn create_invoice(
        &self,
        request: CreateInvoiceRequest,
    ) -> Result<InvoiceRecord, ServiceError> {
        request.validate()?;
        if request.amount > self.settings.max_invoice_amount {
            return Err(ServiceError::Validation(format!(
                "amount {} exceeds the invoice ceiling {}",
                request.amount, self.settings.max_invoice_amount
            )));
        }

        let now = Utc::now();
        let record = InvoiceRecord {
            invoice_id: Self::generate_invoice_id(),
            ticket_id: request.ticket_id,
            customer_id: request.customer_id,
            staff_id: request.staff_id,
            product_name: request.product_name,
            amount: request.amount,
            is_deposit: request.is_deposit,
            deposit_amount: request.deposit_amount,
            status: InvoiceStatus::Pending,
            order_code: None,
            payment_url: None,
            qr_code: None,
            created_at: now,
            expires_at: now + Duration::seconds(self.settings.invoice_ttl_secs as i64),
            paid_at: None,
        };
        let invoice_id = record.invoice_id.clone();

        self.registry.insert_pending(record.clone())?;

        let link = match self.gateway.create_payment_link(&record).await {
            Ok(link) => link,
            Err(err) => {
                self.registry.remove(&invoice_id);
                warn!(invoice_id = %invoice_id, error = %err, "rolled back invoice after gateway failure");
                return Err(err);
            }
        };

        if !self.registry.set_gateway_details(
            &invoice_id,
            link.order_code,
            link.checkout_url.clone(),
            link.qr_code.clone(),
        ) {
            self.registry.remove(&invoice_id);
            return Err(ServiceError::Gateway(format!(
                "order code {} already in use",
                link.order_code
            )));
        }

        let record = self
            .registry
            .get(&invoice_id)
            .ok_or_else(|| ServiceError::Internal("invoice vanished during creation".into()))?;

        self.notify(
            &record.customer_id,
            &format!(
                "Invoice {} for {}: {} due. Pay here: {}",
                record.invoice_id,
                record.product_name,
                record.payable_amount(),
                link.checkout_url
            ),
        )
        .await;

        info!(
            invoice_id = %record.invoice_id,
            order_code = link.order_code,
            amount = record.amount,
            is_deposit = record.is_deposit,
            "invoice created"
        );
        Ok(record)
    }

    /// Applies a signature-verified payment callback. Unknown order
    /// references are ignored; stale or duplicated deliveries fall
    /// through the idempotent transition guards.
    #[instrument(skip(self, payload), fields(order_code = payload.order_code))]
    pub async fn process_webhook(&self, payload: &WebhookPayload) -> bool {
        let Some(invoice_id) = self.registry.find_by_order_code(payload.order_code) else {
            debug!("webhook for unknown order reference, ignoring");
            return false;
        };

        match payload.status.as_str() {
            GATEWAY_STATUS_PAID => self.complete_payment(&invoice_id).await,
            GATEWAY_STATUS_CANCELLED => self.cancel_payment(&invoice_id, "cancelled by user").await,
            other => {
                debug!(status = %other, "ignoring non-terminal webhook status");
                false
            }
        }
    }

    /// Marks a pending invoice as paid. Returns `false` without side
    /// effects unless the invoice is currently PENDING, which makes
    /// duplicate webhook deliveries safe: revenue is credited and access
    /// granted exactly once.
    #[instrument(skip(self))]
    pub async fn complete_payment(&self, invoice_id: &str) -> bool {
        let Some(mut record) = self.registry.remove_if_pending(invoice_id) else {
            debug!("completion skipped: invoice unknown or not pending");
            return false;
        };

        // State committed: the record is out of the live registry. Side
        // effects below are best-effort and logged on failure so operators
        // can reconcile.
        record.status = InvoiceStatus::Paid;
        record.paid_at = Some(Utc::now());

        self.audit("invoice_paid", &record).await;
        self.ledger.credit(record.payable_amount()).await;
        self.access.grant_access(&record.customer_id).await;

        self.notify(
            &record.customer_id,
            &format!(
                "Payment received for invoice {} ({}). Thank you!",
                record.invoice_id, record.product_name
            ),
        )
        .await;

        if record.is_deposit {
            self.schedule_balance_reminder(record.clone());
        }

        info!(
            invoice_id = %record.invoice_id,
            amount = record.payable_amount(),
            "payment completed"
        );
        true
    }

    /// Cancels a pending invoice. Same idempotency contract as
    /// [`complete_payment`]: anything other than PENDING is a no-op.
    ///
    /// [`complete_payment`]: InvoiceService::complete_payment
    #[instrument(skip(self, reason))]
    pub async fn cancel_payment(&self, invoice_id: &str, reason: &str) -> bool {
        let Some(mut record) = self.registry.remove_if_pending(invoice_id) else {
            debug!("cancellation skipped: invoice unknown or not pending");
            return false;
        };

        record.status = InvoiceStatus::Cancelled;

        // Best-effort remote cancel so the checkout link dies with the
        // invoice; the local transition stands regardless.
        if let Some(order_code) = record.order_code {
            if let Err(err) = self.gateway.cancel_payment(order_code, reason).await {
                warn!(invoice_id = %record.invoice_id, error = %err, "remote cancel failed");
            }
        }

        self.audit_with_reason("invoice_cancelled", &record, reason).await;

        self.notify(
            &record.customer_id,
            &format!(
                "Invoice {} ({}) was cancelled: {}",
                record.invoice_id, record.product_name, reason
            ),
        )
        .await;

        info!(invoice_id = %record.invoice_id, reason = %reason, "invoice cancelled");
        true
    }

    /// Operator-driven reconciliation: fetches the remote session status
    /// and applies it through the same guarded transitions. Returns
    /// whether a transition was applied.
    #[instrument(skip(self))]
    pub async fn refresh_payment_status(&self, invoice_id: &str) -> Result<bool, ServiceError> {
        let record = self
            .registry
            .get(invoice_id)
            .ok_or_else(|| ServiceError::NotFound(format!("invoice {invoice_id}")))?;
        let order_code = record.order_code.ok_or_else(|| {
            ServiceError::NotFound(format!("invoice {invoice_id} has no gateway order"))
        })?;

        let info = self.gateway.get_payment_info(order_code).await?;
        match info.status.as_str() {
            GATEWAY_STATUS_PAID => Ok(self.complete_payment(invoice_id).await),
            GATEWAY_STATUS_CANCELLED | "EXPIRED" => {
                Ok(self.cancel_payment(invoice_id, "cancelled by gateway").await)
            }
            _ => Ok(false),
        }
    }

    /// Read-only lookup. Terminal invoices have left the live registry
    /// and return `None`; history lives in the audit sink.
    pub fn get_invoice_status(&self, invoice_id: &str) -> Option<InvoiceRecord> {
        self.registry.get(invoice_id)
    }

    pub fn live_count(&self) -> usize {
        self.registry.live_count()
    }

    pub fn pending_total(&self) -> i64 {
        self.registry.pending_total()
    }

    pub fn invoices_by_status(&self, status: InvoiceStatus) -> Vec<InvoiceRecord> {
        self.registry.by_status(status)
    }

    fn schedule_balance_reminder(&self, record: InvoiceRecord) {
        let notifier = Arc::clone(&self.notifier);
        let delay = std::time::Duration::from_secs(self.settings.deposit_reminder_delay_secs);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let content = format!(
                "Reminder: invoice {} ({}) has a remaining balance of {}.",
                record.invoice_id,
                record.product_name,
                record.balance_due()
            );
            if let Err(err) = notifier.send(&record.customer_id, &content).await {
                warn!(invoice_id = %record.invoice_id, error = %err, "balance reminder failed");
            }
        });
    }

    async fn notify(&self, user_id: &str, content: &str) {
        if let Err(err) = self.notifier.send(user_id, content).await {
            warn!(user_id = %user_id, error = %err, "notification failed");
        }
    }

    async fn audit(&self, kind: &str, record: &InvoiceRecord) {
        let payload = match serde_json::to_value(record) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "audit payload serialization failed");
                return;
            }
        };
        if let Err(err) = self.audit.record(kind, payload).await {
            warn!(kind = %kind, error = %err, "audit record failed");
        }
    }

    async fn audit_with_reason(&self, kind: &str, record: &InvoiceRecord, reason: &str) {
        let payload = match serde_json::to_value(record) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "audit payload serialization failed");
                return;
            }
        };
        let payload = json!({ "invoice": payload, "reason": reason });
        if let Err(err) = self.audit.record(kind, payload).await {
            warn!(kind = %kind, error = %err, "audit record failed");
        }
    }
}
