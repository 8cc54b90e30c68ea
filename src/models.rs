use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use validator::{Validate, ValidationError};

/// Lifecycle states of an invoice. Expiration is modeled as a cancellation
/// carrying the reason `"Invoice expired"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Cancelled,
    Refunded,
}

/// A single payable request for a fixed amount, optionally a deposit
/// against a larger total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub invoice_id: String,
    /// Back-reference to the originating support case, informational only
    pub ticket_id: Option<String>,
    pub customer_id: String,
    pub staff_id: String,
    pub product_name: String,
    /// Total amount in minor currency units
    pub amount: i64,
    pub is_deposit: bool,
    /// Must be set and strictly less than `amount` when `is_deposit`
    pub deposit_amount: Option<i64>,
    pub status: InvoiceStatus,
    /// Order reference the gateway knows this payment session by;
    /// attached once the remote order is created
    pub order_code: Option<u64>,
    pub payment_url: Option<String>,
    pub qr_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl InvoiceRecord {
    /// The amount actually collected through the gateway: the deposit when
    /// this is a deposit invoice, otherwise the full amount.
    pub fn payable_amount(&self) -> i64 {
        if self.is_deposit {
            self.deposit_amount.unwrap_or(self.amount)
        } else {
            self.amount
        }
    }

    /// Remaining balance after a deposit payment; zero for full invoices.
    pub fn balance_due(&self) -> i64 {
        self.amount - self.payable_amount()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == InvoiceStatus::Pending && self.expires_at <= now
    }
}

/// Parameters for issuing a new invoice.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_deposit", skip_on_field_errors = true))]
pub struct CreateInvoiceRequest {
    pub staff_id: String,
    pub customer_id: String,
    #[validate(length(min = 1, max = 256))]
    pub product_name: String,
    #[validate(custom = "validate_positive_amount")]
    pub amount: i64,
    #[serde(default)]
    pub is_deposit: bool,
    #[serde(default)]
    pub deposit_amount: Option<i64>,
    #[serde(default)]
    pub ticket_id: Option<String>,
}

fn validate_positive_amount(value: i64) -> Result<(), ValidationError> {
    if value > 0 {
        Ok(())
    } else {
        let mut err = ValidationError::new("range");
        err.message = Some("amount must be greater than 0".into());
        Err(err)
    }
}

fn validate_deposit(req: &CreateInvoiceRequest) -> Result<(), ValidationError> {
    if !req.is_deposit {
        return Ok(());
    }
    match req.deposit_amount {
        Some(deposit) if deposit > 0 && deposit < req.amount => Ok(()),
        Some(_) => {
            let mut err = ValidationError::new("deposit");
            err.message = Some("deposit must be positive and strictly less than the total".into());
            Err(err)
        }
        None => {
            let mut err = ValidationError::new("deposit");
            err.message = Some("deposit invoices require a deposit amount".into());
            Err(err)
        }
    }
}

/// States of a refund request. `Approved` transitions to `Processed` once
/// the revenue reversal has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    Requested,
    Approved,
    Denied,
    Processed,
}

/// A customer- or staff-initiated demand to reverse a completed payment,
/// tracked independently of the originating invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub invoice_id: String,
    pub customer_id: String,
    pub requested_by: String,
    pub reason: String,
    pub amount: i64,
    pub status: RefundStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processed_by: Option<String>,
}

/// Parameters for opening a refund request.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateRefundRequest {
    pub invoice_id: String,
    pub customer_id: String,
    pub requested_by: String,
    #[validate(length(min = 1, max = 1024))]
    pub reason: String,
    #[validate(custom = "validate_positive_amount")]
    pub amount: i64,
}

/// Signature-verified payment status callback from the gateway. The
/// gateway identifies the payment session by its own order code, never by
/// our invoice id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub order_code: u64,
    pub status: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub reference: Option<String>,
}
