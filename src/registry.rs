use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::errors::ServiceError;
use crate::models::{InvoiceRecord, InvoiceStatus, RefundRequest, RefundStatus};

/// Authoritative in-process store of live invoices.
///
/// Every status transition funnels through [`remove_if_pending`], a per-key
/// atomic check-and-set: the winning writer takes the record out of the
/// registry, so a losing webhook or sweeper pass observes nothing and
/// becomes a no-op. Operations on distinct invoice ids run in parallel on
/// separate map shards.
///
/// [`remove_if_pending`]: InvoiceRegistry::remove_if_pending
#[derive(Default)]
pub struct InvoiceRegistry {
    invoices: DashMap<String, InvoiceRecord>,
    by_order_code: DashMap<u64, String>,
}

impl InvoiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly created PENDING invoice. Invoice ids are unique
    /// for the lifetime of the registry; a duplicate is a conflict.
    pub fn insert_pending(&self, record: InvoiceRecord) -> Result<(), ServiceError> {
        match self.invoices.entry(record.invoice_id.clone()) {
            Entry::Occupied(_) => Err(ServiceError::Conflict(format!(
                "invoice {} already registered",
                record.invoice_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    /// Attaches the gateway order reference and checkout artifacts to a
    /// tentative invoice. Fails when the order code is already claimed or
    /// the invoice has disappeared; the caller rolls back on failure.
    pub fn set_gateway_details(
        &self,
        invoice_id: &str,
        order_code: u64,
        payment_url: String,
        qr_code: String,
    ) -> bool {
        match self.by_order_code.entry(order_code) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => {
                slot.insert(invoice_id.to_string());
            }
        }

        match self.invoices.get_mut(invoice_id) {
            Some(mut record) => {
                record.order_code = Some(order_code);
                record.payment_url = Some(payment_url);
                record.qr_code = Some(qr_code);
                true
            }
            None => {
                self.by_order_code.remove(&order_code);
                false
            }
        }
    }

    /// Unconditionally evicts an invoice (creation rollback).
    pub fn remove(&self, invoice_id: &str) -> Option<InvoiceRecord> {
        let (_, record) = self.invoices.remove(invoice_id)?;
        if let Some(order_code) = record.order_code {
            self.by_order_code.remove(&order_code);
        }
        Some(record)
    }

    /// Atomically takes the invoice out of the registry if and only if it
    /// is still PENDING. Exactly one of any number of concurrent callers
    /// for the same id receives the record; the rest get `None`.
    pub fn remove_if_pending(&self, invoice_id: &str) -> Option<InvoiceRecord> {
        let (_, record) = self
            .invoices
            .remove_if(invoice_id, |_, record| {
                record.status == InvoiceStatus::Pending
            })?;
        if let Some(order_code) = record.order_code {
            self.by_order_code.remove(&order_code);
        }
        Some(record)
    }

    /// Resolves a gateway order reference to our invoice id.
    pub fn find_by_order_code(&self, order_code: u64) -> Option<String> {
        self.by_order_code
            .get(&order_code)
            .map(|entry| entry.value().clone())
    }

    pub fn get(&self, invoice_id: &str) -> Option<InvoiceRecord> {
        self.invoices
            .get(invoice_id)
            .map(|entry| entry.value().clone())
    }

    /// Ids of PENDING invoices whose expiry has passed as of `now`.
    pub fn expired_pending(&self, now: DateTime<Utc>) -> Vec<String> {
        self.invoices
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.invoices.len()
    }

    /// Sum of outstanding payable amounts (deposit-aware) across PENDING
    /// invoices.
    pub fn pending_total(&self) -> i64 {
        self.invoices
            .iter()
            .filter(|entry| entry.value().status == InvoiceStatus::Pending)
            .map(|entry| entry.value().payable_amount())
            .sum()
    }

    pub fn by_status(&self, status: InvoiceStatus) -> Vec<InvoiceRecord> {
        self.invoices
            .iter()
            .filter(|entry| entry.value().status == status)
            .map(|entry| entry.value().clone())
            .collect()
    }
}

/// Live refund requests keyed by invoice id. Presence in the map means an
/// open request; resolved requests are evicted after the backup sink
/// records them, which enforces the single-open-request rule.
#[derive(Default)]
pub struct RefundRegistry {
    refunds: DashMap<String, RefundRequest>,
}

impl RefundRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new refund request unless one is already open for the
    /// invoice.
    pub fn insert_new(&self, request: RefundRequest) -> Result<(), ServiceError> {
        match self.refunds.entry(request.invoice_id.clone()) {
            Entry::Occupied(_) => Err(ServiceError::Conflict(format!(
                "refund request already open for invoice {}",
                request.invoice_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(request);
                Ok(())
            }
        }
    }

    /// Takes the request for an invoice out of the registry for
    /// resolution.
    pub fn remove(&self, invoice_id: &str) -> Option<RefundRequest> {
        self.refunds.remove(invoice_id).map(|(_, request)| request)
    }

    pub fn get(&self, invoice_id: &str) -> Option<RefundRequest> {
        self.refunds
            .get(invoice_id)
            .map(|entry| entry.value().clone())
    }

    pub fn open_count(&self) -> usize {
        self.refunds
            .iter()
            .filter(|entry| entry.value().status == RefundStatus::Requested)
            .count()
    }
}
