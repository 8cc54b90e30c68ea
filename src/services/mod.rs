pub mod invoices;
pub mod refunds;

pub use invoices::{InvoiceService, InvoiceSettings};
pub use refunds::RefundService;
