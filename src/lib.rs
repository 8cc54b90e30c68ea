//! Billing Engine Library
//!
//! Core of the support-desk commerce bot's payment handling:
//! - Invoice lifecycle orchestration (creation, completion, cancellation)
//! - Payment gateway client with HMAC request signing
//! - Webhook signature verification
//! - Background expiration sweeping
//! - Refund approval workflow
//!
//! The engine keeps its authoritative state in an in-process registry and
//! talks to the outside world (chat notifications, revenue analytics,
//! access grants, audit history) through narrow ports, so the surrounding
//! bot wires in its own adapters.

pub mod config;
pub mod errors;
pub mod gateway;
pub mod handlers;
pub mod models;
pub mod notifications;
pub mod registry;
pub mod services;
pub mod signature;
pub mod sinks;
pub mod sweeper;

/// Public re-exports for convenient access to commonly used items
pub mod prelude {
    pub use super::errors::ServiceError;
    pub use super::gateway::{PayOsClient, PaymentGateway};
    pub use super::models::*;
    pub use super::notifications::NotificationPort;
    pub use super::registry::{InvoiceRegistry, RefundRegistry};
    pub use super::services::{InvoiceService, InvoiceSettings, RefundService};
    pub use super::signature::SignatureCodec;
    pub use super::sinks::{AccessGrantor, AuditSink, RevenueLedger};
    pub use super::sweeper::{ExpirationSweeper, SweeperHandle};
}
