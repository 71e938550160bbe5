//! Domain models for invoice-reminder-service.

mod client;
mod invoice;
mod revenue;

pub use client::{BillingState, Client, ClientProfile};
pub use invoice::{ClientInvoiceStatus, InvoiceEvaluation};
pub use revenue::RevenueRecord;
