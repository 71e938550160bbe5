//! Invoice evaluation result.

use super::{BillingState, Client};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

/// Outcome of evaluating one client at one instant. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceEvaluation {
    pub client_id: Uuid,
    pub invoice_date: NaiveDate,
    pub grace_deadline: DateTime<Utc>,
    pub base_cost: Decimal,
    pub accrued_fees: Decimal,
    pub amount_due: Decimal,
    pub periods_overdue: i64,
    pub late_fee_note: String,
    pub is_overdue: bool,
    pub resend: bool,
    /// Evaluated on the invoice date itself.
    pub first_of_cycle: bool,
    pub state: BillingState,
    pub evaluated_at: DateTime<Utc>,
}

impl InvoiceEvaluation {
    /// Whether the scheduled reminder should go out for this evaluation.
    /// Paid clients are never asked for money, even on the cycle day.
    pub fn reminder_due(&self) -> bool {
        self.state != BillingState::Paid && (self.first_of_cycle || self.resend)
    }
}

/// Client row as shown on the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct ClientInvoiceStatus {
    pub client: Client,
    pub invoice: InvoiceEvaluation,
}
