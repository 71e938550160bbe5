//! Revenue ledger entries.

use super::Client;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Realized payment. Append-only: nothing updates or removes these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenueRecord {
    pub record_id: Uuid,
    pub client_id: Uuid,
    pub owner_id: Uuid,
    /// Nominal price of the cycle; late fees are not booked here.
    pub amount: Decimal,
    pub recorded_utc: DateTime<Utc>,
}

impl RevenueRecord {
    pub fn for_payment(client: &Client, recorded_utc: DateTime<Utc>) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            client_id: client.client_id,
            owner_id: client.owner_id,
            amount: client.cost,
            recorded_utc,
        }
    }
}
