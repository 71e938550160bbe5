//! Client billing profile model.

use crate::error::BillingError;
use crate::services::accrual::AccrualTerms;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Billing state of a client for the current cycle.
///
/// Only `Pending` and `Paid` are persisted (through `is_paid`). `Overdue` is a
/// view computed at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingState {
    Pending,
    Paid,
    Overdue,
}

impl BillingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingState::Pending => "pending",
            BillingState::Paid => "paid",
            BillingState::Overdue => "overdue",
        }
    }
}

impl std::fmt::Display for BillingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Editable client attributes, used for both onboarding and edits.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientProfile {
    pub name: String,
    pub email: String,
    pub cc: Option<String>,
    pub message: Option<String>,
    pub cost: Decimal,
    pub late_fee: Decimal,
    pub grace_period_days: i64,
    pub fee_interval_days: i64,
    pub send_day: u32,
    pub send_hour: Option<u32>,
}

impl ClientProfile {
    /// Reject parameters the engine cannot evaluate or schedule.
    pub fn validate(&self) -> Result<(), BillingError> {
        if self.fee_interval_days < 1 {
            return Err(BillingError::InvalidConfiguration(format!(
                "fee interval must be at least 1 day (got {})",
                self.fee_interval_days
            )));
        }
        if self.grace_period_days < 0 {
            return Err(BillingError::InvalidConfiguration(format!(
                "grace period cannot be negative (got {})",
                self.grace_period_days
            )));
        }
        if !(1..=31).contains(&self.send_day) {
            return Err(BillingError::InvalidConfiguration(format!(
                "send day must be within 1..=31 (got {})",
                self.send_day
            )));
        }
        if let Some(hour) = self.send_hour {
            if hour > 23 {
                return Err(BillingError::InvalidConfiguration(format!(
                    "send hour must be within 0..=23 (got {})",
                    hour
                )));
            }
        }
        if self.cost.is_sign_negative() || self.late_fee.is_sign_negative() {
            return Err(BillingError::InvalidConfiguration(
                "cost and late fee cannot be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// A client being invoiced on a monthly cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub client_id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub email: String,
    pub cc: Option<String>,
    pub message: Option<String>,
    pub cost: Decimal,
    pub late_fee: Decimal,
    pub grace_period_days: i64,
    pub fee_interval_days: i64,
    pub send_day: u32,
    pub send_hour: u32,
    pub is_paid: bool,
    pub payment_date: Option<DateTime<Utc>>,
    pub is_late: bool,
    pub last_reminded_at: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Client {
    /// Onboard a new client in the `Pending` state.
    pub fn new(
        owner_id: Uuid,
        profile: ClientProfile,
        default_send_hour: u32,
        now: DateTime<Utc>,
    ) -> Result<Self, BillingError> {
        profile.validate()?;

        Ok(Self {
            client_id: Uuid::new_v4(),
            owner_id,
            send_hour: profile.send_hour.unwrap_or(default_send_hour),
            name: profile.name,
            email: profile.email,
            cc: profile.cc,
            message: profile.message,
            cost: profile.cost,
            late_fee: profile.late_fee,
            grace_period_days: profile.grace_period_days,
            fee_interval_days: profile.fee_interval_days,
            send_day: profile.send_day,
            is_paid: false,
            payment_date: None,
            is_late: false,
            last_reminded_at: None,
            created_utc: now,
            updated_utc: now,
        })
    }

    /// Overwrite the editable attributes. Billing state is left untouched.
    pub fn apply_profile(
        &mut self,
        profile: ClientProfile,
        now: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        profile.validate()?;

        if let Some(hour) = profile.send_hour {
            self.send_hour = hour;
        }
        self.name = profile.name;
        self.email = profile.email;
        self.cc = profile.cc;
        self.message = profile.message;
        self.cost = profile.cost;
        self.late_fee = profile.late_fee;
        self.grace_period_days = profile.grace_period_days;
        self.fee_interval_days = profile.fee_interval_days;
        self.send_day = profile.send_day;
        self.updated_utc = now;
        Ok(())
    }

    pub fn ensure_owned_by(&self, actor: Uuid) -> Result<(), BillingError> {
        if self.owner_id != actor {
            return Err(BillingError::PermissionDenied {
                actor,
                client_id: self.client_id,
            });
        }
        Ok(())
    }

    /// Persisted state, ignoring the derived overdue view.
    pub fn state(&self) -> BillingState {
        if self.is_paid {
            BillingState::Paid
        } else {
            BillingState::Pending
        }
    }

    pub fn accrual_terms(&self) -> AccrualTerms {
        AccrualTerms {
            cost: self.cost,
            late_fee: self.late_fee,
            grace_period_days: self.grace_period_days,
            fee_interval_days: self.fee_interval_days,
        }
    }

    /// `Pending -> Paid`. Lateness is measured from onboarding, as the
    /// dashboard has always reported it.
    pub(crate) fn record_payment(&mut self, now: DateTime<Utc>) {
        self.is_paid = true;
        self.payment_date = Some(now);
        self.is_late = now > self.created_utc + Duration::days(self.grace_period_days);
        self.updated_utc = now;
    }

    /// `Paid -> Pending`, also used for the cycle reset.
    pub(crate) fn clear_payment(&mut self, now: DateTime<Utc>) {
        self.is_paid = false;
        self.payment_date = None;
        self.is_late = false;
        self.updated_utc = now;
    }
}
