//! Late-fee accrual.
//!
//! This is the only place the grace-deadline and fee formula lives. It is a
//! pure function of its inputs and never touches the clock.

use super::calendar::start_of_day;
use crate::error::BillingError;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;

const DEADLINE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The subset of a client's profile the fee math depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccrualTerms {
    pub cost: Decimal,
    pub late_fee: Decimal,
    pub grace_period_days: i64,
    pub fee_interval_days: i64,
}

impl AccrualTerms {
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
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accrual {
    pub amount_due: Decimal,
    pub accrued_fees: Decimal,
    pub periods_overdue: i64,
    pub late_fee_note: String,
    pub resend: bool,
    pub grace_deadline: DateTime<Utc>,
    pub is_overdue: bool,
}

/// End of the last grace day: invoice date + grace days + 23h59m.
pub fn grace_deadline(invoice_date: NaiveDate, grace_period_days: i64) -> DateTime<Utc> {
    start_of_day(invoice_date)
        + Duration::days(grace_period_days)
        + Duration::hours(23)
        + Duration::minutes(59)
}

/// Amount due and reminder decision for an invoice sent on `invoice_date`.
///
/// Fees accrue once per full `fee_interval_days` past the grace deadline, and
/// `resend` is raised only on those interval boundaries.
pub fn compute_accrual(
    terms: &AccrualTerms,
    invoice_date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Accrual, BillingError> {
    terms.validate()?;

    let deadline = grace_deadline(invoice_date, terms.grace_period_days);

    if now <= deadline {
        return Ok(Accrual {
            amount_due: terms.cost,
            accrued_fees: Decimal::ZERO,
            periods_overdue: 0,
            late_fee_note: String::new(),
            resend: false,
            grace_deadline: deadline,
            is_overdue: false,
        });
    }

    let overdue_days = (now - deadline).num_days();
    let periods_overdue = overdue_days / terms.fee_interval_days;
    let accrued_fees = terms.late_fee * Decimal::from(periods_overdue);
    let resend = overdue_days % terms.fee_interval_days == 0;

    let late_fee_note = if periods_overdue > 0 {
        let deadline_str = deadline.format(DEADLINE_FORMAT);
        format!(
            "Late fees applied:\n\
             - Grace period was {} days (until {})\n\
             - Late fees started on {}\n\
             - Applied every {} day(s)\n\
             - Total late fees: ${:.2}\n",
            terms.grace_period_days,
            deadline_str,
            deadline_str,
            terms.fee_interval_days,
            accrued_fees
        )
    } else {
        String::new()
    };

    Ok(Accrual {
        amount_due: terms.cost + accrued_fees,
        accrued_fees,
        periods_overdue,
        late_fee_note,
        resend,
        grace_deadline: deadline,
        is_overdue: true,
    })
}
