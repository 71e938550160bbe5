//! Billing-cycle engine.
//!
//! Owns the per-client state machine (`Pending -> Paid -> Pending`), the
//! revenue side effect of a payment, the cycle reset, and the scheduled
//! "evaluate and notify" entry point. All mutations of one client are
//! serialised through [`ClientLocks`]; dispatch runs with the lock released.

use super::accrual::compute_accrual;
use super::calendar::{invoice_date_for_cycle, is_cycle_day, Clock};
use super::dispatch::{clean_text, DispatchGateway, Notice};
use super::locks::ClientLocks;
use super::metrics::{record_cycle_reset, record_payment_transition, record_reminder};
use super::scheduler::{JobKey, JobRunner, JobScheduler};
use super::store::{ClientStore, CredentialProvider, RevenueLedger};
use crate::error::BillingError;
use crate::models::{
    BillingState, Client, ClientInvoiceStatus, ClientProfile, InvoiceEvaluation, RevenueRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn, Span};
use uuid::Uuid;

/// Evaluate a client for the cycle `now` falls in.
pub fn evaluate(client: &Client, now: DateTime<Utc>) -> Result<InvoiceEvaluation, BillingError> {
    let invoice_date = invoice_date_for_cycle(client.send_day, now)?;
    evaluate_for_invoice(client, invoice_date, now)
}

/// Evaluate a client against an explicit invoice-sent date.
pub fn evaluate_for_invoice(
    client: &Client,
    invoice_date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<InvoiceEvaluation, BillingError> {
    let accrual = compute_accrual(&client.accrual_terms(), invoice_date, now)?;

    let state = if client.is_paid {
        BillingState::Paid
    } else if accrual.is_overdue {
        BillingState::Overdue
    } else {
        BillingState::Pending
    };

    Ok(InvoiceEvaluation {
        client_id: client.client_id,
        invoice_date,
        grace_deadline: accrual.grace_deadline,
        base_cost: client.cost,
        accrued_fees: accrual.accrued_fees,
        amount_due: accrual.amount_due,
        periods_overdue: accrual.periods_overdue,
        late_fee_note: accrual.late_fee_note,
        is_overdue: accrual.is_overdue,
        resend: accrual.resend,
        first_of_cycle: now.date_naive() == invoice_date,
        state,
        evaluated_at: now,
    })
}

/// What a scheduled reminder run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderOutcome {
    Sent,
    NotDue,
    /// The job or the client disappeared before evaluation.
    Skipped,
}

impl ReminderOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderOutcome::Sent => "sent",
            ReminderOutcome::NotDue => "not_due",
            ReminderOutcome::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub default_send_hour: u32,
    pub reset_sweep_hour: u32,
    pub dispatch_timeout: Duration,
    pub sender_name: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_send_hour: 9,
            reset_sweep_hour: 0,
            dispatch_timeout: Duration::from_secs(30),
            sender_name: "Billing".to_string(),
        }
    }
}

pub struct BillingEngine {
    store: Arc<dyn ClientStore>,
    ledger: Arc<dyn RevenueLedger>,
    credentials: Arc<dyn CredentialProvider>,
    gateway: Arc<dyn DispatchGateway>,
    scheduler: Arc<JobScheduler>,
    clock: Arc<dyn Clock>,
    locks: ClientLocks,
    /// Keyed by owner id; serialises the per-owner email uniqueness check
    /// with the save that follows it.
    owner_locks: ClientLocks,
    settings: EngineSettings,
}

impl BillingEngine {
    pub fn new(
        store: Arc<dyn ClientStore>,
        ledger: Arc<dyn RevenueLedger>,
        credentials: Arc<dyn CredentialProvider>,
        gateway: Arc<dyn DispatchGateway>,
        scheduler: Arc<JobScheduler>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            ledger,
            credentials,
            gateway,
            scheduler,
            clock,
            locks: ClientLocks::new(),
            owner_locks: ClientLocks::new(),
            settings,
        }
    }

    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Lock table entries currently held or awaited.
    pub fn active_locks(&self) -> usize {
        self.locks.len() + self.owner_locks.len()
    }

    async fn load(&self, client_id: Uuid) -> Result<Client, BillingError> {
        self.store
            .get(client_id)
            .await?
            .ok_or(BillingError::NotFound(client_id))
    }

    async fn load_owned(&self, actor: Uuid, client_id: Uuid) -> Result<Client, BillingError> {
        let client = self.load(client_id).await?;
        client.ensure_owned_by(actor)?;
        Ok(client)
    }

    async fn ensure_unique_email(
        &self,
        owner_id: Uuid,
        email: &str,
        except: Option<Uuid>,
    ) -> Result<(), BillingError> {
        let email = clean_text(email).to_lowercase();
        let taken = self.store.list_all().await?.into_iter().any(|c| {
            c.owner_id == owner_id
                && Some(c.client_id) != except
                && clean_text(&c.email).to_lowercase() == email
        });
        if taken {
            return Err(BillingError::Conflict(format!(
                "a client with email {} already exists",
                email
            )));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Client administration
    // -------------------------------------------------------------------------

    /// Onboard a client and register its reminder job.
    #[instrument(skip(self, profile), fields(client_id))]
    pub async fn add_client(
        &self,
        actor: Uuid,
        profile: ClientProfile,
    ) -> Result<Client, BillingError> {
        let client = Client::new(actor, profile, self.settings.default_send_hour, self.now())?;
        Span::current().record("client_id", client.client_id.to_string());

        let _owner_guard = self.owner_locks.lock(actor).await;
        let _guard = self.locks.lock(client.client_id).await;
        self.ensure_unique_email(actor, &client.email, None).await?;
        self.store.save(&client).await?;

        if let Err(e) = self.scheduler.schedule(&client) {
            self.store.delete(client.client_id).await?;
            return Err(e);
        }

        info!(
            client_id = %client.client_id,
            owner_id = %actor,
            send_day = client.send_day,
            send_hour = client.send_hour,
            "Client added"
        );
        Ok(client)
    }

    /// Replace a client's editable attributes; reschedules when the send day
    /// or hour changed.
    #[instrument(skip(self, profile))]
    pub async fn update_client(
        &self,
        actor: Uuid,
        client_id: Uuid,
        profile: ClientProfile,
    ) -> Result<Client, BillingError> {
        let _owner_guard = self.owner_locks.lock(actor).await;
        let _guard = self.locks.lock(client_id).await;
        let mut client = self.load_owned(actor, client_id).await?;
        self.ensure_unique_email(actor, &profile.email, Some(client_id))
            .await?;

        let previous_trigger = (client.send_day, client.send_hour);
        client.apply_profile(profile, self.now())?;
        self.store.save(&client).await?;

        if (client.send_day, client.send_hour) != previous_trigger {
            self.scheduler.reschedule(&client)?;
        }

        info!(client_id = %client_id, "Client updated");
        Ok(client)
    }

    /// Unschedule, then delete. Once this returns no new reminder for the
    /// client starts; a send already past evaluation may still complete.
    #[instrument(skip(self))]
    pub async fn remove_client(&self, actor: Uuid, client_id: Uuid) -> Result<(), BillingError> {
        let _guard = self.locks.lock(client_id).await;
        self.load_owned(actor, client_id).await?;

        let job = self.scheduler.unschedule(client_id);
        if let Err(e) = self.store.delete(client_id).await {
            if let Some(job) = job {
                self.scheduler.restore(job);
            }
            return Err(e);
        }

        info!(client_id = %client_id, "Client removed");
        Ok(())
    }

    pub async fn get_client(&self, actor: Uuid, client_id: Uuid) -> Result<Client, BillingError> {
        self.load_owned(actor, client_id).await
    }

    /// The actor's clients with their current invoice evaluation.
    pub async fn list_clients(&self, actor: Uuid) -> Result<Vec<ClientInvoiceStatus>, BillingError> {
        let now = self.now();
        self.store
            .list_all()
            .await?
            .into_iter()
            .filter(|c| c.owner_id == actor)
            .map(|client| -> Result<ClientInvoiceStatus, BillingError> {
                let invoice = evaluate(&client, now)?;
                Ok(ClientInvoiceStatus { client, invoice })
            })
            .collect()
    }

    pub async fn invoice_status(
        &self,
        actor: Uuid,
        client_id: Uuid,
    ) -> Result<ClientInvoiceStatus, BillingError> {
        let client = self.load_owned(actor, client_id).await?;
        let invoice = evaluate(&client, self.now())?;
        Ok(ClientInvoiceStatus { client, invoice })
    }

    /// Sum of every revenue record booked for the actor's clients.
    pub async fn revenue_total(&self, actor: Uuid) -> Result<Decimal, BillingError> {
        Ok(self
            .ledger
            .records_for_owner(actor)
            .await?
            .iter()
            .map(|r| r.amount)
            .sum())
    }

    // -------------------------------------------------------------------------
    // Payment state machine
    // -------------------------------------------------------------------------

    /// `Pending -> Paid`, booking the base cost to the revenue ledger.
    #[instrument(skip(self))]
    pub async fn mark_paid(&self, actor: Uuid, client_id: Uuid) -> Result<Client, BillingError> {
        let _guard = self.locks.lock(client_id).await;
        let client = self.load_owned(actor, client_id).await?;
        self.apply_payment(client, true).await
    }

    /// `Paid -> Pending`. The revenue record of the payment stays.
    #[instrument(skip(self))]
    pub async fn mark_unpaid(&self, actor: Uuid, client_id: Uuid) -> Result<Client, BillingError> {
        let _guard = self.locks.lock(client_id).await;
        let client = self.load_owned(actor, client_id).await?;
        self.apply_payment(client, false).await
    }

    /// Flip the payment flag.
    #[instrument(skip(self))]
    pub async fn toggle_payment(
        &self,
        actor: Uuid,
        client_id: Uuid,
    ) -> Result<Client, BillingError> {
        let _guard = self.locks.lock(client_id).await;
        let client = self.load_owned(actor, client_id).await?;
        let paid = !client.is_paid;
        self.apply_payment(client, paid).await
    }

    /// Caller holds the client lock.
    async fn apply_payment(&self, mut client: Client, paid: bool) -> Result<Client, BillingError> {
        let client_id = client.client_id;
        let now = self.now();

        if paid == client.is_paid {
            return Err(BillingError::InvalidTransition {
                client_id,
                state: client.state().as_str(),
            });
        }

        if !paid {
            client.clear_payment(now);
            self.store.save(&client).await?;
            record_payment_transition("unpaid");
            info!(client_id = %client_id, "Client marked unpaid");
            return Ok(client);
        }

        let previous = client.clone();
        client.record_payment(now);
        self.store.save(&client).await?;

        let record = RevenueRecord::for_payment(&client, now);
        if let Err(e) = self.ledger.append(&record).await {
            warn!(client_id = %client_id, error = %e, "Revenue append failed, reverting payment");
            if let Err(revert) = self.store.save(&previous).await {
                tracing::error!(
                    client_id = %client_id,
                    error = %revert,
                    "Failed to revert payment after ledger failure"
                );
            }
            return Err(e);
        }

        record_payment_transition("paid");
        info!(
            client_id = %client_id,
            amount = %record.amount,
            is_late = client.is_late,
            "Client marked paid"
        );
        Ok(client)
    }

    // -------------------------------------------------------------------------
    // Cycle reset
    // -------------------------------------------------------------------------

    /// Return the client to `Pending` if `now` is its cycle day. Returns
    /// whether the reset applied.
    pub async fn reset_cycle(
        &self,
        client_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, BillingError> {
        let _guard = self.locks.lock(client_id).await;
        let mut client = self.load(client_id).await?;

        if !is_cycle_day(client.send_day, now) {
            return Ok(false);
        }

        if client.is_paid || client.payment_date.is_some() || client.is_late {
            client.clear_payment(now);
            self.store.save(&client).await?;
            tracing::debug!(client_id = %client_id, "Billing cycle reset");
        }
        Ok(true)
    }

    /// Reset every client whose cycle starts today. One client's failure does
    /// not stop the sweep.
    #[instrument(skip(self))]
    pub async fn run_reset_sweep(&self, now: DateTime<Utc>) -> Result<usize, BillingError> {
        let clients = self.store.list_all().await?;
        let mut reset = 0;

        for client in clients {
            match self.reset_cycle(client.client_id, now).await {
                Ok(true) => {
                    record_cycle_reset("sweep");
                    reset += 1;
                }
                Ok(false) | Err(BillingError::NotFound(_)) => {}
                Err(e) => {
                    warn!(client_id = %client.client_id, error = %e, "Cycle reset failed");
                }
            }
        }

        info!(reset, "Reset sweep finished");
        Ok(reset)
    }

    // -------------------------------------------------------------------------
    // Scheduled reminders
    // -------------------------------------------------------------------------

    pub async fn run_reminder(&self, client_id: Uuid) -> Result<ReminderOutcome, BillingError> {
        self.remind(client_id, self.now()).await
    }

    #[instrument(skip(self), fields(outcome))]
    async fn remind(
        &self,
        client_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ReminderOutcome, BillingError> {
        let result = self.remind_inner(client_id, now).await;
        let outcome = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(_) => "failed",
        };
        Span::current().record("outcome", outcome);
        record_reminder(outcome);
        result
    }

    async fn remind_inner(
        &self,
        client_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ReminderOutcome, BillingError> {
        let (client, invoice) = {
            let _guard = self.locks.lock(client_id).await;

            if !self.scheduler.contains(&JobKey::Client(client_id)) {
                tracing::debug!(client_id = %client_id, "Job no longer scheduled, skipping");
                return Ok(ReminderOutcome::Skipped);
            }
            let Some(client) = self.store.get(client_id).await? else {
                tracing::debug!(client_id = %client_id, "Client gone, skipping");
                return Ok(ReminderOutcome::Skipped);
            };

            let invoice = evaluate(&client, now)?;
            if !invoice.reminder_due() {
                return Ok(ReminderOutcome::NotDue);
            }
            (client, invoice)
        };

        let credentials = self.credentials.smtp_credentials(client.owner_id).await?;
        let notice = Notice::for_invoice(
            &client,
            &invoice,
            credentials,
            &self.settings.sender_name,
            now,
        );

        match tokio::time::timeout(self.settings.dispatch_timeout, self.gateway.send(&notice)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(client_id = %client_id, error = %e, "Reminder dispatch failed");
                return Err(e);
            }
            Err(_) => {
                warn!(
                    client_id = %client_id,
                    timeout_ms = self.settings.dispatch_timeout.as_millis() as u64,
                    "Reminder dispatch timed out"
                );
                return Err(BillingError::DispatchFailure(format!(
                    "dispatch timed out after {:?}",
                    self.settings.dispatch_timeout
                )));
            }
        }

        let _guard = self.locks.lock(client_id).await;
        if let Some(mut current) = self.store.get(client_id).await? {
            current.last_reminded_at = Some(now);
            self.store.save(&current).await?;
        }

        info!(
            client_id = %client_id,
            amount_due = %invoice.amount_due,
            first_of_cycle = invoice.first_of_cycle,
            "Reminder dispatched"
        );
        Ok(ReminderOutcome::Sent)
    }

    /// Register a job for every stored client plus the daily reset sweep.
    /// Returns the number of client jobs.
    pub async fn restore_schedules(&self) -> Result<usize, BillingError> {
        let clients = self.store.list_all().await?;
        for client in &clients {
            self.scheduler.schedule(client)?;
        }
        self.scheduler
            .schedule_reset_sweep(self.settings.reset_sweep_hour)?;

        info!(clients = clients.len(), "Schedules restored");
        Ok(clients.len())
    }
}

#[async_trait]
impl JobRunner for BillingEngine {
    async fn run_job(&self, key: JobKey, fired_at: DateTime<Utc>) -> Result<(), BillingError> {
        match key {
            JobKey::Client(client_id) => self.remind(client_id, fired_at).await.map(|_| ()),
            JobKey::ResetSweep => self.run_reset_sweep(fired_at).await.map(|_| ()),
        }
    }
}
