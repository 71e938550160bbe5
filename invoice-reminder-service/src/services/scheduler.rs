//! In-process recurring job scheduler.
//!
//! One job per client (`job:<client id>`) fires monthly on the client's send
//! day and hour; one global `reset-sweep` job fires daily. The scheduler owns
//! only the job table and the clock. What a firing does is delegated to a
//! [`JobRunner`], normally the billing engine.

use super::calendar::{effective_send_day, next_daily_occurrence, next_monthly_occurrence, Clock};
use super::metrics::{record_job_error, record_job_fired};
use crate::error::BillingError;
use crate::models::Client;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobKey {
    Client(Uuid),
    ResetSweep,
}

impl JobKey {
    pub fn job_type(&self) -> &'static str {
        match self {
            JobKey::Client(_) => "reminder",
            JobKey::ResetSweep => "reset_sweep",
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKey::Client(id) => write!(f, "job:{}", id),
            JobKey::ResetSweep => f.write_str("reset-sweep"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Monthly { day: u32, hour: u32 },
    Daily { hour: u32 },
}

impl Trigger {
    /// Monthly trigger for a client, using the capped send day.
    pub fn for_client(client: &Client) -> Self {
        Trigger::Monthly {
            day: effective_send_day(client.send_day),
            hour: client.send_hour,
        }
    }

    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, BillingError> {
        match *self {
            Trigger::Monthly { day, hour } => next_monthly_occurrence(day, hour, after),
            Trigger::Daily { hour } => next_daily_occurrence(hour, after),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub key: JobKey,
    pub trigger: Trigger,
    pub next_fire: DateTime<Utc>,
}

/// Executes a job when it comes due.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_job(&self, key: JobKey, fired_at: DateTime<Utc>) -> Result<(), BillingError>;
}

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct JobScheduler {
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
    jobs: Mutex<HashMap<JobKey, Job>>,
    running: Mutex<Option<Running>>,
}

impl JobScheduler {
    pub fn new(clock: Arc<dyn Clock>, tick_interval: Duration) -> Self {
        Self {
            clock,
            tick_interval,
            jobs: Mutex::new(HashMap::new()),
            running: Mutex::new(None),
        }
    }

    fn jobs(&self) -> std::sync::MutexGuard<'_, HashMap<JobKey, Job>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(&self, key: JobKey, trigger: Trigger) -> Result<Job, BillingError> {
        let job = Job {
            key,
            trigger,
            next_fire: trigger.next_after(self.clock.now())?,
        };
        self.jobs().insert(key, job.clone());
        Ok(job)
    }

    /// Register the client's reminder job, replacing any existing one.
    pub fn schedule(&self, client: &Client) -> Result<Job, BillingError> {
        let job = self.insert(JobKey::Client(client.client_id), Trigger::for_client(client))?;
        tracing::info!(
            job = %job.key,
            next_fire = %job.next_fire,
            "Reminder job scheduled"
        );
        Ok(job)
    }

    /// Same as [`schedule`](Self::schedule); called after schedule-relevant edits.
    pub fn reschedule(&self, client: &Client) -> Result<Job, BillingError> {
        self.schedule(client)
    }

    /// Remove the client's job. Once this returns, no later tick can pick it up.
    pub fn unschedule(&self, client_id: Uuid) -> Option<Job> {
        let removed = self.jobs().remove(&JobKey::Client(client_id));
        if let Some(job) = &removed {
            tracing::info!(job = %job.key, "Reminder job removed");
        }
        removed
    }

    /// Put back a job taken out by [`unschedule`](Self::unschedule).
    pub fn restore(&self, job: Job) {
        self.jobs().insert(job.key, job);
    }

    pub fn schedule_reset_sweep(&self, hour: u32) -> Result<Job, BillingError> {
        let job = self.insert(JobKey::ResetSweep, Trigger::Daily { hour })?;
        tracing::info!(next_fire = %job.next_fire, "Reset sweep scheduled");
        Ok(job)
    }

    pub fn contains(&self, key: &JobKey) -> bool {
        self.jobs().contains_key(key)
    }

    pub fn job(&self, key: &JobKey) -> Option<Job> {
        self.jobs().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs().is_empty()
    }

    /// Take every job due at `now` and move it to its next occurrence.
    fn take_due(&self, now: DateTime<Utc>) -> Vec<JobKey> {
        let mut jobs = self.jobs();
        let mut due = Vec::new();

        for job in jobs.values_mut() {
            if job.next_fire > now {
                continue;
            }
            match job.trigger.next_after(now) {
                Ok(next) => job.next_fire = next,
                Err(e) => {
                    tracing::error!(job = %job.key, error = %e, "Cannot compute next fire time");
                    continue;
                }
            }
            due.push(job.key);
        }

        due.sort();
        due
    }

    /// Run every due job once, concurrently. Failures are logged and counted;
    /// they never stop the other jobs. Returns the number of jobs fired.
    pub async fn tick(&self, runner: &dyn JobRunner) -> usize {
        let now = self.clock.now();
        let due = self.take_due(now);
        if due.is_empty() {
            return 0;
        }

        tracing::debug!(count = due.len(), at = %now, "Firing due jobs");

        let results = join_all(due.iter().map(|key| runner.run_job(*key, now))).await;

        for (key, result) in due.iter().zip(results) {
            record_job_fired(key.job_type());
            if let Err(e) = result {
                record_job_error(key.job_type(), e.kind());
                tracing::warn!(
                    job = %key,
                    error = %e,
                    "Job failed; it stays scheduled for its next occurrence"
                );
            }
        }

        due.len()
    }

    /// Start the background loop. Calling it while already running is a no-op.
    pub fn start(self: &Arc<Self>, runner: Arc<dyn JobRunner>) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let shutdown = token.clone();
        let scheduler = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            tracing::info!(
                tick_ms = scheduler.tick_interval.as_millis() as u64,
                jobs = scheduler.len(),
                "Scheduler started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Scheduler shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        scheduler.tick(runner.as_ref()).await;
                    }
                }
            }
        });

        *running = Some(Running { token, handle });
    }

    /// Stop the background loop and wait for an in-flight tick to finish.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        if let Some(Running { token, handle }) = running {
            token.cancel();
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Scheduler task ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClientProfile;
    use crate::services::calendar::ManualClock;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn client(send_day: u32, send_hour: u32) -> Client {
        Client::new(
            Uuid::new_v4(),
            ClientProfile {
                name: "Acme".to_string(),
                email: "ap@acme.test".to_string(),
                cc: None,
                message: None,
                cost: Decimal::new(100, 0),
                late_fee: Decimal::new(10, 0),
                grace_period_days: 3,
                fee_interval_days: 1,
                send_day,
                send_hour: Some(send_hour),
            },
            9,
            at(2025, 1, 1, 0),
        )
        .unwrap()
    }

    #[derive(Default)]
    struct CountingRunner {
        runs: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl JobRunner for CountingRunner {
        async fn run_job(&self, _key: JobKey, _fired_at: DateTime<Utc>) -> Result<(), BillingError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(BillingError::DispatchFailure("down".to_string()));
            }
            Ok(())
        }
    }

    fn scheduler(now: DateTime<Utc>) -> (Arc<ManualClock>, JobScheduler) {
        let clock = Arc::new(ManualClock::new(now));
        let scheduler = JobScheduler::new(clock.clone(), Duration::from_millis(10));
        (clock, scheduler)
    }

    #[test]
    fn job_keys_render_deterministically() {
        let id = Uuid::new_v4();
        assert_eq!(JobKey::Client(id).to_string(), format!("job:{}", id));
        assert_eq!(JobKey::ResetSweep.to_string(), "reset-sweep");
    }

    #[test]
    fn scheduling_twice_keeps_one_job() {
        let (_clock, scheduler) = scheduler(at(2025, 3, 1, 0));
        let mut client = client(15, 9);

        scheduler.schedule(&client).unwrap();
        client.send_day = 20;
        let job = scheduler.reschedule(&client).unwrap();

        assert_eq!(scheduler.len(), 1);
        assert_eq!(job.next_fire, at(2025, 3, 20, 9));
    }

    #[test]
    fn send_day_above_cap_fires_on_the_28th() {
        let (_clock, scheduler) = scheduler(at(2025, 2, 1, 0));
        let job = scheduler.schedule(&client(31, 9)).unwrap();

        assert_eq!(job.trigger, Trigger::Monthly { day: 28, hour: 9 });
        assert_eq!(job.next_fire, at(2025, 2, 28, 9));
    }

    #[test]
    fn unschedule_then_restore() {
        let (_clock, scheduler) = scheduler(at(2025, 3, 1, 0));
        let client = client(15, 9);
        scheduler.schedule(&client).unwrap();

        let job = scheduler.unschedule(client.client_id).unwrap();
        assert!(!scheduler.contains(&JobKey::Client(client.client_id)));
        assert!(scheduler.unschedule(client.client_id).is_none());

        scheduler.restore(job.clone());
        assert_eq!(scheduler.job(&job.key), Some(job));
    }

    #[tokio::test]
    async fn tick_fires_only_due_jobs_and_advances_them() {
        let (clock, scheduler) = scheduler(at(2025, 3, 1, 0));
        scheduler.schedule(&client(15, 9)).unwrap();
        scheduler.schedule(&client(20, 9)).unwrap();
        scheduler.schedule_reset_sweep(0).unwrap();
        let runner = CountingRunner::default();

        assert_eq!(scheduler.tick(&runner).await, 0);

        clock.set(at(2025, 3, 15, 9));
        // the 15th job and the daily sweep
        assert_eq!(scheduler.tick(&runner).await, 2);
        assert_eq!(scheduler.tick(&runner).await, 0);
        assert_eq!(runner.runs.load(Ordering::SeqCst), 2);

        let sweep = scheduler.job(&JobKey::ResetSweep).unwrap();
        assert_eq!(sweep.next_fire, at(2025, 3, 16, 0));
    }

    #[tokio::test]
    async fn failed_jobs_stay_scheduled() {
        let (clock, scheduler) = scheduler(at(2025, 3, 1, 0));
        let client = client(2, 9);
        scheduler.schedule(&client).unwrap();
        let runner = CountingRunner {
            fail: true,
            ..Default::default()
        };

        clock.set(at(2025, 3, 2, 9));
        assert_eq!(scheduler.tick(&runner).await, 1);

        let job = scheduler.job(&JobKey::Client(client.client_id)).unwrap();
        assert_eq!(job.next_fire, at(2025, 4, 2, 9));
    }

    #[tokio::test]
    async fn start_and_stop_background_loop() {
        let (clock, scheduler) = scheduler(at(2025, 3, 1, 0));
        let scheduler = Arc::new(scheduler);
        scheduler.schedule(&client(1, 9)).unwrap();
        let runner = Arc::new(CountingRunner::default());

        scheduler.start(runner.clone());
        assert!(scheduler.is_running());

        clock.set(at(2025, 4, 1, 9));
        for _ in 0..100 {
            if runner.runs.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);

        scheduler.stop().await;
        assert!(!scheduler.is_running());
    }
}
