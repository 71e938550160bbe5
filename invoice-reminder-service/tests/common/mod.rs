#![allow(dead_code)]

use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use invoice_reminder_service::models::{Client, ClientProfile};
use invoice_reminder_service::services::{
    BillingEngine, EngineSettings, InMemoryClientStore, InMemoryRevenueLedger, JobScheduler,
    ManualClock, MockGateway, RevenueLedger, StaticCredentialProvider,
};
use invoice_reminder_service::startup::{router, AppState};
use rust_decimal::Decimal;
use secrecy::Secret;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const OWNER_ID: &str = "11111111-1111-1111-1111-111111111111";
pub const OTHER_USER_ID: &str = "22222222-2222-2222-2222-222222222222";

pub fn owner() -> Uuid {
    Uuid::parse_str(OWNER_ID).unwrap()
}

pub fn other_user() -> Uuid {
    Uuid::parse_str(OTHER_USER_ID).unwrap()
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

/// Cost 100, fee 10 every day after a 3-day grace, sent on `send_day` at 09:00.
pub fn profile(email: &str, send_day: u32) -> ClientProfile {
    ClientProfile {
        name: "Acme Corp".to_string(),
        email: email.to_string(),
        cc: None,
        message: Some("Thanks for your business".to_string()),
        cost: Decimal::new(100, 0),
        late_fee: Decimal::new(10, 0),
        grace_period_days: 3,
        fee_interval_days: 1,
        send_day,
        send_hour: Some(9),
    }
}

/// Engine wired to a manual clock, mock gateway and in-memory collaborators.
pub struct TestApp {
    pub engine: Arc<BillingEngine>,
    pub clock: Arc<ManualClock>,
    pub gateway: Arc<MockGateway>,
    pub store: Arc<InMemoryClientStore>,
    pub credentials: Arc<StaticCredentialProvider>,
}

impl TestApp {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self::with_ledger(start, Arc::new(InMemoryRevenueLedger::new()))
    }

    pub fn with_ledger(start: DateTime<Utc>, ledger: Arc<dyn RevenueLedger>) -> Self {
        Self::build(start, ledger, Duration::from_secs(5))
    }

    pub fn with_dispatch_timeout(start: DateTime<Utc>, timeout: Duration) -> Self {
        Self::build(start, Arc::new(InMemoryRevenueLedger::new()), timeout)
    }

    fn build(start: DateTime<Utc>, ledger: Arc<dyn RevenueLedger>, timeout: Duration) -> Self {
        let clock = Arc::new(ManualClock::new(start));
        let gateway = Arc::new(MockGateway::new());
        let store = Arc::new(InMemoryClientStore::new());
        let credentials = Arc::new(StaticCredentialProvider::new(
            "billing@example.com",
            Secret::new("app-password".to_string()),
        ));
        let scheduler = Arc::new(JobScheduler::new(clock.clone(), Duration::from_millis(10)));

        let engine = Arc::new(BillingEngine::new(
            store.clone(),
            ledger,
            credentials.clone(),
            gateway.clone(),
            scheduler,
            clock.clone(),
            EngineSettings {
                dispatch_timeout: timeout,
                sender_name: "Test Billing".to_string(),
                ..Default::default()
            },
        ));

        Self {
            engine,
            clock,
            gateway,
            store,
            credentials,
        }
    }

    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        self.engine.scheduler()
    }

    pub fn router(&self) -> Router {
        router(AppState {
            engine: self.engine.clone(),
        })
    }

    pub async fn add_client(&self, email: &str, send_day: u32) -> Client {
        self.engine
            .add_client(owner(), profile(email, send_day))
            .await
            .expect("Failed to add client")
    }

    /// Run one scheduler pass against the engine.
    pub async fn tick(&self) -> usize {
        self.scheduler().tick(self.engine.as_ref()).await
    }
}
