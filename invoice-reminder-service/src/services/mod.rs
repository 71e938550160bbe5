//! Services module for invoice-reminder-service.

pub mod accrual;
pub mod billing;
pub mod calendar;
pub mod dispatch;
pub mod locks;
pub mod metrics;
pub mod scheduler;
pub mod store;

pub use accrual::{compute_accrual, grace_deadline, Accrual, AccrualTerms};
pub use billing::{
    evaluate, evaluate_for_invoice, BillingEngine, EngineSettings, ReminderOutcome,
};
pub use calendar::{Clock, ManualClock, SystemClock};
pub use dispatch::{DispatchGateway, MockGateway, Notice, SmtpGateway};
pub use metrics::{get_metrics, init_metrics};
pub use scheduler::{Job, JobKey, JobRunner, JobScheduler, Trigger};
pub use store::{
    ClientStore, CredentialProvider, InMemoryClientStore, InMemoryRevenueLedger, RevenueLedger,
    SmtpCredentials, StaticCredentialProvider,
};
