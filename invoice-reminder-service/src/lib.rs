//! invoice-reminder-service: monthly invoice reminders with late-fee accrual.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
