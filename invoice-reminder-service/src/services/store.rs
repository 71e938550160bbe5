//! Collaborator interfaces the engine persists through, with in-memory
//! implementations used by the binary and the tests.

use crate::error::BillingError;
use crate::models::{Client, RevenueRecord};
use async_trait::async_trait;
use dashmap::DashMap;
use secrecy::{ExposeSecret, Secret};
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn get(&self, client_id: Uuid) -> Result<Option<Client>, BillingError>;
    async fn list_all(&self) -> Result<Vec<Client>, BillingError>;
    /// Replace the whole record. Billing fields are written together or not at all.
    async fn save(&self, client: &Client) -> Result<(), BillingError>;
    /// Returns whether a record was removed.
    async fn delete(&self, client_id: Uuid) -> Result<bool, BillingError>;
}

#[async_trait]
pub trait RevenueLedger: Send + Sync {
    async fn append(&self, record: &RevenueRecord) -> Result<(), BillingError>;
    async fn records_for_owner(&self, owner_id: Uuid) -> Result<Vec<RevenueRecord>, BillingError>;
}

/// SMTP login of the user a reminder is sent on behalf of.
#[derive(Debug, Clone)]
pub struct SmtpCredentials {
    pub username: String,
    pub password: Secret<String>,
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn smtp_credentials(&self, user_id: Uuid) -> Result<SmtpCredentials, BillingError>;
}

#[derive(Debug, Default)]
pub struct InMemoryClientStore {
    clients: DashMap<Uuid, Client>,
}

impl InMemoryClientStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClientStore for InMemoryClientStore {
    async fn get(&self, client_id: Uuid) -> Result<Option<Client>, BillingError> {
        Ok(self.clients.get(&client_id).map(|entry| entry.value().clone()))
    }

    async fn list_all(&self) -> Result<Vec<Client>, BillingError> {
        let mut clients: Vec<Client> = self
            .clients
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        clients.sort_by_key(|c| (c.created_utc, c.client_id));
        Ok(clients)
    }

    async fn save(&self, client: &Client) -> Result<(), BillingError> {
        self.clients.insert(client.client_id, client.clone());
        Ok(())
    }

    async fn delete(&self, client_id: Uuid) -> Result<bool, BillingError> {
        Ok(self.clients.remove(&client_id).is_some())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRevenueLedger {
    records: RwLock<Vec<RevenueRecord>>,
}

impl InMemoryRevenueLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RevenueLedger for InMemoryRevenueLedger {
    async fn append(&self, record: &RevenueRecord) -> Result<(), BillingError> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn records_for_owner(&self, owner_id: Uuid) -> Result<Vec<RevenueRecord>, BillingError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect())
    }
}

/// Hands out one default sender login, with optional per-user overrides.
pub struct StaticCredentialProvider {
    default: SmtpCredentials,
    overrides: DashMap<Uuid, SmtpCredentials>,
}

impl StaticCredentialProvider {
    pub fn new(username: impl Into<String>, password: Secret<String>) -> Self {
        Self {
            default: SmtpCredentials {
                username: username.into(),
                password,
            },
            overrides: DashMap::new(),
        }
    }

    pub fn set_user(&self, user_id: Uuid, credentials: SmtpCredentials) {
        self.overrides.insert(user_id, credentials);
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn smtp_credentials(&self, user_id: Uuid) -> Result<SmtpCredentials, BillingError> {
        let credentials = self
            .overrides
            .get(&user_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| self.default.clone());

        if credentials.username.is_empty() || credentials.password.expose_secret().is_empty() {
            return Err(BillingError::DispatchFailure(format!(
                "no SMTP credentials configured for user {}",
                user_id
            )));
        }

        Ok(credentials)
    }
}
