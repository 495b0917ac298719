//! Caller identity. Accounts are one record with a `kind` payload rather than a
//! type per role; all kinds authenticate through the same bearer credential.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::model::UserId;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account {0} is suspended")]
    Suspended(UserId),
    #[error("account {0} not found")]
    UnknownAccount(UserId),
    #[error("failed to read accounts: {0}")]
    Io(String),
    #[error("malformed accounts file: {0}")]
    Parse(String),
    #[error("invalid accounts: {0}")]
    Invalid(String),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    #[default]
    Active,
    Suspended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum AccountKind {
    #[serde(rename = "user", rename_all = "camelCase")]
    User { access_token: String },
    #[serde(rename = "venueOwner", rename_all = "camelCase")]
    VenueOwner {
        access_token: String,
        #[serde(default)]
        venue_ids: Vec<String>,
    },
    #[serde(rename = "developer", rename_all = "camelCase")]
    Developer { api_key: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: UserId,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub status: AccountStatus,
    #[serde(flatten)]
    pub kind: AccountKind,
}

impl Account {
    /// The bearer credential this account presents.
    pub fn credential(&self) -> &str {
        match &self.kind {
            AccountKind::User { access_token } | AccountKind::VenueOwner { access_token, .. } => {
                access_token
            }
            AccountKind::Developer { api_key } => api_key,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    pub fn deactivate(&mut self) {
        self.status = AccountStatus::Suspended;
    }
}

#[async_trait]
pub trait AccountAuth: Send + Sync {
    /// Resolve a bearer token to the account it belongs to.
    async fn authenticate(&self, token: &str) -> Result<UserId, AuthError>;
}

#[derive(Debug, Default, Deserialize)]
struct AccountsSeed {
    #[serde(default)]
    accounts: Vec<Account>,
}

#[derive(Debug, Default)]
pub struct InMemoryAccounts {
    accounts: RwLock<HashMap<UserId, Account>>,
    /// Credential → account id. Credentials never change after load.
    tokens: HashMap<String, UserId>,
}

impl InMemoryAccounts {
    pub fn new(accounts: Vec<Account>) -> Result<Self, AuthError> {
        let mut by_id = HashMap::with_capacity(accounts.len());
        let mut tokens = HashMap::with_capacity(accounts.len());
        for account in accounts {
            if account.credential().is_empty() {
                return Err(AuthError::Invalid(format!("account {} has an empty credential", account.id)));
            }
            if tokens.insert(account.credential().to_string(), account.id.clone()).is_some() {
                return Err(AuthError::Invalid(format!("account {} reuses a credential", account.id)));
            }
            if by_id.contains_key(&account.id) {
                return Err(AuthError::Invalid(format!("duplicate account {}", account.id)));
            }
            by_id.insert(account.id.clone(), account);
        }
        Ok(Self {
            accounts: RwLock::new(by_id),
            tokens,
        })
    }

    /// Load `{"accounts": [...]}` from a JSON file. `None` or a missing file yields no accounts.
    pub fn load(path: Option<&Path>) -> Result<Self, AuthError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "accounts file not found, starting empty");
                return Ok(Self::default());
            }
            Err(e) => return Err(AuthError::Io(format!("{}: {e}", path.display()))),
        };
        let seed: AccountsSeed = serde_json::from_str(&raw)
            .map_err(|e| AuthError::Parse(format!("{}: {e}", path.display())))?;
        let accounts = Self::new(seed.accounts)?;
        tracing::info!(path = %path.display(), accounts = accounts.tokens.len(), "accounts loaded");
        Ok(accounts)
    }

    pub async fn get(&self, id: &str) -> Option<Account> {
        self.accounts.read().await.get(id).cloned()
    }

    /// Suspend an account. Its credential stops authenticating immediately.
    pub async fn deactivate(&self, id: &str) -> Result<Account, AuthError> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(id)
            .ok_or_else(|| AuthError::UnknownAccount(id.to_string()))?;
        account.deactivate();
        tracing::info!(account = %id, "account deactivated");
        Ok(account.clone())
    }
}

#[async_trait]
impl AccountAuth for InMemoryAccounts {
    async fn authenticate(&self, token: &str) -> Result<UserId, AuthError> {
        let id = self.tokens.get(token).ok_or(AuthError::InvalidCredentials)?;
        let accounts = self.accounts.read().await;
        match accounts.get(id) {
            Some(account) if account.is_active() => Ok(account.id.clone()),
            Some(_) => Err(AuthError::Suspended(id.clone())),
            None => Err(AuthError::InvalidCredentials),
        }
    }
}
