//! Object-storage admin boundary.
//!
//! Suspension disables the tenant's storage user and resume re-enables it.
//! The tenant user is the second `-`-separated segment of the namespace
//! name (`ns-alice` → `alice`).

use std::collections::HashSet;
use std::future::Future;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::ObjectStorageConfig;

#[derive(Debug, thiserror::Error)]
pub enum ObjectStorageError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("admin API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("incomplete object storage config: {0}")]
    Config(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Enabled,
    Disabled,
}

/// Storage user for a tenant namespace, if the name has an owner segment.
pub fn storage_user(namespace: &str) -> Option<&str> {
    namespace.split('-').nth(1).filter(|s| !s.is_empty())
}

pub trait ObjectStorageAdmin: Send + Sync {
    fn list_users(&self) -> impl Future<Output = Result<HashSet<String>, ObjectStorageError>> + Send;

    fn set_user_status(
        &self,
        user: &str,
        status: UserStatus,
    ) -> impl Future<Output = Result<(), ObjectStorageError>> + Send;
}

/// HTTP client for the storage admin API.
pub struct HttpObjectStorageAdmin {
    client: Client,
    endpoint: Url,
    access_key: String,
    secret_key: SecretString,
}

#[derive(Debug, Deserialize)]
struct ListUsersResponse {
    #[serde(default)]
    users: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SetStatusRequest {
    status: UserStatus,
}

impl HttpObjectStorageAdmin {
    pub fn new(
        endpoint: &str,
        access_key: String,
        secret_key: SecretString,
    ) -> Result<Self, ObjectStorageError> {
        let mut endpoint = Url::parse(endpoint)
            .map_err(|e| ObjectStorageError::Config(format!("invalid endpoint {}: {}", endpoint, e)))?;
        // Url::join replaces the last segment unless the base ends with '/'
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        Ok(Self {
            client: Client::new(),
            endpoint,
            access_key,
            secret_key,
        })
    }

    fn url(&self, path: &str) -> Result<Url, ObjectStorageError> {
        self.endpoint
            .join(path)
            .map_err(|e| ObjectStorageError::Config(format!("invalid admin path {}: {}", path, e)))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ObjectStorageError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ObjectStorageError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

impl ObjectStorageAdmin for HttpObjectStorageAdmin {
    async fn list_users(&self) -> Result<HashSet<String>, ObjectStorageError> {
        let url = self.url("admin/v1/users")?;
        let response = self
            .client
            .get(url)
            .basic_auth(&self.access_key, Some(self.secret_key.expose_secret()))
            .send()
            .await?;

        let body: ListUsersResponse = Self::check(response).await?.json().await?;
        Ok(body.users.into_iter().collect())
    }

    async fn set_user_status(&self, user: &str, status: UserStatus) -> Result<(), ObjectStorageError> {
        let url = self.url(&format!("admin/v1/users/{}/status", user))?;
        debug!(user, ?status, "setting object storage user status");
        let response = self
            .client
            .put(url)
            .basic_auth(&self.access_key, Some(self.secret_key.expose_secret()))
            .json(&SetStatusRequest { status })
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }
}

/// Object-storage client selected from config.
pub enum ObjectStorageClients {
    Http(HttpObjectStorageAdmin),
    /// No admin endpoint configured; every call is a no-op.
    Disabled,
}

impl ObjectStorageClients {
    pub fn from_config(config: &ObjectStorageConfig) -> Result<Self, ObjectStorageError> {
        let Some(endpoint) = config.endpoint.clone().filter(|e| !e.is_empty()) else {
            return Ok(Self::Disabled);
        };
        let access_key = config
            .access_key
            .clone()
            .ok_or_else(|| ObjectStorageError::Config("access_key is missing".to_string()))?;
        let secret_key = config
            .secret_key_secret()
            .ok_or_else(|| ObjectStorageError::Config("secret_key is missing".to_string()))?;
        Ok(Self::Http(HttpObjectStorageAdmin::new(
            &endpoint, access_key, secret_key,
        )?))
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

impl ObjectStorageAdmin for ObjectStorageClients {
    async fn list_users(&self) -> Result<HashSet<String>, ObjectStorageError> {
        match self {
            Self::Http(c) => c.list_users().await,
            Self::Disabled => Ok(HashSet::new()),
        }
    }

    async fn set_user_status(&self, user: &str, status: UserStatus) -> Result<(), ObjectStorageError> {
        match self {
            Self::Http(c) => c.set_user_status(user, status).await,
            Self::Disabled => Ok(()),
        }
    }
}
