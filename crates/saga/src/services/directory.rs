//! Location directory: where the registry learns which locations exist.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::LocationId;
use domain::{Address, GridPoint, OrderLocation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{read, write};

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory request failed: {0}")]
    Transport(String),

    #[error("directory answered {status}: {message}")]
    Status { status: u16, message: String },

    #[error("directory sent an unreadable response: {0}")]
    Malformed(String),
}

/// Source of the full location list.
#[async_trait]
pub trait LocationDirectory: Send + Sync {
    async fn fetch_locations(&self) -> Result<Vec<OrderLocation>, DirectoryError>;
}

/// One entry of the directory's JSON listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub id: i64,
    pub api_url: String,
    pub address_country: String,
    pub address_city: String,
    pub grid_x: i64,
    pub grid_y: i64,
    pub name: String,
}

impl From<DirectoryEntry> for OrderLocation {
    fn from(entry: DirectoryEntry) -> Self {
        OrderLocation::new(
            LocationId::new(entry.id),
            entry.name,
            Address::new(
                entry.address_country,
                entry.address_city,
                GridPoint::new(entry.grid_x, entry.grid_y),
            ),
            entry.api_url,
        )
    }
}

/// Directory served over HTTP as a JSON array of [`DirectoryEntry`].
#[derive(Debug, Clone)]
pub struct HttpLocationDirectory {
    http: reqwest::Client,
    url: String,
}

impl HttpLocationDirectory {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl LocationDirectory for HttpLocationDirectory {
    #[tracing::instrument(skip(self), fields(url = %self.url))]
    async fn fetch_locations(&self) -> Result<Vec<OrderLocation>, DirectoryError> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DirectoryError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let entries: Vec<DirectoryEntry> = response
            .json()
            .await
            .map_err(|e| DirectoryError::Malformed(e.to_string()))?;
        Ok(entries.into_iter().map(OrderLocation::from).collect())
    }
}

#[derive(Debug, Default)]
struct InMemoryDirectoryState {
    locations: Vec<OrderLocation>,
    fail_on_fetch: bool,
    fetches: usize,
}

/// In-memory directory for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLocationDirectory {
    state: Arc<RwLock<InMemoryDirectoryState>>,
}

impl InMemoryLocationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_locations(locations: Vec<OrderLocation>) -> Self {
        let directory = Self::default();
        directory.set_locations(locations);
        directory
    }

    /// Replaces the listing returned by the next fetch.
    pub fn set_locations(&self, locations: Vec<OrderLocation>) {
        write(&self.state).locations = locations;
    }

    pub fn set_fail_on_fetch(&self, fail: bool) {
        write(&self.state).fail_on_fetch = fail;
    }

    /// Number of fetches attempted, failed ones included.
    pub fn fetch_count(&self) -> usize {
        read(&self.state).fetches
    }
}

#[async_trait]
impl LocationDirectory for InMemoryLocationDirectory {
    async fn fetch_locations(&self) -> Result<Vec<OrderLocation>, DirectoryError> {
        let mut state = write(&self.state);
        state.fetches += 1;
        if state.fail_on_fetch {
            return Err(DirectoryError::Transport("directory unavailable".to_string()));
        }
        Ok(state.locations.clone())
    }
}
