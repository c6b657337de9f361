use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use tracing::debug;
use warmap_shared::{ActionDefinition, EntityKind, Faction, Region, Track};

use crate::config::USER_AGENT;
use crate::error::ClientError;

/// A backend entity the client mirrors.
pub trait Entity: DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;
    /// Collection path relative to the API base URL.
    const ENDPOINT: &'static str;

    fn entity_id(&self) -> &str;
}

impl Entity for Region {
    const KIND: EntityKind = EntityKind::Region;
    const ENDPOINT: &'static str = "/regions";

    fn entity_id(&self) -> &str {
        &self.id
    }
}

impl Entity for Faction {
    const KIND: EntityKind = EntityKind::Faction;
    const ENDPOINT: &'static str = "/actors";

    fn entity_id(&self) -> &str {
        &self.id
    }
}

impl Entity for ActionDefinition {
    const KIND: EntityKind = EntityKind::ActionDefinition;
    const ENDPOINT: &'static str = "/events";

    fn entity_id(&self) -> &str {
        &self.id
    }
}

impl Entity for Track {
    const KIND: EntityKind = EntityKind::Track;
    const ENDPOINT: &'static str = "/tracks";

    fn entity_id(&self) -> &str {
        &self.id
    }
}

/// Read access to one entity collection. Every call is a fresh request.
#[async_trait]
pub trait EntitySource<T: Entity>: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<T>, ClientError>;
    async fn fetch_by_id(&self, id: &str) -> Result<T, ClientError>;
}

/// JSON-over-HTTP client for the entity API.
#[derive(Debug, Clone)]
pub struct HttpEntityClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpEntityClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(ClientError::Build)?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Collection URL, plus `id` as one percent-encoded path segment.
    fn url(&self, endpoint: &str, id: Option<&str>) -> Result<Url, ClientError> {
        let raw = format!("{}{}", self.base_url, endpoint);
        let invalid = |reason: String| ClientError::InvalidUrl {
            url: raw.clone(),
            reason,
        };
        let mut url = Url::parse(&raw).map_err(|e| invalid(e.to_string()))?;
        if let Some(id) = id {
            url.path_segments_mut()
                .map_err(|()| invalid("URL cannot carry a path".to_string()))?
                .push(id);
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ClientError> {
        debug!(%url, "GET");

        let resp = self
            .http
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        resp.json::<T>().await.map_err(|source| ClientError::Decode {
            url: url.to_string(),
            source,
        })
    }

    pub async fn get_all<T: Entity>(&self) -> Result<Vec<T>, ClientError> {
        self.get_json(self.url(T::ENDPOINT, None)?).await
    }

    pub async fn get_by_id<T: Entity>(&self, id: &str) -> Result<T, ClientError> {
        self.get_json(self.url(T::ENDPOINT, Some(id))?).await
    }

    pub async fn get_all_regions(&self) -> Result<Vec<Region>, ClientError> {
        self.get_all().await
    }

    pub async fn get_region_by_id(&self, id: &str) -> Result<Region, ClientError> {
        self.get_by_id(id).await
    }

    pub async fn get_all_actors(&self) -> Result<Vec<Faction>, ClientError> {
        self.get_all().await
    }

    pub async fn get_actor_by_id(&self, id: &str) -> Result<Faction, ClientError> {
        self.get_by_id(id).await
    }

    pub async fn get_all_events(&self) -> Result<Vec<ActionDefinition>, ClientError> {
        self.get_all().await
    }

    pub async fn get_event_by_id(&self, id: &str) -> Result<ActionDefinition, ClientError> {
        self.get_by_id(id).await
    }

    pub async fn get_all_tracks(&self) -> Result<Vec<Track>, ClientError> {
        self.get_all().await
    }

    pub async fn get_track_by_id(&self, id: &str) -> Result<Track, ClientError> {
        self.get_by_id(id).await
    }
}

#[async_trait]
impl<T: Entity> EntitySource<T> for HttpEntityClient {
    async fn fetch_all(&self) -> Result<Vec<T>, ClientError> {
        self.get_all::<T>().await
    }

    async fn fetch_by_id(&self, id: &str) -> Result<T, ClientError> {
        self.get_by_id::<T>(id).await
    }
}
