//! Remote collection service: the authoritative side of a sync.

use std::future::Future;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::models::{
    Collection, CollectionCard, CollectionDraft, CollectionId, SyncRequest, SyncResponse,
};
use crate::util::{compact_text, is_http_url, normalize_text_option};
use crate::{Error, Result};

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;

/// Operations the authoritative collection service offers a client.
///
/// Futures are `Send` so sync rounds can run on spawned tasks.
pub trait CollectionService: Send + Sync + 'static {
    /// Compare claimed freshness against authoritative state and return the delta.
    fn bulk_sync(&self, request: &SyncRequest)
        -> impl Future<Output = Result<SyncResponse>> + Send;

    fn create_collection(
        &self,
        draft: &CollectionDraft,
    ) -> impl Future<Output = Result<Collection>> + Send;

    fn update_collection(
        &self,
        id: &CollectionId,
        draft: &CollectionDraft,
    ) -> impl Future<Output = Result<Collection>> + Send;

    fn delete_collection(&self, id: &CollectionId) -> impl Future<Output = Result<()>> + Send;

    /// Set one card entry; an amount of 0 removes it.
    fn set_card(&self, card: &CollectionCard) -> impl Future<Output = Result<Collection>> + Send;
}

/// `CollectionService` backed by the HTTP API.
#[derive(Clone)]
pub struct HttpCollectionService {
    base_url: String,
    access_token: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpCollectionService {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpCollectionService")
            .field("base_url", &self.base_url)
            .field("access_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpCollectionService {
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Result<Self> {
        Self::with_timeout(
            base_url,
            access_token,
            Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        )
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = normalize_endpoint(base_url.into())?;
        let access_token = normalize_text_option(Some(access_token.into())).ok_or_else(|| {
            Error::InvalidInput("collection service access token must not be empty".to_string())
        })?;

        Ok(Self {
            base_url,
            access_token,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&self.access_token)
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn send(&self, builder: RequestBuilder) -> Result<String> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                message: parse_api_error(status, &body),
            });
        }

        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let body = self.send(builder).await?;
        serde_json::from_str(&body).map_err(|error| {
            Error::Protocol(format!(
                "unexpected response payload ({error}): {}",
                compact_text(&body)
            ))
        })
    }
}

impl CollectionService for HttpCollectionService {
    async fn bulk_sync(&self, request: &SyncRequest) -> Result<SyncResponse> {
        tracing::debug!(
            "Sending bulk sync with {} claims to {}",
            request.collections.len(),
            self.base_url
        );
        self.send_json(
            self.request(Method::POST, "/collections/bulk-sync")
                .json(request),
        )
        .await
    }

    async fn create_collection(&self, draft: &CollectionDraft) -> Result<Collection> {
        self.send_json(self.request(Method::POST, "/collections").json(draft))
            .await
    }

    async fn update_collection(
        &self,
        id: &CollectionId,
        draft: &CollectionDraft,
    ) -> Result<Collection> {
        self.send_json(
            self.request(Method::PUT, &format!("/collections/{id}"))
                .json(draft),
        )
        .await
    }

    async fn delete_collection(&self, id: &CollectionId) -> Result<()> {
        self.send(self.request(Method::DELETE, &format!("/collections/{id}")))
            .await?;
        Ok(())
    }

    async fn set_card(&self, card: &CollectionCard) -> Result<Collection> {
        self.send_json(
            self.request(
                Method::PUT,
                &format!("/collections/{}/cards", card.collection_id),
            )
            .json(card),
        )
        .await
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.error.or(payload.message) {
            return message.trim().to_string();
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        trimmed
    }
}

fn normalize_endpoint(raw: String) -> Result<String> {
    let endpoint = normalize_text_option(Some(raw)).ok_or_else(|| {
        Error::InvalidInput("collection service URL must not be empty".to_string())
    })?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "collection service URL must include http:// or https://".to_string(),
        ))
    }
}
