//! Best-effort display metadata lookup
//!
//! YouTube and SoundCloud both expose oEmbed endpoints that return a title
//! and thumbnail for a public link. Direct audio files carry no remote
//! metadata. Failures are reported to the caller, which falls back to a
//! generic title rather than rejecting the request.

use super::reference::MediaReference;
use async_trait::async_trait;
use rdj_common::SourceType;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = "rdj-room/0.1.0";
const YOUTUBE_OEMBED_URL: &str = "https://www.youtube.com/oembed";
const SOUNDCLOUD_OEMBED_URL: &str = "https://soundcloud.com/oembed";

/// Metadata lookup errors
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider returned {0}")]
    Status(u16),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Display metadata for a track
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub duration_ms: Option<u64>,
}

/// Metadata resolution collaborator
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    async fn resolve(&self, reference: &MediaReference) -> Result<TrackMetadata, MetadataError>;
}

/// Resolver that never knows anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullResolver;

#[async_trait]
impl MetadataResolver for NullResolver {
    async fn resolve(&self, _reference: &MediaReference) -> Result<TrackMetadata, MetadataError> {
        Ok(TrackMetadata::default())
    }
}

/// oEmbed response (only the fields we use)
#[derive(Debug, Deserialize)]
struct OEmbedResponse {
    title: Option<String>,
    thumbnail_url: Option<String>,
}

/// oEmbed client for YouTube and SoundCloud
pub struct OEmbedResolver {
    http_client: reqwest::Client,
}

impl OEmbedResolver {
    pub fn new(timeout: Duration) -> Result<Self, MetadataError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| MetadataError::Network(e.to_string()))?;
        Ok(Self { http_client })
    }

    fn endpoint(source_type: SourceType) -> Option<&'static str> {
        match source_type {
            SourceType::YouTube => Some(YOUTUBE_OEMBED_URL),
            SourceType::SoundCloud => Some(SOUNDCLOUD_OEMBED_URL),
            SourceType::DirectAudio => None,
        }
    }
}

#[async_trait]
impl MetadataResolver for OEmbedResolver {
    async fn resolve(&self, reference: &MediaReference) -> Result<TrackMetadata, MetadataError> {
        let Some(endpoint) = Self::endpoint(reference.source_type) else {
            return Ok(TrackMetadata::default());
        };

        tracing::debug!(url = %reference.media_ref, endpoint, "Querying oEmbed");

        let response = self
            .http_client
            .get(endpoint)
            .query(&[("url", reference.media_ref.as_str()), ("format", "json")])
            .send()
            .await
            .map_err(|e| MetadataError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MetadataError::Status(status.as_u16()));
        }

        let body: OEmbedResponse = response
            .json()
            .await
            .map_err(|e| MetadataError::Parse(e.to_string()))?;

        Ok(TrackMetadata {
            title: body.title.filter(|t| !t.trim().is_empty()),
            thumbnail: body.thumbnail_url,
            duration_ms: None,
        })
    }
}
