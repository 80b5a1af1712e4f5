//! Minimal HTTP client for the Grove backend.
//!
//! This crate provides a focused client for the two remote stores the
//! progression engine talks to:
//! - the profile store (progression state, additive reward deltas)
//! - the relationship store (relationships, relation logs, watering)
//!
//! List endpoints decode tolerantly: a record that fails shape validation
//! is dropped with a diagnostic instead of failing the whole response.

use chrono::{DateTime, NaiveDate, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

const DEFAULT_BASE_URL: &str = "https://api.grove.app/v1";

/// Errors that can occur when using the Grove client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Auth token not configured")]
    NoAuthToken,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Grove backend API client.
#[derive(Clone)]
pub struct GroveApi {
    client: reqwest::Client,
    base_url: String,
    auth_token: String,
}

impl GroveApi {
    /// Create a new client with the given auth token against the default
    /// backend URL.
    pub fn new(auth_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("Failed to build HTTP client"),
            base_url: DEFAULT_BASE_URL.to_string(),
            auth_token: auth_token.into(),
        }
    }

    /// Create a client from the `GROVE_AUTH_TOKEN` environment variable,
    /// honoring `GROVE_API_URL` when set.
    pub fn from_env() -> Result<Self, Error> {
        let token = std::env::var("GROVE_AUTH_TOKEN").map_err(|_| Error::NoAuthToken)?;
        let mut api = Self::new(token);
        if let Ok(url) = std::env::var("GROVE_API_URL") {
            api.base_url = url;
        }
        Ok(api)
    }

    /// Override the backend base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    // ------------------------------------------------------------------
    // Profile store
    // ------------------------------------------------------------------

    /// Fetch the authenticated user's profile.
    pub async fn get_profile(&self) -> Result<ProfileRecord, Error> {
        self.get("/profile").await
    }

    /// Create a profile for the authenticated user.
    pub async fn create_profile(&self, payload: NewProfile) -> Result<ProfileRecord, Error> {
        self.post("/profile", &payload).await
    }

    /// Partially update the profile. `None` fields are left untouched.
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<ProfileRecord, Error> {
        self.patch("/profile", &update).await
    }

    /// Apply an additive reward delta to the profile.
    ///
    /// The endpoint is additive, not idempotent: retrying with the same
    /// deltas applies them again. Callers must not double-fire.
    pub async fn add_reward(&self, xp_delta: i64, coin_delta: i64) -> Result<(), Error> {
        let body = RewardDelta {
            xp_delta,
            coin_delta,
        };
        let _: serde_json::Value = self.post("/profile/rewards", &body).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Relationship store
    // ------------------------------------------------------------------

    /// List the authenticated user's relationships.
    ///
    /// Malformed records are dropped with a diagnostic.
    pub async fn list_relationships(&self) -> Result<Vec<RelationshipRecord>, Error> {
        let raw: Vec<serde_json::Value> = self.get("/relationships").await?;
        Ok(decode_tolerant(raw, "relationship"))
    }

    /// Fetch the append-only log for one relationship.
    ///
    /// Malformed records are dropped with a diagnostic.
    pub async fn get_logs(&self, relationship_id: Uuid) -> Result<Vec<RelationLogRecord>, Error> {
        let raw: Vec<serde_json::Value> = self
            .get(&format!("/relationships/{relationship_id}/logs"))
            .await?;
        Ok(decode_tolerant(raw, "relation log"))
    }

    /// Record a watering against the relationship's current tree level.
    pub async fn water(&self, relationship_id: Uuid, current_tree_level: u32) -> Result<(), Error> {
        let body = WaterRequest {
            tree_level: current_tree_level,
        };
        let _: serde_json::Value = self
            .post(&format!("/relationships/{relationship_id}/water"), &body)
            .await?;
        Ok(())
    }

    /// Append a log entry (message, plan assignment) to a relationship.
    pub async fn send_log(
        &self,
        relationship_id: Uuid,
        kind: &str,
        content: &str,
    ) -> Result<RelationLogRecord, Error> {
        let body = LogRequest {
            kind: kind.to_string(),
            content: content.to_string(),
        };
        self.post(&format!("/relationships/{relationship_id}/logs"), &body)
            .await
    }

    /// List users eligible for a new connection.
    pub async fn list_candidates(&self) -> Result<Vec<CandidateRecord>, Error> {
        let raw: Vec<serde_json::Value> = self.get("/relationships/candidates").await?;
        Ok(decode_tolerant(raw, "candidate"))
    }

    /// Create a relationship with the given partner.
    pub async fn connect(
        &self,
        partner_id: Uuid,
        kind: &str,
    ) -> Result<RelationshipRecord, Error> {
        let body = ConnectRequest {
            partner_id,
            kind: kind.to_string(),
        };
        self.post("/relationships", &body).await
    }

    // ------------------------------------------------------------------
    // Request plumbing
    // ------------------------------------------------------------------

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.auth_token))
                .map_err(|e| Error::Config(format!("Invalid auth token: {e}")))?,
        );
        Ok(headers)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .headers(self.build_headers()?)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        Self::decode(response).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, Error> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .headers(self.build_headers()?)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        Self::decode(response).await
    }

    async fn patch<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, Error> {
        let response = self
            .client
            .patch(format!("{}{path}", self.base_url))
            .headers(self.build_headers()?)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, Error> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }
        response.json().await.map_err(|e| Error::Parse(e.to_string()))
    }
}

/// Decode a list element-by-element, dropping records that fail shape
/// validation instead of failing the whole list.
fn decode_tolerant<T: DeserializeOwned>(raw: Vec<serde_json::Value>, what: &str) -> Vec<T> {
    raw.into_iter()
        .filter_map(|value| match serde_json::from_value::<T>(value) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(record = what, error = %e, "Dropping malformed record");
                None
            }
        })
        .collect()
}

// ============================================================================
// Wire types
// ============================================================================

/// A user profile as stored remotely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: Uuid,
    pub xp: u32,
    pub coins: u32,
    pub streak: u32,
    #[serde(default)]
    pub last_active_day: Option<NaiveDate>,
}

/// Payload for creating a profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProfile {
    pub display_name: String,
}

/// Partial profile update. `None` fields are not sent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xp: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coins: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streak: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_active_day: Option<NaiveDate>,
}

/// A relationship as stored remotely.
///
/// `kind` stays a plain string on the wire; the engine validates it when
/// converting to its own types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub id: Uuid,
    pub self_id: Uuid,
    pub partner_id: Uuid,
    pub kind: String,
    pub tree_level: u32,
    pub sync_rate: u8,
    pub relation_days: u32,
    pub last_activity_at: DateTime<Utc>,
}

/// One entry in a relationship's append-only log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationLogRecord {
    pub id: Uuid,
    pub relationship_id: Uuid,
    pub actor_id: Uuid,
    pub kind: String,
    #[serde(default)]
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A user eligible for a new connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub user_id: Uuid,
    pub display_name: String,
    pub level: u32,
}

#[derive(Debug, Serialize)]
struct RewardDelta {
    xp_delta: i64,
    coin_delta: i64,
}

#[derive(Debug, Serialize)]
struct WaterRequest {
    tree_level: u32,
}

#[derive(Debug, Serialize)]
struct LogRequest {
    kind: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ConnectRequest {
    partner_id: Uuid,
    kind: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let api = GroveApi::new("test-token");
        assert_eq!(api.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_client_with_base_url() {
        let api = GroveApi::new("test-token").with_base_url("http://localhost:8080/v1");
        assert_eq!(api.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn test_profile_update_skips_none_fields() {
        let update = ProfileUpdate {
            coins: Some(40),
            ..Default::default()
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json, serde_json::json!({ "coins": 40 }));
    }

    #[test]
    fn test_decode_tolerant_drops_malformed() {
        let raw = vec![
            serde_json::json!({
                "user_id": "b9b9b0fe-7fd0-4c5f-9f5c-24f62fd4b5e8",
                "display_name": "Rowan",
                "level": 3
            }),
            // Missing display_name entirely
            serde_json::json!({
                "user_id": "f3b4a1f2-6f1e-4a68-95a3-1f3f9a2cbb10",
                "level": 2
            }),
        ];

        let decoded: Vec<CandidateRecord> = decode_tolerant(raw, "candidate");
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].display_name, "Rowan");
    }

    #[test]
    fn test_relationship_record_roundtrip() {
        let json = serde_json::json!({
            "id": "3e2f8f70-88cd-4e52-93a1-5a8f3a2cb001",
            "self_id": "3e2f8f70-88cd-4e52-93a1-5a8f3a2cb002",
            "partner_id": "3e2f8f70-88cd-4e52-93a1-5a8f3a2cb003",
            "kind": "buddy",
            "tree_level": 4,
            "sync_rate": 72,
            "relation_days": 19,
            "last_activity_at": "2026-08-01T10:00:00Z"
        });

        let record: RelationshipRecord = serde_json::from_value(json).unwrap();
        assert_eq!(record.kind, "buddy");
        assert_eq!(record.tree_level, 4);
        assert_eq!(record.sync_rate, 72);
    }
}
