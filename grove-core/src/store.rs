//! Store seams: the engine's view of its remote collaborators.
//!
//! The profile and relationship stores are black boxes behind async
//! traits, so the engine runs identically against the HTTP-backed
//! `GroveStores` and the in-memory mocks in `testing`.

use crate::ledger;
use crate::progression::ProgressionState;
use crate::relationship::{Candidate, ConnectionKind, Relationship, RelationLog, RelationLogKind};
use async_trait::async_trait;
use grove_api::{GroveApi, ProfileUpdate};
use tracing::warn;
use uuid::Uuid;

/// Failures reported by a remote store.
///
/// `Clone` so the deduplicator can hand the identical failure to every
/// coalesced caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Remote store failure: {0}")]
    Remote(String),

    #[error("Malformed remote payload: {0}")]
    Schema(String),
}

impl From<grove_api::Error> for StoreError {
    fn from(e: grove_api::Error) -> Self {
        match e {
            grove_api::Error::NoAuthToken => StoreError::NotAuthenticated,
            grove_api::Error::Api { status: 401 | 403, .. } => StoreError::NotAuthenticated,
            grove_api::Error::Parse(message) => StoreError::Schema(message),
            other => StoreError::Remote(other.to_string()),
        }
    }
}

/// The authenticated user's remote profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub user_id: Uuid,
    pub state: ProgressionState,
}

/// Remote store of the user's progression profile.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn fetch(&self) -> Result<Profile, StoreError>;

    async fn create(&self, display_name: &str) -> Result<Profile, StoreError>;

    async fn update(&self, update: ProfileUpdate) -> Result<Profile, StoreError>;

    /// Additive progression delta. Not idempotent against retries; callers
    /// must not double-fire.
    async fn add_reward(&self, xp_delta: i64, coin_delta: i64) -> Result<(), StoreError>;
}

/// Remote store of relationships and their append-only logs.
#[async_trait]
pub trait RelationshipStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Relationship>, StoreError>;

    async fn logs(&self, relationship_id: Uuid) -> Result<Vec<RelationLog>, StoreError>;

    async fn water(
        &self,
        relationship_id: Uuid,
        current_tree_level: u32,
    ) -> Result<(), StoreError>;

    async fn send_log(
        &self,
        relationship_id: Uuid,
        kind: RelationLogKind,
        content: &str,
    ) -> Result<RelationLog, StoreError>;

    async fn candidates(&self) -> Result<Vec<Candidate>, StoreError>;

    async fn connect(
        &self,
        partner_id: Uuid,
        kind: ConnectionKind,
    ) -> Result<Relationship, StoreError>;
}

/// HTTP-backed implementation of both stores over one API client.
#[derive(Clone)]
pub struct GroveStores {
    api: GroveApi,
}

impl GroveStores {
    pub fn new(api: GroveApi) -> Self {
        Self { api }
    }
}

fn profile_from_record(record: grove_api::ProfileRecord) -> Profile {
    Profile {
        user_id: record.id,
        state: ProgressionState {
            xp: record.xp,
            coins: record.coins,
            level: ledger::level_for_xp(record.xp),
            streak: record.streak.max(1),
            last_active_day: record.last_active_day,
        },
    }
}

#[async_trait]
impl ProfileStore for GroveStores {
    async fn fetch(&self) -> Result<Profile, StoreError> {
        Ok(profile_from_record(self.api.get_profile().await?))
    }

    async fn create(&self, display_name: &str) -> Result<Profile, StoreError> {
        let record = self
            .api
            .create_profile(grove_api::NewProfile {
                display_name: display_name.to_string(),
            })
            .await?;
        Ok(profile_from_record(record))
    }

    async fn update(&self, update: ProfileUpdate) -> Result<Profile, StoreError> {
        Ok(profile_from_record(self.api.update_profile(update).await?))
    }

    async fn add_reward(&self, xp_delta: i64, coin_delta: i64) -> Result<(), StoreError> {
        Ok(self.api.add_reward(xp_delta, coin_delta).await?)
    }
}

#[async_trait]
impl RelationshipStore for GroveStores {
    async fn list(&self) -> Result<Vec<Relationship>, StoreError> {
        let records = self.api.list_relationships().await?;
        Ok(records
            .into_iter()
            .filter_map(|record| match Relationship::try_from(record) {
                Ok(relationship) => Some(relationship),
                Err(e) => {
                    warn!(error = %e, "Dropping relationship with malformed fields");
                    None
                }
            })
            .collect())
    }

    async fn logs(&self, relationship_id: Uuid) -> Result<Vec<RelationLog>, StoreError> {
        let records = self.api.get_logs(relationship_id).await?;
        Ok(records
            .into_iter()
            .filter_map(|record| match RelationLog::try_from(record) {
                Ok(log) => Some(log),
                Err(e) => {
                    warn!(error = %e, "Dropping relation log with malformed fields");
                    None
                }
            })
            .collect())
    }

    async fn water(
        &self,
        relationship_id: Uuid,
        current_tree_level: u32,
    ) -> Result<(), StoreError> {
        Ok(self.api.water(relationship_id, current_tree_level).await?)
    }

    async fn send_log(
        &self,
        relationship_id: Uuid,
        kind: RelationLogKind,
        content: &str,
    ) -> Result<RelationLog, StoreError> {
        let record = self
            .api
            .send_log(relationship_id, kind.as_str(), content)
            .await?;
        RelationLog::try_from(record).map_err(StoreError::Schema)
    }

    async fn candidates(&self) -> Result<Vec<Candidate>, StoreError> {
        let records = self.api.list_candidates().await?;
        Ok(records.into_iter().map(Candidate::from).collect())
    }

    async fn connect(
        &self,
        partner_id: Uuid,
        kind: ConnectionKind,
    ) -> Result<Relationship, StoreError> {
        let record = self.api.connect(partner_id, kind.as_str()).await?;
        Relationship::try_from(record).map_err(StoreError::Schema)
    }
}
