//! SyncEngine - the primary public API for progression and relationship
//! state.
//!
//! This module provides the session-scoped facade over the whole engine:
//! local progression with best-effort remote reconciliation, optimistic
//! relationship mutations with rollback, rate limiting and request
//! deduplication in front of externally triggered calls, and snapshot
//! persistence across sessions.
//!
//! One engine instance is constructed at session start and torn down by
//! `sign_out`. All state mutation happens on one logical owner; awaiting a
//! remote call suspends only that call site.

use crate::coordinator::{MutationError, OptimisticCoordinator};
use crate::dedup::Deduplicator;
use crate::ledger;
use crate::limiter::{ActionClass, RateLimiters};
use crate::notify::{ChangeEvent, ChangeNotifier};
use crate::persist;
use crate::progression::{
    LevelUpState, ProgressionState, ProgressionTracker, RewardEvent, XpGain, DEFAULT_REWARD_TTL,
};
use crate::relationship::{
    choose_candidate, has_watered_on, Candidate, ConnectionKind, MatchPhase, MatchState,
    RelationLog, RelationLogKind, RelationSlot, Relationship,
};
use crate::store::{Profile, ProfileStore, RelationshipStore, StoreError};
use chrono::Utc;
use grove_api::ProfileUpdate;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Errors from engine operations.
///
/// `Clone` because coalesced callers sharing one deduplicated request all
/// receive the same failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Rate limited, try again in {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("Tree already watered today")]
    AlreadyWatered,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Remote store failure: {0}")]
    Remote(String),

    #[error("Malformed remote payload: {0}")]
    Schema(String),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotAuthenticated => EngineError::NotAuthenticated,
            StoreError::Remote(message) => EngineError::Remote(message),
            StoreError::Schema(message) => EngineError::Schema(message),
        }
    }
}

/// Configuration for creating an engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a reward event stays in the queue.
    pub reward_ttl: Duration,

    /// Where to persist the last-resort progression snapshot.
    pub snapshot_path: Option<PathBuf>,

    /// Budget for AI-query actions: (max requests, window).
    pub ai_query_limit: (u32, Duration),

    /// Budget for social-post actions.
    pub social_post_limit: (u32, Duration),

    /// Budget for generic writes (watering, connecting).
    pub generic_write_limit: (u32, Duration),
}

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            reward_ttl: DEFAULT_REWARD_TTL,
            snapshot_path: None,
            ai_query_limit: (10, Duration::from_secs(60)),
            social_post_limit: (5, Duration::from_secs(60)),
            generic_write_limit: (30, Duration::from_secs(60)),
        }
    }

    pub fn with_reward_ttl(mut self, ttl: Duration) -> Self {
        self.reward_ttl = ttl;
        self
    }

    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    pub fn with_ai_query_limit(mut self, max_requests: u32, window: Duration) -> Self {
        self.ai_query_limit = (max_requests, window);
        self
    }

    pub fn with_social_post_limit(mut self, max_requests: u32, window: Duration) -> Self {
        self.social_post_limit = (max_requests, window);
        self
    }

    pub fn with_generic_write_limit(mut self, max_requests: u32, window: Duration) -> Self {
        self.generic_write_limit = (max_requests, window);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// The progression & synchronization engine for one authenticated session.
pub struct SyncEngine {
    config: EngineConfig,
    profile_store: Arc<dyn ProfileStore>,
    relationship_store: Arc<dyn RelationshipStore>,
    notifier: ChangeNotifier,
    limiters: RateLimiters,
    progression: ProgressionTracker,
    progression_stale: bool,
    relations: OptimisticCoordinator<Uuid, RelationSlot>,
    match_state: MatchState,
    profile_dedup: Deduplicator<Profile, StoreError>,
    relations_dedup: Deduplicator<Vec<Relationship>, StoreError>,
    logs_dedup: Deduplicator<Vec<RelationLog>, StoreError>,
    user_id: Option<Uuid>,
}

impl SyncEngine {
    /// Create an engine over the given stores. No remote calls are made
    /// until `start_session`.
    pub fn new(
        config: EngineConfig,
        profile_store: Arc<dyn ProfileStore>,
        relationship_store: Arc<dyn RelationshipStore>,
        notifier: ChangeNotifier,
    ) -> Self {
        let limiters = RateLimiters::new(
            config.ai_query_limit,
            config.social_post_limit,
            config.generic_write_limit,
        );
        let progression = ProgressionTracker::new(config.reward_ttl);
        Self {
            config,
            profile_store,
            relationship_store,
            notifier,
            limiters,
            progression,
            progression_stale: false,
            relations: OptimisticCoordinator::new(),
            match_state: MatchState::default(),
            profile_dedup: Deduplicator::new(),
            relations_dedup: Deduplicator::new(),
            logs_dedup: Deduplicator::new(),
            user_id: None,
        }
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Rehydrate state from the remote store, falling back to the local
    /// snapshot when the remote read fails for reasons other than auth.
    pub async fn start_session(&mut self) -> Result<(), EngineError> {
        let profile = match self.fetch_profile_deduped().await {
            Ok(profile) => profile,
            Err(StoreError::NotAuthenticated) => return Err(EngineError::NotAuthenticated),
            Err(e) => {
                let Some(path) = self.config.snapshot_path.clone() else {
                    return Err(e.into());
                };
                match persist::load_snapshot(&path).await {
                    Ok(snapshot) => {
                        warn!(error = %e, "Remote profile fetch failed; using local snapshot");
                        Profile {
                            user_id: snapshot.user_id,
                            state: snapshot.state,
                        }
                    }
                    Err(snapshot_err) => {
                        warn!(error = %snapshot_err, "Snapshot fallback unavailable");
                        return Err(e.into());
                    }
                }
            }
        };

        self.progression.hydrate(profile.state);
        self.progression_stale = false;
        self.user_id = Some(profile.user_id);

        let relationships = self.list_relationships_deduped().await?;
        for relationship in relationships {
            let logs = match self.fetch_logs_deduped(relationship.id).await {
                Ok(logs) => logs,
                Err(e) => {
                    warn!(relationship_id = %relationship.id, error = %e,
                        "Log fetch failed; starting with an empty log list");
                    Vec::new()
                }
            };
            self.relations.prime(relationship.id, RelationSlot { relationship, logs });
        }
        if !self.relations.is_empty() {
            self.match_state.activate();
        }

        info!(user_id = %profile.user_id, relationships = self.relations.len(),
            "Session started");
        Ok(())
    }

    /// Persist the last-resort snapshot, then discard all engine state:
    /// caches, limiter tables, dedup tables, and reward timers.
    pub async fn sign_out(&mut self) {
        if let (Some(user_id), Some(path)) = (self.user_id, self.config.snapshot_path.clone()) {
            if let Err(e) = persist::save_snapshot(&path, user_id, self.progression.state()).await {
                warn!(error = %e, "Failed to write progression snapshot");
            }
        }

        self.progression.clear();
        self.relations.clear();
        self.limiters.clear_all();
        self.profile_dedup.clear();
        self.relations_dedup.clear();
        self.logs_dedup.clear();
        self.match_state.reset();
        self.progression_stale = false;
        self.user_id = None;
        info!("Session state discarded");
    }

    fn require_session(&self) -> Result<Uuid, EngineError> {
        self.user_id.ok_or(EngineError::NotAuthenticated)
    }

    // ------------------------------------------------------------------
    // Progression
    // ------------------------------------------------------------------

    /// Grant XP. The local increment is authoritative for display; the
    /// remote reconciliation call runs in the background and its failure
    /// is logged, never rolled back.
    pub fn add_xp(&mut self, amount: u32, reason: &str) -> Result<XpGain, EngineError> {
        self.require_session()?;
        let gain = self.progression.add_xp(amount, reason);
        self.spawn_reward_sync(amount as i64, 0);
        self.notifier.publish(ChangeEvent::Progression);
        Ok(gain)
    }

    /// Grant coins. Same reconciliation policy as `add_xp`.
    pub fn add_coins(&mut self, amount: u32, reason: &str) -> Result<u32, EngineError> {
        self.require_session()?;
        let balance = self.progression.add_coins(amount, reason);
        self.spawn_reward_sync(0, amount as i64);
        self.notifier.publish(ChangeEvent::Progression);
        Ok(balance)
    }

    /// Spend coins against the latest local balance. Returns false (with
    /// no state change and no remote call) when the balance is too low.
    pub fn spend_coins(&mut self, amount: u32) -> Result<bool, EngineError> {
        self.require_session()?;
        if !self.progression.spend_coins(amount) {
            return Ok(false);
        }
        self.spawn_reward_sync(0, -(amount as i64));
        self.notifier.publish(ChangeEvent::Progression);
        Ok(true)
    }

    /// Grant a named reward from the ledger table: XP and coins together,
    /// reconciled by a single background call.
    pub fn add_reward(&mut self, key: &str) -> Result<XpGain, EngineError> {
        self.require_session()?;
        let reward = ledger::lookup_reward(key)
            .ok_or_else(|| EngineError::Validation(format!("unknown reward key: {key}")))?;

        let gain = self.progression.add_xp(reward.xp, reward.reason);
        if reward.coins > 0 {
            self.progression.add_coins(reward.coins, reward.reason);
        }
        self.spawn_reward_sync(reward.xp as i64, reward.coins as i64);
        self.notifier.publish(ChangeEvent::Progression);
        Ok(gain)
    }

    /// Record today's check-in for streak maintenance. Grants the streak
    /// milestone reward every seventh consecutive day.
    pub fn record_check_in(&mut self) -> Result<bool, EngineError> {
        self.require_session()?;
        let today = Utc::now().date_naive();
        let advanced = self.progression.record_check_in(today);

        if advanced && self.progression.state().streak % 7 == 0 {
            self.add_reward("streak_milestone")?;
        }

        let update = ProfileUpdate {
            streak: Some(self.progression.state().streak),
            last_active_day: Some(today),
            ..Default::default()
        };
        let store = Arc::clone(&self.profile_store);
        tokio::spawn(async move {
            if let Err(e) = store.update(update).await {
                warn!(error = %e, "Streak sync failed; keeping local value");
            }
        });

        self.notifier.publish(ChangeEvent::Progression);
        Ok(advanced)
    }

    /// Clear the pending level-up transition. Idempotent.
    pub fn dismiss_level_up(&mut self) {
        self.progression.dismiss_level_up();
    }

    /// Re-fetch the authoritative profile and replace local progression.
    pub async fn refresh_progression(&mut self) -> Result<(), EngineError> {
        let profile = self.fetch_profile_deduped().await?;
        self.progression.hydrate(profile.state);
        self.progression_stale = false;
        Ok(())
    }

    fn spawn_reward_sync(&self, xp_delta: i64, coin_delta: i64) {
        let store = Arc::clone(&self.profile_store);
        tokio::spawn(async move {
            if let Err(e) = store.add_reward(xp_delta, coin_delta).await {
                warn!(error = %e, xp_delta, coin_delta,
                    "Reward sync failed; local value stands");
            }
        });
    }

    // ------------------------------------------------------------------
    // Relationships
    // ------------------------------------------------------------------

    /// Pick an eligible counterpart: not the user, not an existing
    /// partner. Moves the matching flow to `PendingConnect`.
    pub async fn find_candidate(&mut self) -> Result<Candidate, EngineError> {
        let user = self.require_session()?;
        let candidates = self.relationship_store.candidates().await?;
        let partners: Vec<Uuid> = self
            .relations
            .values()
            .iter()
            .map(|slot| slot.relationship.partner_id)
            .collect();

        let candidate = choose_candidate(candidates, user, &partners)
            .ok_or_else(|| EngineError::Validation("no eligible candidates".to_string()))?;
        self.match_state.propose(candidate.clone());
        Ok(candidate)
    }

    /// Create a relationship with the chosen partner and activate the
    /// matching flow. The new tree starts at level 0.
    pub async fn connect(
        &mut self,
        partner_id: Uuid,
        kind: ConnectionKind,
    ) -> Result<Relationship, EngineError> {
        let user = self.require_session()?;
        if partner_id == user {
            return Err(EngineError::Validation("cannot connect to yourself".to_string()));
        }
        let already = self
            .relations
            .values()
            .iter()
            .any(|slot| slot.relationship.partner_id == partner_id);
        if already {
            return Err(EngineError::Validation("already connected to this user".to_string()));
        }

        let key = format!("connect:{user}");
        if !self.limiters.generic_write.check(&key) {
            return Err(EngineError::RateLimited {
                retry_after: self.limiters.generic_write.reset_time(&key),
            });
        }

        let relationship = self.relationship_store.connect(partner_id, kind).await?;
        self.relations.prime(
            relationship.id,
            RelationSlot {
                relationship: relationship.clone(),
                logs: Vec::new(),
            },
        );
        self.match_state.activate();
        self.notifier.publish(ChangeEvent::Relationships);
        Ok(relationship)
    }

    /// Water the relationship's tree: optimistic `tree_level + 1` plus a
    /// local water log, confirmed remotely, rolled back on failure.
    ///
    /// Rejected without a remote call when the actor already watered today
    /// (advisory client-side guard) or when the rate budget is exhausted.
    pub async fn water_tree(&mut self, relationship_id: Uuid) -> Result<u32, EngineError> {
        let user = self.require_session()?;

        let key = format!("water:{user}");
        if !self.limiters.generic_write.check(&key) {
            return Err(EngineError::RateLimited {
                retry_after: self.limiters.generic_write.reset_time(&key),
            });
        }

        let slot = self
            .relations
            .get(&relationship_id)
            .ok_or_else(|| EngineError::Validation("unknown relationship".to_string()))?;

        // Guard against the latest cached logs, synchronously, immediately
        // before the optimistic apply.
        let today = Utc::now().date_naive();
        if has_watered_on(&slot.logs, user, today) {
            return Err(EngineError::AlreadyWatered);
        }

        let current_level = slot.relationship.tree_level;
        let store = Arc::clone(&self.relationship_store);
        let commit = async move { store.water(relationship_id, current_level).await };

        let result = self
            .relations
            .mutate(
                &relationship_id,
                |slot| {
                    let mut next = slot.clone();
                    next.relationship.tree_level += 1;
                    next.relationship.last_activity_at = Utc::now();
                    next.logs.push(RelationLog::local(
                        relationship_id,
                        user,
                        RelationLogKind::Water,
                        "",
                    ));
                    next
                },
                commit,
            )
            .await;

        match result {
            Ok(()) => {
                self.notifier.publish(ChangeEvent::RelationLogs(relationship_id));
                if let Err(e) = self.refresh_relationship(relationship_id).await {
                    warn!(relationship_id = %relationship_id, error = %e,
                        "Reconcile fetch failed; optimistic value stands until next refresh");
                }
                let tree_level = self
                    .relations
                    .get(&relationship_id)
                    .map(|slot| slot.relationship.tree_level)
                    .unwrap_or(current_level + 1);
                Ok(tree_level)
            }
            Err(MutationError::MissingKey) => {
                Err(EngineError::Validation("unknown relationship".to_string()))
            }
            Err(MutationError::Commit(e)) => Err(e.into()),
        }
    }

    /// Send a message to the partner: an append-only `note` log.
    pub async fn send_message(
        &mut self,
        relationship_id: Uuid,
        content: impl Into<String>,
    ) -> Result<(), EngineError> {
        self.append_log(relationship_id, RelationLogKind::Note, content.into())
            .await
    }

    /// Assign a study plan to the partner: an append-only `interaction`
    /// log.
    pub async fn assign_plan(
        &mut self,
        relationship_id: Uuid,
        content: impl Into<String>,
    ) -> Result<(), EngineError> {
        self.append_log(relationship_id, RelationLogKind::Interaction, content.into())
            .await
    }

    /// Append-only log write through the coordinator. No idempotency
    /// guard: duplicate entries are harmless.
    async fn append_log(
        &mut self,
        relationship_id: Uuid,
        kind: RelationLogKind,
        content: String,
    ) -> Result<(), EngineError> {
        let user = self.require_session()?;

        let key = format!("log:{user}");
        if !self.limiters.social_post.check(&key) {
            return Err(EngineError::RateLimited {
                retry_after: self.limiters.social_post.reset_time(&key),
            });
        }

        if self.relations.get(&relationship_id).is_none() {
            return Err(EngineError::Validation("unknown relationship".to_string()));
        }

        let store = Arc::clone(&self.relationship_store);
        let commit_content = content.clone();
        let commit = async move {
            store
                .send_log(relationship_id, kind, &commit_content)
                .await
                .map(|_| ())
        };

        let result = self
            .relations
            .mutate(
                &relationship_id,
                |slot| {
                    let mut next = slot.clone();
                    next.logs
                        .push(RelationLog::local(relationship_id, user, kind, content));
                    next.relationship.last_activity_at = Utc::now();
                    next
                },
                commit,
            )
            .await;

        match result {
            Ok(()) => {
                self.notifier.publish(ChangeEvent::RelationLogs(relationship_id));
                Ok(())
            }
            Err(MutationError::MissingKey) => {
                Err(EngineError::Validation("unknown relationship".to_string()))
            }
            Err(MutationError::Commit(e)) => Err(e.into()),
        }
    }

    /// Replace a relationship's cached slot with freshly fetched
    /// authoritative state.
    pub async fn refresh_relationship(&mut self, relationship_id: Uuid) -> Result<(), EngineError> {
        let logs = self.fetch_logs_deduped(relationship_id).await?;
        let list = self.list_relationships_deduped().await?;

        match list.into_iter().find(|r| r.id == relationship_id) {
            Some(relationship) => {
                self.relations
                    .replace(&relationship_id, RelationSlot { relationship, logs });
            }
            None => {
                debug!(relationship_id = %relationship_id,
                    "Relationship absent from authoritative list");
                self.relations.invalidate(&relationship_id);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn progression(&self) -> &ProgressionState {
        self.progression.state()
    }

    pub fn is_progression_stale(&self) -> bool {
        self.progression_stale
    }

    /// Progress through the current level, 0-100.
    pub fn level_progress_percent(&self) -> f32 {
        let state = self.progression.state();
        ledger::level_progress_percent(state.xp, state.level)
    }

    pub fn level_up(&self) -> Option<LevelUpState> {
        self.progression.level_up()
    }

    pub fn reward_events(&self) -> Vec<RewardEvent> {
        self.progression.rewards().events()
    }

    pub fn match_phase(&self) -> MatchPhase {
        self.match_state.phase()
    }

    pub fn relationships(&self) -> Vec<Relationship> {
        self.relations
            .values()
            .into_iter()
            .map(|slot| slot.relationship)
            .collect()
    }

    pub fn relationship(&self, relationship_id: Uuid) -> Option<Relationship> {
        self.relations
            .get(&relationship_id)
            .map(|slot| slot.relationship)
    }

    pub fn relationship_logs(&self, relationship_id: Uuid) -> Option<Vec<RelationLog>> {
        self.relations.get(&relationship_id).map(|slot| slot.logs)
    }

    // ------------------------------------------------------------------
    // Rate limiter passthrough
    // ------------------------------------------------------------------

    pub fn rate_check(&self, class: ActionClass, key: &str) -> bool {
        self.limiters.for_class(class).check(key)
    }

    pub fn rate_remaining(&self, class: ActionClass, key: &str) -> u32 {
        self.limiters.for_class(class).remaining(key)
    }

    pub fn rate_reset_time(&self, class: ActionClass, key: &str) -> Duration {
        self.limiters.for_class(class).reset_time(key)
    }

    pub fn rate_reset(&self, class: ActionClass, key: &str) {
        self.limiters.for_class(class).reset(key)
    }

    // ------------------------------------------------------------------
    // Change propagation
    // ------------------------------------------------------------------

    pub fn subscribe_changes(&self) -> tokio::sync::broadcast::Receiver<ChangeEvent> {
        self.notifier.subscribe()
    }

    /// Reconcile a change broadcast by another engine instance: mark the
    /// affected cache stale so the next read refetches.
    pub fn handle_change(&mut self, event: ChangeEvent) {
        match event {
            ChangeEvent::Progression => {
                self.progression_stale = true;
            }
            ChangeEvent::Relationships => {
                for key in self.relations.keys() {
                    self.relations.invalidate(&key);
                }
            }
            ChangeEvent::RelationLogs(relationship_id) => {
                self.relations.invalidate(&relationship_id);
            }
        }
    }

    pub fn is_relationship_stale(&self, relationship_id: Uuid) -> bool {
        self.relations.is_stale(&relationship_id)
    }

    // ------------------------------------------------------------------
    // Deduplicated store reads
    // ------------------------------------------------------------------

    async fn fetch_profile_deduped(&self) -> Result<Profile, StoreError> {
        let store = Arc::clone(&self.profile_store);
        self.profile_dedup
            .execute("profile:fetch", move || async move { store.fetch().await })
            .await
    }

    async fn list_relationships_deduped(&self) -> Result<Vec<Relationship>, StoreError> {
        let store = Arc::clone(&self.relationship_store);
        self.relations_dedup
            .execute("relationships:list", move || async move { store.list().await })
            .await
    }

    async fn fetch_logs_deduped(
        &self,
        relationship_id: Uuid,
    ) -> Result<Vec<RelationLog>, StoreError> {
        let store = Arc::clone(&self.relationship_store);
        self.logs_dedup
            .execute(&format!("logs:{relationship_id}"), move || async move {
                store.logs(relationship_id).await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_builder() {
        let config = EngineConfig::new()
            .with_reward_ttl(Duration::from_millis(500))
            .with_generic_write_limit(3, Duration::from_secs(10))
            .with_snapshot_path("/tmp/grove.json");

        assert_eq!(config.reward_ttl, Duration::from_millis(500));
        assert_eq!(config.generic_write_limit, (3, Duration::from_secs(10)));
        assert!(config.snapshot_path.is_some());
        // Untouched budgets keep their defaults.
        assert_eq!(config.ai_query_limit.0, 10);
    }

    #[test]
    fn test_store_error_mapping() {
        let e: EngineError = StoreError::Remote("503".to_string()).into();
        assert!(matches!(e, EngineError::Remote(_)));

        let e: EngineError = StoreError::NotAuthenticated.into();
        assert!(matches!(e, EngineError::NotAuthenticated));
    }
}
