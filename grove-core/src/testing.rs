//! Testing utilities for the engine.
//!
//! This module provides tools for integration testing:
//! - `MockProfileStore` / `MockRelationshipStore` for deterministic tests
//!   without a backend
//! - `TestHarness` for wiring an engine over the mocks
//! - Assertion helpers for verifying engine state

use crate::engine::{EngineConfig, SyncEngine};
use crate::ledger;
use crate::notify::ChangeNotifier;
use crate::progression::ProgressionState;
use crate::relationship::{
    Candidate, ConnectionKind, RelationLog, RelationLogKind, Relationship,
};
use crate::store::{Profile, ProfileStore, RelationshipStore, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use grove_api::ProfileUpdate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// In-memory profile store with scriptable failures.
pub struct MockProfileStore {
    profile: Mutex<Profile>,
    fail_fetch: AtomicBool,
    fail_add_reward: AtomicBool,
    reward_calls: Mutex<Vec<(i64, i64)>>,
}

impl MockProfileStore {
    pub fn new() -> Self {
        Self::with_state(ProgressionState::default())
    }

    pub fn with_state(state: ProgressionState) -> Self {
        Self {
            profile: Mutex::new(Profile {
                user_id: Uuid::new_v4(),
                state,
            }),
            fail_fetch: AtomicBool::new(false),
            fail_add_reward: AtomicBool::new(false),
            reward_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.profile.lock().unwrap().user_id
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_add_reward(&self, fail: bool) {
        self.fail_add_reward.store(fail, Ordering::SeqCst);
    }

    /// Every `(xp_delta, coin_delta)` pair received, in order.
    pub fn reward_calls(&self) -> Vec<(i64, i64)> {
        self.reward_calls.lock().unwrap().clone()
    }

    /// The state as the server currently sees it.
    pub fn server_state(&self) -> ProgressionState {
        self.profile.lock().unwrap().state.clone()
    }
}

impl Default for MockProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProfileStore for MockProfileStore {
    async fn fetch(&self) -> Result<Profile, StoreError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(StoreError::Remote("profile store offline".to_string()));
        }
        Ok(self.profile.lock().unwrap().clone())
    }

    async fn create(&self, _display_name: &str) -> Result<Profile, StoreError> {
        Ok(self.profile.lock().unwrap().clone())
    }

    async fn update(&self, update: ProfileUpdate) -> Result<Profile, StoreError> {
        let mut profile = self.profile.lock().unwrap();
        if let Some(xp) = update.xp {
            profile.state.xp = xp;
        }
        if let Some(coins) = update.coins {
            profile.state.coins = coins;
        }
        if let Some(streak) = update.streak {
            profile.state.streak = streak;
        }
        if let Some(day) = update.last_active_day {
            profile.state.last_active_day = Some(day);
        }
        profile.state.level = ledger::level_for_xp(profile.state.xp);
        Ok(profile.clone())
    }

    async fn add_reward(&self, xp_delta: i64, coin_delta: i64) -> Result<(), StoreError> {
        self.reward_calls.lock().unwrap().push((xp_delta, coin_delta));
        if self.fail_add_reward.load(Ordering::SeqCst) {
            return Err(StoreError::Remote("reward endpoint unavailable".to_string()));
        }
        let mut profile = self.profile.lock().unwrap();
        profile.state.xp = (profile.state.xp as i64 + xp_delta).max(0) as u32;
        profile.state.coins = (profile.state.coins as i64 + coin_delta).max(0) as u32;
        profile.state.level = ledger::level_for_xp(profile.state.xp);
        Ok(())
    }
}

/// In-memory relationship store with scriptable failures.
pub struct MockRelationshipStore {
    actor_id: Uuid,
    relationships: Mutex<Vec<Relationship>>,
    logs: Mutex<HashMap<Uuid, Vec<RelationLog>>>,
    candidates: Mutex<Vec<Candidate>>,
    fail_water: AtomicBool,
    fail_send_log: AtomicBool,
    water_calls: Mutex<Vec<(Uuid, u32)>>,
}

impl MockRelationshipStore {
    /// `actor_id` is who the server believes is calling; pair it with the
    /// profile store's user id.
    pub fn new(actor_id: Uuid) -> Self {
        Self {
            actor_id,
            relationships: Mutex::new(Vec::new()),
            logs: Mutex::new(HashMap::new()),
            candidates: Mutex::new(Vec::new()),
            fail_water: AtomicBool::new(false),
            fail_send_log: AtomicBool::new(false),
            water_calls: Mutex::new(Vec::new()),
        }
    }

    /// Seed an existing relationship; returns its id.
    pub fn seed_relationship(&self, kind: ConnectionKind, tree_level: u32) -> Uuid {
        let relationship = Relationship {
            id: Uuid::new_v4(),
            self_id: self.actor_id,
            partner_id: Uuid::new_v4(),
            kind,
            tree_level,
            sync_rate: 50,
            relation_days: 0,
            last_activity_at: Utc::now(),
        };
        let id = relationship.id;
        self.relationships.lock().unwrap().push(relationship);
        id
    }

    pub fn seed_candidates(&self, candidates: Vec<Candidate>) {
        *self.candidates.lock().unwrap() = candidates;
    }

    pub fn set_fail_water(&self, fail: bool) {
        self.fail_water.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_send_log(&self, fail: bool) {
        self.fail_send_log.store(fail, Ordering::SeqCst);
    }

    /// Every `(relationship_id, tree_level)` pair received, in order.
    pub fn water_calls(&self) -> Vec<(Uuid, u32)> {
        self.water_calls.lock().unwrap().clone()
    }

    /// The log list as the server currently sees it.
    pub fn server_logs(&self, relationship_id: Uuid) -> Vec<RelationLog> {
        self.logs
            .lock()
            .unwrap()
            .get(&relationship_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl RelationshipStore for MockRelationshipStore {
    async fn list(&self) -> Result<Vec<Relationship>, StoreError> {
        Ok(self.relationships.lock().unwrap().clone())
    }

    async fn logs(&self, relationship_id: Uuid) -> Result<Vec<RelationLog>, StoreError> {
        Ok(self.server_logs(relationship_id))
    }

    async fn water(
        &self,
        relationship_id: Uuid,
        current_tree_level: u32,
    ) -> Result<(), StoreError> {
        self.water_calls
            .lock()
            .unwrap()
            .push((relationship_id, current_tree_level));
        if self.fail_water.load(Ordering::SeqCst) {
            return Err(StoreError::Remote("watering failed".to_string()));
        }

        let mut relationships = self.relationships.lock().unwrap();
        let relationship = relationships
            .iter_mut()
            .find(|r| r.id == relationship_id)
            .ok_or_else(|| StoreError::Remote("relationship not found".to_string()))?;
        relationship.tree_level = current_tree_level + 1;
        relationship.last_activity_at = Utc::now();

        self.logs
            .lock()
            .unwrap()
            .entry(relationship_id)
            .or_default()
            .push(RelationLog::local(
                relationship_id,
                self.actor_id,
                RelationLogKind::Water,
                "",
            ));
        Ok(())
    }

    async fn send_log(
        &self,
        relationship_id: Uuid,
        kind: RelationLogKind,
        content: &str,
    ) -> Result<RelationLog, StoreError> {
        if self.fail_send_log.load(Ordering::SeqCst) {
            return Err(StoreError::Remote("log append failed".to_string()));
        }
        let log = RelationLog::local(relationship_id, self.actor_id, kind, content);
        self.logs
            .lock()
            .unwrap()
            .entry(relationship_id)
            .or_default()
            .push(log.clone());
        Ok(log)
    }

    async fn candidates(&self) -> Result<Vec<Candidate>, StoreError> {
        Ok(self.candidates.lock().unwrap().clone())
    }

    async fn connect(
        &self,
        partner_id: Uuid,
        kind: ConnectionKind,
    ) -> Result<Relationship, StoreError> {
        let relationship = Relationship {
            id: Uuid::new_v4(),
            self_id: self.actor_id,
            partner_id,
            kind,
            tree_level: 0,
            sync_rate: 50,
            relation_days: 0,
            last_activity_at: Utc::now(),
        };
        self.relationships.lock().unwrap().push(relationship.clone());
        Ok(relationship)
    }
}

/// Test harness wiring an engine over mock stores.
pub struct TestHarness {
    pub engine: SyncEngine,
    pub profile_store: Arc<MockProfileStore>,
    pub relationship_store: Arc<MockRelationshipStore>,
    pub notifier: ChangeNotifier,
}

impl TestHarness {
    /// Harness with default configuration; call `start` after seeding.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::new())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let profile_store = Arc::new(MockProfileStore::new());
        let relationship_store = Arc::new(MockRelationshipStore::new(profile_store.user_id()));
        let notifier = ChangeNotifier::new();
        let engine = SyncEngine::new(
            config,
            Arc::clone(&profile_store) as Arc<dyn ProfileStore>,
            Arc::clone(&relationship_store) as Arc<dyn RelationshipStore>,
            notifier.clone(),
        );
        Self {
            engine,
            profile_store,
            relationship_store,
            notifier,
        }
    }

    /// Start the session, panicking on failure.
    pub async fn start(&mut self) {
        self.engine
            .start_session()
            .await
            .expect("session should start against mock stores");
    }

    /// Seed a buddy relationship with an empty tree, before `start`.
    pub fn seed_buddy(&self) -> Uuid {
        self.relationship_store
            .seed_relationship(ConnectionKind::Buddy, 0)
    }

    pub fn user_id(&self) -> Uuid {
        self.profile_store.user_id()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert the engine's local XP total.
#[track_caller]
pub fn assert_xp(harness: &TestHarness, expected: u32) {
    let actual = harness.engine.progression().xp;
    assert_eq!(actual, expected, "Expected xp {expected}, got {actual}");
}

/// Assert the engine's local coin balance.
#[track_caller]
pub fn assert_coins(harness: &TestHarness, expected: u32) {
    let actual = harness.engine.progression().coins;
    assert_eq!(actual, expected, "Expected coins {expected}, got {actual}");
}

/// Assert the engine's cached level.
#[track_caller]
pub fn assert_level(harness: &TestHarness, expected: u32) {
    let actual = harness.engine.progression().level;
    assert_eq!(actual, expected, "Expected level {expected}, got {actual}");
}

/// Assert a relationship's cached tree level.
#[track_caller]
pub fn assert_tree_level(harness: &TestHarness, relationship_id: Uuid, expected: u32) {
    let actual = harness
        .engine
        .relationship(relationship_id)
        .map(|r| r.tree_level);
    assert_eq!(
        actual,
        Some(expected),
        "Expected tree level {expected}, got {actual:?}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_water_applies_server_side() {
        let store = MockRelationshipStore::new(Uuid::new_v4());
        let id = store.seed_relationship(ConnectionKind::Buddy, 0);

        store.water(id, 0).await.unwrap();

        let relationships = store.list().await.unwrap();
        assert_eq!(relationships[0].tree_level, 1);
        assert_eq!(store.server_logs(id).len(), 1);
        assert_eq!(store.water_calls(), vec![(id, 0)]);
    }

    #[tokio::test]
    async fn test_mock_profile_reward_deltas() {
        let store = MockProfileStore::new();
        store.add_reward(100, 20).await.unwrap();
        store.add_reward(0, -5).await.unwrap();

        let state = store.server_state();
        assert_eq!(state.xp, 100);
        assert_eq!(state.coins, 15);
        assert_eq!(state.level, 2);
    }

    #[tokio::test]
    async fn test_harness_session_start() {
        let mut harness = TestHarness::new();
        let rel_id = harness.seed_buddy();
        harness.start().await;

        assert_xp(&harness, 0);
        assert_tree_level(&harness, rel_id, 0);
    }
}
