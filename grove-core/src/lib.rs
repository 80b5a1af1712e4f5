//! Local progression & synchronization engine for the Grove app.
//!
//! This crate provides:
//! - XP/coin/level progression with transient reward events and one-shot
//!   level-up detection
//! - Optimistic relationship mutations (tree watering, messages) with
//!   rollback against a remote authoritative store
//! - Fixed-window rate limiting and in-flight request deduplication in
//!   front of externally triggered calls
//! - Session snapshot persistence as a last-resort rehydration source
//!
//! # Quick Start
//!
//! ```ignore
//! use grove_core::{ChangeNotifier, EngineConfig, GroveStores, SyncEngine};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let stores = Arc::new(GroveStores::new(grove_api::GroveApi::from_env()?));
//!
//!     let mut engine = SyncEngine::new(
//!         EngineConfig::new().with_snapshot_path("progression.json"),
//!         stores.clone(),
//!         stores,
//!         ChangeNotifier::new(),
//!     );
//!     engine.start_session().await?;
//!
//!     engine.add_xp(25, "Lesson completed")?;
//!     if let Some(level_up) = engine.level_up() {
//!         println!("Level {} -> {}!", level_up.old_level, level_up.new_level);
//!         engine.dismiss_level_up();
//!     }
//!     Ok(())
//! }
//! ```

pub mod coordinator;
pub mod dedup;
pub mod engine;
pub mod ledger;
pub mod limiter;
pub mod notify;
pub mod persist;
pub mod progression;
pub mod relationship;
pub mod store;
pub mod testing;

// Primary public API
pub use engine::{EngineConfig, EngineError, SyncEngine};
pub use limiter::{ActionClass, RateLimiter, RateLimiters};
pub use notify::{ChangeEvent, ChangeNotifier};
pub use progression::{
    LevelUpState, ProgressionState, RewardEvent, RewardKind, XpGain,
};
pub use relationship::{
    Candidate, ConnectionKind, MatchPhase, RelationLog, RelationLogKind, Relationship,
};
pub use store::{GroveStores, Profile, ProfileStore, RelationshipStore, StoreError};
pub use testing::{MockProfileStore, MockRelationshipStore, TestHarness};
