//! Local progression state: XP, coins, streak, transient reward events and
//! one-shot level-up detection.
//!
//! Gains are additive and commutative, so concurrent `add_xp`/`add_coins`
//! interleavings always reach the same total. `spend_coins` is the one
//! guarded, non-commutative operation: its balance check and decrement
//! happen in a single synchronous step against the latest local state.

use crate::ledger;
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Default lifetime of a reward event in the queue.
pub const DEFAULT_REWARD_TTL: Duration = Duration::from_millis(3000);

/// The user's progression counters.
///
/// `level` is a display cache; it is recomputed from `xp` on every change
/// and on rehydration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressionState {
    pub xp: u32,
    pub coins: u32,
    pub level: u32,
    pub streak: u32,
    #[serde(default)]
    pub last_active_day: Option<NaiveDate>,
}

impl Default for ProgressionState {
    fn default() -> Self {
        Self {
            xp: 0,
            coins: 0,
            level: 1,
            streak: 1,
            last_active_day: None,
        }
    }
}

/// What kind of gain a reward event represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardKind {
    Xp,
    Coin,
}

/// A transient notification for one progression gain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardEvent {
    pub id: Uuid,
    pub amount: u32,
    pub kind: RewardKind,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// An upward level transition awaiting explicit dismissal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelUpState {
    pub old_level: u32,
    pub new_level: u32,
}

/// Queue of transient reward events with per-event eviction timers.
///
/// Each pushed event schedules its own one-shot removal after the TTL.
/// Timer handles are retained so teardown aborts them; a timer must never
/// fire against a queue that no longer exists.
#[derive(Debug)]
pub struct RewardQueue {
    events: Arc<Mutex<Vec<RewardEvent>>>,
    ttl: Duration,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

impl RewardQueue {
    pub fn new(ttl: Duration) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            ttl,
            timers: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue an event and schedule its eviction.
    ///
    /// Must be called from within a tokio runtime.
    pub fn push(&self, amount: u32, kind: RewardKind, reason: &str) -> Uuid {
        let event = RewardEvent {
            id: Uuid::new_v4(),
            amount,
            kind,
            reason: reason.to_string(),
            created_at: Utc::now(),
        };
        let id = event.id;
        self.events.lock().unwrap().push(event);

        let events = Arc::clone(&self.events);
        let ttl = self.ttl;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            events.lock().unwrap().retain(|e| e.id != id);
        });

        let mut timers = self.timers.lock().unwrap();
        timers.retain(|t| !t.is_finished());
        timers.push(handle);

        id
    }

    /// Events currently alive in the queue.
    pub fn events(&self) -> Vec<RewardEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().unwrap().is_empty()
    }

    /// Drop all events and cancel their eviction timers.
    pub fn clear(&self) {
        let mut timers = self.timers.lock().unwrap();
        for timer in timers.drain(..) {
            timer.abort();
        }
        self.events.lock().unwrap().clear();
    }
}

impl Drop for RewardQueue {
    fn drop(&mut self) {
        let timers = self.timers.lock().unwrap();
        for timer in timers.iter() {
            timer.abort();
        }
    }
}

/// Outcome of one XP gain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XpGain {
    pub new_xp: u32,
    pub new_level: u32,
    pub leveled_up: bool,
}

/// Owns the local progression state, the reward queue, and the pending
/// level-up transition.
#[derive(Debug)]
pub struct ProgressionTracker {
    state: ProgressionState,
    level_up: Option<LevelUpState>,
    rewards: RewardQueue,
}

impl ProgressionTracker {
    pub fn new(reward_ttl: Duration) -> Self {
        Self {
            state: ProgressionState::default(),
            level_up: None,
            rewards: RewardQueue::new(reward_ttl),
        }
    }

    /// Replace the state from a remote or snapshot source.
    ///
    /// The stored level is ignored; it is recomputed from XP.
    pub fn hydrate(&mut self, mut state: ProgressionState) {
        state.level = ledger::level_for_xp(state.xp);
        state.streak = state.streak.max(1);
        self.state = state;
    }

    pub fn state(&self) -> &ProgressionState {
        &self.state
    }

    pub fn rewards(&self) -> &RewardQueue {
        &self.rewards
    }

    pub fn level_up(&self) -> Option<LevelUpState> {
        self.level_up
    }

    /// Apply an XP gain: bump the total, recompute the level, detect an
    /// upward crossing, and enqueue the transient reward event.
    pub fn add_xp(&mut self, amount: u32, reason: &str) -> XpGain {
        let old_level = self.state.level;
        self.state.xp = self.state.xp.saturating_add(amount);
        let new_level = ledger::level_for_xp(self.state.xp);
        let leveled_up = new_level > old_level;
        if leveled_up {
            self.level_up = Some(LevelUpState {
                old_level,
                new_level,
            });
        }
        self.state.level = new_level;
        self.rewards.push(amount, RewardKind::Xp, reason);

        XpGain {
            new_xp: self.state.xp,
            new_level,
            leveled_up,
        }
    }

    /// Apply a coin gain.
    pub fn add_coins(&mut self, amount: u32, reason: &str) -> u32 {
        self.state.coins = self.state.coins.saturating_add(amount);
        self.rewards.push(amount, RewardKind::Coin, reason);
        self.state.coins
    }

    /// Spend coins against the latest local balance.
    ///
    /// The guard and the decrement are one synchronous step; returns false
    /// and leaves the balance untouched when the balance is insufficient.
    pub fn spend_coins(&mut self, amount: u32) -> bool {
        if amount > self.state.coins {
            return false;
        }
        self.state.coins -= amount;
        true
    }

    /// Clear the pending level-up transition. Idempotent.
    pub fn dismiss_level_up(&mut self) {
        self.level_up = None;
    }

    /// Record a daily check-in for streak maintenance.
    ///
    /// Consecutive days extend the streak, a gap resets it to 1, and a
    /// repeat on the same day changes nothing. Returns whether the streak
    /// advanced.
    pub fn record_check_in(&mut self, today: NaiveDate) -> bool {
        let advanced = match self.state.last_active_day {
            Some(day) if day == today => return false,
            Some(day) if day.checked_add_days(Days::new(1)) == Some(today) => {
                self.state.streak += 1;
                true
            }
            _ => {
                self.state.streak = 1;
                false
            }
        };
        self.state.last_active_day = Some(today);
        advanced
    }

    /// Tear down transient state (reward timers included).
    pub fn clear(&mut self) {
        self.rewards.clear();
        self.level_up = None;
        self.state = ProgressionState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_add_xp_accumulates_and_levels() {
        let mut tracker = ProgressionTracker::new(DEFAULT_REWARD_TTL);

        let gain = tracker.add_xp(50, "lesson");
        assert_eq!(gain.new_xp, 50);
        assert_eq!(gain.new_level, 1);
        assert!(!gain.leveled_up);

        let gain = tracker.add_xp(50, "lesson");
        assert_eq!(gain.new_xp, 100);
        assert_eq!(gain.new_level, 2);
        assert!(gain.leveled_up);
        assert_eq!(
            tracker.level_up(),
            Some(LevelUpState {
                old_level: 1,
                new_level: 2
            })
        );
    }

    #[tokio::test]
    async fn test_add_xp_is_commutative() {
        let amounts = [30u32, 70, 110, 45, 200, 45];

        let mut forward = ProgressionTracker::new(DEFAULT_REWARD_TTL);
        for a in amounts {
            forward.add_xp(a, "x");
        }

        let mut backward = ProgressionTracker::new(DEFAULT_REWARD_TTL);
        for a in amounts.iter().rev() {
            backward.add_xp(*a, "x");
        }

        let total: u32 = amounts.iter().sum();
        assert_eq!(forward.state().xp, total);
        assert_eq!(backward.state().xp, total);
        assert_eq!(forward.state().level, backward.state().level);
    }

    #[tokio::test]
    async fn test_spend_coins_guard() {
        let mut tracker = ProgressionTracker::new(DEFAULT_REWARD_TTL);

        assert!(!tracker.spend_coins(10));
        assert_eq!(tracker.state().coins, 0);

        tracker.add_coins(25, "quiz");
        assert!(tracker.spend_coins(10));
        assert_eq!(tracker.state().coins, 15);

        assert!(!tracker.spend_coins(16));
        assert_eq!(tracker.state().coins, 15);
    }

    #[tokio::test]
    async fn test_dismiss_level_up_is_idempotent() {
        let mut tracker = ProgressionTracker::new(DEFAULT_REWARD_TTL);
        tracker.add_xp(100, "x");
        assert!(tracker.level_up().is_some());

        tracker.dismiss_level_up();
        assert!(tracker.level_up().is_none());
        tracker.dismiss_level_up();
        assert!(tracker.level_up().is_none());
    }

    #[tokio::test]
    async fn test_hydrate_recomputes_level_from_xp() {
        let mut tracker = ProgressionTracker::new(DEFAULT_REWARD_TTL);
        tracker.hydrate(ProgressionState {
            xp: 450,
            coins: 12,
            level: 99, // stored level is never trusted
            streak: 4,
            last_active_day: None,
        });

        assert_eq!(tracker.state().level, 3);
        assert_eq!(tracker.state().coins, 12);
    }

    #[tokio::test]
    async fn test_reward_event_evicted_within_ttl() {
        let mut tracker = ProgressionTracker::new(Duration::from_millis(30));
        tracker.add_xp(10, "x");
        assert_eq!(tracker.rewards().len(), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(tracker.rewards().is_empty());
    }

    #[tokio::test]
    async fn test_reward_events_evict_independently() {
        let queue = RewardQueue::new(Duration::from_millis(80));
        queue.push(1, RewardKind::Xp, "first");
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.push(2, RewardKind::Coin, "second");

        tokio::time::sleep(Duration::from_millis(50)).await;
        let remaining = queue.events();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].reason, "second");
    }

    #[tokio::test]
    async fn test_clear_cancels_eviction_timers() {
        let queue = RewardQueue::new(Duration::from_millis(20));
        queue.push(1, RewardKind::Xp, "x");
        queue.clear();
        assert!(queue.is_empty());

        // Nothing fires late against the cleared queue.
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_streak_check_in() {
        let mut tracker = ProgressionTracker::new(DEFAULT_REWARD_TTL);
        assert_eq!(tracker.state().streak, 1);

        // First check-in establishes the baseline.
        assert!(!tracker.record_check_in(day(2026, 8, 1)));
        assert_eq!(tracker.state().streak, 1);

        // Consecutive day advances.
        assert!(tracker.record_check_in(day(2026, 8, 2)));
        assert_eq!(tracker.state().streak, 2);

        // Same-day repeat is a no-op.
        assert!(!tracker.record_check_in(day(2026, 8, 2)));
        assert_eq!(tracker.state().streak, 2);

        // A gap resets to 1.
        assert!(!tracker.record_check_in(day(2026, 8, 5)));
        assert_eq!(tracker.state().streak, 1);
    }
}
