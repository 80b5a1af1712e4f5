//! Progression ledger: pure experience/level math and the named reward table.
//!
//! Everything in this module is total and side-effect-free. Level is always
//! derived from XP via `level_for_xp`; stored level values are display
//! caches, never a source of truth.
//!
//! The curve is quadratic: `level = floor(sqrt(xp / 100)) + 1`, so 0 XP is
//! level 1, 100 XP is level 2, 400 XP is level 3.

use std::collections::HashMap;

/// Amounts granted by a named reward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardSpec {
    pub xp: u32,
    pub coins: u32,
    pub reason: &'static str,
}

lazy_static::lazy_static! {
    /// Named rewards granted for app activities.
    static ref REWARD_TABLE: HashMap<&'static str, RewardSpec> = {
        let mut table = HashMap::new();
        table.insert("daily_check_in", RewardSpec { xp: 10, coins: 5, reason: "Daily check-in" });
        table.insert("lesson_complete", RewardSpec { xp: 25, coins: 10, reason: "Lesson completed" });
        table.insert("quiz_perfect", RewardSpec { xp: 50, coins: 20, reason: "Perfect quiz score" });
        table.insert("post_published", RewardSpec { xp: 15, coins: 5, reason: "Post published" });
        table.insert("tree_watered", RewardSpec { xp: 20, coins: 5, reason: "Buddy tree watered" });
        table.insert("streak_milestone", RewardSpec { xp: 100, coins: 50, reason: "Streak milestone" });
        table
    };
}

/// Compute the level for a given XP total.
///
/// Monotonically non-decreasing in `xp`; minimum level is 1.
pub fn level_for_xp(xp: u32) -> u32 {
    (xp as f64 / 100.0).sqrt().floor() as u32 + 1
}

/// The XP total at which `level` begins.
///
/// Inverse of `level_for_xp`: `level_for_xp(xp_threshold_for_level(n)) == n`.
/// Levels below 1 are treated as level 1 (threshold 0).
pub fn xp_threshold_for_level(level: u32) -> u32 {
    let level = level.max(1);
    (level - 1) * (level - 1) * 100
}

/// Progress through `level` as a percentage in `[0, 100]`.
///
/// `xp` values outside the level's band clamp to the boundary rather than
/// escaping the range.
pub fn level_progress_percent(xp: u32, level: u32) -> f32 {
    let floor = xp_threshold_for_level(level);
    let ceiling = xp_threshold_for_level(level + 1);
    if ceiling <= floor {
        return 0.0;
    }
    let xp = xp.clamp(floor, ceiling);
    ((xp - floor) as f32 / (ceiling - floor) as f32 * 100.0).clamp(0.0, 100.0)
}

/// Whether adding `delta` XP to `current_xp` crosses at least one level
/// boundary.
pub fn would_cross_level(current_xp: u32, delta: u32) -> bool {
    level_for_xp(current_xp.saturating_add(delta)) > level_for_xp(current_xp)
}

/// Look up the amounts for a named reward.
pub fn lookup_reward(key: &str) -> Option<&'static RewardSpec> {
    REWARD_TABLE.get(key)
}
