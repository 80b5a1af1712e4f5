//! Relationship domain types: connection kinds, tree progression, the
//! append-only relation log, and the matching state machine.
//!
//! The daily watering guard lives here as a pure predicate over the cached
//! log list. It is advisory only: it is checked against client-visible
//! logs, so two sessions racing each other can still double-increment a
//! tree level. The backend receives the current tree level with each water
//! call and may reject stale writes, but the engine does not assume it
//! does.

use chrono::{DateTime, NaiveDate, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The connection type between two users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Buddy,
    Mentor,
    Mentee,
}

impl ConnectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionKind::Buddy => "buddy",
            ConnectionKind::Mentor => "mentor",
            ConnectionKind::Mentee => "mentee",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buddy" => Some(ConnectionKind::Buddy),
            "mentor" => Some(ConnectionKind::Mentor),
            "mentee" => Some(ConnectionKind::Mentee),
            _ => None,
        }
    }
}

/// Kinds of entries in a relationship's append-only log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationLogKind {
    Water,
    Note,
    Interaction,
    LevelUp,
    Sync,
}

impl RelationLogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationLogKind::Water => "water",
            RelationLogKind::Note => "note",
            RelationLogKind::Interaction => "interaction",
            RelationLogKind::LevelUp => "level_up",
            RelationLogKind::Sync => "sync",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "water" => Some(RelationLogKind::Water),
            "note" => Some(RelationLogKind::Note),
            "interaction" => Some(RelationLogKind::Interaction),
            "level_up" => Some(RelationLogKind::LevelUp),
            "sync" => Some(RelationLogKind::Sync),
            _ => None,
        }
    }
}

/// An active connection between the user and a partner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: Uuid,
    pub self_id: Uuid,
    pub partner_id: Uuid,
    pub kind: ConnectionKind,
    pub tree_level: u32,
    /// How in-step the pair is, 0-100.
    pub sync_rate: u8,
    pub relation_days: u32,
    pub last_activity_at: DateTime<Utc>,
}

impl TryFrom<grove_api::RelationshipRecord> for Relationship {
    type Error = String;

    fn try_from(record: grove_api::RelationshipRecord) -> Result<Self, Self::Error> {
        let kind = ConnectionKind::parse(&record.kind)
            .ok_or_else(|| format!("unknown connection kind: {}", record.kind))?;
        Ok(Self {
            id: record.id,
            self_id: record.self_id,
            partner_id: record.partner_id,
            kind,
            tree_level: record.tree_level,
            sync_rate: record.sync_rate.min(100),
            relation_days: record.relation_days,
            last_activity_at: record.last_activity_at,
        })
    }
}

/// One entry in a relationship's append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationLog {
    pub id: Uuid,
    pub relationship_id: Uuid,
    pub actor_id: Uuid,
    pub kind: RelationLogKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl RelationLog {
    /// A locally authored log entry, created optimistically before the
    /// remote write settles.
    pub fn local(
        relationship_id: Uuid,
        actor_id: Uuid,
        kind: RelationLogKind,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            relationship_id,
            actor_id,
            kind,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

impl TryFrom<grove_api::RelationLogRecord> for RelationLog {
    type Error = String;

    fn try_from(record: grove_api::RelationLogRecord) -> Result<Self, Self::Error> {
        let kind = RelationLogKind::parse(&record.kind)
            .ok_or_else(|| format!("unknown log kind: {}", record.kind))?;
        Ok(Self {
            id: record.id,
            relationship_id: record.relationship_id,
            actor_id: record.actor_id,
            kind,
            content: record.content,
            created_at: record.created_at,
        })
    }
}

/// The cached unit for one relationship: the relationship itself plus its
/// fetched log list. Watering mutates both together, so rollback restores
/// both together.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationSlot {
    pub relationship: Relationship,
    pub logs: Vec<RelationLog>,
}

/// Whether `actor` already has a water log on `day` in the given log list.
///
/// This is the daily idempotency guard for watering; days are compared on
/// the UTC calendar.
pub fn has_watered_on(logs: &[RelationLog], actor: Uuid, day: NaiveDate) -> bool {
    logs.iter().any(|log| {
        log.kind == RelationLogKind::Water
            && log.actor_id == actor
            && log.created_at.date_naive() == day
    })
}

/// A user eligible for a new connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub user_id: Uuid,
    pub display_name: String,
    pub level: u32,
}

impl From<grove_api::CandidateRecord> for Candidate {
    fn from(record: grove_api::CandidateRecord) -> Self {
        Self {
            user_id: record.user_id,
            display_name: record.display_name,
            level: record.level,
        }
    }
}

/// Pick an eligible counterpart: not the user, not an existing partner.
pub fn choose_candidate(
    candidates: Vec<Candidate>,
    self_id: Uuid,
    existing_partners: &[Uuid],
) -> Option<Candidate> {
    let eligible: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| c.user_id != self_id && !existing_partners.contains(&c.user_id))
        .collect();
    eligible.choose(&mut rand::thread_rng()).cloned()
}

/// Matching phases: `Unmatched -> PendingConnect -> Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchPhase {
    Unmatched,
    PendingConnect,
    Active,
}

/// Tracks the user's progress through the matching flow.
#[derive(Debug, Clone, Default)]
pub struct MatchState {
    candidate: Option<Candidate>,
    active: bool,
}

impl MatchState {
    pub fn phase(&self) -> MatchPhase {
        if self.active {
            MatchPhase::Active
        } else if self.candidate.is_some() {
            MatchPhase::PendingConnect
        } else {
            MatchPhase::Unmatched
        }
    }

    pub fn candidate(&self) -> Option<&Candidate> {
        self.candidate.as_ref()
    }

    /// A candidate was found; move to `PendingConnect`.
    pub fn propose(&mut self, candidate: Candidate) {
        self.candidate = Some(candidate);
        self.active = false;
    }

    /// The connection was created; move to `Active`.
    pub fn activate(&mut self) {
        self.candidate = None;
        self.active = true;
    }

    pub fn reset(&mut self) {
        self.candidate = None;
        self.active = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn log_at(actor: Uuid, kind: RelationLogKind, y: i32, m: u32, d: u32, h: u32) -> RelationLog {
        RelationLog {
            id: Uuid::new_v4(),
            relationship_id: Uuid::new_v4(),
            actor_id: actor,
            kind,
            content: String::new(),
            created_at: Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_connection_kind_serde() {
        let json = serde_json::to_string(&ConnectionKind::Mentor).unwrap();
        assert_eq!(json, "\"mentor\"");
        let kind: ConnectionKind = serde_json::from_str("\"buddy\"").unwrap();
        assert_eq!(kind, ConnectionKind::Buddy);
    }

    #[test]
    fn test_log_kind_parse() {
        assert_eq!(RelationLogKind::parse("level_up"), Some(RelationLogKind::LevelUp));
        assert_eq!(RelationLogKind::parse("watering"), None);
    }

    #[test]
    fn test_relationship_conversion_rejects_unknown_kind() {
        let record = grove_api::RelationshipRecord {
            id: Uuid::new_v4(),
            self_id: Uuid::new_v4(),
            partner_id: Uuid::new_v4(),
            kind: "nemesis".to_string(),
            tree_level: 1,
            sync_rate: 50,
            relation_days: 3,
            last_activity_at: Utc::now(),
        };
        assert!(Relationship::try_from(record).is_err());
    }

    #[test]
    fn test_relationship_conversion_clamps_sync_rate() {
        let record = grove_api::RelationshipRecord {
            id: Uuid::new_v4(),
            self_id: Uuid::new_v4(),
            partner_id: Uuid::new_v4(),
            kind: "buddy".to_string(),
            tree_level: 0,
            sync_rate: 250,
            relation_days: 0,
            last_activity_at: Utc::now(),
        };
        let relationship = Relationship::try_from(record).unwrap();
        assert_eq!(relationship.sync_rate, 100);
    }

    #[test]
    fn test_has_watered_on() {
        let me = Uuid::new_v4();
        let partner = Uuid::new_v4();
        let day = NaiveDate::from_ymd_opt(2026, 8, 6).unwrap();

        // Partner watered today, I sent a note today, I watered yesterday.
        let logs = vec![
            log_at(partner, RelationLogKind::Water, 2026, 8, 6, 9),
            log_at(me, RelationLogKind::Note, 2026, 8, 6, 10),
            log_at(me, RelationLogKind::Water, 2026, 8, 5, 23),
        ];
        assert!(!has_watered_on(&logs, me, day));
        assert!(has_watered_on(&logs, partner, day));

        // Now I water today.
        let mut logs = logs;
        logs.push(log_at(me, RelationLogKind::Water, 2026, 8, 6, 11));
        assert!(has_watered_on(&logs, me, day));
    }

    #[test]
    fn test_choose_candidate_excludes_self_and_partners() {
        let me = Uuid::new_v4();
        let partner = Uuid::new_v4();
        let fresh = Uuid::new_v4();

        let candidates = vec![
            Candidate { user_id: me, display_name: "Me".into(), level: 1 },
            Candidate { user_id: partner, display_name: "Partner".into(), level: 2 },
            Candidate { user_id: fresh, display_name: "Fresh".into(), level: 3 },
        ];

        let picked = choose_candidate(candidates, me, &[partner]).unwrap();
        assert_eq!(picked.user_id, fresh);
    }

    #[test]
    fn test_choose_candidate_empty_when_no_one_eligible() {
        let me = Uuid::new_v4();
        let candidates = vec![Candidate {
            user_id: me,
            display_name: "Me".into(),
            level: 1,
        }];
        assert!(choose_candidate(candidates, me, &[]).is_none());
    }

    #[test]
    fn test_match_state_transitions() {
        let mut state = MatchState::default();
        assert_eq!(state.phase(), MatchPhase::Unmatched);

        state.propose(Candidate {
            user_id: Uuid::new_v4(),
            display_name: "Rowan".into(),
            level: 2,
        });
        assert_eq!(state.phase(), MatchPhase::PendingConnect);

        state.activate();
        assert_eq!(state.phase(), MatchPhase::Active);
        assert!(state.candidate().is_none());

        state.reset();
        assert_eq!(state.phase(), MatchPhase::Unmatched);
    }
}
