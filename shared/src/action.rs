use std::fmt;

use serde::{Deserialize, Serialize};

use crate::faction::{ActorRule, FactionType};
use crate::region::EntityRef;

pub type ActionId = String;
pub type TrackId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Capture,
    Peace,
    War,
    Wreckage,
    Trade,
    Diplomacy,
    Espionage,
}

impl ActionType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Capture => "capture",
            Self::Peace => "peace",
            Self::War => "war",
            Self::Wreckage => "wreckage",
            Self::Trade => "trade",
            Self::Diplomacy => "diplomacy",
            Self::Espionage => "espionage",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role the targeted territory plays in an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TerritoryRule {
    #[serde(rename = "initiator")]
    Initiator,
    #[serde(rename = "victim")]
    Victim,
    #[serde(rename = "both")]
    Both,
    #[default]
    #[serde(rename = "EMPTY", alias = "empty")]
    Empty,
    #[serde(rename = "WRECKAGE", alias = "wreckage")]
    Wreckage,
}

/// Catalog entry describing an action. Static reference data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub id: ActionId,
    #[serde(rename = "actionType")]
    pub action_type: ActionType,
    #[serde(default)]
    pub title: String,
    /// One rule per actor slot; actors past the last rule reuse it.
    #[serde(default, rename = "actorRule")]
    pub actor_rules: Vec<ActorRule>,
    #[serde(default, rename = "territoryRule")]
    pub territory_rule: TerritoryRule,
}

impl ActionDefinition {
    /// Whether the given participants may perform this action, slot by slot.
    ///
    /// A slot without a participant is only acceptable when its rule is
    /// [`ActorRule::None`]. An empty rule list places no constraint.
    pub fn admits(&self, participants: &[FactionType]) -> bool {
        let Some(last_rule) = self.actor_rules.last().copied() else {
            return true;
        };

        let slots = participants.len().max(self.actor_rules.len());
        (0..slots).all(|slot| {
            let rule = self.actor_rules.get(slot).copied().unwrap_or(last_rule);
            match participants.get(slot) {
                Some(faction_type) => rule.admits(*faction_type),
                None => rule == ActorRule::None,
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackStatus {
    #[serde(rename = "resolve", alias = "resolved")]
    Resolved,
    #[serde(rename = "reject", alias = "rejected")]
    Rejected,
}

/// An in-progress instance of an action. Created, mutated and removed by the server only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    #[serde(rename = "eventId")]
    pub action_id: ActionId,
    #[serde(default)]
    pub actors: Vec<EntityRef>,
    /// Region the action is applied to.
    #[serde(rename = "territory")]
    pub target: EntityRef,
    /// Region the action is launched from.
    #[serde(rename = "affectorTerritory")]
    pub source: EntityRef,
    /// Remaining time budget as last reported by the server. Display only.
    #[serde(default, rename = "timeout")]
    pub timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TrackStatus>,
}

impl Track {
    pub const fn is_active(&self) -> bool {
        self.status.is_none()
    }

    pub fn targets(&self, region_id: &str) -> bool {
        self.target.id() == region_id
    }
}

/// Active tracks aimed at `region_id`, in store order.
pub fn tracks_targeting<'a>(
    tracks: &'a [Track],
    region_id: &str,
) -> impl Iterator<Item = &'a Track> {
    tracks
        .iter()
        .filter(move |track| track.is_active() && track.targets(region_id))
}
