use std::fmt;

use serde::{Deserialize, Serialize};

pub type RegionId = String;

/// Reference to another entity by id.
///
/// The backend sends references either as a bare id or as an embedded object;
/// only the `id` of an embedded object is kept; everything else about the
/// referenced entity comes from that entity's own store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "EntityRefRepr", into = "String")]
pub struct EntityRef(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum EntityRefRepr {
    Id(String),
    Numeric(u64),
    Embedded { id: serde_json::Value },
}

impl From<EntityRefRepr> for EntityRef {
    fn from(repr: EntityRefRepr) -> Self {
        match repr {
            EntityRefRepr::Id(id) => Self(id),
            EntityRefRepr::Numeric(id) => Self(id.to_string()),
            EntityRefRepr::Embedded { id } => match id {
                serde_json::Value::String(id) => Self(id),
                other => Self(other.to_string()),
            },
        }
    }
}

impl From<EntityRef> for String {
    fn from(reference: EntityRef) -> Self {
        reference.0
    }
}

impl EntityRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionStatus {
    War,
    Wreckage,
    Peace,
    #[default]
    #[serde(other)]
    Unknown,
}

impl RegionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::War => "war",
            Self::Wreckage => "wreckage",
            Self::Peace => "peace",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RegionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A territory on the strategic map. Mirrored from the backend, never authored locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    pub title: String,
    #[serde(default)]
    pub status: RegionStatus,
    /// Adjacency in backend order. Conventionally symmetric, not enforced.
    #[serde(default, rename = "neighbour", alias = "neighbours")]
    pub neighbours: Vec<RegionId>,
    /// Controlling faction, if any.
    #[serde(default)]
    pub faction: Option<EntityRef>,
}

impl Region {
    pub fn faction_id(&self) -> Option<&str> {
        self.faction.as_ref().map(EntityRef::id)
    }
}
