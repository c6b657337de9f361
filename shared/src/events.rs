use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Message kinds pushed by the backend's event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    RegionCreated,
    RegionUpdated,
    RegionDeleted,
    TrackCreated,
    TrackUpdated,
    TrackStopped,
    EventCreated,
    EventUpdated,
    EventDeleted,
}

impl StreamKind {
    pub const ALL: [Self; 9] = [
        Self::RegionCreated,
        Self::RegionUpdated,
        Self::RegionDeleted,
        Self::TrackCreated,
        Self::TrackUpdated,
        Self::TrackStopped,
        Self::EventCreated,
        Self::EventUpdated,
        Self::EventDeleted,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RegionCreated => "region_created",
            Self::RegionUpdated => "region_updated",
            Self::RegionDeleted => "region_deleted",
            Self::TrackCreated => "track_created",
            Self::TrackUpdated => "track_updated",
            Self::TrackStopped => "track_stopped",
            Self::EventCreated => "event_created",
            Self::EventUpdated => "event_updated",
            Self::EventDeleted => "event_deleted",
        }
    }

    pub const fn entity(self) -> EntityKind {
        match self {
            Self::RegionCreated | Self::RegionUpdated | Self::RegionDeleted => EntityKind::Region,
            Self::TrackCreated | Self::TrackUpdated | Self::TrackStopped => EntityKind::Track,
            Self::EventCreated | Self::EventUpdated | Self::EventDeleted => {
                EntityKind::ActionDefinition
            }
        }
    }

    pub const fn change(self) -> ChangeType {
        match self {
            Self::RegionCreated | Self::TrackCreated | Self::EventCreated => ChangeType::Created,
            Self::RegionUpdated | Self::TrackUpdated | Self::EventUpdated => ChangeType::Updated,
            Self::RegionDeleted | Self::TrackStopped | Self::EventDeleted => ChangeType::Deleted,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStreamKind(pub String);

impl fmt::Display for UnknownStreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown stream message kind `{}`", self.0)
    }
}

impl std::error::Error for UnknownStreamKind {}

impl FromStr for StreamKind {
    type Err = UnknownStreamKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| UnknownStreamKind(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Region,
    Faction,
    Track,
    ActionDefinition,
}

impl EntityKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Region => "region",
            Self::Faction => "faction",
            Self::Track => "track",
            Self::ActionDefinition => "action_definition",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
    Created,
    Updated,
    Deleted,
}

/// "Entity X changed". The only thing a stream payload is trusted for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityChange {
    pub entity: EntityKind,
    pub id: String,
    pub change: ChangeType,
}

impl EntityChange {
    /// Extracts the changed entity's id from a stream payload.
    ///
    /// Accepts `{"id": ..}` directly or nested one level under `data`, with a
    /// string or numeric id. Returns `None` when no id can be found.
    pub fn from_payload(kind: StreamKind, payload: &serde_json::Value) -> Option<Self> {
        let id = payload
            .get("id")
            .or_else(|| payload.get("data").and_then(|data| data.get("id")))?;
        let id = match id {
            serde_json::Value::String(id) if !id.is_empty() => id.clone(),
            serde_json::Value::Number(id) => id.to_string(),
            _ => return None,
        };

        Some(Self {
            entity: kind.entity(),
            id,
            change: kind.change(),
        })
    }
}
