use std::fmt;

use serde::{Deserialize, Serialize};

use crate::region::EntityRef;

pub type FactionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactionType {
    Military,
    Civilian,
    Terrorist,
}

impl FactionType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Military => "military",
            Self::Civilian => "civilian",
            Self::Terrorist => "terrorist",
        }
    }
}

impl fmt::Display for FactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Faction {
    pub id: FactionId,
    pub name: String,
    #[serde(default, rename = "baseRegion")]
    pub base_region: Option<EntityRef>,
    #[serde(rename = "type")]
    pub faction_type: FactionType,
}

/// Which faction types may fill an actor slot of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorRule {
    Military,
    Civilian,
    Terrorist,
    /// Military or terrorist.
    Armored,
    /// Military or civilian.
    Legal,
    All,
    None,
}

impl ActorRule {
    pub const fn admits(self, faction_type: FactionType) -> bool {
        match self {
            Self::Military => matches!(faction_type, FactionType::Military),
            Self::Civilian => matches!(faction_type, FactionType::Civilian),
            Self::Terrorist => matches!(faction_type, FactionType::Terrorist),
            Self::Armored => matches!(faction_type, FactionType::Military | FactionType::Terrorist),
            Self::Legal => matches!(faction_type, FactionType::Military | FactionType::Civilian),
            Self::All => true,
            Self::None => false,
        }
    }
}
