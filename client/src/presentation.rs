use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::warn;
use warmap_shared::colors::{
    NEUTRAL, NEUTRAL_BORDER, action_color, brighten, faction_color, hex_css, status_color,
};
use warmap_shared::{
    ActionDefinition, ActionType, Faction, FactionType, Region, RegionStatus, Rgb, Track,
    tracks_targeting,
};

use crate::error::ClientError;
use crate::store::EntityStore;

const HIGHLIGHT_FACTOR: f64 = 1.25;
pub const LOOKUP_MISS_MARKER: &str = "<action unavailable>";

/// Resolves a track's action definition.
#[async_trait]
pub trait ActionLookup: Send + Sync {
    async fn action_definition(&self, id: &str) -> Result<ActionDefinition, ClientError>;

    /// Changes whenever any definition this lookup can return may have changed.
    fn revision(&self) -> u64;
}

#[async_trait]
impl ActionLookup for EntityStore<ActionDefinition> {
    async fn action_definition(&self, id: &str) -> Result<ActionDefinition, ClientError> {
        self.get_cached(id).await
    }

    fn revision(&self) -> u64 {
        EntityStore::revision(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionColor {
    pub background: String,
    pub border: String,
    pub highlight: String,
}

/// Related state a region is presented against.
#[derive(Debug, Clone, Copy)]
pub struct PresentationContext<'a> {
    pub factions: &'a [Faction],
    pub tracks: &'a [Track],
}

impl<'a> PresentationContext<'a> {
    pub fn faction(&self, id: &str) -> Option<&'a Faction> {
        self.factions.iter().find(|faction| faction.id == id)
    }

    pub fn controlling_faction(&self, region: &Region) -> Option<&'a Faction> {
        region.faction_id().and_then(|id| self.faction(id))
    }

    /// The first active track aimed at the region.
    fn targeting_track(&self, region: &Region) -> Option<&'a Track> {
        tracks_targeting(self.tracks, &region.id).next()
    }

    fn participant_names(&self, track: &Track) -> Vec<String> {
        track
            .actors
            .iter()
            .map(|actor| {
                self.faction(actor.id())
                    .map(|faction| faction.name.clone())
                    .unwrap_or_else(|| actor.id().to_string())
            })
            .collect()
    }

    fn participant_types(&self, track: &Track) -> Vec<FactionType> {
        track
            .actors
            .iter()
            .filter_map(|actor| self.faction(actor.id()))
            .map(|faction| faction.faction_type)
            .collect()
    }
}

/// Background: action > faction type > status > neutral.
/// Border: controlling faction's type, else neutral.
pub fn derive_color(
    status: RegionStatus,
    faction_type: Option<FactionType>,
    action_type: Option<ActionType>,
) -> RegionColor {
    let background: Rgb = action_type
        .map(action_color)
        .or_else(|| faction_type.map(faction_color))
        .or_else(|| status_color(status))
        .unwrap_or(NEUTRAL);
    let border = faction_type.map(faction_color).unwrap_or(NEUTRAL_BORDER);

    RegionColor {
        background: hex_css(background),
        border: hex_css(border),
        highlight: hex_css(brighten(background, HIGHLIGHT_FACTOR)),
    }
}

/// Tooltip lines for a region, with the targeting action appended when present.
pub fn derive_title(
    region: &Region,
    faction: Option<&Faction>,
    action: Option<(Option<&ActionDefinition>, &[String])>,
) -> String {
    let mut lines = vec![
        region.title.clone(),
        format!("Status: {}", region.status),
        format!(
            "Faction: {}",
            faction.map(|f| f.name.as_str()).unwrap_or("none")
        ),
    ];

    if let Some((definition, participants)) = action {
        match definition {
            Some(definition) => lines.push(format!("Action: {}", definition.title)),
            None => lines.push(format!("Action: {LOOKUP_MISS_MARKER}")),
        }
        if !participants.is_empty() {
            lines.push(format!("Participants: {}", participants.join(", ")));
        }
    }

    lines.join("\n")
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ColorKey {
    status: RegionStatus,
    faction_type: Option<FactionType>,
    /// Action id and the lookup revision it was resolved at.
    action: Option<(String, u64)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TitleKey {
    title: String,
    status: RegionStatus,
    faction_name: Option<String>,
    track_id: Option<String>,
    action: Option<(String, u64)>,
    participants: Vec<String>,
}

#[derive(Debug, Clone)]
struct Cached<K, V> {
    key: K,
    value: V,
    computed_at: Instant,
}

/// Derives region colors and tooltips, memoized per region for a bounded TTL.
///
/// An entry is served only while its key matches the current inputs and it is
/// younger than the TTL; otherwise it is recomputed. The key covers the region,
/// its controlling faction, the targeting track and the action lookup's
/// revision, so a changed action definition is never served. One entry per
/// region id.
pub struct PresentationMapper {
    actions: Arc<dyn ActionLookup>,
    ttl: Duration,
    colors: DashMap<String, Cached<ColorKey, RegionColor>>,
    titles: DashMap<String, Cached<TitleKey, String>>,
}

impl PresentationMapper {
    pub fn new(actions: Arc<dyn ActionLookup>, ttl: Duration) -> Self {
        Self {
            actions,
            ttl,
            colors: DashMap::new(),
            titles: DashMap::new(),
        }
    }

    fn action_key(&self, track: Option<&Track>) -> Option<(String, u64)> {
        track.map(|t| (t.action_id.clone(), self.actions.revision()))
    }

    fn fresh<K: PartialEq + Clone, V: Clone>(
        &self,
        cache: &DashMap<String, Cached<K, V>>,
        region_id: &str,
        key: &K,
    ) -> Option<V> {
        let entry = cache.get(region_id)?;
        (entry.key == *key && entry.computed_at.elapsed() < self.ttl).then(|| entry.value.clone())
    }

    /// Action definition for a track, or `None` after logging the miss.
    pub async fn track_action(&self, track: &Track) -> Option<ActionDefinition> {
        match self.actions.action_definition(&track.action_id).await {
            Ok(definition) => Some(definition),
            Err(e) => {
                warn!(
                    track = %track.id,
                    action = %track.action_id,
                    error = %e,
                    "action lookup failed; using placeholder"
                );
                None
            }
        }
    }

    pub async fn region_color(&self, region: &Region, ctx: PresentationContext<'_>) -> RegionColor {
        let faction_type = ctx.controlling_faction(region).map(|f| f.faction_type);
        let track = ctx.targeting_track(region);
        let key = ColorKey {
            status: region.status,
            faction_type,
            action: self.action_key(track),
        };
        if let Some(color) = self.fresh(&self.colors, &region.id, &key) {
            return color;
        }

        let action_type = match track {
            Some(track) => self.track_action(track).await.map(|d| d.action_type),
            None => None,
        };
        let color = derive_color(region.status, faction_type, action_type);

        self.colors.insert(
            region.id.clone(),
            Cached {
                key,
                value: color.clone(),
                computed_at: Instant::now(),
            },
        );
        color
    }

    pub async fn region_title(&self, region: &Region, ctx: PresentationContext<'_>) -> String {
        let faction = ctx.controlling_faction(region);
        let track = ctx.targeting_track(region);
        let participants = track
            .map(|t| ctx.participant_names(t))
            .unwrap_or_default();
        let key = TitleKey {
            title: region.title.clone(),
            status: region.status,
            faction_name: faction.map(|f| f.name.clone()),
            track_id: track.map(|t| t.id.clone()),
            action: self.action_key(track),
            participants: participants.clone(),
        };
        if let Some(title) = self.fresh(&self.titles, &region.id, &key) {
            return title;
        }

        let title = match track {
            Some(track) => {
                let definition = self.track_action(track).await;
                if let Some(definition) = &definition
                    && !definition.admits(&ctx.participant_types(track))
                {
                    warn!(
                        track = %track.id,
                        action = %definition.id,
                        "track participants do not satisfy the action's actor rule"
                    );
                }
                derive_title(region, faction, Some((definition.as_ref(), participants.as_slice())))
            }
            None => derive_title(region, faction, None),
        };

        self.titles.insert(
            region.id.clone(),
            Cached {
                key,
                value: title.clone(),
                computed_at: Instant::now(),
            },
        );
        title
    }
}
