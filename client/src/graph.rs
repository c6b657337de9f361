use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;
use warmap_shared::colors::{ADJACENCY_EDGE, NEUTRAL, action_color, hex_css};
use warmap_shared::{Faction, Region, Track};

use crate::config::GraphConfig;
use crate::presentation::{PresentationContext, PresentationMapper, RegionColor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Unordered pair of node ids; the smaller one always comes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(NodeId, NodeId);

impl EdgeId {
    pub fn new(a: NodeId, b: NodeId) -> Self {
        if a <= b { Self(a, b) } else { Self(b, a) }
    }

    pub fn nodes(self) -> (NodeId, NodeId) {
        (self.0, self.1)
    }
}

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.0.0, self.1.0)
    }
}

/// Region id to node id, assigned on first sight and never reassigned.
#[derive(Debug, Default)]
pub struct NodeIdRegistry {
    by_region: HashMap<String, NodeId>,
    regions: Vec<String>,
}

impl NodeIdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id_for(&mut self, region_id: &str) -> NodeId {
        if let Some(id) = self.by_region.get(region_id) {
            return *id;
        }
        let id = NodeId(self.regions.len() as u32 + 1);
        self.by_region.insert(region_id.to_string(), id);
        self.regions.push(region_id.to_string());
        id
    }

    pub fn get(&self, region_id: &str) -> Option<NodeId> {
        self.by_region.get(region_id).copied()
    }

    pub fn region_of(&self, id: NodeId) -> Option<&str> {
        let index = (id.0 as usize).checked_sub(1)?;
        self.regions.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub id: NodeId,
    pub region_id: String,
    pub label: String,
    pub color: RegionColor,
    pub title: String,
    /// Pinned coordinates. Only set once the layout has been pinned.
    pub fixed: Option<Position>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    pub id: EdgeId,
    pub from: NodeId,
    pub to: NodeId,
    pub arrow: bool,
    pub color: String,
    /// Track driving a directed overlay.
    pub track_id: Option<String>,
}

impl GraphEdge {
    fn adjacency(id: EdgeId) -> Self {
        let (from, to) = id.nodes();
        Self {
            id,
            from,
            to,
            arrow: false,
            color: hex_css(ADJACENCY_EDGE),
            track_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    pub nodes: BTreeMap<NodeId, GraphNode>,
    pub edges: BTreeMap<EdgeId, GraphEdge>,
}

impl Graph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    pub fn edge_between(&self, a: NodeId, b: NodeId) -> Option<&GraphEdge> {
        self.edges.get(&EdgeId::new(a, b))
    }
}

/// Title, followed by the controlling faction's name when annotating and the
/// faction is known.
fn node_label(region: &Region, ctx: PresentationContext<'_>, config: &GraphConfig) -> String {
    match ctx.controlling_faction(region) {
        Some(faction) if config.annotate_labels => {
            format!("{}\n({})", region.title, faction.name)
        }
        _ => region.title.clone(),
    }
}

/// Builds the target graph for the current snapshots.
///
/// One node per region, one undirected edge per adjacent pair, and each active
/// track turns its pair's edge into a directed arrow colored by its action.
/// Derivation failures for one region or track degrade to neutral output and
/// never abort the build.
pub async fn build_graph(
    regions: &[Region],
    factions: &[Faction],
    tracks: &[Track],
    mapper: &PresentationMapper,
    registry: &mut NodeIdRegistry,
    config: &GraphConfig,
) -> Graph {
    let ctx = PresentationContext { factions, tracks };
    let present: HashMap<&str, NodeId> = regions
        .iter()
        .map(|region| (region.id.as_str(), registry.id_for(&region.id)))
        .collect();

    let mut graph = Graph::default();
    for region in regions {
        let id = present[region.id.as_str()];
        let node = GraphNode {
            id,
            region_id: region.id.clone(),
            label: node_label(region, ctx, config),
            color: mapper.region_color(region, ctx).await,
            title: mapper.region_title(region, ctx).await,
            fixed: None,
        };
        graph.nodes.insert(id, node);
    }

    for region in regions {
        let from = present[region.id.as_str()];
        for neighbour in &region.neighbours {
            if *neighbour == region.id {
                continue;
            }
            let Some(&to) = present.get(neighbour.as_str()) else {
                debug!(region = %region.id, %neighbour, "neighbour not in snapshot; no edge");
                continue;
            };
            let id = EdgeId::new(from, to);
            graph
                .edges
                .entry(id)
                .or_insert_with(|| GraphEdge::adjacency(id));
        }
    }

    let mut overlaid = HashSet::new();
    for track in tracks.iter().filter(|track| track.is_active()) {
        let (Some(&from), Some(&to)) = (
            present.get(track.source.id()),
            present.get(track.target.id()),
        ) else {
            debug!(track = %track.id, "track endpoint not in snapshot; no overlay");
            continue;
        };
        if from == to {
            continue;
        }
        let id = EdgeId::new(from, to);
        if !overlaid.insert(id) {
            continue;
        }

        let color = mapper
            .track_action(track)
            .await
            .map(|definition| action_color(definition.action_type))
            .unwrap_or(NEUTRAL);
        graph.edges.insert(
            id,
            GraphEdge {
                id,
                from,
                to,
                arrow: true,
                color: hex_css(color),
                track_id: Some(track.id.clone()),
            },
        );
    }

    graph
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use warmap_shared::{ActionDefinition, ActionType, EntityRef, FactionType, RegionStatus};

    use super::*;
    use crate::error::ClientError;
    use crate::presentation::ActionLookup;
    use crate::test_support::{action, faction, region, track};

    struct Actions(HashMap<String, ActionDefinition>);

    #[async_trait]
    impl ActionLookup for Actions {
        async fn action_definition(&self, id: &str) -> Result<ActionDefinition, ClientError> {
            self.0.get(id).cloned().ok_or_else(|| ClientError::Status {
                url: format!("/events/{id}"),
                status: 404,
            })
        }

        fn revision(&self) -> u64 {
            0
        }
    }

    fn mapper() -> PresentationMapper {
        let mut definitions = HashMap::new();
        definitions.insert("war".to_string(), action("war", ActionType::War, "Border war"));
        PresentationMapper::new(Arc::new(Actions(definitions)), Duration::from_secs(5))
    }

    async fn build(regions: &[Region], factions: &[Faction], tracks: &[Track]) -> Graph {
        let mut registry = NodeIdRegistry::new();
        build_graph(
            regions,
            factions,
            tracks,
            &mapper(),
            &mut registry,
            &GraphConfig::default(),
        )
        .await
    }

    #[test]
    fn edge_id_is_order_independent() {
        assert_eq!(EdgeId::new(NodeId(3), NodeId(1)), EdgeId::new(NodeId(1), NodeId(3)));
        assert_eq!(EdgeId::new(NodeId(3), NodeId(1)).to_string(), "1-3");
    }

    #[test]
    fn registry_ids_are_stable() {
        let mut registry = NodeIdRegistry::new();
        let a = registry.id_for("a");
        let b = registry.id_for("b");
        assert_ne!(a, b);
        assert_eq!(registry.id_for("a"), a);
        assert_eq!(registry.region_of(b), Some("b"));
        assert_eq!(registry.region_of(NodeId(0)), None);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn two_mutual_neighbours_share_one_undirected_edge() {
        let regions = vec![
            region("a", RegionStatus::Peace, &["b"]),
            region("b", RegionStatus::War, &["a"]),
        ];
        let graph = build(&regions, &[], &[]).await;

        assert_eq!(graph.nodes.len(), 2);
        let colors: Vec<_> = graph
            .nodes
            .values()
            .map(|node| node.color.background.as_str())
            .collect();
        assert_eq!(colors, vec!["#388E3C", "#D32F2F"]);

        assert_eq!(graph.edges.len(), 1);
        let edge = graph.edges.values().next().expect("one edge");
        assert!(!edge.arrow);
        assert_eq!(edge.color, "#666666");
    }

    #[tokio::test]
    async fn one_edge_per_pair_regardless_of_visit_order() {
        let forward = vec![
            region("a", RegionStatus::Peace, &["b", "c"]),
            region("b", RegionStatus::Peace, &["a", "c"]),
            region("c", RegionStatus::Peace, &["a", "b"]),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();
        let asymmetric = vec![
            region("a", RegionStatus::Peace, &["b"]),
            region("b", RegionStatus::Peace, &[]),
            region("c", RegionStatus::Peace, &["a", "b", "b"]),
        ];

        for regions in [forward, reversed, asymmetric] {
            let graph = build(&regions, &[], &[]).await;
            assert_eq!(graph.edges.len(), 3);
        }
    }

    #[tokio::test]
    async fn unknown_neighbours_and_self_loops_are_skipped() {
        let regions = vec![region("a", RegionStatus::Peace, &["a", "ghost"])];
        let graph = build(&regions, &[], &[]).await;
        assert_eq!(graph.nodes.len(), 1);
        assert!(graph.edges.is_empty());
    }

    #[tokio::test]
    async fn active_track_directs_the_edge_in_action_color() {
        let regions = vec![
            region("a", RegionStatus::Peace, &["b"]),
            region("b", RegionStatus::Peace, &["a"]),
        ];
        let factions = vec![faction("f1", "Iron Guard", FactionType::Military)];
        let tracks = vec![track("t1", "war", "a", "b", &["f1"])];
        let mut registry = NodeIdRegistry::new();
        let graph = build_graph(
            &regions,
            &factions,
            &tracks,
            &mapper(),
            &mut registry,
            &GraphConfig::default(),
        )
        .await;

        let a = registry.get("a").expect("a");
        let b = registry.get("b").expect("b");
        assert_eq!(graph.edges.len(), 1);
        let edge = graph.edge_between(a, b).expect("a-b edge");
        assert!(edge.arrow);
        assert_eq!((edge.from, edge.to), (a, b));
        assert_eq!(edge.color, "#FF0000");
        assert_eq!(edge.track_id.as_deref(), Some("t1"));

        let title = &graph.nodes[&b].title;
        assert!(title.contains("Action: Border war"));
        assert!(title.contains("Participants: Iron Guard"));
        assert_eq!(graph.nodes[&b].color.background, "#FF0000");
    }

    #[tokio::test]
    async fn first_track_per_pair_wins_and_finished_tracks_are_ignored() {
        let regions = vec![
            region("a", RegionStatus::Peace, &["b"]),
            region("b", RegionStatus::Peace, &["a"]),
            region("c", RegionStatus::Peace, &[]),
        ];
        let mut done = track("t0", "war", "c", "a", &[]);
        done.status = Some(warmap_shared::TrackStatus::Rejected);
        let tracks = vec![
            done,
            track("t1", "war", "b", "a", &[]),
            track("t2", "war", "a", "b", &[]),
            track("t3", "missing", "a", "c", &[]),
        ];
        let mut registry = NodeIdRegistry::new();
        let graph = build_graph(
            &regions,
            &[],
            &tracks,
            &mapper(),
            &mut registry,
            &GraphConfig::default(),
        )
        .await;

        let a = registry.get("a").expect("a");
        let b = registry.get("b").expect("b");
        let c = registry.get("c").expect("c");
        let ab = graph.edge_between(a, b).expect("a-b");
        assert_eq!((ab.from, ab.to), (b, a));
        assert_eq!(ab.track_id.as_deref(), Some("t1"));

        let ac = graph.edge_between(a, c).expect("non-adjacent overlay");
        assert!(ac.arrow);
        assert_eq!(ac.color, "#757575");
        assert_eq!(graph.edges.len(), 2);
    }

    #[tokio::test]
    async fn node_ids_survive_rebuilds() {
        let mapper = mapper();
        let config = GraphConfig::default();
        let mut registry = NodeIdRegistry::new();
        let first = vec![
            region("a", RegionStatus::Peace, &[]),
            region("b", RegionStatus::Peace, &[]),
        ];
        build_graph(&first, &[], &[], &mapper, &mut registry, &config).await;
        let b = registry.get("b").expect("b");

        let second = vec![
            region("c", RegionStatus::Peace, &[]),
            region("b", RegionStatus::War, &[]),
        ];
        let graph = build_graph(&second, &[], &[], &mapper, &mut registry, &config).await;
        assert_eq!(graph.nodes[&b].region_id, "b");
        assert_eq!(registry.get("c"), Some(NodeId(3)));
    }

    #[tokio::test]
    async fn annotated_labels_name_the_controlling_faction() {
        let mut a = region("a", RegionStatus::Wreckage, &["b"]);
        a.faction = Some(EntityRef::new("f1"));
        let mut b = region("b", RegionStatus::Peace, &["a"]);
        b.faction = Some(EntityRef::new("gone"));
        let regions = vec![a, b, region("c", RegionStatus::Peace, &[])];
        let factions = vec![faction("f1", "Iron Guard", FactionType::Military)];
        let config = GraphConfig {
            annotate_labels: true,
            ..GraphConfig::default()
        };
        let mut registry = NodeIdRegistry::new();
        let graph =
            build_graph(&regions, &factions, &[], &mapper(), &mut registry, &config).await;

        assert_eq!(graph.nodes[&NodeId(1)].label, "A\n(Iron Guard)");
        assert_eq!(graph.nodes[&NodeId(2)].label, "B");
        assert_eq!(graph.nodes[&NodeId(3)].label, "C");

        let plain = build_graph(
            &regions,
            &factions,
            &[],
            &mapper(),
            &mut registry,
            &GraphConfig::default(),
        )
        .await;
        assert_eq!(plain.nodes[&NodeId(1)].label, "A");
    }
}
