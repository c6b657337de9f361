use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::config::{GraphConfig, LayoutPinning};
use crate::error::GraphError;
use crate::graph::{Graph, NodeId, Position};
use crate::surface::{SurfaceOptions, VisualizationSurface};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// The surface was empty and received the whole graph at once.
    pub full_load: bool,
    pub nodes_added: usize,
    pub nodes_updated: usize,
    pub nodes_removed: usize,
    pub edges_added: usize,
    pub edges_updated: usize,
    pub edges_removed: usize,
}

impl SyncReport {
    pub fn operations(&self) -> usize {
        self.nodes_added
            + self.nodes_updated
            + self.nodes_removed
            + self.edges_added
            + self.edges_updated
            + self.edges_removed
    }

    pub fn is_empty(&self) -> bool {
        self.operations() == 0
    }
}

/// Keeps a surface in step with successive target graphs using the fewest
/// operations. Layout is never recomputed here; placement belongs to the surface.
pub struct GraphSyncEngine<S> {
    surface: S,
    config: GraphConfig,
    options: SurfaceOptions,
    rendered: Graph,
    pinned: HashMap<NodeId, Position>,
    stabilization: Option<oneshot::Receiver<()>>,
}

impl<S: VisualizationSurface> GraphSyncEngine<S> {
    pub fn new(surface: S, config: GraphConfig) -> Self {
        Self::with_options(surface, config, SurfaceOptions::default())
    }

    pub fn with_options(surface: S, config: GraphConfig, options: SurfaceOptions) -> Self {
        Self {
            surface,
            config,
            options,
            rendered: Graph::default(),
            pinned: HashMap::new(),
            stabilization: None,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// What the surface currently shows, as last synced.
    pub fn rendered(&self) -> &Graph {
        &self.rendered
    }

    pub fn is_pinned(&self) -> bool {
        !self.pinned.is_empty()
    }

    /// Waits for the mount container, then initializes the surface.
    pub async fn attach(&mut self, container: &str) -> Result<(), GraphError> {
        wait_for_surface(&self.surface, self.config.surface_ready_timeout).await?;
        self.surface.initialize(container, &self.options)?;
        self.stabilization = self.surface.take_stabilization();
        Ok(())
    }

    /// Diffs `target` against what is rendered and applies the difference.
    ///
    /// Order: stale edges, stale nodes, new or changed nodes, new or changed
    /// edges. An edge whose direction flipped is removed and added again.
    pub fn sync_to_surface(&mut self, target: &Graph) -> Result<SyncReport, GraphError> {
        if !self.surface.is_initialized() {
            return Err(GraphError::SurfaceNotInitialized);
        }
        self.poll_stabilization();

        let mut target = target.clone();
        for node in target.nodes.values_mut() {
            node.fixed = self.pinned.get(&node.id).copied();
        }

        let mut report = SyncReport::default();
        if self.rendered.is_empty() {
            if !target.is_empty() {
                report.full_load = true;
                report.nodes_added = target.nodes.len();
                report.edges_added = target.edges.len();
                self.surface.set_nodes(target.nodes.values().cloned().collect());
                self.surface.set_edges(target.edges.values().cloned().collect());
            }
            self.rendered = target;
            debug!(?report, "graph synced");
            return Ok(report);
        }

        let mut re_add = Vec::new();
        for (id, edge) in &self.rendered.edges {
            match target.edges.get(id) {
                None => {
                    self.surface.remove_edge(*id);
                    report.edges_removed += 1;
                }
                Some(next) if next.from != edge.from => {
                    self.surface.remove_edge(*id);
                    report.edges_removed += 1;
                    re_add.push(*id);
                }
                Some(_) => {}
            }
        }

        for id in self.rendered.nodes.keys() {
            if !target.nodes.contains_key(id) {
                self.surface.remove_node(*id);
                self.pinned.remove(id);
                report.nodes_removed += 1;
            }
        }

        for (id, node) in &target.nodes {
            match self.rendered.nodes.get(id) {
                None => {
                    self.surface.add_node(node.clone());
                    report.nodes_added += 1;
                }
                Some(current) if current != node => {
                    self.surface.update_node(node.clone());
                    report.nodes_updated += 1;
                }
                Some(_) => {}
            }
        }

        for (id, edge) in &target.edges {
            match self.rendered.edges.get(id) {
                None => {
                    self.surface.add_edge(edge.clone());
                    report.edges_added += 1;
                }
                Some(_) if re_add.contains(id) => {
                    self.surface.add_edge(edge.clone());
                    report.edges_added += 1;
                }
                Some(current) if current != edge => {
                    self.surface.update_edge(edge.clone());
                    report.edges_updated += 1;
                }
                Some(_) => {}
            }
        }

        self.rendered = target;
        if !report.is_empty() {
            debug!(?report, "graph synced");
        }
        Ok(report)
    }

    pub fn awaiting_stabilization(&self) -> bool {
        self.stabilization.is_some()
    }

    /// Resolves when the surface reports its first stabilization, then applies
    /// the configured pinning. Pending forever if already handled.
    pub async fn stabilized(&mut self) -> Result<(), GraphError> {
        let Some(rx) = self.stabilization.as_mut() else {
            return std::future::pending().await;
        };
        let outcome = rx.await;
        self.stabilization = None;
        outcome.map_err(|_| GraphError::SignalDropped("stabilization"))?;
        self.on_stabilized();
        Ok(())
    }

    /// Bounded variant of [`Self::stabilized`].
    pub async fn wait_for_stabilization(&mut self, timeout: Duration) -> Result<(), GraphError> {
        if self.stabilization.is_none() {
            return Ok(());
        }
        tokio::time::timeout(timeout, self.stabilized())
            .await
            .map_err(|_| GraphError::Timeout {
                what: "layout stabilization",
                after: timeout,
            })?
    }

    fn poll_stabilization(&mut self) {
        let Some(rx) = self.stabilization.as_mut() else {
            return;
        };
        match rx.try_recv() {
            Ok(()) => {
                self.stabilization = None;
                self.on_stabilized();
            }
            Err(oneshot::error::TryRecvError::Empty) => {}
            Err(oneshot::error::TryRecvError::Closed) => {
                debug!("surface dropped its stabilization signal");
                self.stabilization = None;
            }
        }
    }

    fn on_stabilized(&mut self) {
        if self.config.pinning == LayoutPinning::PinAfterStabilization {
            self.pin_layout();
        }
        if self.config.freeze_physics_on_stabilize {
            self.surface.set_physics(false);
        }
    }

    /// Fixes every rendered node at its current coordinates.
    pub fn pin_layout(&mut self) {
        let ids: Vec<NodeId> = self.rendered.nodes.keys().copied().collect();
        let positions = self.surface.positions(&ids);
        for (id, position) in positions {
            let Some(node) = self.rendered.nodes.get_mut(&id) else {
                continue;
            };
            self.pinned.insert(id, position);
            node.fixed = Some(position);
            self.surface.update_node(node.clone());
        }
        info!(pinned = self.pinned.len(), "layout pinned");
    }
}

/// Waits, bounded, for the surface's mount container.
pub async fn wait_for_surface<S: VisualizationSurface>(
    surface: &S,
    timeout: Duration,
) -> Result<(), GraphError> {
    let mut ready = surface.readiness();
    match tokio::time::timeout(timeout, ready.wait_for(|ready| *ready)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(_)) => Err(GraphError::SignalDropped("readiness")),
        Err(_) => Err(GraphError::Timeout {
            what: "surface container",
            after: timeout,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use warmap_shared::RegionStatus;

    use super::*;
    use crate::config::{GraphConfig, LayoutPinning};
    use crate::graph::{EdgeId, GraphEdge, GraphNode};
    use crate::presentation::RegionColor;
    use crate::surface::{HeadlessSurface, SurfaceOp};

    fn node(id: u32, status: RegionStatus) -> GraphNode {
        GraphNode {
            id: NodeId(id),
            region_id: format!("r{id}"),
            label: format!("R{id}"),
            color: RegionColor {
                background: status.to_string(),
                border: "#000000".to_string(),
                highlight: String::new(),
            },
            title: String::new(),
            fixed: None,
        }
    }

    fn edge(from: u32, to: u32, arrow: bool) -> GraphEdge {
        GraphEdge {
            id: EdgeId::new(NodeId(from), NodeId(to)),
            from: NodeId(from),
            to: NodeId(to),
            arrow,
            color: if arrow { "#FF0000" } else { "#666666" }.to_string(),
            track_id: None,
        }
    }

    fn graph(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> Graph {
        Graph {
            nodes: nodes.into_iter().map(|n| (n.id, n)).collect(),
            edges: edges.into_iter().map(|e| (e.id, e)).collect(),
        }
    }

    fn free_config() -> GraphConfig {
        GraphConfig {
            pinning: LayoutPinning::Free,
            ..GraphConfig::default()
        }
    }

    async fn attached(config: GraphConfig) -> (GraphSyncEngine<HeadlessSurface>, HeadlessSurface) {
        let surface = HeadlessSurface::new().recording();
        let mut engine = GraphSyncEngine::new(surface.clone(), config);
        engine.attach("map").await.expect("attach");
        surface.take_ops();
        (engine, surface)
    }

    #[test]
    fn sync_before_attach_is_rejected() {
        let mut engine = GraphSyncEngine::new(HeadlessSurface::new(), GraphConfig::default());
        let err = engine
            .sync_to_surface(&Graph::default())
            .expect_err("not initialized");
        assert!(matches!(err, GraphError::SurfaceNotInitialized));
    }

    #[tokio::test]
    async fn second_identical_sync_issues_nothing() {
        let (mut engine, surface) = attached(free_config()).await;
        let target = graph(
            vec![node(1, RegionStatus::Peace), node(2, RegionStatus::War)],
            vec![edge(1, 2, false)],
        );

        let first = engine.sync_to_surface(&target).expect("first");
        assert!(first.full_load);
        assert_eq!(
            surface.take_ops(),
            vec![
                SurfaceOp::SetNodes(vec![NodeId(1), NodeId(2)]),
                SurfaceOp::SetEdges(vec![EdgeId::new(NodeId(1), NodeId(2))]),
            ]
        );

        let second = engine.sync_to_surface(&target).expect("second");
        assert!(second.is_empty());
        assert!(surface.take_ops().is_empty());
    }

    #[tokio::test]
    async fn only_changed_items_are_touched() {
        let (mut engine, surface) = attached(free_config()).await;
        engine
            .sync_to_surface(&graph(
                vec![
                    node(1, RegionStatus::Peace),
                    node(2, RegionStatus::Peace),
                    node(3, RegionStatus::Peace),
                ],
                vec![edge(1, 2, false), edge(2, 3, false)],
            ))
            .expect("seed");
        surface.take_ops();

        let report = engine
            .sync_to_surface(&graph(
                vec![
                    node(1, RegionStatus::War),
                    node(2, RegionStatus::Peace),
                    node(4, RegionStatus::Peace),
                ],
                vec![edge(1, 2, true), edge(2, 4, false)],
            ))
            .expect("diff");

        let e12 = EdgeId::new(NodeId(1), NodeId(2));
        let e23 = EdgeId::new(NodeId(2), NodeId(3));
        let e24 = EdgeId::new(NodeId(2), NodeId(4));
        assert_eq!(
            surface.take_ops(),
            vec![
                SurfaceOp::RemoveEdge(e23),
                SurfaceOp::RemoveNode(NodeId(3)),
                SurfaceOp::UpdateNode(NodeId(1)),
                SurfaceOp::AddNode(NodeId(4)),
                SurfaceOp::UpdateEdge(e12),
                SurfaceOp::AddEdge(e24),
            ]
        );
        assert_eq!(report.operations(), 6);
        assert!(!report.full_load);
    }

    #[tokio::test]
    async fn direction_flip_removes_then_adds() {
        let (mut engine, surface) = attached(free_config()).await;
        let nodes = vec![node(1, RegionStatus::Peace), node(2, RegionStatus::Peace)];
        engine
            .sync_to_surface(&graph(nodes.clone(), vec![edge(1, 2, true)]))
            .expect("seed");
        surface.take_ops();

        let report = engine
            .sync_to_surface(&graph(nodes, vec![edge(2, 1, true)]))
            .expect("flip");

        let id = EdgeId::new(NodeId(1), NodeId(2));
        assert_eq!(
            surface.take_ops(),
            vec![SurfaceOp::RemoveEdge(id), SurfaceOp::AddEdge(id)]
        );
        assert_eq!((report.edges_removed, report.edges_added), (1, 1));
        assert_eq!(surface.edge(id).expect("re-added").from, NodeId(2));
    }

    #[tokio::test]
    async fn stabilization_pins_rendered_nodes() {
        let config = GraphConfig {
            pinning: LayoutPinning::PinAfterStabilization,
            freeze_physics_on_stabilize: true,
            ..GraphConfig::default()
        };
        let (mut engine, surface) = attached(config).await;
        let target = graph(
            vec![node(1, RegionStatus::Peace), node(2, RegionStatus::Peace)],
            vec![edge(1, 2, false)],
        );
        engine.sync_to_surface(&target).expect("load");
        surface.nudge(NodeId(2), Position { x: 42.0, y: -7.0 });

        engine
            .wait_for_stabilization(Duration::from_secs(1))
            .await
            .expect("headless settles on load");
        assert!(engine.is_pinned());
        assert!(!engine.awaiting_stabilization());
        assert!(!surface.physics_enabled());
        assert_eq!(
            surface.node(NodeId(2)).expect("node").fixed,
            Some(Position { x: 42.0, y: -7.0 })
        );

        // Pins survive a rebuild that carries no positions.
        surface.take_ops();
        let report = engine.sync_to_surface(&target).expect("resync");
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn free_layout_is_left_alone() {
        let (mut engine, surface) = attached(free_config()).await;
        engine
            .sync_to_surface(&graph(vec![node(1, RegionStatus::Peace)], vec![]))
            .expect("load");
        engine
            .wait_for_stabilization(Duration::from_secs(1))
            .await
            .expect("settled");
        assert!(!engine.is_pinned());
        assert_eq!(surface.node(NodeId(1)).expect("node").fixed, None);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_container_times_out() {
        let surface = HeadlessSurface::detached();
        let config = GraphConfig {
            surface_ready_timeout: Duration::from_millis(3_000),
            ..GraphConfig::default()
        };
        let mut engine = GraphSyncEngine::new(surface, config);
        let err = engine.attach("map").await.expect_err("never ready");
        assert!(matches!(
            err,
            GraphError::Timeout {
                what: "surface container",
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stabilization_wait_is_bounded() {
        let surface = HeadlessSurface::detached();
        surface.mark_ready();
        let mut engine = GraphSyncEngine::new(surface, GraphConfig::default());
        engine.attach("map").await.expect("attach");

        let err = engine
            .wait_for_stabilization(Duration::from_millis(500))
            .await
            .expect_err("detached surface never settles");
        assert!(matches!(err, GraphError::Timeout { .. }));
        assert!(engine.awaiting_stabilization());
    }
}
