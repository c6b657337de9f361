use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{oneshot, watch};
use tracing::{debug, info};

use crate::error::GraphError;
use crate::graph::{EdgeId, GraphEdge, GraphNode, NodeId, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Solver {
    ForceAtlas2Based,
    BarnesHut,
    Repulsion,
}

/// Layout parameters handed to the surface on initialization.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceOptions {
    pub solver: Solver,
    pub spring_length: f64,
    pub min_velocity: f64,
    pub timestep: f64,
    pub physics: bool,
}

impl Default for SurfaceOptions {
    fn default() -> Self {
        Self {
            solver: Solver::ForceAtlas2Based,
            spring_length: 100.0,
            min_velocity: 0.75,
            timestep: 0.93,
            physics: true,
        }
    }
}

/// A force-layout renderer. It owns node placement; callers only add, update
/// and remove items.
pub trait VisualizationSurface: Send {
    /// Flips to `true` once the mount container exists.
    fn readiness(&self) -> watch::Receiver<bool>;

    fn initialize(&mut self, container: &str, options: &SurfaceOptions) -> Result<(), GraphError>;
    fn is_initialized(&self) -> bool;

    fn set_nodes(&mut self, nodes: Vec<GraphNode>);
    fn set_edges(&mut self, edges: Vec<GraphEdge>);

    fn add_node(&mut self, node: GraphNode);
    fn update_node(&mut self, node: GraphNode);
    fn remove_node(&mut self, id: NodeId);

    fn add_edge(&mut self, edge: GraphEdge);
    fn update_edge(&mut self, edge: GraphEdge);
    fn remove_edge(&mut self, id: EdgeId);

    fn positions(&self, ids: &[NodeId]) -> HashMap<NodeId, Position>;
    fn set_physics(&mut self, enabled: bool);

    /// Resolves once, after the first layout stabilization. `None` once taken.
    fn take_stabilization(&mut self) -> Option<oneshot::Receiver<()>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceOp {
    Initialize(String),
    SetNodes(Vec<NodeId>),
    SetEdges(Vec<EdgeId>),
    AddNode(NodeId),
    UpdateNode(NodeId),
    RemoveNode(NodeId),
    AddEdge(EdgeId),
    UpdateEdge(EdgeId),
    RemoveEdge(EdgeId),
    SetPhysics(bool),
}

#[derive(Debug)]
struct HeadlessState {
    container: Option<String>,
    ready: watch::Sender<bool>,
    stabilization_tx: Option<oneshot::Sender<()>>,
    stabilization_rx: Option<oneshot::Receiver<()>>,
    settle_on_load: bool,
    physics: bool,
    nodes: BTreeMap<NodeId, GraphNode>,
    edges: BTreeMap<EdgeId, GraphEdge>,
    positions: HashMap<NodeId, Position>,
    record: bool,
    ops: Vec<SurfaceOp>,
}

/// Surface without a screen. Places nodes on a fixed grid and, when built with
/// [`HeadlessSurface::recording`], keeps a log of every operation. Clones share
/// state.
#[derive(Debug, Clone)]
pub struct HeadlessSurface {
    state: Arc<Mutex<HeadlessState>>,
}

const GRID_COLUMNS: u32 = 10;
const GRID_SPACING: f64 = 100.0;

fn grid_position(id: NodeId) -> Position {
    Position {
        x: f64::from(id.0 % GRID_COLUMNS) * GRID_SPACING,
        y: f64::from(id.0 / GRID_COLUMNS) * GRID_SPACING,
    }
}

impl HeadlessSurface {
    /// Container ready immediately; layout settles on the first full load.
    pub fn new() -> Self {
        let surface = Self::detached();
        surface.mark_ready();
        surface.state().settle_on_load = true;
        surface
    }

    /// Container not ready and no automatic stabilization.
    pub fn detached() -> Self {
        let (ready, _) = watch::channel(false);
        let (tx, rx) = oneshot::channel();
        Self {
            state: Arc::new(Mutex::new(HeadlessState {
                container: None,
                ready,
                stabilization_tx: Some(tx),
                stabilization_rx: Some(rx),
                settle_on_load: false,
                physics: true,
                nodes: BTreeMap::new(),
                edges: BTreeMap::new(),
                positions: HashMap::new(),
                record: false,
                ops: Vec::new(),
            })),
        }
    }

    /// Keeps every later operation until drained with [`Self::take_ops`].
    pub fn recording(self) -> Self {
        self.state().record = true;
        self
    }

    fn state(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mark_ready(&self) {
        self.state().ready.send_replace(true);
    }

    /// Fires the one-shot stabilization signal if it has not fired yet.
    pub fn stabilize(&self) {
        if let Some(tx) = self.state().stabilization_tx.take() {
            debug!("headless layout stabilized");
            let _ = tx.send(());
        }
    }

    /// Drains the recorded operations. Always empty unless recording.
    pub fn take_ops(&self) -> Vec<SurfaceOp> {
        std::mem::take(&mut self.state().ops)
    }

    pub fn node(&self, id: NodeId) -> Option<GraphNode> {
        self.state().nodes.get(&id).cloned()
    }

    pub fn edge(&self, id: EdgeId) -> Option<GraphEdge> {
        self.state().edges.get(&id).cloned()
    }

    pub fn node_count(&self) -> usize {
        self.state().nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.state().edges.len()
    }

    pub fn physics_enabled(&self) -> bool {
        self.state().physics
    }

    /// Moves a node as a running simulation would.
    pub fn nudge(&self, id: NodeId, position: Position) {
        self.state().positions.insert(id, position);
    }
}

impl Default for HeadlessSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessState {
    fn log(&mut self, op: SurfaceOp) {
        if self.record {
            self.ops.push(op);
        }
    }

    fn place(&mut self, node: &GraphNode) {
        let position = node.fixed.unwrap_or_else(|| grid_position(node.id));
        self.positions.entry(node.id).or_insert(position);
        if let Some(fixed) = node.fixed {
            self.positions.insert(node.id, fixed);
        }
    }
}

impl VisualizationSurface for HeadlessSurface {
    fn readiness(&self) -> watch::Receiver<bool> {
        self.state().ready.subscribe()
    }

    fn initialize(&mut self, container: &str, options: &SurfaceOptions) -> Result<(), GraphError> {
        let mut state = self.state();
        if !*state.ready.borrow() {
            return Err(GraphError::SurfaceNotInitialized);
        }
        info!(container, solver = ?options.solver, "headless surface initialized");
        state.container = Some(container.to_string());
        state.physics = options.physics;
        state.log(SurfaceOp::Initialize(container.to_string()));
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.state().container.is_some()
    }

    fn set_nodes(&mut self, nodes: Vec<GraphNode>) {
        let settle = {
            let mut state = self.state();
            state.log(SurfaceOp::SetNodes(nodes.iter().map(|n| n.id).collect()));
            state.nodes.clear();
            state.positions.clear();
            for node in nodes {
                state.place(&node);
                state.nodes.insert(node.id, node);
            }
            state.settle_on_load
        };
        if settle {
            self.stabilize();
        }
    }

    fn set_edges(&mut self, edges: Vec<GraphEdge>) {
        let mut state = self.state();
        state.log(SurfaceOp::SetEdges(edges.iter().map(|e| e.id).collect()));
        state.edges = edges.into_iter().map(|edge| (edge.id, edge)).collect();
    }

    fn add_node(&mut self, node: GraphNode) {
        let mut state = self.state();
        state.log(SurfaceOp::AddNode(node.id));
        state.place(&node);
        state.nodes.insert(node.id, node);
    }

    fn update_node(&mut self, node: GraphNode) {
        let mut state = self.state();
        state.log(SurfaceOp::UpdateNode(node.id));
        state.place(&node);
        state.nodes.insert(node.id, node);
    }

    fn remove_node(&mut self, id: NodeId) {
        let mut state = self.state();
        state.log(SurfaceOp::RemoveNode(id));
        state.nodes.remove(&id);
        state.positions.remove(&id);
    }

    fn add_edge(&mut self, edge: GraphEdge) {
        let mut state = self.state();
        state.log(SurfaceOp::AddEdge(edge.id));
        state.edges.insert(edge.id, edge);
    }

    fn update_edge(&mut self, edge: GraphEdge) {
        let mut state = self.state();
        state.log(SurfaceOp::UpdateEdge(edge.id));
        state.edges.insert(edge.id, edge);
    }

    fn remove_edge(&mut self, id: EdgeId) {
        let mut state = self.state();
        state.log(SurfaceOp::RemoveEdge(id));
        state.edges.remove(&id);
    }

    fn positions(&self, ids: &[NodeId]) -> HashMap<NodeId, Position> {
        let state = self.state();
        ids.iter()
            .filter_map(|id| state.positions.get(id).map(|position| (*id, *position)))
            .collect()
    }

    fn set_physics(&mut self, enabled: bool) {
        let mut state = self.state();
        state.log(SurfaceOp::SetPhysics(enabled));
        state.physics = enabled;
    }

    fn take_stabilization(&mut self) -> Option<oneshot::Receiver<()>> {
        self.state().stabilization_rx.take()
    }
}
