use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use warmap_shared::{ActionDefinition, Faction, Region, Track};

use crate::api::{EntitySource, HttpEntityClient};
use crate::config::{GraphConfig, MapConfig};
use crate::error::{ClientError, GraphError, MapError};
use crate::graph::{NodeId, NodeIdRegistry, build_graph};
use crate::presentation::PresentationMapper;
use crate::sse::EventStreamConsumer;
use crate::store::{EntityStore, Snapshot};
use crate::surface::VisualizationSurface;
use crate::sync::{GraphSyncEngine, SyncReport};

/// Where each store fetches from.
pub struct Sources {
    pub regions: Arc<dyn EntitySource<Region>>,
    pub factions: Arc<dyn EntitySource<Faction>>,
    pub actions: Arc<dyn EntitySource<ActionDefinition>>,
    pub tracks: Arc<dyn EntitySource<Track>>,
}

impl Sources {
    pub fn http(client: HttpEntityClient) -> Self {
        let client = Arc::new(client);
        Self {
            regions: client.clone(),
            factions: client.clone(),
            actions: client.clone(),
            tracks: client,
        }
    }
}

/// One receiver per store, held from construction so no change is missed
/// before [`LiveMap::run`] is first polled.
struct StoreWatches {
    regions: watch::Receiver<Snapshot<Region>>,
    factions: watch::Receiver<Snapshot<Faction>>,
    actions: watch::Receiver<Snapshot<ActionDefinition>>,
    tracks: watch::Receiver<Snapshot<Track>>,
}

/// Stores, presentation and sync engine wired together.
///
/// Rebuilds and syncs the graph whenever any store publishes a new snapshot.
pub struct LiveMap<S> {
    regions: Arc<EntityStore<Region>>,
    factions: Arc<EntityStore<Faction>>,
    actions: Arc<EntityStore<ActionDefinition>>,
    tracks: Arc<EntityStore<Track>>,
    mapper: PresentationMapper,
    registry: NodeIdRegistry,
    engine: GraphSyncEngine<S>,
    graph_config: GraphConfig,
    watches: StoreWatches,
}

impl<S: VisualizationSurface> LiveMap<S> {
    pub fn new(sources: Sources, surface: S, config: &MapConfig) -> Self {
        let regions = Arc::new(EntityStore::new(sources.regions));
        let factions = Arc::new(EntityStore::new(sources.factions));
        let actions = Arc::new(EntityStore::new(sources.actions));
        let tracks = Arc::new(EntityStore::new(sources.tracks));
        let watches = StoreWatches {
            regions: regions.subscribe(),
            factions: factions.subscribe(),
            actions: actions.subscribe(),
            tracks: tracks.subscribe(),
        };
        Self {
            mapper: PresentationMapper::new(actions.clone(), config.presentation_ttl),
            regions,
            factions,
            actions,
            tracks,
            registry: NodeIdRegistry::new(),
            engine: GraphSyncEngine::new(surface, config.graph.clone()),
            graph_config: config.graph.clone(),
            watches,
        }
    }

    pub fn regions(&self) -> Arc<EntityStore<Region>> {
        Arc::clone(&self.regions)
    }

    pub fn factions(&self) -> Arc<EntityStore<Faction>> {
        Arc::clone(&self.factions)
    }

    pub fn actions(&self) -> Arc<EntityStore<ActionDefinition>> {
        Arc::clone(&self.actions)
    }

    pub fn tracks(&self) -> Arc<EntityStore<Track>> {
        Arc::clone(&self.tracks)
    }

    pub fn engine(&self) -> &GraphSyncEngine<S> {
        &self.engine
    }

    pub fn node_id(&self, region_id: &str) -> Option<NodeId> {
        self.registry.get(region_id)
    }

    /// Attaches the surface, loads every collection and renders the first graph.
    pub async fn start(&mut self, container: &str) -> Result<SyncReport, MapError> {
        self.engine.attach(container).await?;
        self.seed().await?;
        Ok(self.refresh().await?)
    }

    pub async fn seed(&self) -> Result<(), ClientError> {
        let (regions, factions, actions, tracks) = tokio::try_join!(
            self.regions.get_all(false),
            self.factions.get_all(false),
            self.actions.get_all(false),
            self.tracks.get_all(false),
        )?;
        info!(
            regions = regions.len(),
            factions = factions.len(),
            actions = actions.len(),
            tracks = tracks.len(),
            "stores seeded"
        );
        Ok(())
    }

    /// Feeds stream notifications into the stores that have stream kinds.
    /// Each of those stores reloads whenever the stream goes live.
    pub fn listen(&self, consumer: &EventStreamConsumer) -> Vec<JoinHandle<()>> {
        vec![
            self.regions
                .spawn_listener(consumer.subscribe(), consumer.status()),
            self.tracks
                .spawn_listener(consumer.subscribe(), consumer.status()),
            self.actions
                .spawn_listener(consumer.subscribe(), consumer.status()),
        ]
    }

    /// Rebuilds the target graph from current snapshots and syncs it.
    pub async fn refresh(&mut self) -> Result<SyncReport, GraphError> {
        let regions = self.regions.snapshot();
        let factions = self.factions.snapshot();
        let tracks = self.tracks.snapshot();
        let target = build_graph(
            &regions,
            &factions,
            &tracks,
            &self.mapper,
            &mut self.registry,
            &self.graph_config,
        )
        .await;
        self.engine.sync_to_surface(&target)
    }

    fn mark_watches_seen(&mut self) {
        self.watches.regions.mark_unchanged();
        self.watches.factions.mark_unchanged();
        self.watches.actions.mark_unchanged();
        self.watches.tracks.mark_unchanged();
    }

    /// Resyncs on every store change until `shutdown` resolves. Changes made
    /// since construction, including seeding, are picked up on the first pass.
    pub async fn run(mut self, shutdown: impl Future<Output = ()> + Send) {
        tokio::pin!(shutdown);

        loop {
            let changed = tokio::select! {
                _ = &mut shutdown => break,
                result = self.engine.stabilized(), if self.engine.awaiting_stabilization() => {
                    if let Err(e) = result {
                        warn!(error = %e, "layout never stabilized");
                    }
                    continue;
                }
                changed = self.watches.actions.changed() => changed,
                changed = self.watches.regions.changed() => changed,
                changed = self.watches.factions.changed() => changed,
                changed = self.watches.tracks.changed() => changed,
            };
            if changed.is_err() {
                warn!("store closed; live map stopping");
                break;
            }
            self.mark_watches_seen();

            match self.refresh().await {
                Ok(report) if !report.is_empty() => info!(
                    added = report.nodes_added + report.edges_added,
                    updated = report.nodes_updated + report.edges_updated,
                    removed = report.nodes_removed + report.edges_removed,
                    "map resynced"
                ),
                Ok(_) => {}
                Err(e) => error!(error = %e, "map resync failed"),
            }
        }
        info!("live map stopped");
    }
}
