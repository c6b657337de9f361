use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use warmap_shared::{
    ActionDefinition, ActionType, ActorRule, EntityRef, Faction, FactionType, Region, RegionStatus,
    TerritoryRule, Track,
};

use crate::api::{Entity, EntitySource};
use crate::error::ClientError;

pub(crate) async fn spawn_test_server(app: Router) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener address");
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve test app");
    });
    (addr, handle)
}

/// Polls `check` until it holds, failing the test after two seconds.
pub(crate) async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

pub(crate) fn region(id: &str, status: RegionStatus, neighbours: &[&str]) -> Region {
    Region {
        id: id.to_string(),
        title: id.to_uppercase(),
        status,
        neighbours: neighbours.iter().map(|n| n.to_string()).collect(),
        faction: None,
    }
}

pub(crate) fn faction(id: &str, name: &str, faction_type: FactionType) -> Faction {
    Faction {
        id: id.to_string(),
        name: name.to_string(),
        base_region: None,
        faction_type,
    }
}

pub(crate) fn action(id: &str, action_type: ActionType, title: &str) -> ActionDefinition {
    ActionDefinition {
        id: id.to_string(),
        action_type,
        title: title.to_string(),
        actor_rules: vec![ActorRule::All],
        territory_rule: TerritoryRule::Both,
    }
}

pub(crate) fn track(id: &str, action_id: &str, source: &str, target: &str, actors: &[&str]) -> Track {
    Track {
        id: id.to_string(),
        action_id: action_id.to_string(),
        actors: actors.iter().map(|a| EntityRef::new(*a)).collect(),
        target: EntityRef::new(target),
        source: EntityRef::new(source),
        timeout_ms: 60_000,
        status: None,
    }
}

/// In-memory entity source with call counters and a failure switch.
pub(crate) struct FakeSource<T> {
    items: Mutex<Vec<T>>,
    failing: AtomicBool,
    pub fetch_all_calls: AtomicUsize,
    pub fetch_by_id_calls: AtomicUsize,
}

impl<T: Entity> FakeSource<T> {
    pub(crate) fn new(items: Vec<T>) -> Self {
        Self {
            items: Mutex::new(items),
            failing: AtomicBool::new(false),
            fetch_all_calls: AtomicUsize::new(0),
            fetch_by_id_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn modify(&self, id: &str, f: impl FnOnce(&mut T)) {
        let mut items = self.items.lock().expect("fake source lock");
        let item = items
            .iter_mut()
            .find(|item| item.entity_id() == id)
            .expect("item to modify exists");
        f(item);
    }

    pub(crate) fn insert(&self, item: T) {
        self.items.lock().expect("fake source lock").push(item);
    }

    pub(crate) fn delete(&self, id: &str) {
        self.items
            .lock()
            .expect("fake source lock")
            .retain(|item| item.entity_id() != id);
    }

    pub(crate) fn fail_requests(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_failing(&self, path: String) -> Result<(), ClientError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ClientError::Status {
                url: path,
                status: 503,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl<T: Entity> EntitySource<T> for FakeSource<T> {
    async fn fetch_all(&self) -> Result<Vec<T>, ClientError> {
        self.fetch_all_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failing(T::ENDPOINT.to_string())?;
        Ok(self.items.lock().expect("fake source lock").clone())
    }

    async fn fetch_by_id(&self, id: &str) -> Result<T, ClientError> {
        self.fetch_by_id_calls.fetch_add(1, Ordering::SeqCst);
        let path = format!("{}/{}", T::ENDPOINT, id);
        self.check_failing(path.clone())?;
        self.items
            .lock()
            .expect("fake source lock")
            .iter()
            .find(|item| item.entity_id() == id)
            .cloned()
            .ok_or(ClientError::Status {
                url: path,
                status: 404,
            })
    }
}
