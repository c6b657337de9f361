pub mod api;
pub mod config;
pub mod error;
pub mod graph;
pub mod live_map;
pub mod presentation;
pub mod sse;
pub mod store;
pub mod surface;
pub mod sync;

#[cfg(test)]
mod test_support;

pub use api::{Entity, EntitySource, HttpEntityClient};
pub use config::MapConfig;
pub use error::{ClientError, GraphError, MapError, StreamError};
pub use live_map::{LiveMap, Sources};
pub use sse::{ConnectionStatus, EventStreamConsumer};
