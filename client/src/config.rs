use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3000/api";
pub const DEFAULT_STREAM_PATH: &str = "/events/stream";

pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;
pub const DEFAULT_STREAM_MAX_RETRIES: u32 = 3;
pub const DEFAULT_STREAM_REPLAY_BUFFER: usize = 20;
pub const DEFAULT_STREAM_BROADCAST_BUFFER: usize = 256;
pub const DEFAULT_PRESENTATION_TTL_MS: u64 = 5_000;
pub const DEFAULT_SURFACE_READY_TIMEOUT_MS: u64 = 3_000;

pub const USER_AGENT: &str = "warmap-client/0.1";

/// How the engine treats node positions once the force layout has settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutPinning {
    /// Nodes stay free; the surface keeps simulating.
    Free,
    /// Every rendered node is fixed at its stabilized coordinates.
    PinAfterStabilization,
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub url: String,
    pub reconnect_delay: Duration,
    /// `None` retries forever.
    pub max_retries: Option<u32>,
    /// Messages retained for late subscribers. `0` disables replay.
    pub replay_buffer: usize,
    pub broadcast_buffer: usize,
}

#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub pinning: LayoutPinning,
    pub freeze_physics_on_stabilize: bool,
    /// Append the controlling faction's name to node labels.
    pub annotate_labels: bool,
    pub surface_ready_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct MapConfig {
    pub api_base_url: String,
    pub http_timeout: Duration,
    pub presentation_ttl: Duration,
    pub stream: StreamConfig,
    pub graph: GraphConfig,
}

impl MapConfig {
    pub fn from_env() -> Self {
        let api_base_url = api_base_url();
        let stream_url = format!("{}{}", api_base_url.trim_end_matches('/'), stream_path());
        Self {
            api_base_url,
            http_timeout: http_timeout(),
            presentation_ttl: presentation_ttl(),
            stream: StreamConfig {
                url: stream_url,
                reconnect_delay: reconnect_delay(),
                max_retries: stream_max_retries(),
                replay_buffer: stream_replay_buffer(),
                broadcast_buffer: stream_broadcast_buffer(),
            },
            graph: GraphConfig {
                pinning: layout_pinning(),
                freeze_physics_on_stabilize: env_flag("WARMAP_FREEZE_PHYSICS_ON_STABILIZE", false),
                annotate_labels: env_flag("WARMAP_ANNOTATE_LABELS", false),
                surface_ready_timeout: surface_ready_timeout(),
            },
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            pinning: LayoutPinning::PinAfterStabilization,
            freeze_physics_on_stabilize: false,
            annotate_labels: false,
            surface_ready_timeout: Duration::from_millis(DEFAULT_SURFACE_READY_TIMEOUT_MS),
        }
    }
}

impl StreamConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            max_retries: Some(DEFAULT_STREAM_MAX_RETRIES),
            replay_buffer: 0,
            broadcast_buffer: DEFAULT_STREAM_BROADCAST_BUFFER,
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
        })
        .unwrap_or(default)
}

fn env_millis(name: &str, default: u64) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(default))
}

pub fn api_base_url() -> String {
    std::env::var("WARMAP_API_BASE_URL")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
}

pub fn stream_path() -> String {
    std::env::var("WARMAP_STREAM_PATH")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| value.starts_with('/'))
        .unwrap_or_else(|| DEFAULT_STREAM_PATH.to_string())
}

pub fn http_timeout() -> Duration {
    env_millis("WARMAP_HTTP_TIMEOUT_MS", DEFAULT_HTTP_TIMEOUT_MS)
}

pub fn reconnect_delay() -> Duration {
    env_millis("WARMAP_RECONNECT_DELAY_MS", DEFAULT_RECONNECT_DELAY_MS)
}

pub fn presentation_ttl() -> Duration {
    env_millis("WARMAP_PRESENTATION_TTL_MS", DEFAULT_PRESENTATION_TTL_MS)
}

pub fn surface_ready_timeout() -> Duration {
    env_millis(
        "WARMAP_SURFACE_READY_TIMEOUT_MS",
        DEFAULT_SURFACE_READY_TIMEOUT_MS,
    )
}

/// `0` means unbounded reconnects.
pub fn stream_max_retries() -> Option<u32> {
    let retries = std::env::var("WARMAP_STREAM_MAX_RETRIES")
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(DEFAULT_STREAM_MAX_RETRIES);
    (retries > 0).then_some(retries)
}

pub fn stream_replay_buffer() -> usize {
    std::env::var("WARMAP_STREAM_REPLAY_BUFFER")
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_STREAM_REPLAY_BUFFER)
}

pub fn stream_broadcast_buffer() -> usize {
    std::env::var("WARMAP_STREAM_BROADCAST_BUFFER")
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_STREAM_BROADCAST_BUFFER)
}

pub fn layout_pinning() -> LayoutPinning {
    if env_flag("WARMAP_PIN_AFTER_STABILIZATION", true) {
        LayoutPinning::PinAfterStabilization
    } else {
        LayoutPinning::Free
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn defaults_apply_without_environment() {
        temp_env::with_vars_unset(
            [
                "WARMAP_API_BASE_URL",
                "WARMAP_STREAM_PATH",
                "WARMAP_STREAM_MAX_RETRIES",
                "WARMAP_PIN_AFTER_STABILIZATION",
                "WARMAP_PRESENTATION_TTL_MS",
            ],
            || {
                let config = MapConfig::from_env();
                assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
                assert_eq!(config.stream.url, "http://localhost:3000/api/events/stream");
                assert_eq!(config.stream.max_retries, Some(3));
                assert_eq!(config.presentation_ttl, Duration::from_millis(5_000));
                assert_eq!(config.graph.pinning, LayoutPinning::PinAfterStabilization);
            },
        );
    }

    #[test]
    fn zero_retries_means_unbounded() {
        temp_env::with_var("WARMAP_STREAM_MAX_RETRIES", Some("0"), || {
            assert_eq!(stream_max_retries(), None);
        });
        temp_env::with_var("WARMAP_STREAM_MAX_RETRIES", Some("7"), || {
            assert_eq!(stream_max_retries(), Some(7));
        });
    }

    #[test]
    fn invalid_durations_fall_back_to_defaults() {
        temp_env::with_var("WARMAP_RECONNECT_DELAY_MS", Some("soon"), || {
            assert_eq!(reconnect_delay(), Duration::from_millis(5_000));
        });
        temp_env::with_var("WARMAP_RECONNECT_DELAY_MS", Some("0"), || {
            assert_eq!(reconnect_delay(), Duration::from_millis(5_000));
        });
        temp_env::with_var("WARMAP_RECONNECT_DELAY_MS", Some("250"), || {
            assert_eq!(reconnect_delay(), Duration::from_millis(250));
        });
    }

    #[test]
    fn pinning_flag_is_explicit() {
        temp_env::with_var("WARMAP_PIN_AFTER_STABILIZATION", Some("off"), || {
            assert_eq!(layout_pinning(), LayoutPinning::Free);
        });
        temp_env::with_var("WARMAP_PIN_AFTER_STABILIZATION", Some("YES"), || {
            assert_eq!(layout_pinning(), LayoutPinning::PinAfterStabilization);
        });
    }

    #[test]
    fn trailing_slash_in_base_url_is_not_doubled() {
        temp_env::with_vars(
            [
                ("WARMAP_API_BASE_URL", Some("http://example.test/api/")),
                ("WARMAP_STREAM_PATH", None),
            ],
            || {
                let config = MapConfig::from_env();
                assert_eq!(config.stream.url, "http://example.test/api/events/stream");
            },
        );
    }
}
