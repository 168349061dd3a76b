//! Relay configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Numeric settings fall back to their
//! defaults when unset or unparsable.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use axum::http::HeaderValue;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Default bind port.
pub const DEFAULT_PORT: u16 = 8000;

/// Default origin allow-list: the browser front-end's dev server.
pub const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000";

/// Top-level relay configuration.
///
/// Loaded once at startup via [`RelayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Socket address to bind the HTTP server to.
    pub listen_addr: SocketAddr,

    /// Origins permitted to open a WebSocket.
    pub allowed_origins: AllowedOrigins,

    /// Upper bound for queueing a frame to one recipient and for writing
    /// one frame to a socket.
    pub send_timeout: Duration,

    /// Close a connection after this long without any inbound frame.
    /// `None` disables the check.
    pub idle_timeout: Option<Duration>,

    /// Ping period. `None` disables heartbeats.
    pub heartbeat_interval: Option<Duration>,

    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,

    /// Drop inbound frames that are not valid JSON instead of relaying them.
    pub drop_malformed: bool,

    /// Emit logs as JSON lines.
    pub log_json: bool,
}

impl RelayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `RELAY_HOST` is set but is not an IP address.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let host: IpAddr = match std::env::var("RELAY_HOST") {
            Ok(raw) => raw.parse()?,
            Err(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };
        let port = parse_env("RELAY_PORT", DEFAULT_PORT);

        let allowed_origins = AllowedOrigins::parse(
            &std::env::var("RELAY_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| DEFAULT_ALLOWED_ORIGINS.to_string()),
        );

        let send_timeout = Duration::from_millis(parse_env("RELAY_SEND_TIMEOUT_MS", 1_000));
        let idle_timeout = seconds_or_disabled(parse_env("RELAY_IDLE_TIMEOUT_SECS", 60));
        let heartbeat_interval =
            seconds_or_disabled(parse_env("RELAY_HEARTBEAT_INTERVAL_SECS", 20));
        let outbound_buffer = parse_env("RELAY_OUTBOUND_BUFFER", 64_usize).max(1);
        let drop_malformed = parse_env_bool("RELAY_DROP_MALFORMED", false);
        let log_json = std::env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(Self {
            listen_addr: SocketAddr::new(host, port),
            allowed_origins,
            send_timeout,
            idle_timeout,
            heartbeat_interval,
            outbound_buffer,
            drop_malformed,
            log_json,
        })
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            allowed_origins: AllowedOrigins::parse(DEFAULT_ALLOWED_ORIGINS),
            send_timeout: Duration::from_secs(1),
            idle_timeout: Some(Duration::from_secs(60)),
            heartbeat_interval: Some(Duration::from_secs(20)),
            outbound_buffer: 64,
            drop_malformed: false,
            log_json: false,
        }
    }
}

/// Origin allow-list checked during the WebSocket handshake and used for
/// the CORS layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    /// `*`: any origin, and requests without an `Origin` header.
    Any,
    /// Exact-match list of origins such as `http://localhost:3000`.
    List(Vec<String>),
}

impl AllowedOrigins {
    /// Parses a comma-separated list. A `*` entry anywhere means [`Self::Any`].
    ///
    /// Entries that cannot be sent as an HTTP header value are skipped with a
    /// warning, so the handshake check and the CORS layer see the same list.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let entries: Vec<String> = raw
            .split(',')
            .map(|s| s.trim().trim_end_matches('/'))
            .filter(|s| !s.is_empty())
            .filter(|s| {
                let valid = HeaderValue::from_str(s).is_ok();
                if !valid {
                    tracing::warn!(origin = %s.escape_debug(), "skipping invalid allowed origin");
                }
                valid
            })
            .map(str::to_string)
            .collect();
        if entries.iter().any(|s| s == "*") {
            Self::Any
        } else {
            Self::List(entries)
        }
    }

    /// Returns `true` if a handshake carrying `origin` may proceed.
    ///
    /// A missing header only passes under [`Self::Any`].
    #[must_use]
    pub fn permits(&self, origin: Option<&str>) -> bool {
        match (self, origin) {
            (Self::Any, _) => true,
            (Self::List(_), None) => false,
            (Self::List(list), Some(origin)) => {
                let origin = origin.trim_end_matches('/');
                list.iter().any(|allowed| allowed.eq_ignore_ascii_case(origin))
            }
        }
    }

    /// Builds the CORS layer for the HTTP routes.
    #[must_use]
    pub fn cors_layer(&self) -> CorsLayer {
        match self {
            Self::Any => CorsLayer::permissive(),
            Self::List(list) => {
                let origins: Vec<HeaderValue> = list
                    .iter()
                    .filter_map(|o| match HeaderValue::from_str(o) {
                        Ok(value) => Some(value),
                        Err(_) => {
                            tracing::warn!(origin = %o.escape_debug(), "origin left out of CORS layer");
                            None
                        }
                    })
                    .collect();
                CorsLayer::new()
                    .allow_origin(AllowOrigin::list(origins))
                    .allow_methods(Any)
                    .allow_headers(Any)
            }
        }
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().map(|v| v.to_ascii_lowercase()).as_deref() {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        _ => default,
    }
}

fn seconds_or_disabled(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
