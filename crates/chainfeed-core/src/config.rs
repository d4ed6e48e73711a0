//! Connection configuration and the process-wide client version.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::handler::HandlerKind;
use crate::transport::Endpoint;

pub const AUTH_HEADER: &str = "Authorization";
pub const BLOCKCHAIN_HEADER: &str = "X-BloXroute-Blockchain";
pub const VERSION_HEADER: &str = "X-BloXroute-SDK-Version";
pub const LANGUAGE_HEADER: &str = "X-BloXroute-Code-Language";

pub const DEFAULT_NETWORK: &str = "Mainnet";

static CLIENT_VERSION: OnceLock<String> = OnceLock::new();

/// Set the client version announced on every connection. Only the first
/// call has an effect; returns `false` if a version was already set.
pub fn init_client_version(version: impl Into<String>) -> bool {
    CLIENT_VERSION.set(version.into()).is_ok()
}

/// The client version set by [`init_client_version`], or this crate's
/// version.
pub fn client_version() -> &'static str {
    CLIENT_VERSION
        .get()
        .map(String::as_str)
        .unwrap_or(env!("CARGO_PKG_VERSION"))
}

/// Handler configuration.
///
/// Exactly one endpoint is used, chosen in order: WebSocket cloud API,
/// WebSocket gateway, gRPC gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ws_cloud_api_url: Option<String>,
    #[serde(default)]
    pub ws_gateway_url: Option<String>,
    #[serde(default)]
    pub grpc_gateway_url: Option<String>,

    /// Sent verbatim as the authorization value. Derived from
    /// `account_id` and `secret` when absent.
    #[serde(default)]
    pub auth_header: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,

    #[serde(default = "default_network")]
    pub blockchain_network: String,

    /// Reconnect and resubscribe after the connection drops.
    #[serde(default = "default_true")]
    pub reconnect: bool,

    /// Outbound messages buffered before the connection is dropped.
    #[serde(default = "default_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Largest inbound message accepted, in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    #[serde(default)]
    pub timeouts: Timeouts,
}

fn default_network() -> String {
    DEFAULT_NETWORK.to_string()
}

fn default_true() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_max_message_size() -> usize {
    15 * 1024 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_cloud_api_url: None,
            ws_gateway_url: None,
            grpc_gateway_url: None,
            auth_header: None,
            account_id: None,
            secret: None,
            blockchain_network: default_network(),
            reconnect: true,
            outbound_queue_capacity: default_queue_capacity(),
            max_message_size: default_max_message_size(),
            timeouts: Timeouts::default(),
        }
    }
}

impl Config {
    pub fn cloud_api(url: impl Into<String>, auth_header: impl Into<String>) -> Self {
        Self {
            ws_cloud_api_url: Some(url.into()),
            auth_header: Some(auth_header.into()),
            ..Default::default()
        }
    }

    pub fn ws_gateway(url: impl Into<String>, auth_header: impl Into<String>) -> Self {
        Self {
            ws_gateway_url: Some(url.into()),
            auth_header: Some(auth_header.into()),
            ..Default::default()
        }
    }

    pub fn grpc_gateway(url: impl Into<String>, auth_header: impl Into<String>) -> Self {
        Self {
            grpc_gateway_url: Some(url.into()),
            auth_header: Some(auth_header.into()),
            ..Default::default()
        }
    }

    /// Load a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let (kind, url) = self.endpoint()?;
        match kind {
            HandlerKind::CloudApiWs | HandlerKind::GatewayWs => {
                if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                    return Err(ConfigError::InvalidUrl {
                        url: url.to_string(),
                        reason: "expected a ws:// or wss:// URL".into(),
                    });
                }
            }
            HandlerKind::GatewayGrpc => {
                if url.trim().is_empty() || url.starts_with("ws") {
                    return Err(ConfigError::InvalidUrl {
                        url: url.to_string(),
                        reason: "expected host:port or an http(s):// URL".into(),
                    });
                }
            }
        }
        self.auth_header_value()?;
        Ok(())
    }

    /// The endpoint kind and URL this configuration selects.
    pub fn endpoint(&self) -> Result<(HandlerKind, &str), ConfigError> {
        fn pick(url: &Option<String>) -> Option<&str> {
            url.as_deref().filter(|u| !u.is_empty())
        }
        if let Some(url) = pick(&self.ws_cloud_api_url) {
            Ok((HandlerKind::CloudApiWs, url))
        } else if let Some(url) = pick(&self.ws_gateway_url) {
            Ok((HandlerKind::GatewayWs, url))
        } else if let Some(url) = pick(&self.grpc_gateway_url) {
            Ok((HandlerKind::GatewayGrpc, url))
        } else {
            Err(ConfigError::NoEndpoint)
        }
    }

    /// The authorization value: the explicit header, or
    /// `base64(account_id:secret)`.
    pub fn auth_header_value(&self) -> Result<String, ConfigError> {
        if let Some(header) = self.auth_header.as_deref().filter(|h| !h.is_empty()) {
            return Ok(header.to_string());
        }
        match (self.account_id.as_deref(), self.secret.as_deref()) {
            (Some(account), Some(secret)) if !account.is_empty() && !secret.is_empty() => {
                Ok(STANDARD.encode(format!("{account}:{secret}")))
            }
            _ => Err(ConfigError::NoCredentials),
        }
    }

    /// Handshake headers for the selected WebSocket endpoint.
    pub fn ws_endpoint(&self) -> Result<Endpoint, ConfigError> {
        let (_, url) = self.endpoint()?;
        Ok(Endpoint::new(url)
            .with_header(AUTH_HEADER, self.auth_header_value()?)
            .with_header(BLOCKCHAIN_HEADER, &self.blockchain_network)
            .with_header(VERSION_HEADER, client_version())
            .with_header(LANGUAGE_HEADER, "rust"))
    }
}

/// Wait ceilings and backoff intervals. Serialized as milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// How long a request or subscribe waits for its reply.
    #[serde(with = "duration_ms")]
    pub request_wait: Duration,
    #[serde(with = "duration_ms")]
    pub unsubscribe_ceiling: Duration,
    #[serde(with = "duration_ms")]
    pub unsubscribe_initial: Duration,
    #[serde(with = "duration_ms")]
    pub reconnect_ceiling: Duration,
    #[serde(with = "duration_ms")]
    pub reconnect_initial: Duration,
    /// How long `close` waits for the read loop to exit.
    #[serde(with = "duration_ms")]
    pub close_wait: Duration,
    #[serde(with = "duration_ms")]
    pub grpc_unsubscribe_wait: Duration,
    #[serde(with = "duration_ms")]
    pub handshake: Duration,
    #[serde(with = "duration_ms")]
    pub grpc_dial: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            request_wait: Duration::from_secs(60),
            unsubscribe_ceiling: Duration::from_secs(10),
            unsubscribe_initial: Duration::from_millis(100),
            reconnect_ceiling: Duration::from_secs(60),
            reconnect_initial: Duration::from_millis(100),
            close_wait: Duration::from_millis(200),
            grpc_unsubscribe_wait: Duration::from_secs(5),
            handshake: Duration::from_secs(15),
            grpc_dial: Duration::from_secs(15),
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_empty_json() {
        let cfg: Config = serde_json::from_str(r#"{"ws_gateway_url":"ws://127.0.0.1:28333/ws"}"#)
            .unwrap();
        assert_eq!(cfg.blockchain_network, "Mainnet");
        assert!(cfg.reconnect);
        assert_eq!(cfg.outbound_queue_capacity, 1000);
        assert_eq!(cfg.max_message_size, 15 * 1024 * 1024);
        assert_eq!(cfg.timeouts.request_wait, Duration::from_secs(60));
        assert_eq!(cfg.timeouts.close_wait, Duration::from_millis(200));
    }

    #[test]
    fn timeouts_are_milliseconds() {
        let cfg: Config = serde_json::from_str(
            r#"{"ws_gateway_url":"ws://x","timeouts":{"request_wait":250}}"#,
        )
        .unwrap();
        assert_eq!(cfg.timeouts.request_wait, Duration::from_millis(250));
        assert_eq!(cfg.timeouts.reconnect_ceiling, Duration::from_secs(60));
    }

    #[test]
    fn endpoint_precedence() {
        let mut cfg = Config {
            ws_gateway_url: Some("ws://gw".into()),
            grpc_gateway_url: Some("127.0.0.1:5001".into()),
            ..Default::default()
        };
        assert_eq!(cfg.endpoint().unwrap(), (HandlerKind::GatewayWs, "ws://gw"));
        cfg.ws_cloud_api_url = Some("wss://cloud".into());
        assert_eq!(cfg.endpoint().unwrap(), (HandlerKind::CloudApiWs, "wss://cloud"));
        cfg.ws_cloud_api_url = None;
        cfg.ws_gateway_url = None;
        assert_eq!(
            cfg.endpoint().unwrap(),
            (HandlerKind::GatewayGrpc, "127.0.0.1:5001")
        );
        cfg.ws_cloud_api_url = Some(String::new());
        assert_eq!(cfg.endpoint().unwrap().0, HandlerKind::GatewayGrpc);
    }

    #[test]
    fn validation_errors() {
        assert_eq!(Config::default().validate(), Err(ConfigError::NoEndpoint));

        let no_creds = Config {
            ws_gateway_url: Some("ws://gw".into()),
            ..Default::default()
        };
        assert_eq!(no_creds.validate(), Err(ConfigError::NoCredentials));

        let bad_scheme = Config::cloud_api("https://cloud", "h");
        assert!(matches!(
            bad_scheme.validate(),
            Err(ConfigError::InvalidUrl { .. })
        ));

        assert!(Config::grpc_gateway("127.0.0.1:5001", "h").validate().is_ok());
    }

    #[test]
    fn auth_header_derived_from_account() {
        let cfg = Config {
            ws_gateway_url: Some("ws://gw".into()),
            account_id: Some("acc".into()),
            secret: Some("sec".into()),
            ..Default::default()
        };
        assert_eq!(cfg.auth_header_value().unwrap(), STANDARD.encode("acc:sec"));

        let explicit = Config::ws_gateway("ws://gw", "explicit");
        assert_eq!(explicit.auth_header_value().unwrap(), "explicit");
    }

    #[test]
    fn ws_endpoint_headers() {
        let cfg = Config::cloud_api("wss://cloud", "token");
        let ep = cfg.ws_endpoint().unwrap();
        assert_eq!(ep.url, "wss://cloud");
        let get = |name: &str| {
            ep.headers
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(get(AUTH_HEADER).as_deref(), Some("token"));
        assert_eq!(get(BLOCKCHAIN_HEADER).as_deref(), Some("Mainnet"));
        assert_eq!(get(VERSION_HEADER).as_deref(), Some(client_version()));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = Config::from_json_file("/nonexistent/chainfeed.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
