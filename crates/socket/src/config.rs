//! Socket configuration
//!
//! A port of 0 means the corresponding role (sender or listener) is not
//! configured. The WebSocket transport runs both roles over one socket, so its
//! two ports are tied together by [`SocketConfig::validate`].

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use eventsock_protocol::{CodecType, TransportKind, TransportSettings, JSON_CODEC_ID};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SocketError};

/// Default bound on a single send attempt, in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 3000;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_codec_id() -> u8 {
    JSON_CODEC_ID
}

/// Full configuration of an [`EventSocket`](crate::EventSocket)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketConfig {
    /// Remote address of the default route; also the listen address unless
    /// `bind_address` overrides it
    pub address: IpAddr,

    #[serde(default)]
    pub send_port: u16,

    #[serde(default)]
    pub receive_port: u16,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    pub transport: TransportKind,

    /// 1 = JSON, 2 = Postcard
    #[serde(default = "default_codec_id")]
    pub codec_id: u8,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<IpAddr>,
}

impl SocketConfig {
    /// Creates a configuration with no roles attached
    pub fn new(address: IpAddr, transport: TransportKind) -> Self {
        Self {
            address,
            send_port: 0,
            receive_port: 0,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            transport,
            codec_id: JSON_CODEC_ID,
            bind_address: None,
        }
    }

    pub fn with_send_port(mut self, port: u16) -> Self {
        self.send_port = port;
        self
    }

    pub fn with_receive_port(mut self, port: u16) -> Self {
        self.receive_port = port;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_codec_id(mut self, codec_id: u8) -> Self {
        self.codec_id = codec_id;
        self
    }

    pub fn with_bind_address(mut self, bind_address: IpAddr) -> Self {
        self.bind_address = Some(bind_address);
        self
    }

    /// Parses a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| SocketError::Configuration(format!("invalid configuration: {e}")))
    }

    /// Normalizes and checks the configuration
    ///
    /// For WebSocket, a single nonzero port is copied to the other one; two
    /// different nonzero ports are rejected.
    pub fn validate(&mut self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(SocketError::Configuration(
                "timeout must be greater than 0 ms".into(),
            ));
        }

        self.codec()?;

        if self.transport == TransportKind::WebSocket {
            match (self.send_port, self.receive_port) {
                (0, 0) => {
                    return Err(SocketError::Configuration(
                        "WebSocket transport needs a port to connect to".into(),
                    ))
                }
                (0, receive) => self.send_port = receive,
                (send, 0) => self.receive_port = send,
                (send, receive) if send != receive => {
                    return Err(SocketError::Configuration(format!(
                        "WebSocket send port ({send}) and receive port ({receive}) must be equal"
                    )))
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Codec selected by `codec_id`
    pub fn codec(&self) -> Result<CodecType> {
        CodecType::from_id(self.codec_id)
            .map_err(|e| SocketError::Configuration(e.to_string()))
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// `address:send_port`, or `None` when no sender role is configured
    pub fn default_route(&self) -> Option<SocketAddr> {
        (self.send_port != 0).then(|| SocketAddr::new(self.address, self.send_port))
    }

    /// Local endpoint the receive loop binds
    pub fn listen_endpoint(&self) -> SocketAddr {
        SocketAddr::new(
            self.bind_address.unwrap_or(self.address),
            self.receive_port,
        )
    }

    pub fn transport_settings(&self) -> Result<TransportSettings> {
        Ok(TransportSettings {
            address: self.address,
            send_port: self.send_port,
            receive_port: self.receive_port,
            timeout: self.timeout(),
            codec: self.codec()?,
        })
    }
}

/// Fields to override on [`EventSocket::reset`](crate::EventSocket::reset)
///
/// Unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetOptions {
    pub address: Option<IpAddr>,
    pub send_port: Option<u16>,
    pub receive_port: Option<u16>,
    pub timeout_ms: Option<u64>,
    pub transport: Option<TransportKind>,
    pub codec_id: Option<u8>,
}

impl ResetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn address(mut self, address: IpAddr) -> Self {
        self.address = Some(address);
        self
    }

    pub fn send_port(mut self, port: u16) -> Self {
        self.send_port = Some(port);
        self
    }

    pub fn receive_port(mut self, port: u16) -> Self {
        self.receive_port = Some(port);
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn codec_id(mut self, codec_id: u8) -> Self {
        self.codec_id = Some(codec_id);
        self
    }

    /// Returns `config` with the provided fields applied over it
    pub fn merge(&self, config: &SocketConfig) -> SocketConfig {
        SocketConfig {
            address: self.address.unwrap_or(config.address),
            send_port: self.send_port.unwrap_or(config.send_port),
            receive_port: self.receive_port.unwrap_or(config.receive_port),
            timeout_ms: self.timeout_ms.unwrap_or(config.timeout_ms),
            transport: self.transport.unwrap_or(config.transport),
            codec_id: self.codec_id.unwrap_or(config.codec_id),
            bind_address: config.bind_address,
        }
    }
}

/// Parses an IP literal, reporting failures as configuration errors
pub fn parse_address(address: &str) -> Result<IpAddr> {
    address
        .trim()
        .parse()
        .map_err(|e| SocketError::Configuration(format!("invalid address '{address}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventsock_protocol::POSTCARD_CODEC_ID;
    use std::net::Ipv4Addr;

    fn localhost() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    #[test]
    fn test_defaults() {
        let config = SocketConfig::new(localhost(), TransportKind::Udp);
        assert_eq!(config.timeout_ms, 3000);
        assert_eq!(config.codec_id, JSON_CODEC_ID);
        assert_eq!(config.default_route(), None);
    }

    #[test]
    fn test_websocket_receive_port_autofills() {
        let mut config = SocketConfig::new(localhost(), TransportKind::WebSocket).with_send_port(8080);
        config.validate().unwrap();
        assert_eq!(config.receive_port, 8080);
    }

    #[test]
    fn test_websocket_send_port_autofills() {
        let mut config =
            SocketConfig::new(localhost(), TransportKind::WebSocket).with_receive_port(8081);
        config.validate().unwrap();
        assert_eq!(config.send_port, 8081);
    }

    #[test]
    fn test_websocket_port_mismatch_rejected() {
        let mut config = SocketConfig::new(localhost(), TransportKind::WebSocket)
            .with_send_port(8080)
            .with_receive_port(8081);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, SocketError::Configuration(_)));
    }

    #[test]
    fn test_websocket_without_ports_rejected() {
        let mut config = SocketConfig::new(localhost(), TransportKind::WebSocket);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tcp_ports_independent() {
        let mut config = SocketConfig::new(localhost(), TransportKind::Tcp)
            .with_send_port(7000)
            .with_receive_port(7001);
        config.validate().unwrap();
        assert_eq!(config.send_port, 7000);
        assert_eq!(config.receive_port, 7001);
    }

    #[test]
    fn test_unknown_codec_rejected() {
        let mut config = SocketConfig::new(localhost(), TransportKind::Tcp).with_codec_id(42);
        assert!(matches!(
            config.validate(),
            Err(SocketError::Configuration(_))
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = SocketConfig::new(localhost(), TransportKind::Udp).with_timeout_ms(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_listen_endpoint_prefers_bind_address() {
        let config = SocketConfig::new(localhost(), TransportKind::Udp)
            .with_receive_port(9000)
            .with_bind_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.listen_endpoint(), "0.0.0.0:9000".parse().unwrap());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = SocketConfig::from_json(
            r#"{"address":"127.0.0.1","send_port":9000,"transport":"udp"}"#,
        )
        .unwrap();
        assert_eq!(config.send_port, 9000);
        assert_eq!(config.receive_port, 0);
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(config.transport, TransportKind::Udp);
    }

    #[test]
    fn test_from_json_rejects_unknown_transport() {
        let result = SocketConfig::from_json(r#"{"address":"127.0.0.1","transport":"sctp"}"#);
        assert!(matches!(result, Err(SocketError::Configuration(_))));
    }

    #[test]
    fn test_reset_options_merge_only_provided_fields() {
        let config = SocketConfig::new(localhost(), TransportKind::Tcp)
            .with_send_port(7000)
            .with_timeout_ms(500);
        let merged = ResetOptions::new()
            .receive_port(7001)
            .codec_id(POSTCARD_CODEC_ID)
            .merge(&config);

        assert_eq!(merged.send_port, 7000);
        assert_eq!(merged.receive_port, 7001);
        assert_eq!(merged.timeout_ms, 500);
        assert_eq!(merged.codec_id, POSTCARD_CODEC_ID);
        assert_eq!(merged.transport, TransportKind::Tcp);
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("127.0.0.1").unwrap(), localhost());
        assert!(parse_address("::1").unwrap().is_loopback());
        assert!(parse_address("not-an-ip").is_err());
    }
}
