use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration settings for the gateway.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub handshake: HandshakeSettings,
    pub heartbeat: HeartbeatSettings,
    pub broker: BrokerSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Rejects timer values the gateway can't run with: zero intervals and
    /// a ready ack that would land after the handshake deadline.
    pub fn validate(&self) -> Result<(), String> {
        if self.heartbeat.interval_secs == 0 {
            return Err("heartbeat.interval_secs must be greater than zero".into());
        }
        if self.handshake.timeout_ms == 0 {
            return Err("handshake.timeout_ms must be greater than zero".into());
        }
        if self.handshake.ack_delay_ms >= self.handshake.timeout_ms {
            return Err(format!(
                "handshake.ack_delay_ms ({}) must be less than handshake.timeout_ms ({})",
                self.handshake.ack_delay_ms, self.handshake.timeout_ms
            ));
        }
        if self.broker.ready_timeout_ms == 0 {
            return Err("broker.ready_timeout_ms must be greater than zero".into());
        }
        if self.broker.reconnect_interval_ms == 0 {
            return Err("broker.reconnect_interval_ms must be greater than zero".into());
        }
        Ok(())
    }
}

/// Address the WebSocket listener binds to.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Credential lookup and verification.
///
/// `secrets` is tried in order; a token signed with any of them is accepted,
/// which lets several issuers (or an old and a new key) coexist.
#[derive(Debug, Deserialize, Clone)]
pub struct AuthSettings {
    pub secrets: Vec<String>,
    pub query_param: String,
    pub cookie_name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HandshakeSettings {
    pub ack_delay_ms: u64,
    pub timeout_ms: u64,
}

impl HandshakeSettings {
    pub fn ack_delay(&self) -> Duration {
        Duration::from_millis(self.ack_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HeartbeatSettings {
    pub interval_secs: u64,
}

impl HeartbeatSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Pub/sub broker connection. `url` is either a `redis://` URL or
/// `memory://` for the in-process broker.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub url: String,
    pub ready_timeout_ms: u64,
    pub reconnect_interval_ms: u64,
}

impl BrokerSettings {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub auth: Option<PartialAuthSettings>,
    pub handshake: Option<PartialHandshakeSettings>,
    pub heartbeat: Option<PartialHeartbeatSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialAuthSettings {
    pub secrets: Option<Vec<String>>,
    pub query_param: Option<String>,
    pub cookie_name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialHandshakeSettings {
    pub ack_delay_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialHeartbeatSettings {
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub url: Option<String>,
    pub ready_timeout_ms: Option<u64>,
    pub reconnect_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl PartialSettings {
    /// Overlay whatever was provided onto `defaults`.
    pub fn merge(self, defaults: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let auth = self.auth.unwrap_or_default();
        let handshake = self.handshake.unwrap_or_default();
        let heartbeat = self.heartbeat.unwrap_or_default();
        let broker = self.broker.unwrap_or_default();
        let logging = self.logging.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(defaults.server.host),
                port: server.port.unwrap_or(defaults.server.port),
            },
            auth: AuthSettings {
                secrets: auth
                    .secrets
                    .map(|secrets| {
                        secrets
                            .into_iter()
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty())
                            .collect()
                    })
                    .unwrap_or(defaults.auth.secrets),
                query_param: auth.query_param.unwrap_or(defaults.auth.query_param),
                cookie_name: auth.cookie_name.unwrap_or(defaults.auth.cookie_name),
            },
            handshake: HandshakeSettings {
                ack_delay_ms: handshake
                    .ack_delay_ms
                    .unwrap_or(defaults.handshake.ack_delay_ms),
                timeout_ms: handshake.timeout_ms.unwrap_or(defaults.handshake.timeout_ms),
            },
            heartbeat: HeartbeatSettings {
                interval_secs: heartbeat
                    .interval_secs
                    .unwrap_or(defaults.heartbeat.interval_secs),
            },
            broker: BrokerSettings {
                url: broker.url.unwrap_or(defaults.broker.url),
                ready_timeout_ms: broker
                    .ready_timeout_ms
                    .unwrap_or(defaults.broker.ready_timeout_ms),
                reconnect_interval_ms: broker
                    .reconnect_interval_ms
                    .unwrap_or(defaults.broker.reconnect_interval_ms),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(defaults.logging.level),
            },
        }
    }
}

/// Provides default values for `Settings`.
///
/// No signing secrets are configured by default, so every connection is
/// rejected until `auth.secrets` is set.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            auth: AuthSettings {
                secrets: Vec::new(),
                query_param: "token".to_string(),
                cookie_name: "token".to_string(),
            },
            handshake: HandshakeSettings {
                ack_delay_ms: 100,
                timeout_ms: 5_000,
            },
            heartbeat: HeartbeatSettings { interval_secs: 30 },
            broker: BrokerSettings {
                url: "redis://127.0.0.1:6379".to_string(),
                ready_timeout_ms: 5_000,
                reconnect_interval_ms: 2_000,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}
