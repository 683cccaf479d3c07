//! Layered configuration (§3, §9 "Configuration layering" open question):
//! defaults, then an optional YAML file, then environment variables
//! prefixed `GATEWAY_`, via `figment` — the same layering shape the
//! teacher's services use for settings.

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub broker_url: String,
    pub request_exchange: String,
    pub gateway_exchange: String,
    pub request_deadline_ms: i64,
    pub sweep_interval_ms: u64,
    pub resolver_max_depth: usize,
    pub http_bind_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker_url: "amqp://127.0.0.1:5672/%2f".to_string(),
            request_exchange: "request".to_string(),
            gateway_exchange: "gateway".to_string(),
            request_deadline_ms: 15_000,
            sweep_interval_ms: 2_000,
            resolver_max_depth: 2,
            http_bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Config {
    /// Loads configuration from defaults, then `gateway.yaml` if present,
    /// then `GATEWAY_*` environment variables, in increasing precedence.
    pub fn load() -> Result<Self, GatewayError> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::file("gateway.yaml"))
            .merge(Env::prefixed("GATEWAY_"))
            .extract()
            .map_err(|err| GatewayError::Config(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = Config::default();
        assert_eq!(config.request_deadline_ms, 15_000);
        assert_eq!(config.sweep_interval_ms, 2_000);
        assert_eq!(config.resolver_max_depth, 2);
    }

    #[test]
    fn env_override_takes_precedence_over_defaults() {
        std::env::set_var("GATEWAY_HTTP_BIND_ADDR", "127.0.0.1:9999");
        let config = Config::load().unwrap();
        assert_eq!(config.http_bind_addr, "127.0.0.1:9999");
        std::env::remove_var("GATEWAY_HTTP_BIND_ADDR");
    }
}
