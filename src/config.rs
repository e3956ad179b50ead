use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::crypto::address_from_hex;
use crate::error::Error;
use crate::message::MESSAGE_DON_ID_MAX_LEN;

pub const DEFAULT_CONFIG_NAME: &str = "config";
pub const ENV_PREFIX: &str = "DON_GATEWAY";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConnectorGatewayConfig {
    pub id: String,
    pub url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WsClientConfig {
    pub handshake_timeout_millis: u64,
}

impl Default for WsClientConfig {
    fn default() -> Self {
        WsClientConfig {
            handshake_timeout_millis: 5_000,
        }
    }
}

/// Redial schedule: `min_millis * 2^attempt`, capped at `max_millis`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub min_millis: u64,
    pub max_millis: u64,
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            min_millis: 1_000,
            max_millis: 10_000,
            jitter: true,
        }
    }
}

fn default_auth_min_challenge_len() -> usize {
    10
}

fn default_auth_timestamp_tolerance_sec() -> u32 {
    10
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConnectorConfig {
    pub node_address: String,
    pub don_id: String,
    pub gateways: Vec<ConnectorGatewayConfig>,
    #[serde(default)]
    pub ws_client: WsClientConfig,
    #[serde(default = "default_auth_min_challenge_len")]
    pub auth_min_challenge_len: usize,
    #[serde(default = "default_auth_timestamp_tolerance_sec")]
    pub auth_timestamp_tolerance_sec: u32,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl ConnectorConfig {
    /// Checks everything that would otherwise fail only once the connector is running.
    pub fn validate(&self) -> crate::Result<()> {
        if self.don_id.is_empty() {
            return Err(Error::Config(String::from("empty don_id")));
        }
        if self.don_id.len() > MESSAGE_DON_ID_MAX_LEN {
            return Err(Error::Config(format!(
                "don_id longer than {} bytes",
                MESSAGE_DON_ID_MAX_LEN
            )));
        }
        address_from_hex(&self.node_address)
            .map_err(|_| Error::Config(format!("invalid node address {}", self.node_address)))?;

        let mut ids = HashSet::new();
        let mut urls = HashSet::new();
        for gateway in self.gateways.iter() {
            if gateway.id.is_empty() {
                return Err(Error::Config(String::from("empty gateway id")));
            }
            if !ids.insert(gateway.id.as_str()) {
                return Err(Error::Config(format!("duplicate gateway id {}", gateway.id)));
            }
            let url = Url::parse(&gateway.url)
                .map_err(|err| Error::Config(format!("gateway {} url: {}", gateway.id, err)))?;
            if !urls.insert(String::from(url.as_str())) {
                return Err(Error::Config(format!("duplicate gateway url {}", gateway.url)));
            }
        }
        if self.ws_client.handshake_timeout_millis == 0 {
            return Err(Error::Config(String::from("handshake timeout must be positive")));
        }
        if self.backoff.min_millis == 0 || self.backoff.max_millis < self.backoff.min_millis {
            return Err(Error::Config(String::from(
                "backoff needs 0 < min_millis <= max_millis",
            )));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub name: String,
    pub address: String,
}

/// Membership of one DON, as seen by the handlers serving it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DonConfig {
    pub don_id: String,
    pub members: Vec<NodeConfig>,
}

impl DonConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.don_id.is_empty() {
            return Err(Error::Config(String::from("empty don_id")));
        }
        if self.members.is_empty() {
            return Err(Error::Config(format!("DON {} has no members", self.don_id)));
        }
        let mut seen = HashSet::new();
        for member in self.members.iter() {
            address_from_hex(&member.address).map_err(|_| {
                Error::Config(format!("member {} has invalid address", member.name))
            })?;
            if !seen.insert(member.address.to_lowercase()) {
                return Err(Error::Config(format!("duplicate member {}", member.address)));
            }
        }
        Ok(())
    }

    pub fn member(&self, address: &str) -> Option<&NodeConfig> {
        self.members
            .iter()
            .find(|member| member.address.eq_ignore_ascii_case(address))
    }
}

/// Everything the node binary reads from its config file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NodeSettings {
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub private_key: Option<String>,
}

impl NodeSettings {
    /// Loads `<config_name>.{toml,json,yaml,..}`, overlaid with `DON_GATEWAY`-prefixed env vars.
    pub fn load(config_name: &str) -> crate::Result<NodeSettings> {
        let mut settings = config::Config::default();
        settings
            .merge(config::File::with_name(config_name))?
            .merge(config::Environment::with_prefix(ENV_PREFIX).separator("__"))?;
        NodeSettings::from_settings(&settings)
    }

    pub fn from_settings(settings: &config::Config) -> crate::Result<NodeSettings> {
        let connector = settings.get::<ConnectorConfig>("connector")?;
        let private_key = settings.get::<Option<String>>("private_key").unwrap_or(None);
        connector.validate()?;
        Ok(NodeSettings {
            connector,
            private_key,
        })
    }
}
