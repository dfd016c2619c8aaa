use serde::Deserialize;

use roomguard_shared::middleware::is_development_secret;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub store_backend: StoreBackend,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_redis_namespace")]
    pub redis_namespace: String,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_marker_ttl")]
    pub marker_ttl_secs: u64,
    /// Comma-separated identities added to the admin allow-list at startup.
    #[serde(default)]
    pub seed_admins: String,
    #[serde(default = "default_true")]
    pub relay_enabled: bool,
    #[serde(default = "default_relay_email")]
    pub relay_operator_email: String,
    #[serde(default = "default_relay_uid")]
    pub relay_operator_uid: String,
    #[serde(default = "default_true")]
    pub relay_mark_unknown_processed: bool,
}

fn default_port() -> u16 { 3006 }
fn default_redis_url() -> String { "redis://127.0.0.1:6379".into() }
fn default_redis_namespace() -> String { "roomguard".into() }
fn default_history_limit() -> usize { 200 }
fn default_marker_ttl() -> u64 { 86_400 }
fn default_true() -> bool { true }
fn default_relay_email() -> String { "relay@roomguard.local".into() }
fn default_relay_uid() -> String { "roomguard-relay".into() }

impl AppConfig {
    /// Reads `ROOMGUARD__*` environment variables (`ROOMGUARD__PORT`,
    /// `ROOMGUARD__STORE_BACKEND`, ...). Unset keys take their defaults.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("ROOMGUARD").separator("__"))
            .build()?;
        Self::from_config(config)
    }

    pub fn from_config(config: config::Config) -> anyhow::Result<Self> {
        Ok(config.try_deserialize()?)
    }

    /// The relay runs, and its operator is put on the allow-list, only when
    /// tokens are signed with a real secret. Under the development fallback
    /// anyone could mint a token for the operator.
    pub fn relay_active(&self, jwt_secret: &str) -> bool {
        self.relay_enabled && !is_development_secret(jwt_secret)
    }

    pub fn seed_admin_list(&self) -> Vec<String> {
        self.seed_admins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}
