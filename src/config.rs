/*!
Layered service configuration (§6 "Configuration"): defaults, then an optional YAML file, then
environment overrides (`APP_` prefix, `__` nesting separator), deserialized with `serde` the way
the `config` crate's builder is meant to be used.
*/
use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub instance_id: String,
    pub http_listen: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    pub ca_file: Option<String>,
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SaslConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Only `PLAIN` is recognized (§6).
    pub mechanism: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerGroupConfig {
    pub group_id: String,
    pub topics: Vec<String>,
    #[serde(default)]
    pub raw_mode: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    pub brokers: Vec<String>,
    pub client_id: String,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub sasl: SaslConfig,
    pub state: ConsumerGroupConfig,
    pub history: ConsumerGroupConfig,
    #[serde(default = "default_fetch_max_bytes")]
    pub fetch_max_bytes: usize,
}

fn default_fetch_max_bytes() -> usize {
    50 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    pub dsn: String,
    #[serde(default = "default_max_conns")]
    pub max_conns: u32,
    #[serde(default = "default_min_conns")]
    pub min_conns: u32,
}

fn default_max_conns() -> u32 {
    10
}
fn default_min_conns() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub channel_buffer_size: usize,
    pub max_payload_bytes: usize,
    #[serde(default)]
    pub store_raw_bytes: bool,
    #[serde(default)]
    pub store_raw_bytes_compress: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    pub days: u32,
    pub timezone: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RouterOverride {
    pub name: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub broker: BrokerConfig,
    pub db: DbConfig,
    pub ingest: IngestConfig,
    pub retention: RetentionConfig,
    #[serde(default)]
    pub routers: HashMap<String, RouterOverride>,
}

impl AppConfig {
    /// Validates the cross-field invariants §6 names explicitly (ranges, the
    /// `max_payload_bytes <= broker.fetch_max_bytes` relation, IANA zone well-formedness).
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.ingest.batch_size > 0, "ingest.batch_size must be > 0");
        anyhow::ensure!(self.ingest.flush_interval_ms > 0, "ingest.flush_interval_ms must be > 0");
        anyhow::ensure!(self.ingest.channel_buffer_size > 0, "ingest.channel_buffer_size must be > 0");
        anyhow::ensure!(self.ingest.max_payload_bytes > 0, "ingest.max_payload_bytes must be > 0");
        anyhow::ensure!(
            self.ingest.max_payload_bytes <= self.broker.fetch_max_bytes,
            "ingest.max_payload_bytes must not exceed broker.fetch_max_bytes"
        );
        anyhow::ensure!(self.retention.days > 0, "retention.days must be > 0");
        anyhow::ensure!(
            self.retention.timezone == "UTC" || self.retention.timezone.contains('/'),
            "retention.timezone is not a valid IANA zone: {}",
            self.retention.timezone
        );
        if self.broker.sasl.enabled {
            anyhow::ensure!(
                self.broker.sasl.mechanism.as_deref() == Some("PLAIN"),
                "broker.sasl.mechanism must be PLAIN when sasl is enabled"
            );
        }
        Ok(())
    }
}

/// Loads configuration: built-in defaults, overlaid by `path` if present, overlaid by
/// environment variables prefixed `APP_` with `__` as the nesting separator.
pub fn load(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let mut builder = config::Config::builder()
        .set_default("service.log_level", "info")?
        .set_default("service.shutdown_timeout_seconds", 30i64)?
        .set_default("broker.fetch_max_bytes", 50 * 1024 * 1024i64)?
        .set_default("db.max_conns", 10i64)?
        .set_default("db.min_conns", 1i64)?;

    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path));
    }
    builder = builder.add_source(
        config::Environment::with_prefix("APP")
            .separator("__")
            .try_parsing(true),
    );

    let raw = builder.build().context("building layered configuration")?;
    let cfg: AppConfig = raw.try_deserialize().context("deserializing configuration")?;
    cfg.validate()?;
    Ok(cfg)
}
