//! `meshd.toml` configuration — maps 1:1 onto the recognized keys in
//! spec.md §6.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MeshConfig {
    pub gateway: GatewayConfig,
    pub nats: NatsConfig,
    #[serde(default)]
    pub daq: DaqConfig,
    /// Emulator pacing — out of core per spec.md §1, carried only so a
    /// config file written for the emulator parses unchanged.
    #[serde(default)]
    pub emulator: EmulatorConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    pub comm_host: String,
    pub comm_port: u16,
    pub ad_listen_port: u16,
    pub ad_respond_port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NatsConfig {
    /// Internal bus URL — out of core; the pipeline only publishes
    /// externally, but the key is recognized so existing config files
    /// round-trip.
    #[serde(default)]
    pub server: Option<String>,
    pub external_publish_server: String,
    pub external_mesh_topic: String,
    #[serde(default)]
    pub command_topic: Option<String>,
    #[serde(default)]
    pub response_topic: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DaqConfig {
    #[serde(default = "DaqConfig::default_throttle_delay")]
    pub throttle_delay: f64,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default = "DaqConfig::default_backpressure_qsize")]
    pub backpressure_qsize: usize,
}

impl DaqConfig {
    fn default_throttle_delay() -> f64 {
        0.01
    }
    fn default_backpressure_qsize() -> usize {
        1000
    }
}

impl Default for DaqConfig {
    fn default() -> Self {
        Self {
            throttle_delay: Self::default_throttle_delay(),
            compression: CompressionConfig::default(),
            backpressure_qsize: Self::default_backpressure_qsize(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompressionConfig {
    #[serde(default = "CompressionConfig::default_batch_on")]
    pub batch_on: i64,
    #[serde(default = "CompressionConfig::default_batch_at")]
    pub batch_at: f64,
}

impl CompressionConfig {
    fn default_batch_on() -> i64 {
        500
    }
    fn default_batch_at() -> f64 {
        60.0
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self { batch_on: Self::default_batch_on(), batch_at: Self::default_batch_at() }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EmulatorConfig {
    pub panel_delay: Option<f64>,
    pub cycle_delay: Option<f64>,
}

impl MeshConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let cfg: Self = toml::from_str(&text)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(cfg)
    }

    /// A runnable default config matching the field mesh's usual bind
    /// host and the test suite's `batch_on=4, batch_at=0.5` tunables
    /// noted in spec.md §6 — printed by `meshd init`.
    pub fn default_example() -> Self {
        Self {
            gateway: GatewayConfig {
                comm_host: "0.0.0.0".into(),
                comm_port: 7733,
                ad_listen_port: 59991,
                ad_respond_port: 59992,
            },
            nats: NatsConfig {
                server: Some("nats://127.0.0.1:4222".into()),
                external_publish_server: "nats://egress.example.internal:4222".into(),
                external_mesh_topic: "mesh.telemetry".into(),
                command_topic: Some("mesh.command.request".into()),
                response_topic: Some("mesh.command.response".into()),
            },
            daq: DaqConfig::default(),
            emulator: EmulatorConfig::default(),
        }
    }
}
