use printhub_telemetry::NormalizerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub printers: Vec<PrinterConf>,
    /// Broker receiving events and health; without one both are only logged.
    pub forward: Option<MqttConf>,
    pub health_interval_secs: u64,
    pub normalizer: NormalizerConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PrinterConf {
    /// Id used in snapshots and forwarded topics; defaults to the serial.
    pub id: Option<String>,
    pub serial: String,
    pub host: String,
    #[serde(default = "default_printer_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    /// LAN access code; `PRINTHUB_ACCESS_CODE_<ID>` is used when absent.
    pub access_code: Option<String>,
    /// CA certificate (PEM) enabling TLS; plain TCP without it.
    pub ca_file: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
}

fn default_printer_port() -> u16 {
    8883
}

fn default_username() -> String {
    "bblp".into()
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            printers: Vec::new(),
            forward: None,
            health_interval_secs: 30,
            normalizer: NormalizerConfig::default(),
        }
    }
}

impl PrinterConf {
    pub fn printer_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.serial)
    }

    pub fn access_code(&self) -> Option<String> {
        self.access_code
            .clone()
            .or_else(|| std::env::var(access_code_var(self.printer_id())).ok())
    }
}

/// Environment variable holding a printer's access code.
pub fn access_code_var(printer_id: &str) -> String {
    let suffix: String = printer_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("PRINTHUB_ACCESS_CODE_{suffix}")
}

pub fn parse_config(text: &str) -> anyhow::Result<KernelConfig> {
    if text.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    let cfg: KernelConfig = serde_yaml::from_str(text)?;
    if cfg.health_interval_secs == 0 {
        anyhow::bail!("health_interval_secs must be positive");
    }
    Ok(cfg)
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("PRINTHUB_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    load_config_from(Path::new(&path)).await
}

pub async fn load_config_from(path: &Path) -> KernelConfig {
    if !path.exists() {
        warn!(path = %path.display(), "no kernel config, using defaults");
        return KernelConfig::default();
    }
    let txt = fs::read_to_string(path).await.unwrap_or_default();
    match parse_config(&txt) {
        Ok(cfg) => {
            info!(path = %path.display(), printers = cfg.printers.len(), "kernel config loaded");
            cfg
        }
        Err(e) => {
            warn!(path = %path.display(), "invalid kernel config: {e:#}");
            KernelConfig::default()
        }
    }
}
