use std::fs;

use anyhow::Context;
use serde_derive::Deserialize;

use crate::consts;

#[derive(Deserialize, Default, Debug, Clone)]
pub struct Config {
    /// The TCP port the daemon listens on. 8998 by default.
    pub port: Option<u16>,
    /// shell overrides the program spawned for new sessions.
    /// `sh` by default; it is always invoked with `-i`.
    pub shell: Option<String>,
    /// Cap, in bytes, on the rolling output buffer kept per
    /// session. 64KiB by default.
    pub output_buffer_bytes: Option<usize>,
    /// How long, in milliseconds, the daemon waits for attachments
    /// to wind down during graceful shutdown. 1000 by default.
    pub shutdown_grace_ms: Option<u64>,
}

impl Config {
    pub fn load(config_file: Option<&str>) -> anyhow::Result<Config> {
        let mut config = Config::default();
        if let Some(config_path) = config_file {
            let config_str = fs::read_to_string(config_path).context("reading config toml")?;
            config = toml::from_str(&config_str).context("parsing config file")?;
        }
        Ok(config)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(consts::SERVER_PORT)
    }

    pub fn shell(&self) -> &str {
        self.shell.as_deref().unwrap_or("sh")
    }

    pub fn output_buffer_bytes(&self) -> usize {
        self.output_buffer_bytes.unwrap_or(consts::OUTPUT_BUF_BYTES)
    }

    pub fn shutdown_grace(&self) -> std::time::Duration {
        self.shutdown_grace_ms
            .map(std::time::Duration::from_millis)
            .unwrap_or(consts::SHUTDOWN_GRACE)
    }
}
