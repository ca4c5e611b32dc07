use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use serde::Deserialize;

use crate::mcp::server::TransportLimits;
use crate::sandbox::host::MAX_MEMORY_PAGES;
use crate::sandbox::{ResourceLimits, SandboxOptions};

/// 64 KiB wasm pages per MiB.
pub const WASM_PAGES_IN_MIB: u32 = 1024 / 64;

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Supports ${ENV_VAR} and ~ expansion
    pub path: String,
    pub max_image_size_mib: u64,
    pub memory_limit_mib: u32,
    pub timeout_ms: u64,
    pub max_output_bytes: usize,
    pub epoch_tick_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 12040,
            max_body_bytes: 1024 * 1024,
            request_timeout_ms: 10_000,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: "${HOME}/.cargo/bin/js-eval-boa.wasm".to_string(),
            max_image_size_mib: 16,
            memory_limit_mib: 64,
            timeout_ms: 100,
            max_output_bytes: 8 * 1024 * 1024,
            epoch_tick_ms: 10,
        }
    }
}

/// Command line flags. Each one overrides the matching config file value.
#[derive(Debug, Parser, Default)]
#[command(name = "js-eval-wasi", version, about = "JavaScript evaluator MCP server (WASI sandbox)")]
pub struct Cli {
    /// Optional TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(long)]
    pub port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Path to the WASM JavaScript engine
    #[arg(long = "path2engine")]
    pub engine_path: Option<String>,

    /// WASM memory limit in MiB
    #[arg(long)]
    pub mem: Option<u32>,

    /// WASM execution timeout in milliseconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Maximum WASM file size in MiB
    #[arg(long = "max-wasm-size")]
    pub max_wasm_size: Option<u64>,
}

impl Config {
    /// Reads a TOML config file. Missing sections and keys take defaults.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Builds the effective configuration: defaults, then the file named by
    /// `--config` (if any), then individual flags.
    pub fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(path) = &cli.engine_path {
            self.engine.path = path.clone();
        }
        if let Some(mem) = cli.mem {
            self.engine.memory_limit_mib = mem;
        }
        if let Some(timeout) = cli.timeout {
            self.engine.timeout_ms = timeout;
        }
        if let Some(max) = cli.max_wasm_size {
            self.engine.max_image_size_mib = max;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let engine = &self.engine;
        if engine.memory_limit_mib == 0 {
            bail!("memory limit must be at least 1 MiB");
        }
        if u64::from(engine.memory_limit_mib) * u64::from(WASM_PAGES_IN_MIB)
            > u64::from(MAX_MEMORY_PAGES)
        {
            bail!(
                "memory limit of {} MiB exceeds the 4096 MiB a 32-bit wasm memory can address",
                engine.memory_limit_mib
            );
        }
        if engine.timeout_ms == 0 {
            bail!("execution timeout must be greater than zero");
        }
        if engine.max_image_size_mib == 0 {
            bail!("maximum wasm size must be at least 1 MiB");
        }
        if engine.epoch_tick_ms == 0 {
            bail!("epoch tick must be greater than zero");
        }
        if self.server.max_body_bytes == 0 {
            bail!("maximum request body size must be greater than zero");
        }
        Ok(())
    }

    /// Engine path with ${VAR} and ~ expanded.
    pub fn engine_path(&self) -> anyhow::Result<PathBuf> {
        let expanded = shellexpand::full(&self.engine.path)
            .with_context(|| format!("failed to expand engine path {}", self.engine.path))?;
        Ok(PathBuf::from(expanded.into_owned()))
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .with_context(|| {
                format!(
                    "invalid listen address {}:{}",
                    self.server.host, self.server.port
                )
            })
    }
}

impl EngineConfig {
    pub fn memory_limit_pages(&self) -> u32 {
        self.memory_limit_mib * WASM_PAGES_IN_MIB
    }

    pub fn sandbox_options(&self) -> SandboxOptions {
        SandboxOptions {
            memory_limit_pages: self.memory_limit_pages(),
            max_output_bytes: self.max_output_bytes,
            epoch_tick: Duration::from_millis(self.epoch_tick_ms),
        }
    }

    pub fn resource_limits(&self) -> ResourceLimits {
        ResourceLimits {
            memory_limit_pages: self.memory_limit_pages(),
            execution_deadline: Duration::from_millis(self.timeout_ms),
        }
    }
}

impl ServerConfig {
    pub fn transport_limits(&self) -> TransportLimits {
        TransportLimits {
            max_body_bytes: self.max_body_bytes,
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}
