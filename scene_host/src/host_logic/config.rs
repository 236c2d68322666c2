use anyhow::{Context, Result};
use clap::Parser;
use lib_scene::EngineConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Headless scene engine host speaking JSON lines on stdin/stdout", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "SCENE_HOST_CONFIG_PATH", help = "Path to the JSON host configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "SCENE_HOST_ENGINE_CONFIG", help = "Path to the JSON engine configuration file.")]
    pub engine_config_path: Option<PathBuf>,

    #[clap(long, env = "SCENE_HOST_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "SCENE_HOST_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "SCENE_HOST_TICK_INTERVAL_MS", help = "Interval in milliseconds between memory monitor ticks.")]
    pub monitor_tick_interval_ms: Option<u64>,

    #[clap(long, env = "SCENE_HOST_HEAP_BUDGET_MB", help = "Memory budget in MB; defaults to physical memory.")]
    pub heap_budget_mb: Option<u64>,

    #[clap(long, env = "SCENE_HOST_LOW_MEMORY_MB", help = "Available memory in MB below which the OS is considered low on memory.")]
    pub low_memory_threshold_mb: Option<u64>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            engine_config_path: other.engine_config_path.or(self.engine_config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            monitor_tick_interval_ms: other.monitor_tick_interval_ms.or(self.monitor_tick_interval_ms),
            heap_budget_mb: other.heap_budget_mb.or(self.heap_budget_mb),
            low_memory_threshold_mb: other.low_memory_threshold_mb.or(self.low_memory_threshold_mb),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// Engine settings: the engine file (or defaults) with host overrides on top.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let mut engine = match &self.engine_config_path {
            Some(path) => EngineConfig::from_json_file(path)
                .with_context(|| format!("loading engine config {}", path.display()))?,
            None => EngineConfig::default(),
        };
        if let Some(ms) = self.monitor_tick_interval_ms {
            engine.monitor_tick_interval_ms = ms;
        }
        if self.heap_budget_mb.is_some() {
            engine.heap_budget_mb = self.heap_budget_mb;
        }
        if let Some(mb) = self.low_memory_threshold_mb {
            engine.low_memory_threshold_mb = mb;
        }
        engine.validate().context("invalid engine configuration")?;
        Ok(engine)
    }
}

fn defaults() -> Config {
    Config {
        log_dir: Some(PathBuf::from("./logs")),
        log_level: Some("info".to_string()),
        ..Default::default()
    }
}

/// Layers the host file over the defaults.
fn apply_file(current: Config, config_file_path: &PathBuf) -> Config {
    if !config_file_path.exists() {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config_file_path.display()
        );
        return current;
    }
    match fs::read_to_string(config_file_path) {
        Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
            Ok(file_config) => current.merge(file_config),
            Err(_) => {
                log::warn!(
                    "Failed to parse config file: {}. Falling back to other sources.",
                    config_file_path.display()
                );
                current
            }
        },
        Err(_) => {
            log::warn!(
                "Failed to read config file: {}. Falling back to other sources.",
                config_file_path.display()
            );
            current
        }
    }
}

pub fn load_config() -> Config {
    // 1. Defaults, 2. host config file, 3. environment variables and CLI arguments.
    let cli_args = Config::parse();
    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("scene_host.conf"));

    apply_file(defaults(), &config_file_path).merge(cli_args)
}
