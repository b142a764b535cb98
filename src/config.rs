//! Recognized configuration options (spec.md §6.3).
//!
//! Configuration is loaded from TOML and deserialized into typed structs,
//! following the same serde-based configuration pattern the teacher uses
//! for cluster topology (`enterprise::cluster::config::NodeConfig`).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReorgStrategyKind {
    Never,
    Capacity,
    Geo,
    Graph,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelevanceKind {
    Lru,
    CostLru,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerKind {
    Default,
    Late,
    Dema,
    Bema,
    Emkde,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheMode {
    Local,
    Remote,
    Hybrid,
    Nop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CachingStrategy {
    Never,
    Always,
    Authmann(u32),
    Twostep { f_stacked: f64, f_imm: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub port: u16,
    pub update_interval_ms: u64,
    pub reorg_strategy: ReorgStrategyKind,
    pub relevance: RelevanceKind,
    pub scheduler: SchedulerKind,
    pub batching: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            port: 9991,
            update_interval_ms: 30_000,
            reorg_strategy: ReorgStrategyKind::Never,
            relevance: RelevanceKind::CostLru,
            scheduler: SchedulerKind::Default,
            batching: true,
        }
    }
}

impl IndexConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    pub num_workers: usize,
    pub cache_mode: CacheMode,
    pub local_replacement: RelevanceKind,
    pub capacity_bytes_per_type: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9992,
            num_workers: 4,
            cache_mode: CacheMode::Local,
            local_replacement: RelevanceKind::Lru,
            capacity_bytes_per_type: 1024 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterDbConfig {
    /// Absolute path enabling the local on-disk tile cache; empty disables it.
    pub remote_cache: String,
}

impl Default for RasterDbConfig {
    fn default() -> Self {
        Self {
            remote_cache: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub index: IndexConfig,
    pub node: NodeConfig,
    pub rasterdb: RasterDbConfig,
    pub caching_strategy: CachingStrategy,
    pub log_level: LogLevel,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            index: IndexConfig::default(),
            node: NodeConfig::default(),
            rasterdb: RasterDbConfig::default(),
            caching_strategy: CachingStrategy::Always,
            log_level: LogLevel::Info,
        }
    }
}

impl Settings {
    /// Loads settings from the default search paths (`./geocache.toml`,
    /// then `/etc/geocache/geocache.toml`), falling back to defaults if
    /// neither exists.
    pub fn load_default() -> Self {
        for candidate in ["geocache.toml", "/etc/geocache/geocache.toml"] {
            if Path::new(candidate).exists() {
                if let Ok(text) = std::fs::read_to_string(candidate) {
                    return Self::parse(&text);
                }
            }
        }
        Settings::default()
    }

    /// Parses the small recognized-option subset of TOML described in
    /// spec.md §6.3: `section.key = value` lines, booleans, integers,
    /// strings and a couple of small inline structures. This crate does
    /// not depend on a TOML parser; the option set is narrow enough that a
    /// direct line scanner is clearer than pulling in a new dependency for
    /// five scalar fields.
    pub fn parse(text: &str) -> Self {
        let mut settings = Settings::default();
        for raw_line in text.lines() {
            let line = raw_line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().trim_matches('"');
            apply_setting(&mut settings, key, value);
        }
        settings
    }
}

fn apply_setting(settings: &mut Settings, key: &str, value: &str) {
    match key {
        "index.port" => {
            if let Ok(v) = value.parse() {
                settings.index.port = v;
            }
        }
        "index.update_interval_ms" => {
            if let Ok(v) = value.parse() {
                settings.index.update_interval_ms = v;
            }
        }
        "index.reorg_strategy" => {
            settings.index.reorg_strategy = match value {
                "capacity" => ReorgStrategyKind::Capacity,
                "geo" => ReorgStrategyKind::Geo,
                "graph" => ReorgStrategyKind::Graph,
                _ => ReorgStrategyKind::Never,
            };
        }
        "index.relevance" => {
            settings.index.relevance = match value {
                "lru" => RelevanceKind::Lru,
                _ => RelevanceKind::CostLru,
            };
        }
        "index.scheduler" => {
            settings.index.scheduler = match value {
                "late" => SchedulerKind::Late,
                "dema" => SchedulerKind::Dema,
                "bema" => SchedulerKind::Bema,
                "emkde" => SchedulerKind::Emkde,
                _ => SchedulerKind::Default,
            };
        }
        "index.batching" => {
            settings.index.batching = value == "true";
        }
        "node.host" => settings.node.host = value.to_string(),
        "node.port" => {
            if let Ok(v) = value.parse() {
                settings.node.port = v;
            }
        }
        "node.num_workers" => {
            if let Ok(v) = value.parse() {
                settings.node.num_workers = v;
            }
        }
        "node.cache_mode" => {
            settings.node.cache_mode = match value {
                "remote" => CacheMode::Remote,
                "hybrid" => CacheMode::Hybrid,
                "nop" => CacheMode::Nop,
                _ => CacheMode::Local,
            };
        }
        "node.local_replacement" => {
            settings.node.local_replacement = match value {
                "costlru" => RelevanceKind::CostLru,
                _ => RelevanceKind::Lru,
            };
        }
        "node.capacity_bytes_per_type" => {
            if let Ok(v) = value.parse() {
                settings.node.capacity_bytes_per_type = v;
            }
        }
        "rasterdb.remote.cache" => settings.rasterdb.remote_cache = value.to_string(),
        "caching.strategy" => {
            settings.caching_strategy = parse_caching_strategy(value);
        }
        "log.level" => {
            settings.log_level = match value {
                "off" => LogLevel::Off,
                "error" => LogLevel::Error,
                "warn" => LogLevel::Warn,
                "debug" => LogLevel::Debug,
                "trace" => LogLevel::Trace,
                _ => LogLevel::Info,
            };
        }
        _ => {}
    }
}

fn parse_caching_strategy(value: &str) -> CachingStrategy {
    if value == "never" {
        return CachingStrategy::Never;
    }
    if value == "always" {
        return CachingStrategy::Always;
    }
    if let Some(inner) = value.strip_prefix("authmann(").and_then(|s| s.strip_suffix(')')) {
        if let Ok(n) = inner.parse() {
            return CachingStrategy::Authmann(n);
        }
    }
    if let Some(inner) = value.strip_prefix("twostep(").and_then(|s| s.strip_suffix(')')) {
        let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
        if parts.len() == 2 {
            if let (Ok(f_stacked), Ok(f_imm)) = (parts[0].parse(), parts[1].parse()) {
                return CachingStrategy::Twostep { f_stacked, f_imm };
            }
        }
    }
    CachingStrategy::Always
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_recognized_options() {
        let text = r#"
            index.port = 9000
            index.reorg_strategy = "capacity"
            index.batching = "false"
            node.cache_mode = "hybrid"
            caching.strategy = "authmann(4)"
            log.level = "debug"
        "#;
        let settings = Settings::parse(text);
        assert_eq!(settings.index.port, 9000);
        assert_eq!(settings.index.reorg_strategy, ReorgStrategyKind::Capacity);
        assert!(!settings.index.batching);
        assert_eq!(settings.node.cache_mode, CacheMode::Hybrid);
        assert!(matches!(settings.caching_strategy, CachingStrategy::Authmann(4)));
        assert_eq!(settings.log_level, LogLevel::Debug);
    }

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.index.reorg_strategy, ReorgStrategyKind::Never);
        assert!(settings.index.batching);
    }
}
