use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::field::FieldId;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// World units per sector edge
    pub sector_size: f32,
    /// View radius in sectors
    pub view_radius: i32,
    /// Fixed player step in seconds (20 Hz)
    pub player_step_secs: f32,
    /// Fixed NPC step in seconds (10 Hz)
    pub npc_step_secs: f32,
    /// Catch-up cap per tick for player steps
    pub max_player_steps: u32,
    /// Catch-up cap per tick for NPC steps
    pub max_npc_steps: u32,
    /// Number of tick driver threads
    pub tick_threads: usize,
    /// Tick driver wake period
    pub tick_period_ms: u64,
    /// Bounded inbound queue per field
    pub queue_capacity: usize,
    /// Bounded outbound queue per session
    pub session_queue_capacity: usize,
    /// A moving player stops after this long without input
    pub idle_input_timeout_secs: f32,
    /// Server-chosen player speed in world units per second
    pub player_speed: f32,
    /// Flat damage of a player skill hit
    pub skill_damage: i32,
    /// Delay before a dead NPC comes back
    pub npc_respawn_secs: f32,
    /// Fields created at boot
    pub field_ids: Vec<FieldId>,
    /// Field that receives the initial NPC grid
    pub npc_field_id: FieldId,
    /// Port of the metrics endpoint
    pub metrics_port: u16,
    /// Queue depth log period (0 disables the monitor)
    pub monitor_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            sector_size: 10.0,
            view_radius: 2,
            player_step_secs: 0.05,
            npc_step_secs: 0.10,
            max_player_steps: 5,
            max_npc_steps: 3,
            tick_threads: 3,
            tick_period_ms: 50,
            queue_capacity: 4096,
            session_queue_capacity: 256,
            idle_input_timeout_secs: 0.5,
            player_speed: 10.0,
            skill_damage: 10,
            npc_respawn_secs: 5.0,
            field_ids: vec![1000],
            npc_field_id: 1000,
            metrics_port: 9090,
            monitor_interval_secs: 5,
        }
    }
}

/// Per-field subset of [`ServerConfig`] handed to every field actor
#[derive(Debug, Clone, PartialEq)]
pub struct FieldConfig {
    pub sector_size: f32,
    pub view_radius: i32,
    pub player_step_secs: f32,
    pub npc_step_secs: f32,
    pub max_player_steps: u32,
    pub max_npc_steps: u32,
    pub queue_capacity: usize,
    pub idle_input_timeout_secs: f32,
    pub player_speed: f32,
    pub skill_damage: i32,
    pub npc_respawn_secs: f32,
}

impl Default for FieldConfig {
    fn default() -> Self {
        ServerConfig::default().field_config()
    }
}

/// Parse env var `key`, keeping `None` (with a warning) when it is missing,
/// unparseable or rejected by `accept`.
fn env_parse<T: FromStr>(key: &str, accept: impl Fn(&T) -> bool, expectation: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) if accept(&value) => Some(value),
        Ok(_) => {
            tracing::warn!("{} must be {}, using default", key, expectation);
            None
        }
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", key, raw);
            None
        }
    }
}

impl ServerConfig {
    /// Load config: defaults, then the JSON file named by `FIELD_CONFIG_PATH`
    /// (if any), then individual environment variables.
    pub fn load_or_default() -> Self {
        let mut config = match std::env::var("FIELD_CONFIG_PATH") {
            Ok(path) => Self::from_file(&path).unwrap_or_else(|e| {
                tracing::warn!("{}, using defaults", e);
                Self::default()
            }),
            Err(_) => Self::default(),
        };
        config.apply_env();
        config
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    fn apply_env(&mut self) {
        let positive = |v: &f32| v.is_finite() && *v > 0.0;

        if let Some(v) = env_parse("SECTOR_SIZE", positive, "> 0") {
            self.sector_size = v;
        }
        if let Some(v) = env_parse("VIEW_RADIUS", |v: &i32| *v >= 1, ">= 1") {
            self.view_radius = v;
        }
        if let Some(v) = env_parse("PLAYER_STEP_SECS", positive, "> 0") {
            self.player_step_secs = v;
        }
        if let Some(v) = env_parse("NPC_STEP_SECS", positive, "> 0") {
            self.npc_step_secs = v;
        }
        if let Some(v) = env_parse("TICK_THREADS", |v: &usize| (1..=64).contains(v), "1-64") {
            self.tick_threads = v;
        }
        if let Some(v) = env_parse("TICK_PERIOD_MS", |v: &u64| *v > 0, "> 0") {
            self.tick_period_ms = v;
        }
        if let Some(v) = env_parse("FIELD_QUEUE_CAPACITY", |v: &usize| *v > 0, "> 0") {
            self.queue_capacity = v;
        }
        if let Some(v) = env_parse("SESSION_QUEUE_CAPACITY", |v: &usize| *v > 0, "> 0") {
            self.session_queue_capacity = v;
        }
        if let Some(v) = env_parse("NPC_FIELD_ID", |_: &FieldId| true, "a field id") {
            self.npc_field_id = v;
        }
        if let Some(v) = env_parse("METRICS_PORT", |v: &u16| *v > 0, "> 0") {
            self.metrics_port = v;
        }
        if let Some(v) = env_parse("MONITOR_INTERVAL_SECS", |_: &u64| true, "a number of seconds") {
            self.monitor_interval_secs = v;
        }

        if let Ok(ids) = std::env::var("FIELD_IDS") {
            let parsed: Result<Vec<FieldId>, _> = ids
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::parse)
                .collect();
            match parsed {
                Ok(list) if !list.is_empty() => self.field_ids = list,
                _ => tracing::warn!("Invalid FIELD_IDS '{}', using default", ids),
            }
        }
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if !(self.sector_size.is_finite() && self.sector_size > 0.0) {
            return invalid("sector_size must be > 0");
        }
        if self.view_radius < 1 {
            return invalid("view_radius must be at least 1");
        }
        if !(self.player_step_secs > 0.0 && self.npc_step_secs > 0.0) {
            return invalid("step periods must be > 0");
        }
        if self.max_player_steps == 0 || self.max_npc_steps == 0 {
            return invalid("catch-up step caps must be at least 1");
        }
        if !(self.player_speed.is_finite() && self.player_speed > 0.0) {
            return invalid("player_speed must be > 0");
        }
        if !(self.idle_input_timeout_secs.is_finite() && self.idle_input_timeout_secs > 0.0) {
            return invalid("idle_input_timeout_secs must be > 0");
        }
        if !(self.npc_respawn_secs.is_finite() && self.npc_respawn_secs > 0.0) {
            return invalid("npc_respawn_secs must be > 0");
        }
        if self.skill_damage < 0 {
            return invalid("skill_damage cannot be negative");
        }
        if self.tick_threads == 0 {
            return invalid("tick_threads must be at least 1");
        }
        if self.tick_period_ms == 0 {
            return invalid("tick_period_ms must be > 0");
        }
        if self.queue_capacity == 0 || self.session_queue_capacity == 0 {
            return invalid("queue capacities must be at least 1");
        }
        if self.metrics_port == 0 {
            return invalid("metrics_port cannot be 0");
        }
        Ok(())
    }

    pub fn field_config(&self) -> FieldConfig {
        FieldConfig {
            sector_size: self.sector_size,
            view_radius: self.view_radius,
            player_step_secs: self.player_step_secs,
            npc_step_secs: self.npc_step_secs,
            max_player_steps: self.max_player_steps,
            max_npc_steps: self.max_npc_steps,
            queue_capacity: self.queue_capacity,
            idle_input_timeout_secs: self.idle_input_timeout_secs,
            player_speed: self.player_speed,
            skill_damage: self.skill_damage,
            npc_respawn_secs: self.npc_respawn_secs,
        }
    }
}
