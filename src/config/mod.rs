//! Server configuration loaded from a YAML file
//!
//! Every field has a default so a partial (or empty) config file yields
//! the stock tuning. The loaded [`Config`] is immutable and shared as
//! `Arc<Config>`; nothing reads configuration after startup.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

/// Application configuration
#[derive(Clone, Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub race: RaceConfig,
    #[serde(default)]
    pub physics: PhysicsConfig,
    #[serde(default)]
    pub cars: CarsConfig,
    #[serde(default)]
    pub upgrades: UpgradesConfig,
    #[serde(default)]
    pub npcs: NpcConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// TCP bind address
    pub bind_addr: String,
    /// Log level used when RUST_LOG is not set
    pub log_level: String,
    /// Map rotation, cycled when a lobby asks for more races than entries
    pub maps: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            log_level: "info".to_string(),
            maps: vec!["maps/liberty_city.json".to_string()],
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RaceConfig {
    /// Full race clock in seconds, countdown included
    pub total_time_seconds: f64,
    /// Countdown before NPCs start moving
    pub countdown_seconds: f64,
    /// How long the results screen stays up between maps
    pub results_screen_seconds: f64,
    /// How long clients get to pick an upgrade
    pub upgrades_screen_seconds: f64,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            total_time_seconds: 610.0,
            countdown_seconds: 10.0,
            results_screen_seconds: 10.0,
            upgrades_screen_seconds: 10.0,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PhysicsConfig {
    /// Fixed simulation timestep in seconds
    pub timestep_seconds: f64,
    /// Integration substeps per simulation step
    pub substeps: u32,
    /// Minimum approach speed (m/s) for a contact to count as a crash
    pub hit_speed_threshold: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            timestep_seconds: 1.0 / 60.0,
            substeps: 4,
            hit_speed_threshold: 6.0,
        }
    }
}

/// Raw car stats, each on a 0-100 scale
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CarStats {
    pub speed: f32,
    pub engine: f32,
    pub handling: f32,
    pub weight: f32,
    pub shield: f32,
}

/// A selectable car design: stats plus chassis dimensions in meters
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CarDesign {
    pub stats: CarStats,
    pub length: f32,
    pub width: f32,
}

/// Physical ranges the 0-100 stats linearly map into
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StatBounds {
    pub density_min: f32,
    pub density_max: f32,
    pub max_speed_min: f32,
    pub max_speed_max: f32,
    pub accel_min: f32,
    pub accel_max: f32,
    pub turn_torque_min: f32,
    pub turn_torque_max: f32,
    pub friction_min: f32,
    pub friction_max: f32,
    pub shield_min: f32,
    pub shield_max: f32,
}

impl Default for StatBounds {
    fn default() -> Self {
        Self {
            density_min: 0.7,
            density_max: 1.5,
            max_speed_min: 90.0,
            max_speed_max: 220.0,
            accel_min: 6.0,
            accel_max: 40.0,
            turn_torque_min: 8.0,
            turn_torque_max: 20.0,
            friction_min: 0.05,
            friction_max: 0.2,
            shield_min: 0.0,
            shield_max: 0.8,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CarsConfig {
    /// Model id to design table
    pub designs: BTreeMap<u16, CarDesign>,
    pub bounds: StatBounds,
    /// Engine force multiplier while on a slow-zone cell
    pub slow_zone_factor: f32,
    /// Reverse force as a fraction of forward engine force
    pub reverse_factor: f32,
    pub damage_low: f32,
    pub damage_mid: f32,
    pub damage_high: f32,
}

impl Default for CarsConfig {
    fn default() -> Self {
        let mk = |speed, engine, handling, weight, shield, length, width| CarDesign {
            stats: CarStats {
                speed,
                engine,
                handling,
                weight,
                shield,
            },
            length,
            width,
        };
        let mut designs = BTreeMap::new();
        designs.insert(0, mk(25.0, 45.0, 50.0, 40.0, 10.0, 1.75, 1.25));
        designs.insert(1, mk(40.0, 55.0, 45.0, 50.0, 15.0, 2.0, 1.25));
        designs.insert(2, mk(55.0, 60.0, 60.0, 45.0, 10.0, 2.0, 1.3));
        designs.insert(3, mk(65.0, 70.0, 55.0, 55.0, 20.0, 2.25, 1.3));
        designs.insert(4, mk(75.0, 85.0, 65.0, 50.0, 20.0, 2.25, 1.35));
        designs.insert(5, mk(90.0, 100.0, 80.0, 40.0, 30.0, 2.5, 1.375));
        designs.insert(6, mk(60.0, 65.0, 40.0, 90.0, 40.0, 2.5, 1.5));

        Self {
            designs,
            bounds: StatBounds::default(),
            slow_zone_factor: 0.4,
            reverse_factor: 0.6,
            damage_low: 1.0,
            damage_mid: 3.0,
            damage_high: 5.0,
        }
    }
}

impl CarsConfig {
    /// Design for a model id, falling back to model 0
    pub fn design(&self, model: u16) -> CarDesign {
        if let Some(d) = self.designs.get(&model) {
            return *d;
        }
        if let Some(d) = self.designs.get(&0) {
            return *d;
        }
        CarsConfig::default().design(0)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpgradesConfig {
    /// Time penalty in seconds added to the player's total, per upgrade level
    pub penalty_level_1: f64,
    pub penalty_level_2: f64,
    pub penalty_level_3: f64,
}

impl Default for UpgradesConfig {
    fn default() -> Self {
        Self {
            penalty_level_1: 10.0,
            penalty_level_2: 20.0,
            penalty_level_3: 30.0,
        }
    }
}

impl UpgradesConfig {
    pub fn penalty_for_level(&self, level: u8) -> f64 {
        match level {
            1 => self.penalty_level_1,
            2 => self.penalty_level_2,
            _ => self.penalty_level_3,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NpcConfig {
    pub max_moving: usize,
    pub max_parking: usize,
    /// Cruise speed in m/s for moving NPCs
    pub speed: f32,
    pub model: u16,
    /// Spawns closer than this (meters) to the start grid are discarded
    pub min_distance_to_pole: f32,
}

impl Default for NpcConfig {
    fn default() -> Self {
        Self {
            max_moving: 10,
            max_parking: 10,
            speed: 6.0,
            model: 0,
            min_distance_to_pole: 20.0,
        }
    }
}

impl Config {
    /// Load from a YAML file. A missing file is not an error: the
    /// defaults are a complete, playable configuration.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e))?;
        serde_yaml::from_str(&raw).map_err(|e| ConfigError::Parse(path.display().to_string(), e))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(String, #[source] std::io::Error),

    #[error("Failed to parse config file {0}: {1}")]
    Parse(String, #[source] serde_yaml::Error),
}
