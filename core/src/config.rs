//! Serializable configuration for the filter and for headless simulations.
//!
//! Every structure here can be read from and written to JSON, YAML or TOML. Fields that have a
//! sensible default may be omitted from a file. Selectors such as the likelihood model are plain
//! enums, so an unknown name fails at load time rather than at the first tick.
//!
//! ```
//! use mcl::config::{FilterConfig, SimulationConfig};
//! use mcl::likelihood::LikelihoodModel;
//!
//! let cfg = SimulationConfig {
//!     filter: FilterConfig::for_model(LikelihoodModel::Unbounded),
//!     particle_count: 500,
//!     ..SimulationConfig::default()
//! };
//! assert!(cfg.validate().is_ok());
//! ```
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use crate::geometry::{Obstacle, World};
use crate::likelihood::{LikelihoodModel, LikelihoodStrategy};
use crate::robot::Pose;
use crate::sensor::{NoiseMode, ReadingNoise, SensorCalibration, SensorModel, SensorMount, SensorNoise};

fn default_odom_stdev() -> f64 {
    0.1
}
fn default_min_motion_stdev() -> f64 {
    0.1
}
fn default_percent_random() -> f64 {
    0.05
}
fn default_floor() -> f64 {
    0.001
}
fn default_seed() -> u64 {
    42
}
fn default_particle_count() -> usize {
    1000
}
fn default_initial_stdev() -> f64 {
    0.5
}
fn default_ticks() -> usize {
    200
}

/// Arena bounds, sensing range and static obstacles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldConfig {
    pub width: f64,
    pub height: f64,
    /// Readings whose true distance exceeds this are reported as out of range.
    pub sensing_max: f64,
    #[serde(default)]
    pub obstacles: Vec<Obstacle>,
}

impl WorldConfig {
    pub fn build(&self) -> Result<World> {
        World::new(self.width, self.height, self.sensing_max, self.obstacles.clone())
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        WorldConfig {
            width: 144.0,
            height: 144.0,
            sensing_max: 78.74,
            obstacles: vec![Obstacle::new(36.0, 108.0, 6.0), Obstacle::new(108.0, 36.0, 6.0)],
        }
    }
}

/// Tuning of the particle filter engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Motion noise standard deviation as a fraction of the commanded displacement.
    #[serde(default = "default_odom_stdev")]
    pub odom_stdev: f64,
    /// Lower bound on the motion noise standard deviation, so zero motion still diffuses.
    #[serde(default = "default_min_motion_stdev")]
    pub min_motion_stdev: f64,
    /// Fraction of each resampled population redrawn uniformly over the arena.
    #[serde(default = "default_percent_random")]
    pub percent_random: f64,
    /// Smallest score a likelihood strategy hands out for a disagreeing reading.
    #[serde(default = "default_floor")]
    pub probability_floor: f64,
    /// Smallest residual the unbounded strategy divides by.
    #[serde(default = "default_floor")]
    pub residual_floor: f64,
    #[serde(default)]
    pub likelihood: LikelihoodModel,
    #[serde(default)]
    pub noise_mode: NoiseMode,
    #[serde(default)]
    pub reading_noise: ReadingNoise,
    /// Reading noise constants. When absent, the likelihood model's own constants are used.
    #[serde(default)]
    pub sensor_noise: Option<SensorNoise>,
    /// Cast particle predictions against obstacles as well as walls.
    #[serde(default)]
    pub predict_with_obstacles: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig::for_model(LikelihoodModel::default())
    }
}

impl FilterConfig {
    pub fn for_model(likelihood: LikelihoodModel) -> Self {
        FilterConfig {
            odom_stdev: default_odom_stdev(),
            min_motion_stdev: default_min_motion_stdev(),
            percent_random: default_percent_random(),
            probability_floor: default_floor(),
            residual_floor: default_floor(),
            likelihood,
            noise_mode: NoiseMode::default(),
            reading_noise: ReadingNoise::default(),
            sensor_noise: None,
            predict_with_obstacles: false,
        }
    }
    /// Reading model shared by the real sensors and the likelihood strategy.
    pub fn sensor_model(&self) -> SensorModel {
        SensorModel {
            mode: self.noise_mode,
            reading: self.reading_noise,
            noise: self
                .sensor_noise
                .unwrap_or_else(|| self.likelihood.default_noise()),
        }
    }
    pub fn build_likelihood(&self) -> Box<dyn LikelihoodStrategy> {
        self.likelihood.build(
            self.noise_mode,
            self.sensor_model().noise,
            self.probability_floor,
            self.residual_floor,
        )
    }
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.percent_random) {
            bail!("percent_random must be within [0, 1], got {}", self.percent_random);
        }
        let non_negative = [
            ("odom_stdev", self.odom_stdev),
            ("min_motion_stdev", self.min_motion_stdev),
            ("probability_floor", self.probability_floor),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                bail!("{name} must be finite and non-negative, got {value}");
            }
        }
        if !self.residual_floor.is_finite() || self.residual_floor <= 0.0 {
            bail!("residual_floor must be finite and positive, got {}", self.residual_floor);
        }
        self.sensor_model().noise.validate()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RobotConfig {
    pub width: f64,
    pub length: f64,
    #[serde(default)]
    pub start: Pose,
}

impl Default for RobotConfig {
    fn default() -> Self {
        RobotConfig {
            width: 18.0,
            length: 18.0,
            start: Pose::new(50.0, 50.0, 0.0),
        }
    }
}

/// A sensor's mount, and optionally a fixed calibration. Without one, a calibration is drawn
/// from the simulation seed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    #[serde(flatten)]
    pub mount: SensorMount,
    #[serde(default)]
    pub calibration: Option<SensorCalibration>,
}

impl SensorConfig {
    pub fn new(x_offset: f64, y_offset: f64, theta_offset: f64) -> Self {
        SensorConfig {
            mount: SensorMount::new(x_offset, y_offset, theta_offset),
            calibration: None,
        }
    }
}

/// Local motion command applied every tick.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionConfig {
    #[serde(default)]
    pub forward: f64,
    #[serde(default)]
    pub strafe: f64,
    #[serde(default)]
    pub turn: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        MotionConfig {
            forward: 1.0,
            strafe: 0.0,
            turn: 0.02,
        }
    }
}

/// Full description of a headless localization run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default)]
    pub world: WorldConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub robot: RobotConfig,
    pub sensors: Vec<SensorConfig>,
    #[serde(default = "default_particle_count")]
    pub particle_count: usize,
    /// Spread of the prior around the robot's start position.
    #[serde(default = "default_initial_stdev")]
    pub initial_stdev: f64,
    #[serde(default = "default_ticks")]
    pub ticks: usize,
    #[serde(default)]
    pub motion: MotionConfig,
    /// Random number generator seed for deterministic tests and reproducibility.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        use std::f64::consts::{FRAC_PI_2, PI};
        SimulationConfig {
            world: WorldConfig::default(),
            filter: FilterConfig::default(),
            robot: RobotConfig::default(),
            sensors: vec![
                SensorConfig::new(0.0, 9.0, 0.0),
                SensorConfig::new(9.0, 0.0, FRAC_PI_2),
                SensorConfig::new(0.0, -9.0, PI),
                SensorConfig::new(-9.0, 0.0, -FRAC_PI_2),
            ],
            particle_count: default_particle_count(),
            initial_stdev: default_initial_stdev(),
            ticks: default_ticks(),
            motion: MotionConfig::default(),
            seed: default_seed(),
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        let world = self.world.build()?;
        self.filter.validate()?;
        if self.particle_count == 0 {
            bail!("particle_count must be positive");
        }
        if !self.initial_stdev.is_finite() || self.initial_stdev <= 0.0 {
            bail!("initial_stdev must be finite and positive, got {}", self.initial_stdev);
        }
        let margin = 0.5 * self.robot.width.min(self.robot.length);
        if !(margin >= 0.0) || 2.0 * margin >= world.width().min(world.height()) {
            bail!(
                "Robot body {} x {} leaves no interior in a {} x {} arena",
                self.robot.width,
                self.robot.length,
                world.width(),
                world.height()
            );
        }
        for (i, sensor) in self.sensors.iter().enumerate() {
            if let Some(c) = sensor.calibration {
                SensorCalibration::new(c.u1, c.u2)
                    .map_err(|e| anyhow::anyhow!("sensor {i}: {e}"))?;
            }
        }
        Ok(())
    }

    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }
    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as YAML.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from YAML.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as TOML.
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from TOML.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(io::Error::other)
    }
    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(unsupported(p)),
        }
    }
    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(unsupported(p)),
        }
    }
}

fn extension(p: &Path) -> Option<String> {
    p.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

fn unsupported(p: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!(
            "Unsupported configuration extension for '{}' (expected .json, .yaml, .yml or .toml)",
            p.display()
        ),
    )
}
