//! Sensor likelihood strategies.
//!
//! A likelihood strategy scores how well a sensor's actual reading agrees with the distance a
//! particle predicts for it. The particle filter multiplies these scores across sensors to get
//! the particle weight, so the scale of the score decides the scale of the weights. Two
//! strategies exist and they must not be mixed within a run:
//!
//! - [`BoundedProbability`]: scores in `[0, 1]`, floored at a small epsilon. The filter's
//!   confidence output (mean weight) then reads as a probability.
//! - [`UnboundedWeight`]: reciprocal-residual scores with no upper bound other than the one
//!   implied by the residual floor. Confidence is then only meaningful relative to other ticks.
//!
//! The active strategy is chosen through [`LikelihoodModel`].
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::fmt::{self, Debug, Display};
use std::str::FromStr;

use crate::geometry::{Ray, World};
use crate::sensor::{NoiseMode, SensorNoise, normal_tail_probability};

/// Relative tolerance for a ratio-mode reading to count as agreeing with the prediction.
pub const RATIO_TOLERANCE: f64 = 0.05;

/// One sensor's reading compared against one particle's prediction.
#[derive(Clone, Copy, Debug)]
pub struct SensorObservation<'a> {
    pub world: &'a World,
    /// Sensor origin and heading as hypothesized by the particle.
    pub ray: Ray,
    /// Whether `expected` was cast with obstacles; repeated casts follow suit.
    pub include_obstacles: bool,
    /// Distance predicted from `ray`.
    pub expected: f64,
    /// Distance reported by the real sensor, `INFINITY` when out of range.
    pub actual: f64,
}

impl SensorObservation<'_> {
    fn beyond_range(&self) -> bool {
        self.expected > self.world.sensing_max()
    }
    fn within_ratio(&self) -> bool {
        (1.0 - RATIO_TOLERANCE) * self.actual < self.expected
            && (1.0 + RATIO_TOLERANCE) * self.actual > self.expected
    }
}

pub trait LikelihoodStrategy: Debug + Send + Sync {
    fn name(&self) -> &'static str;
    /// Score a single sensor observation. Never negative.
    fn sensor_probability(&self, observation: &SensorObservation) -> f64;
}

/// Normal-tail likelihood bounded to `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundedProbability {
    pub mode: NoiseMode,
    pub noise: SensorNoise,
    /// Score for a finite reading that disagrees completely, and for an out-of-range reading
    /// when the particle expects a wall within range.
    pub floor: f64,
}

impl LikelihoodStrategy for BoundedProbability {
    fn name(&self) -> &'static str {
        "bounded"
    }
    fn sensor_probability(&self, observation: &SensorObservation) -> f64 {
        let SensorObservation {
            expected, actual, ..
        } = *observation;
        match self.mode {
            NoiseMode::Gaussian => {
                if actual.is_finite() {
                    normal_tail_probability(actual, expected, self.noise.predict_stdev(expected))
                        .max(self.floor)
                } else if observation.beyond_range() {
                    1.0
                } else {
                    self.floor
                }
            }
            NoiseMode::Ratio => {
                if actual.is_finite() && observation.within_ratio() {
                    1.0
                } else if !actual.is_finite() && observation.beyond_range() {
                    1.0
                } else {
                    0.5 / ((actual - expected).abs() + 1.0)
                }
            }
        }
    }
}

/// Reciprocal-residual likelihood with unbounded scale.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UnboundedWeight {
    pub mode: NoiseMode,
    pub noise: SensorNoise,
    /// Score for an out-of-range reading when the particle expects a wall within range.
    pub floor: f64,
    /// Smallest residual used as a divisor, which caps the score at its reciprocal.
    pub residual_floor: f64,
}

impl UnboundedWeight {
    /// Sum of the expected distance and a second cast at `theta + 2π`.
    ///
    /// The second cast repeats the first one (the heading is periodic), so the total is twice
    /// the expected distance. Kept as is; whether an opposite-facing cast was meant is not known.
    fn wrap_around_distance(observation: &SensorObservation) -> f64 {
        let ray = observation.ray;
        let wrapped = Ray::new(ray.x, ray.y, ray.theta + TAU);
        observation.expected
            + observation
                .world
                .predict_distance(&wrapped, observation.include_obstacles)
    }
    fn reciprocal(&self, residual: f64) -> f64 {
        1.0 / residual.max(self.residual_floor)
    }
}

impl LikelihoodStrategy for UnboundedWeight {
    fn name(&self) -> &'static str {
        "unbounded"
    }
    fn sensor_probability(&self, observation: &SensorObservation) -> f64 {
        let SensorObservation {
            expected, actual, ..
        } = *observation;
        let residual = (actual - expected).abs();
        if !actual.is_finite() {
            return if observation.beyond_range() {
                1.0 / Self::wrap_around_distance(observation)
            } else {
                self.floor
            };
        }
        match self.mode {
            NoiseMode::Gaussian => {
                let stdev = self.noise.predict_stdev(expected);
                let normalized = if stdev > 0.0 {
                    residual / stdev
                } else if residual == 0.0 {
                    0.0
                } else {
                    f64::INFINITY
                };
                self.reciprocal(normalized)
            }
            NoiseMode::Ratio => {
                if observation.within_ratio() {
                    self.reciprocal(residual)
                } else {
                    0.5 / (residual + 1.0)
                }
            }
        }
    }
}

/// Selector for the likelihood strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum LikelihoodModel {
    #[default]
    Bounded,
    Unbounded,
}

impl LikelihoodModel {
    /// Noise constants that go with this model.
    pub fn default_noise(&self) -> SensorNoise {
        match self {
            LikelihoodModel::Bounded => SensorNoise::bounded(),
            LikelihoodModel::Unbounded => SensorNoise::unbounded(),
        }
    }
    pub fn build(
        &self,
        mode: NoiseMode,
        noise: SensorNoise,
        floor: f64,
        residual_floor: f64,
    ) -> Box<dyn LikelihoodStrategy> {
        match self {
            LikelihoodModel::Bounded => Box::new(BoundedProbability { mode, noise, floor }),
            LikelihoodModel::Unbounded => Box::new(UnboundedWeight {
                mode,
                noise,
                floor,
                residual_floor,
            }),
        }
    }
}

impl FromStr for LikelihoodModel {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bounded" | "probability" => Ok(LikelihoodModel::Bounded),
            "unbounded" | "weight" => Ok(LikelihoodModel::Unbounded),
            other => bail!("Unknown likelihood model '{other}', expected one of: bounded, unbounded"),
        }
    }
}

impl Display for LikelihoodModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LikelihoodModel::Bounded => write!(f, "bounded"),
            LikelihoodModel::Unbounded => write!(f, "unbounded"),
        }
    }
}
