//! Range sensor model.
//!
//! A [`DistanceSensor`] is rigidly mounted on the robot body and reports the distance along its
//! heading to the nearest wall or obstacle. Readings are corrupted in one of two ways, selected
//! by [`NoiseMode`]:
//!
//! - `Gaussian`: the true distance plus a normal deviate whose standard deviation grows with
//!   range (see [`SensorNoise::predict_stdev`]).
//! - `Ratio`: the true distance scaled by a factor in `[0.95, 1.05]`.
//!
//! Where the randomness comes from is a separate choice ([`ReadingNoise`]). A sensor carries a
//! [`SensorCalibration`]: two uniform draws fixed for the sensor's lifetime that act as a
//! persistent bias. In `Calibrated` mode every reading uses that bias and nothing else; in
//! `PerReading` mode a fresh deviate is drawn from the caller's RNG on every reading.
use anyhow::{Result, bail};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, SQRT_2};
use std::fmt::{self, Display};
use std::str::FromStr;

use crate::geometry::{Ray, World};
use crate::robot::{Pose, Robot};

/// How a range reading is perturbed around the true distance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum NoiseMode {
    /// Normal deviate with range-dependent standard deviation.
    #[default]
    Gaussian,
    /// Multiplicative factor in `[0.95, 1.05]`.
    Ratio,
}

impl FromStr for NoiseMode {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gaussian" | "normal" => Ok(NoiseMode::Gaussian),
            "ratio" => Ok(NoiseMode::Ratio),
            other => bail!("Unknown noise mode '{other}', expected one of: gaussian, ratio"),
        }
    }
}

impl Display for NoiseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoiseMode::Gaussian => write!(f, "gaussian"),
            NoiseMode::Ratio => write!(f, "ratio"),
        }
    }
}

/// Source of the random deviate applied to a reading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum ReadingNoise {
    /// Only the sensor's fixed calibration bias; repeated readings of the same pose agree.
    #[default]
    Calibrated,
    /// A fresh deviate from the caller's RNG on every reading.
    PerReading,
}

/// Parameters of the range-dependent reading standard deviation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorNoise {
    /// Distance at or below which the standard deviation is constant.
    pub threshold: f64,
    /// Standard deviation at short range (before `scale`).
    pub near_stdev: f64,
    /// Standard deviation as a fraction of distance beyond `threshold` (before `scale`).
    pub far_ratio: f64,
    /// Overall multiplier.
    pub scale: f64,
}

impl SensorNoise {
    /// Constants used with the bounded-probability likelihood.
    pub fn bounded() -> Self {
        SensorNoise {
            threshold: 7.874015748,
            near_stdev: 0.5905511811,
            far_ratio: 0.05,
            scale: 0.5,
        }
    }
    /// Constants used with the unbounded-weight likelihood.
    pub fn unbounded() -> Self {
        SensorNoise {
            scale: 1.0,
            ..Self::bounded()
        }
    }
    /// Expected reading standard deviation at `predicted_distance`.
    pub fn predict_stdev(&self, predicted_distance: f64) -> f64 {
        if predicted_distance > self.threshold {
            self.scale * (self.far_ratio * predicted_distance)
        } else {
            self.scale * self.near_stdev
        }
    }
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("threshold", self.threshold),
            ("near_stdev", self.near_stdev),
            ("far_ratio", self.far_ratio),
            ("scale", self.scale),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                bail!("Sensor noise parameter '{name}' must be finite and non-negative, got {value}");
            }
        }
        Ok(())
    }
}

impl Default for SensorNoise {
    fn default() -> Self {
        SensorNoise::bounded()
    }
}

/// Everything that shapes a reading apart from the sensor's own mount and calibration.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SensorModel {
    pub mode: NoiseMode,
    pub reading: ReadingNoise,
    pub noise: SensorNoise,
}

/// Two-sided normal tail probability `P(|X - mean| >= |x - mean|)` for `X ~ N(mean, stdev²)`.
///
/// Equals 1 at `x == mean` and falls towards 0 in both directions. A zero standard deviation
/// gives 1 for an exact match and 0 otherwise.
pub fn normal_tail_probability(x: f64, mean: f64, stdev: f64) -> f64 {
    if stdev <= 0.0 {
        return if x == mean { 1.0 } else { 0.0 };
    }
    libm::erfc((x - mean).abs() / (SQRT_2 * stdev)).clamp(0.0, 1.0)
}

/// Fixed per-sensor random draws, representing a persistent calibration error.
///
/// `u1` lies in `(0, 1]` and `u2` in `[0, 1)`. Through the Box–Muller transform they define one
/// standard normal deviate, which `Gaussian` readings scale by the predicted standard deviation;
/// `Ratio` readings use `u1` alone.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorCalibration {
    pub u1: f64,
    pub u2: f64,
}

impl SensorCalibration {
    pub fn new(u1: f64, u2: f64) -> Result<Self> {
        let calibration = SensorCalibration { u1, u2 };
        calibration.validate()?;
        Ok(calibration)
    }
    /// Check that `u1` lies in `(0, 1]` and `u2` in `[0, 1)`.
    ///
    /// A zero `u1` would make the Box-Muller deviate infinite.
    pub fn validate(&self) -> Result<()> {
        let SensorCalibration { u1, u2 } = *self;
        if !(u1 > 0.0 && u1 <= 1.0) || !(0.0..1.0).contains(&u2) {
            bail!("Calibration draws must satisfy 0 < u1 <= 1 and 0 <= u2 < 1, got ({u1}, {u2})");
        }
        Ok(())
    }
    /// Draw a calibration from `rng`.
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        SensorCalibration {
            u1: 1.0 - rng.random::<f64>(),
            u2: rng.random::<f64>(),
        }
    }
    /// A calibration with (numerically) zero bias in both noise modes.
    pub fn unbiased() -> Self {
        SensorCalibration { u1: 0.5, u2: 0.25 }
    }
    /// The standard normal deviate defined by the two draws.
    pub fn standard_deviate(&self) -> f64 {
        (-2.0 * self.u1.ln()).sqrt() * (2.0 * PI * self.u2).cos()
    }
    /// Multiplicative factor applied by `Ratio` readings.
    pub fn ratio_factor(&self) -> f64 {
        0.95 + 0.1 * self.u1
    }
}

/// Rigid placement of a sensor on the robot body.
///
/// `y_offset` is along the robot heading, `x_offset` is to the left of it (heading + π/2), and
/// `theta_offset` is added to the robot heading to get the sensor heading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorMount {
    pub x_offset: f64,
    pub y_offset: f64,
    pub theta_offset: f64,
}

impl SensorMount {
    pub fn new(x_offset: f64, y_offset: f64, theta_offset: f64) -> Self {
        SensorMount {
            x_offset,
            y_offset,
            theta_offset,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DistanceSensor {
    pub mount: SensorMount,
    pub calibration: SensorCalibration,
}

impl DistanceSensor {
    pub fn new(mount: SensorMount, calibration: SensorCalibration) -> Self {
        DistanceSensor { mount, calibration }
    }
    /// Sensor with a freshly drawn calibration.
    pub fn with_random_calibration<R: Rng>(mount: SensorMount, rng: &mut R) -> Self {
        DistanceSensor::new(mount, SensorCalibration::random(rng))
    }
    /// World-frame origin and heading of the sensor when the robot is at `pose`.
    pub fn get_position(&self, pose: &Pose) -> Ray {
        let offset = pose.body_to_world(self.mount.y_offset, self.mount.x_offset);
        Ray::new(
            pose.x + offset.x,
            pose.y + offset.y,
            pose.theta + self.mount.theta_offset,
        )
    }
    /// Noise-free distance the sensor would see from `pose`, obstacles included.
    pub fn true_distance(&self, world: &World, pose: &Pose) -> f64 {
        world.predict_distance(&self.get_position(pose), true)
    }
    /// Simulated reading for the real robot.
    ///
    /// Returns `f64::INFINITY` when the true distance exceeds the world's sensing range. Noisy
    /// readings are clamped at zero.
    pub fn get_distance<R: Rng>(
        &self,
        robot: &Robot,
        world: &World,
        model: &SensorModel,
        rng: &mut R,
    ) -> f64 {
        let exact = self.true_distance(world, &robot.pose);
        if exact > world.sensing_max() {
            return f64::INFINITY;
        }
        let reading = match (model.mode, model.reading) {
            (NoiseMode::Gaussian, ReadingNoise::Calibrated) => {
                exact + model.noise.predict_stdev(exact) * self.calibration.standard_deviate()
            }
            (NoiseMode::Gaussian, ReadingNoise::PerReading) => {
                match Normal::new(exact, model.noise.predict_stdev(exact)) {
                    Ok(normal) => normal.sample(rng),
                    Err(_) => exact,
                }
            }
            (NoiseMode::Ratio, ReadingNoise::Calibrated) => exact * self.calibration.ratio_factor(),
            (NoiseMode::Ratio, ReadingNoise::PerReading) => {
                exact * (0.95 + 0.1 * rng.random::<f64>())
            }
        };
        reading.max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Obstacle;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::f64::consts::FRAC_PI_2;

    fn world() -> World {
        World::new(100.0, 100.0, 200.0, vec![]).unwrap()
    }

    #[test]
    fn test_predict_stdev_constant_below_threshold() {
        let noise = SensorNoise::bounded();
        let near = noise.predict_stdev(0.0);
        assert_approx_eq!(near, 0.5 * 0.5905511811, 1e-12);
        assert_approx_eq!(noise.predict_stdev(3.0), near, 1e-12);
        assert_approx_eq!(noise.predict_stdev(noise.threshold), near, 1e-12);
    }

    #[test]
    fn test_predict_stdev_grows_above_threshold() {
        let noise = SensorNoise::unbounded();
        let mut previous = noise.predict_stdev(noise.threshold + 1e-9);
        let mut d = noise.threshold + 0.5;
        while d < 300.0 {
            let s = noise.predict_stdev(d);
            assert!(s >= previous);
            assert!((s - previous).abs() < 0.05);
            previous = s;
            d += 0.5;
        }
        assert_approx_eq!(noise.predict_stdev(100.0), 5.0, 1e-12);
    }

    #[test]
    fn test_sensor_noise_validation() {
        assert!(SensorNoise::bounded().validate().is_ok());
        let bad = SensorNoise {
            far_ratio: -0.1,
            ..SensorNoise::bounded()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_tail_probability_reference_values() {
        // |x - mean| / stdev = √2 gives erfc(1)
        assert_approx_eq!(normal_tail_probability(0.0, 0.0, 1.0), 1.0, 1e-12);
        assert_approx_eq!(normal_tail_probability(SQRT_2, 0.0, 1.0), 0.157299207, 1e-9);
        assert_approx_eq!(normal_tail_probability(-SQRT_2, 0.0, 1.0), 0.157299207, 1e-9);
        let far = normal_tail_probability(10.0 * SQRT_2, 0.0, 1.0);
        assert!(far > 0.0 && far < 1e-40);
    }

    #[test]
    fn test_tail_probability_symmetric_and_bounded() {
        assert_approx_eq!(normal_tail_probability(5.0, 5.0, 1.0), 1.0, 1e-6);
        let above = normal_tail_probability(6.0, 5.0, 1.0);
        let below = normal_tail_probability(4.0, 5.0, 1.0);
        assert_approx_eq!(above, below, 1e-12);
        assert_approx_eq!(above, 0.317310508, 1e-6);
        assert_eq!(normal_tail_probability(4.0, 5.0, 0.0), 0.0);
        assert_eq!(normal_tail_probability(5.0, 5.0, 0.0), 1.0);
    }

    #[test]
    fn test_noise_mode_from_str() {
        assert_eq!("Gaussian".parse::<NoiseMode>().unwrap(), NoiseMode::Gaussian);
        assert_eq!("ratio".parse::<NoiseMode>().unwrap(), NoiseMode::Ratio);
        assert!("uniform".parse::<NoiseMode>().is_err());
    }

    #[test]
    fn test_calibration_bounds() {
        assert!(SensorCalibration::new(0.0, 0.5).is_err());
        assert!(SensorCalibration::new(0.5, 1.0).is_err());
        assert!(SensorCalibration { u1: 0.0, u2: 0.25 }.validate().is_err());
        assert!(SensorCalibration { u1: f64::NAN, u2: 0.25 }.validate().is_err());
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let c = SensorCalibration::random(&mut rng);
            assert!(c.validate().is_ok());
        }
    }

    #[test]
    fn test_unbiased_calibration_is_neutral() {
        let c = SensorCalibration::unbiased();
        assert_approx_eq!(c.standard_deviate(), 0.0, 1e-12);
        assert_approx_eq!(c.ratio_factor(), 1.0, 1e-12);
    }

    #[test]
    fn test_mount_offset_rotates_with_robot() {
        let sensor = DistanceSensor::new(
            SensorMount::new(1.0, 2.0, 0.5),
            SensorCalibration::unbiased(),
        );
        let ray = sensor.get_position(&Pose::new(10.0, 10.0, FRAC_PI_2));
        // forward 2 points up, lateral 1 points left
        assert_approx_eq!(ray.x, 9.0, 1e-12);
        assert_approx_eq!(ray.y, 12.0, 1e-12);
        assert_approx_eq!(ray.theta, FRAC_PI_2 + 0.5, 1e-12);
    }

    #[test]
    fn test_calibrated_reading_is_repeatable() {
        let mut rng = StdRng::seed_from_u64(1);
        let sensor = DistanceSensor::with_random_calibration(SensorMount::default(), &mut rng);
        let robot = Robot::new(10.0, 10.0, Pose::new(50.0, 50.0, 0.0));
        let model = SensorModel::default();
        let first = sensor.get_distance(&robot, &world(), &model, &mut rng);
        let second = sensor.get_distance(&robot, &world(), &model, &mut rng);
        assert_eq!(first, second);
        let expected = 50.0 + model.noise.predict_stdev(50.0) * sensor.calibration.standard_deviate();
        assert_approx_eq!(first, expected.max(0.0), 1e-9);
    }

    #[test]
    fn test_per_reading_noise_varies() {
        let mut rng = StdRng::seed_from_u64(3);
        let sensor = DistanceSensor::new(SensorMount::default(), SensorCalibration::unbiased());
        let robot = Robot::new(10.0, 10.0, Pose::new(50.0, 50.0, 0.0));
        let model = SensorModel {
            reading: ReadingNoise::PerReading,
            ..SensorModel::default()
        };
        let readings: Vec<f64> = (0..20)
            .map(|_| sensor.get_distance(&robot, &world(), &model, &mut rng))
            .collect();
        assert!(readings.iter().any(|r| (r - readings[0]).abs() > 1e-9));
        let mean = readings.iter().sum::<f64>() / readings.len() as f64;
        assert!((mean - 50.0).abs() < 2.0);
    }

    #[test]
    fn test_ratio_reading_within_five_percent() {
        let mut rng = StdRng::seed_from_u64(11);
        let robot = Robot::new(10.0, 10.0, Pose::new(50.0, 50.0, 0.0));
        let model = SensorModel {
            mode: NoiseMode::Ratio,
            ..SensorModel::default()
        };
        for _ in 0..20 {
            let sensor = DistanceSensor::with_random_calibration(SensorMount::default(), &mut rng);
            let r = sensor.get_distance(&robot, &world(), &model, &mut rng);
            assert!((47.5..=52.5).contains(&r));
        }
    }

    #[test]
    fn test_out_of_range_reads_infinity() {
        let world = World::new(500.0, 100.0, 200.0, vec![]).unwrap();
        let sensor = DistanceSensor::new(SensorMount::default(), SensorCalibration::unbiased());
        let robot = Robot::new(10.0, 10.0, Pose::new(50.0, 50.0, 0.0));
        let mut rng = StdRng::seed_from_u64(0);
        let r = sensor.get_distance(&robot, &world, &SensorModel::default(), &mut rng);
        assert!(r.is_infinite());
    }

    #[test]
    fn test_reading_sees_obstacles() {
        let world = World::new(100.0, 100.0, 200.0, vec![Obstacle::new(70.0, 50.0, 5.0)]).unwrap();
        let sensor = DistanceSensor::new(SensorMount::default(), SensorCalibration::unbiased());
        let robot = Robot::new(10.0, 10.0, Pose::new(50.0, 50.0, 0.0));
        let mut rng = StdRng::seed_from_u64(0);
        let r = sensor.get_distance(&robot, &world, &SensorModel::default(), &mut rng);
        assert_approx_eq!(r, 15.0, 1e-9);
    }
}
