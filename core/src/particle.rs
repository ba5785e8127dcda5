//! Monte Carlo localization engine.
//!
//! The filter tracks the robot's position with a fixed-size population of weighted `(x, y)`
//! hypotheses. Heading is not filtered: every particle is scored with the robot's current
//! heading. Each [`ParticleFilter::tick`] runs, in order:
//!
//! 1. **Resample** with a low-variance wheel, replacing a fraction of the population with
//!    uniform random particles (all of it if every weight is zero). New particles have weight 1.
//! 2. **Motion update**: every particle moves by the odometry delta plus Gaussian noise.
//! 3. **Sensor update**: particles outside the arena interior get weight 0, the rest get the
//!    product of the likelihood scores of every sensor.
//! 4. **Estimate**: weighted mean position and mean weight (confidence).
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use mcl::config::FilterConfig;
//! use mcl::geometry::World;
//! use mcl::particle::ParticleFilter;
//! use mcl::robot::{Pose, Robot};
//! use mcl::sensor::{DistanceSensor, SensorCalibration, SensorMount};
//!
//! let world = Arc::new(World::new(100.0, 100.0, 200.0, vec![]).unwrap());
//! let sensors = vec![DistanceSensor::new(SensorMount::default(), SensorCalibration::unbiased())];
//! let robot = Robot::new(10.0, 10.0, Pose::new(50.0, 50.0, 0.0));
//!
//! let mut pf = ParticleFilter::new_with_seed(world, sensors, FilterConfig::default(), 7).unwrap();
//! pf.initialize(50.0, 50.0, 500, &robot, 0.5).unwrap();
//! let estimate = pf.tick(0.0, 0.0, &robot);
//! assert_eq!(pf.num_particles(), 500);
//! assert!(estimate.confidence >= 0.0);
//! ```
use anyhow::{Context, Result, bail};
use log::{debug, trace, warn};
use nalgebra::Point2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::fmt::{self, Debug, Display};
use std::sync::Arc;

use crate::config::FilterConfig;
use crate::geometry::{Ray, World};
use crate::likelihood::{LikelihoodStrategy, SensorObservation};
use crate::robot::{Pose, Robot};
use crate::sensor::{DistanceSensor, SensorModel, normal_tail_probability};

/// A weighted position hypothesis.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Particle {
    pub x: f64,
    pub y: f64,
    pub weight: f64,
}

impl Particle {
    pub fn new(x: f64, y: f64, weight: f64) -> Self {
        Particle { x, y, weight }
    }
    /// Weight with `NaN` read as zero.
    pub fn effective_weight(&self) -> f64 {
        if self.weight.is_nan() { 0.0 } else { self.weight }
    }
}

impl Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("x", &self.x)
            .field("y", &self.y)
            .field("weight", &self.weight)
            .finish()
    }
}

/// Output of a tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Estimate {
    /// Weighted mean position, `None` when the total weight is zero (or not finite).
    pub position: Option<Point2<f64>>,
    /// Mean particle weight.
    pub confidence: f64,
}

impl Estimate {
    pub fn x(&self) -> Option<f64> {
        self.position.map(|p| p.x)
    }
    pub fn y(&self) -> Option<f64> {
        self.position.map(|p| p.y)
    }
}

/// A sensor's world-frame ray and the distance it truly sees, for visualization.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SensorRay {
    pub ray: Ray,
    pub distance: f64,
    pub in_range: bool,
}

pub struct ParticleFilter {
    world: Arc<World>,
    sensors: Vec<DistanceSensor>,
    config: FilterConfig,
    sensor_model: SensorModel,
    likelihood: Box<dyn LikelihoodStrategy>,
    particles: Vec<Particle>,
    margin: f64,
    rng: StdRng,
}

impl Debug for ParticleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let estimate = self.estimate();
        let min_weight = self
            .particles
            .iter()
            .map(Particle::effective_weight)
            .fold(f64::INFINITY, f64::min);
        f.debug_struct("ParticleFilter")
            .field("num_particles", &self.particles.len())
            .field("num_sensors", &self.sensors.len())
            .field("likelihood", &self.likelihood.name())
            .field("effective_particles", &self.effective_sample_size())
            .field(
                "weight_range",
                &format_args!("[{:.4e}, {:.4e}]", min_weight, self.max_weight()),
            )
            .field("estimate", &estimate.position)
            .field("confidence", &estimate.confidence)
            .finish()
    }
}

impl ParticleFilter {
    /// Create an uninitialized filter seeded from system entropy.
    pub fn new(world: Arc<World>, sensors: Vec<DistanceSensor>, config: FilterConfig) -> Result<Self> {
        Self::new_with_seed(world, sensors, config, rand::random())
    }

    /// Create an uninitialized filter with a specific random seed.
    ///
    /// This is useful for reproducible tests.
    pub fn new_with_seed(
        world: Arc<World>,
        sensors: Vec<DistanceSensor>,
        config: FilterConfig,
        seed: u64,
    ) -> Result<Self> {
        config.validate()?;
        for (i, sensor) in sensors.iter().enumerate() {
            sensor
                .calibration
                .validate()
                .with_context(|| format!("sensor {i}"))?;
        }
        let likelihood = config.build_likelihood();
        let sensor_model = config.sensor_model();
        Ok(ParticleFilter {
            world,
            sensors,
            config,
            sensor_model,
            likelihood,
            particles: Vec::new(),
            margin: 0.0,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Spread `count` particles uniformly over the arena interior, weighted by a normal prior
    /// around `(start_x, start_y)`.
    ///
    /// The interior is the arena inset by the robot's margin on every side. Replaces any
    /// existing population.
    pub fn initialize(
        &mut self,
        start_x: f64,
        start_y: f64,
        count: usize,
        robot: &Robot,
        initial_stdev: f64,
    ) -> Result<()> {
        if count == 0 {
            bail!("Particle count must be positive");
        }
        if !initial_stdev.is_finite() || initial_stdev <= 0.0 {
            bail!("Initial standard deviation must be finite and positive, got {initial_stdev}");
        }
        let margin = robot.margin();
        if !(margin >= 0.0)
            || 2.0 * margin >= self.world.width()
            || 2.0 * margin >= self.world.height()
        {
            bail!(
                "Robot margin {margin} leaves no interior in a {} x {} arena",
                self.world.width(),
                self.world.height()
            );
        }
        self.margin = margin;
        let mut particles = Vec::with_capacity(count);
        for _ in 0..count {
            let mut p = self.random_particle();
            p.weight = normal_tail_probability(p.x, start_x, initial_stdev)
                * normal_tail_probability(p.y, start_y, initial_stdev);
            particles.push(p);
        }
        self.particles = particles;
        debug!(
            "Initialized {count} particles around ({start_x:.2}, {start_y:.2}), margin {margin:.2}, max prior weight {:.3e}",
            self.max_weight()
        );
        Ok(())
    }

    /// Advance the filter by one step.
    ///
    /// `delta_x`, `delta_y` are the odometry displacement in world coordinates since the last
    /// tick (see [`Robot::move_local`]); `robot` supplies the current heading and is what the
    /// real sensors read from.
    pub fn tick(&mut self, delta_x: f64, delta_y: f64, robot: &Robot) -> Estimate {
        if self.particles.is_empty() {
            warn!("tick called on an uninitialized particle filter");
            return Estimate {
                position: None,
                confidence: 0.0,
            };
        }
        self.resample();
        self.motion_update(delta_x, delta_y);
        self.sensor_update(robot);
        let estimate = self.estimate();
        debug!(
            "tick: estimate {:?}, confidence {:.4}, effective particles {:.1}",
            estimate.position.map(|p| (p.x, p.y)),
            estimate.confidence,
            self.effective_sample_size()
        );
        estimate
    }

    fn random_particle(&mut self) -> Particle {
        let m = self.margin;
        Particle::new(
            m + self.rng.random::<f64>() * (self.world.width() - 2.0 * m),
            m + self.rng.random::<f64>() * (self.world.height() - 2.0 * m),
            1.0,
        )
    }

    /// Low-variance wheel resampling plus uniform random restarts.
    fn resample(&mut self) {
        let n = self.particles.len();
        let max_weight = self.max_weight();
        let random_count = if max_weight > 0.0 {
            ((n as f64 * self.config.percent_random).round() as usize).min(n)
        } else {
            warn!("All particle weights are zero, redrawing {n} particles uniformly");
            n
        };

        let mut resampled = Vec::with_capacity(n);
        let mut index = self.rng.random_range(0..n);
        let mut beta = 0.0;
        for _ in 0..n - random_count {
            beta += self.rng.random::<f64>() * 2.0 * max_weight;
            loop {
                let weight = self.particles[index].effective_weight();
                if !(beta > weight) {
                    break;
                }
                beta -= weight;
                index = (index + 1) % n;
            }
            let chosen = &self.particles[index];
            resampled.push(Particle::new(chosen.x, chosen.y, 1.0));
        }
        for _ in 0..random_count {
            let p = self.random_particle();
            resampled.push(p);
        }
        trace!(
            "Resampled {} particles from the wheel and {} at random",
            n - random_count,
            random_count
        );
        self.particles = resampled;
    }

    /// Shift every particle by the odometry delta plus independent Gaussian noise per axis.
    fn motion_update(&mut self, delta_x: f64, delta_y: f64) {
        let noise_x = self.motion_noise(delta_x);
        let noise_y = self.motion_noise(delta_y);
        for particle in self.particles.iter_mut() {
            particle.x += match &noise_x {
                Some(normal) => normal.sample(&mut self.rng),
                None => delta_x,
            };
            particle.y += match &noise_y {
                Some(normal) => normal.sample(&mut self.rng),
                None => delta_y,
            };
        }
    }

    fn motion_noise(&self, delta: f64) -> Option<Normal<f64>> {
        let stdev = self
            .config
            .min_motion_stdev
            .max(delta.abs() * self.config.odom_stdev);
        Normal::new(delta, stdev).ok()
    }

    fn sensor_update(&mut self, robot: &Robot) {
        let readings = self.read_sensors(robot);
        let theta = robot.theta();
        let weights: Vec<f64> = self
            .particles
            .iter()
            .map(|p| {
                if self.in_interior(p.x, p.y) {
                    self.score_position(p.x, p.y, theta, &readings)
                } else {
                    0.0
                }
            })
            .collect();
        for (particle, weight) in self.particles.iter_mut().zip(weights) {
            particle.weight = weight;
        }
    }

    fn in_interior(&self, x: f64, y: f64) -> bool {
        let m = self.margin;
        m < x && x < self.world.width() - m && m < y && y < self.world.height() - m
    }

    /// One reading per sensor from the real robot.
    pub fn read_sensors(&mut self, robot: &Robot) -> Vec<f64> {
        self.sensors
            .iter()
            .map(|sensor| sensor.get_distance(robot, &self.world, &self.sensor_model, &mut self.rng))
            .collect()
    }

    /// Likelihood of the robot being at `(x, y)` with heading `theta`, given one reading per
    /// sensor.
    ///
    /// Zero if any sensor would sit outside the arena.
    pub fn score_position(&self, x: f64, y: f64, theta: f64, readings: &[f64]) -> f64 {
        let pose = Pose::new(x, y, theta);
        let mut weight = 1.0;
        for (sensor, &actual) in self.sensors.iter().zip(readings) {
            let ray = sensor.get_position(&pose);
            if !self.world.contains(ray.x, ray.y) {
                return 0.0;
            }
            let expected = self
                .world
                .predict_distance(&ray, self.config.predict_with_obstacles);
            weight *= self.likelihood.sensor_probability(&SensorObservation {
                world: &self.world,
                ray,
                include_obstacles: self.config.predict_with_obstacles,
                expected,
                actual,
            });
            if weight == 0.0 {
                return 0.0;
            }
        }
        weight
    }

    /// Weighted mean position and mean weight of the current population.
    pub fn estimate(&self) -> Estimate {
        if self.particles.is_empty() {
            return Estimate {
                position: None,
                confidence: 0.0,
            };
        }
        let (mut total_x, mut total_y, mut total_weight) = (0.0, 0.0, 0.0);
        for particle in &self.particles {
            let w = particle.effective_weight();
            total_x += particle.x * w;
            total_y += particle.y * w;
            total_weight += w;
        }
        let position = if total_weight > 0.0 && total_weight.is_finite() {
            Some(Point2::new(total_x / total_weight, total_y / total_weight))
        } else {
            None
        };
        Estimate {
            position,
            confidence: total_weight / self.particles.len() as f64,
        }
    }

    /// True sensor rays from the robot, obstacles included.
    pub fn sensor_rays(&self, robot: &Robot) -> Vec<SensorRay> {
        self.sensors
            .iter()
            .map(|sensor| {
                let ray = sensor.get_position(&robot.pose);
                let distance = self.world.predict_distance(&ray, true);
                SensorRay {
                    ray,
                    distance,
                    in_range: distance <= self.world.sensing_max(),
                }
            })
            .collect()
    }

    /// Largest weight in the population, ignoring `NaN`.
    pub fn max_weight(&self) -> f64 {
        self.particles
            .iter()
            .map(Particle::effective_weight)
            .fold(0.0, f64::max)
    }

    /// N_eff = (Σw)² / Σw², zero when all weights are zero.
    pub fn effective_sample_size(&self) -> f64 {
        let (sum, sum_of_squares) = self
            .particles
            .iter()
            .map(Particle::effective_weight)
            .fold((0.0, 0.0), |(s, s2), w| (s + w, s2 + w * w));
        if sum_of_squares > 0.0 {
            sum * sum / sum_of_squares
        } else {
            0.0
        }
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }
    pub fn num_particles(&self) -> usize {
        self.particles.len()
    }
    pub fn sensors(&self) -> &[DistanceSensor] {
        &self.sensors
    }
    pub fn world(&self) -> &World {
        &self.world
    }
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }
    /// Inset from each wall inside which particles are scored.
    pub fn margin(&self) -> f64 {
        self.margin
    }
}
