//! Monte Carlo localization of a mobile robot in a known rectangular arena
//!
//! This crate estimates the position of a robot confined to a rectangular arena from noisy odometry and noisy
//! range-sensor readings, using a particle filter. The map (arena bounds and circular obstacles) is known and static;
//! this is not a SLAM system. It is intended as an engine: rendering, input handling, and whatever loop drives the
//! ticks live outside of it. A headless driver is provided in [sim] for experiments and tests.
//!
//! This crate is primarily built off of four additional dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the small vector and rotation types for poses.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): Provides random
//!   number generation for initialization, resampling, motion noise, and sensor noise.
//! - [`libm`](https://crates.io/crates/libm): Provides the complementary error function behind the normal tail
//!   probability.
//!
//! All other functionality is built on top of these crates or is auxiliary functionality (e.g. configuration I/O).
//!
//! ## Crate overview
//!
//! This crate is organized into several modules:
//! - [geometry]: Ray casting against the arena walls and circular obstacles.
//! - [robot]: Robot pose and the kinematic integrator that moves it.
//! - [sensor]: Range sensor mounting, calibration bias, reading noise, and the range-dependent noise model.
//! - [likelihood]: Strategies that score a sensor reading against a predicted distance.
//! - [particle]: The particle filter engine.
//! - [config]: Serializable configuration for the filter and for simulations.
//! - [sim]: Headless simulation driver and result records.
//!
//! ## Coordinate conventions
//!
//! Arena coordinates run over $[0, w] \times [0, h]$. A pose is $(x, y, \theta)$ with $\theta$ in radians measured
//! from the $+x$ axis and never wrapped. In the robot body frame, "forward" is along $\theta$ and "left" is along
//! $\theta + \pi/2$.
//!
//! ## Filter state
//!
//! A particle is a position hypothesis $(x, y)$ with a weight $w \ge 0$. Heading is not part of the filtered state:
//! every particle is evaluated with the robot's current heading. After a tick the filter reports
//!
//! $$
//! \hat{x} = \frac{\sum_i w_i x_i}{\sum_i w_i}, \quad \hat{y} = \frac{\sum_i w_i y_i}{\sum_i w_i}, \quad
//! c = \frac{1}{N} \sum_i w_i
//! $$
//!
//! where $c$ is the confidence. When $\sum_i w_i = 0$ there is no position estimate and
//! [`Estimate::position`](particle::Estimate::position) is `None`.
pub mod config;
pub mod geometry;
pub mod likelihood;
pub mod particle;
pub mod robot;
pub mod sensor;
pub mod sim;

pub use config::{FilterConfig, SimulationConfig, WorldConfig};
pub use geometry::{Obstacle, Ray, World};
pub use likelihood::{LikelihoodModel, LikelihoodStrategy};
pub use particle::{Estimate, Particle, ParticleFilter};
pub use robot::{Pose, Robot};
pub use sensor::{DistanceSensor, NoiseMode, ReadingNoise, SensorCalibration, SensorMount, SensorNoise};
