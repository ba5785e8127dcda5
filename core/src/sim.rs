//! Headless simulation: drive a robot around the arena and localize it every tick.
//!
//! This stands in for an interactive front end. The robot follows the scripted
//! [`MotionConfig`](crate::config::MotionConfig) command each tick, reversing direction when a
//! move would take its body through a wall, and the filter is fed the resulting odometry.
use anyhow::Result;
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::config::SimulationConfig;
use crate::particle::{Estimate, ParticleFilter};
use crate::robot::Robot;
use crate::sensor::DistanceSensor;

/// One row of simulation output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    pub tick: usize,
    pub true_x: f64,
    pub true_y: f64,
    pub true_theta: f64,
    pub estimate_x: Option<f64>,
    pub estimate_y: Option<f64>,
    /// Euclidean distance between truth and estimate, when there is an estimate.
    pub error: Option<f64>,
    pub confidence: f64,
    pub effective_particles: f64,
}

impl TickRecord {
    fn new(tick: usize, robot: &Robot, estimate: &Estimate, effective_particles: f64) -> Self {
        let error = estimate
            .position
            .map(|p| ((p.x - robot.x()).powi(2) + (p.y - robot.y()).powi(2)).sqrt());
        TickRecord {
            tick,
            true_x: robot.x(),
            true_y: robot.y(),
            true_theta: robot.theta(),
            estimate_x: estimate.x(),
            estimate_y: estimate.y(),
            error,
            confidence: estimate.confidence,
            effective_particles,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SimulationResult {
    pub seed: u64,
    pub records: Vec<TickRecord>,
}

impl SimulationResult {
    /// Mean localization error over ticks that produced an estimate.
    pub fn mean_error(&self) -> Option<f64> {
        let errors: Vec<f64> = self.records.iter().filter_map(|r| r.error).collect();
        if errors.is_empty() {
            None
        } else {
            Some(errors.iter().sum::<f64>() / errors.len() as f64)
        }
    }
    pub fn final_error(&self) -> Option<f64> {
        self.records.last().and_then(|r| r.error)
    }
    pub fn mean_confidence(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        self.records.iter().map(|r| r.confidence).sum::<f64>() / self.records.len() as f64
    }
    /// Write the records to a CSV file with a header row.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
    pub fn from_csv<P: AsRef<Path>>(path: P, seed: u64) -> io::Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for result in reader.deserialize() {
            records.push(result?);
        }
        Ok(SimulationResult { seed, records })
    }
}

/// Whether the robot body is strictly inside the arena.
fn body_inside(robot: &Robot, width: f64, height: f64) -> bool {
    let m = robot.margin();
    m < robot.x() && robot.x() < width - m && m < robot.y() && robot.y() < height - m
}

/// Run a full simulation as described by `config`.
pub fn run_simulation(config: &SimulationConfig) -> Result<SimulationResult> {
    config.validate()?;
    let world = Arc::new(config.world.build()?);
    let mut rng = StdRng::seed_from_u64(config.seed);

    let sensors: Vec<DistanceSensor> = config
        .sensors
        .iter()
        .map(|s| match s.calibration {
            Some(calibration) => DistanceSensor::new(s.mount, calibration),
            None => DistanceSensor::with_random_calibration(s.mount, &mut rng),
        })
        .collect();

    let mut robot = Robot::new(config.robot.width, config.robot.length, config.robot.start);
    let mut filter = ParticleFilter::new_with_seed(
        Arc::clone(&world),
        sensors,
        config.filter.clone(),
        rng.random(),
    )?;
    filter.initialize(
        robot.x(),
        robot.y(),
        config.particle_count,
        &robot,
        config.initial_stdev,
    )?;
    info!(
        "Simulation seed {}: {} particles, {} sensors, {} likelihood, {} ticks",
        config.seed,
        config.particle_count,
        config.sensors.len(),
        config.filter.likelihood,
        config.ticks
    );

    let motion = config.motion;
    let mut direction = 1.0;
    let mut records = Vec::with_capacity(config.ticks);
    for tick in 0..config.ticks {
        let mut candidate = robot.clone();
        candidate.move_local(direction * motion.forward, direction * motion.strafe, motion.turn);
        if !body_inside(&candidate, world.width(), world.height()) {
            direction = -direction;
        }
        let mut candidate = robot.clone();
        candidate.move_local(direction * motion.forward, direction * motion.strafe, motion.turn);
        let delta = if body_inside(&candidate, world.width(), world.height()) {
            robot.move_local(direction * motion.forward, direction * motion.strafe, motion.turn)
        } else {
            robot.move_local(0.0, 0.0, motion.turn)
        };

        let estimate = filter.tick(delta.x, delta.y, &robot);
        records.push(TickRecord::new(
            tick,
            &robot,
            &estimate,
            filter.effective_sample_size(),
        ));
    }

    let result = SimulationResult {
        seed: config.seed,
        records,
    };
    info!(
        "Simulation seed {} finished: mean error {:?}, final error {:?}, mean confidence {:.4}",
        config.seed,
        result.mean_error(),
        result.final_error(),
        result.mean_confidence()
    );
    Ok(result)
}
