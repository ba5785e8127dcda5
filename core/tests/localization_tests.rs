//! Integration tests for arena Monte Carlo localization
//!
//! These tests drive the public API end to end: building a world and sensors, initializing the
//! filter, ticking it, and checking the invariants of the population and of the estimate for
//! both likelihood models.

use std::f64::consts::{FRAC_PI_2, PI};
use std::sync::Arc;

use mcl::config::{FilterConfig, MotionConfig, SimulationConfig};
use mcl::geometry::{Obstacle, World};
use mcl::likelihood::LikelihoodModel;
use mcl::particle::ParticleFilter;
use mcl::robot::{Pose, Robot};
use mcl::sensor::{DistanceSensor, NoiseMode, SensorCalibration, SensorMount};
use mcl::sim::run_simulation;

/// Four sensors facing forward, left, back and right, each 4 units from the body center.
fn ring_of_sensors() -> Vec<DistanceSensor> {
    [
        SensorMount::new(0.0, 4.0, 0.0),
        SensorMount::new(4.0, 0.0, FRAC_PI_2),
        SensorMount::new(0.0, -4.0, PI),
        SensorMount::new(-4.0, 0.0, -FRAC_PI_2),
    ]
    .into_iter()
    .map(|mount| DistanceSensor::new(mount, SensorCalibration::unbiased()))
    .collect()
}

fn arena_with_obstacle() -> Arc<World> {
    Arc::new(World::new(100.0, 100.0, 200.0, vec![Obstacle::new(75.0, 75.0, 5.0)]).unwrap())
}

#[test]
fn forward_sensor_converges_on_trivial_case() {
    let world = Arc::new(World::new(100.0, 100.0, 200.0, vec![]).unwrap());
    let sensor = DistanceSensor::new(SensorMount::new(0.0, 0.0, 0.0), SensorCalibration::unbiased());
    let robot = Robot::new(10.0, 10.0, Pose::new(50.0, 50.0, 0.0));
    assert!((sensor.true_distance(&world, &robot.pose) - 50.0).abs() < 1e-9);

    // Particles are drawn uniformly over the interior, not around the start, so whether one
    // lands within a few stdevs of the truth (σ = 1.25 at 50 units) depends on the seed. When
    // none does, the wheel clones a poor particle and confidence stays low for that seed.
    // The bound is therefore checked as a pass rate over a fixed seed range.
    let threshold = 0.3;
    let seeds = 0..40u64;
    let required = 30;

    let mut passes = 0;
    for seed in seeds.clone() {
        let mut pf =
            ParticleFilter::new_with_seed(Arc::clone(&world), vec![sensor], FilterConfig::default(), seed)
                .unwrap();
        pf.initialize(50.0, 50.0, 1000, &robot, 0.5).unwrap();
        let estimate = pf.tick(0.0, 0.0, &robot);
        assert_eq!(pf.num_particles(), 1000);
        assert!(estimate.confidence >= 0.0 && estimate.confidence <= 1.0);
        if estimate.confidence > threshold {
            passes += 1;
            let x = estimate.x().expect("estimate should exist");
            assert!((x - 50.0).abs() < 5.0, "seed {seed}: x estimate {x}");
        }
    }
    assert!(
        passes >= required,
        "confidence exceeded {threshold} on {passes} of {} seeds",
        seeds.count()
    );
}

#[test]
fn population_size_and_weights_hold_for_both_models() {
    for model in [LikelihoodModel::Bounded, LikelihoodModel::Unbounded] {
        for mode in [NoiseMode::Gaussian, NoiseMode::Ratio] {
            let config = FilterConfig {
                noise_mode: mode,
                ..FilterConfig::for_model(model)
            };
            let mut robot = Robot::new(8.0, 8.0, Pose::new(30.0, 40.0, 0.3));
            let mut pf =
                ParticleFilter::new_with_seed(arena_with_obstacle(), ring_of_sensors(), config, 17)
                    .unwrap();
            pf.initialize(30.0, 40.0, 400, &robot, 2.0).unwrap();

            for _ in 0..15 {
                let delta = robot.move_local(1.5, 0.0, 0.05);
                let estimate = pf.tick(delta.x, delta.y, &robot);
                assert_eq!(pf.num_particles(), 400, "{model}/{mode}");
                assert!(
                    pf.particles().iter().all(|p| p.weight >= 0.0),
                    "{model}/{mode}: negative or NaN weight"
                );
                assert!(estimate.confidence >= 0.0 && estimate.confidence.is_finite());
                if estimate.confidence > 0.0 {
                    assert!(estimate.position.is_some());
                }
            }
        }
    }
}

#[test]
fn bounded_model_confidence_is_a_probability() {
    let mut robot = Robot::new(8.0, 8.0, Pose::new(60.0, 30.0, -0.4));
    let mut pf = ParticleFilter::new_with_seed(
        arena_with_obstacle(),
        ring_of_sensors(),
        FilterConfig::for_model(LikelihoodModel::Bounded),
        5,
    )
    .unwrap();
    pf.initialize(60.0, 30.0, 300, &robot, 1.0).unwrap();
    for _ in 0..10 {
        let delta = robot.move_local(1.0, 0.5, 0.0);
        let estimate = pf.tick(delta.x, delta.y, &robot);
        assert!((0.0..=1.0).contains(&estimate.confidence));
        assert!(pf.particles().iter().all(|p| p.weight <= 1.0));
    }
}

#[test]
fn collapsed_prior_recovers_after_one_tick() {
    let world = Arc::new(World::new(100.0, 100.0, 200.0, vec![]).unwrap());
    let robot = Robot::new(10.0, 10.0, Pose::new(50.0, 50.0, 0.0));
    let mut pf =
        ParticleFilter::new_with_seed(world, ring_of_sensors(), FilterConfig::default(), 99).unwrap();
    // a start pose far outside the arena underflows every prior weight to zero
    pf.initialize(1.0e6, 1.0e6, 200, &robot, 0.5).unwrap();
    assert_eq!(pf.max_weight(), 0.0);
    assert!(pf.estimate().position.is_none());

    let estimate = pf.tick(0.0, 0.0, &robot);
    assert_eq!(pf.num_particles(), 200);
    assert!(estimate.confidence > 0.0);
    assert!(estimate.position.is_some());
}

#[test]
fn same_seed_same_estimates() {
    let run = |seed: u64| {
        let mut robot = Robot::new(8.0, 8.0, Pose::new(50.0, 50.0, 0.0));
        let mut pf = ParticleFilter::new_with_seed(
            arena_with_obstacle(),
            ring_of_sensors(),
            FilterConfig::default(),
            seed,
        )
        .unwrap();
        pf.initialize(50.0, 50.0, 200, &robot, 1.0).unwrap();
        (0..10)
            .map(|_| {
                let delta = robot.move_local(1.0, 0.0, 0.1);
                pf.tick(delta.x, delta.y, &robot)
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(run(3), run(3));
    assert_ne!(run(3), run(4));
}

#[test]
fn simulation_tracks_the_robot() {
    let config = SimulationConfig {
        particle_count: 1000,
        ticks: 60,
        motion: MotionConfig {
            forward: 1.0,
            strafe: 0.0,
            turn: 0.03,
        },
        ..SimulationConfig::default()
    };
    let result = run_simulation(&config).unwrap();
    let tail = &result.records[30..];
    let errors: Vec<f64> = tail.iter().filter_map(|r| r.error).collect();
    assert!(errors.len() >= tail.len() / 2);
    let mean = errors.iter().sum::<f64>() / errors.len() as f64;
    assert!(mean < 15.0, "mean tracking error {mean}");
}

#[test]
fn unknown_selectors_are_rejected() {
    assert!("kalman".parse::<LikelihoodModel>().is_err());
    assert!("laplace".parse::<NoiseMode>().is_err());
}
