//! Planar robot pose and the kinematic integrator that moves it.
use nalgebra::{Rotation2, Vector2};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Position and heading in arena coordinates. `theta` is in radians and is never wrapped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Pose { x, y, theta }
    }
    /// Rotate a body-frame vector (forward, lateral) into the world frame.
    ///
    /// Forward lies along `theta` and lateral along `theta + π/2`.
    pub fn body_to_world(&self, forward: f64, lateral: f64) -> Vector2<f64> {
        Rotation2::new(self.theta) * Vector2::new(forward, lateral)
    }
}

impl Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3} rad)", self.x, self.y, self.theta)
    }
}

/// Rectangular robot body with its current true pose.
#[derive(Clone, Debug, PartialEq)]
pub struct Robot {
    /// Body extent across the heading.
    pub width: f64,
    /// Body extent along the heading.
    pub length: f64,
    pub pose: Pose,
}

impl Robot {
    pub fn new(width: f64, length: f64, pose: Pose) -> Self {
        Robot {
            width,
            length,
            pose,
        }
    }
    pub fn x(&self) -> f64 {
        self.pose.x
    }
    pub fn y(&self) -> f64 {
        self.pose.y
    }
    pub fn theta(&self) -> f64 {
        self.pose.theta
    }
    /// Half the smaller body dimension: the closest the robot center can get to a wall.
    pub fn margin(&self) -> f64 {
        0.5 * self.width.min(self.length)
    }
    /// Apply a local motion command.
    ///
    /// The heading is turned first, then the displacement is taken in the new body frame.
    /// Returns the world-frame displacement that was applied, which is the odometry delta a
    /// particle filter consumes.
    pub fn move_local(&mut self, forward: f64, strafe: f64, turn: f64) -> Vector2<f64> {
        self.pose.theta += turn;
        let delta = self.pose.body_to_world(forward, strafe);
        self.pose.x += delta.x;
        self.pose.y += delta.y;
        delta
    }
}
