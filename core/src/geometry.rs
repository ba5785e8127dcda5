//! Ray casting against the static arena: four boundary walls and any number of circular obstacles.
//!
//! All queries return a distance along the ray's forward direction, or `f64::INFINITY` when nothing
//! is hit. Degenerate cases (parallel lines, rays that miss a circle entirely, hits behind the ray
//! origin) are resolved to `INFINITY` instead of propagating `NaN` or panicking.
//!
//! # Example
//!
//! ```rust
//! use mcl::geometry::{Ray, World};
//!
//! let world = World::new(100.0, 100.0, 200.0, vec![]).unwrap();
//! let ray = Ray::new(50.0, 50.0, 0.0);
//! assert!((world.predict_distance(&ray, true) - 50.0).abs() < 1e-9);
//! ```
use anyhow::{Result, bail};
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

/// Rays whose heading cosine is within this of zero are treated as vertical.
const VERTICAL_TOLERANCE: f64 = f64::EPSILON;

/// A directed half-line starting at `(x, y)` with heading `theta` (radians, unwrapped).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

impl Ray {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Ray { x, y, theta }
    }
    pub fn origin(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
    /// Unit vector along the ray heading.
    pub fn direction(&self) -> Vector2<f64> {
        Vector2::new(self.theta.cos(), self.theta.sin())
    }
    /// Point reached after travelling `distance` along the ray.
    pub fn point_at(&self, distance: f64) -> Point2<f64> {
        self.origin() + self.direction() * distance
    }
}

/// Circular obstacle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
}

impl Obstacle {
    pub fn new(x: f64, y: f64, radius: f64) -> Self {
        Obstacle { x, y, radius }
    }
    pub fn center(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
}

/// Read-only description of the arena `[0, width] x [0, height]` and its obstacles.
///
/// A `World` is built once per run and shared by reference with every sensor and filter query.
#[derive(Clone, Debug, PartialEq)]
pub struct World {
    width: f64,
    height: f64,
    sensing_max: f64,
    obstacles: Vec<Obstacle>,
}

impl World {
    /// Build a world, validating the arena dimensions, sensing range and obstacle radii.
    pub fn new(width: f64, height: f64, sensing_max: f64, obstacles: Vec<Obstacle>) -> Result<Self> {
        if !(width.is_finite() && width > 0.0) || !(height.is_finite() && height > 0.0) {
            bail!("Arena dimensions must be finite and positive, got {width} x {height}");
        }
        if sensing_max.is_nan() || sensing_max <= 0.0 {
            bail!("Sensing range must be positive, got {sensing_max}");
        }
        if let Some(bad) = obstacles
            .iter()
            .find(|o| !(o.radius >= 0.0) || !o.x.is_finite() || !o.y.is_finite())
        {
            bail!("Invalid obstacle {:?}: radius must be non-negative and center finite", bad);
        }
        Ok(World {
            width,
            height,
            sensing_max,
            obstacles,
        })
    }
    pub fn width(&self) -> f64 {
        self.width
    }
    pub fn height(&self) -> f64 {
        self.height
    }
    /// Maximum distance a range sensor can report before reading out of range.
    pub fn sensing_max(&self) -> f64 {
        self.sensing_max
    }
    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }
    /// Whether `(x, y)` lies inside the closed arena rectangle.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        (0.0..=self.width).contains(&x) && (0.0..=self.height).contains(&y)
    }
    /// Boundary walls in a fixed order: bottom, right, top, left.
    pub fn walls(&self) -> [(Point2<f64>, Point2<f64>); 4] {
        let (w, h) = (self.width, self.height);
        [
            (Point2::new(0.0, 0.0), Point2::new(w, 0.0)),
            (Point2::new(w, 0.0), Point2::new(w, h)),
            (Point2::new(w, h), Point2::new(0.0, h)),
            (Point2::new(0.0, h), Point2::new(0.0, 0.0)),
        ]
    }
    /// Distance from the ray origin to the nearest wall (and obstacle, if `include_obstacles`).
    ///
    /// Returns `f64::INFINITY` if nothing is hit.
    pub fn predict_distance(&self, ray: &Ray, include_obstacles: bool) -> f64 {
        let walls = self
            .walls()
            .into_iter()
            .map(|(a, b)| distance_to_segment(ray, &a, &b));
        let nearest_wall = walls.fold(f64::INFINITY, f64::min);
        if !include_obstacles {
            return nearest_wall;
        }
        self.obstacles
            .iter()
            .map(|o| distance_to_circle(ray, o))
            .fold(nearest_wall, f64::min)
    }
}

fn is_bounded(value: f64, a: f64, b: f64) -> bool {
    let (lo, hi) = if b < a { (b, a) } else { (a, b) };
    lo <= value && value <= hi
}

/// Distance along `ray` to the segment `a`–`b`, or `INFINITY` if the ray misses it.
///
/// The intersection of the two supporting lines is computed in slope–intercept form, with the
/// vertical segment and vertical ray handled separately. A hit only counts if it lies within the
/// segment's bounding box and in front of the ray origin.
pub fn distance_to_segment(ray: &Ray, a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    let (cos, sin) = (ray.theta.cos(), ray.theta.sin());
    let vertical_segment = b.x - a.x == 0.0;
    let vertical_ray = cos.abs() <= VERTICAL_TOLERANCE;

    let (hit_x, hit_y) = match (vertical_segment, vertical_ray) {
        (true, true) => return f64::INFINITY,
        (true, false) => {
            let hit_x = a.x;
            (hit_x, sin / cos * (hit_x - ray.x) + ray.y)
        }
        (false, true) => {
            let segment_slope = (b.y - a.y) / (b.x - a.x);
            let hit_x = ray.x;
            (hit_x, segment_slope * (hit_x - a.x) + a.y)
        }
        (false, false) => {
            let segment_slope = (b.y - a.y) / (b.x - a.x);
            let ray_slope = sin / cos;
            if segment_slope == ray_slope {
                return f64::INFINITY;
            }
            let segment_intercept = a.y - segment_slope * a.x;
            let ray_intercept = ray.y - ray_slope * ray.x;
            let hit_x = (ray_intercept - segment_intercept) / (segment_slope - ray_slope);
            (hit_x, segment_slope * hit_x + segment_intercept)
        }
    };

    if !(is_bounded(hit_x, a.x, b.x) && is_bounded(hit_y, a.y, b.y)) {
        return f64::INFINITY;
    }
    let delta_x = hit_x - ray.x;
    let delta_y = hit_y - ray.y;
    // Forward means the hit projects positively onto the heading; this also accepts hits along
    // an axis-aligned ray where one component of the offset is exactly zero.
    if delta_x * cos + delta_y * sin <= 0.0 {
        return f64::INFINITY;
    }
    (delta_x * delta_x + delta_y * delta_y).sqrt()
}

/// Distance along `ray` to the first crossing of the obstacle's circle, or `INFINITY`.
///
/// With the center translated to the origin, the hit distances are `a ∓ b` where `a` is the
/// projection of the center onto the ray and `b` is half the chord length. The nearer positive
/// root wins; a ray starting inside the circle reports the exit distance `a + b`.
pub fn distance_to_circle(ray: &Ray, obstacle: &Obstacle) -> f64 {
    let x = ray.x - obstacle.x;
    let y = ray.y - obstacle.y;
    let (cos, sin) = (ray.theta.cos(), ray.theta.sin());
    let r2 = obstacle.radius * obstacle.radius;

    let a = -x * cos - y * sin;
    let discriminant = 2.0 * x * y * sin * cos + (r2 - y * y) * cos * cos + (r2 - x * x) * sin * sin;
    if discriminant.is_nan() || discriminant < 0.0 {
        return f64::INFINITY;
    }
    let b = discriminant.sqrt();

    if a - b > 0.0 {
        a - b
    } else if a + b > 0.0 {
        a + b
    } else {
        f64::INFINITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

    fn open_arena() -> World {
        World::new(100.0, 100.0, 200.0, vec![]).unwrap()
    }

    #[test]
    fn test_ray_straight_at_each_wall() {
        let world = open_arena();
        assert_approx_eq!(world.predict_distance(&Ray::new(30.0, 40.0, 0.0), false), 70.0, 1e-9);
        assert_approx_eq!(world.predict_distance(&Ray::new(30.0, 40.0, PI), false), 30.0, 1e-9);
        assert_approx_eq!(world.predict_distance(&Ray::new(30.0, 40.0, FRAC_PI_2), false), 60.0, 1e-9);
        assert_approx_eq!(world.predict_distance(&Ray::new(30.0, 40.0, -FRAC_PI_2), false), 40.0, 1e-9);
    }

    #[test]
    fn test_heading_is_not_wrapped() {
        let world = open_arena();
        let base = world.predict_distance(&Ray::new(30.0, 40.0, 0.3), false);
        let wrapped = world.predict_distance(&Ray::new(30.0, 40.0, 0.3 + 4.0 * PI), false);
        assert_approx_eq!(base, wrapped, 1e-9);
    }

    #[test]
    fn test_diagonal_ray_hits_corner_region() {
        let world = open_arena();
        let d = world.predict_distance(&Ray::new(50.0, 50.0, FRAC_PI_4), false);
        assert_approx_eq!(d, 50.0 * 2.0_f64.sqrt(), 1e-9);
    }

    #[test]
    fn test_ray_from_corner_hits_far_wall() {
        let world = World::new(120.0, 80.0, 200.0, vec![]).unwrap();
        assert_approx_eq!(world.predict_distance(&Ray::new(0.0, 0.0, 0.0), false), 120.0, 1e-9);
    }

    #[test]
    fn test_ray_parallel_to_wall_misses_it() {
        let bottom = (Point2::new(0.0, 0.0), Point2::new(100.0, 0.0));
        let d = distance_to_segment(&Ray::new(50.0, 50.0, 0.0), &bottom.0, &bottom.1);
        assert!(d.is_infinite());

        let left = (Point2::new(0.0, 100.0), Point2::new(0.0, 0.0));
        let d = distance_to_segment(&Ray::new(50.0, 50.0, FRAC_PI_2), &left.0, &left.1);
        assert!(d.is_infinite());
    }

    #[test]
    fn test_segment_behind_ray_is_rejected() {
        let right = (Point2::new(100.0, 0.0), Point2::new(100.0, 100.0));
        let d = distance_to_segment(&Ray::new(50.0, 50.0, PI), &right.0, &right.1);
        assert!(d.is_infinite());
    }

    #[test]
    fn test_segment_endpoint_order_does_not_matter() {
        let ray = Ray::new(10.0, 10.0, 0.2);
        let a = Point2::new(60.0, -10.0);
        let b = Point2::new(40.0, 80.0);
        assert_approx_eq!(distance_to_segment(&ray, &a, &b), distance_to_segment(&ray, &b, &a), 1e-9);
    }

    #[test]
    fn test_circle_in_front() {
        let ray = Ray::new(0.0, 0.0, 0.0);
        let d = distance_to_circle(&ray, &Obstacle::new(10.0, 0.0, 2.0));
        assert_approx_eq!(d, 8.0, 1e-9);
    }

    #[test]
    fn test_circle_from_inside_reports_exit() {
        let ray = Ray::new(10.0, 0.0, 0.0);
        let d = distance_to_circle(&ray, &Obstacle::new(10.0, 0.0, 2.0));
        assert_approx_eq!(d, 2.0, 1e-9);
    }

    #[test]
    fn test_circle_missed_or_behind() {
        let missed = distance_to_circle(&Ray::new(0.0, 0.0, 0.0), &Obstacle::new(10.0, 5.0, 2.0));
        assert!(missed.is_infinite());
        let behind = distance_to_circle(&Ray::new(0.0, 0.0, PI), &Obstacle::new(10.0, 0.0, 2.0));
        assert!(behind.is_infinite());
    }

    #[test]
    fn test_obstacles_only_when_requested() {
        let world = World::new(100.0, 100.0, 200.0, vec![Obstacle::new(70.0, 50.0, 5.0)]).unwrap();
        let ray = Ray::new(50.0, 50.0, 0.0);
        assert_approx_eq!(world.predict_distance(&ray, true), 15.0, 1e-9);
        assert_approx_eq!(world.predict_distance(&ray, false), 50.0, 1e-9);
    }

    #[test]
    fn test_world_rejects_bad_dimensions() {
        assert!(World::new(0.0, 10.0, 10.0, vec![]).is_err());
        assert!(World::new(10.0, f64::INFINITY, 10.0, vec![]).is_err());
        assert!(World::new(10.0, 10.0, 0.0, vec![]).is_err());
        assert!(World::new(10.0, 10.0, 10.0, vec![Obstacle::new(1.0, 1.0, -1.0)]).is_err());
    }

    #[test]
    fn test_point_at() {
        let p = Ray::new(1.0, 2.0, FRAC_PI_2).point_at(3.0);
        assert_approx_eq!(p.x, 1.0, 1e-12);
        assert_approx_eq!(p.y, 5.0, 1e-12);
    }
}
