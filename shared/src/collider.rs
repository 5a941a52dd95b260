//! Axis aligned collider geometry shared by physics, combat and AI range checks.

use crate::math::Vec3;
use serde::{Deserialize, Serialize};

/// Axis aligned bounding box described by its center and half extents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub center: Vec3,
    pub half_extents: Vec3,
}

/// Result of a ray or sweep test against a collider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub distance: f32,
    pub point: Vec3,
    pub normal: Vec3,
}

fn component(v: &Vec3, axis: usize) -> f32 {
    match axis {
        0 => v.x,
        1 => v.y,
        _ => v.z,
    }
}

fn unit_axis(axis: usize, sign: f32) -> Vec3 {
    match axis {
        0 => Vec3::new(sign, 0.0, 0.0),
        1 => Vec3::new(0.0, sign, 0.0),
        _ => Vec3::new(0.0, 0.0, sign),
    }
}

impl Bounds {
    pub fn new(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            center,
            half_extents,
        }
    }

    /// Box standing on `feet` with the given horizontal radius and height.
    pub fn from_feet(feet: Vec3, radius: f32, height: f32) -> Self {
        Self {
            center: Vec3::new(feet.x, feet.y + height / 2.0, feet.z),
            half_extents: Vec3::new(radius, height / 2.0, radius),
        }
    }

    pub fn min(&self) -> Vec3 {
        self.center - self.half_extents
    }

    pub fn max(&self) -> Vec3 {
        self.center + self.half_extents
    }

    pub fn height(&self) -> f32 {
        self.half_extents.y * 2.0
    }

    pub fn contains(&self, point: Vec3) -> bool {
        let (min, max) = (self.min(), self.max());
        point.x >= min.x
            && point.x <= max.x
            && point.y >= min.y
            && point.y <= max.y
            && point.z >= min.z
            && point.z <= max.z
    }

    /// Strict overlap test. Touching faces do not count.
    pub fn intersects(&self, other: &Bounds) -> bool {
        let (a_min, a_max) = (self.min(), self.max());
        let (b_min, b_max) = (other.min(), other.max());
        !(a_max.x <= b_min.x
            || b_max.x <= a_min.x
            || a_max.y <= b_min.y
            || b_max.y <= a_min.y
            || a_max.z <= b_min.z
            || b_max.z <= a_min.z)
    }

    /// Point on (or inside) the box nearest to `point`.
    pub fn closest_point(&self, point: Vec3) -> Vec3 {
        let (min, max) = (self.min(), self.max());
        Vec3::new(
            point.x.clamp(min.x, max.x),
            point.y.clamp(min.y, max.y),
            point.z.clamp(min.z, max.z),
        )
    }

    pub fn expanded(&self, margin: f32) -> Bounds {
        Bounds::new(
            self.center,
            self.half_extents + Vec3::new(margin, margin, margin),
        )
    }

    pub fn overlaps_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.closest_point(center).distance(&center) <= radius
    }

    /// Slab test. `direction` must be normalized. A ray starting inside the
    /// box reports a hit at distance zero.
    pub fn ray_cast(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<RayHit> {
        let (min, max) = (self.min(), self.max());
        let mut t_min = f32::NEG_INFINITY;
        let mut t_max = f32::INFINITY;
        let mut normal = Vec3::ZERO;

        for axis in 0..3 {
            let o = component(&origin, axis);
            let d = component(&direction, axis);
            let lo = component(&min, axis);
            let hi = component(&max, axis);

            if d.abs() < 1e-8 {
                if o < lo || o > hi {
                    return None;
                }
                continue;
            }

            let mut t1 = (lo - o) / d;
            let mut t2 = (hi - o) / d;
            let mut sign = -1.0;
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
                sign = 1.0;
            }
            if t1 > t_min {
                t_min = t1;
                normal = unit_axis(axis, sign);
            }
            t_max = t_max.min(t2);
            if t_min > t_max {
                return None;
            }
        }

        if t_max < 0.0 {
            return None;
        }
        if t_min < 0.0 {
            return Some(RayHit {
                distance: 0.0,
                point: origin,
                normal: -direction,
            });
        }
        if t_min > max_distance {
            return None;
        }
        Some(RayHit {
            distance: t_min,
            point: origin + direction * t_min,
            normal,
        })
    }

    /// True if the segment from `a` to `b` passes through the box.
    pub fn intersects_segment(&self, a: Vec3, b: Vec3) -> bool {
        let delta = b - a;
        let length = delta.magnitude();
        if length <= f32::EPSILON {
            return self.contains(a);
        }
        self.ray_cast(a, delta.scale(1.0 / length), length).is_some()
    }
}

/// Gap between two boxes along their closest points (0 when overlapping).
pub fn closest_distance(a: &Bounds, b: &Bounds) -> f32 {
    let (a_min, a_max) = (a.min(), a.max());
    let (b_min, b_max) = (b.min(), b.max());
    let gap = |lo_a: f32, hi_a: f32, lo_b: f32, hi_b: f32| (lo_b - hi_a).max(lo_a - hi_b).max(0.0);
    let dx = gap(a_min.x, a_max.x, b_min.x, b_max.x);
    let dy = gap(a_min.y, a_max.y, b_min.y, b_max.y);
    let dz = gap(a_min.z, a_max.z, b_min.z, b_max.z);
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// Checks whether `other` can be reached from the bottom, center or top of
/// `origin` within `max_distance`, where `blocked` reports obstructed
/// segments. Used so a target standing on a roof right above counts as
/// unreachable even though it is close.
pub fn is_reachable_vertically<F>(origin: &Bounds, other: &Bounds, max_distance: f32, blocked: F) -> bool
where
    F: Fn(Vec3, Vec3) -> bool,
{
    let (min, max) = (origin.min(), origin.max());
    let samples = [
        origin.center.with_y(min.y + 0.01),
        origin.center,
        origin.center.with_y(max.y - 0.01),
    ];

    samples.iter().any(|sample| {
        let target = other.closest_point(*sample);
        sample.distance(&target) <= max_distance && !blocked(*sample, target)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn unit_box(x: f32, y: f32, z: f32) -> Bounds {
        Bounds::new(Vec3::new(x, y, z), Vec3::new(0.5, 0.5, 0.5))
    }

    #[test]
    fn test_from_feet() {
        let b = Bounds::from_feet(Vec3::new(1.0, 2.0, 3.0), 0.5, 2.0);
        assert_approx_eq!(b.min().y, 2.0);
        assert_approx_eq!(b.max().y, 4.0);
        assert_approx_eq!(b.height(), 2.0);
    }

    #[test]
    fn test_intersects_exact_touch() {
        let a = unit_box(0.0, 0.0, 0.0);
        let b = unit_box(1.0, 0.0, 0.0);
        assert!(!a.intersects(&b));
        assert!(a.intersects(&unit_box(0.5, 0.0, 0.0)));
    }

    #[test]
    fn test_closest_distance() {
        let a = unit_box(0.0, 0.0, 0.0);
        let b = unit_box(3.0, 0.0, 0.0);
        assert_approx_eq!(closest_distance(&a, &b), 2.0);
        assert_approx_eq!(closest_distance(&a, &unit_box(0.2, 0.0, 0.0)), 0.0);
    }

    #[test]
    fn test_ray_cast_hits_near_face() {
        let b = unit_box(5.0, 0.0, 0.0);
        let hit = b
            .ray_cast(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), 10.0)
            .unwrap();
        assert_approx_eq!(hit.distance, 4.5);
        assert_approx_eq!(hit.normal.x, -1.0);
    }

    #[test]
    fn test_ray_cast_respects_range_and_direction() {
        let b = unit_box(5.0, 0.0, 0.0);
        assert!(b.ray_cast(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), 4.0).is_none());
        assert!(b.ray_cast(Vec3::ZERO, Vec3::new(-1.0, 0.0, 0.0), 10.0).is_none());
        assert!(b.ray_cast(Vec3::ZERO, Vec3::new(0.0, 1.0, 0.0), 10.0).is_none());
    }

    #[test]
    fn test_segment_intersection() {
        let wall = Bounds::new(Vec3::new(2.0, 1.0, 0.0), Vec3::new(0.1, 1.0, 5.0));
        assert!(wall.intersects_segment(Vec3::new(0.0, 1.0, 0.0), Vec3::new(4.0, 1.0, 0.0)));
        assert!(!wall.intersects_segment(Vec3::new(0.0, 1.0, 0.0), Vec3::new(1.5, 1.0, 0.0)));
    }

    #[test]
    fn test_reachable_vertically() {
        let me = Bounds::from_feet(Vec3::ZERO, 0.5, 2.0);
        let near = Bounds::from_feet(Vec3::new(1.5, 0.0, 0.0), 0.5, 2.0);
        let roof = Bounds::from_feet(Vec3::new(0.0, 6.0, 0.0), 0.5, 2.0);

        assert!(is_reachable_vertically(&me, &near, 2.0, |_, _| false));
        assert!(!is_reachable_vertically(&me, &roof, 2.0, |_, _| false));
        assert!(!is_reachable_vertically(&me, &near, 2.0, |_, _| true));
    }
}
