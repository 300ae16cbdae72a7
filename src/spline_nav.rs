//! Hermite-cubic spline segment engine: joins waypoints with continuous velocity, unlike the
//! straight-segment engine's hard corners.

use num_traits::float::Float;

use crate::geometry::{magnitude, Vec3};
use crate::params::Params;

/// How the segment is expected to end, driving the destination tangent `v1` and whether
/// arrival is a "fast" waypoint.
#[derive(Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum SegEndType {
    /// Come to a stop at the destination.
    Stop,
    /// The next segment is a straight line; tangent continues toward its destination.
    Straight,
    /// The next segment is itself a spline; tangent continues toward its far endpoint.
    Spline,
}

/// `s` rolls over into the next segment if it lands in this (small-overshoot) window instead
/// of being reset to zero. Hard-coded; do not re-tune without flight testing (design note).
const SPLINE_ROLLOVER_WINDOW: (f32, f32) = (1.0, 1.1);

/// Hermite basis coefficients for one segment: `P(s) = H0 + H1*s + H2*s^2 + H3*s^3`.
#[derive(Clone, Copy)]
struct HermiteCoeffs {
    h0: Vec3,
    h1: Vec3,
    h2: Vec3,
    h3: Vec3,
}

impl HermiteCoeffs {
    fn new(p0: Vec3, v0: Vec3, p1: Vec3, v1: Vec3) -> Self {
        Self {
            h0: p0,
            h1: v0,
            h2: Vec3::new(
                -3. * p0.x - 2. * v0.x + 3. * p1.x - v1.x,
                -3. * p0.y - 2. * v0.y + 3. * p1.y - v1.y,
                -3. * p0.z - 2. * v0.z + 3. * p1.z - v1.z,
            ),
            h3: Vec3::new(
                2. * p0.x + v0.x - 2. * p1.x + v1.x,
                2. * p0.y + v0.y - 2. * p1.y + v1.y,
                2. * p0.z + v0.z - 2. * p1.z + v1.z,
            ),
        }
    }

    fn position(&self, s: f32) -> Vec3 {
        Vec3::new(
            self.h0.x + self.h1.x * s + self.h2.x * s * s + self.h3.x * s * s * s,
            self.h0.y + self.h1.y * s + self.h2.y * s * s + self.h3.y * s * s * s,
            self.h0.z + self.h1.z * s + self.h2.z * s * s + self.h3.z * s * s * s,
        )
    }

    fn velocity(&self, s: f32) -> Vec3 {
        Vec3::new(
            self.h1.x + 2. * self.h2.x * s + 3. * self.h3.x * s * s,
            self.h1.y + 2. * self.h2.y * s + 3. * self.h3.y * s * s,
            self.h1.z + 2. * self.h2.z * s + 3. * self.h3.z * s * s,
        )
    }
}

/// What a prior segment hands the next one, to stitch tangent continuity.
pub enum PrevSegment {
    /// Vehicle was stopped at the origin of this new segment, or there is no previous segment.
    StoppedAtOrigin,
    Straight { origin: Vec3, destination: Vec3 },
    Spline { destination_vel: Vec3 },
}

pub struct SplineNavState {
    origin: Vec3,
    destination: Vec3,
    v0: Vec3,
    v1: Vec3,
    coeffs: HermiteCoeffs,
    s: f32,
    spline_vel_scaler: f32,
    slow_down_dist: f32,
    /// WP_ACCEL/WP_SPEED at segment creation, cached because slow_down_dist is not
    /// re-evaluated mid-segment (design note) and the per-tick speed ramp needs both.
    cached_accel: f32,
    cached_speed: f32,
    fast_waypoint: bool,
    reached_destination: bool,
}

impl Default for SplineNavState {
    fn default() -> Self {
        let zero = Vec3::new(0., 0., 0.);
        Self {
            origin: zero,
            destination: zero,
            v0: zero,
            v1: zero,
            coeffs: HermiteCoeffs::new(zero, zero, zero, zero),
            s: 0.,
            spline_vel_scaler: 0.,
            slow_down_dist: 0.,
            cached_accel: 0.,
            cached_speed: 0.,
            fast_waypoint: false,
            reached_destination: true,
        }
    }
}

impl SplineNavState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a new segment. `next_destination` is only consulted when `seg_end_type` is
    /// `Straight` or `Spline`.
    pub fn set_spline_destination(
        &mut self,
        origin: Vec3,
        destination: Vec3,
        prev: PrevSegment,
        seg_end_type: SegEndType,
        next_destination: Vec3,
        params: &Params,
    ) {
        self.set_spline_origin_and_destination(
            origin,
            destination,
            prev,
            seg_end_type,
            next_destination,
            0.,
            params,
        );
    }

    /// As [`Self::set_spline_destination`], but additionally carries over an overshoot
    /// fraction of `s` from the segment that just terminated (see the rollover note on
    /// [`SPLINE_ROLLOVER_WINDOW`]).
    pub fn set_spline_origin_and_destination(
        &mut self,
        origin: Vec3,
        destination: Vec3,
        prev: PrevSegment,
        seg_end_type: SegEndType,
        next_destination: Vec3,
        prev_s: f32,
        params: &Params,
    ) {
        let delta = Vec3::new(
            destination.x - origin.x,
            destination.y - origin.y,
            destination.z - origin.z,
        );

        let mut v0 = match prev {
            PrevSegment::StoppedAtOrigin => Vec3::new(delta.x * 0.1, delta.y * 0.1, delta.z * 0.1),
            PrevSegment::Straight {
                origin: po,
                destination: pd,
            } => Vec3::new(pd.x - po.x, pd.y - po.y, pd.z - po.z),
            PrevSegment::Spline { destination_vel } => destination_vel,
        };

        let (mut v1, fast_waypoint) = match seg_end_type {
            SegEndType::Stop => (
                Vec3::new(delta.x * 0.1, delta.y * 0.1, delta.z * 0.1),
                false,
            ),
            SegEndType::Straight => (
                Vec3::new(
                    next_destination.x - destination.x,
                    next_destination.y - destination.y,
                    next_destination.z - destination.z,
                ),
                true,
            ),
            SegEndType::Spline => (
                Vec3::new(
                    next_destination.x - origin.x,
                    next_destination.y - origin.y,
                    next_destination.z - origin.z,
                ),
                true,
            ),
        };

        let sum = Vec3::new(v0.x + v1.x, v0.y + v1.y, v0.z + v1.z);
        let sum_mag = magnitude(sum);
        let delta_mag = magnitude(delta);
        if sum_mag > 4. * delta_mag && sum_mag > 1e-6 {
            let scale = 4. * delta_mag / sum_mag;
            v0 = Vec3::new(v0.x * scale, v0.y * scale, v0.z * scale);
            v1 = Vec3::new(v1.x * scale, v1.y * scale, v1.z * scale);
        }

        self.origin = origin;
        self.destination = destination;
        self.v0 = v0;
        self.v1 = v1;
        self.coeffs = HermiteCoeffs::new(origin, v0, destination, v1);
        self.s = Self::s_after_rollover(prev_s);
        self.spline_vel_scaler = 0.;
        self.cached_accel = params.wp_accel;
        self.cached_speed = params.wp_speed;
        self.slow_down_dist = params.wp_speed * params.wp_speed / (2. * params.wp_accel);
        self.fast_waypoint = fast_waypoint;
        self.reached_destination = false;
    }

    fn s_after_rollover(prev_s: f32) -> f32 {
        if prev_s > SPLINE_ROLLOVER_WINDOW.0 && prev_s < SPLINE_ROLLOVER_WINDOW.1 {
            prev_s - 1.0
        } else {
            0.
        }
    }

    pub fn reached_destination(&self) -> bool {
        self.reached_destination
    }

    pub fn s(&self) -> f32 {
        self.s
    }

    pub fn v0(&self) -> Vec3 {
        self.v0
    }

    pub fn v1(&self) -> Vec3 {
        self.v1
    }

    /// Velocity the next segment should treat as its `prev`'s continuity vector.
    pub fn spline_destination_vel(&self) -> Vec3 {
        self.coeffs.velocity(self.s)
    }

    /// Per-tick advance along the curve. `dt` in seconds. Returns the published target
    /// position and commanded yaw (centi-degrees).
    pub fn advance_spline_target_along_track(&mut self, dt: f32) -> (Vec3, f32) {
        let p_s = self.coeffs.position(self.s);
        let v_s = self.coeffs.velocity(self.s);

        if self.reached_destination {
            return (p_s, crate::geometry::bearing_of_cd(v_s));
        }

        let d = magnitude(Vec3::new(
            self.destination.x - p_s.x,
            self.destination.y - p_s.y,
            self.destination.z - p_s.z,
        ));

        if !self.fast_waypoint && d < self.slow_down_dist {
            self.spline_vel_scaler = (2. * self.cached_accel * d).max(0.).sqrt();
        } else if self.spline_vel_scaler < self.cached_speed {
            self.spline_vel_scaler += self.cached_accel * 0.1;
        }
        self.spline_vel_scaler = self.spline_vel_scaler.min(self.cached_speed);

        let v_mag = magnitude(v_s);
        let s_scale = if v_mag > 1e-6 {
            self.spline_vel_scaler / v_mag
        } else {
            0.
        };
        self.s += s_scale * dt;

        let yaw = crate::geometry::bearing_of_cd(v_s);

        if self.s >= 1. {
            self.reached_destination = true;
        }

        (p_s, yaw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> Params {
        let mut p = Params::default();
        p.wp_speed = 500.;
        p.wp_accel = 100.;
        p
    }

    #[test]
    fn tangent_continuity_across_straight_and_spline_segments() {
        let p0 = Vec3::new(0., 0., 0.);
        let p1 = Vec3::new(1000., 0., 0.);
        let p2 = Vec3::new(1000., 1000., 0.);
        let params = params();

        let mut seg1 = SplineNavState::new();
        seg1.set_spline_destination(
            p0,
            p1,
            PrevSegment::StoppedAtOrigin,
            SegEndType::Spline,
            p2,
            &params,
        );

        // Per spec: v1 for a SPLINE seg_end_type is next_destination - origin = p2 - p0.
        assert!((seg1.v1().x - (p2.x - p0.x)).abs() < 1e-3);
        assert!((seg1.v1().y - (p2.y - p0.y)).abs() < 1e-3);

        let mut seg2 = SplineNavState::new();
        seg2.set_spline_destination(
            p1,
            p2,
            PrevSegment::Spline {
                destination_vel: seg1.v1(),
            },
            SegEndType::Stop,
            Vec3::new(0., 0., 0.),
            &params,
        );

        assert!((seg2.v0().x - seg1.v1().x).abs() < 1e-3);
        assert!((seg2.v0().y - seg1.v1().y).abs() < 1e-3);
    }

    #[test]
    fn overshoot_guard_rescales_long_tangents() {
        let p0 = Vec3::new(0., 0., 0.);
        let p1 = Vec3::new(100., 0., 0.);
        let params = params();

        let mut seg = SplineNavState::new();
        // A previous-straight tangent far longer than 4x the segment itself.
        seg.set_spline_destination(
            p0,
            p1,
            PrevSegment::Straight {
                origin: Vec3::new(0., 0., 0.),
                destination: Vec3::new(2000., 0., 0.),
            },
            SegEndType::Stop,
            Vec3::new(0., 0., 0.),
            &params,
        );

        let sum = magnitude(Vec3::new(
            seg.v0().x + seg.v1().x,
            seg.v0().y + seg.v1().y,
            seg.v0().z + seg.v1().z,
        ));
        let delta_mag = magnitude(Vec3::new(p1.x - p0.x, p1.y - p0.y, p1.z - p0.z));
        assert!(sum <= 4. * delta_mag + 1e-3);
    }

    #[test]
    fn s_rollover_carries_small_overshoot_into_next_segment() {
        assert!((SplineNavState::s_after_rollover(1.05) - 0.05).abs() < 1e-6);
        assert_eq!(SplineNavState::s_after_rollover(1.5), 0.);
        assert_eq!(SplineNavState::s_after_rollover(0.), 0.);
    }

    #[test]
    fn spline_through_three_points_decelerates_near_stop_endpoint() {
        let p0 = Vec3::new(0., 0., 0.);
        let p1 = Vec3::new(1000., 0., 0.);
        let p2 = Vec3::new(1000., 1000., 0.);
        let params = params();

        let mut seg1 = SplineNavState::new();
        seg1.set_spline_destination(
            p0,
            p1,
            PrevSegment::StoppedAtOrigin,
            SegEndType::Spline,
            p2,
            &params,
        );

        let mut seg2 = SplineNavState::new();
        seg2.set_spline_destination(
            p1,
            p2,
            PrevSegment::Spline {
                destination_vel: seg1.v1(),
            },
            SegEndType::Stop,
            Vec3::new(0., 0., 0.),
            &params,
        );

        let mut reached_at = None;
        for i in 0..2_000 {
            seg2.advance_spline_target_along_track(0.1);
            if seg2.reached_destination() {
                reached_at = Some(i);
                break;
            }
        }

        assert!(reached_at.is_some());
        // Should have slowed down, not arrived at full WP_SPEED.
        assert!(seg2.spline_vel_scaler <= params.wp_speed);
    }
}
