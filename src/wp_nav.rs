//! Straight-line segment engine: the "leash chaser" that advances a virtual carrot from an
//! origin to a destination while staying within the position controller's error envelope.

use num_traits::float::Float;

use crate::collab::{InertialNav, PositionController};
use crate::geometry::{bearing_cd, clamp, dot, magnitude, normalize, pythag2, Vec3};
use crate::params::Params;

/// How recently a waypoint update must have happened for `set_wp_destination` to chain off
/// the current position target instead of computing a fresh stopping point.
const WP_RECENT_UPDATE_WINDOW_MS: u32 = 1_000;

pub struct WpNavState {
    origin: Vec3,
    destination: Vec3,
    u: Vec3,
    track_length: f32,
    track_desired: f32,
    limited_speed_xy_cms: f32,

    track_speed: f32,
    track_accel: f32,
    track_leash_length: f32,

    reached_destination: bool,
    fast_waypoint: bool,
    segment_type: SegmentType,

    last_update_ms: Option<u32>,
}

impl Default for WpNavState {
    fn default() -> Self {
        Self {
            origin: Vec3::new(0., 0., 0.),
            destination: Vec3::new(0., 0., 0.),
            u: Vec3::new(0., 0., 0.),
            track_length: 0.,
            track_desired: 0.,
            limited_speed_xy_cms: 0.,
            track_speed: 0.,
            track_accel: 0.,
            track_leash_length: 0.,
            reached_destination: false,
            fast_waypoint: false,
            segment_type: SegmentType::Straight,
            last_update_ms: None,
        }
    }
}

impl WpNavState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reached_destination(&self) -> bool {
        self.reached_destination
    }

    pub fn destination(&self) -> Vec3 {
        self.destination
    }

    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    pub fn track_desired(&self) -> f32 {
        self.track_desired
    }

    /// Commanded yaw for this segment: the bearing from origin to destination.
    pub fn commanded_yaw_cd(&self) -> f32 {
        bearing_cd(self.origin, self.destination)
    }

    /// Pick an origin (chaining off a recent update, or the position controller's stopping
    /// point) and create the segment.
    pub fn set_wp_destination<I: InertialNav, C: PositionController>(
        &mut self,
        now_ms: u32,
        destination: Vec3,
        inav: &I,
        pos_ctrl: &mut C,
        params: &Params,
    ) {
        let recent = self
            .last_update_ms
            .map(|t| now_ms.wrapping_sub(t) < WP_RECENT_UPDATE_WINDOW_MS)
            .unwrap_or(false);

        let origin = if recent {
            pos_ctrl.get_pos_target()
        } else {
            let xy = pos_ctrl.get_stopping_point_xy();
            Vec3::new(xy.x, xy.y, pos_ctrl.get_stopping_point_z())
        };

        let _ = inav;
        self.set_wp_origin_and_destination(now_ms, origin, destination, inav, pos_ctrl, params);
    }

    pub fn set_wp_origin_and_destination<I: InertialNav, C: PositionController>(
        &mut self,
        now_ms: u32,
        origin: Vec3,
        destination: Vec3,
        inav: &I,
        pos_ctrl: &mut C,
        params: &Params,
    ) {
        self.origin = origin;
        self.destination = destination;

        let delta = Vec3::new(
            destination.x - origin.x,
            destination.y - origin.y,
            destination.z - origin.z,
        );
        self.track_length = magnitude(delta);
        self.u = normalize(delta);

        let (track_accel, track_speed, track_leash) =
            calculate_wp_leash_length(self.u, pos_ctrl, params);
        self.track_accel = track_accel;
        self.track_speed = track_speed;
        self.track_leash_length = track_leash;

        pos_ctrl.set_speed_xy(params.wp_speed);
        pos_ctrl.set_accel_xy(params.wp_accel);
        let speed_z = if self.u.z >= 0. {
            params.wp_speed_up
        } else {
            params.wp_speed_down
        };
        pos_ctrl.set_speed_z(params.wp_speed_down, speed_z);
        pos_ctrl.calc_leash_length_xy();
        pos_ctrl.calc_leash_length_z();

        self.reached_destination = false;
        self.fast_waypoint = false;
        self.segment_type = SegmentType::Straight;
        self.track_desired = 0.;

        let vel = inav.get_velocity();
        self.limited_speed_xy_cms = clamp(dot(vel, self.u), 0., params.wp_speed);

        self.last_update_ms = Some(now_ms);
        pos_ctrl.set_pos_target(self.origin);
    }

    /// Mark this segment a "fast" waypoint: arrival fires the instant the carrot reaches the
    /// end of the track, without waiting for the vehicle to close within WP_RADIUS.
    pub fn set_fast_waypoint(&mut self, fast: bool) {
        self.fast_waypoint = fast;
    }

    /// Per-tick carrot advance. `dt` in seconds.
    pub fn advance_wp_target_along_track<I: InertialNav, C: PositionController>(
        &mut self,
        dt: f32,
        inav: &I,
        pos_ctrl: &mut C,
        params: &Params,
    ) {
        if self.reached_destination {
            return;
        }

        let pos = inav.get_position();
        let delta = Vec3::new(pos.x - self.origin.x, pos.y - self.origin.y, pos.z - self.origin.z);
        let track_covered = dot(delta, self.u);
        let along = Vec3::new(
            self.u.x * track_covered,
            self.u.y * track_covered,
            self.u.z * track_covered,
        );
        let e = Vec3::new(delta.x - along.x, delta.y - along.y, delta.z - along.z);
        let e_xy = pythag2(e.x, e.y);
        let e_z = e.z;

        let leash_z = if e_z >= 0. {
            pos_ctrl.get_leash_up_z()
        } else {
            pos_ctrl.get_leash_down_z()
        };
        let leash_xy = pos_ctrl.get_leash_xy();

        let extra_z = if leash_z > 0. {
            self.track_leash_length * (leash_z - e_z.abs()) / leash_z
        } else {
            0.
        };
        let extra_xy = if leash_xy > 0. {
            self.track_leash_length * (leash_xy - e_xy) / leash_xy
        } else {
            0.
        };
        let track_extra_max = extra_z.min(extra_xy);

        let track_desired_max = if track_extra_max < 0. {
            track_covered
        } else {
            clamp(track_covered + track_extra_max, 0., self.track_length)
        };

        let vel = inav.get_velocity();
        let v_parallel = dot(vel, self.u);
        let kp_xy = pos_ctrl.get_pos_xy_kp().max(1e-6);
        let v_lin = self.track_accel / kp_xy;

        if v_parallel < -v_lin {
            self.limited_speed_xy_cms = 0.;
        } else {
            if track_desired_max > self.track_desired {
                self.limited_speed_xy_cms += 2. * self.track_accel * dt;
            } else {
                self.track_desired = track_desired_max;
            }
            self.limited_speed_xy_cms = self.limited_speed_xy_cms.min(self.track_speed);

            if v_parallel.abs() < v_lin {
                self.limited_speed_xy_cms =
                    clamp(self.limited_speed_xy_cms, v_parallel - v_lin, v_parallel + v_lin);
            }
        }

        let advanced = clamp(
            self.track_desired + self.limited_speed_xy_cms * dt,
            0.,
            self.track_length,
        );
        self.track_desired = self.track_desired.max(advanced);

        let target = Vec3::new(
            self.origin.x + self.u.x * self.track_desired,
            self.origin.y + self.u.y * self.track_desired,
            self.origin.z + self.u.z * self.track_desired,
        );
        pos_ctrl.set_pos_target(target);

        if self.track_desired >= self.track_length {
            if self.fast_waypoint {
                self.reached_destination = true;
            } else {
                let dist = magnitude(Vec3::new(
                    pos.x - self.destination.x,
                    pos.y - self.destination.y,
                    pos.z - self.destination.z,
                ));
                if dist <= params.wp_radius {
                    self.reached_destination = true;
                }
            }
        }
    }

    pub fn get_wp_stopping_point_xy<C: PositionController>(&self, pos_ctrl: &C) -> Vec3 {
        pos_ctrl.get_stopping_point_xy()
    }

    pub fn get_wp_distance_to_destination<I: InertialNav>(&self, inav: &I) -> f32 {
        let pos = inav.get_position();
        magnitude(Vec3::new(
            self.destination.x - pos.x,
            self.destination.y - pos.y,
            self.destination.z - pos.z,
        ))
    }

    pub fn get_wp_bearing_to_destination<I: InertialNav>(&self, inav: &I) -> f32 {
        bearing_cd(inav.get_position(), self.destination)
    }
}

/// Map the position controller's 2-D/1-D leashes into the along-track dimension, per the
/// four-case table: a maximum-leash deflection in any axis corresponds to the same along-track
/// carrot advance. `u` is normalized first, so the result is homogeneous of degree 0 in the
/// input direction vector (only `u`'s direction, via `u_xy`/`u_z`, enters the formulas) even
/// when a caller passes an un-normalized vector.
pub fn calculate_wp_leash_length<C: PositionController>(
    u: Vec3,
    pos_ctrl: &mut C,
    params: &Params,
) -> (f32, f32, f32) {
    let u = normalize(u);
    let u_xy = pythag2(u.x, u.y);
    let u_z = u.z.abs();

    let speed_z = if u.z >= 0. {
        params.wp_speed_up
    } else {
        params.wp_speed_down
    };

    if u_xy == 0. && u_z == 0. {
        return (0., 0., params.leash_length_min);
    }

    if u_z == 0. {
        let leash_xy = pos_ctrl.get_leash_xy();
        return (
            params.wp_accel / u_xy,
            params.wp_speed / u_xy,
            leash_xy / u_xy,
        );
    }

    if u_xy == 0. {
        let leash_z = if u.z >= 0. {
            pos_ctrl.get_leash_up_z()
        } else {
            pos_ctrl.get_leash_down_z()
        };
        return (
            params.alt_hold_accel_max / u_z,
            speed_z / u_z,
            leash_z / u_z,
        );
    }

    let leash_xy = pos_ctrl.get_leash_xy();
    let leash_z = if u.z >= 0. {
        pos_ctrl.get_leash_up_z()
    } else {
        pos_ctrl.get_leash_down_z()
    };

    let accel_xy = params.wp_accel / u_xy;
    let accel_z = params.alt_hold_accel_max / u_z;
    let speed_xy = params.wp_speed / u_xy;
    let speed_z = speed_z / u_z;
    let track_leash_xy = leash_xy / u_xy;
    let track_leash_z = leash_z / u_z;

    (
        accel_xy.min(accel_z),
        speed_xy.min(speed_z),
        track_leash_xy.min(track_leash_z),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeInav {
        pos: Vec3,
        vel: Vec3,
    }

    impl InertialNav for FakeInav {
        fn get_position(&self) -> Vec3 {
            self.pos
        }
        fn get_velocity(&self) -> Vec3 {
            self.vel
        }
    }

    struct FakePosController {
        pos_target: Vec3,
        leash_xy: f32,
        leash_up_z: f32,
        leash_down_z: f32,
        kp_xy: f32,
    }

    impl Default for FakePosController {
        fn default() -> Self {
            Self {
                pos_target: Vec3::new(0., 0., 0.),
                leash_xy: 1000.,
                leash_up_z: 1000.,
                leash_down_z: 1000.,
                kp_xy: 1.,
            }
        }
    }

    impl PositionController for FakePosController {
        fn set_pos_target(&mut self, target: Vec3) {
            self.pos_target = target;
        }
        fn get_pos_target(&self) -> Vec3 {
            self.pos_target
        }
        fn set_desired_velocity(&mut self, _vx: f32, _vy: f32) {}
        fn get_desired_velocity(&self) -> (f32, f32) {
            (0., 0.)
        }
        fn set_speed_xy(&mut self, _speed_cms: f32) {}
        fn set_accel_xy(&mut self, _accel_cms2: f32) {}
        fn set_speed_z(&mut self, _down_cms: f32, _up_cms: f32) {}
        fn calc_leash_length_xy(&mut self) {}
        fn calc_leash_length_z(&mut self) {}
        fn get_leash_xy(&self) -> f32 {
            self.leash_xy
        }
        fn get_leash_up_z(&self) -> f32 {
            self.leash_up_z
        }
        fn get_leash_down_z(&self) -> f32 {
            self.leash_down_z
        }
        fn get_stopping_point_xy(&self) -> Vec3 {
            self.pos_target
        }
        fn get_stopping_point_z(&self) -> f32 {
            self.pos_target.z
        }
        fn get_pos_xy_kp(&self) -> f32 {
            self.kp_xy
        }
        fn trigger_xy(&mut self) {}
        fn update_xy_controller(&mut self, _run_full: bool) {}
    }

    fn params() -> Params {
        let mut p = Params::default();
        p.wp_speed = 500.;
        p.wp_accel = 100.;
        p.wp_radius = 200.;
        p
    }

    #[test]
    fn straight_waypoint_flat_arrives_within_radius() {
        let mut wp = WpNavState::new();
        let mut pos_ctrl = FakePosController::default();
        let p = params();
        let mut inav = FakeInav {
            pos: Vec3::new(0., 0., 0.),
            vel: Vec3::new(0., 0., 0.),
        };

        wp.set_wp_origin_and_destination(
            0,
            Vec3::new(0., 0., 0.),
            Vec3::new(10_000., 0., 0.),
            &inav,
            &mut pos_ctrl,
            &p,
        );

        let mut last_track_desired = 0.;
        let mut t = 0u32;
        for _ in 0..3_000 {
            t += 100;
            wp.advance_wp_target_along_track(0.1, &inav, &mut pos_ctrl, &p);
            assert!(wp.track_desired() >= last_track_desired - 1e-6);
            last_track_desired = wp.track_desired();

            inav.pos.x = pos_ctrl.pos_target.x;

            if wp.reached_destination() {
                break;
            }
        }

        assert!(wp.reached_destination());
        assert!(wp.track_desired() <= wp.track_length);
        let dist_at_arrival = magnitude(Vec3::new(
            inav.pos.x - 10_000.,
            inav.pos.y,
            inav.pos.z,
        ));
        assert!(dist_at_arrival <= p.wp_radius + 1.);
    }

    #[test]
    fn fast_waypoint_arrives_the_instant_track_reaches_length() {
        let mut wp = WpNavState::new();
        let mut pos_ctrl = FakePosController::default();
        let p = params();
        // vehicle stays at origin: only a "fast" waypoint would arrive under this condition.
        let inav = FakeInav {
            pos: Vec3::new(0., 0., 0.),
            vel: Vec3::new(0., 0., 0.),
        };

        wp.set_wp_origin_and_destination(
            0,
            Vec3::new(0., 0., 0.),
            Vec3::new(1_000., 0., 0.),
            &inav,
            &mut pos_ctrl,
            &p,
        );
        wp.set_fast_waypoint(true);

        for _ in 0..2_000 {
            wp.advance_wp_target_along_track(0.1, &inav, &mut pos_ctrl, &p);
            if wp.reached_destination() {
                break;
            }
        }

        assert!(wp.reached_destination());
        assert!((wp.track_desired() - wp.track_length).abs() < 1e-3);
    }

    #[test]
    fn zero_length_segment_reaches_immediately_within_radius() {
        let mut wp = WpNavState::new();
        let mut pos_ctrl = FakePosController::default();
        let p = params();
        let inav = FakeInav {
            pos: Vec3::new(0., 0., 0.),
            vel: Vec3::new(0., 0., 0.),
        };

        wp.set_wp_origin_and_destination(
            0,
            Vec3::new(0., 0., 0.),
            Vec3::new(0., 0., 0.),
            &inav,
            &mut pos_ctrl,
            &p,
        );

        assert_eq!(wp.u.x, 0.);
        assert_eq!(wp.u.y, 0.);
        assert_eq!(wp.track_leash_length, p.leash_length_min);

        wp.advance_wp_target_along_track(0.1, &inav, &mut pos_ctrl, &p);
        assert!(wp.reached_destination());
    }

    #[test]
    fn leash_length_is_homogeneous_degree_zero_in_direction() {
        let mut pos_ctrl = FakePosController::default();
        let p = params();

        let u1 = normalize(Vec3::new(1., 2., 0.5));
        let u2 = Vec3::new(u1.x * 3., u1.y * 3., u1.z * 3.);

        let (a1, s1, l1) = calculate_wp_leash_length(u1, &mut pos_ctrl, &p);
        let (a2, s2, l2) = calculate_wp_leash_length(u2, &mut pos_ctrl, &p);

        assert!((a1 - a2).abs() < 1e-3);
        assert!((s1 - s2).abs() < 1e-3);
        assert!((l1 - l2).abs() < 1e-3);
    }

    #[test]
    fn pure_climb_segment_uses_vertical_leash_table_entry() {
        let mut pos_ctrl = FakePosController::default();
        let mut p = params();
        p.wp_speed_up = 250.;
        p.alt_hold_accel_max = 250.;

        let u = Vec3::new(0., 0., 1.);
        let (accel, speed, leash) = calculate_wp_leash_length(u, &mut pos_ctrl, &p);

        assert!((accel - 250.).abs() < 1e-3);
        assert!((speed - 250.).abs() < 1e-3);
        assert!((leash - pos_ctrl.leash_up_z).abs() < 1e-3);
    }
}
