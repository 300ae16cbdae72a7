//! Pilot-driven loiter: hover in place, perturbed by roll/pitch sticks, with synthetic drag
//! that brings the craft smoothly to a stop when the sticks are centred.

use num_traits::float::Float;

use crate::collab::{Ahrs, InertialNav, PositionController};
use crate::geometry::Vec3;
use crate::params::Params;
use crate::DT_FAULT_RESET;

/// Full range of a normalised stick axis, centi-degrees.
const STICK_RANGE_CD: f32 = 4500.;

pub struct LoiterState {
    target: Vec3,
    desired_vel_ne: (f32, f32),
    pilot_accel_fwd: f32,
    pilot_accel_right: f32,
    loiter_accel: f32,
    last_update_ms: Option<u32>,
}

impl Default for LoiterState {
    fn default() -> Self {
        Self {
            target: Vec3::new(0., 0., 0.),
            desired_vel_ne: (0., 0.),
            pilot_accel_fwd: 0.,
            pilot_accel_right: 0.,
            loiter_accel: 0.,
            last_update_ms: None,
        }
    }
}

impl LoiterState {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply_speed_limits<C: PositionController>(&mut self, pos_ctrl: &mut C, params: &Params) {
        let loit_speed = params.loit_speed.max(params.loiter_speed_min);
        self.loiter_accel = loit_speed / 2.;
        pos_ctrl.set_speed_xy(loit_speed);
        pos_ctrl.set_accel_xy(self.loiter_accel);
    }

    /// Seed the target at the current inertial position and velocity, and zero pilot input.
    pub fn init_loiter_target<I: InertialNav, C: PositionController>(
        &mut self,
        inav: &I,
        pos_ctrl: &mut C,
        params: &Params,
    ) {
        self.target = inav.get_position();
        let vel = inav.get_velocity();
        self.desired_vel_ne = (vel.x, vel.y);
        self.pilot_accel_fwd = 0.;
        self.pilot_accel_right = 0.;
        self.apply_speed_limits(pos_ctrl, params);
        pos_ctrl.set_pos_target(self.target);
    }

    /// Seed the target at an explicit position with zero feed-forward velocity.
    pub fn set_loiter_target<C: PositionController>(
        &mut self,
        pos: Vec3,
        pos_ctrl: &mut C,
        params: &Params,
    ) {
        self.target = pos;
        self.desired_vel_ne = (0., 0.);
        self.pilot_accel_fwd = 0.;
        self.pilot_accel_right = 0.;
        self.apply_speed_limits(pos_ctrl, params);
        pos_ctrl.set_pos_target(self.target);
    }

    /// Override the feed-forward horizontal velocity directly, eg to carry momentum in from a
    /// previous flight mode.
    pub fn set_loiter_velocity(&mut self, vx_cms: f32, vy_cms: f32) {
        self.desired_vel_ne = (vx_cms, vy_cms);
    }

    /// Convert normalised stick positions (centi-degrees, ±4500) into body-frame acceleration.
    /// Forward stick is nose-down, hence the sign flip on pitch.
    pub fn set_pilot_desired_acceleration(&mut self, roll_cd: f32, pitch_cd: f32) {
        self.pilot_accel_fwd = -pitch_cd * (self.loiter_accel / STICK_RANGE_CD);
        self.pilot_accel_right = roll_cd * (self.loiter_accel / STICK_RANGE_CD);
    }

    pub fn get_loiter_stopping_point_xy<C: PositionController>(&self, pos_ctrl: &C) -> Vec3 {
        pos_ctrl.get_stopping_point_xy()
    }

    pub fn get_loiter_bearing_to_target<C: PositionController>(&self, pos_ctrl: &C) -> f32 {
        crate::geometry::bearing_cd(pos_ctrl.get_pos_target(), self.target)
    }

    /// One loiter tick: integrate pilot acceleration with synthetic drag, cap the result, and
    /// hand it to the position controller as feed-forward velocity.
    pub fn update_loiter<A: Ahrs, C: PositionController>(
        &mut self,
        now_ms: u32,
        ahrs: &A,
        pos_ctrl: &mut C,
        params: &Params,
    ) {
        let dt = match self.last_update_ms {
            Some(last) => (now_ms.wrapping_sub(last) as f32) / 1000.,
            None => 0.,
        };
        self.last_update_ms = Some(now_ms);

        if dt < crate::LOITER_UPDATE_TIME {
            pos_ctrl.update_xy_controller(false);
            return;
        }

        let dt = if dt >= DT_FAULT_RESET {
            defmt::println!("loiter: dt fault, resetting integrator");
            0.
        } else {
            dt
        };

        if params.loit_speed < params.loiter_speed_min {
            defmt::println!("loiter: LOIT_SPEED below LOITER_SPEED_MIN, clamping");
            self.loiter_accel = params.loiter_speed_min / 2.;
        }

        let cos_yaw = ahrs.cos_yaw();
        let sin_yaw = ahrs.sin_yaw();
        let a_n = self.pilot_accel_fwd * cos_yaw - self.pilot_accel_right * sin_yaw;
        let a_e = self.pilot_accel_fwd * sin_yaw + self.pilot_accel_right * cos_yaw;

        let (mut vx, mut vy) = self.desired_vel_ne;
        vx += a_n * dt;
        vy += a_e * dt;

        let loit_speed = params.loit_speed.max(params.loiter_speed_min);
        let drag_gain = (self.loiter_accel - params.loiter_accel_min).max(0.);

        vx = apply_drag(vx, drag_gain, params.loiter_accel_min, loit_speed, dt);
        vy = apply_drag(vy, drag_gain, params.loiter_accel_min, loit_speed, dt);

        let speed = crate::geometry::pythag2(vx, vy);
        if speed > loit_speed {
            let scale = loit_speed / speed;
            vx *= scale;
            vy *= scale;
        }

        self.desired_vel_ne = (vx, vy);
        pos_ctrl.set_desired_velocity(vx, vy);
        pos_ctrl.trigger_xy();
        pos_ctrl.update_xy_controller(true);
    }

    pub fn desired_velocity(&self) -> (f32, f32) {
        self.desired_vel_ne
    }
}

/// Viscous drag toward zero, scaled by how far `loiter_accel` sits above the floor, plus a
/// constant-friction (coulomb) term that cannot itself reverse the sign of `v`.
fn apply_drag(v: f32, drag_gain: f32, accel_min: f32, loit_speed: f32, dt: f32) -> f32 {
    let mut v = v - drag_gain * dt * v / loit_speed;

    let friction = accel_min * dt;
    if v > 0. {
        v = (v - friction).max(0.);
    } else if v < 0. {
        v = (v + friction).min(0.);
    }
    v
}
