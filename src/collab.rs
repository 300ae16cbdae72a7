//! Interfaces to the systems this crate treats as external collaborators: inertial nav, AHRS,
//! the inner position controller, and the platform clock. None of these are implemented here;
//! the flight-mode layer wires in concrete types (or, for tests, the fakes in `#[cfg(test)]`
//! modules throughout this crate) that satisfy these traits.
//!
//! Splitting them out this way is the same shape the teacher firmware uses for its own
//! hardware seams (see `drivers::baro_dps310`, `drivers::imu_icm426xx` etc): a narrow trait per
//! responsibility, resolved statically via a generic parameter rather than a trait object, so
//! the hot path pays no vtable cost.

use crate::geometry::Vec3;

/// Fused 3-D position and velocity from home, in cm and cm/s.
pub trait InertialNav {
    fn get_position(&self) -> Vec3;
    fn get_velocity(&self) -> Vec3;
}

/// Attitude estimate. Only yaw is consumed by this crate; roll/pitch estimation is someone
/// else's problem.
pub trait Ahrs {
    /// Cosine of the current yaw estimate.
    fn cos_yaw(&self) -> f32;
    /// Sine of the current yaw estimate.
    fn sin_yaw(&self) -> f32;
    /// Yaw, in centi-degrees, `[0, 36_000)`.
    fn yaw_sensor(&self) -> f32;
}

/// The inner position controller: PID on position, velocity feed-forward, and the leash
/// computation that bounds position error. This crate hands it a target and a feed-forward
/// velocity every tick; it does not perform any attitude control itself.
pub trait PositionController {
    fn set_pos_target(&mut self, target: Vec3);
    fn get_pos_target(&self) -> Vec3;

    /// Feed-forward horizontal velocity, (north, east) cm/s.
    fn set_desired_velocity(&mut self, vx: f32, vy: f32);
    fn get_desired_velocity(&self) -> (f32, f32);

    fn set_speed_xy(&mut self, speed_cms: f32);
    fn set_accel_xy(&mut self, accel_cms2: f32);
    /// Vertical speed limits: descent magnitude, then climb.
    fn set_speed_z(&mut self, down_cms: f32, up_cms: f32);

    fn calc_leash_length_xy(&mut self);
    fn calc_leash_length_z(&mut self);

    fn get_leash_xy(&self) -> f32;
    fn get_leash_up_z(&self) -> f32;
    fn get_leash_down_z(&self) -> f32;

    fn get_stopping_point_xy(&self) -> Vec3;
    fn get_stopping_point_z(&self) -> f32;

    /// Proportional gain of the horizontal position loop, used to derive the
    /// linear/sqrt switch-over speed in the straight-segment engine.
    fn get_pos_xy_kp(&self) -> f32;

    /// Flags the controller to run its horizontal update on the next step.
    fn trigger_xy(&mut self);
    /// Runs the inner position controller. `run_full` distinguishes a full gain update from
    /// a cheaper partial step, mirroring `update_xy_controller(bool run_full)`.
    fn update_xy_controller(&mut self, run_full: bool);
}

/// Platform services: a monotonic millisecond clock, a blocking delay (used only during
/// barometer calibration), and a hard failure hook for the one fatal condition this crate
/// recognizes (barometer calibration timeout).
pub trait Platform {
    /// Monotonic milliseconds since boot.
    fn millis(&self) -> u32;
    /// Busy/sleep for `ms` milliseconds. Only called from `baro::calibrate`.
    fn delay_ms(&mut self, ms: u32);
    /// Refuse to continue. The flight controller will not arm.
    fn panic(&self, msg: &str) -> !;
}
