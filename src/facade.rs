//! `WpNavEngine`: one object presenting a small, mode-selecting surface over the three
//! navigation engines, in the same ergonomic-wrapper spirit as a high-level flight-mode
//! commander — callers pick a mode with one call, then drive it with `tick()` every update;
//! no behaviour lives here beyond delegating to the mode-specific engine underneath.

use crate::collab::{Ahrs, InertialNav, PositionController};
use crate::geometry::Vec3;
use crate::loiter::LoiterState;
use crate::params::Params;
use crate::spline_nav::{PrevSegment, SegEndType, SplineNavState};
use crate::wp_nav::WpNavState;
use crate::DT_FAULT_RESET;

#[derive(Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum NavMode {
    Loiter,
    Waypoint,
    Spline,
}

pub struct WpNavEngine {
    mode: NavMode,
    loiter: LoiterState,
    wp_nav: WpNavState,
    spline_nav: SplineNavState,
    last_track_update_ms: Option<u32>,
    last_yaw_cd: f32,
}

impl Default for WpNavEngine {
    fn default() -> Self {
        Self {
            mode: NavMode::Loiter,
            loiter: LoiterState::new(),
            wp_nav: WpNavState::new(),
            spline_nav: SplineNavState::new(),
            last_track_update_ms: None,
            last_yaw_cd: 0.,
        }
    }
}

impl WpNavEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> NavMode {
        self.mode
    }

    pub fn commanded_yaw_cd(&self) -> f32 {
        self.last_yaw_cd
    }

    /// Enter loiter, seeded from the current inertial position/velocity.
    pub fn enter_loiter<I: InertialNav, C: PositionController>(
        &mut self,
        inav: &I,
        pos_ctrl: &mut C,
        params: &Params,
    ) {
        self.mode = NavMode::Loiter;
        self.loiter.init_loiter_target(inav, pos_ctrl, params);
    }

    /// Enter loiter at an explicit target, with zero feed-forward velocity.
    pub fn set_loiter_target<C: PositionController>(
        &mut self,
        pos: Vec3,
        pos_ctrl: &mut C,
        params: &Params,
    ) {
        self.mode = NavMode::Loiter;
        self.loiter.set_loiter_target(pos, pos_ctrl, params);
    }

    pub fn set_pilot_desired_acceleration(&mut self, roll_cd: f32, pitch_cd: f32) {
        self.loiter.set_pilot_desired_acceleration(roll_cd, pitch_cd);
    }

    /// Enter waypoint mode and head for `destination`, choosing an origin automatically.
    pub fn set_wp_destination<I: InertialNav, C: PositionController>(
        &mut self,
        now_ms: u32,
        destination: Vec3,
        inav: &I,
        pos_ctrl: &mut C,
        params: &Params,
    ) {
        self.mode = NavMode::Waypoint;
        self.wp_nav
            .set_wp_destination(now_ms, destination, inav, pos_ctrl, params);
        self.last_track_update_ms = Some(now_ms);
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
        self.mode = NavMode::Waypoint;
        self.wp_nav
            .set_wp_origin_and_destination(now_ms, origin, destination, inav, pos_ctrl, params);
        self.last_track_update_ms = Some(now_ms);
    }

    /// Enter spline mode, joining `origin` to `destination` with the given end behaviour.
    pub fn set_spline_destination(
        &mut self,
        now_ms: u32,
        origin: Vec3,
        destination: Vec3,
        prev: PrevSegment,
        seg_end_type: SegEndType,
        next_destination: Vec3,
        params: &Params,
    ) {
        self.mode = NavMode::Spline;
        self.spline_nav
            .set_spline_destination(origin, destination, prev, seg_end_type, next_destination, params);
        self.last_track_update_ms = Some(now_ms);
    }

    pub fn reached_destination(&self) -> bool {
        match self.mode {
            NavMode::Loiter => false,
            NavMode::Waypoint => self.wp_nav.reached_destination(),
            NavMode::Spline => self.spline_nav.reached_destination(),
        }
    }

    fn track_dt(&mut self, now_ms: u32) -> f32 {
        let dt = match self.last_track_update_ms {
            Some(last) => (now_ms.wrapping_sub(last) as f32) / 1000.,
            None => 0.,
        };
        self.last_track_update_ms = Some(now_ms);

        if dt >= DT_FAULT_RESET {
            defmt::println!("wp_nav: dt fault, resetting track integrator");
            0.
        } else {
            dt
        }
    }

    /// Drive the active mode one tick. Loiter runs at `LOITER_UPDATE_TIME`; waypoint/spline
    /// run at `WP_UPDATE_TIME`, both enforced by the mode engines themselves (loiter) or by
    /// this facade computing `dt` from `now_ms` (waypoint/spline).
    pub fn tick<I: InertialNav, A: Ahrs, C: PositionController>(
        &mut self,
        now_ms: u32,
        inav: &I,
        ahrs: &A,
        pos_ctrl: &mut C,
        params: &Params,
    ) {
        match self.mode {
            NavMode::Loiter => {
                self.loiter.update_loiter(now_ms, ahrs, pos_ctrl, params);
                self.last_yaw_cd = ahrs.yaw_sensor();
            }
            NavMode::Waypoint => {
                let dt = self.track_dt(now_ms);
                self.wp_nav
                    .advance_wp_target_along_track(dt, inav, pos_ctrl, params);
                self.last_yaw_cd = self.wp_nav.commanded_yaw_cd();
            }
            NavMode::Spline => {
                let dt = self.track_dt(now_ms);
                let (target, yaw) = self.spline_nav.advance_spline_target_along_track(dt);
                pos_ctrl.set_pos_target(target);
                self.last_yaw_cd = yaw;
            }
        }
    }
}
