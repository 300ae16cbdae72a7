#![cfg_attr(not(test), no_std)]
//! Waypoint and loiter navigation core for a multirotor flight controller.
//!
//! This crate is the "carrot chaser" that sits between mission/flight-mode logic and the
//! inner position controller. Given an inertial position/velocity estimate and either a
//! pilot stick input or a geometric segment (straight line or Hermite spline), it produces
//! an intermediate target position and a feed-forward velocity at a fixed tick rate. It does
//! not itself fly the craft: see [`collab`] for the interfaces it expects from the position
//! controller, AHRS, and inertial nav, which live outside this crate.
//!
//! Units follow the rest of the firmware: positions in cm from home (x=north, y=east, z=up),
//! velocities in cm/s, accelerations in cm/s^2, angles and bearings in centi-degrees.

pub mod baro;
pub mod collab;
pub mod facade;
pub mod geometry;
pub mod loiter;
pub mod params;
pub mod spline_nav;
pub mod wp_nav;

/// Loiter tick period, seconds. ~100 Hz, matching the inner position controller's rate.
pub const LOITER_UPDATE_TIME: f32 = 0.01;
/// Waypoint/spline tick period, seconds. ~10 Hz.
pub const WP_UPDATE_TIME: f32 = 0.1;

/// A scheduler stall at or beyond this many seconds is treated as a fault: `dt` is reset to
/// zero rather than integrated, to avoid blowing up any of the carrot-chasing integrators.
pub const DT_FAULT_RESET: f32 = 1.0;

pub use geometry::Vec3;
