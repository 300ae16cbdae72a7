//! Small 3-vector and bearing utilities shared by every segment engine.
//!
//! `Vec3` is re-exported from `lin_alg`, the same vector/quaternion crate the rest of the
//! firmware uses (see `flight_ctrls::ctrl_logic`). The free functions here are the handful
//! of scalar helpers the navigator needs that aren't part of `lin_alg`'s own API.

use core::f32::consts::PI;

use num_traits::float::Float;

pub use lin_alg::f32::Vec3;

/// Number of centi-degrees in a full turn.
pub const CD_FULL_TURN: f32 = 36_000.;

/// `sqrt`, but clamped to zero for (small) negative inputs arising from float error, instead
/// of propagating `NaN`. Mirrors the defensive-sqrt pattern the position-controller leash
/// math relies on throughout the wider firmware.
pub fn safe_sqrt(val: f32) -> f32 {
    if val < 0. {
        0.
    } else {
        val.sqrt()
    }
}

/// Hypotenuse of two legs, using `safe_sqrt`.
pub fn pythag2(a: f32, b: f32) -> f32 {
    safe_sqrt(a * a + b * b)
}

/// 3-D magnitude of a vector.
pub fn magnitude(v: Vec3) -> f32 {
    safe_sqrt(dot(v, v))
}

/// Dot product.
pub fn dot(a: Vec3, b: Vec3) -> f32 {
    a.x * b.x + a.y * b.y + a.z * b.z
}

/// Unit vector in the direction of `v`. Returns `Vec3::new(0., 0., 0.)` for a (near-)zero
/// input rather than propagating a divide-by-zero.
pub fn normalize(v: Vec3) -> Vec3 {
    let len = magnitude(v);
    if len < 1e-6 {
        Vec3::new(0., 0., 0.)
    } else {
        Vec3::new(v.x / len, v.y / len, v.z / len)
    }
}

/// Bearing from `from` to `to`, in centi-degrees, normalized to `[0, 36_000)`. `x` is treated
/// as north and `y` as east, per the frame convention this crate uses throughout.
pub fn bearing_cd(from: Vec3, to: Vec3) -> f32 {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    wrap_bearing_cd(dy.atan2(dx) * (18_000. / PI))
}

/// Bearing of a direction vector (eg a velocity), in centi-degrees, normalized to `[0, 36_000)`.
pub fn bearing_of_cd(dir: Vec3) -> f32 {
    wrap_bearing_cd(dir.y.atan2(dir.x) * (18_000. / PI))
}

/// Normalize a centi-degree angle into `[0, 36_000)`.
pub fn wrap_bearing_cd(mut cd: f32) -> f32 {
    cd %= CD_FULL_TURN;
    if cd < 0. {
        cd += CD_FULL_TURN;
    }
    cd
}

/// Clamp `val` into `[lo, hi]`.
pub fn clamp(val: f32, lo: f32, hi: f32) -> f32 {
    if val < lo {
        lo
    } else if val > hi {
        hi
    } else {
        val
    }
}
