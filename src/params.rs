//! Persisted tunables for the navigator.
//!
//! The teacher firmware keys its persisted config off a stable integer index into a flash
//! page (`cfg_storage::save`); we generalize that one step further into an explicit schema
//! table, per the "no reflection mechanism" design note: the table is the single source of
//! truth for names, indices, defaults, and valid ranges, and `Params` is just the live values.
//! Indices 0 and 1 are reserved (legacy) and must never be reassigned.

use crate::geometry::clamp;

/// Describes one persistable tunable: its stable on-disk index, display name, default, and
/// admissible range. Out-of-range values read back from storage are clamped to this range
/// rather than rejected.
#[derive(Clone, Copy)]
pub struct ParamDescriptor {
    pub index: u8,
    pub name: &'static str,
    pub default: f32,
    pub range: (f32, f32),
}

macro_rules! param_table {
    ( $( ($field:ident, $index:expr, $name:expr, $default:expr, $range:expr) ),* $(,)? ) => {
        /// Stable schema for every navigator tunable. `index` values must never change once
        /// shipped; that's the whole point of persisting by index instead of by name.
        pub static PARAM_TABLE: &[ParamDescriptor] = &[
            $(
                ParamDescriptor {
                    index: $index,
                    name: $name,
                    default: $default,
                    range: $range,
                },
            )*
        ];

        /// Live values for every navigator tunable, in SI-ish units as documented per field.
        #[derive(Clone, Copy, defmt::Format)]
        pub struct Params {
            $( pub $field: f32, )*
        }

        impl Default for Params {
            fn default() -> Self {
                Self {
                    $( $field: $default, )*
                }
            }
        }

        impl Params {
            /// Clamp every field into its descriptor's admissible range. Called after loading
            /// from storage, and after any external write, so a corrupt or out-of-date record
            /// degrades to the nearest valid setting instead of propagating nonsense into the
            /// carrot-chasing math.
            pub fn clamp_to_schema(&mut self) {
                $(
                    self.$field = clamp(self.$field, $range.0, $range.1);
                )*
            }

            /// Read a tunable by its persisted index. Returns `None` for an unknown (eg
            /// reserved-legacy) index.
            pub fn get_by_index(&self, index: u8) -> Option<f32> {
                match index {
                    $( $index => Some(self.$field), )*
                    _ => None,
                }
            }

            /// Write a tunable by its persisted index, clamping to its schema range. Returns
            /// `false` for an unknown index; the caller should treat that as a no-op, not a
            /// panic — persisted-parameter indices can outlive the firmware version that wrote
            /// them.
            pub fn set_by_index(&mut self, index: u8, value: f32) -> bool {
                match index {
                    $(
                        $index => {
                            self.$field = clamp(value, $range.0, $range.1);
                            true
                        }
                    )*
                    _ => false,
                }
            }
        }
    };
}

param_table! {
    (wp_speed,            2, "WP_SPEED",            500.,  (0., 2000.)),
    (wp_radius,           3, "WP_RADIUS",            200.,  (100., 1000.)),
    (wp_speed_up,         4, "WP_SPEED_UP",          250.,  (0., 1000.)),
    (wp_speed_down,       5, "WP_SPEED_DOWN",        150.,  (0., 1000.)),
    (loit_speed,          6, "LOIT_SPEED",           500.,  (0., 2000.)),
    (wp_accel,            7, "WP_ACCEL",             100.,  (50., 500.)),
    (loiter_accel_min,    8, "LOITER_ACCEL_MIN",     25.,   (0., 200.)),
    (alt_hold_accel_max,  9, "ALT_HOLD_ACCEL_MAX",   250.,  (50., 1000.)),
    (leash_length_min,    10, "LEASH_LENGTH_MIN",    100.,  (1., 1000.)),
    (loiter_speed_min,    11, "LOITER_SPEED_MIN",    20.,   (0., 500.)),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_within_schema() {
        let p = Params::default();
        for d in PARAM_TABLE {
            let v = p.get_by_index(d.index).unwrap();
            assert!(v >= d.range.0 && v <= d.range.1);
        }
    }

    #[test]
    fn set_by_index_clamps() {
        let mut p = Params::default();
        assert!(p.set_by_index(2, 999_999.));
        assert_eq!(p.wp_speed, 2000.);
    }

    #[test]
    fn unknown_index_is_noop() {
        let mut p = Params::default();
        assert!(!p.set_by_index(0, 1.));
        assert!(!p.set_by_index(1, 1.));
        assert!(p.get_by_index(0).is_none());
    }
}
