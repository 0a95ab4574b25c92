/* This file is part of coretune
 *
 * Copyright (C) 2023-2026 coretune developers
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! FIVR voltage plane offsets. Six regulated domains, each carrying a
//! signed millivolt offset quantized to 1/1024 V steps.
//!
//! There is no read path for these offsets: the OC mailbox wants a
//! write first and the read layer never writes. Observed Values
//! therefore mirror the last applied settings and start at 0.0 mV.
//!
//! Argv fragments pass the signed step count, not millivolts, so equal
//! settings always produce byte-equal vectors.

use toml::value::Table;

use crate::{
    persist,
    tunable::{Diff, Tunable},
};

/// One quantization step in millivolts (1/1024 V).
pub const STEP_MV: f64 = 0.9765625;

pub const PLANE_COUNT: usize = 6;

/// Plane index -> regulated domain.
pub const PLANE_NAMES: [&str; PLANE_COUNT] =
    ["CPU core", "GPU", "Cache/ring", "System agent", "Analog I/O", "Digital I/O"];

const KEYS: [&str; PLANE_COUNT] = [
    "Voltage_Offset_Plane_0",
    "Voltage_Offset_Plane_1",
    "Voltage_Offset_Plane_2",
    "Voltage_Offset_Plane_3",
    "Voltage_Offset_Plane_4",
    "Voltage_Offset_Plane_5",
];

const FLAGS: [&str; PLANE_COUNT] =
    ["--plane0", "--plane1", "--plane2", "--plane3", "--plane4", "--plane5"];

/// Millivolts -> signed step count, round to nearest, ties to even.
pub fn quantize_steps(mv: f64) -> i32 {
    (mv / STEP_MV).round_ties_even() as i32
}

/// Snap millivolts onto the step grid.
pub fn quantize_mv(mv: f64) -> f64 {
    quantize_steps(mv) as f64 * STEP_MV
}

/// Mirror of the last applied offsets, millivolts on the step grid.
#[derive(Debug, Clone, PartialEq)]
pub struct VoltageValues {
    pub plane_mv: [f64; PLANE_COUNT],
}

impl Default for VoltageValues {
    fn default() -> Self {
        Self { plane_mv: [0.0; PLANE_COUNT] }
    }
}

impl VoltageValues {
    /// Record a successful apply: every armed plane now observes its
    /// desired offset.
    pub fn mirror(&mut self, settings: &VoltageSettings) {
        for (observed, t) in self.plane_mv.iter_mut().zip(settings.planes.iter()) {
            if let Some(&mv) = t.get() {
                *observed = quantize_mv(mv);
            }
        }
    }
}

/// Desired plane offsets. `allow_positive` gates overvolting at the
/// presentation layer only; stored state is never clamped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoltageSettings {
    pub planes: [Tunable<f64>; PLANE_COUNT],
    pub allow_positive: bool,
}

impl VoltageSettings {
    /// Arm a plane with a quantized desired offset.
    pub fn set_plane(&mut self, plane: usize, mv: f64) {
        self.planes[plane].set(quantize_mv(mv));
    }

    /// Display value for the UI: positive offsets show as zero while
    /// overvolting is off. The stored value is untouched.
    pub fn display_mv(&self, plane: usize) -> f64 {
        let mv = *self.planes[plane].stored();
        if !self.allow_positive && mv > 0.0 {
            0.0
        } else {
            mv
        }
    }

    pub fn compare(&self, values: &VoltageValues, diffs: &mut Vec<Diff>) {
        for ((t, key), observed) in self.planes.iter().zip(KEYS.iter()).zip(values.plane_mv.iter())
        {
            if let Some(&desired) = t.get() {
                if quantize_steps(desired) != quantize_steps(*observed) {
                    diffs.push(Diff {
                        field: key,
                        desired: format!("{} mV", quantize_mv(desired)),
                        observed: format!("{} mV", quantize_mv(*observed)),
                    });
                }
            }
        }
    }

    pub fn apply_args(&self, argv: &mut Vec<String>) {
        for (t, flag) in self.planes.iter().zip(FLAGS.iter()) {
            if let Some(&mv) = t.get() {
                argv.push(flag.to_string());
                argv.push(quantize_steps(mv).to_string());
            }
        }
    }

    pub fn shadow(&mut self, values: &VoltageValues) {
        for (t, observed) in self.planes.iter_mut().zip(values.plane_mv.iter()) {
            t.shadow(*observed);
        }
    }

    pub fn load(&mut self, table: &Table, values: &VoltageValues) {
        for ((t, key), observed) in
            self.planes.iter_mut().zip(KEYS.iter()).zip(values.plane_mv.iter())
        {
            persist::load_f64(table, key, t, *observed);
            // Whatever the file held, desired offsets live on the grid.
            t.restore(quantize_mv(*t.stored()), t.is_adjust());
        }
        self.allow_positive = persist::get_bool(table, "Allow_Overvolting").unwrap_or(false);
    }

    pub fn save(&self, table: &mut Table) {
        for (t, key) in self.planes.iter().zip(KEYS.iter()) {
            persist::store_f64(table, key, t);
        }
        table.insert("Allow_Overvolting".to_string(), toml::Value::Boolean(self.allow_positive));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantization_ties_to_even() {
        // Exact multiples pass through.
        assert_eq!(quantize_steps(-97.65625), -100);
        assert_eq!(quantize_mv(-97.65625), -97.65625);

        // -100.0 mV is -102.4 steps, nearest is -102.
        assert_eq!(quantize_steps(-100.0), -102);

        // Halfway cases land on the even step.
        assert_eq!(quantize_steps(-0.48828125), 0);
        assert_eq!(quantize_steps(-1.46484375), -2);
        assert_eq!(quantize_steps(0.48828125), 0);
        assert_eq!(quantize_steps(1.46484375), 2);
    }

    #[test]
    fn grid_values_roundtrip_persistence() {
        let mut s = VoltageSettings::default();
        s.set_plane(0, -100.0);
        s.set_plane(3, -50.48);

        let mut table = Table::new();
        s.save(&mut table);

        let mut loaded = VoltageSettings::default();
        loaded.load(&table, &VoltageValues::default());
        assert_eq!(loaded, s);

        // Off-grid file content snaps to the nearest step on load.
        let mut table = Table::new();
        table.insert("Voltage_Offset_Plane_1".into(), toml::Value::Float(-100.0));
        table.insert("Voltage_Offset_Plane_1_Enabled".into(), toml::Value::Boolean(true));
        loaded.load(&table, &VoltageValues::default());
        assert_eq!(*loaded.planes[1].stored(), -102.0 * STEP_MV);
    }

    #[test]
    fn apply_emits_steps() {
        let mut s = VoltageSettings::default();
        s.set_plane(0, -100.0);
        s.set_plane(5, 25.0);

        let mut argv = vec![];
        s.apply_args(&mut argv);
        assert_eq!(argv, vec!["--plane0", "-102", "--plane5", "26"]);
    }

    #[test]
    fn mirror_and_compare() {
        let mut s = VoltageSettings::default();
        s.set_plane(2, -75.0);

        let mut v = VoltageValues::default();
        let mut diffs = vec![];
        s.compare(&v, &mut diffs);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].field, "Voltage_Offset_Plane_2");

        v.mirror(&s);
        diffs.clear();
        s.compare(&v, &mut diffs);
        assert!(diffs.is_empty());
    }

    #[test]
    fn positive_offsets_stored_but_clamped_on_display() {
        let mut s = VoltageSettings::default();
        s.set_plane(1, 50.0);
        assert_eq!(s.display_mv(1), 0.0);
        assert!(*s.planes[1].stored() > 0.0);

        s.allow_positive = true;
        assert!(s.display_mv(1) > 49.0);
    }
}
