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

//! Feature modules. Each owns a slice of the per-package Values and
//! Settings and knows how to read, compare, emit helper argv fragments
//! and persist itself. Module iteration order is fixed by the aggregate
//! composition in [`crate::package`]: thermal, voltage, speed, cpufreq,
//! misc; SMT is host-level and handled by [`crate::host`].

use std::fmt;

use crate::tunable::Tunable;

pub mod cpufreq;
pub mod misc;
pub mod smt;
pub mod speed;
pub mod thermal;
pub mod voltage;

/// Append an enable/disable flag pair for an armed boolean.
pub(crate) fn push_toggle(argv: &mut Vec<String>, t: &Tunable<bool>, on: &str, off: &str) {
    if let Some(&desired) = t.get() {
        argv.push(if desired { on.to_string() } else { off.to_string() });
    }
}

/// Append a one-way flag (locks) when the armed desired value is true.
pub(crate) fn push_flag(argv: &mut Vec<String>, t: &Tunable<bool>, flag: &str) {
    if t.get() == Some(&true) {
        argv.push(flag.to_string());
    }
}

/// Append `<flag> <value>` for an armed numeric/string field.
pub(crate) fn push_value<T>(argv: &mut Vec<String>, t: &Tunable<T>, flag: &str)
where
    T: Clone + PartialEq + fmt::Display,
{
    if let Some(desired) = t.get() {
        argv.push(flag.to_string());
        argv.push(desired.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_fragments() {
        let mut argv = vec![];
        let mut t = Tunable::new(false);

        push_toggle(&mut argv, &t, "--x-enable", "--x-disable");
        push_flag(&mut argv, &t, "--x-lock");
        assert!(argv.is_empty());

        t.set(false);
        push_toggle(&mut argv, &t, "--x-enable", "--x-disable");
        assert_eq!(argv, vec!["--x-disable"]);

        t.set(true);
        push_flag(&mut argv, &t, "--x-lock");
        assert_eq!(argv, vec!["--x-disable", "--x-lock"]);

        let mut ratio = Tunable::new(0u64);
        ratio.set(34);
        push_value(&mut argv, &ratio, "--tbt-activation-ratio");
        assert_eq!(argv, vec!["--x-disable", "--x-lock", "--tbt-activation-ratio", "34"]);
    }
}
