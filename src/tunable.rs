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

//! The desired/enabled pair behind every tunable field, and the diff
//! record Compare produces.
//!
//! The pair is kept (instead of an `Option`-shaped sum) because
//! persistence stores the desired value even while the field is not
//! being adjusted. The mask invariant lives here and nowhere else:
//! Compare and Apply only ever see the value through [`Tunable::get`],
//! which yields nothing while `adjust` is off.

use std::fmt;

/// One tunable field: the user's desired value plus the "do adjust"
/// gate. The UI tri-state maps on/off/value to `set` and "do not
/// adjust" to `clear`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tunable<T> {
    value: T,
    adjust: bool,
}

impl<T: Clone + PartialEq> Tunable<T> {
    pub fn new(value: T) -> Self {
        Self { value, adjust: false }
    }

    /// Set a desired value and arm the field for Compare/Apply.
    pub fn set(&mut self, value: T) {
        self.value = value;
        self.adjust = true;
    }

    /// Stop adjusting. The stored value stays for display/persistence.
    pub fn clear(&mut self) {
        self.adjust = false;
    }

    /// The desired value, only while the field is armed.
    pub fn get(&self) -> Option<&T> {
        if self.adjust {
            Some(&self.value)
        } else {
            None
        }
    }

    /// The stored value regardless of the gate. Display and persistence
    /// only; never feed this to Compare or Apply.
    pub fn stored(&self) -> &T {
        &self.value
    }

    pub fn is_adjust(&self) -> bool {
        self.adjust
    }

    /// Shadow the stored value with a just-observed one so displays stay
    /// meaningful. Cosmetic: does nothing while armed, never arms.
    pub fn shadow(&mut self, observed: T) {
        if !self.adjust {
            self.value = observed;
        }
    }

    /// Restore both halves of the pair, used by persistence load.
    pub fn restore(&mut self, value: T, adjust: bool) {
        self.value = value;
        self.adjust = adjust;
    }
}

impl<T: Clone + PartialEq + Default> Default for Tunable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// One Compare finding: an armed field whose observed value differs from
/// the desired one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff {
    pub field: &'static str,
    pub desired: String,
    pub observed: String,
}

impl fmt::Display for Diff {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: want {}, have {}", self.field, self.desired, self.observed)
    }
}

/// Compare one armed field against its observed value, recording a diff
/// on mismatch. Disarmed fields never contribute.
pub fn diff_field<T>(diffs: &mut Vec<Diff>, field: &'static str, tunable: &Tunable<T>, observed: &T)
where
    T: Clone + PartialEq + fmt::Display,
{
    if let Some(desired) = tunable.get() {
        if desired != observed {
            diffs.push(Diff {
                field,
                desired: desired.to_string(),
                observed: observed.to_string(),
            });
        }
    }
}
