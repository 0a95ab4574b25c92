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

//! Miscellaneous processor features: ten IA32_MISC_ENABLE bits with
//! identical tri-state handling. Field order below is the declared
//! order for diff reports and argv fragments.

use toml::value::Table;

use crate::{
    msr::{layout::misc_enable, read_view, BitField, MsrSource},
    persist,
    topology::LogicalCpuId,
    tunable::{diff_field, Diff, Tunable},
    Result,
};

use super::push_toggle;

struct MiscBit {
    key: &'static str,
    on: &'static str,
    off: &'static str,
    field: BitField,
}

const BITS: [MiscBit; 10] = [
    MiscBit {
        key: "Fast_Strings_Enable",
        on: "--fs-enable",
        off: "--fs-disable",
        field: misc_enable::FAST_STRINGS_ENABLE,
    },
    MiscBit {
        key: "Hardware_Prefetcher_Disable",
        on: "--hwp-enable",
        off: "--hwp-disable",
        field: misc_enable::HARDWARE_PREFETCHER_DISABLE,
    },
    MiscBit {
        key: "FERR_Multiplexing_Enable",
        on: "--ferr-enable",
        off: "--ferr-disable",
        field: misc_enable::FERR_MULTIPLEXING_ENABLE,
    },
    MiscBit {
        key: "Enable_Monitor_FSM",
        on: "--fsm-enable",
        off: "--fsm-disable",
        field: misc_enable::ENABLE_MONITOR_FSM,
    },
    MiscBit {
        key: "Adjacent_Cache_Line_Prefetch_Disable",
        on: "--adj-clp-enable",
        off: "--adj-clp-disable",
        field: misc_enable::ADJACENT_CACHE_LINE_PREFETCH_DISABLE,
    },
    MiscBit {
        key: "Limit_CPUID_Maxval",
        on: "--cpuid-max-enable",
        off: "--cpuid-max-disable",
        field: misc_enable::LIMIT_CPUID_MAXVAL,
    },
    MiscBit {
        key: "xTPR_Message_Disable",
        on: "--xtpr-msg-enable",
        off: "--xtpr-msg-disable",
        field: misc_enable::XTPR_MESSAGE_DISABLE,
    },
    MiscBit {
        key: "XD_Bit_Disable",
        on: "--xd-bit-enable",
        off: "--xd-bit-disable",
        field: misc_enable::XD_BIT_DISABLE,
    },
    MiscBit {
        key: "DCU_Prefetcher_Disable",
        on: "--dcup-enable",
        off: "--dcup-disable",
        field: misc_enable::DCU_PREFETCHER_DISABLE,
    },
    MiscBit {
        key: "IP_Prefetcher_Disable",
        on: "--ipp-enable",
        off: "--ipp-disable",
        field: misc_enable::IP_PREFETCHER_DISABLE,
    },
];

/// Persistence key of each bit, in declared field order.
pub fn bit_keys() -> [&'static str; 10] {
    let mut keys = [""; 10];
    for (slot, def) in keys.iter_mut().zip(BITS.iter()) {
        *slot = def.key;
    }
    keys
}

/// Observed IA32_MISC_ENABLE bits, in declared field order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MiscValues {
    pub bits: [bool; 10],
}

impl MiscValues {
    pub fn read(src: &dyn MsrSource, cpu: LogicalCpuId) -> Result<Self> {
        let view = read_view(src, cpu, misc_enable::ADDR)?;
        let mut bits = [false; 10];
        for (slot, def) in bits.iter_mut().zip(BITS.iter()) {
            *slot = view.bit(def.field);
        }
        Ok(Self { bits })
    }

    pub fn fast_strings_enable(&self) -> bool {
        self.bits[0]
    }

    pub fn hardware_prefetcher_disable(&self) -> bool {
        self.bits[1]
    }

    pub fn xd_bit_disable(&self) -> bool {
        self.bits[7]
    }
}

/// Desired misc bits with their adjust gates, same order as
/// [`MiscValues::bits`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MiscSettings {
    pub bits: [Tunable<bool>; 10],
}

impl MiscSettings {
    /// Convenience accessor by persistence key.
    pub fn bit_mut(&mut self, key: &str) -> Option<&mut Tunable<bool>> {
        let idx = BITS.iter().position(|b| b.key == key)?;
        Some(&mut self.bits[idx])
    }

    pub fn fast_strings_enable_mut(&mut self) -> &mut Tunable<bool> {
        &mut self.bits[0]
    }

    pub fn compare(&self, values: &MiscValues, diffs: &mut Vec<Diff>) {
        for ((t, def), observed) in self.bits.iter().zip(BITS.iter()).zip(values.bits.iter()) {
            diff_field(diffs, def.key, t, observed);
        }
    }

    pub fn apply_args(&self, argv: &mut Vec<String>) {
        for (t, def) in self.bits.iter().zip(BITS.iter()) {
            push_toggle(argv, t, def.on, def.off);
        }
    }

    pub fn shadow(&mut self, values: &MiscValues) {
        for (t, observed) in self.bits.iter_mut().zip(values.bits.iter()) {
            t.shadow(*observed);
        }
    }

    pub fn load(&mut self, table: &Table, values: &MiscValues) {
        for ((t, def), observed) in self.bits.iter_mut().zip(BITS.iter()).zip(values.bits.iter()) {
            persist::load_bool(table, def.key, t, *observed);
        }
    }

    pub fn save(&self, table: &mut Table) {
        for (t, def) in self.bits.iter().zip(BITS.iter()) {
            persist::store_bool(table, def.key, t);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msr::fake::FakeMsrs;

    #[test]
    fn read_decodes_bits() {
        let mut msrs = FakeMsrs::new();
        // fast strings on, hw prefetcher disabled, xd bit disabled
        msrs.set(0, misc_enable::ADDR, (1 << 0) | (1 << 9) | (1 << 34));
        let v = MiscValues::read(&msrs, 0).unwrap();
        assert!(v.fast_strings_enable());
        assert!(v.hardware_prefetcher_disable());
        assert!(v.xd_bit_disable());
        assert!(!v.bits[2]);
    }

    #[test]
    fn disarmed_fields_stay_silent() {
        let mut s = MiscSettings::default();
        let v = MiscValues { bits: [true; 10] };

        let mut diffs = vec![];
        s.compare(&v, &mut diffs);
        assert!(diffs.is_empty());

        let mut argv = vec![];
        s.apply_args(&mut argv);
        assert!(argv.is_empty());

        // Arming one field yields exactly one diff and one flag.
        s.fast_strings_enable_mut().set(false);
        s.compare(&v, &mut diffs);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].field, "Fast_Strings_Enable");
        s.apply_args(&mut argv);
        assert_eq!(argv, vec!["--fs-disable"]);
    }

    #[test]
    fn persistence_roundtrip() {
        let mut s = MiscSettings::default();
        s.bit_mut("XD_Bit_Disable").unwrap().set(true);
        s.bit_mut("IP_Prefetcher_Disable").unwrap().set(false);

        let mut table = Table::new();
        s.save(&mut table);

        let mut loaded = MiscSettings::default();
        loaded.load(&table, &MiscValues::default());
        assert_eq!(loaded, s);
    }

    #[test]
    fn load_defaults_from_observed() {
        let v = MiscValues { bits: [true; 10] };
        let mut s = MiscSettings::default();
        s.load(&Table::new(), &v);
        for t in &s.bits {
            assert!(!t.is_adjust());
            assert!(*t.stored());
        }
    }
}
