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

//! Speed control: EIST, Turbo Boost, the activation ratio and the
//! eighteen per-active-core turbo ratio limits.
//!
//! The ratio limits span three MSRs (1-8C, 9-16C, 17/18C). Each backing
//! MSR is tracked separately so a single failed read only blanks the
//! block it covers; Compare and Apply skip entries whose backing read
//! failed, and the module reports itself degraded while any needed
//! block is missing.

use log::warn;
use toml::value::Table;

use crate::{
    msr::{
        layout::{
            misc_enable, platform_info, turbo_activation_ratio, turbo_ratio_limit,
            turbo_ratio_limit1, turbo_ratio_limit2, turbo_ratio_limit3,
        },
        read_view, MsrSource,
    },
    persist,
    topology::{CpuIdent, LogicalCpuId},
    tunable::{diff_field, Diff, Tunable},
    Result,
};

use super::{push_flag, push_toggle, push_value};

/// Per-active-core ratio limit slots.
pub const RATIO_LIMIT_COUNT: usize = 18;

const RATIO_KEYS: [&str; RATIO_LIMIT_COUNT] = [
    "TBT_Ratio_Limit_1C",
    "TBT_Ratio_Limit_2C",
    "TBT_Ratio_Limit_3C",
    "TBT_Ratio_Limit_4C",
    "TBT_Ratio_Limit_5C",
    "TBT_Ratio_Limit_6C",
    "TBT_Ratio_Limit_7C",
    "TBT_Ratio_Limit_8C",
    "TBT_Ratio_Limit_9C",
    "TBT_Ratio_Limit_10C",
    "TBT_Ratio_Limit_11C",
    "TBT_Ratio_Limit_12C",
    "TBT_Ratio_Limit_13C",
    "TBT_Ratio_Limit_14C",
    "TBT_Ratio_Limit_15C",
    "TBT_Ratio_Limit_16C",
    "TBT_Ratio_Limit_17C",
    "TBT_Ratio_Limit_18C",
];

const RATIO_FLAGS: [&str; RATIO_LIMIT_COUNT] = [
    "-1c", "-2c", "-3c", "-4c", "-5c", "-6c", "-7c", "-8c", "-9c", "-10c", "-11c", "-12c",
    "-13c", "-14c", "-15c", "-16c", "-17c", "-18c",
];

/// Block index (into `group_valid`) backing ratio limit slot `idx`.
fn ratio_group(idx: usize) -> usize {
    match idx {
        0..=7 => 0,
        8..=15 => 1,
        _ => 2,
    }
}

/// Observed speed state for one package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeedValues {
    pub eist_enable: bool,
    pub eist_lock: bool,
    pub tbt_disable: bool,
    pub tbt_activation_ratio: u8,
    pub tbt_activation_ratio_lock: bool,
    pub tbt_ratio_limits: [u8; RATIO_LIMIT_COUNT],
    /// Parity with Settings only; never read from hardware.
    pub tbt_ratio_limit_enable: bool,
    pub ratio_semaphore: bool,
    /// Lower bound for ratio limits, from MSR_PLATFORM_INFO.
    pub min_ratio: u8,
    group_valid: [bool; 3],
}

impl SpeedValues {
    pub fn read(src: &dyn MsrSource, cpu: LogicalCpuId, ident: &CpuIdent) -> Result<Self> {
        // These three carry the non-ratio fields; any failure here takes
        // the whole module down for the package.
        let misc = read_view(src, cpu, misc_enable::ADDR)?;
        let activation = read_view(src, cpu, turbo_activation_ratio::ADDR)?;
        let pinfo = read_view(src, cpu, platform_info::ADDR)?;

        let mut limits = [0u8; RATIO_LIMIT_COUNT];
        let mut group_valid = [false; 3];
        let mut semaphore = false;

        match read_view(src, cpu, turbo_ratio_limit::ADDR) {
            Ok(v) => {
                for (i, field) in turbo_ratio_limit::RATIO_LIMIT.iter().enumerate() {
                    limits[i] = v.get(*field) as u8;
                }
                group_valid[0] = true;
            }
            Err(e) => warn!(target: "speed", "cpu{}: ratio limits 1-8C unavailable: {}", cpu, e),
        }

        match read_view(src, cpu, turbo_ratio_limit1::ADDR) {
            Ok(v) => {
                for (i, field) in turbo_ratio_limit1::RATIO_LIMIT.iter().enumerate() {
                    limits[8 + i] = v.get(*field) as u8;
                }
                group_valid[1] = true;
            }
            Err(e) => warn!(target: "speed", "cpu{}: ratio limits 9-16C unavailable: {}", cpu, e),
        }

        match read_view(src, cpu, turbo_ratio_limit2::ADDR) {
            Ok(v) => {
                for (i, field) in turbo_ratio_limit2::RATIO_LIMIT.iter().enumerate() {
                    limits[16 + i] = v.get(*field) as u8;
                }
                group_valid[2] = true;
                if !ident.uses_limit3_semaphore() {
                    semaphore = v.bit(turbo_ratio_limit2::SEMAPHORE);
                }
            }
            Err(e) => warn!(target: "speed", "cpu{}: ratio limits 17/18C unavailable: {}", cpu, e),
        }

        if ident.uses_limit3_semaphore() {
            match read_view(src, cpu, turbo_ratio_limit3::ADDR) {
                Ok(v) => semaphore = v.bit(turbo_ratio_limit3::SEMAPHORE),
                Err(e) => warn!(target: "speed", "cpu{}: semaphore unavailable: {}", cpu, e),
            }
        }

        let min_ratio = if ident.is_haswell() {
            pinfo.get(platform_info::MINIMUM_OPERATING_RATIO) as u8
        } else {
            pinfo.get(platform_info::MAXIMUM_EFFICIENCY_RATIO) as u8
        };

        Ok(Self {
            eist_enable: misc.bit(misc_enable::EIST_ENABLE),
            eist_lock: misc.bit(misc_enable::EIST_SELECT_LOCK),
            tbt_disable: misc.bit(misc_enable::IDA_DISABLE),
            tbt_activation_ratio: activation.get(turbo_activation_ratio::MAX_NON_TURBO_RATIO) as u8,
            tbt_activation_ratio_lock: activation.bit(turbo_activation_ratio::LOCK),
            tbt_ratio_limits: limits,
            tbt_ratio_limit_enable: false,
            ratio_semaphore: semaphore,
            min_ratio,
            group_valid,
        })
    }

    /// Whether the backing MSR for ratio slot `idx` was read.
    pub fn ratio_slot_valid(&self, idx: usize) -> bool {
        self.group_valid[ratio_group(idx)]
    }

    /// True once every ratio-limit MSR read; the package-level health
    /// check downgrades the module while this is false.
    pub fn fully_valid(&self) -> bool {
        self.group_valid.iter().all(|v| *v)
    }
}

/// Desired speed state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeedSettings {
    pub eist_enable: Tunable<bool>,
    pub eist_lock: Tunable<bool>,
    pub tbt_disable: Tunable<bool>,
    pub tbt_activation_ratio: Tunable<u8>,
    pub tbt_activation_ratio_lock: Tunable<bool>,
    /// Per-active-core limits, gated as a block by
    /// `tbt_ratio_limit_enable` rather than per-entry.
    pub tbt_ratio_limits: [u8; RATIO_LIMIT_COUNT],
    pub tbt_ratio_limit_enable: bool,
}

impl SpeedSettings {
    /// Clamp a candidate ratio into the platform's `[min_ratio, 255]`.
    pub fn clamp_ratio(values: &SpeedValues, ratio: u8) -> u8 {
        ratio.max(values.min_ratio)
    }

    /// Ratio slots that participate for a package: bounded by the core
    /// count and capped at eighteen.
    fn active_slots(core_count: usize) -> usize {
        core_count.min(RATIO_LIMIT_COUNT)
    }

    pub fn compare(&self, values: &SpeedValues, core_count: usize, diffs: &mut Vec<Diff>) {
        diff_field(diffs, "EIST_Enable", &self.eist_enable, &values.eist_enable);
        diff_field(diffs, "EIST_Lock", &self.eist_lock, &values.eist_lock);
        diff_field(diffs, "TBT_Disable", &self.tbt_disable, &values.tbt_disable);
        diff_field(
            diffs,
            "TBT_Activation_Ratio",
            &self.tbt_activation_ratio,
            &values.tbt_activation_ratio,
        );
        diff_field(
            diffs,
            "TBT_Activation_Ratio_Lock",
            &self.tbt_activation_ratio_lock,
            &values.tbt_activation_ratio_lock,
        );

        if self.tbt_ratio_limit_enable {
            for i in 0..Self::active_slots(core_count) {
                if !values.ratio_slot_valid(i) {
                    continue
                }
                if self.tbt_ratio_limits[i] != values.tbt_ratio_limits[i] {
                    diffs.push(Diff {
                        field: RATIO_KEYS[i],
                        desired: self.tbt_ratio_limits[i].to_string(),
                        observed: values.tbt_ratio_limits[i].to_string(),
                    });
                }
            }
        }
    }

    pub fn apply_args(&self, argv: &mut Vec<String>, values: &SpeedValues, core_count: usize) {
        push_toggle(argv, &self.eist_enable, "--eist-enable", "--eist-disable");
        push_flag(argv, &self.eist_lock, "--eist-lock");
        push_toggle(argv, &self.tbt_disable, "--tbt-disable", "--tbt-enable");
        push_value(argv, &self.tbt_activation_ratio, "--tbt-activation-ratio");
        push_flag(argv, &self.tbt_activation_ratio_lock, "--tbt-activation-ratio-lock");

        if self.tbt_ratio_limit_enable {
            for i in 0..Self::active_slots(core_count) {
                if !values.ratio_slot_valid(i) {
                    continue
                }
                argv.push(RATIO_FLAGS[i].to_string());
                argv.push(self.tbt_ratio_limits[i].to_string());
            }
        }
    }

    pub fn shadow(&mut self, values: &SpeedValues) {
        self.eist_enable.shadow(values.eist_enable);
        self.eist_lock.shadow(values.eist_lock);
        self.tbt_disable.shadow(values.tbt_disable);
        self.tbt_activation_ratio.shadow(values.tbt_activation_ratio);
        self.tbt_activation_ratio_lock.shadow(values.tbt_activation_ratio_lock);
        if !self.tbt_ratio_limit_enable {
            self.tbt_ratio_limits = values.tbt_ratio_limits;
        }
    }

    pub fn load(&mut self, table: &Table, values: &SpeedValues) {
        persist::load_bool(table, "EIST_Enable", &mut self.eist_enable, values.eist_enable);
        persist::load_bool(table, "EIST_Lock", &mut self.eist_lock, values.eist_lock);
        persist::load_bool(table, "TBT_Disable", &mut self.tbt_disable, values.tbt_disable);

        let ratio = persist::get_i64(table, "TBT_Activation_Ratio")
            .map(|n| n.clamp(0, 255) as u8)
            .unwrap_or(values.tbt_activation_ratio);
        let armed = persist::get_bool(table, "TBT_Activation_Ratio_Enabled").unwrap_or(false);
        self.tbt_activation_ratio.restore(ratio, armed);

        persist::load_bool(
            table,
            "TBT_Activation_Ratio_Lock",
            &mut self.tbt_activation_ratio_lock,
            values.tbt_activation_ratio_lock,
        );

        for (i, key) in RATIO_KEYS.iter().enumerate() {
            self.tbt_ratio_limits[i] = persist::get_i64(table, key)
                .map(|n| n.clamp(0, 255) as u8)
                .unwrap_or(values.tbt_ratio_limits[i]);
        }
        self.tbt_ratio_limit_enable =
            persist::get_bool(table, "TBT_Ratio_Limit_Enabled").unwrap_or(false);
    }

    pub fn save(&self, table: &mut Table) {
        persist::store_bool(table, "EIST_Enable", &self.eist_enable);
        persist::store_bool(table, "EIST_Lock", &self.eist_lock);
        persist::store_bool(table, "TBT_Disable", &self.tbt_disable);

        table.insert(
            "TBT_Activation_Ratio".to_string(),
            toml::Value::Integer(*self.tbt_activation_ratio.stored() as i64),
        );
        table.insert(
            "TBT_Activation_Ratio_Enabled".to_string(),
            toml::Value::Boolean(self.tbt_activation_ratio.is_adjust()),
        );
        persist::store_bool(table, "TBT_Activation_Ratio_Lock", &self.tbt_activation_ratio_lock);

        for (i, key) in RATIO_KEYS.iter().enumerate() {
            table.insert(key.to_string(), toml::Value::Integer(self.tbt_ratio_limits[i] as i64));
        }
        table.insert(
            "TBT_Ratio_Limit_Enabled".to_string(),
            toml::Value::Boolean(self.tbt_ratio_limit_enable),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msr::fake::FakeMsrs;

    fn ident() -> CpuIdent {
        CpuIdent { vendor: "GenuineIntel".to_string(), family_id: 6, model_id: 0x9e }
    }

    fn haswell() -> CpuIdent {
        CpuIdent { vendor: "GenuineIntel".to_string(), family_id: 6, model_id: 0x3c }
    }

    fn ratio_msr(ratios: [u8; 8]) -> u64 {
        ratios.iter().rev().fold(0u64, |acc, r| (acc << 8) | *r as u64)
    }

    fn full_bank() -> FakeMsrs {
        let mut msrs = FakeMsrs::new();
        msrs.set(0, misc_enable::ADDR, 1 << 16); // EIST on
        msrs.set(0, turbo_activation_ratio::ADDR, 34 | (1 << 31));
        msrs.set(0, platform_info::ADDR, (8u64 << 40) | (4u64 << 48));
        msrs.set(0, turbo_ratio_limit::ADDR, ratio_msr([44, 43, 42, 41, 40, 39, 38, 37]));
        msrs.set(0, turbo_ratio_limit1::ADDR, ratio_msr([36, 36, 36, 36, 35, 35, 35, 35]));
        msrs.set(0, turbo_ratio_limit2::ADDR, (1u64 << 63) | ratio_msr([34, 34, 0, 0, 0, 0, 0, 0]));
        msrs
    }

    #[test]
    fn read_decodes_everything() {
        let v = SpeedValues::read(&full_bank(), 0, &ident()).unwrap();
        assert!(v.eist_enable);
        assert!(!v.eist_lock);
        assert!(!v.tbt_disable);
        assert_eq!(v.tbt_activation_ratio, 34);
        assert!(v.tbt_activation_ratio_lock);
        assert_eq!(v.tbt_ratio_limits[0], 44);
        assert_eq!(v.tbt_ratio_limits[7], 37);
        assert_eq!(v.tbt_ratio_limits[8], 36);
        assert_eq!(v.tbt_ratio_limits[16], 34);
        assert!(v.ratio_semaphore);
        assert!(v.fully_valid());
        // Non-Haswell part takes the maximum efficiency ratio.
        assert_eq!(v.min_ratio, 8);
    }

    #[test]
    fn haswell_min_ratio_source() {
        let v = SpeedValues::read(&full_bank(), 0, &haswell()).unwrap();
        assert_eq!(v.min_ratio, 4);
    }

    #[test]
    fn broadwell_semaphore_from_limit3() {
        let mut msrs = full_bank();
        msrs.set(0, turbo_ratio_limit2::ADDR, ratio_msr([34, 34, 0, 0, 0, 0, 0, 0]));
        msrs.set(0, turbo_ratio_limit3::ADDR, 1u64 << 63);
        let bdw = CpuIdent { vendor: "GenuineIntel".to_string(), family_id: 6, model_id: 0x4f };
        let v = SpeedValues::read(&msrs, 0, &bdw).unwrap();
        assert!(v.ratio_semaphore);

        // Same raw values through the default path: semaphore bit clear.
        let v = SpeedValues::read(&msrs, 0, &ident()).unwrap();
        assert!(!v.ratio_semaphore);
    }

    #[test]
    fn eight_core_ratio_argv_order() {
        let values = SpeedValues::read(&full_bank(), 0, &ident()).unwrap();
        let mut s = SpeedSettings::default();
        s.tbt_ratio_limit_enable = true;
        s.tbt_ratio_limits[..8].copy_from_slice(&[44, 43, 42, 41, 40, 39, 38, 37]);

        let mut argv = vec![];
        s.apply_args(&mut argv, &values, 8);
        assert_eq!(
            argv,
            vec![
                "-1c", "44", "-2c", "43", "-3c", "42", "-4c", "41", "-5c", "40", "-6c", "39",
                "-7c", "38", "-8c", "37"
            ]
        );
    }

    #[test]
    fn failed_limit1_blanks_slots_9_to_16() {
        let mut msrs = full_bank();
        msrs.fail(turbo_ratio_limit1::ADDR);
        let values = SpeedValues::read(&msrs, 0, &ident()).unwrap();
        assert!(!values.fully_valid());
        assert!(values.ratio_slot_valid(0));
        assert!(!values.ratio_slot_valid(8));
        assert!(values.ratio_slot_valid(16));

        // A 12-core package emits nothing for 9C..12C.
        let mut s = SpeedSettings::default();
        s.tbt_ratio_limit_enable = true;
        s.tbt_ratio_limits = [40; RATIO_LIMIT_COUNT];
        let mut argv = vec![];
        s.apply_args(&mut argv, &values, 12);
        let flags: Vec<&str> = argv.iter().step_by(2).map(|s| s.as_str()).collect();
        assert_eq!(flags, vec!["-1c", "-2c", "-3c", "-4c", "-5c", "-6c", "-7c", "-8c"]);

        let mut diffs = vec![];
        s.compare(&values, 12, &mut diffs);
        assert!(diffs.iter().all(|d| !d.field.starts_with("TBT_Ratio_Limit_9")));
    }

    #[test]
    fn misc_enable_failure_fails_module() {
        let mut msrs = full_bank();
        msrs.fail(misc_enable::ADDR);
        assert!(SpeedValues::read(&msrs, 0, &ident()).is_err());
    }

    #[test]
    fn persistence_roundtrip() {
        let mut s = SpeedSettings::default();
        s.eist_enable.set(true);
        s.tbt_disable.set(false);
        s.tbt_activation_ratio.set(30);
        s.tbt_ratio_limit_enable = true;
        s.tbt_ratio_limits[0] = 45;
        s.tbt_ratio_limits[17] = 33;

        let mut table = Table::new();
        s.save(&mut table);

        let mut loaded = SpeedSettings::default();
        loaded.load(&table, &SpeedValues::default());
        assert_eq!(loaded, s);
    }

    #[test]
    fn ratio_clamp() {
        let values = SpeedValues { min_ratio: 8, ..Default::default() };
        assert_eq!(SpeedSettings::clamp_ratio(&values, 4), 8);
        assert_eq!(SpeedSettings::clamp_ratio(&values, 44), 44);
    }
}
