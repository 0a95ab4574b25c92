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

//! Frequency governor module. Sourced from the kernel's cpufreq sysfs,
//! not MSRs; the package's first logical CPU speaks for the package. A
//! desired governor is validated against the kernel's advertised set
//! before it may reach Apply.

use std::{fs, path::Path};

use log::warn;
use toml::value::Table;

use crate::{
    persist,
    topology::LogicalCpuId,
    tunable::{diff_field, Diff, Tunable},
    Error, Result,
};

use super::push_value;

/// Observed cpufreq state for one package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuFreqValues {
    pub min_khz: u64,
    pub max_khz: u64,
    pub governor: String,
    pub available_governors: Vec<String>,
}

impl CpuFreqValues {
    /// Read from `<sysfs root>/cpu<N>/cpufreq`.
    pub fn read(sysfs_root: &Path, cpu: LogicalCpuId) -> Result<Self> {
        let base = sysfs_root.join(format!("cpu{}/cpufreq", cpu));

        let min_khz = fs::read_to_string(base.join("scaling_min_freq"))?.trim().parse()?;
        let max_khz = fs::read_to_string(base.join("scaling_max_freq"))?.trim().parse()?;
        let governor = fs::read_to_string(base.join("scaling_governor"))?.trim().to_string();
        let available_governors = fs::read_to_string(base.join("scaling_available_governors"))?
            .split_whitespace()
            .map(str::to_string)
            .collect();

        Ok(Self { min_khz, max_khz, governor, available_governors })
    }
}

/// Desired cpufreq state, applied to every logical CPU of the package.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuFreqSettings {
    pub min_khz: Tunable<u64>,
    pub max_khz: Tunable<u64>,
    pub governor: Tunable<String>,
}

impl CpuFreqSettings {
    /// Check an armed governor against the kernel's advertised set.
    pub fn validate_governor(&self, values: &CpuFreqValues) -> Result<()> {
        match self.governor.get() {
            Some(g) if !values.available_governors.iter().any(|a| a == g) =>
                Err(Error::UnknownGovernor(g.clone())),
            _ => Ok(()),
        }
    }

    pub fn compare(&self, values: &CpuFreqValues, diffs: &mut Vec<Diff>) {
        diff_field(diffs, "Freq_Min", &self.min_khz, &values.min_khz);
        diff_field(diffs, "Freq_Max", &self.max_khz, &values.max_khz);
        diff_field(diffs, "Freq_Governor", &self.governor, &values.governor);
    }

    pub fn apply_args(&self, argv: &mut Vec<String>, values: &CpuFreqValues) {
        push_value(argv, &self.min_khz, "--freq-min");
        push_value(argv, &self.max_khz, "--freq-max");
        match self.validate_governor(values) {
            Ok(()) => push_value(argv, &self.governor, "--freq-governor"),
            // An unknown governor never reaches the helper.
            Err(e) => warn!(target: "cpufreq", "skipping governor: {}", e),
        }
    }

    pub fn shadow(&mut self, values: &CpuFreqValues) {
        self.min_khz.shadow(values.min_khz);
        self.max_khz.shadow(values.max_khz);
        self.governor.shadow(values.governor.clone());
    }

    pub fn load(&mut self, table: &Table, values: &CpuFreqValues) {
        persist::load_u64(table, "Freq_Min", &mut self.min_khz, values.min_khz);
        persist::load_u64(table, "Freq_Max", &mut self.max_khz, values.max_khz);
        persist::load_str(table, "Freq_Governor", &mut self.governor, &values.governor);
    }

    pub fn save(&self, table: &mut Table) {
        persist::store_u64(table, "Freq_Min", &self.min_khz);
        persist::store_u64(table, "Freq_Max", &self.max_khz);
        persist::store_str(table, "Freq_Governor", &self.governor);
    }
}
