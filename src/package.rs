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

//! Per-package aggregate: the observed Values and desired Settings of
//! every feature module for one physical package, plus per-module
//! health. Module iteration order is the composition order (thermal,
//! voltage, speed, cpufreq, misc) and never depends on hash iteration,
//! so diffs and argv vectors are reproducible.

use std::path::Path;

use log::error;

use crate::{
    features::{
        cpufreq::{CpuFreqSettings, CpuFreqValues},
        misc::{MiscSettings, MiscValues},
        speed::{SpeedSettings, SpeedValues},
        thermal::{ThermalSettings, ThermalValues},
        voltage::{VoltageSettings, VoltageValues},
    },
    msr::MsrSource,
    persist::SettingsFile,
    power::PowerSupply,
    topology::{CpuIdent, LogicalCpuId, PackageTopology, PhysicalPackageId},
    tunable::Diff,
};

/// Lifecycle state of one package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageState {
    Uninitialized,
    Loaded,
    Synced,
    Dirty,
    Applying,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModuleHealth {
    #[default]
    Ok,
    /// Some backing reads failed; the module participates with what it
    /// has. Only speed's ratio-limit blocks end up here.
    Partial,
    /// The module's reads failed outright; it sits out Compare and
    /// Apply until a later Read succeeds.
    Failed,
}

impl ModuleHealth {
    pub fn usable(&self) -> bool {
        !matches!(self, Self::Failed)
    }
}

/// Health of each feature module. A failed module ceases to participate
/// in Compare and Apply; the other modules proceed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageHealth {
    pub thermal: ModuleHealth,
    pub speed: ModuleHealth,
    pub cpufreq: ModuleHealth,
    pub misc: ModuleHealth,
}

impl PackageHealth {
    pub fn any_degraded(&self) -> bool {
        [self.thermal, self.speed, self.cpufreq, self.misc]
            .iter()
            .any(|h| *h != ModuleHealth::Ok)
    }
}

/// Observed state across all feature modules.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageValues {
    pub thermal: ThermalValues,
    pub voltage: VoltageValues,
    pub speed: SpeedValues,
    pub cpufreq: CpuFreqValues,
    pub misc: MiscValues,
}

/// Desired state across all feature modules.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageSettings {
    pub thermal: ThermalSettings,
    pub voltage: VoltageSettings,
    pub speed: SpeedSettings,
    pub cpufreq: CpuFreqSettings,
    pub misc: MiscSettings,
}

#[derive(Debug, Clone)]
pub struct Package {
    pub id: PhysicalPackageId,
    pub first_cpu: LogicalCpuId,
    pub core_count: usize,
    pub ident: CpuIdent,
    pub values: PackageValues,
    pub settings: PackageSettings,
    pub state: PackageState,
    pub health: PackageHealth,
}

impl Package {
    pub fn new(topo: &PackageTopology) -> Self {
        Self {
            id: topo.id,
            first_cpu: topo.first_logical_cpu(),
            core_count: topo.core_count,
            ident: topo.ident.clone(),
            values: PackageValues::default(),
            settings: PackageSettings::default(),
            state: PackageState::Uninitialized,
            health: PackageHealth::default(),
        }
    }

    /// Decode MSRs and sysfs into Values. Each module reads
    /// independently; a failure degrades only its owner. With `shadow`
    /// set, disarmed settings are cosmetically updated to the fresh
    /// observations (startup and post-apply reads); Refresh passes
    /// false and leaves Settings untouched.
    pub fn read(&mut self, msr: &dyn MsrSource, sysfs_root: &Path, shadow: bool) {
        match ThermalValues::read(msr, self.first_cpu) {
            Ok(v) => {
                self.values.thermal = v;
                self.health.thermal = ModuleHealth::Ok;
            }
            Err(e) => {
                error!(target: "package", "package {}: thermal read failed: {}", self.id, e);
                self.health.thermal = ModuleHealth::Failed;
            }
        }

        match SpeedValues::read(msr, self.first_cpu, &self.ident) {
            Ok(v) => {
                // Partial ratio-limit failures keep the readable blocks
                // usable but flag the module.
                self.health.speed =
                    if v.fully_valid() { ModuleHealth::Ok } else { ModuleHealth::Partial };
                self.values.speed = v;
            }
            Err(e) => {
                error!(target: "package", "package {}: speed read failed: {}", self.id, e);
                self.health.speed = ModuleHealth::Failed;
            }
        }

        match CpuFreqValues::read(sysfs_root, self.first_cpu) {
            Ok(v) => {
                self.values.cpufreq = v;
                self.health.cpufreq = ModuleHealth::Ok;
            }
            Err(e) => {
                error!(target: "package", "package {}: cpufreq read failed: {}", self.id, e);
                self.health.cpufreq = ModuleHealth::Failed;
            }
        }

        match MiscValues::read(msr, self.first_cpu) {
            Ok(v) => {
                self.values.misc = v;
                self.health.misc = ModuleHealth::Ok;
            }
            Err(e) => {
                error!(target: "package", "package {}: misc read failed: {}", self.id, e);
                self.health.misc = ModuleHealth::Failed;
            }
        }

        if shadow {
            self.shadow_settings();
        }
    }

    /// Cosmetic settings refresh from the current Values; armed fields
    /// are never touched.
    pub fn shadow_settings(&mut self) {
        if self.health.thermal == ModuleHealth::Ok {
            self.settings.thermal.shadow(&self.values.thermal);
        }
        self.settings.voltage.shadow(&self.values.voltage);
        if self.health.speed.usable() {
            self.settings.speed.shadow(&self.values.speed);
        }
        if self.health.cpufreq == ModuleHealth::Ok {
            self.settings.cpufreq.shadow(&self.values.cpufreq);
        }
        if self.health.misc == ModuleHealth::Ok {
            self.settings.misc.shadow(&self.values.misc);
        }
    }

    /// Diff desired against observed for every armed field of every
    /// healthy module, in module order.
    pub fn compare(&self, supply: PowerSupply) -> Vec<Diff> {
        let mut diffs = vec![];
        if self.health.thermal == ModuleHealth::Ok {
            self.settings.thermal.compare(&self.values.thermal, supply, &mut diffs);
        }
        self.settings.voltage.compare(&self.values.voltage, &mut diffs);
        // A partial speed module still compares its readable ratio
        // blocks; the invalid slots are skipped inside.
        if self.health.speed.usable() {
            self.settings.speed.compare(&self.values.speed, self.core_count, &mut diffs);
        }
        if self.health.cpufreq == ModuleHealth::Ok {
            self.settings.cpufreq.compare(&self.values.cpufreq, &mut diffs);
        }
        if self.health.misc == ModuleHealth::Ok {
            self.settings.misc.compare(&self.values.misc, &mut diffs);
        }
        diffs
    }

    /// Compose the helper command for this package: the fixed preamble
    /// followed by every healthy module's fragment. A result of exactly
    /// [`Self::PREAMBLE_LEN`] entries means nothing is armed and no
    /// invocation is needed.
    pub fn apply_args(&self, helper: &str, supply: PowerSupply) -> Vec<String> {
        let mut argv = vec![
            helper.to_string(),
            "-v".to_string(),
            "-p".to_string(),
            self.id.to_string(),
        ];

        if self.health.thermal == ModuleHealth::Ok {
            self.settings.thermal.apply_args(&mut argv, supply);
        }
        self.settings.voltage.apply_args(&mut argv);
        if self.health.speed.usable() {
            self.settings.speed.apply_args(&mut argv, &self.values.speed, self.core_count);
        }
        if self.health.cpufreq == ModuleHealth::Ok {
            self.settings.cpufreq.apply_args(&mut argv, &self.values.cpufreq);
        }
        if self.health.misc == ModuleHealth::Ok {
            self.settings.misc.apply_args(&mut argv);
        }
        argv
    }

    pub const PREAMBLE_LEN: usize = 4;

    /// Load Settings from the `ProcessorN` group, synthesizing defaults
    /// from the current Values for missing keys.
    pub fn load(&mut self, cfg: &SettingsFile) {
        let name = SettingsFile::processor_group(self.id);
        let empty = toml::value::Table::new();
        let table = cfg.group(&name).unwrap_or(&empty);

        self.settings.thermal.load(table, &self.values.thermal);
        self.settings.voltage.load(table, &self.values.voltage);
        self.settings.speed.load(table, &self.values.speed);
        self.settings.cpufreq.load(table, &self.values.cpufreq);
        self.settings.misc.load(table, &self.values.misc);
        self.state = PackageState::Loaded;
    }

    /// Write Settings into the `ProcessorN` group.
    pub fn save(&self, cfg: &mut SettingsFile) {
        let name = SettingsFile::processor_group(self.id);
        let table = cfg.group_mut(&name);
        self.settings.thermal.save(table);
        self.settings.voltage.save(table);
        self.settings.speed.save(table);
        self.settings.cpufreq.save(table);
        self.settings.misc.save(table);
    }
}
