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

//! Host aggregate: every discovered package plus the host-wide Common
//! settings (behavioral toggles and SMT). Topology is immutable for
//! the lifetime of the aggregate; a rescan that disagrees with the
//! original discovery is an error, never an in-place mutation.

use std::path::Path;

use log::error;
use toml::value::Table;

use crate::{
    features::smt::{SmtSettings, SmtValues},
    msr::MsrSource,
    package::{ModuleHealth, Package},
    persist::{self, SettingsFile},
    power::PowerSupply,
    topology::{PhysicalPackageId, Topology},
    tunable::Diff,
    Error, Result,
};

const COMMON_GROUP: &str = "Common";

/// Host-wide behavioral toggles, persisted in the `Common` group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommonSettings {
    pub save_on_exit: bool,
    pub apply_on_boot_and_resume: bool,
    pub apply_on_acpi_power_event: bool,
    pub smt: SmtSettings,
}

impl CommonSettings {
    pub fn load(&mut self, table: &Table, smt_values: &SmtValues) {
        self.save_on_exit = persist::get_bool(table, "Save_On_Exit").unwrap_or(false);
        self.apply_on_boot_and_resume =
            persist::get_bool(table, "Apply_On_Boot_And_Resume").unwrap_or(false);
        self.apply_on_acpi_power_event =
            persist::get_bool(table, "Apply_On_Acpi_Power_Event").unwrap_or(false);
        self.smt.load(table, smt_values);
    }

    pub fn save(&self, table: &mut Table) {
        table.insert("Save_On_Exit".to_string(), toml::Value::Boolean(self.save_on_exit));
        table.insert(
            "Apply_On_Boot_And_Resume".to_string(),
            toml::Value::Boolean(self.apply_on_boot_and_resume),
        );
        table.insert(
            "Apply_On_Acpi_Power_Event".to_string(),
            toml::Value::Boolean(self.apply_on_acpi_power_event),
        );
        self.smt.save(table);
    }
}

#[derive(Debug, Clone)]
pub struct HostAggregate {
    pub packages: Vec<Package>,
    pub common: CommonSettings,
    pub smt_values: SmtValues,
    pub smt_health: ModuleHealth,
    is_snapshot: bool,
}

impl HostAggregate {
    pub fn new(topology: &Topology) -> Self {
        let packages = topology.packages.iter().map(Package::new).collect();
        Self {
            packages,
            common: CommonSettings::default(),
            smt_values: SmtValues::default(),
            smt_health: ModuleHealth::default(),
            is_snapshot: false,
        }
    }

    pub fn package(&self, id: PhysicalPackageId) -> Result<&Package> {
        self.packages.get(id).ok_or(Error::NoSuchPackage(id))
    }

    pub fn package_mut(&mut self, id: PhysicalPackageId) -> Result<&mut Package> {
        self.packages.get_mut(id).ok_or(Error::NoSuchPackage(id))
    }

    /// Read every package and the host SMT node. A missing or unreadable
    /// SMT control node fails only the SMT module; kernels without it
    /// keep the rest of the host fully functional.
    pub fn read(&mut self, msr: &dyn MsrSource, sysfs_root: &Path, shadow: bool) -> Result<()> {
        for pkg in self.packages.iter_mut() {
            pkg.read(msr, sysfs_root, shadow);
        }
        match SmtValues::read(sysfs_root) {
            Ok(v) => {
                self.smt_values = v;
                self.smt_health = ModuleHealth::Ok;
                if shadow {
                    self.common.smt.shadow(&self.smt_values);
                }
            }
            Err(e) => {
                error!(target: "host", "smt read failed: {}", e);
                self.smt_health = ModuleHealth::Failed;
            }
        }
        Ok(())
    }

    /// Diff everything armed: each package in id order, then SMT.
    pub fn compare(&self, supply: PowerSupply) -> Vec<(PhysicalPackageId, Vec<Diff>)> {
        let mut out = vec![];
        for pkg in &self.packages {
            let diffs = pkg.compare(supply);
            if !diffs.is_empty() {
                out.push((pkg.id, diffs));
            }
        }
        let mut smt_diffs = vec![];
        if self.smt_health.usable() {
            self.common.smt.compare(&self.smt_values, &mut smt_diffs);
        }
        if !smt_diffs.is_empty() {
            // SMT is host-wide; report it under no package by convention
            // of usize::MAX.
            out.push((usize::MAX, smt_diffs));
        }
        out
    }

    /// Helper argv for the host-level SMT invocation. No `-p`: the
    /// kernel switch covers every package at once. Two entries beyond
    /// the program and `-v` mean nothing is armed.
    pub fn smt_apply_args(&self, helper: &str) -> Vec<String> {
        let mut argv = vec![helper.to_string(), "-v".to_string()];
        if self.smt_health.usable() {
            self.common.smt.apply_args(&mut argv);
        }
        argv
    }

    pub const SMT_PREAMBLE_LEN: usize = 2;

    /// Detached copy for rollback. Snapshots refuse persistence so a
    /// rollback staging area can never clobber the settings file.
    pub fn snapshot(&self) -> Self {
        let mut copy = self.clone();
        copy.is_snapshot = true;
        copy
    }

    /// Adopt a snapshot's settings wholesale; observed values and
    /// topology stay as they are.
    pub fn restore(&mut self, snapshot: &Self) {
        for (pkg, snap) in self.packages.iter_mut().zip(snapshot.packages.iter()) {
            pkg.settings = snap.settings.clone();
            pkg.state = snap.state;
        }
        self.common = snapshot.common.clone();
    }

    /// Verify a fresh discovery matches the one this aggregate was
    /// built from. Hotplug mid-run is not supported.
    pub fn rescan(&self, topology: &Topology) -> Result<()> {
        if topology.package_count() != self.packages.len() {
            return Err(Error::TopologyMismatch);
        }
        for (pkg, topo) in self.packages.iter().zip(topology.packages.iter()) {
            if pkg.id != topo.id ||
                pkg.first_cpu != topo.first_logical_cpu() ||
                pkg.core_count != topo.core_count ||
                pkg.ident != topo.ident
            {
                return Err(Error::TopologyMismatch);
            }
        }
        Ok(())
    }

    pub fn load(&mut self, cfg: &SettingsFile) {
        let empty = Table::new();
        let common = cfg.group(COMMON_GROUP).unwrap_or(&empty);
        self.common.load(common, &self.smt_values);
        for pkg in self.packages.iter_mut() {
            pkg.load(cfg);
        }
    }

    pub fn save(&self, cfg: &mut SettingsFile) -> Result<()> {
        if self.is_snapshot {
            return Err(Error::SnapshotPersist);
        }
        self.common.save(cfg.group_mut(COMMON_GROUP));
        for pkg in &self.packages {
            pkg.save(cfg);
        }
        Ok(())
    }
}
