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

//! Host CPU inventory: physical packages, cores, logical CPUs and the
//! CPUID-derived feature predicates the tuning core keys off.
//!
//! Built once at startup from sysfs and `/proc/cpuinfo`, immutable for
//! the rest of the run.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info};

use crate::{constants, Error, Result};

/// Dense index 0..P-1 over physical sockets.
pub type PhysicalPackageId = usize;

/// Dense index over schedulable CPUs.
pub type LogicalCpuId = usize;

/// CPUID identity shared by every package on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuIdent {
    pub vendor: String,
    pub family_id: u32,
    pub model_id: u32,
}

/// Haswell client/server model ids (family 6).
const HASWELL_MODELS: [u32; 4] = [0x3c, 0x3f, 0x45, 0x46];

/// Broadwell-DE/EP model ids whose ratio-limit semaphore lives in
/// MSR_TURBO_RATIO_LIMIT3 instead of MSR_TURBO_RATIO_LIMIT2.
const LIMIT3_SEMAPHORE_MODELS: [u32; 2] = [0x56, 0x4f];

impl CpuIdent {
    pub fn is_intel(&self) -> bool {
        self.vendor == "GenuineIntel"
    }

    pub fn is_haswell(&self) -> bool {
        self.family_id == 6 && HASWELL_MODELS.contains(&self.model_id)
    }

    pub fn is_haswell_or_later(&self) -> bool {
        self.family_id == 6 && self.model_id >= 0x3c
    }

    pub fn uses_limit3_semaphore(&self) -> bool {
        self.family_id == 6 && LIMIT3_SEMAPHORE_MODELS.contains(&self.model_id)
    }
}

/// One physical socket: its logical CPUs (sorted ascending), distinct
/// core count and CPUID identity.
#[derive(Debug, Clone)]
pub struct PackageTopology {
    pub id: PhysicalPackageId,
    pub logical_cpus: Vec<LogicalCpuId>,
    pub core_count: usize,
    pub ident: CpuIdent,
}

impl PackageTopology {
    /// Minimum logical CPU of the package. All logical CPUs in a package
    /// observe the same value for the MSRs in scope, so this is the read
    /// target for the whole package. `logical_cpus` is never empty.
    pub fn first_logical_cpu(&self) -> LogicalCpuId {
        self.logical_cpus[0]
    }
}

/// Fixed-after-discovery view of the host.
#[derive(Debug, Clone)]
pub struct Topology {
    pub packages: Vec<PackageTopology>,
}

impl Topology {
    /// Enumerate the live host.
    pub fn discover() -> Result<Self> {
        Self::discover_at(Path::new(constants::SYSFS_CPU_ROOT), Path::new("/proc/cpuinfo"))
    }

    /// Enumerate from explicit roots. Tests point this at fixtures.
    pub fn discover_at(sysfs_root: &Path, cpuinfo: &Path) -> Result<Self> {
        let ident = parse_cpuinfo_ident(&fs::read_to_string(cpuinfo)?)?;
        if !ident.is_intel() {
            return Err(Error::UnsupportedProcessor(ident.vendor))
        }

        let present = fs::read_to_string(sysfs_root.join("present"))?;
        let cpus = parse_cpu_list(present.trim())?;

        let mut assignments = Vec::with_capacity(cpus.len());
        for cpu in cpus {
            let base: PathBuf = sysfs_root.join(format!("cpu{}/topology", cpu));
            let pkg = read_usize(&base.join("physical_package_id"))?;
            let core = read_usize(&base.join("core_id"))?;
            assignments.push((cpu, pkg, core));
        }

        let topo = Self::from_assignments(&assignments, ident)?;
        info!(
            target: "topology",
            "Discovered {} package(s), {} logical cpu(s)",
            topo.package_count(),
            assignments.len()
        );
        Ok(topo)
    }

    /// Build the inventory from `(logical cpu, raw package id, core id)`
    /// triples. Raw sysfs package ids need not be dense; they are mapped
    /// onto 0..P-1 in ascending order.
    pub fn from_assignments(
        assignments: &[(LogicalCpuId, usize, usize)],
        ident: CpuIdent,
    ) -> Result<Self> {
        if assignments.is_empty() {
            return Err(Error::ParseFailed("no logical cpus enumerated"))
        }

        // BTreeMap keeps raw package ids in ascending order so the dense
        // remap is deterministic.
        let mut by_package: BTreeMap<usize, (Vec<LogicalCpuId>, Vec<usize>)> = BTreeMap::new();
        for &(cpu, pkg, core) in assignments {
            let entry = by_package.entry(pkg).or_default();
            entry.0.push(cpu);
            if !entry.1.contains(&core) {
                entry.1.push(core);
            }
        }

        let mut packages = Vec::with_capacity(by_package.len());
        for (id, (raw_pkg, (mut cpus, cores))) in by_package.into_iter().enumerate() {
            cpus.sort_unstable();
            debug!(
                target: "topology",
                "package {} (raw {}): cpus {:?}, {} core(s)",
                id, raw_pkg, cpus, cores.len()
            );
            packages.push(PackageTopology {
                id,
                logical_cpus: cpus,
                core_count: cores.len(),
                ident: ident.clone(),
            });
        }

        Ok(Self { packages })
    }

    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    pub fn package(&self, id: PhysicalPackageId) -> Result<&PackageTopology> {
        self.packages.get(id).ok_or(Error::NoSuchPackage(id))
    }
}

/// Parse a sysfs cpu list such as `0-3,8,10-11`.
pub fn parse_cpu_list(list: &str) -> Result<Vec<LogicalCpuId>> {
    let mut cpus = vec![];
    for part in list.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue
        }
        match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: usize = lo.trim().parse()?;
                let hi: usize = hi.trim().parse()?;
                if hi < lo {
                    return Err(Error::ParseFailed("descending cpu range"))
                }
                cpus.extend(lo..=hi);
            }
            None => cpus.push(part.parse()?),
        }
    }
    Ok(cpus)
}

/// Pull vendor, family and model out of `/proc/cpuinfo` text. Only the
/// first processor stanza is inspected; the MSRs in scope are uniform
/// across packages.
fn parse_cpuinfo_ident(text: &str) -> Result<CpuIdent> {
    let mut vendor = None;
    let mut family = None;
    let mut model = None;

    for line in text.lines() {
        let Some((key, val)) = line.split_once(':') else { continue };
        let (key, val) = (key.trim(), val.trim());
        match key {
            "vendor_id" if vendor.is_none() => vendor = Some(val.to_string()),
            "cpu family" if family.is_none() => family = Some(val.parse::<u32>()?),
            "model" if model.is_none() => model = Some(val.parse::<u32>()?),
            _ => {}
        }
        if vendor.is_some() && family.is_some() && model.is_some() {
            break
        }
    }

    match (vendor, family, model) {
        (Some(vendor), Some(family_id), Some(model_id)) =>
            Ok(CpuIdent { vendor, family_id, model_id }),
        _ => Err(Error::ParseFailed("cpuinfo missing vendor/family/model")),
    }
}

fn read_usize(path: &Path) -> Result<usize> {
    Ok(fs::read_to_string(path)?.trim().parse()?)
}
