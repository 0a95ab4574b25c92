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

//! Read-only MSR access. The production source reads 8 little-endian
//! bytes at offset `addr` of `/dev/cpu/<cpu>/msr`; writes are the
//! privileged helper's business alone and never happen here.

use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::PathBuf,
};

use log::debug;

use crate::{constants, topology::LogicalCpuId, Error, Result};

pub mod layout;
pub use layout::BitField;

/// Seam between the typed views and the kernel MSR device. Tests swap in
/// an in-memory fake.
pub trait MsrSource {
    fn read_msr(&self, cpu: LogicalCpuId, addr: u32) -> Result<u64>;
}

/// `/dev/cpu/<N>/msr` reader.
pub struct MsrDev {
    root: PathBuf,
}

impl MsrDev {
    pub fn new() -> Self {
        Self { root: PathBuf::from(constants::MSR_DEV_ROOT) }
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }
}

impl Default for MsrDev {
    fn default() -> Self {
        Self::new()
    }
}

impl MsrSource for MsrDev {
    fn read_msr(&self, cpu: LogicalCpuId, addr: u32) -> Result<u64> {
        let path = self.root.join(format!("{}/msr", cpu));
        let map_err =
            |e: std::io::Error| Error::MsrReadFailed { cpu, msr: addr, kind: e.kind() };

        let mut file = File::open(&path).map_err(map_err)?;
        file.seek(SeekFrom::Start(addr as u64)).map_err(map_err)?;

        let mut buf = [0u8; 8];
        file.read_exact(&mut buf).map_err(map_err)?;

        let raw = u64::from_le_bytes(buf);
        debug!(target: "msr", "cpu{} msr {:#x} = {:#018x}", cpu, addr, raw);
        Ok(raw)
    }
}

/// A raw 64-bit MSR value with the single field decoder. Constructed by
/// [`read_view`]; on read failure no view exists, so stale bits can
/// never be consulted.
#[derive(Debug, Clone, Copy)]
pub struct MsrValue {
    raw: u64,
}

impl MsrValue {
    pub fn new(raw: u64) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> u64 {
        self.raw
    }

    /// Decode a named field as an unsigned integer in the field's width.
    pub fn get(&self, field: BitField) -> u64 {
        (self.raw >> field.lo) & field.mask()
    }

    pub fn bit(&self, field: BitField) -> bool {
        self.get(field) != 0
    }
}

/// Read one MSR on one logical CPU into a typed view.
pub fn read_view(src: &dyn MsrSource, cpu: LogicalCpuId, addr: u32) -> Result<MsrValue> {
    Ok(MsrValue::new(src.read_msr(cpu, addr)?))
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::{HashMap, HashSet};

    use super::*;

    /// In-memory MSR bank with per-address failure injection.
    #[derive(Default)]
    pub struct FakeMsrs {
        regs: HashMap<(LogicalCpuId, u32), u64>,
        failing: HashSet<u32>,
    }

    impl FakeMsrs {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set(&mut self, cpu: LogicalCpuId, addr: u32, raw: u64) {
            self.regs.insert((cpu, addr), raw);
        }

        pub fn fail(&mut self, addr: u32) {
            self.failing.insert(addr);
        }
    }

    impl MsrSource for FakeMsrs {
        fn read_msr(&self, cpu: LogicalCpuId, addr: u32) -> Result<u64> {
            if self.failing.contains(&addr) {
                return Err(Error::MsrReadFailed {
                    cpu,
                    msr: addr,
                    kind: std::io::ErrorKind::PermissionDenied,
                })
            }
            // Unset registers read as zero, like a freshly reset part.
            Ok(*self.regs.get(&(cpu, addr)).unwrap_or(&0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{fake::FakeMsrs, *};

    #[test]
    fn field_decode() {
        let v = MsrValue::new(0x0000_0000_2988_0001);
        assert!(v.bit(layout::misc_enable::FAST_STRINGS_ENABLE));
        assert!(!v.bit(layout::misc_enable::HARDWARE_PREFETCHER_DISABLE));
        assert_eq!(v.get(layout::temperature_target::TEMPERATURE_TARGET), 0x88);
        assert_eq!(v.get(layout::temperature_target::TCC_ACTIVATION_OFFSET), 0x29);
    }

    #[test]
    fn fake_source_roundtrip() {
        let mut msrs = FakeMsrs::new();
        msrs.set(2, layout::platform_info::ADDR, 0x0008_2800_0000_0000);
        let view = read_view(&msrs, 2, layout::platform_info::ADDR).unwrap();
        assert_eq!(view.get(layout::platform_info::MAXIMUM_EFFICIENCY_RATIO), 0x28);
        assert_eq!(view.get(layout::platform_info::MINIMUM_OPERATING_RATIO), 0x08);

        msrs.fail(layout::platform_info::ADDR);
        assert!(matches!(
            read_view(&msrs, 2, layout::platform_info::ADDR),
            Err(Error::MsrReadFailed { cpu: 2, .. })
        ));
    }

    #[test]
    fn msrdev_missing_node() {
        let dev = MsrDev::with_root(std::env::temp_dir().join("coretune-no-such-msr-root"));
        assert!(matches!(
            dev.read_msr(0, 0x1a0),
            Err(Error::MsrReadFailed { cpu: 0, msr: 0x1a0, .. })
        ));
    }
}
