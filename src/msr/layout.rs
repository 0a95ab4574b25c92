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

//! Declarative bitfield layout of every MSR the core reads. One
//! `BitField` constant per named field, decoded by [`super::MsrValue`];
//! no hand-written per-field accessors. Addresses and bit positions are
//! from the Intel SDM vol. 4.

/// Inclusive bit range `[lo, hi]` within a 64-bit MSR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    pub lo: u8,
    pub hi: u8,
}

impl BitField {
    pub const fn new(lo: u8, hi: u8) -> Self {
        assert!(lo <= hi && hi < 64);
        Self { lo, hi }
    }

    pub const fn width(&self) -> u8 {
        self.hi - self.lo + 1
    }

    pub const fn mask(&self) -> u64 {
        if self.width() == 64 {
            u64::MAX
        } else {
            (1u64 << self.width()) - 1
        }
    }
}

const fn bit(n: u8) -> BitField {
    BitField::new(n, n)
}

/// Eight consecutive 8-bit ratio fields starting at bit 0, the layout
/// shared by the MSR_TURBO_RATIO_LIMIT family.
const fn ratio_bytes<const N: usize>() -> [BitField; N] {
    let mut fields = [BitField::new(0, 7); N];
    let mut i = 0;
    while i < N {
        fields[i] = BitField::new(i as u8 * 8, i as u8 * 8 + 7);
        i += 1;
    }
    fields
}

pub mod misc_enable {
    use super::{bit, BitField};

    pub const ADDR: u32 = 0x1a0;

    pub const FAST_STRINGS_ENABLE: BitField = bit(0);
    pub const TM_SELECT: BitField = bit(3);
    pub const HARDWARE_PREFETCHER_DISABLE: BitField = bit(9);
    pub const FERR_MULTIPLEXING_ENABLE: BitField = bit(10);
    pub const TM2_ENABLE: BitField = bit(13);
    pub const EIST_ENABLE: BitField = bit(16);
    pub const ENABLE_MONITOR_FSM: BitField = bit(18);
    pub const ADJACENT_CACHE_LINE_PREFETCH_DISABLE: BitField = bit(19);
    pub const EIST_SELECT_LOCK: BitField = bit(20);
    pub const LIMIT_CPUID_MAXVAL: BitField = bit(22);
    pub const XTPR_MESSAGE_DISABLE: BitField = bit(23);
    pub const XD_BIT_DISABLE: BitField = bit(34);
    pub const DCU_PREFETCHER_DISABLE: BitField = bit(37);
    pub const IDA_DISABLE: BitField = bit(38);
    pub const IP_PREFETCHER_DISABLE: BitField = bit(39);
}

pub mod temperature_target {
    use super::BitField;

    pub const ADDR: u32 = 0x1a2;

    pub const TEMPERATURE_TARGET: BitField = BitField::new(16, 23);
    pub const TCC_ACTIVATION_OFFSET: BitField = BitField::new(24, 29);
}

pub mod platform_info {
    use super::BitField;

    pub const ADDR: u32 = 0xce;

    pub const MAXIMUM_EFFICIENCY_RATIO: BitField = BitField::new(40, 47);
    /// Only meaningful on Haswell family parts.
    pub const MINIMUM_OPERATING_RATIO: BitField = BitField::new(48, 55);
}

pub mod turbo_activation_ratio {
    use super::{bit, BitField};

    pub const ADDR: u32 = 0x64c;

    pub const MAX_NON_TURBO_RATIO: BitField = BitField::new(0, 7);
    pub const LOCK: BitField = bit(31);
}

/// Ratio_Limit_{1..8}C
pub mod turbo_ratio_limit {
    use super::{ratio_bytes, BitField};

    pub const ADDR: u32 = 0x1ad;

    pub const RATIO_LIMIT: [BitField; 8] = ratio_bytes();
}

/// Ratio_Limit_{9..16}C
pub mod turbo_ratio_limit1 {
    use super::{ratio_bytes, BitField};

    pub const ADDR: u32 = 0x1ae;

    pub const RATIO_LIMIT: [BitField; 8] = ratio_bytes();
}

/// Ratio_Limit_{17,18}C plus the semaphore on most parts.
pub mod turbo_ratio_limit2 {
    use super::{bit, ratio_bytes, BitField};

    pub const ADDR: u32 = 0x1af;

    pub const RATIO_LIMIT: [BitField; 2] = ratio_bytes();
    pub const SEMAPHORE: BitField = bit(63);
}

/// Semaphore home on Broadwell-DE/EP (family 6, models 0x56/0x4f).
pub mod turbo_ratio_limit3 {
    use super::{bit, BitField};

    pub const ADDR: u32 = 0x1ac;

    pub const SEMAPHORE: BitField = bit(63);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_masks() {
        assert_eq!(bit(0).mask(), 1);
        assert_eq!(bit(63).mask(), 1);
        assert_eq!(BitField::new(16, 23).width(), 8);
        assert_eq!(BitField::new(16, 23).mask(), 0xff);
        assert_eq!(BitField::new(0, 63).mask(), u64::MAX);
    }

    #[test]
    fn ratio_byte_layout() {
        let fields = turbo_ratio_limit::RATIO_LIMIT;
        assert_eq!(fields[0], BitField::new(0, 7));
        assert_eq!(fields[7], BitField::new(56, 63));
        let fields = turbo_ratio_limit2::RATIO_LIMIT;
        assert_eq!(fields[1], BitField::new(8, 15));
    }
}
