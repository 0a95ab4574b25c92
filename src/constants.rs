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

//! Paths injected at build time. Packagers override these through the
//! environment when invoking the build; the defaults match a standard
//! system-wide install.

/// Privileged MSR writer executable invoked for every Apply.
pub const HELPER_PATH: &str = match option_env!("CORETUNE_HELPER_PATH") {
    Some(path) => path,
    None => "/usr/libexec/coretune-helper",
};

/// Settings file name, joined with the user's config dir at runtime.
pub const CONFIG_FILE: &str = match option_env!("CORETUNE_CONFIG_FILE") {
    Some(path) => path,
    None => "coretune_settings.toml",
};

/// Bootloader configuration consulted (read-only) when boot-time apply
/// is requested.
pub const BOOT_CONFIG_PATH: &str = match option_env!("CORETUNE_BOOT_CONFIG") {
    Some(path) => path,
    None => "/etc/default/coretune-boot",
};

/// Sysfs root for CPU topology, cpufreq and SMT state.
pub const SYSFS_CPU_ROOT: &str = "/sys/devices/system/cpu";

/// MSR character device root, one `msr` node per logical CPU.
pub const MSR_DEV_ROOT: &str = "/dev/cpu";

/// External command whose exit code encodes the AC/battery state.
pub const AC_POWER_CMD: &str = "on_ac_power";
