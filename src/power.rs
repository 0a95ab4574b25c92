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

//! AC/battery detection via the `on_ac_power` utility. Exit 0 means
//! mains, exit 1 means battery; anything else (including the tool being
//! absent) is treated as mains so the conservative profile wins.

use std::fmt;

use log::warn;

use crate::constants::AC_POWER_CMD;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerSupply {
    Mains,
    Battery,
}

impl fmt::Display for PowerSupply {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Mains => write!(f, "mains"),
            Self::Battery => write!(f, "battery"),
        }
    }
}

/// Probes the host power supply.
#[derive(Debug, Clone)]
pub struct PowerSource {
    command: String,
}

impl Default for PowerSource {
    fn default() -> Self {
        Self { command: AC_POWER_CMD.to_string() }
    }
}

impl PowerSource {
    pub fn with_command(command: &str) -> Self {
        Self { command: command.to_string() }
    }

    pub async fn probe(&self) -> PowerSupply {
        let status = smol::process::Command::new(&self.command).status().await;
        match status.as_ref().ok().and_then(|s| s.code()) {
            Some(0) => PowerSupply::Mains,
            Some(1) => PowerSupply::Battery,
            other => {
                warn!(
                    target: "power",
                    "{} gave no usable verdict ({:?}), assuming mains", self.command, other,
                );
                PowerSupply::Mains
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_maps_exit_codes() {
        smol::block_on(async {
            assert_eq!(PowerSource::with_command("true").probe().await, PowerSupply::Mains);
            assert_eq!(PowerSource::with_command("false").probe().await, PowerSupply::Battery);
            // Missing binary falls back to mains.
            assert_eq!(
                PowerSource::with_command("/nonexistent/on_ac_power").probe().await,
                PowerSupply::Mains
            );
        });
    }
}
