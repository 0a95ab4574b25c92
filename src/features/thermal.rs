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

//! Thermal control: TM1/TM2 monitoring mode bits and the throttling
//! setpoint. The setpoint is programmed as an offset below Tj_max; the
//! observed effective target is `Temperature_Target - TCC offset`.
//!
//! Two desired targets are kept, one for mains and one for battery. The
//! power-source poller re-applies on a transition so the battery target
//! replaces the mains one while unplugged.

use toml::value::Table;

use crate::{
    msr::{
        layout::{misc_enable, temperature_target},
        read_view, MsrSource,
    },
    persist,
    power::PowerSupply,
    topology::LogicalCpuId,
    tunable::{diff_field, Diff, Tunable},
    Result,
};

use super::{push_toggle, push_value};

/// Observed thermal state for one package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThermalValues {
    /// Tj_max as programmed, degrees Celsius.
    pub target_temperature: u64,
    /// TCC activation offset below Tj_max, degrees Celsius.
    pub target_temperature_offset: u64,
    pub tm_select: bool,
    pub tm2_enable: bool,
}

impl ThermalValues {
    pub fn read(src: &dyn MsrSource, cpu: LogicalCpuId) -> Result<Self> {
        let target = read_view(src, cpu, temperature_target::ADDR)?;
        let misc = read_view(src, cpu, misc_enable::ADDR)?;

        Ok(Self {
            target_temperature: target.get(temperature_target::TEMPERATURE_TARGET),
            target_temperature_offset: target.get(temperature_target::TCC_ACTIVATION_OFFSET),
            tm_select: misc.bit(misc_enable::TM_SELECT),
            tm2_enable: misc.bit(misc_enable::TM2_ENABLE),
        })
    }

    /// Throttling setpoint actually in force.
    pub fn effective_target(&self) -> u64 {
        self.target_temperature.saturating_sub(self.target_temperature_offset)
    }
}

/// Desired thermal state. `target_temperature_battery` replaces
/// `target_temperature` whenever the host runs on battery.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThermalSettings {
    pub target_temperature: Tunable<u64>,
    pub target_temperature_battery: Tunable<u64>,
    pub tm_select: Tunable<bool>,
    pub tm2_enable: Tunable<bool>,
}

impl ThermalSettings {
    /// The target applicable for the given power source. On battery the
    /// battery target wins when armed, otherwise the mains target rules.
    fn applicable_target(&self, supply: PowerSupply) -> &Tunable<u64> {
        if supply == PowerSupply::Battery && self.target_temperature_battery.is_adjust() {
            &self.target_temperature_battery
        } else {
            &self.target_temperature
        }
    }

    pub fn compare(&self, values: &ThermalValues, supply: PowerSupply, diffs: &mut Vec<Diff>) {
        diff_field(
            diffs,
            "Target_Temperature",
            self.applicable_target(supply),
            &values.effective_target(),
        );
        diff_field(diffs, "TM_Select", &self.tm_select, &values.tm_select);
        diff_field(diffs, "TM2_Enable", &self.tm2_enable, &values.tm2_enable);
    }

    pub fn apply_args(&self, argv: &mut Vec<String>, supply: PowerSupply) {
        push_value(argv, self.applicable_target(supply), "--target-temp");
        push_toggle(argv, &self.tm_select, "--tm-select-enable", "--tm-select-disable");
        push_toggle(argv, &self.tm2_enable, "--tm2-enable", "--tm2-disable");
    }

    pub fn shadow(&mut self, values: &ThermalValues) {
        self.target_temperature.shadow(values.effective_target());
        self.target_temperature_battery.shadow(values.effective_target());
        self.tm_select.shadow(values.tm_select);
        self.tm2_enable.shadow(values.tm2_enable);
    }

    pub fn load(&mut self, table: &Table, values: &ThermalValues) {
        let observed = values.effective_target();
        persist::load_u64(table, "Target_Temperature", &mut self.target_temperature, observed);
        persist::load_u64(
            table,
            "Target_Temperature_Battery",
            &mut self.target_temperature_battery,
            observed,
        );
        persist::load_bool(table, "TM_Select", &mut self.tm_select, values.tm_select);
        persist::load_bool(table, "TM2_Enable", &mut self.tm2_enable, values.tm2_enable);
    }

    pub fn save(&self, table: &mut Table) {
        persist::store_u64(table, "Target_Temperature", &self.target_temperature);
        persist::store_u64(table, "Target_Temperature_Battery", &self.target_temperature_battery);
        persist::store_bool(table, "TM_Select", &self.tm_select);
        persist::store_bool(table, "TM2_Enable", &self.tm2_enable);
    }
}
