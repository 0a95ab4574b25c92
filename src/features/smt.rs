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

//! Simultaneous multithreading. Host-wide rather than per-package: the
//! observed state comes from the kernel's SMT control node and the
//! desired state lives in [`crate::host::CommonSettings`]. The
//! orchestrator gives it a dedicated helper invocation without `-p`.

use std::{fs, path::Path};

use toml::value::Table;

use crate::{
    persist,
    tunable::{diff_field, Diff, Tunable},
    Result,
};

use super::push_toggle;

/// Observed host SMT state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmtValues {
    pub active: bool,
}

impl SmtValues {
    /// Read `<sysfs root>/smt/active`.
    pub fn read(sysfs_root: &Path) -> Result<Self> {
        let active = fs::read_to_string(sysfs_root.join("smt/active"))?.trim() == "1";
        Ok(Self { active })
    }
}

/// Desired host SMT state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmtSettings {
    pub enable: Tunable<bool>,
}

impl SmtSettings {
    pub fn compare(&self, values: &SmtValues, diffs: &mut Vec<Diff>) {
        diff_field(diffs, "SMT_Enable", &self.enable, &values.active);
    }

    pub fn apply_args(&self, argv: &mut Vec<String>) {
        push_toggle(argv, &self.enable, "--smt-enable", "--smt-disable");
    }

    pub fn shadow(&mut self, values: &SmtValues) {
        self.enable.shadow(values.active);
    }

    pub fn load(&mut self, table: &Table, values: &SmtValues) {
        persist::load_bool(table, "SMT_Enable", &mut self.enable, values.active);
    }

    pub fn save(&self, table: &mut Table) {
        persist::store_bool(table, "SMT_Enable", &self.enable);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysfs_read() {
        let root = std::env::temp_dir().join("coretune-smt-test");
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(root.join("smt")).unwrap();

        fs::write(root.join("smt/active"), "1\n").unwrap();
        assert!(SmtValues::read(&root).unwrap().active);

        fs::write(root.join("smt/active"), "0\n").unwrap();
        assert!(!SmtValues::read(&root).unwrap().active);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn toggle_and_persistence() {
        let mut s = SmtSettings::default();
        let mut argv = vec![];
        s.apply_args(&mut argv);
        assert!(argv.is_empty());

        s.enable.set(false);
        s.apply_args(&mut argv);
        assert_eq!(argv, vec!["--smt-disable"]);

        let mut diffs = vec![];
        s.compare(&SmtValues { active: true }, &mut diffs);
        assert_eq!(diffs.len(), 1);

        let mut table = Table::new();
        s.save(&mut table);
        let mut loaded = SmtSettings::default();
        loaded.load(&table, &SmtValues::default());
        assert_eq!(loaded, s);
    }
}
