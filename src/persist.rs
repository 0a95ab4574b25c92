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

//! Grouped key/value settings file. Layout:
//!
//! ```toml
//! [Common]
//! Save_On_Exit = true
//!
//! [Processor0]
//! EIST_Enable = true
//! EIST_Enable_Enabled = true
//! ```
//!
//! Every tunable has a `<Name>` key (desired value) and a
//! `<Name>_Enabled` twin (the adjust gate). The document is manipulated
//! as a raw table so keys this version doesn't know about survive a
//! load/save round-trip.

use std::{fs, path::Path};

use log::warn;
use toml::value::{Table, Value};

use crate::{tunable::Tunable, Error, Result};

/// In-memory settings document.
#[derive(Debug, Clone, Default)]
pub struct SettingsFile {
    root: Table,
}

impl SettingsFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let value: Value = toml::from_str(&text)?;
        match value {
            Value::Table(root) => Ok(Self { root }),
            _ => Err(Error::ParseFailed("settings root is not a table")),
        }
    }

    /// Load, degrading a missing or malformed file to an empty document.
    /// Defaults are then synthesized by the feature modules.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(target: "persist", "Using default settings ({}): {}", path.display(), e);
                Self::new()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(&Value::Table(self.root.clone()))?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn group(&self, name: &str) -> Option<&Table> {
        match self.root.get(name) {
            Some(Value::Table(t)) => Some(t),
            _ => None,
        }
    }

    pub fn group_mut(&mut self, name: &str) -> &mut Table {
        let entry = self
            .root
            .entry(name.to_string())
            .or_insert_with(|| Value::Table(Table::new()));
        if !entry.is_table() {
            *entry = Value::Table(Table::new());
        }
        // Just ensured the entry is a table.
        match entry {
            Value::Table(t) => t,
            _ => unreachable!(),
        }
    }

    /// Group name for one package's settings.
    pub fn processor_group(id: usize) -> String {
        format!("Processor{}", id)
    }
}

// Typed readers. Values written by hand may use strings or 0/1 for
// booleans; accept those forms on the way in, always write TOML types
// on the way out.

pub fn get_bool(table: &Table, key: &str) -> Option<bool> {
    match table.get(key)? {
        Value::Boolean(b) => Some(*b),
        Value::Integer(0) => Some(false),
        Value::Integer(1) => Some(true),
        Value::String(s) => match s.as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub fn get_i64(table: &Table, key: &str) -> Option<i64> {
    match table.get(key)? {
        Value::Integer(n) => Some(*n),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub fn get_f64(table: &Table, key: &str) -> Option<f64> {
    match table.get(key)? {
        Value::Float(x) => Some(*x),
        Value::Integer(n) => Some(*n as f64),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub fn get_str<'a>(table: &'a Table, key: &str) -> Option<&'a str> {
    match table.get(key)? {
        Value::String(s) => Some(s.as_str()),
        _ => None,
    }
}

fn enabled_key(key: &str) -> String {
    format!("{}_Enabled", key)
}

// Tunable pair load/store. `fallback` is the most recently observed
// Value for the field, supplied by the caller; a missing gate key always
// lands on "do not adjust".

pub fn load_bool(table: &Table, key: &str, tunable: &mut Tunable<bool>, fallback: bool) {
    let value = get_bool(table, key).unwrap_or(fallback);
    let adjust = get_bool(table, &enabled_key(key)).unwrap_or(false);
    tunable.restore(value, adjust);
}

pub fn store_bool(table: &mut Table, key: &str, tunable: &Tunable<bool>) {
    table.insert(key.to_string(), Value::Boolean(*tunable.stored()));
    table.insert(enabled_key(key), Value::Boolean(tunable.is_adjust()));
}

pub fn load_u64(table: &Table, key: &str, tunable: &mut Tunable<u64>, fallback: u64) {
    let value = get_i64(table, key).map(|n| n.max(0) as u64).unwrap_or(fallback);
    let adjust = get_bool(table, &enabled_key(key)).unwrap_or(false);
    tunable.restore(value, adjust);
}

pub fn store_u64(table: &mut Table, key: &str, tunable: &Tunable<u64>) {
    table.insert(key.to_string(), Value::Integer(*tunable.stored() as i64));
    table.insert(enabled_key(key), Value::Boolean(tunable.is_adjust()));
}

pub fn load_f64(table: &Table, key: &str, tunable: &mut Tunable<f64>, fallback: f64) {
    let value = get_f64(table, key).unwrap_or(fallback);
    let adjust = get_bool(table, &enabled_key(key)).unwrap_or(false);
    tunable.restore(value, adjust);
}

pub fn store_f64(table: &mut Table, key: &str, tunable: &Tunable<f64>) {
    table.insert(key.to_string(), Value::Float(*tunable.stored()));
    table.insert(enabled_key(key), Value::Boolean(tunable.is_adjust()));
}

pub fn load_str(table: &Table, key: &str, tunable: &mut Tunable<String>, fallback: &str) {
    let value = get_str(table, key).unwrap_or(fallback).to_string();
    let adjust = get_bool(table, &enabled_key(key)).unwrap_or(false);
    tunable.restore(value, adjust);
}

pub fn store_str(table: &mut Table, key: &str, tunable: &Tunable<String>) {
    table.insert(key.to_string(), Value::String(tunable.stored().clone()));
    table.insert(enabled_key(key), Value::Boolean(tunable.is_adjust()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_roundtrip() {
        let mut table = Table::new();
        let mut t = Tunable::new(false);
        t.set(true);
        store_bool(&mut table, "EIST_Enable", &t);

        let mut loaded = Tunable::new(false);
        load_bool(&table, "EIST_Enable", &mut loaded, false);
        assert_eq!(loaded, t);

        // Disarmed pair keeps its stored value through the round-trip.
        let mut t = Tunable::new(77u64);
        let mut table = Table::new();
        store_u64(&mut table, "TBT_Activation_Ratio", &t);
        load_u64(&table, "TBT_Activation_Ratio", &mut t, 0);
        assert_eq!(*t.stored(), 77);
        assert!(!t.is_adjust());
    }

    #[test]
    fn lenient_bool_forms() {
        let mut table = Table::new();
        table.insert("A".into(), Value::String("true".into()));
        table.insert("B".into(), Value::String("0".into()));
        table.insert("C".into(), Value::Integer(1));
        table.insert("D".into(), Value::String("yes".into()));
        assert_eq!(get_bool(&table, "A"), Some(true));
        assert_eq!(get_bool(&table, "B"), Some(false));
        assert_eq!(get_bool(&table, "C"), Some(true));
        assert_eq!(get_bool(&table, "D"), None);
        assert_eq!(get_bool(&table, "missing"), None);
    }

    #[test]
    fn missing_keys_use_fallback_and_disarm() {
        let table = Table::new();
        let mut t = Tunable::new(0.0f64);
        load_f64(&table, "Voltage_Offset_Plane_0", &mut t, -48.828125);
        assert_eq!(*t.stored(), -48.828125);
        assert!(!t.is_adjust());
    }

    #[test]
    fn unknown_keys_survive_roundtrip() {
        let dir = std::env::temp_dir().join("coretune-persist-test");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.toml");

        std::fs::write(
            &path,
            "[Common]\nSave_On_Exit = true\nFuture_Key = \"keepme\"\n\n[Processor0]\nX = 1\n",
        )
        .unwrap();

        let mut cfg = SettingsFile::load(&path).unwrap();
        cfg.group_mut("Common").insert("Save_On_Exit".into(), Value::Boolean(false));
        cfg.save(&path).unwrap();

        let cfg = SettingsFile::load(&path).unwrap();
        let common = cfg.group("Common").unwrap();
        assert_eq!(get_str(common, "Future_Key"), Some("keepme"));
        assert_eq!(get_bool(common, "Save_On_Exit"), Some(false));
        assert_eq!(get_i64(cfg.group("Processor0").unwrap(), "X"), Some(1));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn malformed_file_degrades_to_empty() {
        let dir = std::env::temp_dir().join("coretune-persist-bad");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.toml");
        std::fs::write(&path, "[Common\nnot toml").unwrap();

        assert!(SettingsFile::load(&path).is_err());
        let cfg = SettingsFile::load_or_default(&path);
        assert!(cfg.group("Common").is_none());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
