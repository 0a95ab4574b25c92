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

/// Main result type used throughout the codebase.
pub type Result<T> = std::result::Result<T, Error>;

/// Library errors. The enum stays `Clone` so aggregates that record a
/// failure can still be deep-copied; wrap foreign errors accordingly.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    // ==============
    // Parsing errors
    // ==============
    #[error("Parse failed: {0}")]
    ParseFailed(&'static str),

    #[error(transparent)]
    ParseIntError(#[from] std::num::ParseIntError),

    #[error(transparent)]
    ParseFloatError(#[from] std::num::ParseFloatError),

    #[error("toml parse error: {0}")]
    TomlParseError(String),

    #[error("toml serialize error: {0}")]
    TomlSerializeError(String),

    #[error(transparent)]
    Utf8Error(#[from] std::str::Utf8Error),

    // ===============
    // Hardware errors
    // ===============
    #[error("Unsupported processor: {0}")]
    UnsupportedProcessor(String),

    #[error("Failed reading MSR {msr:#x} on cpu{cpu}: {kind:?}")]
    MsrReadFailed { cpu: usize, msr: u32, kind: std::io::ErrorKind },

    #[error("No such package: {0}")]
    NoSuchPackage(usize),

    #[error("Topology mismatch on rescan, aggregate is stale")]
    TopologyMismatch,

    #[error("Governor {0} not offered by the kernel")]
    UnknownGovernor(String),

    // ================
    // Lifecycle errors
    // ================
    #[error("Privileged helper exited with code {0}")]
    HelperFailed(i32),

    #[error("Privileged helper terminated by signal")]
    HelperKilled,

    #[error("Refusing to persist a snapshot aggregate")]
    SnapshotPersist,

    // ====================
    // Miscellaneous errors
    // ====================
    #[error("SetLogger (log crate) failed: {0}")]
    SetLoggerError(String),

    #[error("No home directory found")]
    NoHomeDir,

    #[error("io error: {0:?}")]
    Io(std::io::ErrorKind),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.kind())
    }
}

impl From<log::SetLoggerError> for Error {
    fn from(err: log::SetLoggerError) -> Self {
        Self::SetLoggerError(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::TomlParseError(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Self::TomlSerializeError(err.to_string())
    }
}
