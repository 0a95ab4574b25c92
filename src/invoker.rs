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

//! Privileged helper invocation. The helper argv is built entirely by
//! appending whole tokens to a vector; nothing here concatenates
//! strings or consults a shell, so values can never be reinterpreted
//! as separate arguments.

use log::{debug, info};

use crate::{Error, Result};

/// Knobs for one helper run.
#[derive(Debug, Clone, Copy)]
pub struct InvokeOptions {
    /// Capture and log helper output.
    pub capture_output: bool,
    /// The helper supports a user-facing abort button; this frontend
    /// never offers one.
    pub allow_abort: bool,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self { capture_output: true, allow_abort: false }
    }
}

/// Result of one helper run.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl Invocation {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs the helper. The whole argv is logged before launch so a failed
/// apply can be replayed by hand.
#[derive(Debug, Clone, Default)]
pub struct Invoker;

impl Invoker {
    /// Spawn `argv[0]` with the remaining tokens as its arguments and
    /// wait for it. A nonzero exit is reported in the returned
    /// [`Invocation`], not as an `Err`; only spawn failures and
    /// signal-terminated helpers error out.
    pub async fn run(&self, argv: &[String], opts: InvokeOptions) -> Result<Invocation> {
        let (program, args) = match argv.split_first() {
            Some(split) => split,
            None => return Err(Error::ParseFailed("empty helper argv")),
        };

        info!(target: "invoker", "exec: {}", argv.join(" "));

        let output = smol::process::Command::new(program).args(args).output().await?;

        let (stdout, stderr) = if opts.capture_output {
            (
                String::from_utf8_lossy(&output.stdout).into_owned(),
                String::from_utf8_lossy(&output.stderr).into_owned(),
            )
        } else {
            (String::new(), String::new())
        };
        for line in stdout.lines() {
            debug!(target: "invoker", "helper: {}", line);
        }
        for line in stderr.lines() {
            debug!(target: "invoker", "helper! {}", line);
        }

        match output.status.code() {
            Some(status) => Ok(Invocation { status, stdout, stderr }),
            // Killed by signal.
            None => Err(Error::HelperKilled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_status_and_output() {
        smol::block_on(async {
            let inv = Invoker;

            let opts = InvokeOptions::default();

            let argv = vec!["echo".to_string(), "-v".to_string(), "ok".to_string()];
            let out = inv.run(&argv, opts).await.unwrap();
            assert!(out.success());
            assert_eq!(out.stdout.trim(), "-v ok");

            let quiet = InvokeOptions { capture_output: false, ..opts };
            let out = inv.run(&argv, quiet).await.unwrap();
            assert!(out.success());
            assert!(out.stdout.is_empty());

            let out = inv.run(&["false".to_string()], opts).await.unwrap();
            assert!(!out.success());
            assert_eq!(out.status, 1);

            assert!(inv.run(&[], opts).await.is_err());
            assert!(inv.run(&["/nonexistent/helper".to_string()], opts).await.is_err());
        });
    }

    #[test]
    fn arguments_stay_whole_tokens() {
        smol::block_on(async {
            // A token with spaces reaches the program as one argument.
            let argv =
                vec!["printf".to_string(), "%s\n".to_string(), "a b; c".to_string()];
            let out = Invoker.run(&argv, InvokeOptions::default()).await.unwrap();
            assert_eq!(out.stdout.trim(), "a b; c");
        });
    }
}
