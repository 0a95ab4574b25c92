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

//! Lifecycle orchestration: Load, Read, Compare, Store, Apply, Refresh.
//!
//! The aggregate sits behind an async mutex; the refresh timer and the
//! power poller run as stoppable background tasks against the same
//! orchestrator the CLI drives.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{error, info, warn};
use smol::lock::Mutex;

use crate::{
    constants,
    host::HostAggregate,
    invoker::{InvokeOptions, Invoker},
    msr::MsrSource,
    package::{Package, PackageState},
    persist::SettingsFile,
    power::{PowerSource, PowerSupply},
    system::{msleep, sleep, ExecutorPtr, StoppableTask, StoppableTaskPtr},
    topology::{PhysicalPackageId, Topology},
    tunable::Diff,
    Error, Result,
};

/// Observed-state refresh cadence (~2 Hz).
const REFRESH_INTERVAL_MS: u64 = 500;

/// AC/battery poll cadence.
const POWER_POLL_SECS: u64 = 2;

pub type OrchestratorPtr = Arc<Orchestrator>;

pub struct Orchestrator {
    host: Mutex<HostAggregate>,
    snapshot: Mutex<Option<HostAggregate>>,
    supply: Mutex<PowerSupply>,
    msr: Arc<dyn MsrSource + Send + Sync>,
    sysfs_root: PathBuf,
    config_path: PathBuf,
    helper_path: String,
    invoker: Invoker,
    power: PowerSource,
}

impl Orchestrator {
    pub fn new(
        topology: &Topology,
        msr: Arc<dyn MsrSource + Send + Sync>,
        config_path: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            host: Mutex::new(HostAggregate::new(topology)),
            snapshot: Mutex::new(None),
            supply: Mutex::new(PowerSupply::Mains),
            msr,
            sysfs_root: PathBuf::from(constants::SYSFS_CPU_ROOT),
            config_path,
            helper_path: constants::HELPER_PATH.to_string(),
            invoker: Invoker,
            power: PowerSource::default(),
        })
    }

    /// Test/fixture constructor with every external surface explicit.
    pub fn with_paths(
        topology: &Topology,
        msr: Arc<dyn MsrSource + Send + Sync>,
        sysfs_root: PathBuf,
        config_path: PathBuf,
        helper_path: String,
        power: PowerSource,
    ) -> Arc<Self> {
        Arc::new(Self {
            host: Mutex::new(HostAggregate::new(topology)),
            snapshot: Mutex::new(None),
            supply: Mutex::new(PowerSupply::Mains),
            msr,
            sysfs_root,
            config_path,
            helper_path,
            invoker: Invoker,
            power,
        })
    }

    /// Startup sequence: Read with shadowing, then Load, then Compare to
    /// settle the package states.
    pub async fn startup(&self) -> Result<()> {
        let supply = self.probe_power().await;
        let mut host = self.host.lock().await;
        host.read(self.msr.as_ref(), &self.sysfs_root, true)?;

        let cfg = SettingsFile::load_or_default(&self.config_path);
        host.load(&cfg);

        if host.common.apply_on_boot_and_resume &&
            !Path::new(constants::BOOT_CONFIG_PATH).exists()
        {
            warn!(
                target: "lifecycle",
                "Apply_On_Boot_And_Resume is set but {} is absent; the boot hook \
                 will not fire",
                constants::BOOT_CONFIG_PATH
            );
        }

        for pkg in host.packages.iter_mut() {
            settle_state(pkg, supply);
        }
        Ok(())
    }

    /// Re-read observed state without touching Settings.
    pub async fn refresh(&self) -> Result<()> {
        let supply = *self.supply.lock().await;
        let mut host = self.host.lock().await;
        host.read(self.msr.as_ref(), &self.sysfs_root, false)?;
        for pkg in host.packages.iter_mut() {
            settle_state(pkg, supply);
        }
        Ok(())
    }

    /// Armed desired-vs-observed differences, per package id; the SMT
    /// entry, if present, is keyed `usize::MAX`.
    pub async fn compare(&self) -> Vec<(PhysicalPackageId, Vec<Diff>)> {
        let supply = self.probe_power().await;
        self.host.lock().await.compare(supply)
    }

    /// Persist Settings, preserving any unknown keys already in the file.
    pub async fn store(&self) -> Result<()> {
        let host = self.host.lock().await;
        let mut cfg = if self.config_path.exists() {
            SettingsFile::load_or_default(&self.config_path)
        } else {
            SettingsFile::new()
        };
        host.save(&mut cfg)?;
        cfg.save(&self.config_path)?;
        info!(target: "lifecycle", "Settings stored to {}", self.config_path.display());
        Ok(())
    }

    /// Apply every armed setting: one helper invocation per package,
    /// then the host-level SMT invocation, then a shadowing re-Read.
    /// The first nonzero helper exit aborts and surfaces verbatim; no
    /// retry, no rollback.
    pub async fn apply(&self) -> Result<()> {
        let supply = self.probe_power().await;
        let mut host = self.host.lock().await;

        for pkg in host.packages.iter_mut() {
            let argv = pkg.apply_args(&self.helper_path, supply);
            if argv.len() == Package::PREAMBLE_LEN {
                continue
            }

            pkg.state = PackageState::Applying;
            let run = self.invoker.run(&argv, InvokeOptions::default()).await?;
            if !run.success() {
                error!(
                    target: "lifecycle",
                    "helper exited {} for package {}", run.status, pkg.id
                );
                pkg.state = PackageState::Degraded;
                return Err(Error::HelperFailed(run.status))
            }

            // Voltage offsets have no read path; a successful apply is
            // the observation.
            pkg.values.voltage.mirror(&pkg.settings.voltage);
        }

        let argv = host.smt_apply_args(&self.helper_path);
        if argv.len() > HostAggregate::SMT_PREAMBLE_LEN {
            let run = self.invoker.run(&argv, InvokeOptions::default()).await?;
            if !run.success() {
                error!(target: "lifecycle", "helper exited {} for smt", run.status);
                return Err(Error::HelperFailed(run.status))
            }
        }

        host.read(self.msr.as_ref(), &self.sysfs_root, true)?;
        for pkg in host.packages.iter_mut() {
            settle_state(pkg, supply);
        }
        Ok(())
    }

    /// Stage current settings for a later rollback.
    pub async fn take_snapshot(&self) {
        let host = self.host.lock().await;
        *self.snapshot.lock().await = Some(host.snapshot());
    }

    /// Rewind settings to the staged snapshot, if any. Observed values
    /// are untouched; a subsequent Apply makes the rollback effective.
    pub async fn rollback(&self) -> Result<()> {
        let snapshot = self.snapshot.lock().await;
        let snap = snapshot.as_ref().ok_or(Error::ParseFailed("no snapshot staged"))?;
        self.host.lock().await.restore(snap);
        info!(target: "lifecycle", "Settings rolled back to snapshot");
        Ok(())
    }

    /// Verify the host still looks like it did at discovery.
    pub async fn rescan(&self) -> Result<()> {
        let fresh = Topology::discover()?;
        self.host.lock().await.rescan(&fresh)
    }

    pub async fn shutdown(&self) -> Result<()> {
        let save = self.host.lock().await.common.save_on_exit;
        if save {
            self.store().await?;
        }
        Ok(())
    }

    /// Run `f` against the aggregate under the lock.
    pub async fn with_host<T>(&self, f: impl FnOnce(&mut HostAggregate) -> T) -> T {
        f(&mut *self.host.lock().await)
    }

    async fn probe_power(&self) -> PowerSupply {
        let supply = self.power.probe().await;
        *self.supply.lock().await = supply;
        supply
    }

    /// Re-emit only the thermal fragments after an AC/battery flip so
    /// the applicable target takes over.
    async fn apply_thermal(&self, supply: PowerSupply) -> Result<()> {
        let host = self.host.lock().await;
        for pkg in &host.packages {
            let mut argv = vec![
                self.helper_path.clone(),
                "-v".to_string(),
                "-p".to_string(),
                pkg.id.to_string(),
            ];
            pkg.settings.thermal.apply_args(&mut argv, supply);
            if argv.len() == Package::PREAMBLE_LEN {
                continue
            }
            let run = self.invoker.run(&argv, InvokeOptions::default()).await?;
            if !run.success() {
                return Err(Error::HelperFailed(run.status))
            }
        }
        Ok(())
    }

    /// Spawn the refresh timer and the power poller.
    pub fn start_background_tasks(
        self: Arc<Self>,
        executor: ExecutorPtr,
    ) -> (StoppableTaskPtr, StoppableTaskPtr) {
        let refresh_task = StoppableTask::new();
        let this = self.clone();
        refresh_task.clone().start(
            async move {
                loop {
                    msleep(REFRESH_INTERVAL_MS).await;
                    if let Err(e) = this.refresh().await {
                        warn!(target: "lifecycle", "refresh failed: {}", e);
                    }
                }
            },
            |_: std::result::Result<(), Error>| async {
                info!(target: "lifecycle", "refresh task stopped");
            },
            Error::ParseFailed("refresh task stopped"),
            executor.clone(),
        );

        let power_task = StoppableTask::new();
        let this = self;
        power_task.clone().start(
            async move {
                let mut last = *this.supply.lock().await;
                loop {
                    sleep(POWER_POLL_SECS).await;
                    let now = this.probe_power().await;
                    if now == last {
                        continue
                    }
                    info!(target: "lifecycle", "power supply changed: {} -> {}", last, now);
                    last = now;

                    let react = this.host.lock().await.common.apply_on_acpi_power_event;
                    if react {
                        if let Err(e) = this.apply_thermal(now).await {
                            error!(target: "lifecycle", "thermal re-apply failed: {}", e);
                        }
                    }
                }
            },
            |_: std::result::Result<(), Error>| async {
                info!(target: "lifecycle", "power task stopped");
            },
            Error::ParseFailed("power task stopped"),
            executor,
        );

        (refresh_task, power_task)
    }
}

/// Post-read state for one package.
fn settle_state(pkg: &mut Package, supply: PowerSupply) {
    pkg.state = if pkg.health.any_degraded() {
        PackageState::Degraded
    } else if pkg.compare(supply).is_empty() {
        PackageState::Synced
    } else {
        PackageState::Dirty
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        msr::{fake::FakeMsrs, layout::*},
        topology::CpuIdent,
    };

    fn fixture(name: &str) -> (Arc<Orchestrator>, PathBuf) {
        let root = std::env::temp_dir().join(name);
        let _ = std::fs::remove_dir_all(&root);
        let base = root.join("cpu0/cpufreq");
        std::fs::create_dir_all(&base).unwrap();
        std::fs::write(base.join("scaling_min_freq"), "800000\n").unwrap();
        std::fs::write(base.join("scaling_max_freq"), "3900000\n").unwrap();
        std::fs::write(base.join("scaling_governor"), "powersave\n").unwrap();
        std::fs::write(base.join("scaling_available_governors"), "performance powersave\n")
            .unwrap();
        std::fs::create_dir_all(root.join("smt")).unwrap();
        std::fs::write(root.join("smt/active"), "1\n").unwrap();

        let mut msrs = FakeMsrs::new();
        msrs.set(0, misc_enable::ADDR, 1 << 16);
        msrs.set(0, temperature_target::ADDR, 100 << 16);
        msrs.set(0, turbo_activation_ratio::ADDR, 34);
        msrs.set(0, platform_info::ADDR, 8u64 << 40);
        msrs.set(0, turbo_ratio_limit::ADDR, 0x2a2a_2a2a_2a2a_2a2a);
        msrs.set(0, turbo_ratio_limit1::ADDR, 0);
        msrs.set(0, turbo_ratio_limit2::ADDR, 0);

        let ident =
            CpuIdent { vendor: "GenuineIntel".to_string(), family_id: 6, model_id: 0x9e };
        let topo =
            Topology::from_assignments(&[(0, 0, 0), (1, 0, 1), (2, 0, 2), (3, 0, 3)], ident)
                .unwrap();

        let orch = Orchestrator::with_paths(
            &topo,
            Arc::new(msrs),
            root.clone(),
            root.join("settings.toml"),
            // Exits 0 whatever the flags; good enough for lifecycle flow.
            "true".to_string(),
            PowerSource::with_command("true"),
        );
        (orch, root)
    }

    #[test]
    fn startup_settles_synced() {
        smol::block_on(async {
            let (orch, root) = fixture("coretune-lifecycle-startup");
            orch.startup().await.unwrap();

            orch.with_host(|host| {
                assert_eq!(host.packages[0].state, PackageState::Synced);
                assert!(host.packages[0].values.speed.eist_enable);
            })
            .await;
            assert!(orch.compare().await.is_empty());

            std::fs::remove_dir_all(&root).unwrap();
        });
    }

    #[test]
    fn startup_survives_missing_smt_node() {
        smol::block_on(async {
            let (orch, root) = fixture("coretune-lifecycle-nosmt");
            std::fs::remove_dir_all(root.join("smt")).unwrap();

            orch.startup().await.unwrap();
            orch.with_host(|host| {
                assert_eq!(host.smt_health, crate::package::ModuleHealth::Failed);
                assert_eq!(host.packages[0].state, PackageState::Synced);
                assert!(host.packages[0].values.speed.eist_enable);

                // Arming SMT while the node is absent stays inert.
                host.common.smt.enable.set(true);
            })
            .await;
            assert!(orch.compare().await.is_empty());
            orch.apply().await.unwrap();

            std::fs::remove_dir_all(&root).unwrap();
        });
    }

    #[test]
    fn arm_apply_store_roundtrip() {
        smol::block_on(async {
            let (orch, root) = fixture("coretune-lifecycle-apply");
            orch.startup().await.unwrap();

            orch.with_host(|host| {
                host.packages[0].settings.voltage.set_plane(0, -50.0);
                host.packages[0].settings.misc.fast_strings_enable_mut().set(true);
            })
            .await;

            let diffs = orch.compare().await;
            assert_eq!(diffs.len(), 1);
            // Voltage mirror starts at 0.0, misc bit reads 0: two diffs.
            assert_eq!(diffs[0].1.len(), 2);

            // The fake helper can't flip MSR bits, but the voltage
            // mirror must move.
            orch.apply().await.unwrap();
            orch.with_host(|host| {
                assert!(host.packages[0].values.voltage.plane_mv[0] < -48.0);
            })
            .await;

            orch.store().await.unwrap();
            let cfg = SettingsFile::load(&root.join("settings.toml")).unwrap();
            let proc0 = cfg.group("Processor0").unwrap();
            assert_eq!(
                crate::persist::get_bool(proc0, "Fast_Strings_Enable_Enabled"),
                Some(true)
            );

            std::fs::remove_dir_all(&root).unwrap();
        });
    }

    #[test]
    fn failed_helper_surfaces_status() {
        smol::block_on(async {
            let (orch, root) = fixture("coretune-lifecycle-fail");
            orch.startup().await.unwrap();

            orch.with_host(|host| {
                host.packages[0].settings.speed.eist_enable.set(false);
            })
            .await;

            // Swap in a failing helper by rebuilding with the same state.
            let failing = Orchestrator::with_paths(
                &Topology::from_assignments(
                    &[(0, 0, 0), (1, 0, 1), (2, 0, 2), (3, 0, 3)],
                    CpuIdent {
                        vendor: "GenuineIntel".to_string(),
                        family_id: 6,
                        model_id: 0x9e,
                    },
                )
                .unwrap(),
                Arc::new(FakeMsrs::new()),
                root.clone(),
                root.join("settings.toml"),
                "false".to_string(),
                PowerSource::with_command("true"),
            );
            failing
                .with_host(|host| {
                    host.packages[0].settings.misc.fast_strings_enable_mut().set(true);
                })
                .await;

            match failing.apply().await {
                Err(Error::HelperFailed(1)) => {}
                other => panic!("expected HelperFailed(1), got {:?}", other),
            }
            failing
                .with_host(|host| {
                    assert_eq!(host.packages[0].state, PackageState::Degraded);
                })
                .await;

            std::fs::remove_dir_all(&root).unwrap();
        });
    }

    #[test]
    fn snapshot_rollback() {
        smol::block_on(async {
            let (orch, root) = fixture("coretune-lifecycle-rollback");
            orch.startup().await.unwrap();
            orch.take_snapshot().await;

            orch.with_host(|host| {
                host.packages[0].settings.speed.tbt_disable.set(true);
            })
            .await;
            assert!(!orch.compare().await.is_empty());

            orch.rollback().await.unwrap();
            assert!(orch.compare().await.is_empty());

            std::fs::remove_dir_all(&root).unwrap();
        });
    }

    #[test]
    fn background_tasks_run_and_stop() {
        let (orch, root) = fixture("coretune-lifecycle-tasks");
        let executor = Arc::new(smol::Executor::new());
        let (signal, shutdown) = smol::channel::unbounded::<()>();

        let ex = executor.clone();
        let orch2 = orch.clone();
        easy_parallel::Parallel::new()
            .each(0..2, |_| smol::future::block_on(ex.run(shutdown.recv())))
            .finish(|| {
                smol::future::block_on(async move {
                    orch2.startup().await.unwrap();
                    let (refresh, power) = orch2.clone().start_background_tasks(executor.clone());

                    // Give the refresh loop at least one tick.
                    msleep(REFRESH_INTERVAL_MS * 2 + 100).await;
                    orch2
                        .with_host(|host| {
                            assert_eq!(host.packages[0].state, PackageState::Synced);
                        })
                        .await;

                    refresh.stop().await;
                    power.stop().await;
                    drop(signal);
                })
            });

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn rollback_without_snapshot_is_an_error() {
        smol::block_on(async {
            let (orch, root) = fixture("coretune-lifecycle-nosnap");
            assert!(orch.rollback().await.is_err());
            std::fs::remove_dir_all(&root).unwrap();
        });
    }
}
