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

use std::sync::Arc;

use easy_parallel::Parallel;
use log::{error, info, LevelFilter};
use simplelog::{ColorChoice, TermLogger, TerminalMode};
use structopt::StructOpt;

use coretune::{
    constants,
    features::{misc, voltage::PLANE_NAMES},
    lifecycle::{Orchestrator, OrchestratorPtr},
    msr::MsrDev,
    package::Package,
    system::sleep,
    topology::Topology,
    util::get_config_path,
    Result,
};

#[derive(Debug, StructOpt)]
#[structopt(name = "coretunectl", about = "Processor tuning frontend")]
struct Args {
    #[structopt(short, parse(from_occurrences))]
    /// Increase verbosity (-vvv supported)
    verbose: u8,

    #[structopt(short, long)]
    /// Settings file to use
    config: Option<String>,

    #[structopt(subcommand)]
    command: Subcmd,
}

#[derive(Debug, StructOpt)]
enum Subcmd {
    /// Show the observed state of every package
    Show,

    /// List armed settings that differ from the observed state
    Diff,

    /// Hand armed settings to the privileged helper
    Apply,

    /// Write current settings to the settings file
    Save,

    /// Stay resident: refresh state and react to power events
    Watch,
}

fn show_package(pkg: &Package) {
    println!("Package {} ({} cores, cpu{}) [{:?}]", pkg.id, pkg.core_count, pkg.first_cpu, pkg.state);

    let t = &pkg.values.thermal;
    println!(
        "  thermal: target {} C, offset {}, effective {} C, TM select {}, TM2 {}",
        t.target_temperature,
        t.target_temperature_offset,
        t.effective_target(),
        t.tm_select,
        t.tm2_enable,
    );

    let s = &pkg.values.speed;
    println!(
        "  speed:   EIST {} (lock {}), turbo {}, activation ratio {} (lock {}), min ratio {}",
        s.eist_enable,
        s.eist_lock,
        !s.tbt_disable,
        s.tbt_activation_ratio,
        s.tbt_activation_ratio_lock,
        s.min_ratio,
    );
    let ratios: Vec<String> = (0..pkg.core_count.min(s.tbt_ratio_limits.len()))
        .map(|i| {
            if s.ratio_slot_valid(i) {
                s.tbt_ratio_limits[i].to_string()
            } else {
                "?".to_string()
            }
        })
        .collect();
    println!("  ratios:  {}", ratios.join(" "));

    for (i, name) in PLANE_NAMES.iter().enumerate() {
        let mv = pkg.settings.voltage.display_mv(i);
        if mv != 0.0 {
            println!("  voltage: plane {} ({}): {:.4} mV", i, name, mv);
        }
    }

    let c = &pkg.values.cpufreq;
    println!("  cpufreq: {}-{} kHz, governor {}", c.min_khz, c.max_khz, c.governor);

    for (key, on) in misc::bit_keys().iter().zip(pkg.values.misc.bits.iter()) {
        if *on {
            println!("  misc:    {}", key);
        }
    }
}

async fn realmain(
    args: Args,
    orch: OrchestratorPtr,
    executor: Arc<smol::Executor<'static>>,
) -> Result<()> {
    orch.startup().await?;

    match args.command {
        Subcmd::Show => {
            orch.with_host(|host| {
                for pkg in &host.packages {
                    show_package(pkg);
                }
                println!("SMT: {}", if host.smt_values.active { "active" } else { "inactive" });
            })
            .await;
        }

        Subcmd::Diff => {
            let diffs = orch.compare().await;
            if diffs.is_empty() {
                println!("All armed settings match the observed state.");
                return Ok(())
            }
            for (id, entries) in diffs {
                if id == usize::MAX {
                    println!("Host:");
                } else {
                    println!("Processor {}:", id);
                }
                for diff in entries {
                    println!("  {}", diff);
                }
            }
        }

        Subcmd::Apply => {
            orch.take_snapshot().await;
            match orch.apply().await {
                Ok(()) => info!("Apply finished"),
                Err(e) => {
                    error!("Apply failed: {}", e);
                    return Err(e)
                }
            }
            orch.shutdown().await?;
        }

        Subcmd::Save => {
            orch.store().await?;
        }

        Subcmd::Watch => {
            let (refresh, power) = orch.clone().start_background_tasks(executor);
            info!("Watching; refresh and power tasks running");
            // Runs until killed. The tasks own the useful work.
            loop {
                sleep(60).await;
                if let Err(e) = orch.rescan().await {
                    error!("{}", e);
                    refresh.stop().await;
                    power.stop().await;
                    orch.shutdown().await?;
                    return Err(e)
                }
            }
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let args = Args::from_args();

    let level = match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    TermLogger::init(level, simplelog::Config::default(), TerminalMode::Mixed, ColorChoice::Auto)?;

    let topology = Topology::discover()?;
    let config_path = get_config_path(args.config.clone(), constants::CONFIG_FILE)?;
    let orch = Orchestrator::new(&topology, Arc::new(MsrDev::new()), config_path);

    let executor = Arc::new(smol::Executor::new());
    let (signal, shutdown) = smol::channel::unbounded::<()>();

    let ex = executor.clone();
    let (_, result) = Parallel::new()
        // Run two executor threads.
        .each(0..2, |_| smol::future::block_on(ex.run(shutdown.recv())))
        // Run the main future on the current thread.
        .finish(|| {
            smol::future::block_on(async move {
                realmain(args, orch, executor).await?;
                drop(signal);
                Ok(())
            })
        });

    result
}
