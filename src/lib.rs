/**************************************************************************/
/*  This file is part of DPMC-EVAL.                                       */
/*                                                                        */
/*  Copyright (C) 2025                                                    */
/*    CEA (Commissariat à l'énergie atomique et aux énergies              */
/*         alternatives)                                                  */
/*                                                                        */
/*  you can redistribute it and/or modify it under the terms of the GNU   */
/*  Lesser General Public License as published by the Free Software       */
/*  Foundation, version 2.1.                                              */
/*                                                                        */
/*  It is distributed in the hope that it will be useful,                 */
/*  but WITHOUT ANY WARRANTY; without even the implied warranty of        */
/*  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the         */
/*  GNU Lesser General Public License for more details.                   */
/*                                                                        */
/*  See the GNU Lesser General Public License version 2.1                 */
/*  for more details (enclosed in the file licenses/LGPLv2.1).            */
/*                                                                        */
/**************************************************************************/

#![warn(missing_docs)]

//! Running DPMC and MaxSAT solvers on benchmarks, and turning their logs into flat
//! `key:value` reports.

pub mod launcher;
pub mod normalizer;
pub mod solver;
pub mod supervisor;
pub mod utils;
pub mod wrapper;

use anyhow::Context;
use launcher::{LaunchOptions, Launcher};
use normalizer::cancel::SigKill;
use normalizer::maxsat::CnfFileScale;
use normalizer::{Normalizer, Report};
use solver::{SolverKind, DPMC_SOLVERS};
use std::path::PathBuf;
use structopt::StructOpt;
use supervisor::ResourceLimits;
use utils::{exit_code, ToolPaths};
use wrapper::Wrapper;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "dpmc",
    about = "Runs the planner, the counter, or the planner piped into the counter"
)]
struct DpmcOpt {
    #[structopt(possible_values = DPMC_SOLVERS, case_insensitive = true, default_value = "dpmc", long)]
    /// What to run
    solver: SolverKind,

    #[structopt(flatten)]
    launch: LaunchOptions,

    /// Where solvers are, by default the bin directory next to this executable
    #[structopt(long, parse(from_os_str))]
    bin_dir: Option<PathBuf>,

    /// Enable debug output
    #[structopt(short, long)]
    debug: bool,
}

#[derive(Debug, StructOpt)]
#[structopt(
    name = "wrapper",
    about = "Announces a run in the log and runs the solver"
)]
struct WrapperOpt {
    #[structopt(possible_values = &SolverKind::variants(), case_insensitive = true, default_value = "dpmc", long)]
    /// What to run
    solver: SolverKind,

    #[structopt(flatten)]
    launch: LaunchOptions,

    /// Run under runsolver, which reports time and memory after a `#` line
    #[structopt(long)]
    runner: bool,

    #[structopt(flatten)]
    limits: ResourceLimits,

    /// Where solvers are, by default the bin directory next to this executable
    #[structopt(long, parse(from_os_str))]
    bin_dir: Option<PathBuf>,

    /// Enable debug output
    #[structopt(short, long)]
    debug: bool,
}

#[derive(Debug, StructOpt)]
#[structopt(
    name = "postprocessor",
    about = "Reads a run log on stdin and writes its key:value report on stdout"
)]
struct PostprocessorOpt {
    /// 1 or more: copy the log to stderr
    #[structopt(long, default_value = "1")]
    verbose: u8,

    /// Directory the input paths of the log are relative to
    #[structopt(long, default_value = ".", parse(from_os_str))]
    root: PathBuf,

    /// Kill the processes announced in the log once the planner has a tree
    #[structopt(long)]
    kill_siblings: bool,

    /// Enable debug output
    #[structopt(short, long)]
    debug: bool,
}

fn setup_tracing(debug: bool) -> anyhow::Result<()> {
    use tracing::Level;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::prelude::*;
    let min_level = if debug { Level::TRACE } else { Level::INFO };
    // stdout is for solver output and reports
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(tracing_subscriber::filter::filter_fn(move |metadata| {
            *metadata.level() <= min_level
        }));
    let subscriber = tracing_subscriber::Registry::default().with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default tracing collector")
}

/// entrypoint of the `dpmc` binary, returns the exit code of the solver
pub fn run_dpmc() -> anyhow::Result<i32> {
    let opt = DpmcOpt::from_args();
    setup_tracing(opt.debug)?;
    let paths = ToolPaths::new(opt.bin_dir)?;
    let launcher = Launcher::new(opt.solver, &opt.launch, &paths)?;
    let stdout = utils::stdout_stdio()?;
    let status = launcher.run(stdout)?;
    Ok(exit_code(status))
}

/// entrypoint of the `wrapper` binary, returns the exit code of the solver or of the
/// runner
pub fn run_wrapper() -> anyhow::Result<i32> {
    let opt = WrapperOpt::from_args();
    setup_tracing(opt.debug)?;
    let paths = ToolPaths::new(opt.bin_dir)?;
    if opt.solver == SolverKind::Dmc {
        let jf = opt.launch.jf.as_ref().map(|jf| jf.as_os_str());
        anyhow::ensure!(jf.map_or(false, |jf| !jf.is_empty()), "must specify --jf");
    }
    let limits = if opt.runner { Some(opt.limits) } else { None };
    let wrapper = Wrapper::new(opt.solver, &opt.launch, limits, &paths);
    let status = wrapper.run()?;
    Ok(exit_code(status))
}

/// entrypoint of the `postprocessor` binary
pub fn run_postprocessor() -> anyhow::Result<()> {
    let opt = PostprocessorOpt::from_args();
    setup_tracing(opt.debug)?;
    let canceller = if opt.kill_siblings {
        Some(SigKill)
    } else {
        None
    };
    let mut normalizer = Normalizer::new(CnfFileScale::new(opt.root), canceller);
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut report = Report::new(stdout.lock());
    let echo = if opt.verbose >= 1 {
        Some(std::io::stderr())
    } else {
        None
    };
    normalizer.run(stdin.lock(), &mut report, echo)
}

#[test]
fn dpmc_command_line() {
    let opt = DpmcOpt::from_iter(&["dpmc", "--cf=a.cnf", "--solver=Planner", "-d"]);
    assert_eq!(opt.solver, SolverKind::Planner);
    assert!(opt.debug);
    assert_eq!(opt.launch.cf, PathBuf::from("a.cnf"));
    assert_eq!(opt.bin_dir, None);
    let opt = DpmcOpt::from_iter(&["dpmc", "--cf=a.cnf"]);
    assert_eq!(opt.solver, SolverKind::Dpmc);
    assert!(DpmcOpt::from_iter_safe(&["dpmc", "--cf=a.cnf", "--solver=maxhs"]).is_err());
    assert!(DpmcOpt::from_iter_safe(&["dpmc", "--cf=a.cnf", "--decomposer=tw"]).is_err());
    assert!(DpmcOpt::from_iter_safe(&["dpmc"]).is_err());
}

#[test]
fn wrapper_command_line() {
    let opt = WrapperOpt::from_iter(&[
        "wrapper",
        "--cf=a.wcnf",
        "--solver=uwr",
        "--runner",
        "--memcap=4",
        "--timecap=1000",
        "--bin-dir=/opt/bin",
    ]);
    assert_eq!(opt.solver, SolverKind::Uwr);
    assert!(opt.runner);
    assert_eq!(
        opt.limits,
        ResourceLimits {
            memcap: 4.,
            timecap: 1000.
        }
    );
    assert_eq!(opt.bin_dir, Some(PathBuf::from("/opt/bin")));
    assert!(WrapperOpt::from_iter_safe(&["wrapper", "--cf=a.cnf", "--solver=cachet"]).is_err());
}

#[test]
fn postprocessor_command_line() {
    let opt = PostprocessorOpt::from_iter(&["postprocessor"]);
    assert_eq!(opt.verbose, 1);
    assert_eq!(opt.root, PathBuf::from("."));
    assert!(!opt.kill_siblings);
    let opt = PostprocessorOpt::from_iter(&["postprocessor", "--verbose=0", "--root=/data", "--kill-siblings"]);
    assert_eq!(opt.verbose, 0);
    assert_eq!(opt.root, PathBuf::from("/data"));
    assert!(opt.kill_siblings);
}
