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

//! Announce a run in the log, then run the solver, optionally under runsolver.

use crate::launcher::LaunchOptions;
use crate::solver::SolverKind;
use crate::supervisor::ResourceLimits;
use crate::utils::{child_command, run_to_completion, stdout_stdio, ToolPaths};
use anyhow::Context;
use itertools::Itertools;
use std::ffi::OsString;
use std::io::Write;
use std::path::Path;
use std::process::ExitStatus;
use tracing::trace;

/// Writes the lines identifying the run: the input file, the solver, and a blank line.
pub fn write_preamble<W: Write>(mut out: W, cf: &Path, solver: SolverKind) -> anyhow::Result<()> {
    writeln!(out, "c cf {}", cf.display()).context("writing preamble")?;
    writeln!(out, "c solver {}", solver.name()).context("writing preamble")?;
    writeln!(out).context("writing preamble")?;
    out.flush().context("flushing preamble")
}

/// One run of any solver kind.
pub struct Wrapper<'a> {
    solver: SolverKind,
    launch: &'a LaunchOptions,
    limits: Option<ResourceLimits>,
    paths: &'a ToolPaths,
}

impl<'a> Wrapper<'a> {
    /// With `limits`, the solver runs under runsolver.
    pub fn new(
        solver: SolverKind,
        launch: &'a LaunchOptions,
        limits: Option<ResourceLimits>,
        paths: &'a ToolPaths,
    ) -> Self {
        Wrapper {
            solver,
            launch,
            limits,
            paths,
        }
    }

    fn solver_command(&self) -> Vec<OsString> {
        let cf = OsString::from(&self.launch.cf);
        let verbosity = self.launch.counter.vs;
        match self.solver {
            SolverKind::Gauss => vec![
                self.paths.bin("gaussmaxhs").into(),
                format!("-verb={}", verbosity).into(),
                cf,
            ],
            SolverKind::Maxhs => vec![
                self.paths.bin("maxhs").into(),
                "-no-printOptions".into(),
                "-printSoln".into(),
                format!("-verb={}", verbosity).into(),
                cf,
            ],
            SolverKind::Uwr => vec![
                self.paths.bin("uwrmaxsat").into(),
                "-bm".into(),
                format!("-v{}", verbosity).into(),
                cf,
            ],
            dpmc => {
                let mut cmd = vec![self.paths.sibling("dpmc").into_os_string()];
                cmd.extend(self.launch.launcher_args(dpmc));
                let mut bin_dir = OsString::from("--bin-dir=");
                bin_dir.push(self.paths.bin_dir());
                cmd.push(bin_dir);
                cmd
            }
        }
    }

    /// The full command line, runner included.
    pub fn command(&self) -> Vec<OsString> {
        let mut cmd = match &self.limits {
            Some(limits) => limits.runner_command(self.paths),
            None => Vec::new(),
        };
        cmd.extend(self.solver_command());
        cmd
    }

    /// Writes the preamble to stdout and runs the solver. Its stderr is merged into stdout,
    /// except for the planner alone whose stderr is only progress.
    pub fn run(&self) -> anyhow::Result<ExitStatus> {
        write_preamble(std::io::stdout().lock(), &self.launch.cf, self.solver)?;
        let argv = self.command();
        trace!(
            cmd = %argv.iter().map(|arg| arg.to_string_lossy()).format(" "),
            "wrapping {}",
            self.solver.name()
        );
        let mut cmd = child_command(&argv)?;
        if self.solver != SolverKind::Planner {
            cmd.stderr(stdout_stdio()?);
        }
        run_to_completion(cmd, self.solver.name())
    }
}

#[cfg(test)]
fn launch(args: &[&str]) -> LaunchOptions {
    use structopt::StructOpt;
    let mut argv = vec!["wrapper"];
    argv.extend_from_slice(args);
    LaunchOptions::from_iter(argv)
}

#[cfg(test)]
fn strings(argv: &[OsString]) -> Vec<&str> {
    argv.iter().map(|a| a.to_str().unwrap()).collect()
}

#[test]
fn preamble() {
    let mut out = Vec::new();
    write_preamble(&mut out, Path::new("bench/a.cnf"), SolverKind::Dmc).unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "c cf bench/a.cnf\nc solver dmc\n\n"
    );
}

#[test]
fn optimizer_commands() {
    let paths = ToolPaths::with_dirs("/opt/bin", "/opt");
    let opts = launch(&["--cf=a.wcnf", "--vs=2"]);
    let cmd = |solver| Wrapper::new(solver, &opts, None, &paths).command();
    assert_eq!(
        strings(&cmd(SolverKind::Gauss)),
        ["/opt/bin/gaussmaxhs", "-verb=2", "a.wcnf"]
    );
    assert_eq!(
        strings(&cmd(SolverKind::Maxhs)),
        [
            "/opt/bin/maxhs",
            "-no-printOptions",
            "-printSoln",
            "-verb=2",
            "a.wcnf"
        ]
    );
    assert_eq!(
        strings(&cmd(SolverKind::Uwr)),
        ["/opt/bin/uwrmaxsat", "-bm", "-v2", "a.wcnf"]
    );
}

#[test]
fn dpmc_goes_through_launcher() {
    let paths = ToolPaths::with_dirs("/opt/bin", "/opt");
    let opts = launch(&["--cf=a.cnf", "--decomposer=htd", "--jf=a.jt"]);
    let cmd = Wrapper::new(SolverKind::Dmc, &opts, None, &paths).command();
    let cmd = strings(&cmd);
    assert_eq!(cmd[..5], ["/opt/dpmc", "--cf=a.cnf", "--solver=dmc", "--decomposer=htd", "--jf=a.jt"]);
    assert_eq!(cmd.last(), Some(&"--bin-dir=/opt/bin"));
}

#[test]
fn under_runner() {
    let paths = ToolPaths::with_dirs("/opt/bin", "/opt");
    let opts = launch(&["--cf=a.wcnf"]);
    let limits = ResourceLimits {
        memcap: 2.5,
        timecap: 60.,
    };
    let cmd = Wrapper::new(SolverKind::Uwr, &opts, Some(limits), &paths).command();
    assert_eq!(
        strings(&cmd),
        [
            "/opt/bin/runsolver",
            "-w",
            "/dev/null",
            "-v",
            "/dev/stdout",
            "-R",
            "2500",
            "-W",
            "60",
            "/opt/bin/uwrmaxsat",
            "-bm",
            "-v1",
            "a.wcnf"
        ]
    );
}
