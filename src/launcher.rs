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

//! Run the planner, the counter, or the planner piped into the counter.

use crate::solver::{DdPackage, Decomposer, SolverKind};
use crate::utils::{child_command, long_arg, run_to_completion, Real, ToolPaths};
use anyhow::Context;
use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use structopt::StructOpt;
use tracing::trace;

/// `0` or `1`
fn parse_switch(txt: &str) -> anyhow::Result<bool> {
    match txt {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => anyhow::bail!("expected 0 or 1, got {:?}", txt),
    }
}

/// Knobs forwarded to the counter.
#[derive(Debug, Clone, PartialEq, StructOpt)]
pub struct CounterOptions {
    /// dmc.sif instead of dmc
    #[structopt(long, default_value = "0", parse(try_from_str = parse_switch))]
    pub sif: bool,

    /// for solver, in GB
    #[structopt(long, default_value = "0")]
    pub softmemcap: f64,

    /// thread count
    #[structopt(long, default_value = "1")]
    pub tc: u32,

    /// weighted counting
    #[structopt(long, default_value = "0", parse(try_from_str = parse_switch))]
    pub wc: bool,

    /// projected counting
    #[structopt(long, default_value = "0", parse(try_from_str = parse_switch))]
    pub pc: bool,

    /// existential-randomized stochastic SAT
    #[structopt(long, default_value = "0", parse(try_from_str = parse_switch))]
    pub er: bool,

    /// log10 of bound
    #[structopt(long, default_value = "-inf", allow_hyphen_values = true)]
    pub lb: f64,

    /// threshold model
    #[structopt(long, default_value = "")]
    pub tm: String,

    /// existential pruning
    #[structopt(long, default_value = "0", parse(try_from_str = parse_switch))]
    pub ep: bool,

    /// maximizer format
    #[structopt(long, default_value = "0")]
    pub mf: u8,

    /// maximizer verification
    #[structopt(long, default_value = "0", parse(try_from_str = parse_switch))]
    pub mv: bool,

    /// substitution-based maximization
    #[structopt(long, default_value = "0", parse(try_from_str = parse_switch))]
    pub sm: bool,

    /// planner wait duration, in seconds
    #[structopt(long, default_value = "0")]
    pub pw: f64,

    /// diagram package
    #[structopt(possible_values = &DdPackage::variants(), case_insensitive = true, default_value = "c", long)]
    pub dp: DdPackage,

    /// thread slice count
    #[structopt(long, default_value = "1")]
    pub ts: u32,

    /// slice var order
    #[structopt(long, default_value = "7", allow_hyphen_values = true)]
    pub sv: i32,

    /// verbose join-tree processing
    #[structopt(long, default_value = "0")]
    pub vj: u8,

    /// verbose profiling
    #[structopt(long, default_value = "0")]
    pub vp: u8,

    /// verbose solving
    #[structopt(long, default_value = "1")]
    pub vs: u8,
}

impl CounterOptions {
    /// Options of the `dmc` executable, as `--key=value`.
    pub fn dmc_knobs(&self) -> Vec<String> {
        let flag = |b: bool| b as u8;
        let mut knobs = vec![
            format!("--wc={}", flag(self.wc)),
            format!("--pc={}", flag(self.pc)),
            format!("--er={}", flag(self.er)),
            format!("--lb={}", Real(self.lb)),
            format!("--tm={}", self.tm),
            format!("--ep={}", flag(self.ep)),
            format!("--mf={}", self.mf),
            format!("--mv={}", flag(self.mv)),
            format!("--sm={}", flag(self.sm)),
            format!("--pw={}", Real(self.pw)),
            format!("--dp={}", self.dp.name()),
            format!("--tc={}", self.tc),
            format!("--ts={}", self.ts),
            format!("--sv={}", self.sv),
            format!("--mm={}", (self.softmemcap * 1e3) as i64),
            format!("--vj={}", self.vj),
            format!("--vp={}", self.vp),
            format!("--vs={}", self.vs),
        ];
        if self.dp == DdPackage::C {
            knobs.push("--lc=1".to_owned());
        }
        knobs
    }

    /// The same options, as accepted by our own command line.
    pub fn launcher_flags(&self) -> Vec<String> {
        let mut flags = vec![
            format!("--softmemcap={}", Real(self.softmemcap)),
            format!("--tc={}", self.tc),
            format!("--lb={}", Real(self.lb)),
            format!("--mf={}", self.mf),
            format!("--pw={}", Real(self.pw)),
            format!("--dp={}", self.dp.name()),
            format!("--ts={}", self.ts),
            format!("--sv={}", self.sv),
            format!("--vj={}", self.vj),
            format!("--vp={}", self.vp),
            format!("--vs={}", self.vs),
        ];
        if !self.tm.is_empty() {
            flags.push(format!("--tm={}", self.tm));
        }
        let flag = |b: bool| b as u8;
        flags.extend(
            [
                ("sif", self.sif),
                ("wc", self.wc),
                ("pc", self.pc),
                ("er", self.er),
                ("ep", self.ep),
                ("mv", self.mv),
                ("sm", self.sm),
            ]
            .iter()
            .map(|(name, set)| format!("--{}={}", name, flag(*set))),
        );
        flags
    }
}

/// What to run the launcher on.
#[derive(Debug, Clone, PartialEq, StructOpt)]
pub struct LaunchOptions {
    /// CNF file
    #[structopt(long, parse(from_os_str))]
    pub cf: PathBuf,

    /// planning technique
    #[structopt(possible_values = &Decomposer::variants(), case_insensitive = true, default_value = "flow", long)]
    pub decomposer: Decomposer,

    /// JT file, required to run the counter alone
    #[structopt(long, parse(from_os_str))]
    pub jf: Option<PathBuf>,

    #[structopt(flatten)]
    #[allow(missing_docs)]
    pub counter: CounterOptions,
}

impl LaunchOptions {
    /// Our own command line for these options.
    pub fn launcher_args(&self, solver: SolverKind) -> Vec<OsString> {
        let mut args = vec![
            long_arg("cf", &self.cf),
            long_arg("solver", solver.name()),
            long_arg("decomposer", self.decomposer.name()),
        ];
        if let Some(jf) = &self.jf {
            args.push(long_arg("jf", jf));
        }
        args.extend(self.counter.launcher_flags().into_iter().map(OsString::from));
        args
    }
}

/// Runs one of the DPMC solver kinds.
pub struct Launcher<'a> {
    solver: SolverKind,
    options: &'a LaunchOptions,
    paths: &'a ToolPaths,
}

fn open_input(path: &Path, what: &str) -> anyhow::Result<File> {
    File::open(path).with_context(|| format!("opening {} {}", what, path.display()))
}

impl<'a> Launcher<'a> {
    /// Checks that `solver` is planner, dmc or dpmc, and that running the counter alone
    /// comes with a join tree file.
    pub fn new(
        solver: SolverKind,
        options: &'a LaunchOptions,
        paths: &'a ToolPaths,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            solver.runs_dpmc(),
            "{} is not run by the DPMC launcher",
            solver.name()
        );
        let has_jf = match &options.jf {
            Some(jf) => !jf.as_os_str().is_empty(),
            None => false,
        };
        anyhow::ensure!(solver != SolverKind::Dmc || has_jf, "must specify --jf");
        Ok(Launcher {
            solver,
            options,
            paths,
        })
    }

    /// `lg.sif <decomposer>`, the decomposer command line being a single argument
    pub fn planner_command(&self) -> Vec<OsString> {
        vec![
            self.paths.bin("lg.sif").into(),
            self.options.decomposer.command().into(),
        ]
    }

    /// `dmc --cf=...` and the counter knobs. In a container, the host filesystem is
    /// mounted at `/host` and the CNF file is addressed there.
    pub fn counter_command(&self) -> anyhow::Result<Vec<OsString>> {
        let mut cmd: Vec<OsString> = if self.options.counter.sif {
            let cf = std::fs::canonicalize(&self.options.cf).with_context(|| {
                format!("canonicalizing {}", self.options.cf.display())
            })?;
            let mut host_cf = OsString::from("/host");
            host_cf.push(cf.as_os_str());
            vec![
                "singularity".into(),
                "run".into(),
                "--bind=/:/host".into(),
                self.paths.bin("dmc.sif").into(),
                long_arg("cf", host_cf),
            ]
        } else {
            vec![self.paths.bin("dmc").into(), long_arg("cf", &self.options.cf)]
        };
        cmd.extend(self.options.counter.dmc_knobs().into_iter().map(OsString::from));
        Ok(cmd)
    }

    /// Runs the solver, writing its result to `stdout`, and returns the exit status of
    /// the process whose output is the result.
    pub fn run(&self, stdout: Stdio) -> anyhow::Result<ExitStatus> {
        match self.solver {
            SolverKind::Planner => {
                let input = open_input(&self.options.cf, "CNF file")?;
                let mut planner = child_command(&self.planner_command())?;
                planner.stdin(input).stdout(stdout);
                run_to_completion(planner, "planner")
            }
            SolverKind::Dmc => {
                let jf = self.options.jf.as_ref().context("must specify --jf")?;
                let input = open_input(jf, "join tree file")?;
                let mut counter = child_command(&self.counter_command()?)?;
                counter.stdin(input).stdout(stdout);
                run_to_completion(counter, "counter")
            }
            SolverKind::Dpmc => {
                let counter_argv = self.counter_command()?;
                let input = open_input(&self.options.cf, "CNF file")?;
                let mut planner = child_command(&self.planner_command())?;
                // the planner's stderr would end up in the middle of the counter's output
                planner
                    .stdin(input)
                    .stdout(Stdio::piped())
                    .stderr(Stdio::null());
                trace!(cmd=?planner, "starting planner");
                let mut planner = planner.spawn().context("running planner")?;
                let pipe = planner.stdout.take().context("planner stdout is not piped")?;
                let mut counter = child_command(&counter_argv)?;
                counter.stdin(pipe).stdout(stdout);
                let status = run_to_completion(counter, "counter");
                // the planner may still be improving its tree; it gets our death signal
                drop(planner);
                status
            }
            other => anyhow::bail!("{} is not run by the DPMC launcher", other.name()),
        }
    }
}

#[cfg(test)]
fn options(args: &[&str]) -> LaunchOptions {
    let mut argv = vec!["dpmc"];
    argv.extend_from_slice(args);
    LaunchOptions::from_iter(argv)
}

#[cfg(test)]
fn strings(argv: &[OsString]) -> Vec<&str> {
    argv.iter().map(|a| a.to_str().unwrap()).collect()
}

#[test]
fn default_counter_command() {
    let opts = options(&["--cf=bench.cnf"]);
    let paths = ToolPaths::with_dirs("/opt/bin", "/opt");
    let launcher = Launcher::new(SolverKind::Dpmc, &opts, &paths).unwrap();
    assert_eq!(
        strings(&launcher.counter_command().unwrap()),
        [
            "/opt/bin/dmc",
            "--cf=bench.cnf",
            "--wc=0",
            "--pc=0",
            "--er=0",
            "--lb=-inf",
            "--tm=",
            "--ep=0",
            "--mf=0",
            "--mv=0",
            "--sm=0",
            "--pw=0.0",
            "--dp=c",
            "--tc=1",
            "--ts=1",
            "--sv=7",
            "--mm=0",
            "--vj=0",
            "--vp=0",
            "--vs=1",
            "--lc=1",
        ]
    );
    assert_eq!(
        strings(&launcher.planner_command()),
        [
            "/opt/bin/lg.sif",
            "/solvers/flow-cutter-pace17/flow_cutter_pace17 -p 100"
        ]
    );
}

#[test]
fn tuned_counter_command() {
    let opts = options(&[
        "--cf=bench.cnf",
        "--wc=1",
        "--pc=1",
        "--dp=s",
        "--softmemcap=1.5",
        "--lb=-3.5",
        "--tc",
        "4",
        "--decomposer=htd",
    ]);
    let paths = ToolPaths::with_dirs("/opt/bin", "/opt");
    let launcher = Launcher::new(SolverKind::Dpmc, &opts, &paths).unwrap();
    let cmd = launcher.counter_command().unwrap();
    let cmd = strings(&cmd);
    assert!(cmd.contains(&"--wc=1"));
    assert!(cmd.contains(&"--pc=1"));
    assert!(cmd.contains(&"--lb=-3.5"));
    assert!(cmd.contains(&"--mm=1500"));
    assert!(cmd.contains(&"--tc=4"));
    assert!(cmd.contains(&"--dp=s"));
    assert!(!cmd.contains(&"--lc=1"));
    assert!(strings(&launcher.planner_command())[1].starts_with("/solvers/htd-master"));
}

#[test]
fn container_counter_command() {
    let dir = tempfile::tempdir().unwrap();
    let cf = dir.path().join("bench.cnf");
    std::fs::write(&cf, "p cnf 1 1\n1 0\n").unwrap();
    let opts = options(&["--sif=1", "--cf", cf.to_str().unwrap()]);
    let paths = ToolPaths::with_dirs("/opt/bin", "/opt");
    let launcher = Launcher::new(SolverKind::Dpmc, &opts, &paths).unwrap();
    let cmd = launcher.counter_command().unwrap();
    let canonical = std::fs::canonicalize(&cf).unwrap();
    let expected_cf = format!("--cf=/host{}", canonical.display());
    assert_eq!(
        strings(&cmd[..5]),
        [
            "singularity",
            "run",
            "--bind=/:/host",
            "/opt/bin/dmc.sif",
            expected_cf.as_str()
        ]
    );
}

#[test]
fn counter_alone_needs_join_tree() {
    let opts = options(&["--cf=bench.cnf"]);
    let paths = ToolPaths::with_dirs("/opt/bin", "/opt");
    assert!(Launcher::new(SolverKind::Dmc, &opts, &paths).is_err());
    assert!(Launcher::new(SolverKind::Maxhs, &opts, &paths).is_err());
    let opts = options(&["--cf=bench.cnf", "--jf="]);
    assert!(Launcher::new(SolverKind::Dmc, &opts, &paths).is_err());
    let opts = options(&["--cf=bench.cnf", "--jf=bench.jt"]);
    assert!(Launcher::new(SolverKind::Dmc, &opts, &paths).is_ok());
}

#[test]
fn launcher_args_parse_back() {
    let opts = options(&[
        "--cf=bench.cnf",
        "--jf=bench.jt",
        "--ep=1",
        "--lb=-2",
        "--tm=model.txt",
        "--sv=-1",
        "--dp=s",
    ]);
    let args = opts.launcher_args(SolverKind::Dmc);
    let mut argv = vec![OsString::from("dpmc")];
    // --solver is not ours to parse
    argv.extend(args.into_iter().filter(|a| !a.to_str().unwrap().starts_with("--solver")));
    let parsed = LaunchOptions::from_iter(argv);
    assert_eq!(parsed, opts);
}

#[test]
fn switches_take_values() {
    let opts = options(&["--cf=bench.cnf", "--wc=1", "--pc=0", "--sif=0"]);
    assert!(opts.counter.wc);
    assert!(!opts.counter.pc);
    assert!(!opts.counter.sif);
    assert!(!opts.counter.er);
    let flags = opts.counter.launcher_flags();
    assert!(flags.contains(&"--wc=1".to_string()));
    assert!(flags.contains(&"--pc=0".to_string()));
    let argv = |extra: &'static str| vec!["dpmc", "--cf=bench.cnf", extra];
    assert!(LaunchOptions::from_iter_safe(argv("--wc=2")).is_err());
    assert!(LaunchOptions::from_iter_safe(argv("--wc=true")).is_err());
    assert!(LaunchOptions::from_iter_safe(argv("--wc")).is_err());
}

#[cfg(test)]
fn fake_tool(dir: &Path, name: &str, script: &str) {
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    let mut file = File::create(&path).unwrap();
    file.write_all(script.as_bytes()).unwrap();
    file.sync_all().unwrap();
    drop(file);
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

#[test]
fn chained_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    fake_tool(
        dir.path(),
        "lg.sif",
        "#!/bin/sh\necho \"c planner noise\" >&2\necho \"c from planner\"\ncat\n",
    );
    fake_tool(dir.path(), "dmc", "#!/bin/sh\necho \"c counter $1\"\ncat\nexit 3\n");
    let cf = dir.path().join("bench.cnf");
    std::fs::write(&cf, "p cnf 1 1\n1 0\n").unwrap();
    let opts = options(&["--cf", cf.to_str().unwrap()]);
    let paths = ToolPaths::with_dirs(dir.path(), dir.path());
    let launcher = Launcher::new(SolverKind::Dpmc, &opts, &paths).unwrap();
    let out = tempfile::NamedTempFile::new().unwrap();
    let status = launcher
        .run(Stdio::from(out.reopen().unwrap()))
        .unwrap();
    assert_eq!(status.code(), Some(3));
    let result = std::fs::read_to_string(out.path()).unwrap();
    assert_eq!(
        result,
        format!(
            "c counter --cf={}\nc from planner\np cnf 1 1\n1 0\n",
            cf.display()
        )
    );
}

#[test]
fn counter_alone_reads_join_tree() {
    let dir = tempfile::tempdir().unwrap();
    fake_tool(dir.path(), "dmc", "#!/bin/sh\ncat\n");
    let jf = dir.path().join("bench.jt");
    std::fs::write(&jf, "c p jt 1 1 2\n").unwrap();
    let opts = options(&["--cf=unused.cnf", "--jf", jf.to_str().unwrap()]);
    let paths = ToolPaths::with_dirs(dir.path(), dir.path());
    let launcher = Launcher::new(SolverKind::Dmc, &opts, &paths).unwrap();
    let out = tempfile::NamedTempFile::new().unwrap();
    let status = launcher
        .run(Stdio::from(out.reopen().unwrap()))
        .unwrap();
    assert!(status.success());
    assert_eq!(std::fs::read_to_string(out.path()).unwrap(), "c p jt 1 1 2\n");
}

#[test]
fn missing_join_tree_file() {
    let opts = options(&["--cf=bench.cnf", "--jf=/nonexistent/bench.jt"]);
    let paths = ToolPaths::with_dirs("/nonexistent", "/nonexistent");
    let launcher = Launcher::new(SolverKind::Dmc, &opts, &paths).unwrap();
    assert!(launcher.run(Stdio::null()).is_err());
}

#[test]
fn planner_alone_reads_cnf() {
    let dir = tempfile::tempdir().unwrap();
    fake_tool(dir.path(), "lg.sif", "#!/bin/sh\necho \"c $1\"\ncat\n");
    let cf = dir.path().join("bench.cnf");
    std::fs::write(&cf, "p cnf 1 1\n1 0\n").unwrap();
    let opts = options(&["--cf", cf.to_str().unwrap(), "--decomposer=flow"]);
    let paths = ToolPaths::with_dirs(dir.path(), dir.path());
    let launcher = Launcher::new(SolverKind::Planner, &opts, &paths).unwrap();
    let out = tempfile::NamedTempFile::new().unwrap();
    let status = launcher
        .run(Stdio::from(out.reopen().unwrap()))
        .unwrap();
    assert!(status.success());
    assert_eq!(
        std::fs::read_to_string(out.path()).unwrap(),
        format!("c {}\np cnf 1 1\n1 0\n", Decomposer::Flow.command())
    );
}
