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

//! Turn the log of a wrapped run into a flat `key:value` report.
//!
//! The log is the wrapper preamble (`c cf <path>`, `c solver <name>`, a blank line), then
//! everything the solver prints, then the report of the runner after a line starting with
//! `#`. It is processed line by line as it comes; only a few counters are kept.

pub mod cancel;
pub mod diagnostic;
pub mod maxsat;

use self::cancel::{Canceller, SigKill};
use self::diagnostic::{Action, Preamble, SENTINEL};
use self::maxsat::{CnfFileScale, MaxSatScale, ScaleSource};
use crate::solver::SolverKind;
use crate::supervisor::{gigabytes, RunnerRecord};
use crate::utils::Real;
use anyhow::Context;
use nix::unistd::Pid;
use std::fmt::Display;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing::trace;

/// Assignments longer than this are reported as -1.
pub const MAX_MODEL_LEN: usize = 200_000;

/// Where `key:value` records go. Each record is flushed as soon as it is written.
pub struct Report<W: Write> {
    out: W,
}

impl<W: Write> Report<W> {
    /// Writes records to `out`
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Writes one record.
    pub fn record(&mut self, key: impl Display, value: impl Display) -> anyhow::Result<()> {
        writeln!(self.out, "{}:{}", key, value).context("writing report")?;
        self.out.flush().context("flushing report")
    }

    /// The underlying writer
    pub fn into_inner(self) -> W {
        self.out
    }
}

/// What the preamble says about the run. Each field is only set once.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunIdentity {
    /// the input file
    pub cnf_path: Option<PathBuf>,
    /// the solver name, as announced
    pub solver: Option<String>,
    /// the solver, if we know it
    pub kind: Option<SolverKind>,
}

/// Widths and planning times of the join trees seen so far. The two lists are filled
/// independently.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TreeMetrics {
    /// width of each tree
    pub widths: Vec<i64>,
    /// planning time of each tree, in seconds
    pub times: Vec<f64>,
}

impl TreeMetrics {
    /// tree count, last width, last time; only when there is a width and a time
    pub fn summary(&self) -> Option<(usize, i64, f64)> {
        let width = *self.widths.last()?;
        let time = *self.times.last()?;
        Some((self.times.len(), width, time))
    }
}

/// Whether lines still come from the solver or already from the runner report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverPhase {
    /// before the first `#` line
    Active,
    /// after it, forever
    Ended,
}

/// The state of the report of one run.
pub struct Normalizer<S: ScaleSource = CnfFileScale, C: Canceller = SigKill> {
    identity: RunIdentity,
    pids: Vec<Pid>,
    trees: TreeMetrics,
    phase: SolverPhase,
    scale_source: S,
    /// read once, at the first objective line
    scale: Option<MaxSatScale>,
    /// None: sibling processes are left alone
    canceller: Option<C>,
    /// pids may be reused once killed
    siblings_cancelled: bool,
}

impl<S: ScaleSource, C: Canceller> Normalizer<S, C> {
    /// A normalizer for a new run. When a canceller is given, the first tree time
    /// reported by the planner stops all processes whose pid was announced.
    pub fn new(scale_source: S, canceller: Option<C>) -> Self {
        Normalizer {
            identity: RunIdentity::default(),
            pids: Vec::new(),
            trees: TreeMetrics::default(),
            phase: SolverPhase::Active,
            scale_source,
            scale: None,
            canceller,
            siblings_cancelled: false,
        }
    }

    /// What the preamble said so far
    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    /// Trees seen so far
    pub fn trees(&self) -> &TreeMetrics {
        &self.trees
    }

    /// Current phase
    pub fn phase(&self) -> SolverPhase {
        self.phase
    }

    /// Processes one line, without its line terminator.
    pub fn process_line<W: Write>(
        &mut self,
        line: &str,
        report: &mut Report<W>,
    ) -> anyhow::Result<()> {
        let line = line.trim_end();
        if line.starts_with(SENTINEL) {
            if self.phase == SolverPhase::Active {
                self.phase = SolverPhase::Ended;
                self.flush_trees(report)?;
            }
        } else if self.phase == SolverPhase::Ended {
            self.runner_line(line, report)?;
        } else {
            self.solver_line(line, report)?;
        }
        if let Some(model) = diagnostic::model(line) {
            let var_count = model.chars().count();
            if var_count > MAX_MODEL_LEN {
                report.record("model", -1)?;
            } else {
                report.record("model", model)?;
            }
            report.record("varcount", var_count)?;
        }
        Ok(())
    }

    /// To be called at the end of the log. If the runner report never came, reports the
    /// trees now. Further calls do nothing.
    pub fn finish<W: Write>(&mut self, report: &mut Report<W>) -> anyhow::Result<()> {
        if self.phase == SolverPhase::Active {
            self.phase = SolverPhase::Ended;
            self.flush_trees(report)?;
        }
        Ok(())
    }

    /// Processes a whole log, copying it to `echo` if any.
    pub fn run<R: BufRead, W: Write, E: Write>(
        &mut self,
        mut input: R,
        report: &mut Report<W>,
        mut echo: Option<E>,
    ) -> anyhow::Result<()> {
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            let n = input
                .read_until(b'\n', &mut buffer)
                .context("reading run log")?;
            if n == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buffer);
            let line = line.trim_end();
            self.process_line(line, report)?;
            if let Some(echo) = echo.as_mut() {
                writeln!(echo, "{}", line).context("echoing run log")?;
            }
        }
        self.finish(report)
    }

    fn flush_trees<W: Write>(&self, report: &mut Report<W>) -> anyhow::Result<()> {
        if let Some((count, width, time)) = self.trees.summary() {
            report.record("treecount", count)?;
            report.record("width", width)?;
            report.record("treetime", Real(time))?;
        }
        Ok(())
    }

    fn solver_line<W: Write>(&mut self, line: &str, report: &mut Report<W>) -> anyhow::Result<()> {
        match diagnostic::preamble(line) {
            Some(Preamble::Cnf(path)) if self.identity.cnf_path.is_none() => {
                let path = PathBuf::from(path);
                if let Some(base) = path.file_stem() {
                    report.record("base", base.to_string_lossy())?;
                }
                self.identity.cnf_path = Some(path);
                return Ok(());
            }
            Some(Preamble::Solver(name)) if self.identity.solver.is_none() => {
                self.identity.kind = name.parse().ok();
                if self.identity.kind.is_none() {
                    trace!(solver = name, "no report for this solver");
                }
                self.identity.solver = Some(name.to_owned());
                return Ok(());
            }
            Some(Preamble::Pid(pid)) => {
                self.pids.push(Pid::from_raw(pid));
                return Ok(());
            }
            _ => (),
        }
        match self.identity.kind {
            Some(kind) if kind.runs_dpmc() => self.dpmc_line(kind, line, report),
            Some(kind) if kind.reports_objective() => match diagnostic::objective(line) {
                Some(optimum) => self.objective(optimum, report),
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }

    fn dpmc_line<W: Write>(
        &mut self,
        kind: SolverKind,
        line: &str,
        report: &mut Report<W>,
    ) -> anyhow::Result<()> {
        let (action, value) = match diagnostic::classify(line) {
            Some(x) => x,
            None => return Ok(()),
        };
        match action {
            Action::PlannerSeconds => {
                if kind == SolverKind::Planner && self.tree_time(value, report)? {
                    self.cancel_siblings();
                }
            }
            Action::TreeTime => {
                self.tree_time(value, report)?;
            }
            Action::Width => match value.parse() {
                Ok(width) => {
                    self.trees.widths.push(width);
                    report.record(format!("width{}", self.trees.widths.len()), width)?;
                }
                Err(_) => trace!(line, "unparsable width"),
            },
            Action::Copy(key) => report.record(key, value)?,
        }
        Ok(())
    }

    /// Records a tree time; false if the value is not a number.
    fn tree_time<W: Write>(&mut self, value: &str, report: &mut Report<W>) -> anyhow::Result<bool> {
        match value.parse() {
            Ok(time) => {
                self.trees.times.push(time);
                report.record(format!("treetime{}", self.trees.times.len()), Real(time))?;
                Ok(true)
            }
            Err(_) => {
                trace!(value, "unparsable tree time");
                Ok(false)
            }
        }
    }

    /// Only the first tree counts.
    fn cancel_siblings(&mut self) {
        if self.siblings_cancelled {
            return;
        }
        if let Some(canceller) = self.canceller.as_mut() {
            canceller.cancel(&self.pids);
            self.siblings_cancelled = true;
        }
    }

    fn objective<W: Write>(&mut self, optimum: f64, report: &mut Report<W>) -> anyhow::Result<()> {
        let scale = match self.scale {
            Some(scale) => scale,
            None => {
                let path = self
                    .identity
                    .cnf_path
                    .as_deref()
                    .context("MaxSAT objective before the c cf line")?;
                let scale = self.scale_source.scale(path)?;
                self.scale = Some(scale);
                scale
            }
        };
        let exponent = scale.exponent(optimum);
        report.record("logsol", exponent)?;
        report.record("sol", exponent.power()?)
    }

    fn runner_line<W: Write>(&mut self, line: &str, report: &mut Report<W>) -> anyhow::Result<()> {
        match RunnerRecord::parse(line) {
            Some(RunnerRecord::WallTime(seconds)) => {
                let mut time = seconds;
                // the counter only knows its own time, add the time to plan its tree
                if self.identity.kind == Some(SolverKind::Dmc) {
                    report.record("exetime", Real(seconds))?;
                    if let Some(tree_time) = self.trees.times.last() {
                        time += tree_time;
                    }
                }
                report.record("time", Real(time))
            }
            Some(RunnerRecord::PeakMemory(kilobytes)) => {
                report.record("mem", Real(gigabytes(kilobytes)))
            }
            Some(RunnerRecord::Timeout(timeout)) => report.record("timeout", timeout as u8),
            Some(RunnerRecord::Memout(memout)) => report.record("memout", memout as u8),
            Some(RunnerRecord::ExitStatus(status)) => report.record("exit", status),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
const WCNF_HEADER: &str =
    "p wcnf 3 4 100\nc softWeightSum 100\nc softWeightOffset 2\nc logBase 10\n";

#[cfg(test)]
fn normalize_with(
    normalizer: &mut Normalizer<&'static str, Vec<Pid>>,
    log: &str,
) -> anyhow::Result<String> {
    let mut report = Report::new(Vec::new());
    normalizer.run(log.as_bytes(), &mut report, None::<std::io::Sink>)?;
    Ok(String::from_utf8(report.into_inner()).unwrap())
}

#[cfg(test)]
fn normalize(log: &str) -> String {
    let mut normalizer = Normalizer::new(WCNF_HEADER, None::<Vec<Pid>>);
    normalize_with(&mut normalizer, log).unwrap()
}

#[test]
fn counter_run_with_width_but_no_time() {
    let log = "c cf bench.cnf\nc solver dmc\n\nc joinTreeWidth 12\n#\nWCTIME=3.2\nMAXMM=500000\nEXITSTATUS=0\n";
    assert_eq!(
        normalize(log),
        "base:bench\nwidth1:12\nexetime:3.2\ntime:3.2\nmem:0.5\nexit:0\n"
    );
}

#[test]
fn counter_time_includes_planning() {
    let log = "c cf dir/bench.cnf\nc solver dmc\n\nc joinTreeWidth 7\nc plannerSeconds 2.5\n# runsolver\nWCTIME=10.0\nTIMEOUT=false\nMEMOUT=true\n";
    assert_eq!(
        normalize(log),
        "base:bench\nwidth1:7\ntreetime1:2.5\ntreecount:1\nwidth:7\ntreetime:2.5\nexetime:10.0\ntime:12.5\ntimeout:0\nmemout:1\n"
    );
}

#[test]
fn only_counter_reports_exetime() {
    let log = "c cf bench.cnf\nc solver dpmc\n\nc plannerSeconds 2.5\n#\nWCTIME=10.0\n";
    assert_eq!(normalize(log), "base:bench\ntreetime1:2.5\ntime:10.0\n");
}

#[test]
fn trees_reported_without_runner() {
    let log = "c cf bench.cnf\nc solver planner\n\nc joinTreeWidth 9\nc seconds 0.5\nc joinTreeWidth 8\nc seconds 1.25\n";
    assert_eq!(
        normalize(log),
        "base:bench\nwidth1:9\ntreetime1:0.5\nwidth2:8\ntreetime2:1.25\ntreecount:2\nwidth:8\ntreetime:1.25\n"
    );
}

#[test]
fn trees_reported_once() {
    let log = "c solver planner\nc joinTreeWidth 9\nc seconds 0.5\n#\n#\nWCTIME=1.0\n# again\n";
    let mut normalizer = Normalizer::new(WCNF_HEADER, None::<Vec<Pid>>);
    let out = normalize_with(&mut normalizer, log).unwrap();
    assert_eq!(
        out,
        "width1:9\ntreetime1:0.5\ntreecount:1\nwidth:9\ntreetime:0.5\ntime:1.0\n"
    );
    assert_eq!(normalizer.phase(), SolverPhase::Ended);
    let mut report = Report::new(Vec::new());
    normalizer.finish(&mut report).unwrap();
    assert!(report.into_inner().is_empty());
}

#[test]
fn nothing_to_flush() {
    assert_eq!(normalize(""), "");
    assert_eq!(normalize("c solver dmc\nc joinTreeWidth 3\n"), "width1:3\n");
}

#[test]
fn indices_follow_line_order() {
    let log = "c solver planner\nc seconds 0.1\nc joinTreeWidth 5\nc seconds 0.2\nc seconds 0.3\nc joinTreeWidth 4\n";
    let mut normalizer = Normalizer::new(WCNF_HEADER, None::<Vec<Pid>>);
    let out = normalize_with(&mut normalizer, log).unwrap();
    let keys: Vec<_> = out.lines().map(|l| l.split(':').next().unwrap()).collect();
    assert_eq!(
        keys,
        ["treetime1", "width1", "treetime2", "treetime3", "width2", "treecount", "width", "treetime"]
    );
    assert_eq!(normalizer.trees().widths, [5, 4]);
    assert_eq!(normalizer.trees().times, [0.1, 0.2, 0.3]);
}

#[test]
fn seconds_only_count_for_planner() {
    let log = "c solver dpmc\nc seconds 0.1\nc joinTreeWidth 5\n";
    assert_eq!(normalize(log), "width1:5\n");
}

#[test]
fn copied_diagnostics() {
    let log = "c cf a.b.cnf\nc solver dmc\nc diagramVarSeconds 0.01\nc sliceVarSeconds 0.02\nc sliceAssignmentsSeconds 0.03\nc sliceWidth 6\nc s log10-estimate 3.2\nc s exact double prec-sci 1584.89\nc solutionMatch 1\nc maximizerVerificationSeconds 0.5\nc apparentSolution 0.75\nc logBound -inf\nc prunedDdCount 2\nc pruningSeconds 0.04\n";
    assert_eq!(
        normalize(log),
        "base:a.b\ndvtime:0.01\nsvtime:0.02\nsatime:0.03\nswidth:6\nlogsol:3.2\nsol:1584.89\nmatch:1\nmvtime:0.5\napplogsol:0.75\nlogbound:-inf\nprunecount:2\nprunetime:0.04\n"
    );
}

#[test]
fn unrecognized_lines_are_dropped() {
    let log = "c solver dmc\nc processing join tree...\nc joinTreeWidth wide\nWARNING: something\n#\nWCTIME\nCPUTIME=4.0\nWCTIME=2=3\n\nEXITSTATUS=1\n";
    assert_eq!(normalize(log), "exit:1\n");
}

#[test]
fn preamble_only_once() {
    let log = "c cf first.cnf\nc solver maxhs\nc cf second.cnf\nc solver dmc\nc joinTreeWidth 3\n";
    let mut normalizer = Normalizer::new(WCNF_HEADER, None::<Vec<Pid>>);
    assert_eq!(normalize_with(&mut normalizer, log).unwrap(), "base:first\n");
    assert_eq!(
        normalizer.identity().cnf_path,
        Some(PathBuf::from("first.cnf"))
    );
    assert_eq!(normalizer.identity().kind, Some(SolverKind::Maxhs));
}

#[test]
fn unknown_solver_reports_footer_only() {
    let log = "c cf bench.cnf\nc solver cachet\nc joinTreeWidth 3\no 12\n#\nMAXMM=2000000\n";
    assert_eq!(normalize(log), "base:bench\nmem:2.0\n");
}

#[test]
fn model_lines() {
    let long = "1".repeat(200_001);
    let log = format!("c solver maxhs\nv 10110\nv 1 -2 0\nv {}\n", long);
    assert_eq!(
        normalize(&log),
        "model:10110\nvarcount:5\nmodel:-1\nvarcount:200001\n"
    );
    let limit = "0".repeat(MAX_MODEL_LEN);
    let log = format!("#\nv {}\n", limit);
    assert_eq!(
        normalize(&log),
        format!("model:{}\nvarcount:{}\n", limit, MAX_MODEL_LEN)
    );
}

#[test]
fn maxsat_objectives() {
    let log = "c cf bench.wcnf\nc solver maxhs\n\no 94\no 90\ns OPTIMUM FOUND\nv 011\n";
    assert_eq!(
        normalize(log),
        "base:bench\nlogsol:0\nsol:1\nlogsol:4\nsol:10000\nmodel:011\nvarcount:3\n"
    );
    let log = "c cf bench.wcnf\nc solver uwr\no 93.5\n";
    assert_eq!(
        normalize(log),
        format!("base:bench\nlogsol:0.5\nsol:{}\n", Real(10f64.powf(0.5)))
    );
}

#[test]
fn maxsat_needs_base_ten() {
    let mut normalizer = Normalizer::new(
        "p wcnf 3 4 100\nc softWeightSum 100\nc softWeightOffset 2\nc logBase 2\n",
        None::<Vec<Pid>>,
    );
    assert!(normalize_with(&mut normalizer, "c cf bench.wcnf\nc solver uwr\no 94\n").is_err());
    let mut normalizer = Normalizer::new(WCNF_HEADER, None::<Vec<Pid>>);
    assert!(normalize_with(&mut normalizer, "c solver uwr\no 94\n").is_err());
}

#[test]
fn maxsat_file_is_read_from_root() {
    let mut normalizer = Normalizer::new(
        maxsat::CnfFileScale::new("assets"),
        None::<Vec<Pid>>,
    );
    let mut report = Report::new(Vec::new());
    for line in &["c cf bench.wcnf", "c solver maxhs", "o 90"] {
        normalizer.process_line(line, &mut report).unwrap();
    }
    assert_eq!(
        String::from_utf8(report.into_inner()).unwrap(),
        "base:bench\nlogsol:4\nsol:10000\n"
    );
}

#[test]
fn planner_tree_stops_siblings() {
    let log = "c cf bench.cnf\nc solver planner\nc pid 4242\nc joinTreeWidth 3\nc pid 4243\nc seconds 0.5\nc pid 4244\nc seconds 0.7\n";
    let mut normalizer = Normalizer::new(WCNF_HEADER, Some(Vec::new()));
    let out = normalize_with(&mut normalizer, log).unwrap();
    assert_eq!(
        normalizer.canceller,
        Some(vec![Pid::from_raw(4242), Pid::from_raw(4243)])
    );
    assert!(out.contains("treetime2:0.7\n"));

    let log = "c solver planner\nc pid 0\nc pid -1\nc pid 17\nc seconds 0.5\n";
    let mut normalizer = Normalizer::new(WCNF_HEADER, Some(Vec::new()));
    normalize_with(&mut normalizer, log).unwrap();
    assert_eq!(normalizer.canceller, Some(vec![Pid::from_raw(17)]));

    let log = "c solver dmc\nc pid 4242\nc plannerSeconds 0.5\n#\nc pid 1\n";
    let mut normalizer = Normalizer::new(WCNF_HEADER, Some(Vec::new()));
    normalize_with(&mut normalizer, log).unwrap();
    assert_eq!(normalizer.canceller, Some(vec![]));
    assert_eq!(normalizer.pids, [Pid::from_raw(4242)]);
}

#[test]
fn echo_copies_every_line() {
    let log = "c cf bench.cnf\r\nc solver dmc\n\nsomething odd   \n#\nWCTIME=1.5";
    let mut normalizer = Normalizer::new(WCNF_HEADER, None::<Vec<Pid>>);
    let mut report = Report::new(Vec::new());
    let mut echo = Vec::new();
    normalizer
        .run(log.as_bytes(), &mut report, Some(&mut echo))
        .unwrap();
    assert_eq!(
        String::from_utf8(echo).unwrap(),
        "c cf bench.cnf\nc solver dmc\n\nsomething odd\n#\nWCTIME=1.5\n"
    );
    assert_eq!(
        String::from_utf8(report.into_inner()).unwrap(),
        "base:bench\nexetime:1.5\ntime:1.5\n"
    );
}

#[test]
fn invalid_utf8_is_tolerated() {
    let mut log = b"c solver dmc\nc joinTreeWidth 4\n".to_vec();
    log.extend_from_slice(b"c \xff\xfe garbage\n#\nEXITSTATUS=0\n");
    let mut normalizer = Normalizer::new(WCNF_HEADER, None::<Vec<Pid>>);
    let mut report = Report::new(Vec::new());
    normalizer
        .run(&log[..], &mut report, None::<std::io::Sink>)
        .unwrap();
    assert_eq!(
        String::from_utf8(report.into_inner()).unwrap(),
        "width1:4\nexit:0\n"
    );
}
