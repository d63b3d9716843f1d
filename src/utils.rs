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

//! Misc utils.

use anyhow::Context;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs::File;
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use tracing::trace;

/// Sets or clears the cloexec flag on this file descriptor
pub fn set_cloexec<F: AsRawFd>(f: &F, value: bool) -> anyhow::Result<()> {
    let fd = f.as_raw_fd();
    let flags = fcntl(fd, FcntlArg::F_GETFD).context("fnctl(getfd)")?;
    // safety: on the result of fcntl
    let mut flags = unsafe { FdFlag::from_bits_unchecked(flags) };
    flags.set(FdFlag::FD_CLOEXEC, value);
    fcntl(fd, FcntlArg::F_SETFD(flags)).context("fnctl(setfd)")?;
    Ok(())
}

/// Returns a `Stdio` writing to a duplicate of our own stdout, so that a child
/// can have its stderr merged into our stdout.
pub fn stdout_stdio() -> anyhow::Result<Stdio> {
    let fd = nix::unistd::dup(std::io::stdout().as_raw_fd()).context("dup(stdout)")?;
    // safety: fd was just returned by dup and is owned by nobody else
    let file = unsafe { File::from_raw_fd(fd) };
    // only the child should see it, on its fd 2
    set_cloexec(&file, true)?;
    Ok(Stdio::from(file))
}

/// Where the external executables live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    /// solvers, planner, runner
    bin_dir: PathBuf,
    /// our own executables
    exe_dir: PathBuf,
}

impl ToolPaths {
    /// Solvers are looked up in `bin_dir`, or by default in the `bin` directory next to
    /// the running executable.
    pub fn new(bin_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let exe = std::env::current_exe().context("locating the running executable")?;
        let exe_dir = exe
            .parent()
            .map(Path::to_path_buf)
            .with_context(|| format!("{} has no parent directory", exe.display()))?;
        let bin_dir = bin_dir.unwrap_or_else(|| exe_dir.join("bin"));
        Ok(Self { bin_dir, exe_dir })
    }

    /// Explicit directories for solvers and for our own executables.
    pub fn with_dirs(bin_dir: impl Into<PathBuf>, exe_dir: impl Into<PathBuf>) -> Self {
        Self {
            bin_dir: bin_dir.into(),
            exe_dir: exe_dir.into(),
        }
    }

    /// The directory solvers are looked up in
    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }

    /// Path to the solver executable `name`
    pub fn bin(&self, name: &str) -> PathBuf {
        self.bin_dir.join(name)
    }

    /// Path to our own executable `name`
    pub fn sibling(&self, name: &str) -> PathBuf {
        self.exe_dir.join(name)
    }
}

/// Renders `--name=value`.
pub fn long_arg(name: &str, value: impl AsRef<OsStr>) -> OsString {
    let mut arg = OsString::from("--");
    arg.push(name);
    arg.push("=");
    arg.push(value);
    arg
}

/// A float displayed like Python's `repr`, which is what consumers of the reports and
/// the solvers' own option parsers expect.
/// # Example
/// ```
/// use dpmc_eval::utils::Real;
///
/// assert_eq!(Real(10.0).to_string(), "10.0");
/// assert_eq!(Real(0.5).to_string(), "0.5");
/// assert_eq!(Real(1e-5).to_string(), "1e-05");
/// assert_eq!(Real(1.5e16).to_string(), "1.5e+16");
/// assert_eq!(Real(-f64::INFINITY).to_string(), "-inf");
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Real(pub f64);

impl fmt::Display for Real {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_nan() {
            return f.write_str("nan");
        }
        // same thresholds for scientific notation as repr, only the exponent differs
        let shortest = format!("{:?}", self.0);
        match shortest.split_once('e') {
            None => f.write_str(&shortest),
            Some((mantissa, exponent)) => {
                let (sign, digits) = match exponent.strip_prefix('-') {
                    Some(digits) => ('-', digits),
                    None => ('+', exponent),
                };
                write!(f, "{}e{}{:0>2}", mantissa, sign, digits)
            }
        }
    }
}

/// The exit code to mirror for this child exit status, `128 + signal` for killed children.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

/// Creates a command from an argument vector. The child is killed when the spawning
/// thread dies.
pub fn child_command(argv: &[OsString]) -> anyhow::Result<Command> {
    let (program, args) = argv.split_first().context("empty command line")?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    unsafe {
        cmd.pre_exec(|| prctl::set_death_signal(9).map_err(std::io::Error::from_raw_os_error))
    };
    Ok(cmd)
}

/// Runs the command and waits for it.
pub fn run_to_completion(mut cmd: Command, what: &str) -> anyhow::Result<ExitStatus> {
    let _span = tracing::trace_span!("running_child", name = what, timing = true).entered();
    trace!(?cmd, "starting {}", what);
    let status = cmd.status().with_context(|| format!("running {}", what))?;
    trace!(?status, "{} exited", what);
    Ok(status)
}

#[test]
fn real_like_repr() {
    assert_eq!(Real(12.5).to_string(), "12.5");
    assert_eq!(Real(0.0).to_string(), "0.0");
    assert_eq!(Real(0.1 + 0.2).to_string(), "0.30000000000000004");
    assert_eq!(Real(1e-100).to_string(), "1e-100");
    assert_eq!(Real(1e16).to_string(), "1e+16");
    assert_eq!(Real(0.0001).to_string(), "0.0001");
    assert_eq!(Real(f64::NAN).to_string(), "nan");
}

#[test]
fn exit_codes() {
    // raw wait statuses
    assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
    assert_eq!(exit_code(ExitStatus::from_raw(0)), 0);
    assert_eq!(exit_code(ExitStatus::from_raw(9)), 137);
}

#[test]
fn long_args() {
    assert_eq!(long_arg("cf", "a b.cnf"), OsString::from("--cf=a b.cnf"));
}

#[test]
fn tool_paths() {
    let paths = ToolPaths::with_dirs("/opt/solvers", "/opt/eval");
    assert_eq!(paths.bin("dmc"), PathBuf::from("/opt/solvers/dmc"));
    assert_eq!(paths.sibling("dpmc"), PathBuf::from("/opt/eval/dpmc"));
    let default = ToolPaths::new(None).unwrap();
    assert!(default.bin_dir().ends_with("bin"));
}

#[test]
fn child_status() {
    let cmd = child_command(&["sh".into(), "-c".into(), "exit 5".into()]).unwrap();
    let status = run_to_completion(cmd, "sh").unwrap();
    assert_eq!(exit_code(status), 5);
    assert!(child_command(&[]).is_err());
}
