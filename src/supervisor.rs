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

//! Running a command under `runsolver`, and reading back the report it prints when the
//! command exits.
//!
//! The report comes after a line starting with `#`, as `KEY=VALUE` lines.

use crate::utils::ToolPaths;
use nom::bytes::complete::take_while1;
use nom::character::complete::char;
use nom::combinator::rest;
use nom::sequence::separated_pair;
use nom::IResult;
use std::ffi::OsString;
use structopt::StructOpt;

/// Wall clock and memory caps of a supervised run. Zero means no cap.
#[derive(Debug, Clone, Copy, PartialEq, Default, StructOpt)]
pub struct ResourceLimits {
    /// for runsolver, in GB
    #[structopt(long, default_value = "0")]
    pub memcap: f64,

    /// for runsolver, in seconds
    #[structopt(long, default_value = "0")]
    pub timecap: f64,
}

impl ResourceLimits {
    /// memory cap in megabytes, truncated
    pub fn memcap_megabytes(&self) -> Option<i64> {
        if self.memcap == 0. {
            None
        } else {
            Some((self.memcap * 1e3) as i64)
        }
    }

    /// time cap in whole seconds, truncated
    pub fn timecap_seconds(&self) -> Option<i64> {
        if self.timecap == 0. {
            None
        } else {
            Some(self.timecap as i64)
        }
    }

    /// The runsolver command line to prepend to the supervised command. The report goes
    /// to stdout, after the output of the supervised command.
    pub fn runner_command(&self, paths: &ToolPaths) -> Vec<OsString> {
        let mut cmd: Vec<OsString> = vec![
            paths.bin("runsolver").into(),
            "-w".into(),
            "/dev/null".into(),
            "-v".into(),
            "/dev/stdout".into(),
        ];
        // in MB, must not be -M or -V
        if let Some(megabytes) = self.memcap_megabytes() {
            cmd.push("-R".into());
            cmd.push(megabytes.to_string().into());
        }
        if let Some(seconds) = self.timecap_seconds() {
            cmd.push("-W".into());
            cmd.push(seconds.to_string().into());
        }
        cmd
    }
}

/// One line of the runner report that we care about.
#[derive(Debug, Clone, PartialEq)]
pub enum RunnerRecord<'a> {
    /// `WCTIME`, in seconds
    WallTime(f64),
    /// `MAXMM`, in kilobytes
    PeakMemory(f64),
    /// `TIMEOUT`
    Timeout(bool),
    /// `MEMOUT`
    Memout(bool),
    /// `EXITSTATUS`, verbatim
    ExitStatus(&'a str),
}

fn key_value(line: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_'),
        char('='),
        rest,
    )(line)
}

impl<'a> RunnerRecord<'a> {
    /// Parses a `KEY=VALUE` line. Unknown keys and malformed lines yield `None`.
    pub fn parse(line: &'a str) -> Option<Self> {
        let (_, (key, value)) = key_value(line).ok()?;
        let value = value.trim();
        match key {
            "WCTIME" => value.parse().ok().map(RunnerRecord::WallTime),
            "MAXMM" => value.parse().ok().map(RunnerRecord::PeakMemory),
            "TIMEOUT" => Some(RunnerRecord::Timeout(value == "true")),
            "MEMOUT" => Some(RunnerRecord::Memout(value == "true")),
            "EXITSTATUS" => Some(RunnerRecord::ExitStatus(value)),
            _ => None,
        }
    }
}

/// kilobytes to gigabytes
pub fn gigabytes(kilobytes: f64) -> f64 {
    kilobytes / 1e6
}

#[test]
fn runner_command() {
    let paths = ToolPaths::with_dirs("/opt/bin", "/opt");
    let uncapped = ResourceLimits::default().runner_command(&paths);
    assert_eq!(
        uncapped,
        ["/opt/bin/runsolver", "-w", "/dev/null", "-v", "/dev/stdout"]
            .iter()
            .map(OsString::from)
            .collect::<Vec<_>>()
    );
    let capped = ResourceLimits {
        memcap: 2.5,
        timecap: 59.9,
    }
    .runner_command(&paths);
    let tail: Vec<_> = capped[5..].iter().map(|a| a.to_str().unwrap()).collect();
    assert_eq!(tail, ["-R", "2500", "-W", "59"]);
}

#[test]
fn limits_from_command_line() {
    let limits = ResourceLimits::from_iter(vec!["runner", "--memcap", "8", "--timecap=1000"]);
    assert_eq!(limits.memcap_megabytes(), Some(8000));
    assert_eq!(limits.timecap_seconds(), Some(1000));
}

#[test]
fn parse_records() {
    assert_eq!(
        RunnerRecord::parse("WCTIME=3.2"),
        Some(RunnerRecord::WallTime(3.2))
    );
    assert_eq!(
        RunnerRecord::parse("MAXMM=500000"),
        Some(RunnerRecord::PeakMemory(500000.))
    );
    assert_eq!(
        RunnerRecord::parse("TIMEOUT=true"),
        Some(RunnerRecord::Timeout(true))
    );
    assert_eq!(
        RunnerRecord::parse("MEMOUT=false"),
        Some(RunnerRecord::Memout(false))
    );
    assert_eq!(
        RunnerRecord::parse("EXITSTATUS=137"),
        Some(RunnerRecord::ExitStatus("137"))
    );
    assert_eq!(RunnerRecord::parse("CPUTIME=1.0"), None);
    assert_eq!(RunnerRecord::parse("WCTIME=soon"), None);
    assert_eq!(RunnerRecord::parse("no equal sign"), None);
    assert_eq!(RunnerRecord::parse(""), None);
    assert_eq!(gigabytes(500000.), 0.5);
}
