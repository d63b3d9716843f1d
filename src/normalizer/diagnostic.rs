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

//! Grammar of the lines of a run log.
//!
//! Solver diagnostics are `c <tag> ... <value>` lines; the value is always the last
//! token. Which tags are recognized, and what becomes of them, is the [DIAGNOSTICS] table.

use nom::branch::alt;
use nom::bytes::complete::{tag, take_till1, take_while};
use nom::combinator::{rest, value};
use nom::sequence::preceded;
use nom::IResult;

/// Lines starting with this belong to the runner report; the first one ends the solver
/// output.
pub const SENTINEL: char = '#';

/// What a recognized diagnostic line turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Time to get a tree, but only when the planner runs alone.
    PlannerSeconds,
    /// Time the planner took for the tree the counter used.
    TreeTime,
    /// Width of a join tree.
    Width,
    /// Copy the value to this report key.
    Copy(&'static str),
}

/// Tag prefixes of diagnostic lines, tried in order.
pub const DIAGNOSTICS: &[(&str, Action)] = &[
    ("c seconds", Action::PlannerSeconds),
    ("c joinTreeWidth", Action::Width),
    ("c plannerSeconds", Action::TreeTime),
    ("c diagramVarSeconds", Action::Copy("dvtime")),
    ("c sliceVarSeconds", Action::Copy("svtime")),
    ("c sliceAssignmentsSeconds", Action::Copy("satime")),
    ("c sliceWidth", Action::Copy("swidth")),
    ("c s log10-estimate", Action::Copy("logsol")),
    ("c s exact", Action::Copy("sol")),
    ("c solutionMatch", Action::Copy("match")),
    ("c maximizerVerificationSeconds", Action::Copy("mvtime")),
    ("c apparentSolution", Action::Copy("applogsol")),
    ("c logBound", Action::Copy("logbound")),
    ("c prunedDdCount", Action::Copy("prunecount")),
    ("c pruningSeconds", Action::Copy("prunetime")),
];

/// The last whitespace separated token of the line
pub fn last_word(line: &str) -> Option<&str> {
    line.split_whitespace().last()
}

/// The action of the first table entry matching the line, with the value of the line.
pub fn classify(line: &str) -> Option<(Action, &str)> {
    let &(_, action) = DIAGNOSTICS
        .iter()
        .find(|(prefix, _)| line.starts_with(prefix))?;
    Some((action, last_word(line)?))
}

/// Lines the wrapper prints before the solver output, and the pid of the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preamble<'a> {
    /// `c cf <path>`
    Cnf(&'a str),
    /// `c solver <name>`
    Solver(&'a str),
    /// `c pid <pid>`
    Pid(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PreambleTag {
    Cnf,
    Solver,
    Pid,
}

fn preamble_tag(line: &str) -> IResult<&str, PreambleTag> {
    alt((
        value(PreambleTag::Cnf, tag("c cf")),
        value(PreambleTag::Solver, tag("c solver")),
        value(PreambleTag::Pid, tag("c pid")),
    ))(line)
}

/// Parses a preamble line. A pid which is not a positive number makes the line
/// unrecognized: 0 and negative pids address process groups.
pub fn preamble(line: &str) -> Option<Preamble<'_>> {
    let (_, kind) = preamble_tag(line).ok()?;
    let word = last_word(line)?;
    match kind {
        PreambleTag::Cnf => Some(Preamble::Cnf(word)),
        PreambleTag::Solver => Some(Preamble::Solver(word)),
        PreambleTag::Pid => word
            .parse::<i32>()
            .ok()
            .filter(|&pid| pid > 0)
            .map(Preamble::Pid),
    }
}

fn objective_token(line: &str) -> IResult<&str, &str> {
    preceded(
        tag("o "),
        preceded(
            take_while(char::is_whitespace),
            take_till1(char::is_whitespace),
        ),
    )(line)
}

/// The cost in a MaxSAT `o <cost>` line.
pub fn objective(line: &str) -> Option<f64> {
    let (_, token) = objective_token(line).ok()?;
    token.parse().ok()
}

fn model_tail(line: &str) -> IResult<&str, &str> {
    preceded(tag("v "), rest)(line)
}

/// The assignment in a `v <assignment>` line, when there is exactly one token after `v`.
pub fn model(line: &str) -> Option<&str> {
    let (_, tail) = model_tail(line).ok()?;
    let mut words = tail.split_whitespace();
    match (words.next(), words.next()) {
        (Some(model), None) => Some(model),
        _ => None,
    }
}

#[test]
fn classify_lines() {
    assert_eq!(
        classify("c joinTreeWidth 12"),
        Some((Action::Width, "12"))
    );
    assert_eq!(
        classify("c seconds 0.25"),
        Some((Action::PlannerSeconds, "0.25"))
    );
    assert_eq!(
        classify("c plannerSeconds            1.5"),
        Some((Action::TreeTime, "1.5"))
    );
    assert_eq!(
        classify("c s exact double prec-sci 1.2e+03"),
        Some((Action::Copy("sol"), "1.2e+03"))
    );
    assert_eq!(
        classify("c s log10-estimate 3.08"),
        Some((Action::Copy("logsol"), "3.08"))
    );
    assert_eq!(
        classify("c sliceWidth 4"),
        Some((Action::Copy("swidth"), "4"))
    );
    assert_eq!(classify("c s type wmc"), None);
    assert_eq!(classify("c processing join tree..."), None);
    assert_eq!(classify("s SATISFIABLE"), None);
    assert_eq!(classify(""), None);
}

#[test]
fn every_key_is_distinct() {
    let mut keys: Vec<_> = DIAGNOSTICS
        .iter()
        .filter_map(|(_, action)| match action {
            Action::Copy(key) => Some(*key),
            _ => None,
        })
        .collect();
    let n = keys.len();
    keys.sort_unstable();
    keys.dedup();
    assert_eq!(keys.len(), n);
}

#[test]
fn preamble_lines() {
    assert_eq!(
        preamble("c cf benchmarks/bench.cnf"),
        Some(Preamble::Cnf("benchmarks/bench.cnf"))
    );
    assert_eq!(preamble("c solver dmc"), Some(Preamble::Solver("dmc")));
    assert_eq!(preamble("c pid 4242"), Some(Preamble::Pid(4242)));
    assert_eq!(preamble("c pid none"), None);
    assert_eq!(preamble("c pid 0"), None);
    assert_eq!(preamble("c pid -1"), None);
    assert_eq!(preamble("c joinTreeWidth 3"), None);
}

#[test]
fn objective_lines() {
    assert_eq!(objective("o 94"), Some(94.));
    assert_eq!(objective("o  17.5 extra"), Some(17.5));
    assert_eq!(objective("o"), None);
    assert_eq!(objective("o cost"), None);
    assert_eq!(objective("c o 94"), None);
}

#[test]
fn model_lines() {
    assert_eq!(model("v 10110"), Some("10110"));
    assert_eq!(model("v 1 -2 3 0"), None);
    assert_eq!(model("v "), None);
    assert_eq!(model("c v 101"), None);
}
