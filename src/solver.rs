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

//! The external tools that can be driven, and their command-line names.

use structopt::clap::arg_enum;

arg_enum! {
    /// Which solver a run uses. Announced in the preamble of the run log.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum SolverKind {
        Planner,
        Dmc,
        Dpmc,
        Gauss,
        Maxhs,
        Uwr,
    }
}

/// The solver kinds the DPMC launcher can run.
pub const DPMC_SOLVERS: &[&str] = &["planner", "dmc", "dpmc"];

impl SolverKind {
    /// Name on the command line and in the preamble
    pub fn name(self) -> &'static str {
        match self {
            SolverKind::Planner => "planner",
            SolverKind::Dmc => "dmc",
            SolverKind::Dpmc => "dpmc",
            SolverKind::Gauss => "gauss",
            SolverKind::Maxhs => "maxhs",
            SolverKind::Uwr => "uwr",
        }
    }

    /// planner alone, counter alone, or both chained
    pub fn runs_dpmc(self) -> bool {
        matches!(self, SolverKind::Planner | SolverKind::Dmc | SolverKind::Dpmc)
    }

    /// MaxSAT solvers whose objective is converted back to a model count
    pub fn reports_objective(self) -> bool {
        matches!(self, SolverKind::Maxhs | SolverKind::Uwr)
    }
}

arg_enum! {
    /// How the planner computes join trees.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum Decomposer {
        Htd,
        Flow,
    }
}

impl Decomposer {
    /// Name on the command line
    pub fn name(self) -> &'static str {
        match self {
            Decomposer::Htd => "htd",
            Decomposer::Flow => "flow",
        }
    }

    /// The tree decomposer command line, passed to the planner as a single argument.
    pub fn command(self) -> &'static str {
        match self {
            Decomposer::Htd => "/solvers/htd-master/bin/htd_main --opt width --iterations 0 --strategy challenge --print-progress --preprocessing full",
            Decomposer::Flow => "/solvers/flow-cutter-pace17/flow_cutter_pace17 -p 100",
        }
    }
}

arg_enum! {
    /// Decision diagram package of the counter: `c` for CUDD, `s` for Sylvan.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum DdPackage {
        C,
        S,
    }
}

impl DdPackage {
    /// Name on the command line
    pub fn name(self) -> &'static str {
        match self {
            DdPackage::C => "c",
            DdPackage::S => "s",
        }
    }
}

#[test]
fn names_round_trip() {
    for name in SolverKind::variants().iter() {
        let kind: SolverKind = name.parse().unwrap();
        assert_eq!(kind.name(), name.to_lowercase());
    }
    assert_eq!("dmc".parse::<SolverKind>().unwrap(), SolverKind::Dmc);
    assert!("cachet".parse::<SolverKind>().is_err());
    assert_eq!("flow".parse::<Decomposer>().unwrap(), Decomposer::Flow);
    assert_eq!("s".parse::<DdPackage>().unwrap().name(), "s");
}

#[test]
fn families() {
    let dpmc: Vec<_> = SolverKind::variants()
        .iter()
        .map(|name| name.parse::<SolverKind>().unwrap())
        .filter(|kind| kind.runs_dpmc())
        .map(SolverKind::name)
        .collect();
    assert_eq!(dpmc, DPMC_SOLVERS);
    assert!(SolverKind::Uwr.reports_objective());
    assert!(!SolverKind::Gauss.reports_objective());
    assert!(!SolverKind::Gauss.runs_dpmc());
}
