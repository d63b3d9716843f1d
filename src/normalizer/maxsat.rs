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

//! Convert the optimum of a MaxSAT encoding of weighted model counting back to a model
//! count.
//!
//! The encoder declares its scaling parameters in comments of the WCNF file:
//! ```text
//! p wcnf 3 4 100
//! c weightedVarCount 3
//! c softWeightSum 100
//! c softWeightOffset 2
//! c logBase 10
//! ```
//! and the log10 model count is `softWeightSum - optimum - weightedVarCount * softWeightOffset`.

use anyhow::Context;
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::combinator::value;
use nom::IResult;
use num_bigint::BigUint;
use std::convert::TryFrom;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::utils::Real;

/// The only base the conversion is valid for.
pub const LOG_BASE: u32 = 10;

/// Scaling parameters of a MaxSAT encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaxSatScale {
    /// number of weighted variables
    pub var_count: u64,
    /// total weight of soft clauses
    pub soft_weight_sum: f64,
    /// weight offset per weighted variable
    pub soft_weight_offset: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Header,
    WeightedVarCount,
    SoftWeightSum,
    SoftWeightOffset,
    LogBase,
}

fn field(line: &str) -> IResult<&str, Field> {
    alt((
        value(Field::Header, tag("p wcnf")),
        value(Field::WeightedVarCount, tag("c weightedVarCount")),
        value(Field::SoftWeightSum, tag("c softWeightSum")),
        value(Field::SoftWeightOffset, tag("c softWeightOffset")),
        value(Field::LogBase, tag("c logBase")),
    ))(line)
}

fn number<T>(word: Option<&str>, line: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let word = word.with_context(|| format!("missing value in {:?}", line))?;
    word.parse()
        .with_context(|| format!("parsing {:?} in {:?}", word, line))
}

impl MaxSatScale {
    /// Reads the parameters from the start of a WCNF file, up to the `c logBase` line.
    /// `c weightedVarCount` overrides the variable count of the header.
    pub fn from_header<R: BufRead>(input: R) -> anyhow::Result<Self> {
        let mut var_count = None;
        let mut soft_weight_sum = None;
        let mut soft_weight_offset = None;
        for line in input.lines() {
            let line = line.context("reading WCNF file")?;
            let kind = match field(&line) {
                Ok((_, kind)) => kind,
                Err(_) => continue,
            };
            let last = line.split_whitespace().last();
            match kind {
                Field::Header => var_count = Some(number(line.split_whitespace().nth(2), &line)?),
                Field::WeightedVarCount => var_count = Some(number(last, &line)?),
                Field::SoftWeightSum => soft_weight_sum = Some(number(last, &line)?),
                Field::SoftWeightOffset => soft_weight_offset = Some(number(last, &line)?),
                Field::LogBase => {
                    let base: u32 = number(last, &line)?;
                    anyhow::ensure!(
                        base == LOG_BASE,
                        "log base {} is not {}, cannot convert MaxSAT optimum",
                        base,
                        LOG_BASE
                    );
                    return Ok(MaxSatScale {
                        var_count: var_count.context("no variable count before c logBase")?,
                        soft_weight_sum: soft_weight_sum
                            .context("no c softWeightSum before c logBase")?,
                        soft_weight_offset: soft_weight_offset
                            .context("no c softWeightOffset before c logBase")?,
                    });
                }
            }
        }
        anyhow::bail!("no c logBase line")
    }

    /// log10 of the model count for this optimum cost.
    pub fn exponent(&self, optimum: f64) -> Exponent {
        let exponent =
            self.soft_weight_sum - optimum - self.var_count as f64 * self.soft_weight_offset;
        if exponent.fract() == 0. && exponent.abs() < i64::MAX as f64 {
            Exponent::Integer(exponent as i64)
        } else {
            Exponent::Fractional(exponent)
        }
    }
}

/// A log10 model count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Exponent {
    /// narrowed from an integral float
    Integer(i64),
    /// anything else
    Fractional(f64),
}

impl fmt::Display for Exponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exponent::Integer(e) => write!(f, "{}", e),
            Exponent::Fractional(e) => write!(f, "{}", Real(*e)),
        }
    }
}

/// A model count, `10 ** exponent`.
#[derive(Debug, Clone, PartialEq)]
pub enum Power {
    /// non-negative integer exponents
    Exact(BigUint),
    /// everything else
    Approximate(f64),
}

impl fmt::Display for Power {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Power::Exact(n) => write!(f, "{}", n),
            Power::Approximate(x) => write!(f, "{}", Real(*x)),
        }
    }
}

impl Exponent {
    /// `10 ** self`
    /// # Example
    /// ```
    /// use dpmc_eval::normalizer::maxsat::Exponent;
    ///
    /// assert_eq!(Exponent::Integer(4).power().unwrap().to_string(), "10000");
    /// assert_eq!(Exponent::Integer(-1).power().unwrap().to_string(), "0.1");
    /// ```
    pub fn power(&self) -> anyhow::Result<Power> {
        let base = LOG_BASE as f64;
        match *self {
            Exponent::Integer(e) if e >= 0 => {
                let e = u32::try_from(e).with_context(|| format!("exponent {} is too large", e))?;
                Ok(Power::Exact(BigUint::from(LOG_BASE).pow(e)))
            }
            Exponent::Integer(e) => Ok(Power::Approximate(base.powf(e as f64))),
            Exponent::Fractional(e) => Ok(Power::Approximate(base.powf(e))),
        }
    }
}

/// Where the scaling parameters of the current run come from.
pub trait ScaleSource {
    /// Parameters of the MaxSAT encoding at `cnf_path`, as announced in the run log.
    fn scale(&self, cnf_path: &Path) -> anyhow::Result<MaxSatScale>;
}

/// Reads the announced file, relative to a root directory.
#[derive(Debug, Clone)]
pub struct CnfFileScale {
    root: PathBuf,
}

impl CnfFileScale {
    /// Relative paths are resolved against `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ScaleSource for CnfFileScale {
    fn scale(&self, cnf_path: &Path) -> anyhow::Result<MaxSatScale> {
        let path = self.root.join(cnf_path);
        let file = File::open(&path)
            .with_context(|| format!("opening WCNF file {}", path.display()))?;
        MaxSatScale::from_header(BufReader::new(file))
            .with_context(|| format!("reading MaxSAT scaling parameters of {}", path.display()))
    }
}

/// The content of the file, whatever the path.
impl ScaleSource for &str {
    fn scale(&self, _: &Path) -> anyhow::Result<MaxSatScale> {
        MaxSatScale::from_header(self.as_bytes())
    }
}

#[test]
fn conversion() {
    let scale = MaxSatScale::from_header(
        "p wcnf 3 4 100\nc softWeightSum 100\nc softWeightOffset 2\nc logBase 10\n".as_bytes(),
    )
    .unwrap();
    assert_eq!(
        scale,
        MaxSatScale {
            var_count: 3,
            soft_weight_sum: 100.,
            soft_weight_offset: 2.
        }
    );
    let zero = scale.exponent(94.);
    assert_eq!(zero, Exponent::Integer(0));
    assert_eq!(zero.to_string(), "0");
    assert_eq!(zero.power().unwrap().to_string(), "1");
    let four = scale.exponent(90.);
    assert_eq!(four.to_string(), "4");
    assert_eq!(four.power().unwrap(), Power::Exact(10000u32.into()));
    let half = scale.exponent(93.5);
    assert_eq!(half, Exponent::Fractional(0.5));
    assert_eq!(half.to_string(), "0.5");
    assert_eq!(half.power().unwrap(), Power::Approximate(10f64.powf(0.5)));
    let big = scale.exponent(-100.);
    assert_eq!(big.power().unwrap().to_string(), format!("1{}", "0".repeat(194)));
}

#[test]
fn weighted_var_count_overrides_header() {
    let scale = CnfFileScale::new(".")
        .scale("assets/weighted_var_count.wcnf".as_ref())
        .unwrap();
    assert_eq!(scale.var_count, 3);
    // later lines are not read
    assert_eq!(scale.soft_weight_sum, 100.5);
    assert_eq!(scale.exponent(92.), Exponent::Fractional(2.5));
}

#[test]
fn file_relative_to_root() {
    let scale = CnfFileScale::new("assets")
        .scale("bench.wcnf".as_ref())
        .unwrap();
    assert_eq!(scale.exponent(90.), Exponent::Integer(4));
    assert!(CnfFileScale::new("assets").scale("missing.wcnf".as_ref()).is_err());
}

#[test]
fn only_base_ten() {
    let err = MaxSatScale::from_header(
        "p wcnf 3 4 100\nc softWeightSum 100\nc softWeightOffset 2\nc logBase 2\n".as_bytes(),
    )
    .unwrap_err();
    assert!(err.to_string().contains("log base 2"));
}

#[test]
fn incomplete_headers() {
    assert!(MaxSatScale::from_header("p wcnf 3 4 100\nc softWeightSum 100\n".as_bytes()).is_err());
    assert!(MaxSatScale::from_header("c softWeightSum 100\nc softWeightOffset 2\nc logBase 10\n".as_bytes()).is_err());
    assert!(MaxSatScale::from_header("p wcnf x 4 100\n".as_bytes()).is_err());
    let inline: &str = "c weightedVarCount 1\nc softWeightSum 4\nc softWeightOffset 0\nc logBase 10\n";
    assert_eq!(inline.scale("ignored.wcnf".as_ref()).unwrap().var_count, 1);
}
