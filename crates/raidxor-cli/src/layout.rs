//! Builds the array layout from `--encoding`, `--temp` and `--decoding` flags.

use std::collections::BTreeMap;

use anyhow::{Context, bail};
use raidxor::layout::model::{Decoding, Encoding, Equation, Unit, UnitIndex};
use raidxor::LayoutModel;

use crate::cli::ArrayArgs;

fn split_assignment(flag: &str, text: &str) -> anyhow::Result<(String, Equation)> {
    let Some((lhs, rhs)) = text.split_once('=') else {
        bail!("--{flag} {text:?}: expected NAME=EQUATION");
    };
    let eq = rhs
        .parse::<Equation>()
        .with_context(|| format!("--{flag} {text:?}"))?;
    Ok((lhs.trim().to_string(), eq))
}

fn unit_assignments(flag: &str, items: &[String]) -> anyhow::Result<BTreeMap<UnitIndex, Equation>> {
    let mut out = BTreeMap::new();
    for item in items {
        let (lhs, eq) = split_assignment(flag, item)?;
        let unit: UnitIndex = lhs
            .parse()
            .with_context(|| format!("--{flag} {item:?}: bad unit index"))?;
        if out.insert(unit, eq).is_some() {
            bail!("--{flag}: unit {unit} given twice");
        }
    }
    Ok(out)
}

fn temporaries(items: &[String]) -> anyhow::Result<Vec<Equation>> {
    let mut by_index = BTreeMap::new();
    for item in items {
        let (lhs, eq) = split_assignment("temp", item)?;
        let index: usize = lhs
            .strip_prefix('t')
            .and_then(|n| n.parse().ok())
            .with_context(|| format!("--temp {item:?}: expected tN=EQUATION"))?;
        if by_index.insert(index, eq).is_some() {
            bail!("--temp: t{index} given twice");
        }
    }
    if let Some((gap, _)) = by_index.keys().enumerate().find(|(i, t)| i != *t) {
        bail!("--temp: t{gap} is missing");
    }
    Ok(by_index.into_values().collect())
}

/// `build_model` turns the layout flags into a validated [`LayoutModel`].
///
/// With no flags the last disk is the parity of all others.
pub fn build_model(args: &ArrayArgs) -> anyhow::Result<LayoutModel> {
    if args.disks < 2 {
        bail!("an array needs at least 2 disks, got {}", args.disks);
    }
    if args.encodings.is_empty() && args.temps.is_empty() && args.decodings.is_empty() {
        return LayoutModel::single_parity(args.disks - 1).context("build parity layout");
    }

    let mut encodings: BTreeMap<UnitIndex, Encoding> = unit_assignments("encoding", &args.encodings)?;
    if encodings.is_empty() {
        let parity = args.disks - 1;
        encodings.insert(parity, Equation::of_units(0..parity));
    }
    let mut decodings: BTreeMap<UnitIndex, Decoding> = unit_assignments("decoding", &args.decodings)?;
    if let Some(u) = encodings.keys().chain(decodings.keys()).find(|u| **u >= args.disks) {
        bail!("unit {u} is out of range (disks={})", args.disks);
    }

    let units = (0..args.disks)
        .map(|i| {
            let unit = match encodings.remove(&i) {
                Some(enc) => Unit::redundant(format!("r{i}"), enc),
                None => Unit::data(format!("d{i}")),
            };
            match decodings.remove(&i) {
                Some(dec) => unit.with_decoding(dec),
                None => unit,
            }
        })
        .collect();
    LayoutModel::new(units, temporaries(&args.temps)?).context("build layout")
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use raidxor::Role;

    use super::*;
    use crate::cli::Cli;

    fn array_args(flags: &[&str]) -> ArrayArgs {
        let argv = ["raidxor"].iter().chain(flags).chain(&["status"]);
        Cli::try_parse_from(argv).expect("parse").array
    }

    #[test]
    fn default_layout_is_single_parity() {
        let model = build_model(&array_args(&["--disks", "5"])).expect("model");
        assert_eq!(model.n_units(), 5);
        assert_eq!(model.data_units(), &[0, 1, 2, 3]);
        let parity = model.unit(4).expect("parity");
        assert_eq!(parity.role(), Role::Redundant);
        assert_eq!(parity.encoding().map(ToString::to_string).as_deref(), Some("0^1^2^3"));
    }

    #[test]
    fn encodings_and_temps_from_flags() {
        let args = array_args(&[
            "--disks", "5",
            "--temp", "t0=0^1",
            "--encoding", "3=t0^2",
            "--encoding", "4=t0",
            "--decoding", "2=3^4",
        ]);
        let model = build_model(&args).expect("model");
        assert_eq!(model.data_units(), &[0, 1, 2]);
        assert_eq!(model.temps().len(), 1);
        let d2 = model.unit(2).expect("d2");
        assert_eq!(d2.decoding().map(ToString::to_string).as_deref(), Some("3^4"));
    }

    #[test]
    fn bad_flags_are_reported() {
        assert!(build_model(&array_args(&["--disks", "1"])).is_err());
        assert!(build_model(&array_args(&["--encoding", "3"])).is_err());
        assert!(build_model(&array_args(&["--encoding", "9=0^1"])).is_err());
        assert!(build_model(&array_args(&["--temp", "t1=0^1"])).is_err());
        assert!(build_model(&array_args(&["--encoding", "3=0^x"])).is_err());
    }
}
