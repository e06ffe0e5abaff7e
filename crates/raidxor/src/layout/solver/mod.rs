//! Decoding derivation by Gaussian elimination over GF(2).
//!
//! Every surviving unit is a row over the data units: a data unit is its own
//! basis vector, a redundant unit is its expanded encoding. A lost data unit
//! is recoverable exactly when its basis vector lies in the span of the
//! surviving rows; the combination that produces it is the decoding.

#[cfg(test)]
mod solver_tests;

use tracing::debug;

use crate::layout::bits::Bits;
use crate::layout::model::{Decoding, Equation, LayoutModel, Role, UnitIndex};

struct Row {
    pivot: usize,
    value: Bits,
    /// Which survivors were XORed into `value`.
    combo: Bits,
}

/// `derive_decoding` finds an XOR of surviving units that reconstructs `lost`.
///
/// # Arguments
/// * `model` - Layout with current fault flags.
/// * `lost` - The data unit to reconstruct.
///
/// # Returns
/// `None` when `lost` is not a data unit or is not recoverable from the survivors.
#[must_use]
pub fn derive_decoding(model: &LayoutModel, lost: UnitIndex) -> Option<Decoding> {
    if model.unit(lost)?.role() != Role::Data {
        return None;
    }

    let survivors: Vec<UnitIndex> = (0..model.n_units())
        .filter(|u| *u != lost && !model.is_faulty(*u))
        .collect();
    let width = model.n_units();

    let mut basis: Vec<Row> = Vec::with_capacity(survivors.len());
    for (k, &s) in survivors.iter().enumerate() {
        let mut value = model.expand(&Equation::of_units([s]));
        let mut combo = Bits::unit(survivors.len(), k);
        for row in &basis {
            if value.get(row.pivot) {
                value ^= &row.value;
                combo ^= &row.combo;
            }
        }
        if let Some(pivot) = value.first_set() {
            basis.push(Row {
                pivot,
                value,
                combo,
            });
        }
    }

    let mut target = Bits::unit(width, lost);
    let mut used = Bits::zero(survivors.len());
    for row in &basis {
        if target.get(row.pivot) {
            target ^= &row.value;
            used ^= &row.combo;
        }
    }

    if !target.is_zero() {
        debug!(lost, "no decoding in the span of surviving units");
        return None;
    }

    // Redundant sources first so the equation reads like `parity ^ data...`.
    let mut picked: Vec<UnitIndex> = used.ones().map(|k| survivors[k]).collect();
    picked.sort_by_key(|u| (model.unit(*u).map(|x| x.role()) == Some(Role::Data), *u));
    Some(Equation::of_units(picked))
}

/// `derive_missing` installs a derived decoding for every data unit without a usable one.
///
/// # Returns
/// The units that received a new decoding.
pub fn derive_missing(model: &mut LayoutModel) -> Vec<UnitIndex> {
    let missing: Vec<UnitIndex> = model
        .data_units()
        .iter()
        .copied()
        .filter(|u| model.usable_decoding(*u).is_none())
        .collect();
    let mut installed = Vec::new();
    for u in missing {
        let Some(dec) = derive_decoding(model, u) else {
            continue;
        };
        if model.set_decoding(u, dec).is_ok() {
            installed.push(u);
        }
    }
    installed
}
