use super::{derive_decoding, derive_missing};
use crate::layout::model::{Equation, LayoutModel, Unit};

fn expands_to_unit(model: &LayoutModel, eq: &Equation, unit: usize) -> bool {
    model.expand(eq).ones().collect::<Vec<_>>() == vec![unit]
}

#[test]
fn single_parity_derives_parity_plus_others() {
    let mut m = LayoutModel::single_parity(3).expect("layout");
    m.mark_faulty(1).expect("known unit");

    let dec = derive_decoding(&m, 1).expect("recoverable");
    assert_eq!(dec.to_string(), "3^0^2");
    assert!(expands_to_unit(&m, &dec, 1));
}

#[test]
fn two_lost_units_under_single_parity_are_unrecoverable() {
    let mut m = LayoutModel::single_parity(3).expect("layout");
    m.mark_faulty(0).expect("known unit");
    m.mark_faulty(1).expect("known unit");

    assert!(derive_decoding(&m, 0).is_none());
    assert!(derive_decoding(&m, 1).is_none());
}

#[test]
fn two_parity_layout_recovers_double_loss() {
    // p4 = d0^d1, p5 = d1^d2^d3, p6 = d0^d2
    let units = vec![
        Unit::data("d0"),
        Unit::data("d1"),
        Unit::data("d2"),
        Unit::data("d3"),
        Unit::redundant("p4", Equation::of_units([0, 1])),
        Unit::redundant("p5", Equation::of_units([1, 2, 3])),
        Unit::redundant("p6", Equation::of_units([0, 2])),
    ];
    let mut m = LayoutModel::new(units, vec![]).expect("layout");
    m.mark_faulty(0).expect("known unit");
    m.mark_faulty(1).expect("known unit");

    let d0 = derive_decoding(&m, 0).expect("d0 recoverable");
    let d1 = derive_decoding(&m, 1).expect("d1 recoverable");
    assert!(expands_to_unit(&m, &d0, 0));
    assert!(expands_to_unit(&m, &d1, 1));
    for src in d0.sources().iter().chain(d1.sources()) {
        assert!(matches!(src, crate::layout::model::Source::Unit(u) if *u >= 2));
    }
}

#[test]
fn redundant_units_never_get_decodings() {
    let m = LayoutModel::single_parity(2).expect("layout");
    assert!(derive_decoding(&m, 2).is_none());
    assert!(derive_decoding(&m, 42).is_none());
}

#[test]
fn unprotected_unit_is_unrecoverable() {
    let units = vec![
        Unit::data("d0"),
        Unit::data("d1"),
        Unit::redundant("p", Equation::of_units([0])),
    ];
    let mut m = LayoutModel::new(units, vec![]).expect("layout");
    m.mark_faulty(1).expect("known unit");
    assert!(derive_decoding(&m, 1).is_none());

    m.mark_faulty(0).expect("known unit");
    let dec = derive_decoding(&m, 0).expect("d0 mirrored by p");
    assert_eq!(dec.to_string(), "2");
}

#[test]
fn derive_missing_fills_only_dropped_decodings() {
    let mut m = LayoutModel::single_parity(3).expect("layout");
    m.mark_faulty(2).expect("known unit");
    // Units 0 and 1 lost their decodings (both read unit 2); unit 2 kept its own.
    let installed = derive_missing(&mut m);
    // Nothing else survives to rebuild 0 or 1 once unit 2 is gone.
    assert!(installed.is_empty());
    assert!(m.usable_decoding(2).is_some());
}

#[test]
fn derive_missing_installs_usable_decodings() {
    let units = vec![Unit::data("d0"), Unit::data("d1"), Unit::redundant("p", Equation::of_units([0, 1]))];
    let mut m = LayoutModel::new(units, vec![]).expect("layout");
    assert_eq!(derive_missing(&mut m), vec![0, 1]);
    assert_eq!(m.usable_decoding(0).map(ToString::to_string), Some("2^1".to_string()));
    assert_eq!(m.usable_decoding(1).map(ToString::to_string), Some("2^0".to_string()));
}
