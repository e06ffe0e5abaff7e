use super::*;

fn two_parity() -> LayoutModel {
    // d0 d1 d2 d3, p4 = d0^d1 (via t0) ^ d2, p5 = d0^d1 (via t0) ^ d3
    let units = vec![
        Unit::data("d0"),
        Unit::data("d1"),
        Unit::data("d2"),
        Unit::data("d3"),
        Unit::redundant("p4", "t0^2".parse().expect("equation")),
        Unit::redundant("p5", "t0^3".parse().expect("equation")),
    ];
    let temps = vec!["0^1".parse().expect("equation")];
    LayoutModel::new(units, temps).expect("valid layout")
}

#[test]
fn equation_parses_and_displays() {
    let eq: Equation = "3 ^ 0^t1".parse().expect("equation");
    assert_eq!(
        eq.sources(),
        &[Source::Unit(3), Source::Unit(0), Source::Temp(1)]
    );
    assert_eq!(eq.to_string(), "3^0^t1");
    assert!("".parse::<Equation>().is_err());
    assert!("0^x".parse::<Equation>().is_err());
}

#[test]
fn single_parity_builds_encoding_and_decodings() {
    let m = LayoutModel::single_parity(3).expect("layout");
    assert_eq!(m.n_units(), 4);
    assert_eq!(m.data_units(), &[0, 1, 2]);
    assert_eq!(m.redundant_units().collect::<Vec<_>>(), vec![3]);
    assert_eq!(
        m.unit(3).and_then(Unit::encoding).map(ToString::to_string),
        Some("0^1^2".to_string())
    );
    assert_eq!(
        m.unit(2).and_then(Unit::decoding).map(ToString::to_string),
        Some("3^0^1".to_string())
    );
}

#[test]
fn new_rejects_layout_without_data() {
    let units = vec![Unit::redundant("p", Equation::of_units([0]))];
    assert!(matches!(LayoutModel::new(units, vec![]), Err(Error::Layout(_))));
}

#[test]
fn new_rejects_dangling_references() {
    let units = vec![Unit::data("d0"), Unit::redundant("p", Equation::of_units([0, 7]))];
    assert!(matches!(LayoutModel::new(units, vec![]), Err(Error::Layout(_))));

    let units = vec![Unit::data("d0"), Unit::redundant("p", "t3".parse().expect("eq"))];
    assert!(matches!(LayoutModel::new(units, vec![]), Err(Error::Layout(_))));
}

#[test]
fn new_rejects_encoding_on_redundant_unit() {
    let units = vec![
        Unit::data("d0"),
        Unit::redundant("p1", Equation::of_units([0])),
        Unit::redundant("p2", Equation::of_units([0, 1])),
    ];
    let err = LayoutModel::new(units, vec![]).expect_err("must reject");
    assert!(err.to_string().contains("depends on redundant unit 1"));
}

#[test]
fn new_rejects_cyclic_temporaries() {
    let units = vec![Unit::data("d0"), Unit::redundant("p", "t0".parse().expect("eq"))];
    let temps = vec!["0^t1".parse().expect("eq"), "t0".parse().expect("eq")];
    let err = LayoutModel::new(units, temps).expect_err("cycle");
    assert!(err.to_string().contains("cycle"));
}

#[test]
fn new_rejects_self_referencing_decoding() {
    let units = vec![
        Unit::data("d0").with_decoding(Equation::of_units([1, 0])),
        Unit::redundant("p", Equation::of_units([0])),
    ];
    assert!(matches!(LayoutModel::new(units, vec![]), Err(Error::Layout(_))));
}

#[test]
fn temp_order_puts_dependencies_first() {
    let units = vec![
        Unit::data("d0"),
        Unit::data("d1"),
        Unit::data("d2"),
        Unit::redundant("p", "t1".parse().expect("eq")),
    ];
    let temps = vec!["0^1".parse().expect("eq"), "t0^2".parse().expect("eq")];
    let m = LayoutModel::new(units, temps).expect("layout");
    assert_eq!(m.temp_order(), &[0, 1]);
    let enc = m.unit(3).and_then(Unit::encoding).cloned().expect("encoding");
    assert_eq!(m.temps_for([&enc]), vec![0, 1]);
}

#[test]
fn expand_follows_temps_and_redundant_units() {
    let m = two_parity();
    let row = m.expand(&"4^5".parse().expect("eq"));
    // (d0^d1^d2) ^ (d0^d1^d3) = d2 ^ d3
    assert_eq!(row.ones().collect::<Vec<_>>(), vec![2, 3]);
}

#[test]
fn mark_faulty_invalidates_dependent_decodings_through_temps() {
    let mut m = two_parity();
    m.set_decoding(2, "4^t0".parse().expect("eq")).expect("decoding");
    m.set_decoding(3, "5^0^1".parse().expect("eq")).expect("decoding");

    assert!(m.mark_faulty(1).expect("known unit"));
    assert!(m.unit(2).and_then(Unit::decoding).is_none());
    assert!(m.unit(3).and_then(Unit::decoding).is_none());
    assert!(!m.mark_faulty(1).expect("known unit"));
    assert_eq!(m.faulty_units().collect::<Vec<_>>(), vec![1]);
}

#[test]
fn own_decoding_survives_own_fault() {
    let mut m = LayoutModel::single_parity(3).expect("layout");
    m.mark_faulty(2).expect("known unit");
    assert!(m.usable_decoding(2).is_some());
    assert!(m.usable_decoding(0).is_none());
}

#[test]
fn set_decoding_rejects_faulty_sources_and_redundant_targets() {
    let mut m = LayoutModel::single_parity(2).expect("layout");
    m.mark_faulty(1).expect("known unit");
    assert!(m.set_decoding(0, Equation::of_units([2, 1])).is_err());
    assert!(m.set_decoding(2, Equation::of_units([0, 1])).is_err());
    assert!(m.mark_faulty(9).is_err());
}
