use super::*;

#[test]
fn zero_rounds_up_to_whole_bytes() {
    assert_eq!(Bits::zero(0).as_bytes(), &[] as &[u8]);
    assert_eq!(Bits::zero(1).as_bytes(), &[0u8]);
    assert_eq!(Bits::zero(8).as_bytes(), &[0u8]);
    assert_eq!(Bits::zero(9).as_bytes(), &[0u8, 0]);
}

#[test]
fn get_set_roundtrip_and_bit_order() {
    let mut a = Bits::zero(16);

    a.set(0, true);
    assert!(a.get(0));
    assert_eq!(a.as_bytes()[0], 0b0000_0001);

    a.set(7, true);
    assert_eq!(a.as_bytes()[0], 0b1000_0001);

    a.set(8, true);
    assert_eq!(a.as_bytes()[1], 0b0000_0001);

    a.set(7, false);
    assert!(!a.get(7));
    assert_eq!(a.as_bytes()[0], 0b0000_0001);
}

#[test]
fn get_past_end_is_false_and_set_grows() {
    let mut a = Bits::zero(4);
    assert!(!a.get(100));

    a.set(100, false);
    assert_eq!(a.as_bytes().len(), 1);

    a.set(20, true);
    assert!(a.get(20));
    assert_eq!(a.len_bits(), 24);
}

#[test]
fn xor_grows_to_longer_operand() {
    let mut short = Bits(vec![0xFF]);
    let long = Bits(vec![0x0F, 0xAA]);
    short ^= &long;
    assert_eq!(short.as_bytes(), &[0xF0, 0xAA]);

    let combined = Bits(vec![0x01]) ^ &Bits(vec![0x01]);
    assert!(combined.is_zero());
}

#[test]
fn first_set_and_ones_report_indices() {
    let mut a = Bits::zero(24);
    assert_eq!(a.first_set(), None);

    a.set(3, true);
    a.set(17, true);
    assert_eq!(a.first_set(), Some(3));
    assert_eq!(a.ones().collect::<Vec<_>>(), vec![3, 17]);
}

#[test]
fn unit_sets_single_bit() {
    let row = Bits::unit(4, 9);
    assert_eq!(row.ones().collect::<Vec<_>>(), vec![9]);
}
