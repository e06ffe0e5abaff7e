use super::*;
use crate::layout::model::{Equation, Source};
use rand::Rng;
use rand::seq::SliceRandom;

fn random_chunk(rng: &mut impl Rng, block_size: usize, blocks: usize) -> ChunkBuf {
    let mut c = ChunkBuf::zeroed(block_size, blocks);
    rng.fill(c.as_mut_slice());
    c
}

#[test]
fn combine_encodes_two_blocks_independently() {
    let mut a = ChunkBuf::zeroed(64, 2);
    a.block_mut(0).fill(3);
    a.block_mut(1).fill(15);
    let mut b = ChunkBuf::zeroed(64, 2);
    b.block_mut(0).fill(180);
    b.block_mut(1).fill(23);

    let mut out = ChunkBuf::filled(64, 2, 0xEE);
    combine(&mut out, &[&a, &b], DEFAULT_XOR_BATCH).expect("same shape");

    assert!(out.block(0).iter().all(|x| *x == 3 ^ 180));
    assert!(out.block(1).iter().all(|x| *x == 15 ^ 23));
}

#[test]
fn combine_single_source_copies_it() {
    let src = ChunkBuf::filled(8, 3, 0x5A);
    let mut out = ChunkBuf::zeroed(8, 3);
    combine(&mut out, &[&src], 4).expect("same shape");
    assert_eq!(out, src);
}

#[test]
fn combine_is_order_independent() {
    let mut rng = rand::rng();
    let mut sources: Vec<ChunkBuf> = (0..7).map(|_| random_chunk(&mut rng, 37, 3)).collect();

    let mut expected = ChunkBuf::zeroed(37, 3);
    let refs: Vec<&ChunkBuf> = sources.iter().collect();
    combine(&mut expected, &refs, DEFAULT_XOR_BATCH).expect("same shape");

    for _ in 0..10 {
        sources.shuffle(&mut rng);
        let refs: Vec<&ChunkBuf> = sources.iter().collect();
        let mut out = ChunkBuf::zeroed(37, 3);
        combine(&mut out, &refs, DEFAULT_XOR_BATCH).expect("same shape");
        assert_eq!(out, expected);
    }
}

#[test]
fn combine_result_does_not_depend_on_batch_size() {
    let mut rng = rand::rng();
    let sources: Vec<ChunkBuf> = (0..9).map(|_| random_chunk(&mut rng, 13, 2)).collect();
    let refs: Vec<&ChunkBuf> = sources.iter().collect();

    let mut naive = vec![0u8; 26];
    for s in &sources {
        for (a, b) in naive.iter_mut().zip(s.as_slice()) {
            *a ^= *b;
        }
    }

    for batch in [0, 1, 2, 3, 4, 8, 16] {
        let mut out = ChunkBuf::zeroed(13, 2);
        combine(&mut out, &refs, batch).expect("same shape");
        assert_eq!(out.as_slice(), naive.as_slice(), "batch={batch}");
    }
}

#[test]
fn combine_rejects_shape_mismatch_without_touching_target() {
    let a = ChunkBuf::filled(16, 2, 1);
    let b = ChunkBuf::filled(16, 3, 2);
    let mut out = ChunkBuf::filled(16, 2, 9);

    let err = combine(&mut out, &[&a, &b], 4).expect_err("mismatch");
    assert_eq!(
        err,
        Error::ShapeMismatch {
            expected: (16, 2),
            actual: (16, 3)
        }
    );
    assert!(out.as_slice().iter().all(|x| *x == 9));

    let c = ChunkBuf::filled(32, 1, 2);
    assert!(combine(&mut out, &[&a, &c], 4).is_err());
}

#[test]
fn combine_rejects_empty_source_list() {
    let mut out = ChunkBuf::zeroed(4, 1);
    assert!(matches!(combine(&mut out, &[], 4), Err(Error::Layout(_))));
}

#[test]
fn from_bytes_requires_whole_blocks() {
    assert!(ChunkBuf::from_bytes(4, vec![0; 8]).is_ok());
    assert!(ChunkBuf::from_bytes(4, vec![0; 6]).is_err());
    assert!(ChunkBuf::from_bytes(0, vec![]).is_err());
}

#[test]
fn line_buffers_compute_temps_then_targets() {
    let mut bufs = LineBuffers::try_alloc(4, 1, 8, 1).expect("alloc");
    for (u, v) in [(0usize, 0x01u8), (1, 0x02), (2, 0x04)] {
        bufs.unit_mut(u).expect("unit").as_mut_slice().fill(v);
    }

    bufs.compute(Source::Temp(0), &"0^1".parse().expect("eq"), 4)
        .expect("temp");
    bufs.compute(Source::Unit(3), &"t0^2".parse().expect("eq"), 4)
        .expect("unit");

    assert!(bufs.temp(0).expect("temp").as_slice().iter().all(|x| *x == 0x03));
    assert!(bufs.unit(3).expect("unit").as_slice().iter().all(|x| *x == 0x07));
}

#[test]
fn line_buffers_refuse_lent_or_self_sources() {
    let mut bufs = LineBuffers::try_alloc(3, 0, 8, 1).expect("alloc");
    let lent = bufs.take_unit(1).expect("present");
    assert!(!bufs.all_present());

    assert!(bufs.compute(Source::Unit(2), &Equation::of_units([0, 1]), 4).is_err());
    assert!(bufs.unit(2).is_some(), "target restored after failure");

    assert!(bufs.compute(Source::Unit(2), &Equation::of_units([0, 2]), 4).is_err());

    bufs.put_unit(1, lent);
    assert!(bufs.all_present());
    assert_eq!(LineBuffers::footprint(3, 0, 8, 1), 24);
}
