//! Growable bit rows with XOR helpers, used as GF(2) vectors over units.

use std::ops::{BitXor, BitXorAssign};

#[cfg(test)]
mod bits_tests;

#[derive(Clone, Eq, PartialEq, Hash, Debug, Default)]
/// Bits stores a byte-backed bit row with bitwise helpers.
pub struct Bits(pub Vec<u8>);

impl Bits {
    #[inline]
    #[must_use]
    /// `zero` returns a row able to hold at least `bits` bits, all cleared.
    ///
    /// # Arguments
    /// * `bits` - Minimum number of addressable bits.
    pub fn zero(bits: usize) -> Self {
        Self(vec![0u8; bits.div_ceil(8)])
    }

    #[inline]
    #[must_use]
    /// `unit` returns a row with only bit `i` set.
    ///
    /// # Arguments
    /// * `bits` - Minimum number of addressable bits.
    /// * `i` - The bit to set.
    pub fn unit(bits: usize, i: usize) -> Self {
        let mut row = Self::zero(bits.max(i + 1));
        row.set(i, true);
        row
    }

    #[inline]
    #[must_use]
    /// `as_bytes` returns the backing bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    #[must_use]
    /// `len_bits` returns the number of addressable bits.
    pub fn len_bits(&self) -> usize {
        self.0.len() * 8
    }

    #[inline]
    #[must_use]
    /// `get` returns the bit value at the provided index; bits past the end read as zero.
    ///
    /// # Arguments
    /// * `i` - The bit index within the row.
    pub fn get(&self, i: usize) -> bool {
        let (byte, bit) = (i >> 3, i & 7);
        self.0.get(byte).is_some_and(|b| (b >> bit) & 1 == 1)
    }

    #[inline]
    /// `set` updates the bit at the provided index, growing the row if needed.
    ///
    /// # Arguments
    /// * `i` - The bit index within the row.
    /// * `val` - Whether the bit should be set.
    pub fn set(&mut self, i: usize, val: bool) {
        let (byte, bit) = (i >> 3, i & 7);
        if byte >= self.0.len() {
            if !val {
                return;
            }
            self.0.resize(byte + 1, 0);
        }
        let m = 1u8 << bit;
        if val {
            self.0[byte] |= m;
        } else {
            self.0[byte] &= !m;
        }
    }

    #[inline]
    /// `xor_in_place` performs an in-place XOR with another row, growing to fit it.
    ///
    /// # Arguments
    /// * `rhs` - The row to XOR into this one.
    pub fn xor_in_place(&mut self, rhs: &Self) {
        if rhs.0.len() > self.0.len() {
            self.0.resize(rhs.0.len(), 0);
        }
        for (a, b) in self.0.iter_mut().zip(rhs.0.iter()) {
            *a ^= *b;
        }
    }

    #[inline]
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    #[must_use]
    /// `first_set` returns the lowest set bit, if any.
    pub fn first_set(&self) -> Option<usize> {
        self.0
            .iter()
            .enumerate()
            .find(|(_, b)| **b != 0)
            .map(|(i, b)| i * 8 + b.trailing_zeros() as usize)
    }

    /// `ones` iterates the indices of set bits in ascending order.
    pub fn ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len_bits()).filter(|i| self.get(*i))
    }
}

impl BitXor<&Self> for Bits {
    type Output = Self;
    #[inline]
    fn bitxor(mut self, rhs: &Self) -> Self::Output {
        self.xor_in_place(rhs);
        self
    }
}

impl BitXorAssign<&Self> for Bits {
    #[inline]
    fn bitxor_assign(&mut self, rhs: &Self) {
        self.xor_in_place(rhs);
    }
}
