/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! A growable dense bit set, used for both register sets and block sets.
//! Every data-flow value in the crate is one of these.

use std::cmp;
use std::fmt;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

const BLOCK_SIZE: usize = 64;

#[derive(Clone, Default)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct BitSet {
  bits: Vec<u64>,
}

impl BitSet {
  pub fn empty() -> Self {
    Self { bits: Vec::new() }
  }

  /// The set `{0 .. n-1}`.
  pub fn full(n: u32) -> Self {
    let n = n as usize;
    let mut bits = vec![!0u64; n / BLOCK_SIZE];
    if n % BLOCK_SIZE != 0 {
      bits.push((1u64 << (n % BLOCK_SIZE)) - 1);
    }
    Self { bits }
  }

  pub fn unit(item: u32) -> Self {
    let mut s = Self::empty();
    s.insert(item);
    s
  }

  pub fn from_vec(vec: Vec<u32>) -> Self {
    let mut s = Self::empty();
    for item in vec {
      s.insert(item);
    }
    s
  }

  #[inline(always)]
  fn word_and_mask(item: u32) -> (usize, u64) {
    let item = item as usize;
    (item / BLOCK_SIZE, 1u64 << (item % BLOCK_SIZE))
  }

  pub fn insert(&mut self, item: u32) {
    let (word, mask) = Self::word_and_mask(item);
    if word >= self.bits.len() {
      self.bits.resize(word + 1, 0);
    }
    self.bits[word] |= mask;
  }

  /// If the item is set, clear it.  Do nothing otherwise.
  pub fn delete(&mut self, item: u32) {
    let (word, mask) = Self::word_and_mask(item);
    if word < self.bits.len() {
      self.bits[word] &= !mask;
    }
  }

  pub fn contains(&self, item: u32) -> bool {
    let (word, mask) = Self::word_and_mask(item);
    word < self.bits.len() && (self.bits[word] & mask) != 0
  }

  pub fn clear(&mut self) {
    self.bits.clear();
  }

  pub fn is_empty(&self) -> bool {
    self.bits.iter().all(|w| *w == 0)
  }

  pub fn card(&self) -> usize {
    self.bits.iter().map(|w| w.count_ones() as usize).sum()
  }

  pub fn union(&mut self, other: &Self) {
    if other.bits.len() > self.bits.len() {
      self.bits.resize(other.bits.len(), 0);
    }
    for (w, o) in self.bits.iter_mut().zip(other.bits.iter()) {
      *w |= *o;
    }
  }

  pub fn intersect(&mut self, other: &Self) {
    let common = cmp::min(self.bits.len(), other.bits.len());
    for i in 0..common {
      self.bits[i] &= other.bits[i];
    }
    self.bits.truncate(common);
  }

  /// Set difference: removes every element of `other`.
  pub fn remove(&mut self, other: &Self) {
    for (w, o) in self.bits.iter_mut().zip(other.bits.iter()) {
      *w &= !*o;
    }
  }

  /// Complement within the universe `{0 .. width-1}`.
  pub fn complement(&self, width: u32) -> Self {
    let mut res = Self::full(width);
    res.remove(self);
    res
  }

  pub fn intersects(&self, other: &Self) -> bool {
    self.bits.iter().zip(other.bits.iter()).any(|(a, b)| (a & b) != 0)
  }

  pub fn is_subset_of(&self, other: &Self) -> bool {
    for (i, w) in self.bits.iter().enumerate() {
      let o = other.bits.get(i).cloned().unwrap_or(0);
      if (*w & !o) != 0 {
        return false;
      }
    }
    true
  }

  pub fn iter(&self) -> BitSetIter {
    BitSetIter { set: self, word: 0, pending: self.bits.first().cloned() }
  }

  pub fn to_vec(&self) -> Vec<u32> {
    self.iter().collect()
  }

  /// The smallest element, if any.
  pub fn first(&self) -> Option<u32> {
    self.iter().next()
  }
}

impl PartialEq for BitSet {
  // Trailing zero words are not significant.
  fn eq(&self, other: &Self) -> bool {
    let n = cmp::max(self.bits.len(), other.bits.len());
    for i in 0..n {
      let a = self.bits.get(i).cloned().unwrap_or(0);
      let b = other.bits.get(i).cloned().unwrap_or(0);
      if a != b {
        return false;
      }
    }
    true
  }
}
impl Eq for BitSet {}

impl fmt::Debug for BitSet {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "{{")?;
    let mut first = true;
    for item in self.iter() {
      if !first {
        write!(fmt, ", ")?;
      }
      first = false;
      write!(fmt, "{}", item)?;
    }
    write!(fmt, "}}")
  }
}

impl std::iter::FromIterator<u32> for BitSet {
  fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
    let mut s = BitSet::empty();
    for item in iter {
      s.insert(item);
    }
    s
  }
}

pub struct BitSetIter<'a> {
  set: &'a BitSet,
  word: usize,
  pending: Option<u64>,
}

impl<'a> Iterator for BitSetIter<'a> {
  type Item = u32;
  fn next(&mut self) -> Option<u32> {
    loop {
      let bits = self.pending?;
      if bits != 0 {
        let tz = bits.trailing_zeros() as usize;
        self.pending = Some(bits & (bits - 1));
        return Some((self.word * BLOCK_SIZE + tz) as u32);
      }
      self.word += 1;
      self.pending = self.set.bits.get(self.word).cloned();
    }
  }
}
