/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Data structures for the whole crate.

use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Index;
use std::ops::IndexMut;
use std::slice::{Iter, IterMut};

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

//=============================================================================
// Queues

pub type Queue<T> = VecDeque<T>;

//=============================================================================
// Maps

pub type Map<K, V> = FxHashMap<K, V>;

//=============================================================================
// Iteration boilerplate for entities.  The only purpose of this is to support
// constructions of the form
//
//   for ent in startEnt .dotdot( endPlus1Ent ) {
//   }
//
// until such time as |trait Step| is available in stable Rust.

pub trait PlusN {
  fn plus_n(&self, n: usize) -> Self;
}

#[derive(Clone, Copy)]
pub struct MyRange<T> {
  first: T,
  len: usize,
}

impl<T: Copy + PartialOrd + PlusN> MyRange<T> {
  /// Create a new range object.
  pub fn new(from: T, len: usize) -> MyRange<T> {
    MyRange { first: from, len }
  }

  pub fn start(&self) -> T {
    self.first
  }

  pub fn first(&self) -> T {
    assert!(self.len() > 0);
    self.start()
  }

  pub fn last(&self) -> T {
    assert!(self.len() > 0);
    self.start().plus_n(self.len() - 1)
  }

  pub fn last_plus1(&self) -> T {
    self.start().plus_n(self.len())
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn contains(&self, t: T) -> bool {
    t >= self.first && t < self.first.plus_n(self.len)
  }
}

impl<T: Copy + PartialOrd + PlusN + fmt::Debug> fmt::Debug for MyRange<T> {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    if self.len == 0 {
      write!(fmt, "[]")
    } else {
      write!(fmt, "[{:?} .. {:?}]", self.first(), self.last())
    }
  }
}

impl<T: Copy + PartialOrd + PlusN> IntoIterator for MyRange<T> {
  type Item = T;
  type IntoIter = MyIterator<T>;
  fn into_iter(self) -> Self::IntoIter {
    MyIterator { range: self, next: self.first }
  }
}

pub struct MyIterator<T> {
  range: MyRange<T>,
  next: T,
}
impl<T: Copy + PartialOrd + PlusN> Iterator for MyIterator<T> {
  type Item = T;
  fn next(&mut self) -> Option<Self::Item> {
    if self.next >= self.range.first.plus_n(self.range.len) {
      None
    } else {
      let res = Some(self.next);
      self.next = self.next.plus_n(1);
      res
    }
  }
}

//=============================================================================
// Vectors where both the index and element types can be specified (and at
// most 2^32-1 elems can be stored.  What if this overflows?)

pub struct TypedIxVec<TyIx, Ty> {
  vek: Vec<Ty>,
  ty_ix: PhantomData<TyIx>,
}

impl<TyIx, Ty> TypedIxVec<TyIx, Ty>
where
  Ty: Clone,
  TyIx: Copy + Eq + Ord + Zero + PlusN + Into<u32>,
{
  pub fn new() -> Self {
    Self { vek: Vec::new(), ty_ix: PhantomData::<TyIx> }
  }
  pub fn from_vec(vek: Vec<Ty>) -> Self {
    Self { vek, ty_ix: PhantomData::<TyIx> }
  }
  pub fn append(&mut self, other: &mut TypedIxVec<TyIx, Ty>) {
    // FIXME what if this overflows?
    self.vek.append(&mut other.vek);
  }
  pub fn iter(&self) -> Iter<Ty> {
    self.vek.iter()
  }
  pub fn iter_mut(&mut self) -> IterMut<Ty> {
    self.vek.iter_mut()
  }
  pub fn len(&self) -> u32 {
    // FIXME what if this overflows?
    self.vek.len() as u32
  }
  pub fn push(&mut self, item: Ty) {
    // FIXME what if this overflows?
    self.vek.push(item);
  }
  pub fn resize(&mut self, new_len: u32, value: Ty) {
    self.vek.resize(new_len as usize, value);
  }
  pub fn elems(&self) -> &[Ty] {
    &self.vek[..]
  }
  pub fn elems_mut(&mut self) -> &mut [Ty] {
    &mut self.vek[..]
  }
  pub fn range(&self) -> MyRange<TyIx> {
    MyRange::new(TyIx::zero(), self.len() as usize)
  }
  pub fn get(&self, ix: TyIx) -> Option<&Ty> {
    self.vek.get(ix.into() as usize)
  }
}

impl<TyIx, Ty> Index<TyIx> for TypedIxVec<TyIx, Ty>
where
  TyIx: Into<u32>,
{
  type Output = Ty;
  fn index(&self, ix: TyIx) -> &Ty {
    &self.vek[ix.into() as usize]
  }
}

impl<TyIx, Ty> IndexMut<TyIx> for TypedIxVec<TyIx, Ty>
where
  TyIx: Into<u32>,
{
  fn index_mut(&mut self, ix: TyIx) -> &mut Ty {
    &mut self.vek[ix.into() as usize]
  }
}

impl<TyIx, Ty> Clone for TypedIxVec<TyIx, Ty>
where
  Ty: Clone,
{
  fn clone(&self) -> Self {
    Self { vek: self.vek.clone(), ty_ix: PhantomData::<TyIx> }
  }
}

impl<TyIx, Ty: fmt::Debug> fmt::Debug for TypedIxVec<TyIx, Ty> {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "{:?}", self.vek)
  }
}

impl<TyIx, Ty: PartialEq> PartialEq for TypedIxVec<TyIx, Ty> {
  fn eq(&self, other: &Self) -> bool {
    self.vek == other.vek
  }
}

//=============================================================================

pub trait Zero {
  fn zero() -> Self;
}

macro_rules! generate_boilerplate {
  ($TypeIx:ident, $PrintingPrefix:expr) => {
    #[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
    // Firstly, the indexing type (TypeIx)
    pub enum $TypeIx {
      $TypeIx(u32),
    }
    impl $TypeIx {
      #[allow(dead_code)]
      #[inline(always)]
      pub fn new(n: u32) -> Self {
        debug_assert!(n != u32::max_value());
        Self::$TypeIx(n)
      }
      #[allow(dead_code)]
      #[inline(always)]
      pub const fn max_value() -> Self {
        Self::$TypeIx(u32::max_value() - 1)
      }
      #[allow(dead_code)]
      #[inline(always)]
      pub fn get(self) -> u32 {
        match self {
          $TypeIx::$TypeIx(n) => n,
        }
      }
      #[allow(dead_code)]
      #[inline(always)]
      pub fn get_usize(self) -> usize {
        self.get() as usize
      }
      #[allow(dead_code)]
      #[inline(always)]
      pub fn plus(self, delta: u32) -> $TypeIx {
        $TypeIx::$TypeIx(self.get() + delta)
      }
      #[allow(dead_code)]
      #[inline(always)]
      pub fn minus(self, delta: u32) -> $TypeIx {
        $TypeIx::$TypeIx(self.get() - delta)
      }
      #[allow(dead_code)]
      pub fn dotdot(&self, last_plus1: $TypeIx) -> MyRange<$TypeIx> {
        let len = (last_plus1.get() - self.get()) as usize;
        MyRange::new(*self, len)
      }
    }
    impl fmt::Debug for $TypeIx {
      fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}{}", $PrintingPrefix, &self.get())
      }
    }
    impl PlusN for $TypeIx {
      #[inline(always)]
      fn plus_n(&self, n: usize) -> Self {
        self.plus(n as u32)
      }
    }
    impl Into<u32> for $TypeIx {
      #[inline(always)]
      fn into(self) -> u32 {
        self.get()
      }
    }
    impl Zero for $TypeIx {
      #[inline(always)]
      fn zero() -> Self {
        $TypeIx::new(0)
      }
    }
  };
}

generate_boilerplate!(InstIx, "i");

generate_boilerplate!(BlockIx, "b");

generate_boilerplate!(StructIx, "s");

generate_boilerplate!(Label, "L");

generate_boilerplate!(RealReg, "r");

impl StructIx {
  /// Leaves of the structure tree share their numbering with blocks.
  pub fn from_block(bix: BlockIx) -> Self {
    StructIx::new(bix.get())
  }
}
