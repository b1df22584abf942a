/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Register anticipatability and availability over the per-block usage sets.
//! Together they bound where a callee-saved register must hold its saved
//! state.

use crate::analysis::CfgInfo;
use crate::bit_set::BitSet;
use crate::data_structures::{BlockIx, TypedIxVec};
use crate::dataflow::{
  DataFlowEngine, DataFlowProblem, DataFlowSolution, Direction, GenKill, Meet,
};
use crate::interface::ShrinkWrapError;
use crate::structure::StructureTree;

fn usage_gen_kill(usage: &TypedIxVec<BlockIx, BitSet>, bix: BlockIx) -> GenKill {
  let used = usage.get(bix).cloned().unwrap_or_default();
  GenKill {
    regular_gen: used.clone(),
    regular_kill: BitSet::empty(),
    exception_gen: used,
    exception_kill: BitSet::empty(),
  }
}

/// A register is anticipatable at a point if every path from there reads or
/// writes it.
pub struct RegisterAnticipatability<'a> {
  usage: &'a TypedIxVec<BlockIx, BitSet>,
  num_regs: u32,
}

impl<'a> RegisterAnticipatability<'a> {
  pub fn new(usage: &'a TypedIxVec<BlockIx, BitSet>, num_regs: u32) -> Self {
    Self { usage, num_regs }
  }
}

impl<'a> DataFlowProblem for RegisterAnticipatability<'a> {
  fn name(&self) -> &'static str {
    "RegisterAnticipatability"
  }
  fn direction(&self) -> Direction {
    Direction::Backward
  }
  fn meet(&self) -> Meet {
    Meet::Intersection
  }
  fn num_bits(&self) -> u32 {
    self.num_regs
  }
  fn boundary_value(&self) -> BitSet {
    BitSet::empty()
  }
  fn compute_gen_kill(&self, bix: BlockIx) -> GenKill {
    usage_gen_kill(self.usage, bix)
  }
}

/// A register is available at a point if every path reaching it has read or
/// written it.
pub struct RegisterAvailability<'a> {
  usage: &'a TypedIxVec<BlockIx, BitSet>,
  num_regs: u32,
}

impl<'a> RegisterAvailability<'a> {
  pub fn new(usage: &'a TypedIxVec<BlockIx, BitSet>, num_regs: u32) -> Self {
    Self { usage, num_regs }
  }
}

impl<'a> DataFlowProblem for RegisterAvailability<'a> {
  fn name(&self) -> &'static str {
    "RegisterAvailability"
  }
  fn direction(&self) -> Direction {
    Direction::Forward
  }
  fn meet(&self) -> Meet {
    Meet::Intersection
  }
  fn num_bits(&self) -> u32 {
    self.num_regs
  }
  fn boundary_value(&self) -> BitSet {
    BitSet::empty()
  }
  fn compute_gen_kill(&self, bix: BlockIx) -> GenKill {
    usage_gen_kill(self.usage, bix)
  }
}

#[inline(never)]
pub fn compute_anticipatability(
  usage: &TypedIxVec<BlockIx, BitSet>, num_regs: u32, cfg: &CfgInfo,
  tree: &StructureTree, interrupt: Option<&dyn Fn() -> bool>,
) -> Result<DataFlowSolution, ShrinkWrapError> {
  let problem = RegisterAnticipatability::new(usage, num_regs);
  DataFlowEngine::new(&problem, cfg, tree, interrupt).perform()
}

#[inline(never)]
pub fn compute_availability(
  usage: &TypedIxVec<BlockIx, BitSet>, num_regs: u32, cfg: &CfgInfo,
  tree: &StructureTree, interrupt: Option<&dyn Fn() -> bool>,
) -> Result<DataFlowSolution, ShrinkWrapError> {
  let problem = RegisterAvailability::new(usage, num_regs);
  DataFlowEngine::new(&problem, cfg, tree, interrupt).perform()
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::test_utils::cfg_func;

  fn usage_of(sets: &[&[u32]], num_blocks: u32) -> TypedIxVec<BlockIx, BitSet> {
    let mut usage = TypedIxVec::new();
    usage.resize(num_blocks, BitSet::empty());
    for (b, regs) in sets.iter().enumerate() {
      usage[BlockIx::new(b as u32)] = BitSet::from_vec(regs.to_vec());
    }
    usage
  }

  #[test]
  fn diamond() {
    // 0 -> {1, 2} -> 3; r1 in 1 only, r2 in both arms, r3 in 3.
    let func = cfg_func(&[&[1, 2], &[3], &[3], &[]], &[3]);
    let cfg = CfgInfo::create(&func).unwrap();
    let tree = StructureTree::build(&cfg);
    let usage = usage_of(&[&[], &[1, 2], &[2], &[3]], cfg.num_blocks());
    let rant = compute_anticipatability(&usage, 8, &cfg, &tree, None).unwrap();
    let ravl = compute_availability(&usage, 8, &cfg, &tree, None).unwrap();
    let b = BlockIx::new;

    assert_eq!(rant.in_sets[b(0)].to_vec(), vec![2, 3]);
    assert_eq!(rant.in_sets[b(1)].to_vec(), vec![1, 2, 3]);
    assert_eq!(rant.out_sets[b(3)].to_vec(), Vec::<u32>::new());

    assert!(ravl.in_sets[b(0)].is_empty());
    assert_eq!(ravl.out_sets[b(1)].to_vec(), vec![1, 2]);
    assert_eq!(ravl.in_sets[b(3)].to_vec(), vec![2]);
    assert_eq!(ravl.out_sets[b(3)].to_vec(), vec![2, 3]);
    assert_eq!(ravl.in_sets[cfg.end].to_vec(), vec![2, 3]);
  }

  #[test]
  fn loop_usage_is_anticipated_at_the_header() {
    // 0 -> 1 -> 2 -> {1, 3}; r4 in the latch.
    let func = cfg_func(&[&[1], &[2], &[1, 3], &[]], &[3]);
    let cfg = CfgInfo::create(&func).unwrap();
    let tree = StructureTree::build(&cfg);
    let usage = usage_of(&[&[], &[], &[4], &[]], cfg.num_blocks());
    let rant = compute_anticipatability(&usage, 8, &cfg, &tree, None).unwrap();
    let ravl = compute_availability(&usage, 8, &cfg, &tree, None).unwrap();
    assert!(rant.in_sets[BlockIx::new(1)].contains(4));
    assert!(rant.in_sets[cfg.start].contains(4));
    assert!(!ravl.in_sets[BlockIx::new(1)].contains(4));
    assert!(ravl.in_sets[BlockIx::new(3)].contains(4));
  }

  #[test]
  fn catch_block_sees_thrower_usage() {
    // 0 may throw to 2; 0 -> 1 -> exit; 2 exits.
    let func = crate::test_utils::build_func(
      &[&[1], &[], &[]],
      &[1, 2],
      vec![vec![crate::test_utils::TInst::Throw(2)], vec![], vec![]],
    );
    let cfg = CfgInfo::create(&func).unwrap();
    let tree = StructureTree::build(&cfg);
    let usage = usage_of(&[&[5], &[], &[]], cfg.num_blocks());
    let ravl = compute_availability(&usage, 8, &cfg, &tree, None).unwrap();
    assert!(ravl.in_sets[BlockIx::new(2)].contains(5));
    assert!(ravl.in_sets[BlockIx::new(1)].contains(5));
  }
}
