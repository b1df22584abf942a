/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Control-flow analysis results for a Function: predecessors, successors,
//! reverse postorder and dominators, over the real blocks plus two synthetic
//! ones, START and END.

use log::debug;
use smallvec::SmallVec;

use crate::bit_set::BitSet;
use crate::data_structures::{BlockIx, TypedIxVec};
use crate::interface::{Fence, Function};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CfgError {
  /// At least one block is dead.
  UnreachableBlocks,

  /// A block has no instructions at all.
  EmptyBlock(BlockIx),

  /// A block's instruction range is not bracketed by its fences.
  MissingFence(BlockIx),
}

impl ToString for CfgError {
  fn to_string(&self) -> String {
    match self {
      CfgError::UnreachableBlocks => {
        "at least one block is unreachable".to_string()
      }
      CfgError::EmptyBlock(bix) => format!("block {:?} is empty", bix),
      CfgError::MissingFence(bix) => {
        format!("block {:?} is not bracketed by its fences", bix)
      }
    }
  }
}

pub type BlockList = SmallVec<[BlockIx; 4]>;

fn add_edge(
  succ_map: &mut TypedIxVec<BlockIx, BlockList>,
  pred_map: &mut TypedIxVec<BlockIx, BlockList>, from: BlockIx, to: BlockIx,
) {
  if !succ_map[from].contains(&to) {
    succ_map[from].push(to);
    pred_map[to].push(from);
  }
}

pub struct CfgInfo {
  /// Blocks `0 .. num_real_blocks` are the function's.
  pub num_real_blocks: u32,
  pub start: BlockIx,
  pub end: BlockIx,
  pub entry: BlockIx,

  // All these TypedIxVecs contain one element per block, START and END
  // included.
  pub succ_map: TypedIxVec<BlockIx, BlockList>,
  pub pred_map: TypedIxVec<BlockIx, BlockList>,
  pub exc_succ_map: TypedIxVec<BlockIx, BlockList>,
  pub exc_pred_map: TypedIxVec<BlockIx, BlockList>,

  /// Reverse postorder over regular and exception edges, from START.  END is
  /// absent when no block exits the method.
  pub rpo: Vec<BlockIx>,
  /// Position of each block in `rpo`; `u32::max_value()` if absent.
  pub rpo_index: TypedIxVec<BlockIx, u32>,

  /// This maps from a block to the set of blocks it is dominated by.
  pub dom_map: TypedIxVec<BlockIx, BitSet>,

  /// The block laid out immediately before each real block.
  pub layout_prev: TypedIxVec<BlockIx, Option<BlockIx>>,
}

impl CfgInfo {
  #[inline(never)]
  pub fn create<F: Function>(func: &F) -> Result<Self, CfgError> {
    let num_real_blocks = func.blocks().len() as u32;
    let start = BlockIx::new(num_real_blocks);
    let end = BlockIx::new(num_real_blocks + 1);
    let num_blocks = num_real_blocks + 2;
    let entry = func.entry_block();

    for b in func.blocks() {
      let range = func.block_insns(b);
      if range.len() == 0 {
        return Err(CfgError::EmptyBlock(b));
      }
      let insns = func.insns();
      let first = func.fence(&insns[range.first().get_usize()]);
      let last = func.fence(&insns[range.last().get_usize()]);
      if first != Some(Fence::BlockStart(b)) || last != Some(Fence::BlockEnd(b))
      {
        return Err(CfgError::MissingFence(b));
      }
    }

    // === BEGIN compute successor and predecessor maps ===
    let mut succ_map = TypedIxVec::<BlockIx, BlockList>::new();
    let mut pred_map = TypedIxVec::<BlockIx, BlockList>::new();
    let mut exc_succ_map = TypedIxVec::<BlockIx, BlockList>::new();
    let mut exc_pred_map = TypedIxVec::<BlockIx, BlockList>::new();
    succ_map.resize(num_blocks, BlockList::new());
    pred_map.resize(num_blocks, BlockList::new());
    exc_succ_map.resize(num_blocks, BlockList::new());
    exc_pred_map.resize(num_blocks, BlockList::new());

    add_edge(&mut succ_map, &mut pred_map, start, entry);
    for b in func.blocks() {
      for s in func.block_succs(b) {
        add_edge(&mut succ_map, &mut pred_map, b, s);
      }
      if func.block_exits_method(b) {
        add_edge(&mut succ_map, &mut pred_map, b, end);
      }
      for h in func.block_exception_succs(b) {
        add_edge(&mut exc_succ_map, &mut exc_pred_map, b, h);
      }
    }
    // === END compute successor and predecessor maps ===

    // === BEGIN compute reverse postorder ===
    //
    // Iterative DFS with an explicit stack of (block, next successor).
    let mut visited = TypedIxVec::<BlockIx, bool>::new();
    visited.resize(num_blocks, false);
    let mut post_ord = Vec::<BlockIx>::new();
    let mut stack = vec![(start, 0usize)];
    visited[start] = true;
    while let Some((bix, next)) = stack.pop() {
      let num_succs = succ_map[bix].len() + exc_succ_map[bix].len();
      if next < num_succs {
        stack.push((bix, next + 1));
        let succ = if next < succ_map[bix].len() {
          succ_map[bix][next]
        } else {
          exc_succ_map[bix][next - succ_map[bix].len()]
        };
        if !visited[succ] {
          visited[succ] = true;
          stack.push((succ, 0));
        }
      } else {
        post_ord.push(bix);
      }
    }

    for b in func.blocks() {
      if !visited[b] {
        debug!("CfgInfo::create: {:?} is unreachable", b);
        return Err(CfgError::UnreachableBlocks);
      }
    }

    let rpo: Vec<BlockIx> = post_ord.into_iter().rev().collect();
    let mut rpo_index = TypedIxVec::<BlockIx, u32>::new();
    rpo_index.resize(num_blocks, u32::max_value());
    for (i, bix) in rpo.iter().enumerate() {
      rpo_index[*bix] = i as u32;
    }
    // === END compute reverse postorder ===

    let dom_map =
      calc_dominators(&pred_map, &exc_pred_map, &rpo, start, num_blocks);

    let mut layout_prev = TypedIxVec::<BlockIx, Option<BlockIx>>::new();
    layout_prev.resize(num_blocks, None);
    for b in func.blocks() {
      if b.get() > 0 {
        layout_prev[b] = Some(b.minus(1));
      }
    }

    Ok(CfgInfo {
      num_real_blocks,
      start,
      end,
      entry,
      succ_map,
      pred_map,
      exc_succ_map,
      exc_pred_map,
      rpo,
      rpo_index,
      dom_map,
      layout_prev,
    })
  }

  /// Number of blocks including START and END.
  pub fn num_blocks(&self) -> u32 {
    self.num_real_blocks + 2
  }

  pub fn is_real(&self, bix: BlockIx) -> bool {
    bix.get() < self.num_real_blocks
  }

  pub fn dominates(&self, dominator: BlockIx, bix: BlockIx) -> bool {
    self.dom_map[bix].contains(dominator.get())
  }

  /// An edge `from -> to` is a back edge when it does not advance in reverse
  /// postorder.
  pub fn is_back_edge(&self, from: BlockIx, to: BlockIx) -> bool {
    self.rpo_index[from] >= self.rpo_index[to]
  }

  /// Regular and exception successors.
  pub fn flow_succs<'a>(
    &'a self, bix: BlockIx,
  ) -> impl Iterator<Item = BlockIx> + 'a {
    self.succ_map[bix].iter().chain(self.exc_succ_map[bix].iter()).cloned()
  }

  /// Regular and exception predecessors.
  pub fn flow_preds<'a>(
    &'a self, bix: BlockIx,
  ) -> impl Iterator<Item = BlockIx> + 'a {
    self.pred_map[bix].iter().chain(self.exc_pred_map[bix].iter()).cloned()
  }

  pub fn all_blocks(&self) -> Vec<BlockIx> {
    (0..self.num_blocks()).map(BlockIx::new).collect()
  }
}

// Calculate the dominance relationship over regular and exception edges.  The
// resulting vector maps each block to the set of blocks that dominate it.
// This algorithm is from Fig 7.14 of Muchnick 1997.  Blocks absent from `rpo`
// are unreachable and get an empty set.
#[inline(never)]
fn calc_dominators(
  pred_map: &TypedIxVec<BlockIx, BlockList>,
  exc_pred_map: &TypedIxVec<BlockIx, BlockList>, rpo: &Vec<BlockIx>,
  start: BlockIx, num_blocks: u32,
) -> TypedIxVec<BlockIx, BitSet> {
  debug!("calc_dominators: begin");
  let mut reachable = BitSet::empty();
  for bix in rpo {
    reachable.insert(bix.get());
  }
  let mut dom_map = TypedIxVec::<BlockIx, BitSet>::new();
  dom_map.resize(num_blocks, BitSet::empty());
  for bix in rpo {
    dom_map[*bix] = reachable.clone();
  }
  dom_map[start] = BitSet::unit(start.get());

  let mut num_passes = 0;
  loop {
    num_passes += 1;
    let mut change = false;
    for bix in rpo.iter().cloned() {
      if bix == start {
        continue;
      }
      let mut doms = reachable.clone();
      for pred in pred_map[bix].iter().chain(exc_pred_map[bix].iter()) {
        if reachable.contains(pred.get()) {
          doms.intersect(&dom_map[*pred]);
        }
      }
      doms.insert(bix.get());
      if doms != dom_map[bix] {
        change = true;
        dom_map[bix] = doms;
      }
    }
    if !change {
      break;
    }
  }
  debug!("calc_dominators: end after {} passes", num_passes);
  dom_map
}
