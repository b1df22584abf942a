/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! The mutable instruction stream used during placement, and block-level
//! editing on top of it: edge splitting, pre-header labels and branch
//! redirection.
//!
//! The stream is an arena of doubly linked nodes.  Handles never move, so the
//! `InstIx` of an original instruction stays valid however much is inserted
//! around it.

use log::{debug, trace};

use crate::data_structures::{BlockIx, InstIx, Label, TypedIxVec};
use crate::interface::{Function, ShrinkWrapError};

//=============================================================================
// InstStream

struct Node<I> {
  insn: I,
  prev: Option<InstIx>,
  next: Option<InstIx>,
  live: bool,
}

pub struct InstStream<I> {
  nodes: Vec<Node<I>>,
  head: Option<InstIx>,
  tail: Option<InstIx>,
  num_live: u32,
}

impl<I: Clone> InstStream<I> {
  /// Original instruction `i` gets handle `InstIx(i)`.
  pub fn from_vec(insns: Vec<I>) -> Self {
    let len = insns.len() as u32;
    let nodes: Vec<Node<I>> = insns
      .into_iter()
      .enumerate()
      .map(|(i, insn)| {
        let i = i as u32;
        Node {
          insn,
          prev: if i > 0 { Some(InstIx::new(i - 1)) } else { None },
          next: if i + 1 < len { Some(InstIx::new(i + 1)) } else { None },
          live: true,
        }
      })
      .collect();
    let head = if len > 0 { Some(InstIx::new(0)) } else { None };
    let tail = if len > 0 { Some(InstIx::new(len - 1)) } else { None };
    Self { nodes, head, tail, num_live: len }
  }

  pub fn len(&self) -> u32 {
    self.num_live
  }

  pub fn get(&self, ix: InstIx) -> &I {
    &self.nodes[ix.get_usize()].insn
  }

  pub fn get_mut(&mut self, ix: InstIx) -> &mut I {
    &mut self.nodes[ix.get_usize()].insn
  }

  pub fn is_live(&self, ix: InstIx) -> bool {
    self.nodes.get(ix.get_usize()).map_or(false, |n| n.live)
  }

  pub fn first(&self) -> Option<InstIx> {
    self.head
  }

  pub fn last(&self) -> Option<InstIx> {
    self.tail
  }

  pub fn next(&self, ix: InstIx) -> Option<InstIx> {
    self.nodes[ix.get_usize()].next
  }

  pub fn prev(&self, ix: InstIx) -> Option<InstIx> {
    self.nodes[ix.get_usize()].prev
  }

  fn alloc(&mut self, insn: I) -> InstIx {
    let ix = InstIx::new(self.nodes.len() as u32);
    self.nodes.push(Node { insn, prev: None, next: None, live: true });
    self.num_live += 1;
    ix
  }

  pub fn insert_after(&mut self, at: InstIx, insn: I) -> InstIx {
    let ix = self.alloc(insn);
    let next = self.nodes[at.get_usize()].next;
    self.nodes[ix.get_usize()].prev = Some(at);
    self.nodes[ix.get_usize()].next = next;
    self.nodes[at.get_usize()].next = Some(ix);
    match next {
      Some(n) => self.nodes[n.get_usize()].prev = Some(ix),
      None => self.tail = Some(ix),
    }
    ix
  }

  pub fn insert_before(&mut self, at: InstIx, insn: I) -> InstIx {
    let ix = self.alloc(insn);
    let prev = self.nodes[at.get_usize()].prev;
    self.nodes[ix.get_usize()].next = Some(at);
    self.nodes[ix.get_usize()].prev = prev;
    self.nodes[at.get_usize()].prev = Some(ix);
    match prev {
      Some(p) => self.nodes[p.get_usize()].next = Some(ix),
      None => self.head = Some(ix),
    }
    ix
  }

  pub fn push_back(&mut self, insn: I) -> InstIx {
    match self.tail {
      Some(t) => self.insert_after(t, insn),
      None => {
        let ix = self.alloc(insn);
        self.head = Some(ix);
        self.tail = Some(ix);
        ix
      }
    }
  }

  /// Unlink `ix`.  The handle must not be used for insertion afterwards.
  pub fn remove(&mut self, ix: InstIx) {
    if !self.is_live(ix) {
      return;
    }
    let (prev, next) = {
      let node = &self.nodes[ix.get_usize()];
      (node.prev, node.next)
    };
    match prev {
      Some(p) => self.nodes[p.get_usize()].next = next,
      None => self.head = next,
    }
    match next {
      Some(n) => self.nodes[n.get_usize()].prev = prev,
      None => self.tail = prev,
    }
    let node = &mut self.nodes[ix.get_usize()];
    node.prev = None;
    node.next = None;
    node.live = false;
    self.num_live -= 1;
  }

  pub fn iter(&self) -> InstStreamIter<I> {
    InstStreamIter { stream: self, cur: self.head }
  }

  pub fn into_vec(self) -> Vec<I> {
    self.iter().map(|(_, insn)| insn.clone()).collect()
  }
}

pub struct InstStreamIter<'a, I> {
  stream: &'a InstStream<I>,
  cur: Option<InstIx>,
}

impl<'a, I> Iterator for InstStreamIter<'a, I> {
  type Item = (InstIx, &'a I);
  fn next(&mut self) -> Option<Self::Item> {
    let ix = self.cur?;
    let node = &self.stream.nodes[ix.get_usize()];
    self.cur = node.next;
    Some((ix, &node.insn))
  }
}

//=============================================================================
// Block-level editing

pub struct BlockEditor<'f, F: Function> {
  func: &'f F,
  pub stream: InstStream<F::Inst>,
  block_start: TypedIxVec<BlockIx, InstIx>,
  block_end: TypedIxVec<BlockIx, InstIx>,
  // The label a branch into the block names, and where it sits.
  entry_labels: TypedIxVec<BlockIx, Option<(Label, InstIx)>>,
  // Does control fall off the end of the block into the next one?
  falls_through: TypedIxVec<BlockIx, bool>,
  next_label: u32,
  num_splits: u32,
}

impl<'f, F: Function> BlockEditor<'f, F> {
  pub fn new(func: &'f F) -> Self {
    let insns = func.insns();
    let mut block_start = TypedIxVec::new();
    let mut block_end = TypedIxVec::new();
    let mut entry_labels = TypedIxVec::new();
    let mut falls_through = TypedIxVec::new();
    for b in func.blocks() {
      let range = func.block_insns(b);
      block_start.push(range.first());
      block_end.push(range.last());

      let mut label = None;
      for ix in range {
        let insn = &insns[ix.get_usize()];
        if func.fence(insn).is_some() || func.is_alignment(insn) {
          continue;
        }
        label = func.label_of(insn).map(|l| (l, ix));
        break;
      }
      entry_labels.push(label);

      let last_real = range
        .into_iter()
        .map(|ix| &insns[ix.get_usize()])
        .filter(|insn| func.fence(insn).is_none())
        .last();
      falls_through.push(last_real.map_or(true, |insn| !func.ends_flow(insn)));
    }
    Self {
      func,
      stream: InstStream::from_vec(insns.to_vec()),
      block_start,
      block_end,
      entry_labels,
      falls_through,
      next_label: func.num_labels(),
      num_splits: 0,
    }
  }

  pub fn fresh_label(&mut self) -> Label {
    let l = Label::new(self.next_label);
    self.next_label += 1;
    l
  }

  pub fn num_labels(&self) -> u32 {
    self.next_label
  }

  pub fn num_splits(&self) -> u32 {
    self.num_splits
  }

  pub fn block_start(&self, b: BlockIx) -> InstIx {
    self.block_start[b]
  }

  pub fn block_end(&self, b: BlockIx) -> InstIx {
    self.block_end[b]
  }

  pub fn entry_label(&self, b: BlockIx) -> Option<(Label, InstIx)> {
    self.entry_labels[b]
  }

  /// Does `from` fall through into `to`?
  pub fn is_fallthrough(&self, from: BlockIx, to: BlockIx) -> bool {
    to.get() == from.get() + 1
      && self.falls_through.get(from).cloned().unwrap_or(false)
  }

  fn block_positions(&self, b: BlockIx) -> Vec<InstIx> {
    let mut res = vec![];
    let mut cur = Some(self.block_start[b]);
    while let Some(ix) = cur {
      res.push(ix);
      if ix == self.block_end[b] {
        break;
      }
      cur = self.stream.next(ix);
    }
    res
  }

  pub fn first_branch(&self, block: BlockIx) -> Option<InstIx> {
    self
      .block_positions(block)
      .into_iter()
      .find(|ix| !self.func.branch_targets(self.stream.get(*ix)).is_empty())
  }

  pub fn return_insn(&self, block: BlockIx) -> Option<InstIx> {
    self
      .block_positions(block)
      .into_iter()
      .find(|ix| self.func.is_return(self.stream.get(*ix)))
  }

  /// Make every branch in `block` that targets `from` target `to` instead.
  pub fn redirect_branches(&mut self, block: BlockIx, from: Label, to: Label) {
    for ix in self.block_positions(block) {
      if self.func.branch_targets(self.stream.get(ix)).contains(&from) {
        trace!("  redirect {:?} in {:?}: {:?} -> {:?}", ix, block, from, to);
        let func = self.func;
        func.retarget_branch(self.stream.get_mut(ix), from, to);
      }
    }
  }

  /// Put a fresh label ahead of the block's alignment and entry label, and
  /// make it the block's entry label.  Redirecting predecessors is left to
  /// the caller.
  pub fn split_block_entry(&mut self, b: BlockIx) -> (Label, InstIx) {
    let label = self.fresh_label();
    let insn = self.func.gen_label(label);
    let ix = self.stream.insert_after(self.block_start[b], insn);
    debug!("split_block_entry: {:?} now entered at {:?}", b, label);
    self.entry_labels[b] = Some((label, ix));
    (label, ix)
  }

  /// Split the edge `from -> to`, returning the new label and its position.
  /// Code inserted after it runs only on that edge.
  pub fn split_edge(
    &mut self, from: BlockIx, to: BlockIx, needs_jump: bool,
  ) -> Result<(Label, InstIx), ShrinkWrapError> {
    let label = self.fresh_label();
    let label_insn = self.func.gen_label(label);
    self.num_splits += 1;

    if self.is_fallthrough(from, to) {
      let ix = self.stream.insert_after(self.block_end[from], label_insn);
      if let Some((target, _)) = self.entry_labels[to] {
        self.redirect_branches(from, target, label);
      }
      debug!("split_edge: {:?} -> {:?} falls into {:?}", from, to, label);
      return Ok((label, ix));
    }

    let target = match self.entry_labels[to] {
      Some((target, _)) => target,
      None => {
        return Err(ShrinkWrapError::InvariantViolation(format!(
          "branch edge {:?} -> {:?} into a block without a label",
          from, to
        )))
      }
    };
    let ix = if needs_jump {
      let ix = self.stream.push_back(label_insn);
      let jump = self.func.gen_jump(target);
      self.stream.push_back(jump);
      ix
    } else {
      self.stream.insert_before(self.block_start[to], label_insn)
    };
    self.redirect_branches(from, target, label);
    debug!(
      "split_edge: {:?} -> {:?} at {:?}{}",
      from,
      to,
      label,
      if needs_jump { " (out of line)" } else { "" }
    );
    Ok((label, ix))
  }

  pub fn into_insns(self) -> Vec<F::Inst> {
    self.stream.into_vec()
  }
}
