/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! A tiny instruction set for the library's unit tests.  Block `b` is entered
//! through label `b`; branches name labels.

use smallvec::{smallvec, SmallVec};

use crate::bit_set::BitSet;
use crate::data_structures::{BlockIx, InstIx, Label, MyRange, RealReg};
use crate::interface::{
  Fence, Function, Linkage, PreservedRegisterMap, SaveRestoreEffect,
};

#[derive(Clone, Debug, PartialEq)]
pub enum TInst {
  Start(u32),
  End(u32),
  Lbl(u32),
  Align,
  Use(u32),
  /// May throw to the given catch block.
  Throw(u32),
  /// Carries a GC map; the field is the register save description.
  Call(u32),
  /// Conditional branch: falls through when not taken.
  CondBr(Vec<u32>),
  /// Unconditional branch to one of the labels.
  Br(Vec<u32>),
  Ret,
  Save(u32, i32),
  Restore(u32, i32),
  SaveM(u32, u32, i32),
  RestoreM(u32, u32, i32),
}

pub struct TestFunc {
  pub insns: Vec<TInst>,
  pub ranges: Vec<(u32, u32)>,
  pub succs: Vec<Vec<BlockIx>>,
  pub exc_succs: Vec<Vec<BlockIx>>,
  pub exits: Vec<bool>,
  pub args: Vec<RealReg>,
}

impl TestFunc {
  /// Rebuild the block ranges from the fences, after the pass has run.
  pub fn update(&mut self, insns: Vec<TInst>) {
    self.insns = insns;
    for (i, insn) in self.insns.iter().enumerate() {
      match insn {
        TInst::Start(b) => self.ranges[*b as usize].0 = i as u32,
        TInst::End(b) => self.ranges[*b as usize].1 = i as u32,
        _ => {}
      }
    }
  }
}

/// Build a function from successor lists.  Blocks in `exits` return; a block
/// with both successors and an exit branches conditionally, then returns.  A
/// block whose last successor is the next block falls through to it.
pub fn cfg_func(succs: &[&[u32]], exits: &[u32]) -> TestFunc {
  let body: Vec<Vec<TInst>> = succs.iter().map(|_| vec![]).collect();
  build_func(succs, exits, body)
}

/// As `cfg_func`, with `uses[b]` listing the registers block `b` touches.
pub fn cfg_func_with_uses(
  succs: &[&[u32]], exits: &[u32], uses: &[&[u32]],
) -> TestFunc {
  let body: Vec<Vec<TInst>> = (0..succs.len())
    .map(|b| {
      uses.get(b).map_or(vec![], |rs| rs.iter().map(|r| TInst::Use(*r)).collect())
    })
    .collect();
  build_func(succs, exits, body)
}

pub fn build_func(
  succs: &[&[u32]], exits: &[u32], body: Vec<Vec<TInst>>,
) -> TestFunc {
  let mut insns = vec![];
  let mut ranges = vec![];
  let mut exc_succs = vec![];
  for (b, bsuccs) in succs.iter().enumerate() {
    let b32 = b as u32;
    let first = insns.len() as u32;
    insns.push(TInst::Start(b32));
    insns.push(TInst::Lbl(b32));
    let mut handlers = vec![];
    for insn in body[b].iter() {
      if let TInst::Throw(h) = insn {
        handlers.push(BlockIx::new(*h));
      }
      insns.push(insn.clone());
    }
    let exits_here = exits.contains(&b32);
    if !bsuccs.is_empty() {
      if exits_here {
        insns.push(TInst::CondBr(bsuccs.to_vec()));
      } else if bsuccs.last() == Some(&(b32 + 1)) {
        // The layout successor is reached by falling through.
        let taken = &bsuccs[..bsuccs.len() - 1];
        if !taken.is_empty() {
          insns.push(TInst::CondBr(taken.to_vec()));
        }
      } else {
        insns.push(TInst::Br(bsuccs.to_vec()));
      }
    }
    if exits_here {
      insns.push(TInst::Ret);
    }
    insns.push(TInst::End(b32));
    ranges.push((first, insns.len() as u32 - 1));
    exc_succs.push(handlers);
  }
  TestFunc {
    insns,
    ranges,
    succs: succs
      .iter()
      .map(|ss| ss.iter().map(|s| BlockIx::new(*s)).collect())
      .collect(),
    exc_succs,
    exits: (0..succs.len() as u32).map(|b| exits.contains(&b)).collect(),
    args: vec![],
  }
}

impl Function for TestFunc {
  type Inst = TInst;

  fn func_name(&self) -> String {
    "test".to_string()
  }
  fn insns(&self) -> &[TInst] {
    &self.insns
  }
  fn blocks(&self) -> MyRange<BlockIx> {
    MyRange::new(BlockIx::new(0), self.ranges.len())
  }
  fn entry_block(&self) -> BlockIx {
    BlockIx::new(0)
  }
  fn block_insns(&self, block: BlockIx) -> MyRange<InstIx> {
    let (first, last) = self.ranges[block.get_usize()];
    MyRange::new(InstIx::new(first), (last - first + 1) as usize)
  }
  fn block_succs(&self, block: BlockIx) -> Vec<BlockIx> {
    self.succs[block.get_usize()].clone()
  }
  fn block_exception_succs(&self, block: BlockIx) -> Vec<BlockIx> {
    self.exc_succs[block.get_usize()].clone()
  }
  fn block_exits_method(&self, block: BlockIx) -> bool {
    self.exits[block.get_usize()]
  }
  fn incoming_arg_regs(&self) -> Vec<RealReg> {
    self.args.clone()
  }
  fn num_labels(&self) -> u32 {
    self.ranges.len() as u32
  }
  fn fence(&self, insn: &TInst) -> Option<Fence> {
    match insn {
      TInst::Start(b) => Some(Fence::BlockStart(BlockIx::new(*b))),
      TInst::End(b) => Some(Fence::BlockEnd(BlockIx::new(*b))),
      _ => None,
    }
  }
  fn label_of(&self, insn: &TInst) -> Option<Label> {
    match insn {
      TInst::Lbl(l) => Some(Label::new(*l)),
      _ => None,
    }
  }
  fn branch_targets(&self, insn: &TInst) -> SmallVec<[Label; 2]> {
    match insn {
      TInst::Br(ls) | TInst::CondBr(ls) => {
        ls.iter().map(|l| Label::new(*l)).collect()
      }
      _ => smallvec![],
    }
  }
  fn is_multiway_branch(&self, insn: &TInst) -> bool {
    match insn {
      TInst::Br(ls) => ls.len() > 2,
      _ => false,
    }
  }
  fn is_return(&self, insn: &TInst) -> bool {
    *insn == TInst::Ret
  }
  fn ends_flow(&self, insn: &TInst) -> bool {
    match insn {
      TInst::Br(_) | TInst::Ret => true,
      _ => false,
    }
  }
  fn is_alignment(&self, insn: &TInst) -> bool {
    *insn == TInst::Align
  }
  fn reg_uses(&self, insn: &TInst, uses: &mut BitSet) {
    if let TInst::Use(r) = insn {
      uses.insert(*r);
    }
  }
  fn exception_handler(&self, insn: &TInst) -> Option<BlockIx> {
    match insn {
      TInst::Throw(h) => Some(BlockIx::new(*h)),
      _ => None,
    }
  }
  fn needs_gc_map(&self, insn: &TInst) -> bool {
    match insn {
      TInst::Call(_) => true,
      _ => false,
    }
  }
  fn set_register_save_description(&self, insn: &mut TInst, rsd: u32) {
    if let TInst::Call(bits) = insn {
      *bits = rsd;
    }
  }
  fn preserved_reg_effect(&self, insn: &TInst) -> Option<SaveRestoreEffect> {
    match insn {
      TInst::Save(r, _) => Some(SaveRestoreEffect::Save {
        first: RealReg::new(*r),
        last: RealReg::new(*r),
      }),
      TInst::Restore(r, _) => Some(SaveRestoreEffect::Restore {
        first: RealReg::new(*r),
        last: RealReg::new(*r),
      }),
      TInst::SaveM(f, l, _) => Some(SaveRestoreEffect::Save {
        first: RealReg::new(*f),
        last: RealReg::new(*l),
      }),
      TInst::RestoreM(f, l, _) => Some(SaveRestoreEffect::Restore {
        first: RealReg::new(*f),
        last: RealReg::new(*l),
      }),
      _ => None,
    }
  }
  fn retarget_branch(&self, insn: &mut TInst, from: Label, to: Label) {
    if let TInst::Br(ls) | TInst::CondBr(ls) = insn {
      for l in ls.iter_mut() {
        if *l == from.get() {
          *l = to.get();
        }
      }
    }
  }
  fn gen_label(&self, label: Label) -> TInst {
    TInst::Lbl(label.get())
  }
  fn gen_jump(&self, target: Label) -> TInst {
    TInst::Br(vec![target.get()])
  }
}

/// Registers 0 .. 16; the preserved ones are given, at offset 8 * reg.
pub struct TestLinkage {
  pub preserved: Vec<u32>,
  pub lsm: bool,
  pub supported: bool,
}

impl TestLinkage {
  pub fn new(preserved: &[u32]) -> Self {
    Self { preserved: preserved.to_vec(), lsm: false, supported: true }
  }
}

impl Linkage<TestFunc> for TestLinkage {
  fn supports_shrink_wrapping(&self) -> bool {
    self.supported
  }
  fn num_regs(&self) -> u32 {
    16
  }
  fn map_preserved_registers_to_stack_offsets(&self) -> PreservedRegisterMap {
    PreservedRegisterMap {
      slots: self
        .preserved
        .iter()
        .map(|r| (RealReg::new(*r), 8 * *r as i32))
        .collect(),
      uses_pushes: false,
    }
  }
  fn save_preserved_register(&self, reg: RealReg, offset: i32) -> TInst {
    TInst::Save(reg.get(), offset)
  }
  fn restore_preserved_register(&self, reg: RealReg, offset: i32) -> TInst {
    TInst::Restore(reg.get(), offset)
  }
  fn compose_saves_restores(
    &self, first: RealReg, last: RealReg, offset: i32, is_save: bool,
  ) -> TInst {
    if is_save {
      TInst::SaveM(first.get(), last.get(), offset)
    } else {
      TInst::RestoreM(first.get(), last.get(), offset)
    }
  }
  fn uses_load_store_multiple(&self) -> bool {
    self.lsm
  }
  fn compute_register_save_description(&self, regs: &BitSet) -> u32 {
    regs.iter().filter(|r| *r < 32).fold(0, |acc, r| acc | (1 << r))
  }
}
