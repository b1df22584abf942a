/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Shrink wrapping: move the saves and restores of callee-saved registers out
//! of the prologue and epilogue, onto the paths that actually use them.
//!
//! The pass runs in four phases:
//!
//! * Collect per-block register usage (`analyze_instructions`).
//!
//! * Solve register anticipatability (backward) and availability (forward).
//!
//! * Derive the SAVE and RESTORE block sets from the two solutions
//!   (`compute_save_restore_sets`).
//!
//! * Place the saves and restores (`do_placement`), splitting edges where a
//!   save or restore belongs to one edge only, and falling back to the
//!   prologue for any register whose placement cannot be shown safe.

use log::{debug, info};

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

use crate::analysis::CfgInfo;
use crate::bit_set::BitSet;
use crate::checker::check_save_restore_pairing;
use crate::data_structures::{
  BlockIx, InstIx, Label, Map, RealReg, TypedIxVec,
};
use crate::dataflow::DataFlowSolution;
use crate::inst_stream::BlockEditor;
use crate::interface::{
  EdgeSplit, Function, Linkage, Options, ShrinkWrapConfig, ShrinkWrapError,
  ShrinkWrapResult, ShrinkWrapStatus, SkipReason,
};
use crate::liveness::{compute_anticipatability, compute_availability};
use crate::structure::StructureTree;

//=============================================================================
// Per-register, per-block and per-edge bookkeeping

/// How control leaves a block that may exit the method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnKind {
  /// Exits through a return instruction.
  Yes,
  /// Exits other than by returning, e.g. an uncaught throw.
  No,
  /// Does not exit, or may also leave through an exception edge.
  Maybe,
}

#[derive(Clone, Debug)]
struct ReturnBlockInfo {
  kind: ReturnKind,
  has_exception_succs: bool,
  restores_registers: bool,
  num_restored: u32,
}

/// Where one callee-saved register used in the method is saved and restored.
/// Both sets are empty when the register is saved in the prologue.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct PreservedRegisterInfo {
  pub reg: RealReg,
  pub offset: i32,
  pub save_blocks: BitSet,
  pub restore_blocks: BitSet,
}

// Code placed on a split edge.  Restores sit between the label and the
// saves.
struct SWEdgeInfo {
  from: BlockIx,
  to: BlockIx,
  label: Label,
  save_cursor: InstIx,
  restore_cursor: InstIx,
  saved: BitSet,
  restored: BitSet,
  placed_saves: Vec<(u32, InstIx)>,
  placed_restores: Vec<(u32, InstIx)>,
}

#[derive(Clone, Default)]
struct SWBlockInfo {
  save_cursor: Option<InstIx>,
  restore_cursor: Option<InstIx>,
  entry_restore_cursor: Option<InstIx>,
  saved: BitSet,
  restored: BitSet,
  placed_saves: Vec<(u32, InstIx)>,
  placed_restores: Vec<(u32, InstIx)>,
  restore_location: Option<InstIx>,
  pre_split: bool,
  split_into: bool,
}

// Where the save for one save block goes.
#[derive(Debug, PartialEq)]
enum SaveSite {
  /// At the block's start, or after the block fence for a catch block.
  Block { after_fence: bool },
  /// On each of these predecessors' edges into the block.
  Edges(Vec<BlockIx>),
}

//=============================================================================
// Top level

fn skipped<F: Function>(func: &F, reason: SkipReason) -> ShrinkWrapResult<F> {
  info!("shrink_wrap: {}: skipped: {:?}", func.func_name(), reason);
  ShrinkWrapResult {
    insns: func.insns().to_vec(),
    status: ShrinkWrapStatus::Skipped(reason),
    prologue_regs: None,
    preserved: vec![],
    save_sets: TypedIxVec::new(),
    restore_sets: TypedIxVec::new(),
    save_descriptions: TypedIxVec::new(),
    save_description_bits: TypedIxVec::new(),
    edge_splits: vec![],
    num_edge_splits: 0,
    num_labels: func.num_labels(),
  }
}

#[inline(never)]
pub(crate) fn perform<F: Function, L: Linkage<F>>(
  func: &F, linkage: &L, opts: &Options,
) -> Result<ShrinkWrapResult<F>, ShrinkWrapError> {
  info!("shrink_wrap: begin {}", func.func_name());

  if !linkage.supports_shrink_wrapping() {
    return Ok(skipped(func, SkipReason::UnsupportedTarget));
  }

  let cfg = match CfgInfo::create(func) {
    Ok(cfg) => cfg,
    Err(e) => return Ok(skipped(func, SkipReason::MalformedCfg(e))),
  };

  let mut tree = StructureTree::build(&cfg);
  if tree.mark_structures_with_improper_regions() {
    return Ok(skipped(func, SkipReason::ImproperRegions));
  }

  if func.insns().iter().any(|insn| func.is_multiway_branch(insn)) {
    return Ok(skipped(func, SkipReason::MultiwayBranch));
  }

  let map = linkage.map_preserved_registers_to_stack_offsets();
  let preserved_in_linkage: BitSet =
    map.slots.iter().map(|(reg, _)| reg.get()).collect();
  let mut offsets = Map::<u32, i32>::default();
  for (reg, offset) in map.slots.iter() {
    offsets.insert(reg.get(), if map.uses_pushes { -1 } else { *offset });
  }

  let usage = analyze_instructions(func, &cfg, &tree, &preserved_in_linkage);
  let mut preserved_used = BitSet::empty();
  for b in func.blocks() {
    preserved_used.union(&usage[b]);
  }
  preserved_used.intersect(&preserved_in_linkage);
  if preserved_used.is_empty() {
    return Ok(skipped(func, SkipReason::NoPreservedRegisters));
  }

  let num_regs = linkage.num_regs();
  let rant =
    compute_anticipatability(&usage, num_regs, &cfg, &tree, opts.interrupt)?;
  let ravl =
    compute_availability(&usage, num_regs, &cfg, &tree, opts.interrupt)?;

  let (save, restore) = compute_save_restore_sets(
    &cfg,
    &rant,
    &ravl,
    &preserved_in_linkage,
    num_regs,
  );

  let result = do_placement(
    func,
    linkage,
    opts.config,
    &cfg,
    &tree,
    &rant,
    &ravl,
    save,
    restore,
    preserved_used,
    offsets,
  )?;

  if opts.run_checker {
    if let ShrinkWrapStatus::Applied { wrapped } = &result.status {
      if let Err(errors) =
        check_save_restore_pairing(func, &result.insns, wrapped)
      {
        return Err(ShrinkWrapError::InvariantViolation(format!(
          "save/restore pairing: {:?}",
          errors
        )));
      }
    }
  }

  info!(
    "shrink_wrap: end {}: {:?}, prologue {:?}",
    func.func_name(),
    result.status,
    result.prologue_regs
  );
  Ok(result)
}

//=============================================================================
// Register usage

/// RUSE: the registers each block touches, START and END included (both
/// empty).
#[inline(never)]
pub(crate) fn analyze_instructions<F: Function>(
  func: &F, cfg: &CfgInfo, tree: &StructureTree, preserved: &BitSet,
) -> TypedIxVec<BlockIx, BitSet> {
  let insns = func.insns();
  let mut usage = TypedIxVec::<BlockIx, BitSet>::new();
  usage.resize(cfg.num_blocks(), BitSet::empty());

  for b in func.blocks() {
    let mut used = BitSet::empty();
    for ix in func.block_insns(b) {
      let insn = &insns[ix.get_usize()];
      func.reg_uses(insn, &mut used);
      if !func.branch_targets(insn).is_empty() {
        func.out_of_line_reg_uses(insn, &mut used);
      }
    }
    usage[b] = used;
  }

  for reg in func.incoming_arg_regs() {
    usage[cfg.entry].insert(reg.get());
  }

  // A preserved register used anywhere in a loop nest counts as used
  // throughout it, so that nothing is saved or restored inside the nest.
  for b in func.blocks() {
    let mut in_loop = usage[b].clone();
    in_loop.intersect(preserved);
    if in_loop.is_empty() {
      continue;
    }
    if let Some(outer) = tree.outermost_loop(b) {
      for m in tree.node(outer).blocks.iter() {
        usage[BlockIx::new(m)].union(&in_loop);
      }
    }
  }

  // A catch block is also charged with whatever its throwers use.
  for b in func.blocks() {
    for p in cfg.exc_pred_map[b].clone().iter() {
      let from = usage[*p].clone();
      usage[b].union(&from);
    }
  }

  for b in func.blocks() {
    debug!("analyze_instructions: RUSE[{:?}] = {:?}", b, usage[b]);
  }
  usage
}

//=============================================================================
// SAVE and RESTORE

/// SAVE[b]: registers anticipated at b's entry but not on entry to some
/// predecessor.  RESTORE[b]: registers available at b's exit but no longer
/// available on exit from some successor.
#[inline(never)]
pub(crate) fn compute_save_restore_sets(
  cfg: &CfgInfo, rant: &DataFlowSolution, ravl: &DataFlowSolution,
  preserved_in_linkage: &BitSet, num_regs: u32,
) -> (TypedIxVec<BlockIx, BitSet>, TypedIxVec<BlockIx, BitSet>) {
  let all = BitSet::full(num_regs);
  let mut save = TypedIxVec::<BlockIx, BitSet>::new();
  let mut restore = TypedIxVec::<BlockIx, BitSet>::new();
  save.resize(cfg.num_blocks(), BitSet::empty());
  restore.resize(cfg.num_blocks(), BitSet::empty());

  for b in cfg.all_blocks() {
    let mut scratch = all.clone();
    let mut has_preds = false;
    for p in cfg.flow_preds(b) {
      has_preds = true;
      if let Some(v) = rant.in_sets.get(p) {
        scratch.intersect(v);
      }
    }
    if has_preds {
      scratch = scratch.complement(num_regs);
    }
    let mut s = rant.in_sets[b].clone();
    s.remove(&ravl.in_sets[b]);
    s.intersect(&scratch);
    save[b] = s;

    let mut scratch = all.clone();
    let mut has_succs = false;
    for succ in cfg.flow_succs(b) {
      has_succs = true;
      if let Some(v) = ravl.out_sets.get(succ) {
        scratch.intersect(v);
      }
    }
    if has_succs {
      scratch = scratch.complement(num_regs);
    }
    let mut r = ravl.out_sets[b].clone();
    r.remove(&rant.out_sets[b]);
    r.intersect(&scratch);
    restore[b] = r;
  }

  // Whatever must be restored on the way out of the method is restored in
  // each block that exits.
  let at_end = restore[cfg.end].clone();
  for p in cfg.pred_map[cfg.end].iter() {
    restore[*p].union(&at_end);
  }

  for b in cfg.all_blocks() {
    save[b].intersect(preserved_in_linkage);
    restore[b].intersect(preserved_in_linkage);
    if !save[b].is_empty() || !restore[b].is_empty() {
      debug!(
        "compute_save_restore_sets: {:?}: SAVE {:?} RESTORE {:?}",
        b, save[b], restore[b]
      );
    }
  }
  (save, restore)
}

//=============================================================================
// Placement

struct Placement<'a, F: Function, L: Linkage<F>> {
  func: &'a F,
  linkage: &'a L,
  cfg: &'a CfgInfo,
  tree: &'a StructureTree,
  rant: &'a DataFlowSolution,
  ravl: &'a DataFlowSolution,

  save: TypedIxVec<BlockIx, BitSet>,
  restore: TypedIxVec<BlockIx, BitSet>,
  preserved_used: BitSet,
  offsets: Map<u32, i32>,

  infos: Vec<PreservedRegisterInfo>,
  prologue: BitSet,
  returns: TypedIxVec<BlockIx, ReturnBlockInfo>,
  blocks: TypedIxVec<BlockIx, SWBlockInfo>,
  edges: Vec<SWEdgeInfo>,
  edge_map: Map<(BlockIx, BlockIx), usize>,
  editor: BlockEditor<'a, F>,
}

#[inline(never)]
pub(crate) fn do_placement<'a, F: Function, L: Linkage<F>>(
  func: &'a F, linkage: &'a L, config: ShrinkWrapConfig, cfg: &'a CfgInfo,
  tree: &'a StructureTree, rant: &'a DataFlowSolution,
  ravl: &'a DataFlowSolution, save: TypedIxVec<BlockIx, BitSet>,
  restore: TypedIxVec<BlockIx, BitSet>, preserved_used: BitSet,
  offsets: Map<u32, i32>,
) -> Result<ShrinkWrapResult<F>, ShrinkWrapError> {
  let num_blocks = cfg.num_blocks();
  let mut returns = TypedIxVec::new();
  returns.resize(
    num_blocks,
    ReturnBlockInfo {
      kind: ReturnKind::Maybe,
      has_exception_succs: false,
      restores_registers: false,
      num_restored: 0,
    },
  );
  let mut blocks = TypedIxVec::new();
  blocks.resize(num_blocks, SWBlockInfo::default());
  let infos = preserved_used
    .iter()
    .map(|r| PreservedRegisterInfo {
      reg: RealReg::new(r),
      offset: offsets.get(&r).cloned().unwrap_or(-1),
      save_blocks: BitSet::empty(),
      restore_blocks: BitSet::empty(),
    })
    .collect();

  let mut p = Placement {
    func,
    linkage,
    cfg,
    tree,
    rant,
    ravl,
    save,
    restore,
    preserved_used,
    offsets,
    infos,
    prologue: BitSet::empty(),
    returns,
    blocks,
    edges: vec![],
    edge_map: Map::default(),
    editor: BlockEditor::new(func),
  };

  p.classify_return_blocks();
  p.populate_register_info();
  p.demote_unsafe_registers();

  let mut wrapped = p.preserved_used.clone();
  wrapped.remove(&p.prologue);
  let too_few_for_lsm = linkage.uses_load_store_multiple() && wrapped.card() <= 2;
  if wrapped.is_empty() || too_few_for_lsm {
    if too_few_for_lsm {
      debug!("do_placement: only {} registers to wrap with load/store multiple", wrapped.card());
    }
    return Ok(p.nothing_to_wrap());
  }
  info!("do_placement: wrapping {:?}, prologue {:?}", wrapped, p.prologue);

  let (save_descriptions, save_description_bits) =
    p.compute_register_save_descriptions();
  p.split_loop_pre_headers(&wrapped);
  p.place_saves(&wrapped)?;
  p.place_restores(&wrapped)?;
  p.fixup_return_blocks(&wrapped)?;
  if linkage.uses_load_store_multiple() {
    p.coalesce(&config);
  }

  let edge_splits = p
    .edges
    .iter()
    .map(|e| EdgeSplit { from: e.from, to: e.to, label: e.label })
    .collect();
  let num_edge_splits = p.editor.num_splits();
  let num_labels = p.editor.num_labels();
  Ok(ShrinkWrapResult {
    insns: p.editor.into_insns(),
    status: ShrinkWrapStatus::Applied { wrapped },
    prologue_regs: Some(p.prologue),
    preserved: p.infos,
    save_sets: p.save,
    restore_sets: p.restore,
    save_descriptions,
    save_description_bits,
    edge_splits,
    num_edge_splits,
    num_labels,
  })
}

impl<'a, F: Function, L: Linkage<F>> Placement<'a, F, L> {
  fn offset_of(&self, r: u32) -> i32 {
    self.offsets.get(&r).cloned().unwrap_or(-1)
  }

  fn nothing_to_wrap(self) -> ShrinkWrapResult<F> {
    info!("do_placement: nothing to wrap");
    let mut infos = self.infos;
    for info in infos.iter_mut() {
      info.save_blocks.clear();
      info.restore_blocks.clear();
    }
    ShrinkWrapResult {
      insns: self.func.insns().to_vec(),
      status: ShrinkWrapStatus::Skipped(SkipReason::NothingToWrap),
      prologue_regs: None,
      preserved: infos,
      save_sets: self.save,
      restore_sets: self.restore,
      save_descriptions: TypedIxVec::new(),
      save_description_bits: TypedIxVec::new(),
      edge_splits: vec![],
      num_edge_splits: 0,
      num_labels: self.func.num_labels(),
    }
  }

  fn classify_return_blocks(&mut self) {
    for b in self.func.blocks() {
      let exits = self.func.block_exits_method(b);
      let has_exc = !self.cfg.exc_succ_map[b].is_empty();
      let kind = if !exits || has_exc {
        ReturnKind::Maybe
      } else if self.editor.return_insn(b).is_some() {
        ReturnKind::Yes
      } else {
        ReturnKind::No
      };
      let info = &mut self.returns[b];
      info.kind = kind;
      info.has_exception_succs = has_exc;
    }
  }

  fn info_index(&self, r: u32) -> Option<usize> {
    self.infos.iter().position(|info| info.reg.get() == r)
  }

  fn populate_register_info(&mut self) {
    let cfg = self.cfg;
    for b in cfg.rpo.iter().cloned() {
      if b == cfg.end {
        continue;
      }
      if b == cfg.start || b == cfg.entry {
        let mut to_prologue = self.save[b].clone();
        to_prologue.intersect(&self.preserved_used);
        self.prologue.union(&to_prologue);
        self.save[b].clear();
      }
      for r in self.save[b].to_vec() {
        if let Some(i) = self.info_index(r) {
          self.infos[i].save_blocks.insert(b.get());
        }
      }
      if !cfg.is_real(b) || self.returns[b].kind == ReturnKind::No {
        continue;
      }
      for r in self.restore[b].to_vec() {
        if let Some(i) = self.info_index(r) {
          self.infos[i].restore_blocks.insert(b.get());
        }
      }
    }
  }

  // Why register |i| cannot be shrink-wrapped, if it cannot.
  fn demotion_reason(&mut self, i: usize) -> Option<&'static str> {
    let cfg = self.cfg;
    let r = self.infos[i].reg.get();
    if self.prologue.contains(r) {
      return Some("saved on entry");
    }
    if self.infos[i].save_blocks.is_empty() {
      return Some("no save blocks");
    }
    if self.infos[i].restore_blocks.is_empty() {
      return Some("no restore blocks");
    }

    for b in self.infos[i].restore_blocks.to_vec() {
      let b = BlockIx::new(b);
      if self.tree.is_in_loop(b) {
        return Some("restore inside a loop");
      }
      for c in cfg.exc_succ_map[b].iter().cloned() {
        let num_throwers = cfg.exc_pred_map[c].len();
        if self.returns[c].kind == ReturnKind::Yes
          && !self.ravl.in_sets[c].contains(r)
          && !self.rant.in_sets[c].contains(r)
        {
          if num_throwers > 1 {
            return Some("returning catch block has several throwers");
          }
          self.returns[c].restores_registers = true;
          self.restore[c].insert(r);
        } else if num_throwers > 1 {
          return Some("catch block has several throwers");
        }
      }
      if self.returns[b].kind == ReturnKind::Maybe
        && self.returns[b].has_exception_succs
      {
        return Some("restore block may throw");
      }
    }

    for b in self.infos[i].save_blocks.to_vec() {
      let b = BlockIx::new(b);
      if self.save_site(b, r).is_none() {
        return Some("no predecessor needs the save");
      }
      for p in cfg.exc_pred_map[b].iter().cloned() {
        if self.rant.out_sets[p].contains(r) || self.ravl.out_sets[p].contains(r)
        {
          return Some("catch block entered with the register in use");
        }
      }
      if let Some(lp) = self.tree.containing_loop(b) {
        if self.tree.node(lp).entry != b {
          return Some("save inside a loop body");
        }
        let falls_in = cfg.pred_map[b].iter().any(|p| {
          cfg.is_back_edge(*p, b) && self.editor.is_fallthrough(*p, b)
        });
        if falls_in {
          return Some("back edge falls into the loop header");
        }
      }
    }
    None
  }

  fn demote_unsafe_registers(&mut self) {
    for i in 0..self.infos.len() {
      if let Some(reason) = self.demotion_reason(i) {
        let info = &mut self.infos[i];
        debug!("do_placement: {:?} to the prologue: {}", info.reg, reason);
        info.save_blocks.clear();
        info.restore_blocks.clear();
        self.prologue.insert(info.reg.get());
      }
    }
  }

  // The registers holding saved values at each block, for GC maps.
  fn compute_register_save_descriptions(
    &mut self,
  ) -> (TypedIxVec<BlockIx, BitSet>, TypedIxVec<BlockIx, u32>) {
    let cfg = self.cfg;
    let func = self.func;
    let mut propagated = TypedIxVec::<BlockIx, BitSet>::new();
    propagated.resize(cfg.num_blocks(), BitSet::empty());
    let mut descriptions = TypedIxVec::<BlockIx, BitSet>::new();
    descriptions.resize(cfg.num_blocks(), BitSet::empty());
    let mut bits = TypedIxVec::<BlockIx, u32>::new();
    bits.resize(cfg.num_blocks(), 0);

    for b in cfg.rpo.iter().cloned() {
      if b == cfg.start {
        continue;
      }
      let mut live = propagated[b].clone();
      live.union(&self.save[b]);
      for p in cfg.pred_map[b].iter().cloned() {
        if cfg.is_back_edge(p, b) {
          continue;
        }
        let mut gone = self.restore[p].clone();
        gone.remove(&self.ravl.in_sets[b]);
        gone.remove(&self.rant.in_sets[b]);
        live.remove(&gone);
      }
      live.union(&self.restore[b]);
      live.union(&self.prologue);
      live.intersect(&self.preserved_used);

      let rsd = self.linkage.compute_register_save_description(&live);
      if cfg.is_real(b) {
        for ix in func.block_insns(b) {
          if func.needs_gc_map(self.editor.stream.get(ix)) {
            func.set_register_save_description(self.editor.stream.get_mut(ix), rsd);
          }
        }
      }
      for s in cfg.flow_succs(b) {
        if !cfg.is_back_edge(b, s) {
          propagated[s].union(&live);
        }
      }
      descriptions[b] = live;
      bits[b] = rsd;
    }
    (descriptions, bits)
  }

  // Give every loop header holding a save a label of its own, ahead of the
  // one the back edges use.
  fn split_loop_pre_headers(&mut self, wrapped: &BitSet) {
    let cfg = self.cfg;
    for i in 0..self.infos.len() {
      if !wrapped.contains(self.infos[i].reg.get()) {
        continue;
      }
      for b in self.infos[i].save_blocks.to_vec() {
        let b = BlockIx::new(b);
        if !self.tree.is_loop_header(b) || self.blocks[b].pre_split {
          continue;
        }
        let old = self.editor.entry_label(b);
        let (label, _) = self.editor.split_block_entry(b);
        if let Some((old_label, _)) = old {
          for p in cfg.pred_map[b].iter().cloned() {
            if cfg.is_real(p) && !cfg.is_back_edge(p, b) {
              self.editor.redirect_branches(p, old_label, label);
            }
          }
        }
        self.blocks[b].pre_split = true;
      }
    }
  }

  fn place_block_save(&mut self, b: BlockIx, r: u32, after_fence: bool) {
    let cursor = match self.blocks[b].save_cursor {
      Some(c) => c,
      None if after_fence => self.editor.block_start(b),
      None => self
        .editor
        .entry_label(b)
        .map_or(self.editor.block_start(b), |(_, ix)| ix),
    };
    let insn =
      self.linkage.save_preserved_register(RealReg::new(r), self.offset_of(r));
    let ix = self.editor.stream.insert_after(cursor, insn);
    let info = &mut self.blocks[b];
    info.save_cursor = Some(ix);
    info.saved.insert(r);
    info.placed_saves.push((r, ix));
  }

  // The split for |from -> to|, made on first use.
  fn edge_info(
    &mut self, from: BlockIx, to: BlockIx,
  ) -> Result<usize, ShrinkWrapError> {
    if let Some(i) = self.edge_map.get(&(from, to)) {
      return Ok(*i);
    }
    let cfg = self.cfg;
    let prev_is_pred = cfg.layout_prev[to]
      .map_or(false, |prev| cfg.pred_map[to].contains(&prev));
    let needs_jump = prev_is_pred || self.blocks[to].split_into;
    let (label, ix) = self.editor.split_edge(from, to, needs_jump)?;
    self.blocks[to].split_into = true;
    self.edges.push(SWEdgeInfo {
      from,
      to,
      label,
      save_cursor: ix,
      restore_cursor: ix,
      saved: BitSet::empty(),
      restored: BitSet::empty(),
      placed_saves: vec![],
      placed_restores: vec![],
    });
    let i = self.edges.len() - 1;
    self.edge_map.insert((from, to), i);
    Ok(i)
  }

  // A predecessor |p| needs the save on its way into a save block unless
  // |r| is already saved there.  The in-set of anticipatability also meets
  // over |p|'s catch blocks, which the out-set leaves out.
  fn save_site(&self, b: BlockIx, r: u32) -> Option<SaveSite> {
    let (cfg, rant, ravl) = (self.cfg, self.rant, self.ravl);
    let needs = |p: BlockIx| {
      !rant.in_sets[p].contains(r) && !ravl.out_sets[p].contains(r)
    };

    if !cfg.exc_pred_map[b].is_empty() {
      return if cfg.exc_pred_map[b].iter().any(|p| needs(*p)) {
        Some(SaveSite::Block { after_fence: true })
      } else {
        None
      };
    }

    let preds = &cfg.pred_map[b];
    if preds.len() == 1 {
      return if needs(preds[0]) {
        Some(SaveSite::Block { after_fence: false })
      } else {
        None
      };
    }

    let forward: Vec<BlockIx> =
      preds.iter().cloned().filter(|p| !cfg.is_back_edge(*p, b)).collect();
    let needing: Vec<BlockIx> =
      forward.iter().cloned().filter(|p| needs(*p)).collect();
    if needing.is_empty() {
      None
    } else if self.tree.is_loop_header(b) && needing.len() == forward.len() {
      // Loop headers holding a save were given a pre-header.
      Some(SaveSite::Block { after_fence: false })
    } else {
      Some(SaveSite::Edges(needing))
    }
  }

  fn place_saves(&mut self, wrapped: &BitSet) -> Result<(), ShrinkWrapError> {
    for r in wrapped.iter() {
      let i = match self.info_index(r) {
        Some(i) => i,
        None => continue,
      };
      for b in self.infos[i].save_blocks.to_vec() {
        let b = BlockIx::new(b);
        match self.save_site(b, r) {
          Some(SaveSite::Block { after_fence }) => {
            if self.blocks[b].pre_split {
              debug!("place_saves: {:?} once at the pre-header of {:?}", r, b);
            }
            self.place_block_save(b, r, after_fence);
          }
          Some(SaveSite::Edges(preds)) => {
            for p in preds {
              let e = self.edge_info(p, b)?;
              let insn = self
                .linkage
                .save_preserved_register(RealReg::new(r), self.offset_of(r));
              let edge = &mut self.edges[e];
              let ix = self.editor.stream.insert_after(edge.save_cursor, insn);
              edge.save_cursor = ix;
              edge.saved.insert(r);
              edge.placed_saves.push((r, ix));
            }
          }
          None => {
            return Err(ShrinkWrapError::InvariantViolation(format!(
              "no place for the save of r{} at {:?}",
              r, b
            )))
          }
        }
      }
    }
    Ok(())
  }

  fn place_restores(
    &mut self, wrapped: &BitSet,
  ) -> Result<(), ShrinkWrapError> {
    let cfg = self.cfg;
    for r in wrapped.iter() {
      let i = match self.info_index(r) {
        Some(i) => i,
        None => continue,
      };
      for b in self.infos[i].restore_blocks.to_vec() {
        let b = BlockIx::new(b);
        let succs = cfg.succ_map[b].clone();

        if succs.len() == 1 {
          let s = succs[0];
          if cfg.is_back_edge(b, s) {
            continue;
          }
          if s != cfg.end && self.ravl.in_sets[s].contains(r) {
            continue;
          }
          if self.returns[b].kind == ReturnKind::Yes {
            self.returns[b].restores_registers = true;
            continue;
          }
          let anchor = self
            .editor
            .first_branch(b)
            .unwrap_or(self.editor.block_end(b));
          let insn = self
            .linkage
            .restore_preserved_register(RealReg::new(r), self.offset_of(r));
          let ix = match self.blocks[b].restore_cursor {
            Some(c) => self.editor.stream.insert_after(c, insn),
            None => self.editor.stream.insert_before(anchor, insn),
          };
          let info = &mut self.blocks[b];
          info.restore_cursor = Some(ix);
          info.restored.insert(r);
          info.placed_restores.push((r, ix));
          info.restore_location = Some(anchor);
          continue;
        }

        for s in succs.iter().cloned() {
          if s == cfg.end {
            if self.returns[b].kind == ReturnKind::Yes {
              self.returns[b].restores_registers = true;
            }
            continue;
          }
          if cfg.is_back_edge(b, s)
            || self.ravl.in_sets[s].contains(r)
            || self.rant.in_sets[s].contains(r)
          {
            continue;
          }
          let insn = self
            .linkage
            .restore_preserved_register(RealReg::new(r), self.offset_of(r));
          if cfg.flow_preds(s).count() > 1 {
            let e = self.edge_info(b, s)?;
            let edge = &mut self.edges[e];
            let ix = self.editor.stream.insert_after(edge.restore_cursor, insn);
            edge.restore_cursor = ix;
            edge.restored.insert(r);
            edge.placed_restores.push((r, ix));
          } else {
            let cursor = match self.blocks[s].entry_restore_cursor {
              Some(c) => c,
              None => self
                .editor
                .entry_label(s)
                .map_or(self.editor.block_start(s), |(_, ix)| ix),
            };
            let ix = self.editor.stream.insert_after(cursor, insn);
            self.blocks[s].entry_restore_cursor = Some(ix);
            self.blocks[s].restored.insert(r);
          }
        }
      }
    }
    Ok(())
  }

  fn fixup_return_blocks(
    &mut self, wrapped: &BitSet,
  ) -> Result<(), ShrinkWrapError> {
    for b in self.func.blocks() {
      if !self.returns[b].restores_registers {
        continue;
      }
      let mut regs = self.restore[b].clone();
      regs.intersect(wrapped);
      if regs.is_empty() {
        continue;
      }
      let ret = match self.editor.return_insn(b) {
        Some(ret) => ret,
        None => {
          return Err(ShrinkWrapError::InvariantViolation(format!(
            "{:?} restores registers but has no return",
            b
          )))
        }
      };
      for r in regs.iter() {
        let insn = self
          .linkage
          .restore_preserved_register(RealReg::new(r), self.offset_of(r));
        self.editor.stream.insert_before(ret, insn);
        self.returns[b].num_restored += 1;
      }
      debug!(
        "fixup_return_blocks: {:?} restores {} registers before returning",
        b, self.returns[b].num_restored
      );
    }
    Ok(())
  }

  // Replace each run of two or more consecutive registers in |placed| with a
  // single multiple save or restore.
  fn find_multiples(&mut self, placed: &[(u32, InstIx)], is_save: bool) {
    let mut i = 0;
    while i < placed.len() {
      let mut j = i;
      while j + 1 < placed.len() && placed[j + 1].0 == placed[j].0 + 1 {
        j += 1;
      }
      if j > i {
        let (first, first_ix) = placed[i];
        let last = placed[j].0;
        let insn = self.linkage.compose_saves_restores(
          RealReg::new(first),
          RealReg::new(last),
          self.offset_of(first),
          is_save,
        );
        self.editor.stream.insert_before(first_ix, insn);
        for (_, ix) in placed[i..=j].iter() {
          self.editor.stream.remove(*ix);
        }
        debug!(
          "find_multiples: {} r{}..r{} fused",
          if is_save { "saves" } else { "restores" },
          first,
          last
        );
      }
      i = j + 1;
    }
  }

  fn coalesce(&mut self, config: &ShrinkWrapConfig) {
    for e in 0..self.edges.len() {
      if config.coalesce_split_saves {
        let placed = self.edges[e].placed_saves.clone();
        self.find_multiples(&placed, true);
      }
      if config.coalesce_split_restores {
        let placed = self.edges[e].placed_restores.clone();
        self.find_multiples(&placed, false);
      }
    }
    for b in self.func.blocks() {
      if config.coalesce_block_saves {
        let placed = self.blocks[b].placed_saves.clone();
        self.find_multiples(&placed, true);
      }
      if config.coalesce_block_restores
        && self.returns[b].kind != ReturnKind::Yes
      {
        let placed = self.blocks[b].placed_restores.clone();
        self.find_multiples(&placed, false);
      }
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::interface::shrink_wrap_function;
  use crate::test_utils::{
    build_func, cfg_func_with_uses, TInst, TestFunc, TestLinkage,
  };

  fn run(
    func: &TestFunc, linkage: &TestLinkage, config: ShrinkWrapConfig,
  ) -> ShrinkWrapResult<TestFunc> {
    let _ = pretty_env_logger::try_init();
    let opts = Options { config, interrupt: None, run_checker: true };
    shrink_wrap_function(func, linkage, &opts).unwrap()
  }

  fn b(n: u32) -> BlockIx {
    BlockIx::new(n)
  }

  fn position(insns: &[TInst], insn: &TInst) -> usize {
    insns.iter().position(|i| i == insn).unwrap()
  }

  fn check_prologue_fallback(res: &ShrinkWrapResult<TestFunc>) {
    if let Some(prologue) = &res.prologue_regs {
      for info in res.preserved.iter() {
        if prologue.contains(info.reg.get()) {
          assert!(info.save_blocks.is_empty());
          assert!(info.restore_blocks.is_empty());
        }
      }
    }
  }

  #[test]
  fn single_block_saves_in_prologue() {
    let func = cfg_func_with_uses(&[&[]], &[0], &[&[1, 2]]);
    let res = run(&func, &TestLinkage::new(&[1, 2]), ShrinkWrapConfig::default());
    assert_eq!(res.status, ShrinkWrapStatus::Skipped(SkipReason::NothingToWrap));
    assert_eq!(res.status.code(), 0);
    assert!(res.prologue_regs.is_none());
    assert_eq!(res.preserved.len(), 2);
    for info in res.preserved.iter() {
      assert!(info.save_blocks.is_empty());
      assert!(info.restore_blocks.is_empty());
    }
    assert_eq!(res.insns, func.insns);
  }

  #[test]
  fn save_at_single_predecessor_block() {
    // 0 -> 1 -> {3, 2}; 2 -> 3; r1 in 2 only.
    let func =
      cfg_func_with_uses(&[&[1], &[3, 2], &[3], &[]], &[3], &[&[], &[], &[1]]);
    let res = run(&func, &TestLinkage::new(&[1]), ShrinkWrapConfig::default());
    assert_eq!(res.status.code(), 1);
    assert!(res.save_sets[b(2)].contains(1));
    assert!(!res.save_sets[b(1)].contains(1));
    assert_eq!(res.num_edge_splits, 0);
    let info = res.info_for(RealReg::new(1)).unwrap();
    assert_eq!(info.save_blocks.to_vec(), vec![2]);
    assert_eq!(info.restore_blocks.to_vec(), vec![2]);

    let lbl = position(&res.insns, &TInst::Lbl(2));
    assert_eq!(res.insns[lbl + 1], TInst::Save(1, 8));
    assert_eq!(res.insns[lbl + 2], TInst::Use(1));
    assert_eq!(res.insns[lbl + 3], TInst::Restore(1, 8));
    assert_eq!(res.insns[lbl + 4], TInst::End(2));
    assert_eq!(res.prologue_regs, Some(BitSet::empty()));
    check_prologue_fallback(&res);
  }

  #[test]
  fn diamond_arm_gets_the_save() {
    // 0 -> {2, 1}; 1 -> 3; 2 -> 3; r1 in 1 only.
    let func = cfg_func_with_uses(
      &[&[2, 1], &[3], &[3], &[]],
      &[3],
      &[&[], &[1], &[], &[]],
    );
    let res = run(&func, &TestLinkage::new(&[1]), ShrinkWrapConfig::default());
    assert_eq!(res.save_sets[b(1)].to_vec(), vec![1]);
    assert_eq!(res.restore_sets[b(1)].to_vec(), vec![1]);
    assert!(res.save_sets[b(2)].is_empty());
    assert_eq!(res.num_edge_splits, 0);

    let lbl = position(&res.insns, &TInst::Lbl(1));
    assert_eq!(res.insns[lbl + 1], TInst::Save(1, 8));
    let br = position(&res.insns, &TInst::Br(vec![3]));
    assert_eq!(res.insns[br - 1], TInst::Restore(1, 8));
    // Nothing touches the other arm.
    let start2 = position(&res.insns, &TInst::Start(2));
    assert_eq!(res.insns[start2 + 1], TInst::Lbl(2));
    assert_eq!(res.insns[start2 + 2], TInst::End(2));
  }

  #[test]
  fn critical_edges_are_split_once() {
    // 0 -> {2, 1}; 1 -> {3, 4}; 2 -> {3, 5}; r1 and r2 in 3 only.
    let func = cfg_func_with_uses(
      &[&[2, 1], &[3, 4], &[3, 5], &[], &[], &[]],
      &[3, 4, 5],
      &[&[], &[], &[], &[1, 2]],
    );
    let res = run(&func, &TestLinkage::new(&[1, 2]), ShrinkWrapConfig::default());
    assert_eq!(res.save_sets[b(3)].to_vec(), vec![1, 2]);
    assert_eq!(res.num_edge_splits, 2);
    assert_eq!(res.edge_splits.len(), 2);
    for split in res.edge_splits.iter() {
      assert_eq!(split.to, b(3));
      let at = position(&res.insns, &TInst::Lbl(split.label.get()));
      assert_eq!(res.insns[at + 1], TInst::Save(1, 8));
      assert_eq!(res.insns[at + 2], TInst::Save(2, 16));
      assert_eq!(res.insns[at + 3], TInst::Br(vec![3]));
    }
    // Both restores go before 3's return.
    let ret = res
      .insns
      .iter()
      .enumerate()
      .filter(|(_, i)| **i == TInst::Ret)
      .map(|(ix, _)| ix)
      .find(|ix| res.insns[ix - 1] == TInst::Restore(2, 16))
      .unwrap();
    assert_eq!(res.insns[ret - 2], TInst::Restore(1, 8));
  }

  fn loop_func() -> TestFunc {
    // 0 -> {2, 1}; 1 -> {5, 3}; 2 -> {6, 3}; 3 -> 4; 4 -> {3, 7}.
    // 3 is the header, 4 the latch; 5, 6 and 7 return.  r1 in the latch.
    cfg_func_with_uses(
      &[&[2, 1], &[5, 3], &[6, 3], &[4], &[3, 7], &[], &[], &[]],
      &[5, 6, 7],
      &[&[], &[], &[], &[], &[1]],
    )
  }

  #[test]
  fn loop_save_goes_to_the_pre_header() {
    let func = loop_func();
    let res = run(&func, &TestLinkage::new(&[1]), ShrinkWrapConfig::default());
    let info = res.info_for(RealReg::new(1)).unwrap();
    assert_eq!(info.save_blocks.to_vec(), vec![3]);
    assert_eq!(info.restore_blocks.to_vec(), vec![7]);
    assert_eq!(res.num_edge_splits, 0);

    let start3 = position(&res.insns, &TInst::Start(3));
    assert_eq!(res.insns[start3 + 1], TInst::Lbl(8));
    assert_eq!(res.insns[start3 + 2], TInst::Save(1, 8));
    assert_eq!(res.insns[start3 + 3], TInst::Lbl(3));
    // 1 enters through the pre-header; the latch still uses the old label.
    assert!(res.insns.contains(&TInst::Br(vec![5, 8])));
    assert!(res.insns.contains(&TInst::Br(vec![3, 7])));
    assert_eq!(res.insns.iter().filter(|i| matches!(i, TInst::Save(..))).count(), 1);
    let ret7 = res
      .insns
      .iter()
      .rposition(|i| *i == TInst::Ret)
      .unwrap();
    assert_eq!(res.insns[ret7 - 1], TInst::Restore(1, 8));
  }

  #[test]
  fn throwing_pre_header_predecessor() {
    // 0 may throw to 4; 0 -> 1 -> 2 -> {1, 3}; 3 and 4 return.  r1 in the
    // latch.
    let func = build_func(
      &[&[1], &[2], &[1, 3], &[], &[]],
      &[3, 4],
      vec![vec![TInst::Throw(4)], vec![], vec![TInst::Use(1)], vec![], vec![]],
    );
    let res = run(&func, &TestLinkage::new(&[1]), ShrinkWrapConfig::default());
    assert_eq!(res.status.code(), 1);
    assert_eq!(res.prologue_regs, Some(BitSet::empty()));
    let info = res.info_for(RealReg::new(1)).unwrap();
    assert_eq!(info.save_blocks.to_vec(), vec![1]);
    assert_eq!(info.restore_blocks.to_vec(), vec![3]);

    let start1 = position(&res.insns, &TInst::Start(1));
    assert_eq!(res.insns[start1 + 1], TInst::Lbl(5));
    assert_eq!(res.insns[start1 + 2], TInst::Save(1, 8));
    assert_eq!(res.insns[start1 + 3], TInst::Lbl(1));
    let start3 = position(&res.insns, &TInst::Start(3));
    assert_eq!(res.insns[start3 + 2], TInst::Restore(1, 8));
    assert_eq!(res.insns[start3 + 3], TInst::Ret);
    // The catch block never sees r1.
    let start4 = position(&res.insns, &TInst::Start(4));
    assert_eq!(res.insns[start4 + 2], TInst::Ret);
  }

  #[test]
  fn throwing_predecessor_of_save_blocks() {
    // 0 may throw to 5; 0 -> {2, 1}; 1 -> 3; 2 -> 3; 3 -> 4; 4 and 5
    // return.  r1 in 3.
    let func = build_func(
      &[&[2, 1], &[3], &[3], &[4], &[], &[]],
      &[4, 5],
      vec![
        vec![TInst::Throw(5)],
        vec![],
        vec![],
        vec![TInst::Use(1)],
        vec![],
        vec![],
      ],
    );
    let res = run(&func, &TestLinkage::new(&[1]), ShrinkWrapConfig::default());
    assert_eq!(res.status.code(), 1);
    let info = res.info_for(RealReg::new(1)).unwrap();
    assert_eq!(info.save_blocks.to_vec(), vec![1, 2]);
    assert_eq!(info.restore_blocks.to_vec(), vec![4]);
    assert_eq!(res.num_edge_splits, 0);
    for l in &[1, 2] {
      let lbl = position(&res.insns, &TInst::Lbl(*l));
      assert_eq!(res.insns[lbl + 1], TInst::Save(1, 8));
    }
    assert_eq!(res.insns.iter().filter(|i| matches!(i, TInst::Save(..))).count(), 2);
  }

  #[test]
  fn catch_block_inside_the_save_region() {
    // 0 -> {3, 1}; 1 -> 2 -> 3; 1 may throw to 4; 3 and 4 return.  r1 in 1
    // and 2.
    let func = build_func(
      &[&[3, 1], &[2], &[3], &[], &[]],
      &[3, 4],
      vec![
        vec![],
        vec![TInst::Use(1), TInst::Throw(4)],
        vec![TInst::Use(1)],
        vec![],
        vec![],
      ],
    );
    let res = run(&func, &TestLinkage::new(&[1]), ShrinkWrapConfig::default());
    assert_eq!(res.status.code(), 1);
    let info = res.info_for(RealReg::new(1)).unwrap();
    assert_eq!(info.save_blocks.to_vec(), vec![1]);
    assert_eq!(info.restore_blocks.to_vec(), vec![2, 4]);

    let lbl1 = position(&res.insns, &TInst::Lbl(1));
    assert_eq!(res.insns[lbl1 + 1], TInst::Save(1, 8));
    let end2 = position(&res.insns, &TInst::End(2));
    assert_eq!(res.insns[end2 - 1], TInst::Restore(1, 8));
    // The catch block restores on its way out.
    let start4 = position(&res.insns, &TInst::Start(4));
    assert_eq!(res.insns[start4 + 2], TInst::Restore(1, 8));
    assert_eq!(res.insns[start4 + 3], TInst::Ret);
  }

  #[test]
  fn errors_have_messages() {
    assert_eq!(
      ShrinkWrapError::Interrupted.to_string(),
      "compilation interrupted"
    );
    assert_eq!(
      format!("{}", ShrinkWrapError::InvariantViolation("oops".to_string())),
      "shrink wrapping invariant violated: oops"
    );
  }

  #[test]
  fn restore_in_a_loop_falls_back() {
    // 0 -> {1, 3}; 1 -> 2; 2 -> {1, 3}; r1 in 2.  The loop exits into 3,
    // which is also reached without entering the loop.
    let func = cfg_func_with_uses(
      &[&[3, 1], &[2], &[1, 3], &[]],
      &[3],
      &[&[], &[], &[1]],
    );
    let res = run(&func, &TestLinkage::new(&[1]), ShrinkWrapConfig::default());
    assert_eq!(res.status, ShrinkWrapStatus::Skipped(SkipReason::NothingToWrap));
    assert!(res.info_for(RealReg::new(1)).unwrap().save_blocks.is_empty());
    assert_eq!(res.insns, func.insns);
  }

  #[test]
  fn coalescing_follows_the_config() {
    // 0 -> {2, 1}; 1 -> 3; 2 -> 3; r1, r2, r3 in 1.
    let func = cfg_func_with_uses(
      &[&[2, 1], &[3], &[3], &[]],
      &[3],
      &[&[], &[1, 2, 3]],
    );
    let mut linkage = TestLinkage::new(&[1, 2, 3]);
    linkage.lsm = true;

    let res = run(&func, &linkage, ShrinkWrapConfig::default());
    assert_eq!(res.insns.iter().filter(|i| matches!(i, TInst::Save(..))).count(), 3);

    let res = run(&func, &linkage, ShrinkWrapConfig::all());
    assert!(res.insns.contains(&TInst::SaveM(1, 3, 8)));
    assert!(res.insns.contains(&TInst::RestoreM(1, 3, 8)));
    assert!(!res.insns.iter().any(|i| matches!(i, TInst::Save(..))));
  }

  #[test]
  fn load_store_multiple_needs_enough_registers() {
    let func = cfg_func_with_uses(
      &[&[2, 1], &[3], &[3], &[]],
      &[3],
      &[&[], &[1, 2]],
    );
    let mut linkage = TestLinkage::new(&[1, 2]);
    linkage.lsm = true;
    let res = run(&func, &linkage, ShrinkWrapConfig::all());
    assert_eq!(res.status, ShrinkWrapStatus::Skipped(SkipReason::NothingToWrap));
  }

  #[test]
  fn save_descriptions_reach_gc_maps() {
    // As the single-predecessor case, with a call in the wrapped block and
    // one after it.
    let func = build_func(
      &[&[1], &[3, 2], &[3], &[]],
      &[3],
      vec![
        vec![],
        vec![TInst::Call(0)],
        vec![TInst::Use(1), TInst::Call(0)],
        vec![TInst::Call(0)],
      ],
    );
    let res = run(&func, &TestLinkage::new(&[1]), ShrinkWrapConfig::default());
    assert_eq!(res.save_descriptions[b(2)].to_vec(), vec![1]);
    assert_eq!(res.save_description_bits[b(2)], 1 << 1);
    assert!(res.save_descriptions[b(1)].is_empty());
    assert!(res.save_descriptions[b(3)].is_empty());
    let calls: Vec<&TInst> =
      res.insns.iter().filter(|i| matches!(i, TInst::Call(_))).collect();
    assert_eq!(calls, vec![&TInst::Call(0), &TInst::Call(2), &TInst::Call(0)]);
  }

  #[test]
  fn early_exits() {
    let func = cfg_func_with_uses(&[&[1], &[]], &[1], &[&[], &[1]]);
    let mut linkage = TestLinkage::new(&[1]);
    linkage.supported = false;
    let res = run(&func, &linkage, ShrinkWrapConfig::default());
    assert_eq!(res.status, ShrinkWrapStatus::Skipped(SkipReason::UnsupportedTarget));

    let res = run(&func, &TestLinkage::new(&[4]), ShrinkWrapConfig::default());
    assert_eq!(
      res.status,
      ShrinkWrapStatus::Skipped(SkipReason::NoPreservedRegisters)
    );

    // Block 1 is unreachable.
    let func = cfg_func_with_uses(&[&[], &[]], &[0, 1], &[&[1], &[1]]);
    let res = run(&func, &TestLinkage::new(&[1]), ShrinkWrapConfig::default());
    assert!(matches!(res.status, ShrinkWrapStatus::Skipped(SkipReason::MalformedCfg(_))));

    // 0 -> {1, 2}; 1 -> 2; 2 -> {1, 3}
    let func =
      cfg_func_with_uses(&[&[1, 2], &[2], &[1, 3], &[]], &[3], &[&[], &[1]]);
    let res = run(&func, &TestLinkage::new(&[1]), ShrinkWrapConfig::default());
    assert_eq!(res.status, ShrinkWrapStatus::Skipped(SkipReason::ImproperRegions));

    let func = cfg_func_with_uses(&[&[1, 2, 3], &[], &[], &[]], &[1, 2, 3], &[]);
    let res = run(&func, &TestLinkage::new(&[1]), ShrinkWrapConfig::default());
    assert_eq!(res.status, ShrinkWrapStatus::Skipped(SkipReason::MultiwayBranch));
  }

  #[test]
  fn interrupt_leaves_function_untouched() {
    let mut succs: Vec<Vec<u32>> = (0..30).map(|i| vec![i + 1]).collect();
    succs.push(vec![]);
    let succ_refs: Vec<&[u32]> = succs.iter().map(|v| &v[..]).collect();
    let func = cfg_func_with_uses(&succ_refs, &[30], &[&[], &[1]]);
    let always = || true;
    let opts = Options {
      config: ShrinkWrapConfig::default(),
      interrupt: Some(&always),
      run_checker: false,
    };
    match shrink_wrap_function(&func, &TestLinkage::new(&[1]), &opts) {
      Err(ShrinkWrapError::Interrupted) => {}
      _ => panic!("expected the pass to be interrupted"),
    }
  }

  #[test]
  fn save_restore_equations_on_a_straight_line() {
    // In a straight line every register ends up saved on entry.
    let func = cfg_func_with_uses(&[&[1], &[2], &[]], &[2], &[&[], &[1]]);
    let cfg = CfgInfo::create(&func).unwrap();
    let tree = StructureTree::build(&cfg);
    let preserved = BitSet::unit(1);
    let usage = analyze_instructions(&func, &cfg, &tree, &preserved);
    let rant = compute_anticipatability(&usage, 16, &cfg, &tree, None).unwrap();
    let ravl = compute_availability(&usage, 16, &cfg, &tree, None).unwrap();
    let (save, restore) =
      compute_save_restore_sets(&cfg, &rant, &ravl, &preserved, 16);
    assert_eq!(save[cfg.start].to_vec(), vec![1]);
    assert!(save[b(1)].is_empty());
    assert_eq!(restore[cfg.end].to_vec(), vec![1]);
    assert_eq!(restore[b(2)].to_vec(), vec![1]);
  }

  #[test]
  fn loop_usage_spreads_over_the_nest() {
    let func = loop_func();
    let cfg = CfgInfo::create(&func).unwrap();
    let tree = StructureTree::build(&cfg);
    let usage = analyze_instructions(&func, &cfg, &tree, &BitSet::unit(1));
    assert!(usage[b(3)].contains(1));
    assert!(usage[b(4)].contains(1));
    assert!(!usage[b(1)].contains(1));
  }
}
