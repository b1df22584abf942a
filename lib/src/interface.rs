/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! This is the top level interface for the shrinkwrap library.

use smallvec::SmallVec;
use std::fmt;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

// Stuff that is defined by the library

// Sets and maps of things.  The interface needs some way to speak about them,
// so let's use the library-provided versions.

pub use crate::bit_set::BitSet;
pub use crate::data_structures::Map;

// TypedIxVector, so that the interface can speak about vectors of blocks and
// instructions.

pub use crate::data_structures::TypedIxVec;
pub use crate::data_structures::{BlockIx, InstIx, Label, MyRange, RealReg};

// Analyses which clients may want to run on their own.

pub use crate::analysis::{CfgError, CfgInfo};
pub use crate::checker::{
  check_save_restore_pairing, CheckerError, CheckerErrors,
};
pub use crate::dataflow::{
  DataFlowEngine, DataFlowProblem, DataFlowSolution, Direction, GenKill, Meet,
};
pub use crate::liveness::{RegisterAnticipatability, RegisterAvailability};
pub use crate::shrink_wrap::{PreservedRegisterInfo, ReturnKind};
pub use crate::structure::{StructureKind, StructureTree};

/// Block boundary markers.  Every block's instruction range begins with a
/// `BlockStart` and ends with a `BlockEnd` for that block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fence {
  BlockStart(BlockIx),
  BlockEnd(BlockIx),
}

/// The effect an instruction has on callee-saved register slots.  Used by the
/// pairing checker to recognise what the pass inserted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveRestoreEffect {
  Save { first: RealReg, last: RealReg },
  Restore { first: RealReg, last: RealReg },
}

/// A trait defined by the client to provide access to its machine-instruction
/// / CFG representation.
pub trait Function {
  /// The pass is parameterized on F: Function and so can use the projected
  /// type F::Inst.
  type Inst: Clone + fmt::Debug;

  // -------------
  // CFG traversal
  // -------------

  /// A name for the function, for debug printing.
  fn func_name(&self) -> String;

  /// Allow access to the underlying vector of instructions.
  fn insns(&self) -> &[Self::Inst];

  /// Allow iteration over basic blocks (in layout order).
  fn blocks(&self) -> MyRange<BlockIx>;

  /// Get the index of the entry block.
  fn entry_block(&self) -> BlockIx;

  /// Provide the range of instruction indices contained in each block,
  /// from its `BlockStart` fence to its `BlockEnd` fence inclusive.
  fn block_insns(&self, block: BlockIx) -> MyRange<InstIx>;

  /// Get the regular CFG successors for a given block.
  fn block_succs(&self, block: BlockIx) -> Vec<BlockIx>;

  /// Get the exception successors (catch handlers) for a given block.
  fn block_exception_succs(&self, _block: BlockIx) -> Vec<BlockIx> {
    vec![]
  }

  /// Does control leave the method from this block, by return or by an
  /// uncaught throw?
  fn block_exits_method(&self, block: BlockIx) -> bool;

  /// Registers carrying incoming arguments; they count as used on entry.
  fn incoming_arg_regs(&self) -> Vec<RealReg> {
    vec![]
  }

  /// Labels `0 .. num_labels()` are in use.  Fresh labels are allocated
  /// above that.
  fn num_labels(&self) -> u32;

  // ------------------------
  // Instruction queries
  // ------------------------

  fn fence(&self, insn: &Self::Inst) -> Option<Fence>;

  fn label_of(&self, insn: &Self::Inst) -> Option<Label>;

  /// The labels a branch may transfer to.  Empty for non-branches.
  fn branch_targets(&self, insn: &Self::Inst) -> SmallVec<[Label; 2]>;

  /// Switches and table jumps.
  fn is_multiway_branch(&self, insn: &Self::Inst) -> bool;

  fn is_return(&self, insn: &Self::Inst) -> bool;

  /// Control never falls through past this instruction.
  fn ends_flow(&self, insn: &Self::Inst) -> bool;

  /// Alignment padding placed ahead of a block's label.
  fn is_alignment(&self, _insn: &Self::Inst) -> bool {
    false
  }

  /// Add the real registers read or written by `insn` to `uses`.
  fn reg_uses(&self, insn: &Self::Inst, uses: &mut BitSet);

  /// Add the registers touched by out-of-line code reachable from `insn`
  /// (for example a slow-path snippet behind a branch).
  fn out_of_line_reg_uses(&self, _insn: &Self::Inst, _uses: &mut BitSet) {}

  /// The catch block control transfers to if `insn` throws.
  fn exception_handler(&self, _insn: &Self::Inst) -> Option<BlockIx> {
    None
  }

  /// Does this instruction carry a GC map?
  fn needs_gc_map(&self, _insn: &Self::Inst) -> bool {
    false
  }

  /// Record the register save description for a GC-map instruction.
  fn set_register_save_description(&self, _insn: &mut Self::Inst, _rsd: u32) {
  }

  /// Recognise saves and restores of callee-saved registers.
  fn preserved_reg_effect(
    &self, _insn: &Self::Inst,
  ) -> Option<SaveRestoreEffect> {
    None
  }

  // ------------------------
  // Instruction construction
  // ------------------------

  /// Make `insn` branch to `to` wherever it branched to `from`.
  fn retarget_branch(&self, insn: &mut Self::Inst, from: Label, to: Label);

  fn gen_label(&self, label: Label) -> Self::Inst;

  fn gen_jump(&self, target: Label) -> Self::Inst;
}

/// The callee-saved registers of the linkage, with their frame offsets.
#[derive(Clone, Debug)]
pub struct PreservedRegisterMap {
  pub slots: Vec<(RealReg, i32)>,
  /// Saves are pushes rather than stores; every save then gets offset -1.
  pub uses_pushes: bool,
}

/// A trait defined by the client describing the calling convention and the
/// CPU's save/restore instructions.
pub trait Linkage<F: Function> {
  fn supports_shrink_wrapping(&self) -> bool;

  /// Register numbers are `0 .. num_regs()`.
  fn num_regs(&self) -> u32;

  fn map_preserved_registers_to_stack_offsets(&self) -> PreservedRegisterMap;

  fn save_preserved_register(&self, reg: RealReg, offset: i32) -> F::Inst;

  fn restore_preserved_register(&self, reg: RealReg, offset: i32) -> F::Inst;

  /// One instruction saving (or restoring) the consecutive registers
  /// `first ..= last`, the first of which lives at `offset`.
  fn compose_saves_restores(
    &self, first: RealReg, last: RealReg, offset: i32, is_save: bool,
  ) -> F::Inst;

  fn uses_load_store_multiple(&self) -> bool {
    false
  }

  /// Encode the set of registers saved at a point for the GC maps.
  fn compute_register_save_description(&self, regs: &BitSet) -> u32;
}

/// Selects which placement locations get consecutive saves/restores fused
/// into load/store-multiple instructions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct ShrinkWrapConfig {
  pub coalesce_split_saves: bool,
  pub coalesce_split_restores: bool,
  pub coalesce_block_saves: bool,
  pub coalesce_block_restores: bool,
}

impl ShrinkWrapConfig {
  pub fn all() -> Self {
    Self {
      coalesce_split_saves: true,
      coalesce_split_restores: true,
      coalesce_block_saves: true,
      coalesce_block_restores: true,
    }
  }
}

/// Options for a single run of the pass.
#[derive(Clone, Copy, Default)]
pub struct Options<'a> {
  pub config: ShrinkWrapConfig,
  /// Polled periodically by the data-flow engine; returning true abandons
  /// the pass.
  pub interrupt: Option<&'a dyn Fn() -> bool>,
  /// Run the save/restore pairing checker on the result.
  pub run_checker: bool,
}

impl<'a> fmt::Debug for Options<'a> {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    fmt
      .debug_struct("Options")
      .field("config", &self.config)
      .field("interrupt", &self.interrupt.is_some())
      .field("run_checker", &self.run_checker)
      .finish()
  }
}

#[derive(Clone, Debug)]
pub enum ShrinkWrapError {
  /// The compilation-interrupt predicate tripped.
  Interrupted,
  /// Internal inconsistency; this is a bug.
  InvariantViolation(String),
}

impl fmt::Display for ShrinkWrapError {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      ShrinkWrapError::Interrupted => write!(fmt, "compilation interrupted"),
      ShrinkWrapError::InvariantViolation(msg) => {
        write!(fmt, "shrink wrapping invariant violated: {}", msg)
      }
    }
  }
}

/// Why the pass left the function alone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
  UnsupportedTarget,
  MalformedCfg(CfgError),
  ImproperRegions,
  MultiwayBranch,
  NoPreservedRegisters,
  /// Every register ended up in the prologue, or load/store multiple makes
  /// wrapping a handful of registers pointless.
  NothingToWrap,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShrinkWrapStatus {
  Applied { wrapped: BitSet },
  Skipped(SkipReason),
}

impl ShrinkWrapStatus {
  /// 1 if any register was shrink-wrapped, 0 otherwise.
  pub fn code(&self) -> u32 {
    match self {
      ShrinkWrapStatus::Applied { .. } => 1,
      ShrinkWrapStatus::Skipped(_) => 0,
    }
  }
}

/// A split CFG edge and the label of the code placed on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EdgeSplit {
  pub from: BlockIx,
  pub to: BlockIx,
  pub label: Label,
}

/// The result of shrink wrapping.
pub struct ShrinkWrapResult<F: Function> {
  /// The new instruction sequence.  Identical to the input when skipped.
  pub insns: Vec<F::Inst>,

  pub status: ShrinkWrapStatus,

  /// The registers the client's prologue must save (and epilogue restore).
  /// `None` means the client should save every callee-saved register the
  /// method uses, as if the pass had not run.
  pub prologue_regs: Option<BitSet>,

  /// Per callee-saved register used in the method: where it is saved and
  /// restored.
  pub preserved: Vec<PreservedRegisterInfo>,

  /// SAVE and RESTORE sets, indexed by block, including the synthetic
  /// START and END blocks that follow the real ones.
  pub save_sets: TypedIxVec<BlockIx, BitSet>,
  pub restore_sets: TypedIxVec<BlockIx, BitSet>,

  /// Registers holding saved values on entry to each block, and their
  /// linkage encoding as written into GC maps.
  pub save_descriptions: TypedIxVec<BlockIx, BitSet>,
  pub save_description_bits: TypedIxVec<BlockIx, u32>,

  pub edge_splits: Vec<EdgeSplit>,
  pub num_edge_splits: u32,

  /// Labels `0 .. num_labels` are now in use.
  pub num_labels: u32,
}

impl<F: Function> ShrinkWrapResult<F> {
  pub fn info_for(&self, reg: RealReg) -> Option<&PreservedRegisterInfo> {
    self.preserved.iter().find(|info| info.reg == reg)
  }
}

/// Shrink-wrap the callee-saved register saves and restores of `func`.
///
/// On success the caller replaces its instructions with `result.insns` and
/// emits prologue saves for `result.prologue_regs`.  An `Err` leaves nothing
/// to apply.
pub fn shrink_wrap_function<F: Function, L: Linkage<F>>(
  func: &F, linkage: &L, opts: &Options,
) -> Result<ShrinkWrapResult<F>, ShrinkWrapError> {
  crate::shrink_wrap::perform(func, linkage, opts)
}
