/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Checker: verifies that the saves and restores in a rewritten instruction
//! stream pair up on every path.
//!
//! The checker works on the instruction-level CFG, so edge splits and
//! pre-header labels need no special treatment.  For each tracked register
//! it computes the set of states the register may be in at each program
//! point:
//!
//!   - `Unsaved`: the caller's value, never saved on this path;
//!   - `Saved`: the caller's value is in its frame slot;
//!   - `Restored`: the slot has been reloaded.
//!
//! On entry every tracked register is `Unsaved`.  At joins the state sets are
//! unioned.  Once the fixpoint is reached, each instruction is checked
//! against the state on entry to it:
//!
//!   - a save needs no path on which the register is already `Saved`;
//!   - a restore needs the register to be `Saved` on every path;
//!   - any other use needs the register to be `Saved` on every path;
//!   - a return needs no path on which the register is still `Saved`.

use log::debug;

use crate::bit_set::BitSet;
use crate::data_structures::{InstIx, Label, Map, Queue, RealReg};
use crate::interface::{Fence, Function, SaveRestoreEffect};

/// The set of states a tracked register may be in at a program point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CheckerValue(u8);

impl CheckerValue {
  const UNSAVED: u8 = 1;
  const SAVED: u8 = 2;
  const RESTORED: u8 = 4;

  fn unsaved() -> Self {
    CheckerValue(Self::UNSAVED)
  }
  fn saved() -> Self {
    CheckerValue(Self::SAVED)
  }
  fn restored() -> Self {
    CheckerValue(Self::RESTORED)
  }

  pub fn may_be_saved(self) -> bool {
    self.0 & Self::SAVED != 0
  }

  pub fn must_be_saved(self) -> bool {
    self.0 == Self::SAVED
  }

  /// Meet function of the lattice: paths contribute their states.
  pub fn meet(self, other: CheckerValue) -> CheckerValue {
    CheckerValue(self.0 | other.0)
  }
}

/// State that steps through program points as we scan over the instruction
/// stream.  Registers are those of the tracked set, in ascending order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckerState {
  values: Vec<CheckerValue>,
}

impl CheckerState {
  fn entry(num_tracked: usize) -> Self {
    CheckerState { values: vec![CheckerValue::unsaved(); num_tracked] }
  }

  /// Merge this checker state with another at a CFG join-point.  Returns
  /// whether anything changed.
  pub fn meet_with(&mut self, other: &CheckerState) -> bool {
    let mut changed = false;
    for (v, o) in self.values.iter_mut().zip(other.values.iter()) {
      let m = v.meet(*o);
      changed |= m != *v;
      *v = m;
    }
    changed
  }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckerError {
  DoubleSave { insn: InstIx, reg: RealReg },
  RestoreWithoutSave { insn: InstIx, reg: RealReg },
  UseOutsideSaveRegion { insn: InstIx, reg: RealReg },
  ReturnWithoutRestore { insn: InstIx, reg: RealReg },
}

/// A list of checker errors, collected over the whole stream.
#[derive(Clone, Debug)]
pub struct CheckerErrors {
  pub errors: Vec<CheckerError>,
}

struct Checker<'a, F: Function> {
  func: &'a F,
  insns: &'a [F::Inst],
  /// Tracked registers in ascending order; `slot[r]` is the position of r.
  tracked: Vec<u32>,
  slot: Map<u32, usize>,
  /// In-state of every instruction; `None` if not reached.
  states: Vec<Option<CheckerState>>,
}

impl<'a, F: Function> Checker<'a, F> {
  fn new(func: &'a F, insns: &'a [F::Inst], tracked: &BitSet) -> Self {
    let tracked = tracked.to_vec();
    let slot = tracked.iter().enumerate().map(|(i, r)| (*r, i)).collect();
    Checker { func, insns, tracked, slot, states: vec![None; insns.len()] }
  }

  fn effect_regs(&self, first: RealReg, last: RealReg) -> Vec<usize> {
    (first.get()..=last.get()).filter_map(|r| self.slot.get(&r).cloned()).collect()
  }

  fn used_slots(&self, insn: &F::Inst) -> Vec<usize> {
    let mut uses = BitSet::empty();
    self.func.reg_uses(insn, &mut uses);
    if !self.func.branch_targets(insn).is_empty() {
      self.func.out_of_line_reg_uses(insn, &mut uses);
    }
    uses.iter().filter_map(|r| self.slot.get(&r).cloned()).collect()
  }

  /// Apply the instruction at `ix`, recording violations in `errors` if
  /// given.
  fn step(
    &self, ix: usize, state: &mut CheckerState,
    mut errors: Option<&mut Vec<CheckerError>>,
  ) {
    let insn = &self.insns[ix];
    let iix = InstIx::new(ix as u32);
    match self.func.preserved_reg_effect(insn) {
      Some(SaveRestoreEffect::Save { first, last }) => {
        for s in self.effect_regs(first, last) {
          if state.values[s].may_be_saved() {
            if let Some(errs) = errors.as_mut() {
              errs.push(CheckerError::DoubleSave {
                insn: iix,
                reg: RealReg::new(self.tracked[s]),
              });
            }
          }
          state.values[s] = CheckerValue::saved();
        }
      }
      Some(SaveRestoreEffect::Restore { first, last }) => {
        for s in self.effect_regs(first, last) {
          if !state.values[s].must_be_saved() {
            if let Some(errs) = errors.as_mut() {
              errs.push(CheckerError::RestoreWithoutSave {
                insn: iix,
                reg: RealReg::new(self.tracked[s]),
              });
            }
          }
          state.values[s] = CheckerValue::restored();
        }
      }
      None => {
        if let Some(errs) = errors.as_mut() {
          for s in self.used_slots(insn) {
            if !state.values[s].must_be_saved() {
              errs.push(CheckerError::UseOutsideSaveRegion {
                insn: iix,
                reg: RealReg::new(self.tracked[s]),
              });
            }
          }
          if self.func.is_return(insn) {
            for (s, v) in state.values.iter().enumerate() {
              if v.may_be_saved() {
                errs.push(CheckerError::ReturnWithoutRestore {
                  insn: iix,
                  reg: RealReg::new(self.tracked[s]),
                });
              }
            }
          }
        }
      }
    }
  }

  fn succs(
    &self, ix: usize, labels: &Map<Label, usize>,
    block_starts: &Map<u32, usize>,
  ) -> Vec<usize> {
    let insn = &self.insns[ix];
    if self.func.is_return(insn) {
      return vec![];
    }
    let mut succs: Vec<usize> = self
      .func
      .branch_targets(insn)
      .iter()
      .filter_map(|l| labels.get(l).cloned())
      .collect();
    if !self.func.ends_flow(insn) && ix + 1 < self.insns.len() {
      succs.push(ix + 1);
    }
    if let Some(h) = self.func.exception_handler(insn) {
      if let Some(pos) = block_starts.get(&h.get()) {
        succs.push(*pos);
      }
    }
    succs
  }

  fn run(mut self) -> Result<(), CheckerErrors> {
    let mut labels = Map::<Label, usize>::default();
    let mut block_starts = Map::<u32, usize>::default();
    for (i, insn) in self.insns.iter().enumerate() {
      if let Some(l) = self.func.label_of(insn) {
        labels.insert(l, i);
      }
      if let Some(Fence::BlockStart(b)) = self.func.fence(insn) {
        block_starts.insert(b.get(), i);
      }
    }
    if self.insns.is_empty() {
      return Ok(());
    }
    let entry =
      block_starts.get(&self.func.entry_block().get()).cloned().unwrap_or(0);

    // === BEGIN fixpoint ===
    let mut queue = Queue::<usize>::new();
    self.states[entry] = Some(CheckerState::entry(self.tracked.len()));
    queue.push_back(entry);
    while let Some(ix) = queue.pop_front() {
      let mut state = match &self.states[ix] {
        Some(state) => state.clone(),
        None => continue,
      };
      self.step(ix, &mut state, None);
      for s in self.succs(ix, &labels, &block_starts) {
        let changed = if let Some(existing) = self.states[s].as_mut() {
          existing.meet_with(&state)
        } else {
          self.states[s] = Some(state.clone());
          true
        };
        if changed {
          queue.push_back(s);
        }
      }
    }
    // === END fixpoint ===

    let mut errors = vec![];
    for ix in 0..self.insns.len() {
      if let Some(state) = &self.states[ix] {
        let mut state = state.clone();
        self.step(ix, &mut state, Some(&mut errors));
      }
    }
    if errors.is_empty() {
      Ok(())
    } else {
      debug!("checker: {} errors: {:?}", errors.len(), errors);
      Err(CheckerErrors { errors })
    }
  }
}

/// Check that the saves and restores of the `tracked` registers in `insns`
/// pair up on every path through `func`'s rewritten code.
pub fn check_save_restore_pairing<F: Function>(
  func: &F, insns: &[F::Inst], tracked: &BitSet,
) -> Result<(), CheckerErrors> {
  Checker::new(func, insns, tracked).run()
}
