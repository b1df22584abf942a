/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

#![allow(non_snake_case)]
#![allow(non_camel_case_types)]

/// As part of this set of test cases, we define a mini IR and implement the
/// `Function` and `Linkage` traits for it so that we can use the shrinkwrap
/// public interface.
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use shrinkwrap::{
  BitSet, BlockIx, Fence, InstIx, Label as LabelIx, MyRange,
  PreservedRegisterInfo, PreservedRegisterMap, RealReg, SaveRestoreEffect,
  ShrinkWrapResult, TypedIxVec,
};

use std::fmt;

/// Registers `0 .. NUM_REGS`; the top half is callee-saved.
pub const NUM_REGS: u32 = 16;
pub const FIRST_PRESERVED: u32 = 8;

pub fn r(n: u32) -> RealReg {
  RealReg::new(n)
}

//=============================================================================
// Definition of: Label, RI (reg-or-immediate operands) and Inst
// (instructions).  Destinations are on the left.

#[derive(Clone)]
pub enum Label {
  Unresolved { name: String },
  Resolved { name: String, ix: LabelIx },
}
impl fmt::Debug for Label {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Label::Unresolved { name } => write!(fmt, "??:{}", &name),
      Label::Resolved { name, ix } => write!(fmt, "{:?}:{}", ix, name),
    }
  }
}
impl Label {
  pub fn newUnresolved(name: String) -> Label {
    Label::Unresolved { name }
  }
  pub fn getLabelIx(&self) -> LabelIx {
    match self {
      Label::Resolved { name: _, ix } => *ix,
      Label::Unresolved { .. } => {
        panic!("Label::getLabelIx: unresolved label!")
      }
    }
  }
  // Block labels are numbered by block.
  pub fn getBlockIx(&self) -> BlockIx {
    BlockIx::new(self.getLabelIx().get())
  }
  fn retarget(&mut self, from: LabelIx, to: LabelIx) {
    if let Label::Resolved { name, ix } = self {
      if *ix == from {
        *name = format!("split{}", to.get());
        *ix = to;
      }
    }
  }
}

#[derive(Copy, Clone)]
pub enum RI {
  Reg { reg: RealReg },
  Imm { imm: u32 },
}
pub fn RI_R(reg: RealReg) -> RI {
  RI::Reg { reg }
}
pub fn RI_I(imm: u32) -> RI {
  RI::Imm { imm }
}
impl fmt::Debug for RI {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      RI::Reg { reg } => write!(fmt, "{:?}", reg),
      RI::Imm { imm } => write!(fmt, "{}", imm),
    }
  }
}

#[derive(Copy, Clone, PartialEq)]
pub enum BinOp {
  Add,
  Sub,
  Mul,
  And,
  CmpEQ,
  CmpLT,
  CmpGT,
}
impl fmt::Debug for BinOp {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(
      fmt,
      "{}",
      match self {
        BinOp::Add => "add",
        BinOp::Sub => "sub",
        BinOp::Mul => "mul",
        BinOp::And => "and",
        BinOp::CmpEQ => "cmpeq",
        BinOp::CmpLT => "cmplt",
        BinOp::CmpGT => "cmpgt",
      }
    )
  }
}
impl BinOp {
  pub fn calc(self, argL: u32, argR: u32) -> u32 {
    match self {
      BinOp::Add => argL.wrapping_add(argR),
      BinOp::Sub => argL.wrapping_sub(argR),
      BinOp::Mul => argL.wrapping_mul(argR),
      BinOp::And => argL & argR,
      BinOp::CmpEQ => (argL == argR) as u32,
      BinOp::CmpLT => (argL < argR) as u32,
      BinOp::CmpGT => (argL > argR) as u32,
    }
  }
}

#[derive(Clone)]
pub enum Inst {
  BlockStart { bix: BlockIx },
  BlockEnd { bix: BlockIx },
  Label { label: Label },
  Align,
  Imm { dst: RealReg, imm: u32 },
  BinOp { op: BinOp, dst: RealReg, srcL: RealReg, srcR: RI },
  PrintS { str: String },
  PrintI { reg: RealReg },
  /// A call site; carries a GC map with the register save description.
  Call { rsd: u32 },
  /// Throws to `handler` if `cond` is nonzero.
  MayThrow { cond: RealReg, handler: Label },
  Goto { target: Label },
  GotoCTF { cond: RealReg, targetT: Label, targetF: Label },
  Switch { reg: RealReg, targets: Vec<Label> },
  Finish { reg: Option<RealReg> },
  /// Throws out of the method.
  Raise,
  Save { reg: RealReg, offset: i32 },
  Restore { reg: RealReg, offset: i32 },
  SaveMultiple { first: RealReg, last: RealReg, offset: i32 },
  RestoreMultiple { first: RealReg, last: RealReg, offset: i32 },
}

pub fn i_imm(dst: RealReg, imm: u32) -> Inst {
  Inst::Imm { dst, imm }
}
pub fn i_add(dst: RealReg, srcL: RealReg, srcR: RI) -> Inst {
  Inst::BinOp { op: BinOp::Add, dst, srcL, srcR }
}
pub fn i_sub(dst: RealReg, srcL: RealReg, srcR: RI) -> Inst {
  Inst::BinOp { op: BinOp::Sub, dst, srcL, srcR }
}
pub fn i_mul(dst: RealReg, srcL: RealReg, srcR: RI) -> Inst {
  Inst::BinOp { op: BinOp::Mul, dst, srcL, srcR }
}
pub fn i_and(dst: RealReg, srcL: RealReg, srcR: RI) -> Inst {
  Inst::BinOp { op: BinOp::And, dst, srcL, srcR }
}
pub fn i_cmp_eq(dst: RealReg, srcL: RealReg, srcR: RI) -> Inst {
  Inst::BinOp { op: BinOp::CmpEQ, dst, srcL, srcR }
}
pub fn i_cmp_lt(dst: RealReg, srcL: RealReg, srcR: RI) -> Inst {
  Inst::BinOp { op: BinOp::CmpLT, dst, srcL, srcR }
}
pub fn i_cmp_gt(dst: RealReg, srcL: RealReg, srcR: RI) -> Inst {
  Inst::BinOp { op: BinOp::CmpGT, dst, srcL, srcR }
}
pub fn i_print_s<'a>(str: &'a str) -> Inst {
  Inst::PrintS { str: str.to_string() }
}
pub fn i_print_i(reg: RealReg) -> Inst {
  Inst::PrintI { reg }
}
pub fn i_call() -> Inst {
  Inst::Call { rsd: 0 }
}
pub fn i_may_throw<'a>(cond: RealReg, handler: &'a str) -> Inst {
  Inst::MayThrow { cond, handler: Label::newUnresolved(handler.to_string()) }
}
pub fn i_goto<'a>(target: &'a str) -> Inst {
  Inst::Goto { target: Label::newUnresolved(target.to_string()) }
}
pub fn i_goto_ctf<'a>(
  cond: RealReg, targetT: &'a str, targetF: &'a str,
) -> Inst {
  Inst::GotoCTF {
    cond,
    targetT: Label::newUnresolved(targetT.to_string()),
    targetF: Label::newUnresolved(targetF.to_string()),
  }
}
pub fn i_switch<'a>(reg: RealReg, targets: &[&'a str]) -> Inst {
  Inst::Switch {
    reg,
    targets: targets
      .iter()
      .map(|t| Label::newUnresolved(t.to_string()))
      .collect(),
  }
}
pub fn i_finish(reg: Option<RealReg>) -> Inst {
  Inst::Finish { reg }
}
pub fn i_raise() -> Inst {
  Inst::Raise
}

impl fmt::Debug for Inst {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Inst::BlockStart { bix } => write!(fmt, "start {:?}", bix),
      Inst::BlockEnd { bix } => write!(fmt, "end {:?}", bix),
      Inst::Label { label } => write!(fmt, "{:?}:", label),
      Inst::Align => write!(fmt, ".align"),
      Inst::Imm { dst, imm } => write!(fmt, "imm     {:?}, {:?}", dst, imm),
      Inst::BinOp { op, dst, srcL, srcR } => write!(
        fmt,
        "{:<7} {:?}, {:?}, {:?}",
        format!("{:?}", op),
        dst,
        srcL,
        srcR
      ),
      Inst::PrintS { str } => {
        let mut res = "prints '".to_string();
        for c in str.chars() {
          res += &(if c == '\n' { "\\n".to_string() } else { c.to_string() });
        }
        write!(fmt, "{}'", res)
      }
      Inst::PrintI { reg } => write!(fmt, "printi  {:?}", reg),
      Inst::Call { rsd } => write!(fmt, "call    rsd={:#x}", rsd),
      Inst::MayThrow { cond, handler } => {
        write!(fmt, "throwif {:?}, {:?}", cond, handler)
      }
      Inst::Goto { target } => write!(fmt, "goto    {:?}", target),
      Inst::GotoCTF { cond, targetT, targetF } => write!(
        fmt,
        "goto    if {:?} then {:?} else {:?}",
        cond, targetT, targetF
      ),
      Inst::Switch { reg, targets } => {
        write!(fmt, "switch  {:?}, {:?}", reg, targets)
      }
      Inst::Finish { reg } => write!(fmt, "finish  {:?}", reg),
      Inst::Raise => write!(fmt, "raise"),
      Inst::Save { reg, offset } => {
        write!(fmt, "save    {:?}, [fp{:+}]", reg, offset)
      }
      Inst::Restore { reg, offset } => {
        write!(fmt, "restore {:?}, [fp{:+}]", reg, offset)
      }
      Inst::SaveMultiple { first, last, offset } => {
        write!(fmt, "savem   {:?}..{:?}, [fp{:+}]", first, last, offset)
      }
      Inst::RestoreMultiple { first, last, offset } => {
        write!(fmt, "restorem {:?}..{:?}, [fp{:+}]", first, last, offset)
      }
    }
  }
}

impl Inst {
  pub fn is_control_flow(&self) -> bool {
    match self {
      Inst::Goto { .. }
      | Inst::GotoCTF { .. }
      | Inst::Switch { .. }
      | Inst::Finish { .. }
      | Inst::Raise => true,
      _ => false,
    }
  }

  fn labels(&self) -> Vec<&Label> {
    match self {
      Inst::Goto { target } => vec![target],
      Inst::GotoCTF { targetT, targetF, .. } => vec![targetT, targetF],
      Inst::Switch { targets, .. } => targets.iter().collect(),
      _ => vec![],
    }
  }

  fn labels_mut(&mut self) -> Vec<&mut Label> {
    match self {
      Inst::Goto { target } => vec![target],
      Inst::GotoCTF { targetT, targetF, .. } => vec![targetT, targetF],
      Inst::Switch { targets, .. } => targets.iter_mut().collect(),
      Inst::MayThrow { handler, .. } => vec![handler],
      Inst::Label { label } => vec![label],
      _ => vec![],
    }
  }

  /// Registers read or written by the instruction.
  pub fn get_reg_usage(&self) -> Vec<RealReg> {
    match self {
      Inst::Imm { dst, .. } => vec![*dst],
      Inst::BinOp { dst, srcL, srcR, .. } => {
        let mut regs = vec![*dst, *srcL];
        if let RI::Reg { reg } = srcR {
          regs.push(*reg);
        }
        regs
      }
      Inst::PrintI { reg } => vec![*reg],
      Inst::MayThrow { cond, .. } => vec![*cond],
      Inst::GotoCTF { cond, .. } => vec![*cond],
      Inst::Switch { reg, .. } => vec![*reg],
      Inst::Finish { reg: Some(reg) } => vec![*reg],
      _ => vec![],
    }
  }
}

//=============================================================================
// The interpreter

#[derive(PartialEq)]
pub enum RunStage {
  BeforeShrinkWrap,
  AfterShrinkWrap,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunResult {
  pub ret_value: Option<u32>,
  pub stdout: String,
  pub raised: bool,
  pub num_steps: usize,
  /// The register save description of every call executed, in order.
  pub gc_maps: Vec<u32>,
}

/// The value a callee-saved register holds on entry, which it must hold
/// again at every return.
pub fn caller_value(reg: RealReg) -> u32 {
  1000 + reg.get()
}

const MAX_STEPS: usize = 1_000_000;

struct IState<'a> {
  func: &'a Func,
  linkage: &'a TestLinkage,
  nia: usize, // Program counter ("next instruction address")
  regs: Vec<Option<u32>>,
  // Callee-saved registers still holding the caller's value.  Compiled code
  // never reads those.
  callers: Vec<bool>,
  slots: FxHashMap<i32, u32>, // Frame slots, by offset
  labels: FxHashMap<LabelIx, usize>,
  prologue: Vec<RealReg>,
  n_insns: usize,
  n_saves: usize,
  n_restores: usize,
  run_stage: RunStage,
  stdout: String,
  gc_maps: Vec<u32>,
  ret_value: Option<u32>,
  raised: bool,
}

impl<'a> IState<'a> {
  fn new(
    func: &'a Func, linkage: &'a TestLinkage, prologue: &[RealReg],
    run_stage: RunStage,
  ) -> Self {
    let mut labels = FxHashMap::default();
    for (i, insn) in func.insns.iter().enumerate() {
      if let Inst::Label { label } = insn {
        labels.insert(label.getLabelIx(), i);
      }
    }
    let mut state = IState {
      func,
      linkage,
      nia: func.blocks[func.entry.getBlockIx()].start.get_usize(),
      regs: vec![None; NUM_REGS as usize],
      callers: vec![false; NUM_REGS as usize],
      slots: FxHashMap::default(),
      labels,
      prologue: prologue.to_vec(),
      n_insns: 0,
      n_saves: 0,
      n_restores: 0,
      run_stage,
      stdout: String::new(),
      gc_maps: vec![],
      ret_value: None,
      raised: false,
    };
    for reg in linkage.preserved.iter() {
      state.regs[reg.get_usize()] = Some(caller_value(*reg));
      state.callers[reg.get_usize()] = true;
    }
    state
  }

  fn get_reg(&self, reg: RealReg) -> Result<u32, String> {
    if self.callers.get(reg.get_usize()) == Some(&true) {
      return Err(format!(
        "read of the caller's {:?} at nia {}",
        reg, self.nia
      ));
    }
    self.get_raw_reg(reg)
  }

  fn get_raw_reg(&self, reg: RealReg) -> Result<u32, String> {
    match self.regs.get(reg.get_usize()) {
      None => Err(format!("invalid reg {:?}", reg)),
      Some(None) => {
        Err(format!("read of uninit reg {:?} at nia {}", reg, self.nia))
      }
      Some(Some(val)) => Ok(*val),
    }
  }

  fn set_reg(&mut self, reg: RealReg, val: u32) -> Result<(), String> {
    match self.regs.get_mut(reg.get_usize()) {
      None => Err(format!("invalid reg {:?}", reg)),
      Some(valP) => {
        *valP = Some(val);
        self.callers[reg.get_usize()] = false;
        Ok(())
      }
    }
  }

  fn get_RI(&self, ri: &RI) -> Result<u32, String> {
    match ri {
      RI::Reg { reg } => self.get_reg(*reg),
      RI::Imm { imm } => Ok(*imm),
    }
  }

  fn save(&mut self, reg: RealReg, offset: i32) -> Result<(), String> {
    let val = self.get_raw_reg(reg)?;
    self.slots.insert(offset, val);
    self.n_saves += 1;
    Ok(())
  }

  fn restore(&mut self, reg: RealReg, offset: i32) -> Result<(), String> {
    let val = match self.slots.get(&offset) {
      Some(val) => *val,
      None => {
        return Err(format!(
          "restore of {:?} from uninit slot {} at nia {}",
          reg, offset, self.nia
        ))
      }
    };
    self.n_restores += 1;
    self.set_reg(reg, val)?;
    self.callers[reg.get_usize()] = val == caller_value(reg);
    Ok(())
  }

  fn jump(&mut self, label: &Label) -> Result<(), String> {
    match self.labels.get(&label.getLabelIx()) {
      Some(pos) => {
        self.nia = *pos;
        Ok(())
      }
      None => Err(format!("jump to unplaced label {:?}", label)),
    }
  }

  fn prologue(&mut self) -> Result<(), String> {
    for reg in self.prologue.clone() {
      let offset = self.linkage.offset_of(reg);
      self.save(reg, offset)?;
    }
    Ok(())
  }

  fn epilogue(&mut self) -> Result<(), String> {
    for reg in self.prologue.clone() {
      let offset = self.linkage.offset_of(reg);
      self.restore(reg, offset)?;
    }
    for reg in self.linkage.preserved.iter() {
      let val = self.regs[reg.get_usize()];
      if val != Some(caller_value(*reg)) {
        return Err(format!(
          "callee-saved {:?} holds {:?} at return from {}",
          reg, val, self.func.name
        ));
      }
    }
    Ok(())
  }

  // Returns true when the function has finished.
  fn step(&mut self) -> Result<bool, String> {
    let insn = match self.func.insns.elems().get(self.nia) {
      Some(insn) => insn.clone(),
      None => return Err(format!("fell off the end at {}", self.nia)),
    };
    self.nia += 1;
    self.n_insns += 1;
    if self.n_insns > MAX_STEPS {
      return Err("step limit reached".to_string());
    }

    match &insn {
      Inst::BlockStart { .. }
      | Inst::BlockEnd { .. }
      | Inst::Label { .. }
      | Inst::Align => {}
      Inst::Imm { dst, imm } => self.set_reg(*dst, *imm)?,
      Inst::BinOp { op, dst, srcL, srcR } => {
        let srcL_v = self.get_reg(*srcL)?;
        let srcR_v = self.get_RI(srcR)?;
        self.set_reg(*dst, op.calc(srcL_v, srcR_v))?;
      }
      Inst::PrintS { str } => self.stdout += str,
      Inst::PrintI { reg } => {
        let val = self.get_reg(*reg)?;
        self.stdout += &format!("{}", val);
      }
      Inst::Call { rsd } => self.gc_maps.push(*rsd),
      Inst::MayThrow { cond, handler } => {
        if self.get_reg(*cond)? != 0 {
          self.jump(handler)?;
        }
      }
      Inst::Goto { target } => self.jump(target)?,
      Inst::GotoCTF { cond, targetT, targetF } => {
        let target =
          if self.get_reg(*cond)? != 0 { targetT } else { targetF };
        self.jump(target)?;
      }
      Inst::Switch { reg, targets } => {
        let ix = self.get_reg(*reg)? as usize % targets.len();
        self.jump(&targets[ix])?;
      }
      Inst::Finish { reg } => {
        self.ret_value = match reg {
          Some(reg) => Some(self.get_reg(*reg)?),
          None => None,
        };
        self.epilogue()?;
        return Ok(true);
      }
      Inst::Raise => {
        // The unwinder restores the frame; nothing to check here.
        self.raised = true;
        return Ok(true);
      }
      Inst::Save { reg, offset } => {
        debug_assert!(self.run_stage == RunStage::AfterShrinkWrap);
        self.save(*reg, *offset)?
      }
      Inst::Restore { reg, offset } => self.restore(*reg, *offset)?,
      Inst::SaveMultiple { first, last, offset } => {
        for (k, n) in (first.get()..=last.get()).enumerate() {
          self.save(r(n), offset + 8 * k as i32)?;
        }
      }
      Inst::RestoreMultiple { first, last, offset } => {
        for (k, n) in (first.get()..=last.get()).enumerate() {
          self.restore(r(n), offset + 8 * k as i32)?;
        }
      }
    }
    Ok(false)
  }
}

pub fn run_func(
  f: &Func, who: &str, linkage: &TestLinkage, prologue: &[RealReg],
  run_stage: RunStage,
) -> Result<RunResult, String> {
  println!("");
  println!(
    "Running stage '{}': Func: name='{}' entry='{:?}' prologue={:?}",
    who, f.name, f.entry, prologue
  );

  let mut istate = IState::new(f, linkage, prologue, run_stage);
  istate.prologue()?;
  let mut done = false;
  while !done {
    done = istate.step()?;
  }

  println!(
    "Running stage '{}': done.  {} insns, {} saves, {} restores",
    who, istate.n_insns, istate.n_saves, istate.n_restores
  );

  Ok(RunResult {
    ret_value: istate.ret_value,
    stdout: istate.stdout,
    raised: istate.raised,
    num_steps: istate.n_insns,
    gc_maps: istate.gc_maps,
  })
}

//=============================================================================
// The calling convention

pub struct TestLinkage {
  /// Callee-saved registers, ascending.  The i'th lives at offset 8 * i.
  pub preserved: Vec<RealReg>,
  pub lsm: bool,
}

pub fn make_linkage(lsm: bool) -> TestLinkage {
  TestLinkage {
    preserved: (FIRST_PRESERVED..NUM_REGS).map(r).collect(),
    lsm,
  }
}

impl TestLinkage {
  pub fn offset_of(&self, reg: RealReg) -> i32 {
    let ix = self.preserved.iter().position(|p| *p == reg).unwrap_or(0);
    8 * ix as i32
  }
}

impl shrinkwrap::Linkage<Func> for TestLinkage {
  fn supports_shrink_wrapping(&self) -> bool {
    true
  }
  fn num_regs(&self) -> u32 {
    NUM_REGS
  }
  fn map_preserved_registers_to_stack_offsets(&self) -> PreservedRegisterMap {
    PreservedRegisterMap {
      slots: self.preserved.iter().map(|p| (*p, self.offset_of(*p))).collect(),
      uses_pushes: false,
    }
  }
  fn save_preserved_register(&self, reg: RealReg, offset: i32) -> Inst {
    Inst::Save { reg, offset }
  }
  fn restore_preserved_register(&self, reg: RealReg, offset: i32) -> Inst {
    Inst::Restore { reg, offset }
  }
  fn compose_saves_restores(
    &self, first: RealReg, last: RealReg, offset: i32, is_save: bool,
  ) -> Inst {
    if is_save {
      Inst::SaveMultiple { first, last, offset }
    } else {
      Inst::RestoreMultiple { first, last, offset }
    }
  }
  fn uses_load_store_multiple(&self) -> bool {
    self.lsm
  }
  fn compute_register_save_description(&self, regs: &BitSet) -> u32 {
    regs.iter().filter(|n| *n < 32).fold(0, |acc, n| acc | (1 << n))
  }
}

//=============================================================================
// Definition of Block and Func, and printing thereof.

#[derive(Clone, Debug)]
pub struct Block {
  pub name: String,
  pub start: InstIx,
  pub len: u32,
}
impl Block {
  pub fn new(name: String, start: InstIx, len: u32) -> Self {
    Self { name, start, len }
  }
}

#[derive(Clone, Debug)]
pub struct Func {
  pub name: String,
  pub entry: Label,
  pub insns: TypedIxVec<InstIx, Inst>, // indexed by InstIx

  // Note that |blocks| must be in order of increasing |Block::start|
  // fields.
  pub blocks: TypedIxVec<BlockIx, Block>, // indexed by BlockIx
  pub num_labels: u32,
}

// Find a block Ix for a block name
fn lookup(blocks: &TypedIxVec<BlockIx, Block>, name: &str) -> BlockIx {
  for (bix, b) in blocks.iter().enumerate() {
    if b.name == name {
      return BlockIx::new(bix as u32);
    }
  }
  panic!("Func::lookup: can't resolve label name '{}'", name);
}

impl Func {
  pub fn new<'a>(name: &'a str) -> Self {
    Func {
      name: name.to_string(),
      entry: Label::Unresolved { name: "".to_string() },
      insns: TypedIxVec::<InstIx, Inst>::new(),
      blocks: TypedIxVec::<BlockIx, Block>::new(),
      num_labels: 0,
    }
  }

  pub fn set_entry(&mut self, entry: &str) {
    self.entry = Label::Unresolved { name: entry.to_string() };
  }

  pub fn print(&self, who: &str) {
    println!("");
    println!("Func {}: name='{}' entry='{:?}' {{", who, self.name, self.entry);
    for (i, insn) in self.insns.iter().enumerate() {
      match insn {
        Inst::BlockStart { bix } => {
          println!("  {:?}:{}", bix, self.blocks[*bix].name)
        }
        Inst::BlockEnd { .. } => {}
        _ => println!("      {:<3?}   {:?}", InstIx::new(i as u32), insn),
      }
    }
    println!("}}");
  }

  // Add a block to the Func, bracketed by its fences and entry label.
  pub fn block<'a>(&mut self, name: &'a str, insns: Vec<Inst>) {
    self.add_block(name, false, insns);
  }

  // As |block|, with alignment padding ahead of the label.
  pub fn aligned_block<'a>(&mut self, name: &'a str, insns: Vec<Inst>) {
    self.add_block(name, true, insns);
  }

  fn add_block(&mut self, name: &str, aligned: bool, insns: Vec<Inst>) {
    let bix = BlockIx::new(self.blocks.len());
    let start = self.insns.len();
    self.insns.push(Inst::BlockStart { bix });
    if aligned {
      self.insns.push(Inst::Align);
    }
    self.insns.push(Inst::Label { label: Label::newUnresolved(name.to_string()) });
    for insn in insns {
      self.insns.push(insn);
    }
    self.insns.push(Inst::BlockEnd { bix });
    let len = self.insns.len() - start;
    self.blocks.push(Block::new(name.to_string(), InstIx::new(start), len));
  }

  fn terminator(&self, bix: BlockIx) -> &Inst {
    let b = &self.blocks[bix];
    &self.insns[b.start.plus(b.len - 2)]
  }

  // All blocks have been added.  Resolve labels and we're good to go.
  /* .finish(): check
        - all blocks end in a control flow insn
        - no blocks have those insns before the end
        - all referenced blocks actually exist
        - convert references to label numbers
  */
  pub fn finish(&mut self) {
    for bix in self.blocks.range() {
      let b = &self.blocks[bix];
      for i in 0..b.len {
        let insn = &self.insns[b.start.plus(i)];
        if i == b.len - 2 && !insn.is_control_flow() {
          panic!("Func: block {} must end in control flow insn", b.name);
        }
        if i < b.len - 2 && insn.is_control_flow() {
          panic!("Func: block {} contains control flow insn not at end", b.name);
        }
      }
    }

    let blocks = &self.blocks;
    for insn in self.insns.iter_mut() {
      for label in insn.labels_mut() {
        resolveLabel(label, |name| lookup(blocks, name));
      }
    }
    resolveLabel(&mut self.entry, |name| lookup(blocks, name));
    self.num_labels = self.blocks.len();
  }

  /// The callee-saved registers the function touches; what a plain prologue
  /// saves.
  pub fn used_preserved(&self, linkage: &TestLinkage) -> Vec<RealReg> {
    let mut used = BitSet::empty();
    for insn in self.insns.iter() {
      for reg in insn.get_reg_usage() {
        used.insert(reg.get());
      }
    }
    linkage.preserved.iter().cloned().filter(|p| used.contains(p.get())).collect()
  }

  /// The registers the prologue saves once `result` is applied.
  pub fn prologue_after(
    &self, linkage: &TestLinkage, result: &ShrinkWrapResult<Func>,
  ) -> Vec<RealReg> {
    match &result.prologue_regs {
      Some(regs) => regs.iter().map(r).collect(),
      None => self.used_preserved(linkage),
    }
  }

  pub fn update_from_shrink_wrap(&mut self, result: &ShrinkWrapResult<Func>) {
    self.insns = TypedIxVec::from_vec(result.insns.clone());
    for (i, insn) in self.insns.iter().enumerate() {
      match insn {
        Inst::BlockStart { bix } => self.blocks[*bix].start = InstIx::new(i as u32),
        Inst::BlockEnd { bix } => {
          let start = self.blocks[*bix].start.get();
          self.blocks[*bix].len = i as u32 + 1 - start;
        }
        _ => {}
      }
    }
    self.num_labels = result.num_labels;
  }
}

fn resolveLabel<F>(label: &mut Label, lookup: F)
where
  F: Fn(&str) -> BlockIx,
{
  if let Label::Unresolved { name } = label {
    let ix = LabelIx::new(lookup(name).get());
    *label = Label::Resolved { name: name.clone(), ix };
  }
}

//=============================================================================
// A serialisable digest of a placement, written by `swtool -o`.

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct PlacementSummary {
  pub func: String,
  pub status: u32,
  pub prologue: Option<Vec<u32>>,
  pub preserved: Vec<PreservedRegisterInfo>,
  pub num_edge_splits: u32,
  pub save_description_bits: Vec<u32>,
}

impl PlacementSummary {
  pub fn new(func: &Func, result: &ShrinkWrapResult<Func>) -> Self {
    Self {
      func: func.name.clone(),
      status: result.status.code(),
      prologue: result.prologue_regs.as_ref().map(|p| p.to_vec()),
      preserved: result.preserved.clone(),
      num_edge_splits: result.num_edge_splits,
      save_description_bits: result.save_description_bits.iter().cloned().collect(),
    }
  }
}

//=============================================================================
// Statements, for writing structured test cases.

pub enum Stmt {
  Vanilla { insn: Inst },
  IfThenElse { cond: RealReg, stmts_t: Vec<Stmt>, stmts_e: Vec<Stmt> },
  RepeatUntil { stmts: Vec<Stmt>, cond: RealReg },
  WhileDo { cond: RealReg, stmts: Vec<Stmt> },
  /// Ends the enclosing statement list.
  Return { reg: Option<RealReg> },
}

// Various handy wrappers, mostly wrappings of i_* functions
pub fn s_if_then_else(
  cond: RealReg, stmts_t: Vec<Stmt>, stmts_e: Vec<Stmt>,
) -> Stmt {
  Stmt::IfThenElse { cond, stmts_t, stmts_e }
}
pub fn s_if_then(cond: RealReg, stmts_t: Vec<Stmt>) -> Stmt {
  Stmt::IfThenElse { cond, stmts_t, stmts_e: vec![] }
}
pub fn s_repeat_until(stmts: Vec<Stmt>, cond: RealReg) -> Stmt {
  Stmt::RepeatUntil { stmts, cond }
}
pub fn s_while_do(cond: RealReg, stmts: Vec<Stmt>) -> Stmt {
  Stmt::WhileDo { cond, stmts }
}
pub fn s_return(reg: Option<RealReg>) -> Stmt {
  Stmt::Return { reg }
}
pub fn s_vanilla(insn: Inst) -> Stmt {
  Stmt::Vanilla { insn }
}
pub fn s_imm(dst: RealReg, imm: u32) -> Stmt {
  s_vanilla(i_imm(dst, imm))
}
pub fn s_add(dst: RealReg, srcL: RealReg, srcR: RI) -> Stmt {
  s_vanilla(i_add(dst, srcL, srcR))
}
pub fn s_sub(dst: RealReg, srcL: RealReg, srcR: RI) -> Stmt {
  s_vanilla(i_sub(dst, srcL, srcR))
}
pub fn s_and(dst: RealReg, srcL: RealReg, srcR: RI) -> Stmt {
  s_vanilla(i_and(dst, srcL, srcR))
}
pub fn s_cmp_eq(dst: RealReg, srcL: RealReg, srcR: RI) -> Stmt {
  s_vanilla(i_cmp_eq(dst, srcL, srcR))
}
pub fn s_cmp_gt(dst: RealReg, srcL: RealReg, srcR: RI) -> Stmt {
  s_vanilla(i_cmp_gt(dst, srcL, srcR))
}
pub fn s_print_s<'a>(str: &'a str) -> Stmt {
  s_vanilla(i_print_s(str))
}
pub fn s_print_i(reg: RealReg) -> Stmt {
  s_vanilla(i_print_i(reg))
}
pub fn s_call() -> Stmt {
  s_vanilla(i_call())
}
pub fn s_may_throw<'a>(cond: RealReg, handler: &'a str) -> Stmt {
  s_vanilla(i_may_throw(cond, handler))
}

//=============================================================================
// The "blockifier".  This is just to make it easier to write test cases, by
// allowing direct use of if-then-else, do-while and repeat-until.  It is
// otherwise entirely unrelated to shrink wrapping proper.

pub struct Blockifier {
  name: String,
  blocks: Vec<Vec<Inst>>,
  // Blocks entered only by exceptions, placed after the rest.
  handlers: Vec<(String, Vec<Inst>)>,
}

fn makeTextLabelStr(n: usize) -> String {
  "L".to_string() + &n.to_string()
}

fn remapControlFlowTarget(insn: &mut Inst, from: &str, to: &str) {
  for label in insn.labels_mut() {
    if let Label::Unresolved { name } = label {
      if name == from {
        *name = to.to_string();
      }
    }
  }
}

impl Blockifier {
  pub fn new<'a>(name: &'a str) -> Self {
    Self { name: name.to_string(), blocks: vec![], handlers: vec![] }
  }

  pub fn add_handler<'a>(&mut self, name: &'a str, insns: Vec<Inst>) {
    self.handlers.push((name.to_string(), insns));
  }

  // Recursive worker function, which flattens out the control flow,
  // producing a set of blocks.  The exit is None if every path returns.
  fn blockify(&mut self, stmts: Vec<Stmt>) -> (usize, Option<usize>) {
    let entryBNo = self.blocks.len();
    let mut currBNo = entryBNo;
    self.blocks.push(vec![]);
    for s in stmts {
      match s {
        Stmt::Vanilla { insn } => {
          self.blocks[currBNo].push(insn);
        }
        Stmt::Return { reg } => {
          self.blocks[currBNo].push(i_finish(reg));
          return (entryBNo, None);
        }
        Stmt::IfThenElse { cond, stmts_t, stmts_e } => {
          let (t_ent, t_exit) = self.blockify(stmts_t);
          let (e_ent, e_exit) = self.blockify(stmts_e);
          self.blocks[currBNo].push(i_goto_ctf(
            cond,
            &makeTextLabelStr(t_ent),
            &makeTextLabelStr(e_ent),
          ));
          if t_exit.is_none() && e_exit.is_none() {
            return (entryBNo, None);
          }
          let cont = self.blocks.len();
          self.blocks.push(vec![]);
          for exit in t_exit.iter().chain(e_exit.iter()) {
            self.blocks[*exit].push(i_goto(&makeTextLabelStr(cont)));
          }
          currBNo = cont;
        }
        Stmt::RepeatUntil { stmts, cond } => {
          let (s_ent, s_exit) = self.blockify(stmts);
          self.blocks[currBNo].push(i_goto(&makeTextLabelStr(s_ent)));
          let s_exit = match s_exit {
            Some(s_exit) => s_exit,
            None => return (entryBNo, None),
          };
          let cont = self.blocks.len();
          self.blocks.push(vec![]);
          self.blocks[s_exit].push(i_goto_ctf(
            cond,
            &makeTextLabelStr(cont),
            &makeTextLabelStr(s_ent),
          ));
          currBNo = cont;
        }
        Stmt::WhileDo { cond, stmts } => {
          let condblock = self.blocks.len();
          self.blocks.push(vec![]);
          self.blocks[currBNo].push(i_goto(&makeTextLabelStr(condblock)));
          let (s_ent, s_exit) = self.blockify(stmts);
          if let Some(s_exit) = s_exit {
            self.blocks[s_exit].push(i_goto(&makeTextLabelStr(condblock)));
          }
          let cont = self.blocks.len();
          self.blocks.push(vec![]);
          self.blocks[condblock].push(i_goto_ctf(
            cond,
            &makeTextLabelStr(s_ent),
            &makeTextLabelStr(cont),
          ));
          currBNo = cont;
        }
      }
    }
    (entryBNo, Some(currBNo))
  }

  // The main external function.  Convert the given statements, into a Func.
  pub fn finish(&mut self, stmts: Vec<Stmt>) -> Func {
    let (ent_bno, exit_bno) = self.blockify(stmts);
    if let Some(exit_bno) = exit_bno {
      self.blocks[exit_bno].push(i_finish(None));
    }

    let mut cleanedUp: Vec<Option<Vec<Inst>>> =
      std::mem::replace(&mut self.blocks, vec![]).into_iter().map(Some).collect();

    // Repeatedly, look for a block other than the entry that simply jumps to
    // another one, and short it out.
    loop {
      let mut redir: Option<(usize, String)> = None;
      for (n, maybe_b) in cleanedUp.iter().enumerate() {
        let b = match maybe_b {
          Some(b) if n != ent_bno && b.len() == 1 => b,
          _ => continue,
        };
        if let Inst::Goto { target: Label::Unresolved { name } } = &b[0] {
          if *name != makeTextLabelStr(n) {
            redir = Some((n, name.clone()));
            break;
          }
        }
      }
      match redir {
        None => break,
        Some((from, to)) => {
          cleanedUp[from] = None;
          for insns in cleanedUp.iter_mut().flatten() {
            for insn in insns.iter_mut() {
              remapControlFlowTarget(insn, &makeTextLabelStr(from), &to);
            }
          }
        }
      }
    }

    let mut func = Func::new(&self.name);
    func.set_entry(&makeTextLabelStr(ent_bno));
    for (n, mb_ivec) in cleanedUp.into_iter().enumerate() {
      if let Some(ivec) = mb_ivec {
        func.block(&makeTextLabelStr(n), ivec);
      }
    }
    for (name, insns) in std::mem::replace(&mut self.handlers, vec![]) {
      func.block(&name, insns);
    }
    func.finish();
    func
  }
}

// --------------------------------------------------
// Implementation of `Function` trait for test cases.

impl shrinkwrap::Function for Func {
  type Inst = Inst;

  fn func_name(&self) -> String {
    self.name.clone()
  }

  fn insns(&self) -> &[Inst] {
    self.insns.elems()
  }

  fn blocks(&self) -> MyRange<BlockIx> {
    self.blocks.range()
  }

  fn entry_block(&self) -> BlockIx {
    self.entry.getBlockIx()
  }

  fn block_insns(&self, bix: BlockIx) -> MyRange<InstIx> {
    MyRange::new(self.blocks[bix].start, self.blocks[bix].len as usize)
  }

  fn block_succs(&self, bix: BlockIx) -> Vec<BlockIx> {
    self.terminator(bix).labels().iter().map(|l| l.getBlockIx()).collect()
  }

  fn block_exception_succs(&self, bix: BlockIx) -> Vec<BlockIx> {
    self
      .block_insns(bix)
      .into_iter()
      .filter_map(|iix| match &self.insns[iix] {
        Inst::MayThrow { handler, .. } => Some(handler.getBlockIx()),
        _ => None,
      })
      .collect()
  }

  fn block_exits_method(&self, bix: BlockIx) -> bool {
    match self.terminator(bix) {
      Inst::Finish { .. } | Inst::Raise => true,
      _ => false,
    }
  }

  fn num_labels(&self) -> u32 {
    self.num_labels
  }

  fn fence(&self, insn: &Inst) -> Option<Fence> {
    match insn {
      Inst::BlockStart { bix } => Some(Fence::BlockStart(*bix)),
      Inst::BlockEnd { bix } => Some(Fence::BlockEnd(*bix)),
      _ => None,
    }
  }

  fn label_of(&self, insn: &Inst) -> Option<LabelIx> {
    match insn {
      Inst::Label { label } => Some(label.getLabelIx()),
      _ => None,
    }
  }

  fn branch_targets(&self, insn: &Inst) -> SmallVec<[LabelIx; 2]> {
    insn.labels().iter().map(|l| l.getLabelIx()).collect()
  }

  fn is_multiway_branch(&self, insn: &Inst) -> bool {
    match insn {
      Inst::Switch { .. } => true,
      _ => false,
    }
  }

  fn is_return(&self, insn: &Inst) -> bool {
    match insn {
      Inst::Finish { .. } => true,
      _ => false,
    }
  }

  fn ends_flow(&self, insn: &Inst) -> bool {
    insn.is_control_flow()
  }

  fn is_alignment(&self, insn: &Inst) -> bool {
    match insn {
      Inst::Align => true,
      _ => false,
    }
  }

  fn reg_uses(&self, insn: &Inst, uses: &mut BitSet) {
    for reg in insn.get_reg_usage() {
      uses.insert(reg.get());
    }
  }

  fn exception_handler(&self, insn: &Inst) -> Option<BlockIx> {
    match insn {
      Inst::MayThrow { handler, .. } => Some(handler.getBlockIx()),
      _ => None,
    }
  }

  fn needs_gc_map(&self, insn: &Inst) -> bool {
    match insn {
      Inst::Call { .. } => true,
      _ => false,
    }
  }

  fn set_register_save_description(&self, insn: &mut Inst, new_rsd: u32) {
    if let Inst::Call { rsd } = insn {
      *rsd = new_rsd;
    }
  }

  fn preserved_reg_effect(&self, insn: &Inst) -> Option<SaveRestoreEffect> {
    match insn {
      Inst::Save { reg, .. } => {
        Some(SaveRestoreEffect::Save { first: *reg, last: *reg })
      }
      Inst::Restore { reg, .. } => {
        Some(SaveRestoreEffect::Restore { first: *reg, last: *reg })
      }
      Inst::SaveMultiple { first, last, .. } => {
        Some(SaveRestoreEffect::Save { first: *first, last: *last })
      }
      Inst::RestoreMultiple { first, last, .. } => {
        Some(SaveRestoreEffect::Restore { first: *first, last: *last })
      }
      _ => None,
    }
  }

  fn retarget_branch(&self, insn: &mut Inst, from: LabelIx, to: LabelIx) {
    match insn {
      Inst::Goto { .. } | Inst::GotoCTF { .. } | Inst::Switch { .. } => {
        for label in insn.labels_mut() {
          label.retarget(from, to);
        }
      }
      _ => {}
    }
  }

  fn gen_label(&self, label: LabelIx) -> Inst {
    Inst::Label {
      label: Label::Resolved { name: format!("split{}", label.get()), ix: label },
    }
  }

  fn gen_jump(&self, target: LabelIx) -> Inst {
    Inst::Goto {
      target: Label::Resolved { name: format!("L{}", target.get()), ix: target },
    }
  }
}
