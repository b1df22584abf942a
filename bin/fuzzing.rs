/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Implements fuzzing primitives for everything.
//!
//! Functions are generated as structured statements, so every CFG is
//! reducible and every loop is counted and terminates.

use arbitrary::{Arbitrary, Result, Unstructured};

use crate::test_framework::*;
use shrinkwrap::RealReg;

/// Scratch registers the generated code computes with.  Registers 4 .. 7 are
/// loop counters and conditions, two per nesting level.
const DATA_SCRATCH: [u32; 4] = [0, 1, 2, 3];
const MAX_LOOP_DEPTH: u32 = 2;
const MAX_NESTING: u32 = 4;
const MAX_STMTS: u32 = 40;

pub const HANDLER: &str = "Lcatch";

struct FuzzingEnv {
  nesting: u32,
  loop_depth: u32,
  num_stmts: u32,
  throws: bool,
  /// Callee-saved registers written on every path to the current point, as
  /// a mask.  Only these may be read: the caller's values are off limits.
  defined: u32,
}

impl FuzzingEnv {
  fn scratch_reg(&self, u: &mut Unstructured) -> Result<RealReg> {
    Ok(r(DATA_SCRATCH[usize::arbitrary(u)? % DATA_SCRATCH.len()]))
  }

  // Any register the body may write.
  fn dst_reg(&mut self, u: &mut Unstructured) -> Result<RealReg> {
    let n = u8::arbitrary(u)? as u32 % (4 + (NUM_REGS - FIRST_PRESERVED));
    if n < 4 {
      return Ok(r(n));
    }
    let reg = FIRST_PRESERVED + n - 4;
    self.defined |= 1 << reg;
    Ok(r(reg))
  }

  // Any register holding a value this function computed.
  fn src_reg(&self, u: &mut Unstructured) -> Result<RealReg> {
    let mut regs: Vec<u32> = DATA_SCRATCH.to_vec();
    regs.extend(
      (FIRST_PRESERVED..NUM_REGS).filter(|n| self.defined & (1 << *n) != 0),
    );
    Ok(r(regs[usize::arbitrary(u)? % regs.len()]))
  }

  fn get_ri(&self, u: &mut Unstructured) -> Result<RI> {
    Ok(if bool::arbitrary(u)? {
      RI_R(self.src_reg(u)?)
    } else {
      RI_I(u8::arbitrary(u)? as u32)
    })
  }

  fn binop(&mut self, u: &mut Unstructured) -> Result<Inst> {
    let src_l = self.src_reg(u)?;
    let src_r = self.get_ri(u)?;
    let dst = self.dst_reg(u)?;
    Ok(match u8::arbitrary(u)? % 6 {
      0 => i_add(dst, src_l, src_r),
      1 => i_sub(dst, src_l, src_r),
      2 => i_mul(dst, src_l, src_r),
      3 => i_and(dst, src_l, src_r),
      4 => i_cmp_lt(dst, src_l, src_r),
      _ => i_cmp_gt(dst, src_l, src_r),
    })
  }

  fn counted_loop(&mut self, u: &mut Unstructured) -> Result<Vec<Stmt>> {
    let ctr = r(4 + self.loop_depth);
    let cond = r(6 + self.loop_depth);
    let trips = u8::arbitrary(u)? as u32 % 3;
    let defined_before = self.defined;
    self.loop_depth += 1;
    let mut body = self.stmts(u)?;
    self.loop_depth -= 1;
    body.push(s_sub(ctr, ctr, RI_I(1)));
    Ok(if bool::arbitrary(u)? {
      // The body may not run at all.
      self.defined = defined_before;
      body.push(s_cmp_gt(cond, ctr, RI_I(0)));
      vec![
        s_imm(ctr, trips),
        s_cmp_gt(cond, ctr, RI_I(0)),
        s_while_do(cond, body),
      ]
    } else {
      body.push(s_cmp_eq(cond, ctr, RI_I(0)));
      vec![s_imm(ctr, trips + 1), s_repeat_until(body, cond)]
    })
  }

  // One statement, or a few for a loop.  Returns true if control never
  // reaches the next statement.
  fn stmt(&mut self, u: &mut Unstructured) -> Result<(Vec<Stmt>, bool)> {
    self.num_stmts += 1;
    let can_nest = self.nesting < MAX_NESTING && self.num_stmts < MAX_STMTS;
    const NUM_VARIANTS: u8 = 9;
    Ok(match u8::arbitrary(u)? % NUM_VARIANTS {
      0 => (vec![s_imm(self.dst_reg(u)?, u8::arbitrary(u)? as u32)], false),
      1 | 2 => (vec![s_vanilla(self.binop(u)?)], false),
      3 => (vec![s_print_i(self.src_reg(u)?)], false),
      4 => (vec![s_call()], false),
      5 => {
        self.throws = true;
        (vec![s_may_throw(self.src_reg(u)?, HANDLER)], false)
      }
      6 if can_nest => {
        let cond = self.src_reg(u)?;
        let defined_before = self.defined;
        self.nesting += 1;
        let stmts_t = self.stmts(u)?;
        let defined_t = self.defined;
        self.defined = defined_before;
        let stmts_e = self.stmts(u)?;
        self.defined &= defined_t;
        self.nesting -= 1;
        (vec![s_if_then_else(cond, stmts_t, stmts_e)], false)
      }
      7 if can_nest && self.loop_depth < MAX_LOOP_DEPTH => {
        self.nesting += 1;
        let stmts = self.counted_loop(u)?;
        self.nesting -= 1;
        (stmts, false)
      }
      8 if self.nesting > 0 => {
        // Never a callee-saved register: its restore precedes the return.
        (vec![s_return(Some(self.scratch_reg(u)?))], true)
      }
      _ => (vec![s_print_s(".")], false),
    })
  }

  fn stmts(&mut self, u: &mut Unstructured) -> Result<Vec<Stmt>> {
    let mut stmts = vec![];
    let num = u8::arbitrary(u)? % 4 + 1;
    for _ in 0..num {
      let (mut more, returns) = self.stmt(u)?;
      stmts.append(&mut more);
      if returns {
        break;
      }
    }
    Ok(stmts)
  }
}

impl<'a> Arbitrary<'a> for Func {
  fn arbitrary(u: &mut Unstructured<'a>) -> Result<Func> {
    let mut env = FuzzingEnv {
      nesting: 0,
      loop_depth: 0,
      num_stmts: 0,
      throws: false,
      defined: 0,
    };

    let mut stmts: Vec<Stmt> =
      DATA_SCRATCH.iter().map(|n| s_imm(r(*n), *n)).collect();
    stmts.append(&mut env.stmts(u)?);
    stmts.push(s_print_s("\n"));

    let mut bif = Blockifier::new("fuzz");
    if env.throws {
      bif.add_handler(HANDLER, vec![i_print_s("caught"), i_finish(None)]);
    }
    Ok(bif.finish(stmts))
  }
}
