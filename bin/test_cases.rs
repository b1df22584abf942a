/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

/// Test cases.  The list of them is right at the bottom, function |find_func|.
/// Add new ones there.
///
/// Registers 0 .. 7 are scratch; 8 .. 15 are callee-saved and hold
/// `caller_value` on entry.
use crate::test_framework::*;

/// One block touching callee-saved registers; the prologue is as good as it
/// gets.
fn test_straight_line() -> Func {
  let mut func = Func::new("straight_line");
  func.set_entry("Lstart");

  func.block(
    "Lstart",
    vec![
      i_imm(r(8), 1),
      i_imm(r(9), 2),
      i_add(r(0), r(8), RI_R(r(9))),
      i_print_i(r(0)),
      i_finish(Some(r(0))),
    ],
  );

  func.finish();
  func
}

/// The early-exit path never touches r8.
fn test_early_exit() -> Func {
  let mut func = Func::new("early_exit");
  func.set_entry("Lentry");

  func.block("Lentry", vec![i_imm(r(0), 1), i_goto("Lcheck")]);
  func.block(
    "Lcheck",
    vec![i_cmp_eq(r(1), r(0), RI_I(0)), i_goto_ctf(r(1), "Lout", "Lwork")],
  );
  func.block(
    "Lwork",
    vec![
      i_imm(r(8), 5),
      i_add(r(8), r(8), RI_I(3)),
      i_print_i(r(8)),
      i_goto("Lout"),
    ],
  );
  func.block("Lout", vec![i_print_s("\n"), i_finish(None)]);

  func.finish();
  func
}

fn test_diamond() -> Func {
  let mut func = Func::new("diamond");
  func.set_entry("Lentry");

  func.block("Lentry", vec![i_imm(r(0), 1), i_goto_ctf(r(0), "Lthen", "Lelse")]);
  func.block("Lthen", vec![i_imm(r(8), 7), i_print_i(r(8)), i_goto("Ljoin")]);
  func.block("Lelse", vec![i_print_s("else"), i_goto("Ljoin")]);
  func.block("Ljoin", vec![i_print_s("\n"), i_finish(None)]);

  func.finish();
  func
}

/// The join block uses r8 and r9 but its predecessors branch elsewhere too,
/// so the saves go on split edges.
fn test_critical_edges() -> Func {
  let mut func = Func::new("critical_edges");
  func.set_entry("La");

  func.block("La", vec![i_imm(r(0), 0), i_goto_ctf(r(0), "Lb", "Lc")]);
  func.block("Lb", vec![i_imm(r(1), 1), i_goto_ctf(r(1), "Ld", "Lx")]);
  func.block("Lc", vec![i_imm(r(1), 1), i_goto_ctf(r(1), "Ld", "Ly")]);
  func.block(
    "Ld",
    vec![
      i_imm(r(8), 1),
      i_imm(r(9), 2),
      i_add(r(8), r(8), RI_R(r(9))),
      i_add(r(0), r(8), RI_I(0)),
      i_print_i(r(0)),
      i_finish(Some(r(0))),
    ],
  );
  func.block("Lx", vec![i_print_s("x"), i_finish(None)]);
  func.block("Ly", vec![i_print_s("y"), i_finish(None)]);

  func.finish();
  func
}

/// A loop with two entry paths; the save lands in a new pre-header.
fn test_loop_preheader() -> Func {
  let mut func = Func::new("loop_preheader");
  func.set_entry("Lentry");

  func.block(
    "Lentry",
    vec![i_imm(r(0), 3), i_imm(r(1), 1), i_goto_ctf(r(1), "Lp1", "Lp2")],
  );
  func.block("Lp1", vec![i_imm(r(2), 0), i_goto_ctf(r(2), "Lx1", "Lhead")]);
  func.block("Lp2", vec![i_imm(r(2), 0), i_goto_ctf(r(2), "Lx2", "Lhead")]);
  func.aligned_block("Lhead", vec![i_print_i(r(0)), i_goto("Lbody")]);
  func.block(
    "Lbody",
    vec![
      i_add(r(8), r(0), RI_I(100)),
      i_print_i(r(8)),
      i_sub(r(0), r(0), RI_I(1)),
      i_cmp_gt(r(2), r(0), RI_I(0)),
      i_goto_ctf(r(2), "Lhead", "Ldone"),
    ],
  );
  func.block("Lx1", vec![i_finish(None)]);
  func.block("Lx2", vec![i_finish(None)]);
  func.block("Ldone", vec![i_print_s("\n"), i_finish(Some(r(0)))]);

  func.finish();
  func
}

/// r8 is used in an inner loop; the save goes ahead of the outer one.
fn test_nested_loops() -> Func {
  let mut bif = Blockifier::new("nested_loops");
  let stmts = vec![
    s_imm(r(5), 1),
    s_if_then_else(
      r(5),
      vec![
        s_imm(r(0), 3),
        s_cmp_gt(r(2), r(0), RI_I(0)),
        s_while_do(
          r(2),
          vec![
            s_imm(r(1), 2),
            s_cmp_gt(r(3), r(1), RI_I(0)),
            s_while_do(
              r(3),
              vec![
                s_add(r(8), r(1), RI_R(r(0))),
                s_print_i(r(8)),
                s_sub(r(1), r(1), RI_I(1)),
                s_cmp_gt(r(3), r(1), RI_I(0)),
              ],
            ),
            s_sub(r(0), r(0), RI_I(1)),
            s_cmp_gt(r(2), r(0), RI_I(0)),
          ],
        ),
        s_print_s(" loops done"),
      ],
      vec![s_print_s("skipped")],
    ),
    s_print_s("\n"),
  ];
  bif.finish(stmts)
}

/// The handler restores what the thrower's block saved.
fn test_catch_restores() -> Func {
  let mut func = Func::new("catch_restores");
  func.set_entry("Lentry");

  func.block("Lentry", vec![i_imm(r(0), 1), i_goto_ctf(r(0), "Lwork", "Lskip")]);
  func.block(
    "Lwork",
    vec![
      i_imm(r(8), 4),
      i_imm(r(1), 1),
      i_may_throw(r(1), "Lhandler"),
      i_goto("Lmore"),
    ],
  );
  func.block("Lmore", vec![i_print_i(r(8)), i_goto("Ljoin")]);
  func.block("Lskip", vec![i_print_s("skip"), i_goto("Ljoin")]);
  func.block("Ljoin", vec![i_finish(None)]);
  func.block("Lhandler", vec![i_print_s("caught"), i_finish(None)]);

  func.finish();
  func
}

/// The last use of r8 is in a block that may throw, so r8 stays in the
/// prologue.
fn test_throw_in_restore_block() -> Func {
  let mut func = Func::new("throw_in_restore_block");
  func.set_entry("Lentry");

  func.block("Lentry", vec![i_imm(r(0), 1), i_goto_ctf(r(0), "Lwork", "Lskip")]);
  func.block(
    "Lwork",
    vec![
      i_imm(r(8), 4),
      i_print_i(r(8)),
      i_imm(r(1), 0),
      i_may_throw(r(1), "Lhandler"),
      i_goto("Ljoin"),
    ],
  );
  func.block("Lskip", vec![i_print_s("skip"), i_goto("Ljoin")]);
  func.block("Ljoin", vec![i_finish(None)]);
  func.block("Lhandler", vec![i_print_s("caught"), i_finish(None)]);

  func.finish();
  func
}

/// One arm leaves by an uncaught exception.
fn test_uncaught_raise() -> Func {
  let mut func = Func::new("uncaught_raise");
  func.set_entry("Lentry");

  func.block("Lentry", vec![i_imm(r(0), 0), i_goto_ctf(r(0), "Lbad", "Lgood")]);
  func.block("Lbad", vec![i_print_s("bad"), i_raise()]);
  func.block(
    "Lgood",
    vec![i_imm(r(8), 2), i_print_i(r(8)), i_finish(None)],
  );

  func.finish();
  func
}

fn test_switch() -> Func {
  let mut func = Func::new("switch");
  func.set_entry("Lentry");

  func.block("Lentry", vec![i_imm(r(0), 1), i_switch(r(0), &["La", "Lb", "Lc"])]);
  func.block("La", vec![i_print_s("a"), i_finish(None)]);
  func.block("Lb", vec![i_imm(r(8), 8), i_print_i(r(8)), i_finish(None)]);
  func.block("Lc", vec![i_print_s("c"), i_finish(None)]);

  func.finish();
  func
}

/// A cycle entered at two different blocks.
fn test_improper() -> Func {
  let mut func = Func::new("improper");
  func.set_entry("Lentry");

  func.block(
    "Lentry",
    vec![i_imm(r(0), 2), i_imm(r(1), 1), i_goto_ctf(r(1), "Lx", "Ly")],
  );
  func.block(
    "Lx",
    vec![
      i_sub(r(0), r(0), RI_I(1)),
      i_cmp_gt(r(2), r(0), RI_I(0)),
      i_goto_ctf(r(2), "Ly", "Lout"),
    ],
  );
  func.block(
    "Ly",
    vec![
      i_imm(r(8), 3),
      i_print_i(r(8)),
      i_sub(r(0), r(0), RI_I(1)),
      i_cmp_gt(r(2), r(0), RI_I(0)),
      i_goto_ctf(r(2), "Lx", "Lout"),
    ],
  );
  func.block("Lout", vec![i_finish(None)]);

  func.finish();
  func
}

/// Calls inside and outside the region where r8 is saved.
fn test_calls() -> Func {
  let mut func = Func::new("calls");
  func.set_entry("Lentry");

  func.block(
    "Lentry",
    vec![i_imm(r(0), 1), i_call(), i_goto_ctf(r(0), "Lthen", "Lelse")],
  );
  func.block(
    "Lthen",
    vec![i_imm(r(8), 9), i_call(), i_print_i(r(8)), i_goto("Ljoin")],
  );
  func.block("Lelse", vec![i_call(), i_goto("Ljoin")]);
  func.block("Ljoin", vec![i_call(), i_finish(None)]);

  func.finish();
  func
}

/// Four consecutive callee-saved registers in one arm.
fn test_many_regs() -> Func {
  let mut func = Func::new("many_regs");
  func.set_entry("Lentry");

  func.block("Lentry", vec![i_imm(r(0), 1), i_goto_ctf(r(0), "Lthen", "Lelse")]);
  func.block(
    "Lthen",
    vec![
      i_imm(r(8), 1),
      i_imm(r(9), 2),
      i_imm(r(10), 3),
      i_imm(r(11), 4),
      i_add(r(0), r(8), RI_R(r(9))),
      i_add(r(0), r(0), RI_R(r(10))),
      i_mul(r(0), r(0), RI_R(r(11))),
      i_print_i(r(0)),
      i_goto("Ljoin"),
    ],
  );
  func.block("Lelse", vec![i_print_s("else"), i_goto("Ljoin")]);
  func.block("Ljoin", vec![i_finish(Some(r(0)))]);

  func.finish();
  func
}

/// Two diamonds in sequence; r8 is saved and restored in each.
fn test_sequential_diamonds() -> Func {
  let mut func = Func::new("sequential_diamonds");
  func.set_entry("Lentry");

  func.block("Lentry", vec![i_imm(r(0), 1), i_goto_ctf(r(0), "Lb1", "Lc1")]);
  func.block("Lb1", vec![i_imm(r(8), 1), i_print_i(r(8)), i_goto("Lmid")]);
  func.block("Lc1", vec![i_print_s("c1"), i_goto("Lmid")]);
  func.block("Lmid", vec![i_goto_ctf(r(0), "Lb2", "Lc2")]);
  func.block("Lb2", vec![i_imm(r(8), 2), i_print_i(r(8)), i_goto("Lend")]);
  func.block("Lc2", vec![i_print_s("c2"), i_goto("Lend")]);
  func.block("Lend", vec![i_finish(None)]);

  func.finish();
  func
}

/// Counted loops built from statements, with an early return.
fn test_stmt_return() -> Func {
  let mut bif = Blockifier::new("stmt_return");
  let stmts = vec![
    s_imm(r(0), 4),
    s_imm(r(4), 0),
    s_cmp_gt(r(2), r(0), RI_I(0)),
    s_while_do(
      r(2),
      vec![
        s_and(r(1), r(0), RI_I(1)),
        s_if_then(
          r(1),
          vec![s_add(r(9), r(0), RI_I(10)), s_add(r(4), r(4), RI_R(r(9)))],
        ),
        s_sub(r(0), r(0), RI_I(1)),
        s_cmp_gt(r(2), r(0), RI_I(0)),
      ],
    ),
    s_print_i(r(4)),
    s_cmp_gt(r(3), r(4), RI_I(100)),
    s_if_then(r(3), vec![s_return(Some(r(4)))]),
    s_imm(r(10), 1),
    s_add(r(4), r(4), RI_R(r(10))),
    s_return(Some(r(4))),
  ];
  bif.finish(stmts)
}

// This is the list of available tests.  This function returns either the
// requested Func, or if not found, a list of the available ones.
pub fn find_func(name: &str) -> Result<Func, Vec<String>> {
  // This is really stupid.  Fortunately it's not performance critical :)
  let all_funcs = vec![
    test_straight_line(),     // nothing to wrap
    test_early_exit(),        // save/restore in one block
    test_diamond(),           // one arm
    test_critical_edges(),    // edge splitting
    test_loop_preheader(),    // pre-header creation
    test_nested_loops(),      // loop usage spreading
    test_catch_restores(),    // restores in a catch block
    test_throw_in_restore_block(), // demotion
    test_uncaught_raise(),    // exits by exception
    test_switch(),            // skipped: multiway branch
    test_improper(),          // skipped: irreducible
    test_calls(),             // GC map descriptions
    test_many_regs(),         // load/store multiple
    test_sequential_diamonds(), // save again after restore
    test_stmt_return(),       // blockified, several returns
  ];

  let mut all_names = Vec::new();
  for cand in &all_funcs {
    all_names.push(cand.name.clone());
  }

  for cand in all_funcs {
    if cand.name == *name {
      return Ok(cand);
    }
  }

  all_names.sort();
  Err(all_names)
}
