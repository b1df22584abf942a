/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

use shrinkwrap::{shrink_wrap_function, Options, ShrinkWrapConfig};
use swtool::test_cases;
use swtool::test_framework::{
  make_linkage, run_func, PlacementSummary, RunResult, RunStage,
};

use clap;
use log::{self, error, info};
use pretty_env_logger;

//=============================================================================
// Top level

fn main() {
  pretty_env_logger::init();

  let app = clap::App::new("swtool")
    .about("a simple program to allow separate testing of the shrinkwrap pass")
    .arg(
      clap::Arg::new("test")
        .short('t')
        .takes_value(true)
        .required(true)
        .help("test case name"),
    )
    .arg(
      clap::Arg::new("coalesce")
        .short('c')
        .takes_value(true)
        .help(
          "comma-separated locations to coalesce at: \
           ss (split saves), sr (split restores), bs (block saves), \
           br (block restores), or all",
        ),
    )
    .arg(
      clap::Arg::new("lsm")
        .short('m')
        .help("the target has load/store multiple instructions"),
    )
    .arg(
      clap::Arg::new("output")
        .short('o')
        .takes_value(true)
        .help("write a bincode summary of the placement to this file"),
    );
  let matches = app.get_matches();

  let func_name = matches.value_of("test").unwrap_or_default();
  let mut func = match test_cases::find_func(func_name) {
    Ok(func) => func,
    Err(available_func_names) => {
      error!("can't find Func with name '{}'", func_name);
      println!("available func names are:");
      for name in available_func_names {
        println!("     {}", name);
      }
      return;
    }
  };

  let config = match parse_coalescing(matches.value_of("coalesce").unwrap_or(""))
  {
    Ok(config) => config,
    Err(msg) => {
      println!("{}", msg);
      return;
    }
  };
  info!("Using {:?}", config);

  let linkage = make_linkage(matches.is_present("lsm"));

  func.print("before shrink wrapping");

  // Just so we can run it later.
  let original_func = func.clone();

  let opts = Options { config, interrupt: None, run_checker: true };
  let result = match shrink_wrap_function(&func, &linkage, &opts) {
    Err(e) => {
      println!("shrink wrapping failed: {}", e);
      return;
    }
    Ok(r) => r,
  };

  println!("");
  println!("status: {:?}", result.status);
  println!("prologue saves: {:?}", result.prologue_regs);
  for info in &result.preserved {
    println!(
      "  {:?} at [fp{:+}]: saved in {:?}, restored in {:?}",
      info.reg, info.offset, info.save_blocks, info.restore_blocks
    );
  }

  let prologue = original_func.used_preserved(&linkage);
  let prologue_after = original_func.prologue_after(&linkage, &result);
  let summary = PlacementSummary::new(&original_func, &result);

  // Update the function itself.
  func.update_from_shrink_wrap(&result);

  func.print("after shrink wrapping");

  if let Some(path) = matches.value_of("output") {
    let written = bincode::serialize(&summary)
      .map_err(|e| e.to_string())
      .and_then(|bytes| std::fs::write(path, bytes).map_err(|e| e.to_string()));
    if let Err(msg) = written {
      println!("can't write summary to {}: {}", path, msg);
    }
  }

  let before_result = run_func(
    &original_func,
    "Before shrink wrapping",
    &linkage,
    &prologue,
    RunStage::BeforeShrinkWrap,
  );

  let after_result = run_func(
    &func,
    "After shrink wrapping",
    &linkage,
    &prologue_after,
    RunStage::AfterShrinkWrap,
  );

  println!("");

  check_results(before_result, after_result);
}

fn parse_coalescing(arg: &str) -> Result<ShrinkWrapConfig, String> {
  let mut config = ShrinkWrapConfig::default();
  for loc in arg.split(',').filter(|s| !s.is_empty()) {
    match loc {
      "ss" => config.coalesce_split_saves = true,
      "sr" => config.coalesce_split_restores = true,
      "bs" => config.coalesce_block_saves = true,
      "br" => config.coalesce_block_restores = true,
      "all" => config = ShrinkWrapConfig::all(),
      other => return Err(format!("unknown coalescing location '{}'", other)),
    }
  }
  Ok(config)
}

fn check_results(
  before_result: Result<RunResult, String>,
  after_result: Result<RunResult, String>,
) {
  match before_result {
    Ok(before_result) => {
      let after_result =
        after_result.expect("code after shrink wrapping should have succeeded");

      assert_eq!(
        before_result.ret_value, after_result.ret_value,
        "Incorrect interpreter result: expected {:?}, observed {:?}",
        before_result.ret_value, after_result.ret_value
      );

      assert_eq!(
        before_result.stdout, after_result.stdout,
        r#"Different stdout values before/after shrink wrapping:
- before:
{}
-after:
{}
        "#,
        before_result.stdout, after_result.stdout
      );

      assert_eq!(before_result.raised, after_result.raised);
    }

    Err(err) => {
      assert_eq!(err, after_result.unwrap_err());
    }
  }
}

#[cfg(test)]
mod test_utils {
  use shrinkwrap::ShrinkWrapResult;

  use super::*;
  use swtool::test_framework::Func;

  pub struct Outcome {
    pub func: Func,
    pub result: ShrinkWrapResult<Func>,
    pub after: RunResult,
  }

  /// Shrink wrap the named test, check the pairing, and check the function
  /// behaves the same with and without the pass.
  pub fn check_sw(
    func_name: &str, lsm: bool, config: ShrinkWrapConfig,
  ) -> Outcome {
    let _ = pretty_env_logger::try_init();
    let func = test_cases::find_func(func_name).unwrap();
    let linkage = make_linkage(lsm);
    let before_result = run_func(
      &func,
      "Before shrink wrapping",
      &linkage,
      &func.used_preserved(&linkage),
      RunStage::BeforeShrinkWrap,
    );
    let opts = Options { config, interrupt: None, run_checker: true };
    let result =
      shrink_wrap_function(&func, &linkage, &opts).unwrap_or_else(|err| {
        panic!("shrink wrapping failed: {}", err);
      });
    let prologue = func.prologue_after(&linkage, &result);
    let mut after_func = func.clone();
    after_func.update_from_shrink_wrap(&result);
    after_func.print("AFTER");
    let after_result = run_func(
      &after_func,
      "After shrink wrapping",
      &linkage,
      &prologue,
      RunStage::AfterShrinkWrap,
    );
    let after = after_result.clone().unwrap();
    check_results(before_result, after_result);
    Outcome { func: after_func, result, after }
  }

  pub fn check_default(func_name: &str) -> Outcome {
    check_sw(func_name, false, ShrinkWrapConfig::default())
  }
}

#[cfg(test)]
mod test {
  use super::test_utils::*;
  use shrinkwrap::{
    BitSet, BlockIx, RealReg, ShrinkWrapConfig, ShrinkWrapStatus, SkipReason,
  };
  use swtool::test_framework::Inst;

  fn blocks(bs: &[u32]) -> BitSet {
    BitSet::from_vec(bs.to_vec())
  }

  fn saves_and_restores(out: &Outcome) -> (usize, usize) {
    let mut counts = (0, 0);
    for insn in out.func.insns.iter() {
      match insn {
        Inst::Save { .. } | Inst::SaveMultiple { .. } => counts.0 += 1,
        Inst::Restore { .. } | Inst::RestoreMultiple { .. } => counts.1 += 1,
        _ => {}
      }
    }
    counts
  }

  #[test]
  fn sw_straight_line() {
    let out = check_default("straight_line");
    assert_eq!(
      out.result.status,
      ShrinkWrapStatus::Skipped(SkipReason::NothingToWrap)
    );
    assert!(out.result.prologue_regs.is_none());
    assert_eq!(saves_and_restores(&out), (0, 0));
  }

  #[test]
  fn sw_early_exit() {
    let out = check_default("early_exit");
    assert_eq!(out.result.status.code(), 1);
    let info = out.result.info_for(RealReg::new(8)).unwrap();
    assert_eq!(info.offset, 0);
    assert_eq!(info.save_blocks, blocks(&[2]));
    assert_eq!(info.restore_blocks, blocks(&[2]));
    assert_eq!(out.result.prologue_regs, Some(BitSet::empty()));
  }

  #[test]
  fn sw_diamond() {
    let out = check_default("diamond");
    assert_eq!(out.result.status.code(), 1);
    assert_eq!(out.result.num_edge_splits, 0);
    assert_eq!(saves_and_restores(&out), (1, 1));
  }

  #[test]
  fn sw_critical_edges() {
    let out = check_default("critical_edges");
    assert_eq!(out.result.status.code(), 1);
    assert_eq!(out.result.num_edge_splits, 2);
    // Two registers saved on each of two edges, restored once.
    assert_eq!(saves_and_restores(&out), (4, 2));
    assert_eq!(out.after.ret_value, Some(3));
  }

  #[test]
  fn sw_critical_edges_coalesced_without_lsm() {
    // Coalescing is only done when the target can use the result.
    let out = check_sw("critical_edges", false, ShrinkWrapConfig::all());
    assert_eq!(saves_and_restores(&out), (4, 2));
  }

  #[test]
  fn sw_loop_preheader() {
    let out = check_default("loop_preheader");
    assert_eq!(out.result.status.code(), 1);
    let info = out.result.info_for(RealReg::new(8)).unwrap();
    assert_eq!(info.save_blocks, blocks(&[3]));
    assert_eq!(info.restore_blocks, blocks(&[7]));
    assert_eq!(out.after.stdout, "310321021101\n");
  }

  #[test]
  fn sw_nested_loops() {
    let out = check_default("nested_loops");
    assert_eq!(out.result.status.code(), 1);
    let info = out.result.info_for(RealReg::new(8)).unwrap();
    assert_eq!(info.save_blocks.card(), 1);
    assert_eq!(info.restore_blocks.card(), 1);
  }

  #[test]
  fn sw_catch_restores() {
    let out = check_default("catch_restores");
    assert_eq!(out.result.status.code(), 1);
    let info = out.result.info_for(RealReg::new(8)).unwrap();
    assert_eq!(info.save_blocks, blocks(&[1]));
    assert_eq!(info.restore_blocks, blocks(&[2, 5]));
    assert_eq!(out.after.stdout, "caught");
  }

  #[test]
  fn sw_throw_in_restore_block() {
    let out = check_default("throw_in_restore_block");
    assert_eq!(out.result.status.code(), 0);
    assert_eq!(saves_and_restores(&out), (0, 0));
  }

  #[test]
  fn sw_uncaught_raise() {
    let out = check_default("uncaught_raise");
    assert_eq!(out.result.status.code(), 1);
    let info = out.result.info_for(RealReg::new(8)).unwrap();
    assert_eq!(info.save_blocks, blocks(&[2]));
    assert_eq!(info.restore_blocks, blocks(&[2]));
  }

  #[test]
  fn sw_switch() {
    let out = check_default("switch");
    assert_eq!(
      out.result.status,
      ShrinkWrapStatus::Skipped(SkipReason::MultiwayBranch)
    );
  }

  #[test]
  fn sw_improper() {
    let out = check_default("improper");
    assert_eq!(
      out.result.status,
      ShrinkWrapStatus::Skipped(SkipReason::ImproperRegions)
    );
  }

  #[test]
  fn sw_calls() {
    let out = check_default("calls");
    assert_eq!(out.result.status.code(), 1);
    assert_eq!(out.result.save_description_bits[BlockIx::new(1)], 1 << 8);
    assert_eq!(out.after.gc_maps, vec![0, 1 << 8, 0]);
  }

  #[test]
  fn sw_many_regs() {
    let out = check_default("many_regs");
    assert_eq!(saves_and_restores(&out), (4, 4));
  }

  #[test]
  fn sw_many_regs_lsm() {
    let out = check_sw("many_regs", true, ShrinkWrapConfig::all());
    assert_eq!(out.result.status.code(), 1);
    assert_eq!(saves_and_restores(&out), (1, 1));
    assert!(out.func.insns.iter().any(|insn| match insn {
      Inst::SaveMultiple { first, last, offset } =>
        first.get() == 8 && last.get() == 11 && *offset == 0,
      _ => false,
    }));
  }

  #[test]
  fn sw_many_regs_lsm_block_saves_only() {
    let mut config = ShrinkWrapConfig::default();
    config.coalesce_block_saves = true;
    let out = check_sw("many_regs", true, config);
    assert_eq!(saves_and_restores(&out), (1, 4));
  }

  #[test]
  fn sw_diamond_lsm() {
    // A single wrapped register isn't worth it with load/store multiple.
    let out = check_sw("diamond", true, ShrinkWrapConfig::all());
    assert_eq!(
      out.result.status,
      ShrinkWrapStatus::Skipped(SkipReason::NothingToWrap)
    );
  }

  #[test]
  fn sw_sequential_diamonds() {
    let out = check_default("sequential_diamonds");
    assert_eq!(out.result.status.code(), 1);
    let info = out.result.info_for(RealReg::new(8)).unwrap();
    assert_eq!(info.save_blocks, blocks(&[1, 4]));
    assert_eq!(info.restore_blocks, blocks(&[1, 4]));
    assert_eq!(out.after.stdout, "12");
  }

  #[test]
  fn sw_stmt_return() {
    let out = check_default("stmt_return");
    assert_eq!(out.after.ret_value, Some(25));
    assert_eq!(out.after.stdout, "24");
  }

  #[test]
  fn coalescing_locations_parse() {
    let config = super::parse_coalescing("ss,br").unwrap();
    assert!(config.coalesce_split_saves);
    assert!(!config.coalesce_split_restores);
    assert!(!config.coalesce_block_saves);
    assert!(config.coalesce_block_restores);
    assert_eq!(super::parse_coalescing("all"), Ok(ShrinkWrapConfig::all()));
    assert_eq!(
      super::parse_coalescing(""),
      Ok(ShrinkWrapConfig::default())
    );
    assert!(super::parse_coalescing("bogus").is_err());
  }

  #[test]
  fn caller_values_are_off_limits() {
    use swtool::test_framework::*;
    let mut func = Func::new("reads_caller_value");
    func.set_entry("Lentry");
    func.block("Lentry", vec![i_print_i(r(8)), i_finish(None)]);
    func.finish();
    let linkage = make_linkage(false);
    let err = run_func(
      &func,
      "reads r8",
      &linkage,
      &func.used_preserved(&linkage),
      RunStage::BeforeShrinkWrap,
    )
    .unwrap_err();
    assert!(err.contains("caller's"), "{}", err);
  }

  #[test]
  fn generated_funcs_write_callee_saved_before_reading() {
    use arbitrary::{Arbitrary, Unstructured};
    use swtool::test_framework::*;
    let linkage = make_linkage(false);
    let mut seed: u32 = 0x5eed;
    for _ in 0..200 {
      let bytes: Vec<u8> = (0..512)
        .map(|_| {
          seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
          (seed >> 16) as u8
        })
        .collect();
      let func = match Func::arbitrary(&mut Unstructured::new(&bytes)) {
        Ok(func) => func,
        Err(_) => continue,
      };
      let res = run_func(
        &func,
        "generated",
        &linkage,
        &func.used_preserved(&linkage),
        RunStage::BeforeShrinkWrap,
      );
      if let Err(err) = res {
        assert!(!err.contains("caller's"), "{}", err);
      }
    }
  }
}
