#![no_main]
use libfuzzer_sys::fuzz_target;

use shrinkwrap::{self, Options, ShrinkWrapConfig};
use swtool::test_framework as ir;

static mut COUNTER_GEN: usize = 0;
static mut COUNTER_OK: usize = 0;

fuzz_target!(|func: ir::Func| {
    let (num_gen, num_ok) = unsafe {
        COUNTER_GEN += 1;
        (COUNTER_GEN, COUNTER_OK)
    };

    println!(
        "=== status: #wrapped/#total: {}/{} == {} ",
        num_ok,
        num_gen,
        100.0 * (num_ok as f64) / (num_gen as f64)
    );

    let mut func = func;
    let original_func = func.clone();

    // Exercise the load/store multiple path on every other input.
    let linkage = ir::make_linkage(num_gen % 2 == 0);

    let opts = Options {
        config: ShrinkWrapConfig::all(),
        interrupt: None,
        run_checker: true,
    };

    let result = match shrinkwrap::shrink_wrap_function(&func, &linkage, &opts) {
        Ok(result) => result,
        Err(err) => {
            original_func.print("func:");
            panic!("fuzz shrink_wrap: {}", err);
        }
    };

    if result.status.code() == 1 {
        unsafe {
            COUNTER_OK += 1;
        }
    }

    let prologue = original_func.used_preserved(&linkage);
    let prologue_after = original_func.prologue_after(&linkage, &result);
    func.update_from_shrink_wrap(&result);

    let before = ir::run_func(
        &original_func,
        "Before shrink wrapping",
        &linkage,
        &prologue,
        ir::RunStage::BeforeShrinkWrap,
    );
    let after = ir::run_func(
        &func,
        "After shrink wrapping",
        &linkage,
        &prologue_after,
        ir::RunStage::AfterShrinkWrap,
    );

    // Nothing to compare against if the input itself misbehaves.
    let before = match before {
        Ok(before) => before,
        Err(_) => return,
    };
    let after = match after {
        Ok(after) => after,
        Err(err) => {
            func.print("after:");
            panic!("fuzz shrink_wrap: run after shrink wrapping failed: {}", err);
        }
    };
    assert_eq!(before.ret_value, after.ret_value);
    assert_eq!(before.stdout, after.stdout);
});
