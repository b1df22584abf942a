/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! The test IR, its interpreter and test cases, shared by `swtool` and the
//! fuzz targets.

pub mod fuzzing;
pub mod test_cases;
pub mod test_framework;
