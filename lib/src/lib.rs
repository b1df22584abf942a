/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Main file / top-level module for the shrinkwrap library.

// Make the analysis module public for fuzzing.
#[cfg(feature = "fuzzing")]
pub mod analysis;
#[cfg(not(feature = "fuzzing"))]
mod analysis;

mod bit_set;
mod checker;
mod data_structures;
mod dataflow;
mod inst_stream;
mod interface;
mod liveness;
mod shrink_wrap;
mod structure;

#[cfg(test)]
mod test_utils;

pub use crate::inst_stream::InstStream;
pub use crate::interface::*;
