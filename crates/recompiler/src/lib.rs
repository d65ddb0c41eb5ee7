//! Static binary translator for SM83 cartridge images.
//!
//! The pipeline: load and classify the cartridge, walk the reachable
//! control flow across banks, lower every discovered instruction to IR, and
//! emit a native Cargo project whose functions call into the shared runtime
//! primitives. Anything the analysis cannot see stays the interpreter's
//! job at runtime.

use runtime_core as _;

/// Control-flow reachability analysis over ROM banks.
pub mod analysis;
pub use analysis::{analyze, Analysis, AnalyzerOptions, BankAddr, Block, Function};

/// Native source emission and project layout.
pub mod emit;
pub use emit::{emit_project, EmitOptions, EmitSummary};

/// Translation-time error surface.
pub mod errors;
pub use errors::TranslateError;

/// Stack-machine intermediate representation.
pub mod ir;

/// Lowering from decoded instructions to IR.
pub mod lower;
pub use lower::lower;
