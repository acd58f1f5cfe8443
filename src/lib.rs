//! # Spicedeck
//!
//! A deck sourcing front end for SPICE-style circuit simulators.
//!
//! Spicedeck turns one or more raw text inputs — regular files, FIFOs, or a
//! line-oriented socket stream — into a fully resolved, linear sequence of
//! logical lines ready for circuit-element parsing, plus the command blocks
//! the external interpreter runs around a simulation.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`deck`] - Logical-line containers, raw line reading, and `.newjob`
//!   input splitting
//! - [`preprocess`] - Parameters, `.if/.elif/.else/.endif` conditionals,
//!   and `.include`/`.lib` resolution with the per-operation library index
//! - [`blocks`] - `.exec`/`.control`/`.postrun` and `.verilog` block
//!   extraction
//! - [`source`] - The top-level pipeline
//!
//! ## Usage
//!
//! ```no_run
//! use spicedeck::{source_deck, SourceOptions};
//!
//! let jobs = source_deck(
//!     &["amplifier.sp".into()],
//!     &SourceOptions::default(),
//! )?;
//! for job in &jobs {
//!     for line in job.deck.iter() {
//!         println!("{:>5}  {}", line.line_number, line.text);
//!     }
//! }
//! # Ok::<(), spicedeck::DeckError>(())
//! ```
//!
//! ## Pipeline
//!
//! Raw bytes flow through the stages in order:
//!
//! 1. `split_files` cuts the inputs into independent jobs on `.newjob`
//!    boundaries, staging FIFOs and mid-file spans into temp files
//! 2. `LineReader` produces logical lines: CR stripping, `$`/`;` comment
//!    truncation, backslash continuation
//! 3. `resolve_list` runs the conditional walk, expanding `.include`/`.lib`
//!    recursively as they are met in live regions, merging
//!    `+`-continuations and harvesting `.param`
//! 4. `blocks::extract` pulls out command and verilog blocks
//!
//! Failures at any stage abort the whole operation; no partial deck is ever
//! handed to the caller.

pub mod blocks;
pub mod deck;
pub mod error;
pub mod preprocess;
pub mod source;

// Re-export main types for convenience
pub use blocks::{BlockKind, Codeblock, ExtractedBlocks};
pub use deck::{LineList, LogicalLine};
pub use error::{DeckError, Result};
pub use preprocess::{ParamTable, PreprocessContext};
pub use source::{source_deck, source_stream, SourceOptions, SourcedDeck};
