//! Deck preprocessing: parameters, conditionals, includes, libraries.
//!
//! All shared state is threaded explicitly as a [`PreprocessContext`] whose
//! lifetime matches one top-level source operation; nothing lives in
//! process-wide globals, so concurrent operations cannot interfere.

pub mod cond;
pub mod expr;
pub mod include;
pub mod params;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub use include::{resolve_list, LibraryIndex};
pub use params::ParamTable;

/// Shared state for one deck-sourcing operation.
pub struct PreprocessContext {
    /// Lazily built `.lib` block-offset cache, per file.
    pub library_index: LibraryIndex,
    /// Names of subcircuits already cached by earlier runs; `.cache` blocks
    /// whose name appears here are deleted from the deck.
    pub subckt_cache: HashSet<String>,
    /// Forces `$`/`;` comment recognition without surrounding whitespace
    /// (legacy compatibility; also set transiently by the `H` include flag).
    pub dollar_forced: bool,
    /// Include-directory stack; relative paths resolve against the top.
    pub include_dirs: Vec<PathBuf>,
    /// Current include recursion depth.
    pub include_depth: usize,
    /// Hard limit on include nesting, so pathological inputs fail
    /// predictably instead of exhausting the stack.
    pub max_include_depth: usize,
}

impl PreprocessContext {
    /// Create a context with default limits and an empty cache.
    pub fn new() -> Self {
        Self {
            library_index: LibraryIndex::new(),
            subckt_cache: HashSet::new(),
            dollar_forced: false,
            include_dirs: Vec::new(),
            include_depth: 0,
            max_include_depth: 100,
        }
    }

    /// Resolve a possibly-relative path against the include-directory stack.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match self.include_dirs.last() {
            Some(dir) => dir.join(path),
            None => path.to_path_buf(),
        }
    }
}

impl Default for PreprocessContext {
    fn default() -> Self {
        Self::new()
    }
}
