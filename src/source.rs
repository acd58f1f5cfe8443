//! Top-level deck sourcing.
//!
//! [`source_deck`] runs the whole pipeline: input splitting on `.newjob`,
//! raw line reading, metadata-header skipping, recursive conditional and
//! include resolution, and command-block extraction. It hands back one
//! [`SourcedDeck`] per job, or nothing at all on failure — a partial deck is
//! never exposed.

use std::collections::HashSet;
use std::io::Read;
use std::path::PathBuf;

use crate::blocks::{self, Codeblock};
use crate::deck::{split_files, ByteSource, LineList, LineReader};
use crate::error::{DeckError, Result};
use crate::preprocess::{resolve_list, ParamTable, PreprocessContext};

/// Options for one source operation.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// Subcircuit names already cached by earlier runs; `.cache` blocks
    /// with these names are dropped from the deck.
    pub subckt_cache: HashSet<String>,
    /// Hard limit on include nesting.
    pub max_include_depth: usize,
    /// Force `$`/`;` comment recognition without surrounding whitespace.
    pub dollar_forced: bool,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            subckt_cache: HashSet::new(),
            max_include_depth: 100,
            dollar_forced: false,
        }
    }
}

/// One fully sourced job, ready for the circuit-element parser and the
/// command interpreter.
#[derive(Debug)]
pub struct SourcedDeck {
    /// The resolved circuit-description lines.
    pub deck: LineList,
    /// Unnamed EXEC command lines.
    pub exec: Vec<String>,
    /// Unnamed CONTROL command lines.
    pub control: Vec<String>,
    /// Unnamed POSTRUN command lines.
    pub postrun: Vec<String>,
    /// Verilog block text with `.adc` lines hoisted to the front.
    pub verilog: Vec<String>,
    /// Named command blocks.
    pub codeblocks: Vec<Codeblock>,
    /// Parameters harvested from `.param` lines.
    pub params: ParamTable,
}

/// Source one or more deck files, splitting them into jobs on `.newjob`
/// boundaries. All jobs share one library index and subcircuit cache.
pub fn source_deck(inputs: &[PathBuf], options: &SourceOptions) -> Result<Vec<SourcedDeck>> {
    if inputs.is_empty() {
        return Err(DeckError::EmptyInput);
    }
    let elements = split_files(inputs)?;

    let mut cx = context_for(options);
    let mut jobs = Vec::new();
    for element in &elements {
        let mut reader = LineReader::new(ByteSource::open(element.path())?);
        reader.dollar_forced = cx.dollar_forced;

        // A job that starts mid-file skips the leading lines; the reader
        // keeps counting them so line numbers stay physical.
        if element.line_offset() > 0 {
            for _ in 1..element.line_offset() {
                match reader.read_line() {
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e),
                    None => break,
                }
            }
        }

        let list = collect_lines(&mut reader)?;
        if list.is_empty() {
            continue;
        }
        let origin = element.path().display().to_string();

        cx.include_dirs.push(element.base_dir().to_path_buf());
        let resolved = resolve_list_scoped(list, &mut cx, &origin);
        cx.include_dirs.pop();
        let (mut deck, params) = resolved?;

        let extracted = blocks::extract(&mut deck);
        jobs.push(SourcedDeck {
            deck,
            exec: extracted.exec,
            control: extracted.control,
            postrun: extracted.postrun,
            verilog: extracted.verilog,
            codeblocks: extracted.codeblocks,
            params,
        });
    }
    if jobs.is_empty() {
        return Err(DeckError::EmptyInput);
    }
    Ok(jobs)
}

/// Source a single deck from a live stream (a socket or pipe), reading up
/// to the `@` end-of-transmission sentinel or end of stream.
pub fn source_stream(input: impl Read + 'static, options: &SourceOptions) -> Result<SourcedDeck> {
    let mut cx = context_for(options);
    let mut reader = LineReader::new(ByteSource::stream(input));
    reader.dollar_forced = cx.dollar_forced;

    let list = collect_lines(&mut reader)?;
    if list.is_empty() {
        return Err(DeckError::EmptyInput);
    }
    let (mut deck, params) = resolve_list_scoped(list, &mut cx, "<stream>")?;
    let extracted = blocks::extract(&mut deck);
    Ok(SourcedDeck {
        deck,
        exec: extracted.exec,
        control: extracted.control,
        postrun: extracted.postrun,
        verilog: extracted.verilog,
        codeblocks: extracted.codeblocks,
        params,
    })
}

fn context_for(options: &SourceOptions) -> PreprocessContext {
    let mut cx = PreprocessContext::new();
    cx.subckt_cache = options
        .subckt_cache
        .iter()
        .map(|n| n.to_lowercase())
        .collect();
    cx.max_include_depth = options.max_include_depth;
    cx.dollar_forced = options.dollar_forced;
    cx
}

/// Read lines until end of input, a `.end` line (kept), or the `@`
/// transmission sentinel (dropped). A leading run of `*GFX` metadata-header
/// lines from layout tools is skipped transparently.
fn collect_lines(reader: &mut LineReader) -> Result<LineList> {
    let mut list = LineList::new();
    let mut in_header = true;
    while let Some(line) = reader.read_logical() {
        let line = line?;
        let trimmed = line.text.trim();
        if in_header {
            if trimmed.starts_with("*GFX") {
                continue;
            }
            in_header = false;
        }
        if trimmed == "@" {
            break;
        }
        let stop = trimmed.eq_ignore_ascii_case(".end");
        list.push_back(line);
        if stop {
            break;
        }
    }
    Ok(list)
}

fn resolve_list_scoped(
    mut list: LineList,
    cx: &mut PreprocessContext,
    origin: &str,
) -> Result<(LineList, ParamTable)> {
    let params = resolve_list(&mut list, ParamTable::new(), cx, origin)?;
    Ok((list, params))
}
