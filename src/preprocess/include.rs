//! `.include`/`.lib` resolution and the per-operation library index.
//!
//! Include directives are recognized from inside the conditional walk, so a
//! directive sitting in an untaken branch is never opened, and parameters
//! defined earlier in the deck are visible to conditions in the nested
//! file. A resolved directive line is commented out rather than deleted,
//! the recursively processed nested lines are spliced in after it, and a
//! synthetic `*end <file>` marker closes the splice; line numbers are then
//! fixed up to stay monotonic.
//!
//! Relative paths resolve against a tracked include-directory stack — the
//! process working directory is never changed, so there is no restore
//! hazard on error paths.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::deck::{ByteSource, LineList, LineReader};
use crate::error::{DeckError, Result};
use crate::preprocess::params::{substitute_shell_vars, ParamTable};
use crate::preprocess::{cond, PreprocessContext};

/// Per-operation cache of library block offsets.
///
/// Maps an absolute file path to a case-insensitive block-name → byte-offset
/// table, built by a single linear scan the first time the file is consulted
/// and never rebuilt within the operation.
#[derive(Debug, Default)]
pub struct LibraryIndex {
    files: HashMap<PathBuf, HashMap<String, u64>>,
}

impl LibraryIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `path` has already been scanned.
    pub fn is_indexed(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    /// Byte offset of the content following the `.lib <name>` line in
    /// `path`, scanning the file on first use. A missing file and a missing
    /// block name fail distinctly.
    pub fn lookup(&mut self, path: &Path, name: &str) -> Result<u64> {
        if !self.files.contains_key(path) {
            let table = scan_library(path)?;
            self.files.insert(path.to_path_buf(), table);
        }
        let table = &self.files[path];
        table
            .get(&name.to_lowercase())
            .copied()
            .ok_or_else(|| DeckError::no_name(path, name))
    }
}

/// Linear scan of a library file: every line beginning with `.lib` followed
/// by whitespace records its tag and the offset just past that line.
fn scan_library(path: &Path) -> Result<HashMap<String, u64>> {
    let file = File::open(path).map_err(|_| DeckError::no_file(path))?;
    let mut reader = BufReader::new(file);
    let mut table = HashMap::new();
    let mut buf: Vec<u8> = Vec::new();
    let mut offset: u64 = 0;
    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)? as u64;
        if n == 0 {
            break;
        }
        offset += n;
        let text = String::from_utf8_lossy(&buf);
        let trimmed = text.trim_start();
        let is_lib_line = trimmed
            .get(..4)
            .map_or(false, |head| head.eq_ignore_ascii_case(".lib"))
            && trimmed.as_bytes().get(4).map_or(false, u8::is_ascii_whitespace);
        if is_lib_line {
            if let Some(tag) = trimmed[4..].split_whitespace().next() {
                table.entry(tag.to_lowercase()).or_insert(offset);
            }
        }
    }
    tracing::debug!(path = %path.display(), blocks = table.len(), "indexed library file");
    Ok(table)
}

/// The two directive families resolved here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IncludeKind {
    Include,
    Lib,
}

#[derive(Debug)]
pub(crate) struct IncludeDirective {
    kind: IncludeKind,
    /// Legacy `H` flag: forces `$`/`;` comment recognition in the nested
    /// read only.
    h_flag: bool,
    pub(crate) path: String,
    pub(crate) block: Option<String>,
}

/// True if `keyword` (lowercased) names an include or library directive.
pub fn is_include_keyword(keyword: &str) -> bool {
    matches!(
        keyword,
        ".include" | ".inc" | ".spinclude" | ".lib" | ".splib"
    )
}

/// Parse the token tail of an include/library directive. Shell variables
/// are substituted first; paths may be quoted.
pub(crate) fn parse_directive(keyword: &str, rest: &str, line: i32) -> Result<IncludeDirective> {
    let kind = match keyword {
        ".include" | ".inc" | ".spinclude" => IncludeKind::Include,
        ".lib" | ".splib" => IncludeKind::Lib,
        _ => unreachable!("caller checked is_include_keyword"),
    };
    let substituted = substitute_shell_vars(rest);
    let mut tokens = tokenize(&substituted);

    let mut h_flag = false;
    if tokens.first().map(String::as_str) == Some("H") {
        h_flag = true;
        tokens.remove(0);
    }
    let path = tokens
        .first()
        .cloned()
        .ok_or_else(|| DeckError::bad_directive(line, format!("{} needs a file path", keyword)))?;
    let block = match kind {
        IncludeKind::Lib => Some(tokens.get(1).cloned().ok_or_else(|| {
            DeckError::bad_directive(line, format!("{} needs a block name", keyword))
        })?),
        IncludeKind::Include => None,
    };
    Ok(IncludeDirective {
        kind,
        h_flag,
        path,
        block,
    })
}

/// Split on whitespace, honoring single and double quotes.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in text.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            None => match c {
                '\'' | '"' => quote = Some(c),
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            },
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Fully resolve one file's line list: run the conditional pass, expanding
/// every include and library directive it meets in live regions
/// (recursively, depth-first).
///
/// `origin` names the file the list came from, for error-chain frames.
/// Ownership of the parameter table travels through the recursion and comes
/// back in the result.
pub fn resolve_list(
    list: &mut LineList,
    params: ParamTable,
    cx: &mut PreprocessContext,
    origin: &str,
) -> Result<ParamTable> {
    cond::process(list, params, cx, origin)
}

/// Open, read, and recursively resolve the target of one directive.
pub(crate) fn load_nested(
    directive: &IncludeDirective,
    params: ParamTable,
    cx: &mut PreprocessContext,
    origin: &str,
) -> Result<(LineList, ParamTable)> {
    let resolved = cx.resolve_path(Path::new(&directive.path));
    if cx.include_depth >= cx.max_include_depth {
        return Err(DeckError::TooDeep {
            max: cx.max_include_depth,
            path: resolved.display().to_string(),
        });
    }

    let offset = match directive.kind {
        IncludeKind::Lib => {
            let block = directive.block.as_deref().expect("lib directive has a block");
            Some(
                cx.library_index
                    .lookup(&resolved, block)
                    .map_err(|e| e.while_reading(resolved.display().to_string(), origin))?,
            )
        }
        IncludeKind::Include => None,
    };

    let dir = resolved
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let saved_forced = cx.dollar_forced;

    cx.include_dirs.push(dir);
    cx.include_depth += 1;
    if directive.h_flag {
        cx.dollar_forced = true;
    }
    let result = read_nested(&resolved, offset, directive.kind, params, cx);
    cx.dollar_forced = saved_forced;
    cx.include_depth -= 1;
    cx.include_dirs.pop();

    result.map_err(|e| e.while_reading(resolved.display().to_string(), origin))
}

fn read_nested(
    path: &Path,
    offset: Option<u64>,
    kind: IncludeKind,
    params: ParamTable,
    cx: &mut PreprocessContext,
) -> Result<(LineList, ParamTable)> {
    let mut file = File::open(path).map_err(|_| DeckError::no_file(path))?;
    if let Some(offset) = offset {
        file.seek(SeekFrom::Start(offset))?;
    }
    let mut reader = LineReader::new(ByteSource::File(BufReader::new(file)));
    reader.dollar_forced = cx.dollar_forced;

    let mut list = LineList::new();
    while let Some(line) = reader.read_logical() {
        let line = line?;
        // A library block ends at its .endl; plain includes run to EOF.
        if kind == IncludeKind::Lib {
            let first = line
                .text
                .trim_start()
                .split_whitespace()
                .next()
                .map(str::to_lowercase);
            if first.as_deref() == Some(".endl") {
                break;
            }
        }
        list.push_back(line);
    }

    let name = path.display().to_string();
    let params = resolve_list(&mut list, params, cx, &name)?;
    Ok((list, params))
}

/// Force line numbers strictly increasing front to back, preserving
/// existing numbering where it is already monotonic.
pub(crate) fn renumber_monotonic(list: &mut LineList) {
    let mut prev: i32 = 0;
    let mut cur = list.head();
    while let Some(id) = cur {
        cur = list.next(id);
        let line = list.get_mut(id);
        if line.line_number <= prev {
            line.line_number = prev + 1;
        }
        prev = line.line_number;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deck::LogicalLine;
    use std::io::Write as _;

    fn deck(lines: &[&str]) -> LineList {
        lines
            .iter()
            .enumerate()
            .map(|(i, t)| LogicalLine::new(*t, i as i32 + 1))
            .collect()
    }

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    fn cx_in(dir: &Path) -> PreprocessContext {
        let mut cx = PreprocessContext::new();
        cx.include_dirs.push(dir.to_path_buf());
        cx
    }

    #[test]
    fn test_basic_include_expansion() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), "sub.inc", "Rsub 1 0 1k\nCsub 1 0 1n\n");
        let mut list = deck(&["title", ".include sub.inc", "Rtop 2 0 2k"]);
        let mut cx = cx_in(tmp.path());
        resolve_list(&mut list, ParamTable::new(), &mut cx, "top.sp").unwrap();

        let texts = list.texts();
        assert_eq!(texts[0], "title");
        assert_eq!(texts[1], "*.include sub.inc");
        assert_eq!(texts[2], "Rsub 1 0 1k");
        assert_eq!(texts[3], "Csub 1 0 1n");
        assert_eq!(texts[4], "*end sub.inc");
        assert_eq!(texts[5], "Rtop 2 0 2k");

        // Line numbers strictly increasing after renumbering.
        let numbers: Vec<i32> = list.iter().map(|l| l.line_number).collect();
        assert!(numbers.windows(2).all(|w| w[0] < w[1]), "{:?}", numbers);
    }

    #[test]
    fn test_parent_params_visible_in_included_conditionals() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(
            tmp.path(),
            "sub.inc",
            ".if mode == 1\nRsub 1 0 1k\n.endif\n",
        );
        let mut list = deck(&["t", ".param mode=1", ".include sub.inc"]);
        let mut cx = cx_in(tmp.path());
        resolve_list(&mut list, ParamTable::new(), &mut cx, "top.sp").unwrap();
        assert_eq!(
            list.texts(),
            vec![
                "t",
                ".param mode=1",
                "*.include sub.inc",
                "Rsub 1 0 1k",
                "*end sub.inc"
            ]
        );
    }

    #[test]
    fn test_include_in_untaken_branch_left_unopened() {
        let tmp = tempfile::tempdir().unwrap();
        let mut list = deck(&["t", ".if 0", ".include missing.inc", ".endif", "R1 1 0 1k"]);
        let mut cx = cx_in(tmp.path());
        resolve_list(&mut list, ParamTable::new(), &mut cx, "top.sp").unwrap();
        assert_eq!(list.texts(), vec!["t", "R1 1 0 1k"]);
    }

    #[test]
    fn test_nested_include_relative_to_includer() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("models")).unwrap();
        write_file(
            tmp.path(),
            "top.inc",
            ".include models/inner.inc\n",
        );
        write_file(
            &tmp.path().join("models"),
            "inner.inc",
            ".include leaf.inc\n",
        );
        write_file(&tmp.path().join("models"), "leaf.inc", "Rleaf 1 0 1\n");

        let mut list = deck(&[".include top.inc"]);
        let mut cx = cx_in(tmp.path());
        resolve_list(&mut list, ParamTable::new(), &mut cx, "main.sp").unwrap();
        assert!(list.texts().iter().any(|t| t == "Rleaf 1 0 1"));
        // Directory stack fully popped.
        assert_eq!(cx.include_dirs.len(), 1);
    }

    #[test]
    fn test_missing_include_reports_chain() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), "mid.inc", ".include nowhere.inc\n");
        let mut list = deck(&[".include mid.inc"]);
        let mut cx = cx_in(tmp.path());
        let err = resolve_list(&mut list, ParamTable::new(), &mut cx, "top.sp")
            .unwrap_err();
        let msg = format!("{}", err);
        assert!(msg.contains("Error while reading file"));
        assert!(msg.contains("From file top.sp"));
        // Cleanup still ran.
        assert_eq!(cx.include_dirs.len(), 1);
        assert_eq!(cx.include_depth, 0);
    }

    #[test]
    fn test_lib_block_extraction() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(
            tmp.path(),
            "models.lib",
            ".lib TT\nRtt 1 0 1k\n.endl TT\n.lib FF\nRff 1 0 2k\n.endl FF\n",
        );
        let mut list = deck(&[".lib models.lib FF"]);
        let mut cx = cx_in(tmp.path());
        resolve_list(&mut list, ParamTable::new(), &mut cx, "top.sp").unwrap();
        let texts = list.texts();
        assert!(texts.iter().any(|t| t == "Rff 1 0 2k"));
        assert!(!texts.iter().any(|t| t == "Rtt 1 0 1k"));
        assert!(texts.iter().any(|t| t.starts_with("*end") && t.contains("FF")));
    }

    #[test]
    fn test_library_index_no_rescan() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = write_file(tmp.path(), "m.lib", ".lib A\nx\n.endl\n");
        let mut index = LibraryIndex::new();
        let first = index.lookup(&lib, "A").unwrap();
        // Rewrite the file; a cached index must return the old offset.
        write_file(tmp.path(), "m.lib", "* moved\n.lib A\nx\n.endl\n");
        let second = index.lookup(&lib, "a").unwrap();
        assert_eq!(first, second);
        assert!(index.is_indexed(&lib));
    }

    #[test]
    fn test_no_name_distinct_from_no_file() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = write_file(tmp.path(), "m.lib", ".lib A\nx\n.endl\n");
        let mut index = LibraryIndex::new();
        assert!(matches!(
            index.lookup(&lib, "MISSING").unwrap_err(),
            DeckError::NoName { .. }
        ));
        assert!(matches!(
            index.lookup(Path::new("/no/such.lib"), "A").unwrap_err(),
            DeckError::NoFile { .. }
        ));
    }

    #[test]
    fn test_self_include_hits_depth_guard() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), "loop.inc", ".include loop.inc\n");
        let mut list = deck(&[".include loop.inc"]);
        let mut cx = cx_in(tmp.path());
        cx.max_include_depth = 8;
        let err = resolve_list(&mut list, ParamTable::new(), &mut cx, "top.sp")
            .unwrap_err();
        let mut inner: &DeckError = &err;
        while let DeckError::WhileReading { source, .. } = inner {
            inner = source;
        }
        assert!(matches!(inner, DeckError::TooDeep { .. }));
        assert_eq!(cx.include_depth, 0);
    }

    #[test]
    fn test_h_flag_and_quoted_path() {
        let d = parse_directive(".include", "H 'my models.inc'", 1).unwrap();
        assert!(d.h_flag);
        assert_eq!(d.path, "my models.inc");
        assert_eq!(d.block, None);
    }

    #[test]
    fn test_lib_requires_block_name() {
        let err = parse_directive(".lib", "models.lib", 3).unwrap_err();
        assert!(matches!(err, DeckError::BadDirective { line: 3, .. }));
    }

    #[test]
    fn test_directive_free_deck_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let lines = ["vdiv test", "V1 1 0 10", "R1 1 2 1k", "R2 2 0 1k"];
        let mut list = deck(&lines);
        let mut cx = cx_in(tmp.path());
        resolve_list(&mut list, ParamTable::new(), &mut cx, "top.sp").unwrap();
        assert_eq!(list.texts(), lines);
        let numbers: Vec<i32> = list.iter().map(|l| l.line_number).collect();
        assert!(numbers.windows(2).all(|w| w[0] < w[1]));
    }
}
