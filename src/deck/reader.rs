//! Raw line acquisition from files and byte streams.
//!
//! [`LineReader`] turns a byte source into logical lines: it strips DOS line
//! endings, applies the `$`/`;` inline-comment policy, and joins physical
//! lines continued with one or more trailing backslashes. It never
//! interprets directives; that is the preprocessor's job.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::deck::LogicalLine;
use crate::error::{DeckError, Result};

/// Where raw bytes come from.
pub enum ByteSource {
    /// A seekable file, read with a buffered reader.
    File(BufReader<File>),
    /// A live stream (socket or pipe), read byte-by-byte so the reader
    /// never consumes past the end of a line.
    Stream(Box<dyn Read>),
}

impl ByteSource {
    /// Open a regular file as a source.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(|e| DeckError::Unreadable {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;
        Ok(Self::File(BufReader::new(file)))
    }

    /// Wrap an arbitrary reader (socket, pipe) as a stream source.
    pub fn stream(reader: impl Read + 'static) -> Self {
        Self::Stream(Box::new(reader))
    }
}

/// Produces logical lines from a [`ByteSource`].
pub struct LineReader {
    source: ByteSource,
    /// Physical line number of the most recently read line (1-indexed).
    line_number: i32,
    /// Forces `$`/`;` comment recognition even without surrounding
    /// whitespace (the legacy `H` include-flag mode).
    pub dollar_forced: bool,
}

impl LineReader {
    /// Create a reader over `source`.
    pub fn new(source: ByteSource) -> Self {
        Self {
            source,
            line_number: 0,
            dollar_forced: false,
        }
    }

    /// Physical line number of the last line returned.
    pub fn line_number(&self) -> i32 {
        self.line_number
    }

    /// Read one physical line: `None` at end of input, `Some(Err)` on a
    /// read failure. The trailing newline and any `\r` are stripped.
    pub fn read_line(&mut self) -> Option<Result<String>> {
        let raw = match &mut self.source {
            ByteSource::File(reader) => {
                let mut buf = String::new();
                match reader.read_line(&mut buf) {
                    Ok(0) => return None,
                    Ok(_) => buf,
                    Err(e) => return Some(Err(e.into())),
                }
            }
            ByteSource::Stream(reader) => match read_stream_line(reader.as_mut()) {
                Ok(Some(buf)) => buf,
                Ok(None) => return None,
                Err(e) => return Some(Err(e.into())),
            },
        };
        self.line_number += 1;
        let mut line = raw;
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Some(Ok(line))
    }

    /// Read one logical line: physical lines ending in one or more
    /// backslashes are joined (space-separated, backslashes dropped) before
    /// the comment policy is applied to each fragment.
    pub fn read_logical(&mut self) -> Option<Result<LogicalLine>> {
        let first = match self.read_line()? {
            Ok(line) => line,
            Err(e) => return Some(Err(e)),
        };
        let start = self.line_number;
        let (mut text, mut continued) = strip_continuation(&first);
        text = truncate_comment(&text, self.dollar_forced);

        while continued {
            let next = match self.read_line() {
                Some(Ok(line)) => line,
                Some(Err(e)) => return Some(Err(e)),
                // EOF while continued: return what we have.
                None => break,
            };
            let (fragment, more) = strip_continuation(&next);
            let fragment = truncate_comment(&fragment, self.dollar_forced);
            if !text.is_empty() && !fragment.is_empty() {
                text.push(' ');
            }
            text.push_str(&fragment);
            continued = more;
        }

        Some(Ok(LogicalLine::new(text, start)))
    }
}

/// Read one line from a stream, byte by byte, terminating on `\n` or NUL.
/// A NUL with nothing accumulated yields an empty line. `EINTR` retries.
fn read_stream_line(reader: &mut dyn Read) -> std::io::Result<Option<String>> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => {
                if buf.is_empty() {
                    return Ok(None);
                }
                break;
            }
            Ok(_) => match byte[0] {
                b'\n' | 0 => break,
                b => buf.push(b),
            },
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// Strip all trailing backslashes; returns the text and whether the line
/// continues onto the next physical line.
fn strip_continuation(line: &str) -> (String, bool) {
    let trimmed = line.trim_end();
    let without = trimmed.trim_end_matches('\\');
    if without.len() < trimmed.len() {
        (without.trim_end().to_string(), true)
    } else {
        (line.to_string(), false)
    }
}

/// Apply the `$`/`;` inline-comment policy.
///
/// A `$` or `;` as the first non-blank character comments the whole line
/// (the marker is replaced by `*`) when it is followed by whitespace, ends
/// the line, or `forced` is set. Elsewhere, an unescaped marker preceded by
/// whitespace (or under `forced`) truncates the remainder, unless the
/// marker sits inside single or double quotes.
pub fn truncate_comment(line: &str, forced: bool) -> String {
    let chars: Vec<char> = line.chars().collect();
    let first_nonblank = chars.iter().position(|c| !c.is_whitespace());

    if let Some(i) = first_nonblank {
        if chars[i] == '$' || chars[i] == ';' {
            let next_ws = chars.get(i + 1).map_or(true, |c| c.is_whitespace());
            if next_ws || forced {
                let mut out: String = chars[..i].iter().collect();
                out.push('*');
                out.extend(&chars[i + 1..]);
                return out;
            }
        }
    }

    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;
    // The scan starts at the first non-blank character so an opening quote
    // there is tracked; marker handling at that position was already covered
    // above.
    let start = first_nonblank.unwrap_or(0);
    for i in start..chars.len() {
        let c = chars[i];
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '$' | ';' if !in_single && !in_double && first_nonblank != Some(i) => {
                let prev_ws = chars[i - 1].is_whitespace();
                if prev_ws || forced {
                    let kept: String = chars[..i].iter().collect();
                    return kept.trim_end().to_string();
                }
            }
            _ => {}
        }
    }
    line.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader_for(text: &str) -> LineReader {
        LineReader::new(ByteSource::stream(Cursor::new(text.as_bytes().to_vec())))
    }

    fn all_lines(reader: &mut LineReader) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(line) = reader.read_logical() {
            out.push(line.unwrap().text);
        }
        out
    }

    #[test]
    fn test_basic_lines() {
        let mut r = reader_for("R1 1 0 1k\nC1 1 0 1n\n");
        assert_eq!(all_lines(&mut r), vec!["R1 1 0 1k", "C1 1 0 1n"]);
    }

    #[test]
    fn test_nul_terminates_line() {
        let mut r = LineReader::new(ByteSource::stream(Cursor::new(
            b"R1 1 0 1k\0C1 1 0 1n\n".to_vec(),
        )));
        assert_eq!(all_lines(&mut r), vec!["R1 1 0 1k", "C1 1 0 1n"]);
    }

    #[test]
    fn test_unterminated_final_line() {
        let mut r = reader_for("R1 1 0 1k");
        assert_eq!(all_lines(&mut r), vec!["R1 1 0 1k"]);
    }

    #[test]
    fn test_backslash_continuation() {
        let mut r = reader_for("R1 1 0 \\\n1k\nC1 1 0 1n\n");
        let first = r.read_logical().unwrap().unwrap();
        assert_eq!(first.text, "R1 1 0 1k");
        assert_eq!(first.line_number, 1);
        let second = r.read_logical().unwrap().unwrap();
        assert_eq!(second.text, "C1 1 0 1n");
        assert_eq!(second.line_number, 3);
    }

    #[test]
    fn test_greedy_backslashes() {
        let mut r = reader_for("R1 1 0\\\\\\\n1k\n");
        assert_eq!(all_lines(&mut r), vec!["R1 1 0 1k"]);
    }

    #[test]
    fn test_full_line_comment_marker() {
        assert_eq!(truncate_comment("$ a note", false), "* a note");
        assert_eq!(truncate_comment("  ; note", false), "  * note");
        // No trailing whitespace and not forced: left alone.
        assert_eq!(truncate_comment("$note", false), "$note");
        assert_eq!(truncate_comment("$note", true), "*note");
    }

    #[test]
    fn test_midline_truncation() {
        assert_eq!(truncate_comment("R1 1 0 1k $ load", false), "R1 1 0 1k");
        assert_eq!(truncate_comment("R1 1 0 1k ; load", false), "R1 1 0 1k");
        // Marker not preceded by whitespace survives unless forced.
        assert_eq!(truncate_comment("V1 a$b 0 1", false), "V1 a$b 0 1");
        assert_eq!(truncate_comment("V1 a$b 0 1", true), "V1 a");
    }

    #[test]
    fn test_quotes_protect_marker() {
        assert_eq!(
            truncate_comment(".param s='a $ b' r=1", false),
            ".param s='a $ b' r=1"
        );
        assert_eq!(
            truncate_comment(".param s=\"x ; y\" $ note", false),
            ".param s=\"x ; y\""
        );
    }

    #[test]
    fn test_leading_quote_protects_marker() {
        assert_eq!(truncate_comment("'a $ b' r=1", false), "'a $ b' r=1");
    }

    #[test]
    fn test_escape_protects_quote_and_marker() {
        assert_eq!(
            truncate_comment("R1 1 0 1k \\$ kept", false),
            "R1 1 0 1k \\$ kept"
        );
    }
}
