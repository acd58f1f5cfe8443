//! Input splitting on `.newjob` boundaries.
//!
//! Each physical input becomes one or more [`FileElement`]s, one per
//! independent job. FIFOs are copied verbatim into a temp file first so the
//! content can be re-opened and seeked. Spans that do not cover a whole
//! physical file are materialized into temp files, except a final span
//! running to EOF, which is represented by a positive `line_offset` into the
//! original file. Temp files are unlinked when the element is dropped.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{DeckError, Result};

/// One independent job within the input set.
#[derive(Debug)]
pub struct FileElement {
    path: PathBuf,
    /// Directory of the original input file; relative includes in the job
    /// resolve against this even when the job text lives in a temp file.
    base_dir: PathBuf,
    /// Zero or negative: the job is the whole file. Positive: the job
    /// begins at this 1-indexed line of the file.
    line_offset: i64,
    /// Guard holding a temp file alive; the file is unlinked on drop.
    temp: Option<tempfile::TempPath>,
}

impl FileElement {
    /// Path to the file holding this job's lines.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory relative include paths resolve against.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// 1-indexed line at which the job starts, or ≤0 for start-of-file.
    pub fn line_offset(&self) -> i64 {
        self.line_offset
    }

    /// True if this job lives in a temp file owned by the element.
    pub fn is_temp(&self) -> bool {
        self.temp.is_some()
    }
}

/// Split the given inputs into jobs on `.newjob` boundaries.
///
/// Any unreadable or garbage input aborts the whole split; temp files
/// created for earlier inputs are unlinked as the partial result drops.
pub fn split_files(paths: &[PathBuf]) -> Result<Vec<FileElement>> {
    let mut elements = Vec::new();
    for path in paths {
        let (read_path, fifo_temp) = stage_input(path)?;
        check_deck_plausible(&read_path)?;
        let markers = scan_newjob(&read_path)?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        merge_spans(&read_path, &base_dir, fifo_temp, &markers, &mut elements)?;
    }
    Ok(elements)
}

/// Copy a FIFO into a temp file so it can be re-opened and seeked; regular
/// files pass through untouched.
fn stage_input(path: &Path) -> Result<(PathBuf, Option<tempfile::TempPath>)> {
    let meta = std::fs::metadata(path).map_err(|e| DeckError::Unreadable {
        path: path.display().to_string(),
        source: e,
    })?;

    #[cfg(unix)]
    let is_fifo = {
        use std::os::unix::fs::FileTypeExt;
        meta.file_type().is_fifo()
    };
    #[cfg(not(unix))]
    let is_fifo = false;

    if !is_fifo {
        return Ok((path.to_path_buf(), None));
    }

    tracing::debug!(path = %path.display(), "copying fifo into temp file");
    let mut fifo = File::open(path).map_err(|e| DeckError::Unreadable {
        path: path.display().to_string(),
        source: e,
    })?;
    let mut temp = NamedTempFile::new()?;
    std::io::copy(&mut fifo, temp.as_file_mut())?;
    let temp_path = temp.into_temp_path();
    Ok((temp_path.to_path_buf(), Some(temp_path)))
}

/// Reject inputs that look like simulation-result files or binary data.
///
/// Scans the first ~10 non-comment lines: ten CSDF-header indicators or ten
/// rawfile-header indicators reject the input, as does any line with more
/// than a quarter suspicious bytes (long lines) or more than two low
/// control characters. A single unterminated line is accepted outright.
pub(crate) fn check_deck_plausible(path: &Path) -> Result<()> {
    let file = File::open(path).map_err(|e| DeckError::Unreadable {
        path: path.display().to_string(),
        source: e,
    })?;
    let mut reader = BufReader::new(file);
    let mut buf: Vec<u8> = Vec::new();

    let mut scanned = 0usize;
    let mut csdf = 0usize;
    let mut raw = 0usize;
    let mut saw_newline = false;

    while scanned < 10 {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            break;
        }
        if buf.last() == Some(&b'\n') {
            saw_newline = true;
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        } else if !saw_newline {
            // EOF before a second line: a one-line deck, accepted as-is.
            return Ok(());
        }

        let low_control = buf
            .iter()
            .filter(|&&b| b < 0x20 && b != b'\t')
            .count();
        if low_control > 2 {
            return Err(DeckError::Garbage {
                path: path.display().to_string(),
                reason: "control characters in line".into(),
            });
        }
        let suspicious = buf
            .iter()
            .filter(|&&b| b >= 0x7f || (b < 0x20 && b != b'\t'))
            .count();
        if buf.len() >= 8 && suspicious > buf.len() / 4 {
            return Err(DeckError::Garbage {
                path: path.display().to_string(),
                reason: "line is mostly non-printable bytes".into(),
            });
        }

        let text = String::from_utf8_lossy(&buf);
        let trimmed = text.trim_start();
        if trimmed.starts_with('*') {
            continue;
        }
        scanned += 1;

        if is_csdf_header(trimmed) {
            csdf += 1;
        }
        if is_rawfile_header(trimmed) {
            raw += 1;
        }
        if csdf >= 10 {
            return Err(DeckError::Garbage {
                path: path.display().to_string(),
                reason: "looks like a CSDF results file".into(),
            });
        }
        if raw >= 10 {
            return Err(DeckError::Garbage {
                path: path.display().to_string(),
                reason: "looks like a raw results file".into(),
            });
        }
    }
    Ok(())
}

fn is_csdf_header(line: &str) -> bool {
    let mut chars = line.chars();
    chars.next() == Some('#')
        && matches!(chars.next(), Some('H') | Some('N') | Some('C') | Some(';'))
}

fn is_rawfile_header(line: &str) -> bool {
    const HEADERS: [&str; 9] = [
        "Title:",
        "Date:",
        "Plotname:",
        "Flags:",
        "No. Variables:",
        "No. Points:",
        "Variables:",
        "Values:",
        "Binary:",
    ];
    HEADERS.iter().any(|h| line.starts_with(h))
}

/// A `.newjob` marker: the 1-indexed line it sits on and the byte range of
/// the marker line itself.
struct Marker {
    line: usize,
    start: u64,
    end: u64,
}

/// Record the position of every `.newjob` line in the file.
fn scan_newjob(path: &Path) -> Result<Vec<Marker>> {
    let file = File::open(path).map_err(|e| DeckError::Unreadable {
        path: path.display().to_string(),
        source: e,
    })?;
    let mut reader = BufReader::new(file);
    let mut markers = Vec::new();
    let mut buf: Vec<u8> = Vec::new();
    let mut offset: u64 = 0;
    let mut line = 0usize;
    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)? as u64;
        if n == 0 {
            break;
        }
        line += 1;
        let text = String::from_utf8_lossy(&buf);
        if text.trim().eq_ignore_ascii_case(".newjob") {
            markers.push(Marker {
                line,
                start: offset,
                end: offset + n,
            });
        }
        offset += n;
    }
    Ok(markers)
}

/// Turn the marker list into a minimal list of elements for one file.
fn merge_spans(
    path: &Path,
    base_dir: &Path,
    fifo_temp: Option<tempfile::TempPath>,
    markers: &[Marker],
    out: &mut Vec<FileElement>,
) -> Result<()> {
    if markers.is_empty() {
        out.push(FileElement {
            path: path.to_path_buf(),
            base_dir: base_dir.to_path_buf(),
            line_offset: 0,
            temp: fifo_temp,
        });
        return Ok(());
    }

    // Leading span before the first marker, if non-empty.
    if markers[0].start > 0 {
        out.push(materialize_span(path, base_dir, 0, markers[0].start)?);
    }
    for pair in markers.windows(2) {
        let (marker, next) = (&pair[0], &pair[1]);
        if next.start > marker.end {
            out.push(materialize_span(path, base_dir, marker.end, next.start)?);
        }
    }
    // Final span runs to EOF: point into the original file.
    let last = markers.last().expect("markers checked non-empty");
    out.push(FileElement {
        path: path.to_path_buf(),
        base_dir: base_dir.to_path_buf(),
        line_offset: last.line as i64 + 1,
        temp: fifo_temp,
    });
    Ok(())
}

/// Stream `[start, end)` of `path` into a fresh temp file.
fn materialize_span(path: &Path, base_dir: &Path, start: u64, end: u64) -> Result<FileElement> {
    let mut file = File::open(path).map_err(|e| DeckError::Unreadable {
        path: path.display().to_string(),
        source: e,
    })?;
    file.seek(SeekFrom::Start(start))?;
    let mut temp = NamedTempFile::new()?;
    let mut remaining = end - start;
    let mut chunk = [0u8; 8192];
    while remaining > 0 {
        let want = remaining.min(chunk.len() as u64) as usize;
        let n = file.read(&mut chunk[..want])?;
        if n == 0 {
            break;
        }
        temp.as_file_mut().write_all(&chunk[..n])?;
        remaining -= n as u64;
    }
    tracing::debug!(
        source = %path.display(),
        start,
        end,
        "materialized job span into temp file"
    );
    let temp_path = temp.into_temp_path();
    Ok(FileElement {
        path: temp_path.to_path_buf(),
        base_dir: base_dir.to_path_buf(),
        line_offset: 0,
        temp: Some(temp_path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn test_single_file_no_markers() {
        let f = write_temp("title\nR1 1 0 1k\n.end\n");
        let elements = split_files(&[f.path().to_path_buf()]).unwrap();
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].line_offset(), 0);
        assert!(!elements[0].is_temp());
    }

    #[test]
    fn test_two_jobs_reconstruct_original() {
        let first = "job one\nR1 1 0 1k\n";
        let second = "job two\nR2 2 0 2k\n";
        let f = write_temp(&format!("{}.newjob\n{}", first, second));
        let elements = split_files(&[f.path().to_path_buf()]).unwrap();
        assert_eq!(elements.len(), 2);

        // First span materialized into a temp file.
        assert!(elements[0].is_temp());
        let content = std::fs::read_to_string(elements[0].path()).unwrap();
        assert_eq!(content, first);

        // Second span points into the original file past the marker line.
        assert!(!elements[1].is_temp());
        assert_eq!(elements[1].line_offset(), 4);
        let full = std::fs::read_to_string(elements[1].path()).unwrap();
        let tail: String = full
            .lines()
            .skip(elements[1].line_offset() as usize - 1)
            .flat_map(|l| [l, "\n"])
            .collect();
        assert_eq!(tail, second);
    }

    #[test]
    fn test_temp_unlinked_on_drop() {
        let f = write_temp("a\n.newjob\nb\n");
        let elements = split_files(&[f.path().to_path_buf()]).unwrap();
        let temp_path = elements[0].path().to_path_buf();
        assert!(temp_path.exists());
        drop(elements);
        assert!(!temp_path.exists());
    }

    #[test]
    fn test_missing_file_aborts() {
        let err = split_files(&[PathBuf::from("/no/such/deck.sp")]).unwrap_err();
        assert!(matches!(err, DeckError::Unreadable { .. }));
    }

    #[test]
    fn test_rejects_rawfile() {
        let f = write_temp(
            "Title: op\nDate: today\nPlotname: DC\nFlags: real\nNo. Variables: 2\n\
             No. Points: 5\nVariables:\nValues:\nTitle: op\nDate: x\nPlotname: y\nFlags: z\n",
        );
        // Ten rawfile headers within the scanned window.
        let err = split_files(&[f.path().to_path_buf()]).unwrap_err();
        assert!(matches!(err, DeckError::Garbage { .. }));
    }

    #[test]
    fn test_rejects_binary_line() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"\x01\x02\x03\x04\x05\x06\x07\x08bad\n\n")
            .unwrap();
        f.flush().unwrap();
        let err = split_files(&[f.path().to_path_buf()]).unwrap_err();
        assert!(matches!(err, DeckError::Garbage { .. }));
    }

    #[test]
    fn test_single_unterminated_line_accepted() {
        let f = write_temp("R1 1 0 1k");
        assert!(split_files(&[f.path().to_path_buf()]).is_ok());
    }
}
