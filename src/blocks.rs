//! Command-block extraction from a resolved deck.
//!
//! After conditional and include resolution, a deck may still carry command
//! blocks for the external interpreter (`.exec`/`.control`/`.postrun` up to
//! `.endc`), mixed-signal blocks (`.verilog` up to `.endv`, plus `.adc`
//! lines), and the `*@`/`*#` single-line shorthands. This pass pulls them
//! all out, leaving only circuit-description lines in the deck.

use crate::deck::{LineList, NodeId};

/// The three command-block families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Commands run before the simulation (`.exec`, `*@`).
    Exec,
    /// Commands run after the simulation (`.control`, `*#`).
    Control,
    /// Commands run after every analysis pass (`.postrun`).
    Postrun,
}

impl BlockKind {
    fn open_keyword(keyword: &str) -> Option<BlockKind> {
        match keyword {
            ".exec" => Some(BlockKind::Exec),
            ".control" => Some(BlockKind::Control),
            ".postrun" => Some(BlockKind::Postrun),
            _ => None,
        }
    }
}

/// A named block, registered as an independently invocable unit.
#[derive(Debug, Clone)]
pub struct Codeblock {
    pub kind: BlockKind,
    pub name: String,
    pub lines: Vec<String>,
}

/// Everything pulled out of the deck by [`extract`].
#[derive(Debug, Default)]
pub struct ExtractedBlocks {
    /// Unnamed EXEC lines, in encounter order.
    pub exec: Vec<String>,
    /// Unnamed CONTROL lines.
    pub control: Vec<String>,
    /// Unnamed POSTRUN lines.
    pub postrun: Vec<String>,
    /// Verilog text, `.adc` lines hoisted to the front.
    pub verilog: Vec<String>,
    /// Named blocks for the external command interpreter.
    pub codeblocks: Vec<Codeblock>,
}

/// Extract all command and verilog blocks from `list`, in place.
pub fn extract(list: &mut LineList) -> ExtractedBlocks {
    let mut out = ExtractedBlocks::default();
    extract_verilog(list, &mut out);
    extract_command_blocks(list, &mut out);
    out
}

fn keyword_of(list: &LineList, id: NodeId) -> String {
    list.get(id)
        .text
        .trim_start()
        .split_whitespace()
        .next()
        .map(str::to_lowercase)
        .unwrap_or_default()
}

/// Remove `.verilog ... .endv` spans (concatenated in encounter order) and
/// hoist every `.adc` line in front of the collected verilog text.
fn extract_verilog(list: &mut LineList, out: &mut ExtractedBlocks) {
    let mut adc: Vec<String> = Vec::new();
    let mut body: Vec<String> = Vec::new();
    let mut in_verilog = false;

    let mut cur = list.head();
    while let Some(id) = cur {
        cur = list.next(id);
        let keyword = keyword_of(list, id);
        if in_verilog {
            if keyword == ".endv" {
                in_verilog = false;
            } else {
                body.push(list.get(id).text.clone());
            }
            list.remove(id);
        } else if keyword == ".verilog" {
            in_verilog = true;
            list.remove(id);
        } else if keyword == ".adc" {
            adc.push(list.get(id).text.clone());
            list.remove(id);
        }
    }
    if in_verilog {
        tracing::warn!(".verilog block not closed by .endv");
    }
    out.verilog = adc;
    out.verilog.append(&mut body);
}

/// Lines collected for the block currently being read.
struct ActiveBlock {
    kind: BlockKind,
    name: Option<String>,
    lines: Vec<String>,
}

fn extract_command_blocks(list: &mut LineList, out: &mut ExtractedBlocks) {
    // Open blocks, oldest first. Blocks must not nest; an open keyword met
    // while a block is already open still opens its own kind, queued behind
    // the primary, which keeps collecting until its .endc.
    let mut open: Vec<ActiveBlock> = Vec::new();
    let mut old_format = false;

    let mut cur = list.head();
    while let Some(id) = cur {
        cur = list.next(id);
        let text = list.get(id).text.clone();
        let trimmed = text.trim_start();
        let keyword = trimmed
            .split_whitespace()
            .next()
            .map(str::to_lowercase)
            .unwrap_or_default();

        if old_format {
            // Legacy mode: the rest of the deck is one unnamed EXEC block,
            // up to the first explicit block keyword.
            if keyword == ".control" || keyword == ".exec" {
                old_format = false;
            } else {
                let line = list.remove(id);
                if !line.is_comment_or_blank() {
                    out.exec.push(strip_leading_dot(line.text.trim()));
                }
                continue;
            }
        }

        if !open.is_empty() {
            if keyword == ".endc" {
                let block = open.remove(0);
                close_block(block, out);
                list.remove(id);
                continue;
            }
            if let Some(kind) = BlockKind::open_keyword(&keyword) {
                let primary = open[0].kind;
                tracing::warn!(?kind, ?primary, "block keyword inside an open block");
                open.push(ActiveBlock {
                    kind,
                    name: block_name(kind, trimmed),
                    lines: Vec::new(),
                });
                list.remove(id);
                continue;
            }
            let line = list.remove(id);
            let block = open.first_mut().expect("open block present");
            if block.name.is_some() {
                block.lines.push(strip_leading_dot(line.text.trim()));
            } else if !line.is_comment_or_blank() {
                // Blank and comment lines are dropped so they never
                // masquerade as circuit lines.
                block.lines.push(strip_leading_dot(line.text.trim()));
            }
        } else if let Some(kind) = BlockKind::open_keyword(&keyword) {
            open.push(ActiveBlock {
                kind,
                name: block_name(kind, trimmed),
                lines: Vec::new(),
            });
            list.remove(id);
        } else if is_old_format_keyword(&keyword) {
            old_format = true;
            let line = list.remove(id);
            out.exec.push(strip_leading_dot(line.text.trim()));
        } else if let Some(rest) = trimmed.strip_prefix("*@") {
            out.exec.push(rest.trim().to_string());
            list.remove(id);
        } else if let Some(rest) = trimmed.strip_prefix("*#") {
            out.control.push(rest.trim().to_string());
            list.remove(id);
        }
    }

    for block in open {
        tracing::warn!(kind = ?block.kind, "command block not closed by .endc");
        close_block(block, out);
    }
}

fn block_name(kind: BlockKind, trimmed: &str) -> Option<String> {
    match kind {
        // .postrun takes no name
        BlockKind::Postrun => None,
        _ => trimmed.split_whitespace().nth(1).map(str::to_string),
    }
}

fn close_block(block: ActiveBlock, out: &mut ExtractedBlocks) {
    match block.name {
        Some(name) => out.codeblocks.push(Codeblock {
            kind: block.kind,
            name,
            lines: block.lines,
        }),
        None => {
            let target = match block.kind {
                BlockKind::Exec => &mut out.exec,
                BlockKind::Control => &mut out.control,
                BlockKind::Postrun => &mut out.postrun,
            };
            target.extend(block.lines);
        }
    }
}

fn is_old_format_keyword(keyword: &str) -> bool {
    matches!(keyword, ".check" | ".checkall" | ".monte" | ".noexec")
}

/// Command lines may be written with a leading `.`; the interpreter takes
/// them without it.
fn strip_leading_dot(line: &str) -> String {
    line.strip_prefix('.').unwrap_or(line).to_string()
}
