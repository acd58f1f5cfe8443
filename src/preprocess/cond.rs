//! The `.if/.elif/.else/.endif` stack machine.
//!
//! One pass over a [`LineList`], walking head to tail. Along the way it
//! merges `+`-continuation lines, de-duplicates `.cache`/`.endcache` blocks
//! against the subcircuit cache, harvests `.param` definitions, rewrites the
//! title line, expands include and library directives (recursing through the
//! include resolver, live regions only), and resolves conditional blocks so
//! that exactly one branch of each well-nested conditional survives, in
//! original order, with the directive lines themselves removed.
//!
//! All malformed-nesting conditions are recoverable: a diagnostic is
//! attached to the offending line and processing continues.

use crate::deck::{LineList, LogicalLine, NodeId};
use crate::error::Result;
use crate::preprocess::params::{substitute_shell_vars, ParamTable};
use crate::preprocess::{expr, include, PreprocessContext};

/// One open conditional level.
struct Frame {
    /// Some branch at this level has already been selected.
    taken: bool,
    /// Lines are currently being collected for deletion as one span.
    skipping: bool,
    /// Splice anchor: the node just before the directive that opened the
    /// span; `None` means the span starts at the list head.
    start: Option<NodeId>,
    /// Frame opened inside a span already being skipped; tracked only so
    /// nesting stays balanced, never evaluated.
    dead: bool,
}

/// Run the conditional pass over `list`, consuming directives in place.
/// Include and library directives met in live regions are resolved from
/// within the walk, so an include inside an untaken branch is never opened
/// and parameters defined earlier in the walk are visible to conditions in
/// the nested file. `origin` names the file the list came from, for
/// error-chain frames. The parameter table is taken and returned by value;
/// ownership travels with the deck through the pipeline.
pub fn process(
    list: &mut LineList,
    mut params: ParamTable,
    cx: &mut PreprocessContext,
    origin: &str,
) -> Result<ParamTable> {
    merge_continuations(list);

    let mut frames: Vec<Frame> = Vec::new();
    let mut in_subckt: i32 = 0;
    let mut cache_level: i32 = 0;
    let mut cache_suppress = false;
    let mut title_done = false;
    let mut spliced_any = false;

    let mut cur = list.head();
    while let Some(id) = cur {
        let next = list.next(id);
        cur = next;

        let text = list.get(id).text.clone();
        let trimmed = text.trim_start();
        let token = trimmed.split_whitespace().next().unwrap_or("");
        let keyword = token.to_lowercase();
        let rest = trimmed[token.len()..].trim().to_string();

        // A suppressed cache block deletes everything, delimiters included.
        if cache_suppress {
            match keyword.as_str() {
                ".endcache" => {
                    cache_level -= 1;
                    cache_suppress = false;
                }
                ".cache" => {
                    cache_level += 1;
                    warn_line(list, id, "nested .cache inside suppressed block");
                }
                _ => {}
            }
            list.remove(id);
            continue;
        }

        let skipping = frames.last().map_or(false, |f| f.skipping && !f.dead);

        match keyword.as_str() {
            ".if" => {
                if skipping || frames.last().map_or(false, |f| f.dead) {
                    frames.push(Frame {
                        taken: false,
                        skipping: false,
                        start: None,
                        dead: true,
                    });
                } else if evaluate_condition(&rest, &params) {
                    list.remove(id);
                    frames.push(Frame {
                        taken: true,
                        skipping: false,
                        start: None,
                        dead: false,
                    });
                } else {
                    frames.push(Frame {
                        taken: false,
                        skipping: true,
                        start: list.prev(id),
                        dead: false,
                    });
                }
            }
            ".elif" | ".elseif" => match frames.last_mut() {
                None => {
                    warn_line(list, id, ".elif without matching .if");
                    comment_out(list, id);
                }
                Some(f) if f.dead => {}
                Some(f) if f.skipping && !f.taken => {
                    // First-match-wins: evaluate, and either close the dead
                    // span here or let it keep growing.
                    if evaluate_condition(&rest, &params) {
                        let start = f.start;
                        f.taken = true;
                        f.skipping = false;
                        splice_out(list, start, id);
                    }
                }
                Some(f) if !f.skipping => {
                    // A branch was already taken; this one dies wholesale.
                    f.skipping = true;
                    f.start = list.prev(id);
                }
                Some(_) => {} // skipping a post-taken span: line is inside it
            },
            ".else" => match frames.last_mut() {
                None => {
                    warn_line(list, id, ".else without matching .if");
                    comment_out(list, id);
                }
                Some(f) if f.dead => {}
                Some(f) if f.skipping && !f.taken => {
                    let start = f.start;
                    f.taken = true;
                    f.skipping = false;
                    splice_out(list, start, id);
                }
                Some(f) if !f.skipping => {
                    f.skipping = true;
                    f.start = list.prev(id);
                }
                Some(_) => {}
            },
            ".endif" => match frames.pop() {
                None => {
                    warn_line(list, id, ".endif without matching .if");
                    comment_out(list, id);
                }
                Some(f) if f.dead => {}
                Some(f) if f.skipping => {
                    splice_out(list, f.start, id);
                }
                Some(_) => {
                    list.remove(id);
                }
            },
            _ if skipping || frames.last().map_or(false, |f| f.dead) => {
                // Inside a span destined for deletion: nothing else to do.
            }
            k if include::is_include_keyword(k) => {
                let line_number = list.get(id).line_number;
                let directive = include::parse_directive(&keyword, &rest, line_number)?;
                let handed = std::mem::take(&mut params);
                let (mut nested, returned) = include::load_nested(&directive, handed, cx, origin)?;
                params = returned;

                // Comment out the directive (provenance), splice the fully
                // processed nested lines after it, and close the splice with
                // a synthetic end marker.
                list.get_mut(id).text.insert(0, '*');
                let marker_text = match &directive.block {
                    Some(block) => format!("*end {} {}", directive.path, block),
                    None => format!("*end {}", directive.path),
                };
                nested.push_back(LogicalLine::new(marker_text, 0));
                list.splice_after(id, &mut nested);
                // `cur` already points past the directive; the spliced
                // region needs no second pass.
                spliced_any = true;
            }
            ".cache" => {
                cache_level += 1;
                if cache_level > 1 {
                    warn_line(list, id, "nested .cache");
                }
                let name = rest.split_whitespace().next().unwrap_or("");
                if name.is_empty() {
                    warn_line(list, id, ".cache without a block name");
                } else if cache_level == 1 && cx.subckt_cache.contains(&name.to_lowercase()) {
                    cache_suppress = true;
                    list.remove(id);
                }
            }
            ".endcache" => {
                if cache_level == 0 {
                    warn_line(list, id, ".endcache without matching .cache");
                } else {
                    cache_level -= 1;
                }
            }
            ".subckt" | ".macro" => in_subckt += 1,
            ".ends" | ".eom" => in_subckt -= 1,
            ".param" if in_subckt == 0 => {
                if let Err(e) = params.extract_params(&rest) {
                    warn_line(list, id, &e);
                }
            }
            ".title" if in_subckt == 0 => {
                if !title_done {
                    title_done = true;
                    let head = list.head().expect("non-empty list has a head");
                    if head == id {
                        list.get_mut(id).text = rest;
                    } else {
                        list.get_mut(head).text = rest;
                        list.remove(id);
                    }
                }
            }
            ".option" | ".options" if in_subckt == 0 => {
                // Values are validated like .param pairs; failures are
                // advisory only and nothing is stored.
                let mut scratch = ParamTable::new();
                if let Err(e) = scratch.extract_params(&rest) {
                    warn_line(list, id, &e);
                }
            }
            _ => {}
        }
    }

    if spliced_any {
        include::renumber_monotonic(list);
    }

    if !frames.is_empty() {
        if let Some(last) = list.tail() {
            warn_line(list, last, "missing .endif");
        }
        frames.clear();
    }

    Ok(params)
}

/// Parameter-substitute a condition, re-substituting shell variables if a
/// `$` survives, then evaluate. Unparseable conditions are false.
fn evaluate_condition(condition: &str, params: &ParamTable) -> bool {
    let mut substituted = params.substitute(condition);
    if substituted.contains('$') {
        substituted = substitute_shell_vars(&substituted);
    }
    expr::eval_truthy(&substituted)
}

/// Merge `+`-continuation lines into the preceding non-comment, non-blank
/// line. The merged line keeps the original fragments in `true_text` so the
/// un-merged source remains retrievable.
pub fn merge_continuations(list: &mut LineList) {
    let mut prev: Option<NodeId> = None;
    let mut cur = list.head();
    while let Some(id) = cur {
        cur = list.next(id);
        let line = list.get(id);
        let trimmed = line.text.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('*') || trimmed.starts_with('#') {
            continue;
        }
        if let Some(tail) = trimmed.strip_prefix('+') {
            let fragment = tail.trim_start().to_string();
            if let Some(prev_id) = prev {
                let removed = list.remove(id);
                let target = list.get_mut(prev_id);
                if target.true_text.is_none() {
                    let mut original = LineList::new();
                    original.push_back(LogicalLine::new(
                        target.text.clone(),
                        target.line_number,
                    ));
                    target.true_text = Some(Box::new(original));
                }
                if !fragment.is_empty() {
                    if !target.text.is_empty() {
                        target.text.push(' ');
                    }
                    target.text.push_str(&fragment);
                }
                target
                    .true_text
                    .as_mut()
                    .expect("just initialized")
                    .push_back(removed);
                continue;
            }
            // Continuation with nothing to continue: left in place.
        }
        prev = Some(id);
    }
}

/// Delete the span after `start` (or from the head when `start` is `None`)
/// through `end` inclusive.
fn splice_out(list: &mut LineList, start: Option<NodeId>, end: NodeId) {
    let from = match start {
        Some(anchor) => list.next(anchor),
        None => list.head(),
    };
    if let Some(from) = from {
        list.remove_span(from, end);
    }
}

/// Attach a diagnostic to a line and log it.
fn warn_line(list: &mut LineList, id: NodeId, message: &str) {
    let line = list.get_mut(id);
    tracing::warn!(line = line.line_number, "{}", message);
    line.attach_error(message);
}

/// Disable a line by turning it into a comment, keeping it for provenance.
fn comment_out(list: &mut LineList, id: NodeId) {
    let line = list.get_mut(id);
    line.text.insert(0, '*');
}
