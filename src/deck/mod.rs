//! Logical-line containers for circuit decks.
//!
//! A deck is an ordered sequence of [`LogicalLine`]s. The preprocessor
//! removes directive lines mid-traversal, splices whole included sub-decks
//! into the middle of a list, and deletes untaken conditional branches as a
//! single span, so [`LineList`] is built for cheap splicing at any cursor:
//! nodes live in an arena `Vec` and are linked by index, never by pointer.
//! Removed slots go on a free list and are reused by later insertions.

mod reader;
mod splitter;

pub use reader::{ByteSource, LineReader};
pub use splitter::{split_files, FileElement};

/// One logical line of deck text.
#[derive(Debug, Clone, Default)]
pub struct LogicalLine {
    /// The line's text after comment truncation and continuation merging.
    pub text: String,
    /// Physical line number in the originating file (1-indexed).
    pub line_number: i32,
    /// The pre-merge fragments when this line was built by `+`-continuation
    /// joining, so re-display can show the un-merged source.
    pub true_text: Option<Box<LineList>>,
    /// Advisory diagnostic attached by the preprocessor; never fatal.
    pub error: Option<String>,
}

impl LogicalLine {
    /// Create a plain line with no continuation history or diagnostic.
    pub fn new(text: impl Into<String>, line_number: i32) -> Self {
        Self {
            text: text.into(),
            line_number,
            true_text: None,
            error: None,
        }
    }

    /// Append a diagnostic, separating multiple diagnostics with `; `.
    pub fn attach_error(&mut self, message: impl AsRef<str>) {
        match &mut self.error {
            Some(existing) => {
                existing.push_str("; ");
                existing.push_str(message.as_ref());
            }
            None => self.error = Some(message.as_ref().to_string()),
        }
    }

    /// True if the line is a comment (`*` or `#` first) or blank.
    pub fn is_comment_or_blank(&self) -> bool {
        match self.text.trim_start().chars().next() {
            None => true,
            Some('*') | Some('#') => true,
            Some(_) => false,
        }
    }
}

/// Stable handle to a node in a [`LineList`].
///
/// Ids stay valid across unrelated insertions and removals; removing a node
/// invalidates only that node's id (the slot may be reused later).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct Node {
    line: LogicalLine,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

/// An ordered, splice-friendly sequence of [`LogicalLine`]s.
#[derive(Debug, Clone, Default)]
pub struct LineList {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    len: usize,
}

impl LineList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lines in the list.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the list holds no lines.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First node, if any.
    pub fn head(&self) -> Option<NodeId> {
        self.head
    }

    /// Last node, if any.
    pub fn tail(&self) -> Option<NodeId> {
        self.tail
    }

    /// Node following `id`.
    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).next
    }

    /// Node preceding `id`.
    pub fn prev(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).prev
    }

    /// Borrow the line at `id`.
    pub fn get(&self, id: NodeId) -> &LogicalLine {
        &self.node(id).line
    }

    /// Mutably borrow the line at `id`.
    pub fn get_mut(&mut self, id: NodeId) -> &mut LogicalLine {
        &mut self.node_mut(id).line
    }

    fn node(&self, id: NodeId) -> &Node {
        self.nodes[id.0].as_ref().expect("stale NodeId")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id.0].as_mut().expect("stale NodeId")
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        if let Some(slot) = self.free.pop() {
            self.nodes[slot] = Some(node);
            NodeId(slot)
        } else {
            self.nodes.push(Some(node));
            NodeId(self.nodes.len() - 1)
        }
    }

    /// Append a line at the end of the list.
    pub fn push_back(&mut self, line: LogicalLine) -> NodeId {
        let id = self.alloc(Node {
            line,
            prev: self.tail,
            next: None,
        });
        match self.tail {
            Some(tail) => self.node_mut(tail).next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
        id
    }

    /// Insert a line immediately after `at`.
    pub fn insert_after(&mut self, at: NodeId, line: LogicalLine) -> NodeId {
        let after = self.node(at).next;
        let id = self.alloc(Node {
            line,
            prev: Some(at),
            next: after,
        });
        self.node_mut(at).next = Some(id);
        match after {
            Some(next) => self.node_mut(next).prev = Some(id),
            None => self.tail = Some(id),
        }
        self.len += 1;
        id
    }

    /// Remove the node at `id`, returning its line. The id becomes stale.
    pub fn remove(&mut self, id: NodeId) -> LogicalLine {
        let node = self.nodes[id.0].take().expect("stale NodeId");
        match node.prev {
            Some(prev) => self.node_mut(prev).next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.node_mut(next).prev = node.prev,
            None => self.tail = node.prev,
        }
        self.free.push(id.0);
        self.len -= 1;
        node.line
    }

    /// Remove the whole span from `from` to `to` inclusive. `from` must not
    /// come after `to` in list order.
    pub fn remove_span(&mut self, from: NodeId, to: NodeId) {
        let mut cur = Some(from);
        loop {
            let id = cur.expect("remove_span: 'to' not reachable from 'from'");
            cur = self.next(id);
            let at_end = id == to;
            self.remove(id);
            if at_end {
                break;
            }
        }
    }

    /// Move every line of `other` into this list, immediately after `at`,
    /// preserving order. `other` is left empty.
    pub fn splice_after(&mut self, at: NodeId, other: &mut LineList) {
        let mut cursor = at;
        let mut next = other.head();
        while let Some(id) = next {
            next = other.next(id);
            let line = other.remove(id);
            cursor = self.insert_after(cursor, line);
        }
    }

    /// Append every line of `other`, leaving `other` empty.
    pub fn append(&mut self, other: &mut LineList) {
        let mut next = other.head();
        while let Some(id) = next {
            next = other.next(id);
            let line = other.remove(id);
            self.push_back(line);
        }
    }

    /// Iterate node ids front to back. Safe against mutation only if the
    /// caller re-reads `next` after structural changes.
    pub fn ids(&self) -> Ids<'_> {
        Ids {
            list: self,
            cur: self.head,
        }
    }

    /// Iterate the lines front to back.
    pub fn iter(&self) -> impl Iterator<Item = &LogicalLine> {
        self.ids().map(move |id| self.get(id))
    }

    /// Collect the line texts, mainly for tests and display.
    pub fn texts(&self) -> Vec<String> {
        self.iter().map(|l| l.text.clone()).collect()
    }
}

/// Iterator over node ids of a [`LineList`].
pub struct Ids<'a> {
    list: &'a LineList,
    cur: Option<NodeId>,
}

impl Iterator for Ids<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.cur?;
        self.cur = self.list.next(id);
        Some(id)
    }
}

impl FromIterator<LogicalLine> for LineList {
    fn from_iter<I: IntoIterator<Item = LogicalLine>>(iter: I) -> Self {
        let mut list = LineList::new();
        for line in iter {
            list.push_back(line);
        }
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_of(texts: &[&str]) -> LineList {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| LogicalLine::new(*t, i as i32 + 1))
            .collect()
    }

    #[test]
    fn test_push_and_iterate() {
        let list = list_of(&["a", "b", "c"]);
        assert_eq!(list.len(), 3);
        assert_eq!(list.texts(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_remove_middle() {
        let mut list = list_of(&["a", "b", "c"]);
        let b = list.next(list.head().unwrap()).unwrap();
        let removed = list.remove(b);
        assert_eq!(removed.text, "b");
        assert_eq!(list.texts(), vec!["a", "c"]);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_remove_head_and_tail() {
        let mut list = list_of(&["a", "b", "c"]);
        list.remove(list.head().unwrap());
        list.remove(list.tail().unwrap());
        assert_eq!(list.texts(), vec!["b"]);
        assert_eq!(list.head(), list.tail());
    }

    #[test]
    fn test_insert_after() {
        let mut list = list_of(&["a", "c"]);
        let a = list.head().unwrap();
        list.insert_after(a, LogicalLine::new("b", 9));
        assert_eq!(list.texts(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_slot_reuse() {
        let mut list = list_of(&["a", "b"]);
        let b = list.tail().unwrap();
        list.remove(b);
        let arena_before = list.nodes.len();
        list.push_back(LogicalLine::new("c", 3));
        assert_eq!(list.nodes.len(), arena_before);
        assert_eq!(list.texts(), vec!["a", "c"]);
    }

    #[test]
    fn test_remove_span() {
        let mut list = list_of(&["a", "b", "c", "d", "e"]);
        let b = list.next(list.head().unwrap()).unwrap();
        let d = list.prev(list.tail().unwrap()).unwrap();
        list.remove_span(b, d);
        assert_eq!(list.texts(), vec!["a", "e"]);
    }

    #[test]
    fn test_splice_after() {
        let mut list = list_of(&["a", "d"]);
        let mut sub = list_of(&["b", "c"]);
        let a = list.head().unwrap();
        list.splice_after(a, &mut sub);
        assert_eq!(list.texts(), vec!["a", "b", "c", "d"]);
        assert!(sub.is_empty());
    }

    #[test]
    fn test_attach_error_appends() {
        let mut line = LogicalLine::new(".if", 1);
        line.attach_error("missing .endif");
        line.attach_error("bad expression");
        assert_eq!(
            line.error.as_deref(),
            Some("missing .endif; bad expression")
        );
    }

    #[test]
    fn test_comment_detection() {
        assert!(LogicalLine::new("* comment", 1).is_comment_or_blank());
        assert!(LogicalLine::new("# comment", 1).is_comment_or_blank());
        assert!(LogicalLine::new("   ", 1).is_comment_or_blank());
        assert!(!LogicalLine::new("R1 1 0 1k", 1).is_comment_or_blank());
    }
}
