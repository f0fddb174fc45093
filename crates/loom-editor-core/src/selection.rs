//! Positions, ranges and the selection, plus the document queries that
//! resolve them: document-order comparison, block-relative offsets, and the
//! blocks, texts, inlines and marks a range touches.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::document::{Document, Node};
use crate::types::{InlineType, MarkSet, NodeKey};

/// A point in the document: a text leaf and a char offset into it.
///
/// A void block may also be addressed, always at offset 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub key: NodeKey,
    pub offset: usize,
}

impl Position {
    pub fn new(key: NodeKey, offset: usize) -> Self {
        Self { key, offset }
    }
}

/// Anchor is where the selection started, focus is where it is now.
/// They may be in any document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    pub anchor: Position,
    pub focus: Position,
}

impl Range {
    pub fn new(anchor: Position, focus: Position) -> Self {
        Self { anchor, focus }
    }

    pub fn collapsed(at: Position) -> Self {
        Self {
            anchor: at,
            focus: at,
        }
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.focus
    }

    pub fn is_expanded(&self) -> bool {
        !self.is_collapsed()
    }
}

/// The current range plus the marks the next typed text will carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub range: Range,
    /// Set by toggling a mark on a collapsed selection; cleared when the
    /// caret moves.
    pub marks: Option<MarkSet>,
}

impl Selection {
    pub fn new(range: Range) -> Self {
        Self { range, marks: None }
    }

    pub fn collapsed(at: Position) -> Self {
        Self::new(Range::collapsed(at))
    }

    pub fn anchor(&self) -> Position {
        self.range.anchor
    }

    pub fn focus(&self) -> Position {
        self.range.focus
    }

    pub fn is_collapsed(&self) -> bool {
        self.range.is_collapsed()
    }

    pub fn is_expanded(&self) -> bool {
        self.range.is_expanded()
    }

    /// Bring the selection back onto valid leaves after a structural change.
    ///
    /// Offsets are clamped; positions whose key vanished fall back to the
    /// start of the document.
    pub fn repair(&mut self, doc: &Document) {
        let fallback = doc.start_of(doc.root());
        let fix = |pos: Position| -> Option<Position> {
            match doc.get(pos.key) {
                Some(node) if node.is_text() => {
                    let len = node.text().map_or(0, |t| t.len_chars());
                    Some(Position::new(pos.key, pos.offset.min(len)))
                }
                Some(node) if node.is_void() => Some(Position::new(pos.key, 0)),
                Some(_) => doc.start_of(pos.key).or(fallback),
                None => fallback,
            }
        };
        let (Some(anchor), Some(focus)) = (fix(self.range.anchor), fix(self.range.focus)) else {
            return;
        };
        let moved = anchor != self.range.anchor || focus != self.range.focus;
        self.range = Range::new(anchor, focus);
        if moved {
            self.marks = None;
        }
    }
}

impl Document {
    /// Preorder index of every key, for repeated order comparisons.
    pub fn order_index(&self) -> HashMap<NodeKey, usize> {
        self.preorder()
            .into_iter()
            .enumerate()
            .map(|(i, k)| (k, i))
            .collect()
    }

    /// Document-order comparison of two positions.
    pub fn compare(&self, a: &Position, b: &Position) -> Ordering {
        if a.key == b.key {
            return a.offset.cmp(&b.offset);
        }
        let order = self.order_index();
        compare_with(&order, a, b)
    }

    /// `(start, end)` of a range in document order.
    pub fn ordered(&self, range: &Range) -> (Position, Position) {
        if self.compare(&range.anchor, &range.focus) == Ordering::Greater {
            (range.focus, range.anchor)
        } else {
            (range.anchor, range.focus)
        }
    }

    pub fn is_backward(&self, range: &Range) -> bool {
        self.compare(&range.anchor, &range.focus) == Ordering::Greater
    }

    /// Whether `pos` names an existing leaf at an in-bounds offset.
    pub fn is_valid_position(&self, pos: &Position) -> bool {
        match self.get(pos.key) {
            Some(node) if node.is_text() => {
                pos.offset <= node.text().map_or(0, |t| t.len_chars())
            }
            Some(node) => node.is_void() && pos.offset == 0,
            None => false,
        }
    }

    /// Caret-addressable leaves under `key`, including `key` itself.
    fn leaves_in(&self, key: NodeKey) -> Vec<NodeKey> {
        let mut out = vec![key];
        out.extend(self.descendants(key));
        out.retain(|k| self.get(*k).is_some_and(|n| n.is_text() || n.is_void()));
        out
    }

    /// First caret position inside `key`.
    pub fn start_of(&self, key: NodeKey) -> Option<Position> {
        self.leaves_in(key)
            .first()
            .map(|k| Position::new(*k, 0))
    }

    /// Last caret position inside `key`.
    pub fn end_of(&self, key: NodeKey) -> Option<Position> {
        let last = *self.leaves_in(key).last()?;
        let len = self.text(last).map_or(0, |t| t.len_chars());
        Some(Position::new(last, len))
    }

    /// The leaf block holding a position (the void itself for void targets).
    pub fn block_of(&self, pos: &Position) -> Option<NodeKey> {
        self.closest_block(pos.key)
    }

    /// Offset of `pos` counted from the start of its block's text.
    pub fn block_offset(&self, pos: &Position) -> usize {
        let Some(block) = self.block_of(pos) else {
            return 0;
        };
        let mut offset = 0;
        for text in self.texts_in(block) {
            if text == pos.key {
                return offset + pos.offset;
            }
            offset += self.text(text).map_or(0, |t| t.len_chars());
        }
        0
    }

    /// Map a block-relative offset back to a position. Offsets on a boundary
    /// between two texts resolve to the end of the earlier one; offsets past
    /// the end clamp to the block's end.
    pub fn position_at_block_offset(&self, block: NodeKey, offset: usize) -> Option<Position> {
        let texts = self.texts_in(block);
        if texts.is_empty() {
            return self.is_void(block).then(|| Position::new(block, 0));
        }
        let mut start = 0;
        for text in &texts {
            let len = self.text(*text).map_or(0, |t| t.len_chars());
            if offset <= start + len {
                return Some(Position::new(*text, offset - start));
            }
            start += len;
        }
        self.end_of(block)
    }

    /// Leaf blocks touched by a range, in document order.
    pub fn blocks_in_range(&self, range: &Range) -> Vec<NodeKey> {
        let (start, end) = self.ordered(range);
        let (Some(first), Some(last)) = (self.block_of(&start), self.block_of(&end)) else {
            return Vec::new();
        };
        let blocks = self.leaf_blocks();
        let from = blocks.iter().position(|b| *b == first);
        let to = blocks.iter().position(|b| *b == last);
        match (from, to) {
            (Some(from), Some(to)) if from <= to => blocks[from..=to].to_vec(),
            _ => vec![first],
        }
    }

    /// Text leaves touched by a range, in document order.
    pub fn texts_in_range(&self, range: &Range) -> Vec<NodeKey> {
        let (start, end) = self.ordered(range);
        let leaves = self.leaves();
        let from = leaves.iter().position(|k| *k == start.key);
        let to = leaves.iter().position(|k| *k == end.key);
        match (from, to) {
            (Some(from), Some(to)) if from <= to => leaves[from..=to]
                .iter()
                .copied()
                .filter(|k| self.get(*k).is_some_and(Node::is_text))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Inlines of `ty` enclosing any text touched by a range.
    pub fn inlines_in_range(&self, range: &Range, ty: InlineType) -> Vec<NodeKey> {
        let mut out = Vec::new();
        for text in self.texts_in_range(range) {
            if let Some(inline) = self.closest(text, |n| n.inline_type() == Some(ty)) {
                if !out.contains(&inline) {
                    out.push(inline);
                }
            }
        }
        out
    }

    /// Marks carried by every char the range covers. A collapsed range reports
    /// what the caret would type with.
    pub fn marks_in_range(&self, range: &Range) -> MarkSet {
        let (start, end) = self.ordered(range);
        if start == end {
            return self
                .text(start.key)
                .map(|t| t.marks_before(start.offset))
                .unwrap_or_default();
        }
        let mut shared: Option<MarkSet> = None;
        for key in self.texts_in_range(range) {
            let Some(text) = self.text(key) else {
                continue;
            };
            let from = if key == start.key { start.offset } else { 0 };
            let to = if key == end.key {
                end.offset
            } else {
                text.len_chars()
            };
            if from >= to {
                continue;
            }
            let marks = text.marks_over(from..to);
            shared = Some(match shared {
                Some(acc) => acc.intersection(&marks).copied().collect(),
                None => marks,
            });
        }
        shared.unwrap_or_else(|| {
            self.text(start.key)
                .map(|t| t.marks_before(start.offset))
                .unwrap_or_default()
        })
    }

    pub fn previous_leaf_block(&self, block: NodeKey) -> Option<NodeKey> {
        let blocks = self.leaf_blocks();
        let idx = blocks.iter().position(|b| *b == block)?;
        idx.checked_sub(1).map(|i| blocks[i])
    }

    pub fn next_leaf_block(&self, block: NodeKey) -> Option<NodeKey> {
        let blocks = self.leaf_blocks();
        let idx = blocks.iter().position(|b| *b == block)?;
        blocks.get(idx + 1).copied()
    }
}

pub(crate) fn compare_with(order: &HashMap<NodeKey, usize>, a: &Position, b: &Position) -> Ordering {
    let ia = order.get(&a.key).copied().unwrap_or(usize::MAX);
    let ib = order.get(&b.key).copied().unwrap_or(usize::MAX);
    ia.cmp(&ib).then(a.offset.cmp(&b.offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::NodeSpec;
    use crate::types::{BlockType, MarkType};

    fn doc() -> Document {
        Document::from_specs([
            NodeSpec::block(
                BlockType::Paragraph,
                vec![
                    NodeSpec::text("Hello "),
                    NodeSpec::marked("World", &[MarkType::Bold]),
                ],
            ),
            NodeSpec::image("https://example.com/a.png"),
            NodeSpec::paragraph("tail"),
        ])
    }

    #[test]
    fn compare_follows_document_order() {
        let doc = doc();
        let texts = doc.texts();
        let a = Position::new(texts[0], 5);
        let b = Position::new(texts[1], 0);
        let c = Position::new(texts[2], 0);
        assert_eq!(doc.compare(&a, &b), Ordering::Less);
        assert_eq!(doc.compare(&c, &b), Ordering::Greater);
        assert!(doc.is_backward(&Range::new(c, a)));
        assert_eq!(doc.ordered(&Range::new(c, a)), (a, c));
    }

    #[test]
    fn block_offsets_span_text_leaves() {
        let doc = doc();
        let texts = doc.texts();
        let block = doc.parent(texts[1]).unwrap();
        assert_eq!(doc.block_offset(&Position::new(texts[1], 2)), 8);
        assert_eq!(
            doc.position_at_block_offset(block, 8),
            Some(Position::new(texts[1], 2))
        );
        assert_eq!(
            doc.position_at_block_offset(block, 6),
            Some(Position::new(texts[0], 6))
        );
        assert_eq!(
            doc.position_at_block_offset(block, 40),
            Some(Position::new(texts[1], 5))
        );
    }

    #[test]
    fn range_queries() {
        let doc = doc();
        let texts = doc.texts();
        let range = Range::new(Position::new(texts[0], 2), Position::new(texts[2], 1));
        assert_eq!(doc.blocks_in_range(&range).len(), 3);
        assert_eq!(doc.texts_in_range(&range), texts);

        let bold_only = Range::new(Position::new(texts[1], 0), Position::new(texts[1], 5));
        assert!(doc.marks_in_range(&bold_only).contains(&MarkType::Bold));
        let mixed = Range::new(Position::new(texts[0], 0), Position::new(texts[1], 5));
        assert!(doc.marks_in_range(&mixed).is_empty());
    }

    #[test]
    fn void_blocks_are_caret_targets() {
        let doc = doc();
        let image = doc.children(doc.root())[1];
        assert_eq!(doc.start_of(image), Some(Position::new(image, 0)));
        assert!(doc.is_valid_position(&Position::new(image, 0)));
        assert!(!doc.is_valid_position(&Position::new(image, 1)));
    }

    #[test]
    fn repair_falls_back_to_document_start() {
        let doc = doc();
        let first = doc.texts()[0];
        let mut selection = Selection::collapsed(Position::new(NodeKey(404), 3));
        selection.marks = Some(MarkSet::new());
        selection.repair(&doc);
        assert_eq!(selection.range, Range::collapsed(Position::new(first, 0)));
        assert_eq!(selection.marks, None);

        let mut clamped = Selection::collapsed(Position::new(first, 99));
        clamped.repair(&doc);
        assert_eq!(clamped.focus().offset, 6);
    }
}
