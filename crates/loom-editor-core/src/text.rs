//! Text leaves: a string plus the marks laid over it.
//!
//! All offsets are in Unicode scalar values (chars), not bytes or UTF-16.
//! Marks of the same type are kept coalesced: their ranges never overlap and
//! never touch, so two texts with the same visible formatting compare equal.

use std::ops::Range;

use crate::types::{MarkSet, MarkType};

/// A mark applied over a char range of a text leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mark {
    pub kind: MarkType,
    pub start: usize,
    pub end: usize,
}

impl Mark {
    pub fn new(kind: MarkType, range: Range<usize>) -> Self {
        Self {
            kind,
            start: range.start,
            end: range.end,
        }
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    fn covers(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }
}

/// A run of uniform formatting inside a text leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment<'a> {
    pub range: Range<usize>,
    pub text: &'a str,
    pub marks: MarkSet,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Text {
    text: String,
    marks: Vec<Mark>,
}

impl Text {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            marks: Vec::new(),
        }
    }

    /// A text whose every char carries `marks`.
    pub fn with_marks(text: impl Into<String>, marks: &MarkSet) -> Self {
        let mut out = Self::new(text);
        let len = out.len_chars();
        for mark in marks {
            out.add_mark(*mark, 0..len);
        }
        out
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len_chars(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn marks(&self) -> &[Mark] {
        &self.marks
    }

    /// Convert char offset to byte offset, clamping past-the-end offsets.
    pub fn char_to_byte(&self, char_offset: usize) -> usize {
        char_to_byte(&self.text, char_offset)
    }

    pub fn slice_str(&self, char_range: Range<usize>) -> &str {
        let start = self.char_to_byte(char_range.start);
        let end = self.char_to_byte(char_range.end.max(char_range.start));
        &self.text[start..end]
    }

    /// Marks carried by the char at `offset`.
    pub fn marks_at(&self, offset: usize) -> MarkSet {
        self.marks
            .iter()
            .filter(|m| m.covers(offset))
            .map(|m| m.kind)
            .collect()
    }

    /// Marks a caret at `offset` would type with: those of the preceding
    /// char, or of the first char when the caret sits at the very start.
    pub fn marks_before(&self, offset: usize) -> MarkSet {
        if self.is_empty() {
            return MarkSet::new();
        }
        self.marks_at(offset.saturating_sub(1))
    }

    /// Whether every char in `range` carries `kind`.
    pub fn has_mark_over(&self, kind: MarkType, range: Range<usize>) -> bool {
        if range.is_empty() {
            return self.marks_before(range.start).contains(&kind);
        }
        self.marks
            .iter()
            .any(|m| m.kind == kind && m.start <= range.start && range.end <= m.end)
    }

    /// Marks shared by every char in `range`.
    pub fn marks_over(&self, range: Range<usize>) -> MarkSet {
        if range.is_empty() {
            return self.marks_before(range.start);
        }
        self.marks
            .iter()
            .filter(|m| m.start <= range.start && range.end <= m.end)
            .map(|m| m.kind)
            .collect()
    }

    pub fn add_mark(&mut self, kind: MarkType, range: Range<usize>) {
        let len = self.len_chars();
        let range = range.start.min(len)..range.end.min(len);
        if range.is_empty() {
            return;
        }
        self.marks.push(Mark::new(kind, range));
        self.coalesce();
    }

    pub fn remove_mark(&mut self, kind: MarkType, range: Range<usize>) {
        if range.is_empty() {
            return;
        }
        let mut kept = Vec::with_capacity(self.marks.len() + 1);
        for mark in self.marks.drain(..) {
            if mark.kind != kind || mark.end <= range.start || mark.start >= range.end {
                kept.push(mark);
                continue;
            }
            if mark.start < range.start {
                kept.push(Mark::new(kind, mark.start..range.start));
            }
            if mark.end > range.end {
                kept.push(Mark::new(kind, range.end..mark.end));
            }
        }
        self.marks = kept;
        self.coalesce();
    }

    /// Insert `s` at `offset`, formatted with exactly `marks`.
    ///
    /// Marks straddling the insertion point are split around the new chars so
    /// only the requested set covers them.
    pub fn insert(&mut self, offset: usize, s: &str, marks: &MarkSet) {
        let offset = offset.min(self.len_chars());
        let n = s.chars().count();
        if n == 0 {
            return;
        }
        let byte = self.char_to_byte(offset);
        self.text.insert_str(byte, s);

        let mut shifted = Vec::with_capacity(self.marks.len() + marks.len() + 1);
        for mark in self.marks.drain(..) {
            if mark.end <= offset {
                shifted.push(mark);
            } else if mark.start >= offset {
                shifted.push(Mark::new(mark.kind, mark.start + n..mark.end + n));
            } else {
                shifted.push(Mark::new(mark.kind, mark.start..offset));
                shifted.push(Mark::new(mark.kind, offset + n..mark.end + n));
            }
        }
        for kind in marks {
            shifted.push(Mark::new(*kind, offset..offset + n));
        }
        self.marks = shifted;
        self.coalesce();
    }

    /// Delete a char range, shrinking marks that overlap it.
    pub fn remove(&mut self, char_range: Range<usize>) {
        let len = self.len_chars();
        let (a, b) = (char_range.start.min(len), char_range.end.min(len));
        if a >= b {
            return;
        }
        let (start, end) = (self.char_to_byte(a), self.char_to_byte(b));
        self.text.replace_range(start..end, "");

        let n = b - a;
        let map = |x: usize| {
            if x <= a {
                x
            } else if x >= b {
                x - n
            } else {
                a
            }
        };
        for mark in &mut self.marks {
            mark.start = map(mark.start);
            mark.end = map(mark.end);
        }
        self.coalesce();
    }

    /// Split at `offset`, keeping the head and returning the tail.
    pub fn split_off(&mut self, offset: usize) -> Text {
        let offset = offset.min(self.len_chars());
        let byte = self.char_to_byte(offset);
        let tail_str = self.text.split_off(byte);

        let mut head = Vec::new();
        let mut tail = Vec::new();
        for mark in self.marks.drain(..) {
            if mark.start < offset {
                head.push(Mark::new(mark.kind, mark.start..mark.end.min(offset)));
            }
            if mark.end > offset {
                tail.push(Mark::new(
                    mark.kind,
                    mark.start.saturating_sub(offset)..mark.end - offset,
                ));
            }
        }
        self.marks = head;
        self.coalesce();

        let mut out = Text {
            text: tail_str,
            marks: tail,
        };
        out.coalesce();
        out
    }

    /// Append another text, keeping its marks.
    pub fn append(&mut self, other: Text) {
        let shift = self.len_chars();
        self.text.push_str(&other.text);
        self.marks.extend(
            other
                .marks
                .into_iter()
                .map(|m| Mark::new(m.kind, m.start + shift..m.end + shift)),
        );
        self.coalesce();
    }

    /// Maximal runs of uniform formatting, in order. Empty texts have none.
    pub fn segments(&self) -> Vec<Segment<'_>> {
        self.segments_with(&[])
    }

    /// Like [`segments`](Self::segments), with extra transient marks layered
    /// over the persisted ones (decorations).
    pub fn segments_with(&self, extra: &[Mark]) -> Vec<Segment<'_>> {
        let len = self.len_chars();
        if len == 0 {
            return Vec::new();
        }
        let mut bounds = vec![0, len];
        for mark in self.marks.iter().chain(extra) {
            bounds.push(mark.start.min(len));
            bounds.push(mark.end.min(len));
        }
        bounds.sort_unstable();
        bounds.dedup();

        let mut segments: Vec<Segment<'_>> = Vec::new();
        for pair in bounds.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let marks: MarkSet = self
                .marks
                .iter()
                .chain(extra)
                .filter(|m| m.covers(a))
                .map(|m| m.kind)
                .collect();
            match segments.last_mut() {
                Some(last) if last.marks == marks => {
                    last.range.end = b;
                    last.text = self.slice_str(last.range.clone());
                }
                _ => segments.push(Segment {
                    range: a..b,
                    text: self.slice_str(a..b),
                    marks,
                }),
            }
        }
        segments
    }

    fn coalesce(&mut self) {
        self.marks.retain(|m| m.start < m.end);
        self.marks.sort_by_key(|m| (m.kind, m.start));
        let mut merged: Vec<Mark> = Vec::with_capacity(self.marks.len());
        for mark in self.marks.drain(..) {
            match merged.last_mut() {
                Some(last) if last.kind == mark.kind && mark.start <= last.end => {
                    last.end = last.end.max(mark.end);
                }
                _ => merged.push(mark),
            }
        }
        merged.sort_by_key(|m| (m.start, m.end, m.kind));
        self.marks = merged;
    }
}

/// Char offset to byte offset in `s`, clamped to `s.len()`.
pub fn char_to_byte(s: &str, char_offset: usize) -> usize {
    s.char_indices()
        .nth(char_offset)
        .map(|(byte, _)| byte)
        .unwrap_or(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(marks: &[MarkType]) -> MarkSet {
        marks.iter().copied().collect()
    }

    #[test]
    fn test_basic_operations() {
        let mut text = Text::new("hello world");
        assert_eq!(text.len_chars(), 11);

        text.insert(5, " beautiful", &MarkSet::new());
        assert_eq!(text.as_str(), "hello beautiful world");

        text.remove(5..15);
        assert_eq!(text.as_str(), "hello world");
    }

    #[test]
    fn test_offset_conversion() {
        let text = Text::new("hello 🌍!");
        assert_eq!(text.len_chars(), 8);
        assert_eq!(text.char_to_byte(6), 6);
        assert_eq!(text.char_to_byte(7), 10);
        assert_eq!(text.char_to_byte(100), 11);
        assert_eq!(text.slice_str(6..7), "🌍");
    }

    #[test]
    fn adjacent_marks_coalesce() {
        let mut text = Text::new("abcdef");
        text.add_mark(MarkType::Bold, 0..2);
        text.add_mark(MarkType::Bold, 2..4);
        text.add_mark(MarkType::Bold, 3..5);
        assert_eq!(text.marks(), &[Mark::new(MarkType::Bold, 0..5)]);
    }

    #[test]
    fn remove_mark_splits_range() {
        let mut text = Text::new("abcdef");
        text.add_mark(MarkType::Italic, 0..6);
        text.remove_mark(MarkType::Italic, 2..4);
        assert_eq!(
            text.marks(),
            &[
                Mark::new(MarkType::Italic, 0..2),
                Mark::new(MarkType::Italic, 4..6)
            ]
        );
        text.add_mark(MarkType::Italic, 2..4);
        assert_eq!(text.marks(), &[Mark::new(MarkType::Italic, 0..6)]);
    }

    #[test]
    fn insert_inside_mark_with_other_formatting() {
        let mut text = Text::new("abcd");
        text.add_mark(MarkType::Bold, 0..4);
        text.insert(2, "XY", &set(&[MarkType::Italic]));
        assert_eq!(text.as_str(), "abXYcd");
        assert_eq!(text.marks_at(1), set(&[MarkType::Bold]));
        assert_eq!(text.marks_at(2), set(&[MarkType::Italic]));
        assert_eq!(text.marks_at(4), set(&[MarkType::Bold]));
    }

    #[test]
    fn insert_with_inherited_marks_extends_run() {
        let mut text = Text::new("ab");
        text.add_mark(MarkType::Bold, 0..2);
        let marks = text.marks_before(2);
        text.insert(2, "c", &marks);
        assert_eq!(text.marks(), &[Mark::new(MarkType::Bold, 0..3)]);
    }

    #[test]
    fn remove_shrinks_marks() {
        let mut text = Text::new("abcdef");
        text.add_mark(MarkType::Code, 1..5);
        text.remove(0..3);
        assert_eq!(text.as_str(), "def");
        assert_eq!(text.marks(), &[Mark::new(MarkType::Code, 0..2)]);
        text.remove(0..2);
        assert!(text.marks().is_empty());
    }

    #[test]
    fn split_off_divides_marks() {
        let mut text = Text::new("Hello World");
        text.add_mark(MarkType::Bold, 3..8);
        let tail = text.split_off(5);
        assert_eq!(text.as_str(), "Hello");
        assert_eq!(tail.as_str(), " World");
        assert_eq!(text.marks(), &[Mark::new(MarkType::Bold, 3..5)]);
        assert_eq!(tail.marks(), &[Mark::new(MarkType::Bold, 0..3)]);

        text.append(tail);
        assert_eq!(text.as_str(), "Hello World");
        assert_eq!(text.marks(), &[Mark::new(MarkType::Bold, 3..8)]);
    }

    #[test]
    fn segments_follow_mark_boundaries() {
        let mut text = Text::new("plain bold both");
        text.add_mark(MarkType::Bold, 6..15);
        text.add_mark(MarkType::Italic, 11..15);
        let segments = text.segments();
        let summary: Vec<_> = segments
            .iter()
            .map(|s| (s.text, s.marks.len()))
            .collect();
        assert_eq!(summary, vec![("plain ", 0), ("bold ", 1), ("both", 2)]);
    }

    #[test]
    fn has_mark_over_requires_full_coverage() {
        let mut text = Text::new("abcdef");
        text.add_mark(MarkType::Bold, 1..4);
        assert!(text.has_mark_over(MarkType::Bold, 1..4));
        assert!(!text.has_mark_over(MarkType::Bold, 0..4));
        assert!(text.has_mark_over(MarkType::Bold, 3..3));
    }
}
