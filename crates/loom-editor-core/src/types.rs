//! Core document types: node keys, block/inline/mark vocabularies and node data.
//!
//! These are the tags of the document tree. Everything that looks at a node
//! decides what to do by matching on one of these enums, so the string names
//! (used by the HTML form and by hosts) live here too.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use smol_str::SmolStr;

/// Unique, stable identity of a node within a document.
///
/// Keys survive every mutation that keeps the node alive. A key that no longer
/// resolves in a snapshot is a stale reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeKey(pub u64);

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Block-level node types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BlockType {
    Paragraph,
    HeadingOne,
    HeadingTwo,
    HeadingThree,
    HeadingFour,
    HeadingFive,
    HeadingSix,
    BlockQuote,
    /// Alias produced by HTML deserialization of `<blockquote>`.
    Quote,
    BulletedList,
    NumberedList,
    ListItem,
    Center,
    Code,
    Image,
}

impl BlockType {
    pub const HEADINGS: [BlockType; 6] = [
        BlockType::HeadingOne,
        BlockType::HeadingTwo,
        BlockType::HeadingThree,
        BlockType::HeadingFour,
        BlockType::HeadingFive,
        BlockType::HeadingSix,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Paragraph => "paragraph",
            BlockType::HeadingOne => "heading-one",
            BlockType::HeadingTwo => "heading-two",
            BlockType::HeadingThree => "heading-three",
            BlockType::HeadingFour => "heading-four",
            BlockType::HeadingFive => "heading-five",
            BlockType::HeadingSix => "heading-six",
            BlockType::BlockQuote => "block-quote",
            BlockType::Quote => "quote",
            BlockType::BulletedList => "bulleted-list",
            BlockType::NumberedList => "numbered-list",
            BlockType::ListItem => "list-item",
            BlockType::Center => "center",
            BlockType::Code => "code",
            BlockType::Image => "image",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let ty = match name {
            "paragraph" => BlockType::Paragraph,
            "heading-one" => BlockType::HeadingOne,
            "heading-two" => BlockType::HeadingTwo,
            "heading-three" => BlockType::HeadingThree,
            "heading-four" => BlockType::HeadingFour,
            "heading-five" => BlockType::HeadingFive,
            "heading-six" => BlockType::HeadingSix,
            "block-quote" => BlockType::BlockQuote,
            "quote" => BlockType::Quote,
            "bulleted-list" => BlockType::BulletedList,
            "numbered-list" => BlockType::NumberedList,
            "list-item" => BlockType::ListItem,
            "center" => BlockType::Center,
            "code" => BlockType::Code,
            "image" => BlockType::Image,
            _ => return None,
        };
        Some(ty)
    }

    /// Heading type for a level in `1..=6`.
    pub fn heading(level: usize) -> Option<Self> {
        level
            .checked_sub(1)
            .and_then(|idx| Self::HEADINGS.get(idx))
            .copied()
    }

    pub fn heading_level(&self) -> Option<usize> {
        Self::HEADINGS
            .iter()
            .position(|h| h == self)
            .map(|idx| idx + 1)
    }

    pub fn is_heading(&self) -> bool {
        self.heading_level().is_some()
    }

    /// Void blocks are atomic units with no editable content.
    pub fn is_void(&self) -> bool {
        matches!(self, BlockType::Image)
    }

    pub fn is_list(&self) -> bool {
        matches!(self, BlockType::BulletedList | BlockType::NumberedList)
    }

    /// Containers only ever hold other blocks.
    pub fn is_container(&self) -> bool {
        self.is_list()
    }

    pub fn is_quote(&self) -> bool {
        matches!(self, BlockType::BlockQuote | BlockType::Quote)
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inline node types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InlineType {
    Link,
}

impl InlineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InlineType::Link => "link",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "link" => Some(InlineType::Link),
            _ => None,
        }
    }
}

impl fmt::Display for InlineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Formatting annotations over character ranges.
///
/// The first five are persisted on text leaves. The rest are decoration-only:
/// the tokenizer produces them per render and they are never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MarkType {
    Bold,
    Italic,
    Underlined,
    Strikethrough,
    Code,
    Title,
    Punctuation,
    List,
    Hr,
    Url,
}

impl MarkType {
    /// Persisted marks in the order they nest when serialized, outermost first.
    pub const PERSISTED: [MarkType; 5] = [
        MarkType::Bold,
        MarkType::Italic,
        MarkType::Underlined,
        MarkType::Strikethrough,
        MarkType::Code,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MarkType::Bold => "bold",
            MarkType::Italic => "italic",
            MarkType::Underlined => "underlined",
            MarkType::Strikethrough => "strikethrough",
            MarkType::Code => "code",
            MarkType::Title => "title",
            MarkType::Punctuation => "punctuation",
            MarkType::List => "list",
            MarkType::Hr => "hr",
            MarkType::Url => "url",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let mark = match name {
            "bold" => MarkType::Bold,
            "italic" => MarkType::Italic,
            "underlined" => MarkType::Underlined,
            "strikethrough" => MarkType::Strikethrough,
            "code" => MarkType::Code,
            "title" => MarkType::Title,
            "punctuation" => MarkType::Punctuation,
            "list" => MarkType::List,
            "hr" => MarkType::Hr,
            "url" => MarkType::Url,
            _ => return None,
        };
        Some(mark)
    }

    pub fn is_decoration(&self) -> bool {
        !Self::PERSISTED.contains(self)
    }
}

impl fmt::Display for MarkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of marks, ordered by `MarkType` so iteration follows nesting order.
pub type MarkSet = BTreeSet<MarkType>;

/// String-keyed payload attached to blocks and inlines (`src`, `href`, `className`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NodeData(BTreeMap<SmolStr, SmolStr>);

impl NodeData {
    pub const SRC: &'static str = "src";
    pub const HREF: &'static str = "href";
    pub const CLASS_NAME: &'static str = "className";

    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<SmolStr>, value: impl Into<SmolStr>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<SmolStr>, value: impl Into<SmolStr>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(SmolStr::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn src(&self) -> Option<&str> {
        self.get(Self::SRC)
    }

    pub fn href(&self) -> Option<&str> {
        self.get(Self::HREF)
    }

    pub fn class_name(&self) -> Option<&str> {
        self.get(Self::CLASS_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_names_round_trip() {
        for name in [
            "paragraph",
            "heading-three",
            "block-quote",
            "quote",
            "bulleted-list",
            "list-item",
            "image",
        ] {
            let ty = BlockType::from_name(name).unwrap();
            assert_eq!(ty.as_str(), name);
        }
        assert_eq!(BlockType::from_name("table"), None);
    }

    #[test]
    fn heading_levels() {
        assert_eq!(BlockType::heading(1), Some(BlockType::HeadingOne));
        assert_eq!(BlockType::heading(6), Some(BlockType::HeadingSix));
        assert_eq!(BlockType::heading(0), None);
        assert_eq!(BlockType::heading(7), None);
        assert_eq!(BlockType::HeadingThree.heading_level(), Some(3));
        assert_eq!(BlockType::Paragraph.heading_level(), None);
    }

    #[test]
    fn mark_sets_iterate_in_nesting_order() {
        let set: MarkSet = [MarkType::Code, MarkType::Bold, MarkType::Italic]
            .into_iter()
            .collect();
        let order: Vec<_> = set.into_iter().collect();
        assert_eq!(order, vec![MarkType::Bold, MarkType::Italic, MarkType::Code]);
    }

    #[test]
    fn decoration_marks_are_not_persisted() {
        assert!(MarkType::Title.is_decoration());
        assert!(MarkType::Url.is_decoration());
        assert!(!MarkType::Underlined.is_decoration());
    }
}
