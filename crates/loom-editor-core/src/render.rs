//! The render boundary.
//!
//! The core never paints. A host supplies a [`RenderTable`]: chains of
//! callbacks per block, inline and mark type, each returning `Some(view)` to
//! claim a node or `None` to pass it down the chain, plus a default for
//! anything no callback claims. [`render_document`] walks a snapshot
//! bottom-up through the table.
//!
//! [`html_surface`] is a ready-made table producing markup strings.

use std::collections::HashMap;

use pulldown_cmark_escape::{escape_href, escape_html, escape_html_body_text};

use crate::decorate::{Decoration, decoration_slices};
use crate::document::{Document, NodeKind};
use crate::execute::EditorState;
use crate::selection::Range;
use crate::text::Mark;
use crate::types::{BlockType, InlineType, MarkType, NodeData, NodeKey};

/// What kind of element a [`NodeProps`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Block(BlockType),
    Inline(InlineType),
}

/// Input to a node renderer.
#[derive(Debug)]
pub struct NodeProps<'a, V> {
    pub key: NodeKey,
    pub kind: ElementKind,
    pub data: &'a NodeData,
    /// Already-rendered children, joined.
    pub children: V,
    /// Whether the selection touches this node.
    pub is_selected: bool,
}

/// Input to a mark renderer.
#[derive(Debug)]
pub struct MarkProps<'a, V> {
    pub mark: MarkType,
    /// The segment rendered so far, inner marks applied.
    pub children: V,
    pub text: &'a str,
}

pub type NodeRenderFn<V> = Box<dyn Fn(&NodeProps<'_, V>) -> Option<V>>;
pub type MarkRenderFn<V> = Box<dyn Fn(&MarkProps<'_, V>) -> Option<V>>;

pub struct RenderTable<V> {
    blocks: HashMap<BlockType, Vec<NodeRenderFn<V>>>,
    inlines: HashMap<InlineType, Vec<NodeRenderFn<V>>>,
    marks: HashMap<MarkType, Vec<MarkRenderFn<V>>>,
    default_node: Box<dyn Fn(&NodeProps<'_, V>) -> V>,
    default_mark: Box<dyn Fn(&MarkProps<'_, V>) -> V>,
    text: Box<dyn Fn(&str) -> V>,
    join: Box<dyn Fn(Vec<V>) -> V>,
}

impl<V> std::fmt::Debug for RenderTable<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTable")
            .field("blocks", &self.blocks.keys().collect::<Vec<_>>())
            .field("inlines", &self.inlines.keys().collect::<Vec<_>>())
            .field("marks", &self.marks.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl<V> RenderTable<V> {
    /// A table with only defaults: `text` builds a leaf view, `join`
    /// combines siblings, `default_node` and `default_mark` handle whatever
    /// no registered callback claims.
    pub fn new(
        text: impl Fn(&str) -> V + 'static,
        join: impl Fn(Vec<V>) -> V + 'static,
        default_node: impl Fn(&NodeProps<'_, V>) -> V + 'static,
        default_mark: impl Fn(&MarkProps<'_, V>) -> V + 'static,
    ) -> Self {
        Self {
            blocks: HashMap::new(),
            inlines: HashMap::new(),
            marks: HashMap::new(),
            default_node: Box::new(default_node),
            default_mark: Box::new(default_mark),
            text: Box::new(text),
            join: Box::new(join),
        }
    }

    /// Append a callback to a block type's chain.
    pub fn on_block(
        &mut self,
        ty: BlockType,
        f: impl Fn(&NodeProps<'_, V>) -> Option<V> + 'static,
    ) -> &mut Self {
        self.blocks.entry(ty).or_default().push(Box::new(f));
        self
    }

    pub fn on_inline(
        &mut self,
        ty: InlineType,
        f: impl Fn(&NodeProps<'_, V>) -> Option<V> + 'static,
    ) -> &mut Self {
        self.inlines.entry(ty).or_default().push(Box::new(f));
        self
    }

    pub fn on_mark(
        &mut self,
        ty: MarkType,
        f: impl Fn(&MarkProps<'_, V>) -> Option<V> + 'static,
    ) -> &mut Self {
        self.marks.entry(ty).or_default().push(Box::new(f));
        self
    }

    pub fn render_node(&self, props: &NodeProps<'_, V>) -> V {
        let chain = match props.kind {
            ElementKind::Block(ty) => self.blocks.get(&ty),
            ElementKind::Inline(ty) => self.inlines.get(&ty),
        };
        chain
            .into_iter()
            .flatten()
            .find_map(|f| f(props))
            .unwrap_or_else(|| (self.default_node)(props))
    }

    pub fn render_mark(&self, props: &MarkProps<'_, V>) -> V {
        self.marks
            .get(&props.mark)
            .into_iter()
            .flatten()
            .find_map(|f| f(props))
            .unwrap_or_else(|| (self.default_mark)(props))
    }

    pub fn render_text(&self, text: &str) -> V {
        (self.text)(text)
    }

    pub fn join(&self, views: Vec<V>) -> V {
        (self.join)(views)
    }
}

/// Render a snapshot with decorations layered over its text marks.
pub fn render_document<V>(
    state: &EditorState,
    decorations: &[Decoration],
    table: &RenderTable<V>,
) -> V {
    let doc = &state.document;
    let walk = Walk {
        doc,
        slices: decoration_slices(doc, decorations),
        selected: selected_nodes(doc, &state.selection.range),
        table,
    };
    let children = doc
        .children(doc.root())
        .iter()
        .map(|key| walk.node(*key))
        .collect();
    table.join(children)
}

/// Blocks and inlines the selection touches, plus the voids it sits on.
fn selected_nodes(doc: &Document, range: &Range) -> Vec<NodeKey> {
    let mut out = doc.blocks_in_range(range);
    out.extend(doc.inlines_in_range(range, InlineType::Link));
    for pos in [range.anchor, range.focus] {
        if doc.is_void(pos.key) && !out.contains(&pos.key) {
            out.push(pos.key);
        }
    }
    out
}

struct Walk<'a, V> {
    doc: &'a Document,
    slices: HashMap<NodeKey, Vec<Mark>>,
    selected: Vec<NodeKey>,
    table: &'a RenderTable<V>,
}

impl<V> Walk<'_, V> {
    fn node(&self, key: NodeKey) -> V {
        let Some(node) = self.doc.get(key) else {
            return self.table.join(Vec::new());
        };
        let (kind, data) = match &node.kind {
            NodeKind::Text(_) => return self.text(key),
            NodeKind::Document => return self.table.join(Vec::new()),
            NodeKind::Block { block_type, data } => (ElementKind::Block(*block_type), data),
            NodeKind::Inline { inline_type, data } => (ElementKind::Inline(*inline_type), data),
        };
        let children = node.children.iter().map(|child| self.node(*child)).collect();
        let props = NodeProps {
            key,
            kind,
            data,
            children: self.table.join(children),
            is_selected: self.selected.contains(&key),
        };
        self.table.render_node(&props)
    }

    fn text(&self, key: NodeKey) -> V {
        let Some(text) = self.doc.text(key) else {
            return self.table.join(Vec::new());
        };
        let extra = self.slices.get(&key).map_or(&[][..], Vec::as_slice);
        let segments = text.segments_with(extra);
        if segments.is_empty() {
            return self.table.render_text("");
        }
        let views = segments
            .into_iter()
            .map(|segment| {
                let mut view = self.table.render_text(segment.text);
                // Mark sets iterate outermost first.
                for mark in segment.marks.iter().rev() {
                    view = self.table.render_mark(&MarkProps {
                        mark: *mark,
                        children: view,
                        text: segment.text,
                    });
                }
                view
            })
            .collect();
        self.table.join(views)
    }
}

fn escaped(s: &str) -> String {
    let mut out = String::new();
    let _ = escape_html_body_text(&mut out, s);
    out
}

fn wrap(tag: &str, children: &str) -> String {
    format!("<{tag}>{children}</{tag}>")
}

/// A markup surface matching the editor's stock look: headings, lists,
/// quotes and links as their tags, `<div>` for everything else, images
/// flagged with `data-selected`, decoration marks as classed spans.
pub fn html_surface() -> RenderTable<String> {
    let mut table = RenderTable::new(
        escaped,
        |views: Vec<String>| views.concat(),
        |props: &NodeProps<'_, String>| wrap("div", &props.children),
        |props: &MarkProps<'_, String>| {
            format!("<span class=\"{}\">{}</span>", props.mark, props.children)
        },
    );

    for (ty, tag) in [
        (BlockType::BlockQuote, "blockquote"),
        (BlockType::Quote, "blockquote"),
        (BlockType::BulletedList, "ul"),
        (BlockType::NumberedList, "ol"),
        (BlockType::ListItem, "li"),
        (BlockType::HeadingOne, "h1"),
        (BlockType::HeadingTwo, "h2"),
        (BlockType::HeadingThree, "h3"),
        (BlockType::HeadingFour, "h4"),
        (BlockType::HeadingFive, "h5"),
        (BlockType::HeadingSix, "h6"),
    ] {
        table.on_block(ty, move |props| Some(wrap(tag, &props.children)));
    }

    table.on_block(BlockType::Image, |props| {
        let mut out = String::from("<img src=\"");
        let _ = escape_href(&mut out, props.data.src().unwrap_or_default());
        out.push_str(&format!("\" data-selected=\"{}\"/>", props.is_selected));
        Some(out)
    });

    table.on_inline(InlineType::Link, |props| {
        let mut out = String::from("<a href=\"");
        let _ = escape_html(&mut out, props.data.href().unwrap_or_default());
        out.push_str("\">");
        out.push_str(&props.children);
        out.push_str("</a>");
        Some(out)
    });

    for (ty, tag) in [
        (MarkType::Bold, "strong"),
        (MarkType::Code, "code"),
        (MarkType::Italic, "em"),
        (MarkType::Underlined, "u"),
        (MarkType::Strikethrough, "strike"),
    ] {
        table.on_mark(ty, move |props| Some(wrap(tag, &props.children)));
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decorate::decorate_document;
    use crate::document::NodeSpec;
    use crate::grammar::MarkdownGrammar;
    use crate::schema::Schema;
    use crate::selection::Position;

    fn state(specs: Vec<NodeSpec>) -> EditorState {
        EditorState::new(Document::from_specs(specs), &Schema::default()).unwrap()
    }

    #[test]
    fn stock_surface_renders_marks_and_decorations() {
        let state = state(vec![
            NodeSpec::leaf(BlockType::HeadingOne, "# Hi"),
            NodeSpec::block(
                BlockType::Paragraph,
                vec![
                    NodeSpec::text("a "),
                    NodeSpec::marked("b", &[MarkType::Bold]),
                ],
            ),
        ]);
        let decorations = decorate_document(&state.document, &MarkdownGrammar::default());
        insta::assert_snapshot!(
            render_document(&state, &decorations, &html_surface()),
            @r#"<h1><span class="title"><span class="punctuation">#</span></span><span class="title"> Hi</span></h1><div>a <strong>b</strong></div>"#
        );
    }

    #[test]
    fn image_reports_selection() {
        let state = state(vec![NodeSpec::image("a.png"), NodeSpec::paragraph("")]);
        let image = state.document.children(state.document.root())[0];
        let on_image = state
            .clone()
            .with_selection(Range::collapsed(Position::new(image, 0)));
        let table = html_surface();
        assert!(render_document(&on_image, &[], &table).contains("data-selected=\"true\""));
        let text = state.document.texts()[0];
        let elsewhere = state.with_selection(Range::collapsed(Position::new(text, 0)));
        assert!(render_document(&elsewhere, &[], &table).contains("data-selected=\"false\""));
    }

    #[test]
    fn chains_fall_through_to_later_callbacks_and_default() {
        let mut table = RenderTable::new(
            |s: &str| s.len(),
            |views: Vec<usize>| views.into_iter().sum(),
            |props: &NodeProps<'_, usize>| props.children,
            |props: &MarkProps<'_, usize>| props.children,
        );
        table
            .on_block(BlockType::Paragraph, |_| None)
            .on_block(BlockType::Paragraph, |props| Some(props.children * 10));
        let state = state(vec![
            NodeSpec::leaf(BlockType::HeadingOne, "abc"),
            NodeSpec::paragraph("de"),
        ]);
        assert_eq!(render_document(&state, &[], &table), 3 + 20);
    }
}
