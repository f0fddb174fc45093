//! The markup form of a document.
//!
//! Deserialization never fails: tags outside the vocabulary are dropped and
//! their children hoisted into the parent. Serialization is the structural
//! inverse over the same vocabulary, with no whitespace between tags.

use pulldown_cmark_escape::{escape_href, escape_html, escape_html_body_text};

use super::lexer::{self, HtmlNode};
use super::{Run, child_runs};
use crate::document::{Document, NodeKind, NodeSpec};
use crate::text::Text;
use crate::types::{BlockType, InlineType, MarkSet, MarkType, NodeData, NodeKey};

fn block_for_tag(tag: &str) -> Option<BlockType> {
    Some(match tag {
        "p" => BlockType::Paragraph,
        "li" => BlockType::ListItem,
        "ul" => BlockType::BulletedList,
        "ol" => BlockType::NumberedList,
        "blockquote" => BlockType::Quote,
        "pre" => BlockType::Code,
        "h1" => BlockType::HeadingOne,
        "h2" => BlockType::HeadingTwo,
        "h3" => BlockType::HeadingThree,
        "h4" => BlockType::HeadingFour,
        "h5" => BlockType::HeadingFive,
        "h6" => BlockType::HeadingSix,
        "center" => BlockType::Center,
        "img" => BlockType::Image,
        _ => return None,
    })
}

fn mark_for_tag(tag: &str) -> Option<MarkType> {
    Some(match tag {
        "strong" | "b" => MarkType::Bold,
        "em" | "i" => MarkType::Italic,
        "u" => MarkType::Underlined,
        "s" | "strike" | "del" => MarkType::Strikethrough,
        "code" => MarkType::Code,
        _ => return None,
    })
}

fn tag_for_block(ty: BlockType) -> &'static str {
    match ty {
        BlockType::Paragraph => "p",
        BlockType::HeadingOne => "h1",
        BlockType::HeadingTwo => "h2",
        BlockType::HeadingThree => "h3",
        BlockType::HeadingFour => "h4",
        BlockType::HeadingFive => "h5",
        BlockType::HeadingSix => "h6",
        BlockType::BlockQuote | BlockType::Quote => "blockquote",
        BlockType::BulletedList => "ul",
        BlockType::NumberedList => "ol",
        BlockType::ListItem => "li",
        BlockType::Center => "center",
        BlockType::Code => "pre",
        BlockType::Image => "img",
    }
}

/// Outermost first.
const MARK_ORDER: [(MarkType, &str); 5] = [
    (MarkType::Bold, "strong"),
    (MarkType::Italic, "em"),
    (MarkType::Underlined, "u"),
    (MarkType::Strikethrough, "strike"),
    (MarkType::Code, "code"),
];

// === Deserialize ===

/// Parse markup into top-level block specs.
///
/// Loose inline content at the top level, and inside any block that also
/// holds blocks, is grouped into paragraphs.
pub fn deserialize(html: &str) -> Vec<NodeSpec> {
    let nodes = lexer::parse(html);
    let mut specs = Vec::new();
    for node in &nodes {
        convert(node, &MarkSet::new(), false, &mut specs);
    }
    let blocks = group(specs, true);
    tracing::trace!(target: "loom::serialize", blocks = blocks.len(), "deserialized markup");
    blocks
}

/// Parse markup into a normalized [`Document`].
pub fn to_document(html: &str, schema: &crate::schema::Schema) -> Document {
    let mut doc = Document::from_specs(deserialize(html));
    if let Err(err) = schema.normalize(&mut doc) {
        tracing::error!(target: "loom::serialize", %err, "imported document did not normalize");
    }
    doc
}

/// `pre` is set inside code blocks, where source whitespace is content.
/// Elsewhere only `<br>` produces a line break.
fn convert(node: &HtmlNode, marks: &MarkSet, pre: bool, out: &mut Vec<NodeSpec>) {
    let (tag, children) = match node {
        HtmlNode::Text(text) if pre => {
            push_text(out, Text::with_marks(text.as_str(), marks));
            return;
        }
        HtmlNode::Text(text) => {
            push_text(out, Text::with_marks(collapse_whitespace(text), marks));
            return;
        }
        HtmlNode::Element { tag, children, .. } => (tag.as_str(), children),
    };

    if tag == "br" {
        push_text(out, Text::with_marks("\n", marks));
        return;
    }

    if tag == "a" {
        let mut inner = Vec::new();
        convert_all(children, marks, pre, &mut inner);
        let mut texts = Vec::new();
        flatten_texts(inner, &mut texts);
        let texts = merge_texts(texts);
        let href = node.attr("href").unwrap_or_default();
        out.push(NodeSpec::Inline {
            inline_type: InlineType::Link,
            data: NodeData::new().with(NodeData::HREF, href),
            children: texts,
        });
        return;
    }

    if let Some(mark) = mark_for_tag(tag) {
        let mut inner = marks.clone();
        inner.insert(mark);
        convert_all(children, &inner, pre, out);
        return;
    }

    let Some(block_type) = block_for_tag(tag) else {
        tracing::trace!(target: "loom::serialize", %tag, "unknown tag, hoisting children");
        convert_all(children, marks, pre, out);
        return;
    };

    match block_type {
        BlockType::Image => {
            let Some(src) = node.attr("src") else {
                tracing::debug!(target: "loom::serialize", "img without src dropped");
                return;
            };
            out.push(NodeSpec::image(src));
        }
        BlockType::Code => {
            // `<pre><code>…</code></pre>` takes the code element's children.
            let content = match children.as_slice() {
                [HtmlNode::Element { tag, children: inner, .. }] if tag == "code" => inner.as_slice(),
                _ => children.as_slice(),
            };
            let mut inner = Vec::new();
            convert_all(content, marks, true, &mut inner);
            push_block(out, block_type, NodeData::new(), inner);
        }
        BlockType::Paragraph => {
            let mut data = NodeData::new();
            if let Some(class) = node.attr("class").or_else(|| node.attr("classname")) {
                data.insert(NodeData::CLASS_NAME, class);
            }
            let mut inner = Vec::new();
            convert_all(children, marks, pre, &mut inner);
            push_block(out, block_type, data, inner);
        }
        _ => {
            let mut inner = Vec::new();
            convert_all(children, marks, pre, &mut inner);
            push_block(out, block_type, NodeData::new(), inner);
        }
    }
}

fn convert_all(nodes: &[HtmlNode], marks: &MarkSet, pre: bool, out: &mut Vec<NodeSpec>) {
    for node in nodes {
        convert(node, marks, pre, out);
    }
}

/// Fold each run of HTML whitespace into a single space.
fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_run = false;
    for ch in text.chars() {
        if matches!(ch, ' ' | '\t' | '\n' | '\r' | '\x0C') {
            if !in_run {
                out.push(' ');
            }
            in_run = true;
        } else {
            out.push(ch);
            in_run = false;
        }
    }
    out
}

fn push_text(out: &mut Vec<NodeSpec>, text: Text) {
    if !text.is_empty() {
        out.push(NodeSpec::Text(text));
    }
}

/// Merge adjacent texts carrying the same marks.
fn merge_texts(specs: Vec<NodeSpec>) -> Vec<NodeSpec> {
    let mut out: Vec<NodeSpec> = Vec::with_capacity(specs.len());
    for spec in specs {
        match spec {
            NodeSpec::Text(text) => match out.last_mut() {
                Some(NodeSpec::Text(prev)) if prev.marks_at(0) == text.marks_at(0) => {
                    prev.append(text);
                }
                _ => out.push(NodeSpec::Text(text)),
            },
            other => out.push(other),
        }
    }
    out
}

/// Paragraphs, headings and code that end up with block children keep
/// their inline runs as blocks of their own type and hoist the block
/// children beside them.
fn push_block(out: &mut Vec<NodeSpec>, block_type: BlockType, data: NodeData, children: Vec<NodeSpec>) {
    let holds_text = matches!(block_type, BlockType::Paragraph | BlockType::Code)
        || block_type.is_heading();
    if !holds_text {
        out.push(NodeSpec::Block {
            block_type,
            data,
            children: group(children, false),
        });
        return;
    }
    if !children.iter().any(NodeSpec::is_block) {
        out.push(NodeSpec::Block {
            block_type,
            data,
            children: merge_texts(children),
        });
        return;
    }
    let mut run = Vec::new();
    for child in children {
        if !child.is_block() {
            run.push(child);
            continue;
        }
        let inline = trim_blank_edges(std::mem::take(&mut run));
        if !inline.is_empty() {
            out.push(NodeSpec::Block {
                block_type,
                data: data.clone(),
                children: merge_texts(inline),
            });
        }
        out.push(child);
    }
    let inline = trim_blank_edges(run);
    if !inline.is_empty() {
        out.push(NodeSpec::Block {
            block_type,
            data,
            children: merge_texts(inline),
        });
    }
}

fn is_blank(spec: &NodeSpec) -> bool {
    match spec {
        NodeSpec::Text(text) => text.as_str().trim().is_empty(),
        _ => false,
    }
}

/// Drop whitespace-only texts at the edges of an inline run.
fn trim_blank_edges(mut run: Vec<NodeSpec>) -> Vec<NodeSpec> {
    while run.last().is_some_and(is_blank) {
        run.pop();
    }
    let lead = run.iter().take_while(|spec| is_blank(spec)).count();
    run.drain(..lead);
    run
}

/// If any spec is a block (or `force`), wrap each inline run in a paragraph.
/// Whitespace-only text between blocks is dropped.
fn group(specs: Vec<NodeSpec>, force: bool) -> Vec<NodeSpec> {
    if !force && !specs.iter().any(NodeSpec::is_block) {
        return merge_texts(specs);
    }
    let mut out = Vec::new();
    let mut run: Vec<NodeSpec> = Vec::new();
    for spec in specs {
        if !spec.is_block() {
            run.push(spec);
            continue;
        }
        let inline = trim_blank_edges(std::mem::take(&mut run));
        if !inline.is_empty() {
            out.push(NodeSpec::block(BlockType::Paragraph, merge_texts(inline)));
        }
        out.push(spec);
    }
    let inline = trim_blank_edges(run);
    if !inline.is_empty() {
        out.push(NodeSpec::block(BlockType::Paragraph, merge_texts(inline)));
    }
    out
}

fn flatten_texts(specs: Vec<NodeSpec>, out: &mut Vec<NodeSpec>) {
    for spec in specs {
        match spec {
            NodeSpec::Text(text) => push_text(out, text),
            NodeSpec::Block { children, .. } | NodeSpec::Inline { children, .. } => {
                flatten_texts(children, out)
            }
        }
    }
}

// === Serialize ===

/// Serialize the whole document.
pub fn serialize(doc: &Document) -> String {
    let mut out = String::new();
    for key in doc.children(doc.root()) {
        write_node(doc, *key, &mut out);
    }
    out
}

fn write_node(doc: &Document, key: NodeKey, out: &mut String) {
    let Some(node) = doc.get(key) else {
        return;
    };
    match &node.kind {
        NodeKind::Document => {}
        NodeKind::Text(text) => write_text(text.as_str(), &text.marks_at(0), out),
        NodeKind::Inline { inline_type, data } => match inline_type {
            InlineType::Link => {
                out.push_str("<a href=\"");
                let _ = escape_href(&mut *out, data.href().unwrap_or_default());
                out.push_str("\">");
                write_children(doc, &node.children, out);
                out.push_str("</a>");
            }
        },
        NodeKind::Block { block_type, data } => {
            let tag = tag_for_block(*block_type);
            match block_type {
                BlockType::Image => {
                    out.push_str("<img src=\"");
                    let _ = escape_href(&mut *out, data.src().unwrap_or_default());
                    out.push_str("\"/>");
                }
                BlockType::Code => {
                    out.push_str("<pre><code>");
                    write_children(doc, &node.children, out);
                    out.push_str("</code></pre>");
                }
                _ => {
                    out.push('<');
                    out.push_str(tag);
                    if let Some(class) = data.class_name() {
                        out.push_str(" class=\"");
                        let _ = escape_html(&mut *out, class);
                        out.push('"');
                    }
                    out.push('>');
                    write_children(doc, &node.children, out);
                    out.push_str("</");
                    out.push_str(tag);
                    out.push('>');
                }
            }
        }
    }
}

fn write_children(doc: &Document, children: &[NodeKey], out: &mut String) {
    for run in child_runs(doc, children) {
        match run {
            Run::Text { text, marks } => write_text(&text, &marks, out),
            Run::Node(key) => write_node(doc, key, out),
        }
    }
}

fn write_text(text: &str, marks: &MarkSet, out: &mut String) {
    let tags: Vec<&str> = MARK_ORDER
        .iter()
        .filter(|(mark, _)| marks.contains(mark))
        .map(|(_, tag)| *tag)
        .collect();
    for tag in &tags {
        out.push('<');
        out.push_str(tag);
        out.push('>');
    }
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push_str("<br/>");
        }
        let _ = escape_html_body_text(&mut *out, line);
    }
    for tag in tags.iter().rev() {
        out.push_str("</");
        out.push_str(tag);
        out.push('>');
    }
}
