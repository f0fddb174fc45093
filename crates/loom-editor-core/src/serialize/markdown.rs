//! Markdown export.
//!
//! Two one-way paths:
//! - [`to_markdown`] writes a document as Markdown source using only the
//!   default [`Whitelist`]; everything else flattens to plain text.
//! - [`render_filtered`] renders Markdown source to HTML with a whitelist.
//!   Constructs outside it are not interpreted: their source is emitted as
//!   literal text, wrapped in a paragraph when block-level. Raw HTML passes
//!   through. The commit pipeline feeds the markup form through this.

use std::collections::BTreeSet;

use pulldown_cmark::{Event, Options, Parser, Tag};
use pulldown_cmark_escape::{escape_href, escape_html_body_text};

use super::lexer::{self, Piece};
use super::{Run, child_runs};
use crate::document::{Document, NodeKind};
use crate::types::{BlockType, MarkSet, MarkType, NodeKey};

/// Markdown constructs a whitelist can admit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Construct {
    Paragraph,
    /// Plain text. Emitted either way; listed for completeness.
    Text,
    LineBreak,
    Emphasis,
    Strong,
    List,
    ListItem,
    Heading,
    BlockQuote,
    CodeBlock,
    CodeSpan,
    /// Block-level raw HTML. Inline HTML always passes through.
    Html,
    Rule,
    Link,
    Image,
    Strikethrough,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Whitelist(BTreeSet<Construct>);

impl Default for Whitelist {
    /// Paragraphs, text, line breaks, emphasis, strong and lists.
    fn default() -> Self {
        Self::of(&[
            Construct::Paragraph,
            Construct::Text,
            Construct::LineBreak,
            Construct::Emphasis,
            Construct::Strong,
            Construct::List,
            Construct::ListItem,
        ])
    }
}

impl Whitelist {
    pub fn of(constructs: &[Construct]) -> Self {
        Self(constructs.iter().copied().collect())
    }

    pub fn with(mut self, construct: Construct) -> Self {
        self.0.insert(construct);
        self
    }

    pub fn allows(&self, construct: Construct) -> bool {
        self.0.contains(&construct)
    }
}

// === Filtered rendering ===

/// Render with the default whitelist. With `unwrap`, a single paragraph
/// wrapping the whole output is removed.
pub fn render_filtered(source: &str, unwrap: bool) -> String {
    render_with(source, &Whitelist::default(), unwrap)
}

pub fn render_with(source: &str, whitelist: &Whitelist, unwrap: bool) -> String {
    let mut out = String::new();
    Renderer {
        source,
        whitelist,
        inline: false,
    }
    .run(&mut out);
    if unwrap {
        unwrap_paragraph(&out).to_string()
    } else {
        out
    }
}

struct Renderer<'a> {
    source: &'a str,
    whitelist: &'a Whitelist,
    /// Rendering a text fragment inside markup: no paragraph wrappers.
    inline: bool,
}

fn construct_of(tag: &Tag<'_>) -> Option<Construct> {
    Some(match tag {
        Tag::Paragraph => Construct::Paragraph,
        Tag::Heading { .. } => Construct::Heading,
        Tag::BlockQuote(_) => Construct::BlockQuote,
        Tag::CodeBlock(_) => Construct::CodeBlock,
        Tag::HtmlBlock => Construct::Html,
        Tag::List(_) => Construct::List,
        Tag::Item => Construct::ListItem,
        Tag::Emphasis => Construct::Emphasis,
        Tag::Strong => Construct::Strong,
        Tag::Strikethrough => Construct::Strikethrough,
        Tag::Link { .. } => Construct::Link,
        Tag::Image { .. } => Construct::Image,
        _ => return None,
    })
}

fn is_block_level(tag: &Tag<'_>) -> bool {
    matches!(
        tag,
        Tag::Paragraph
            | Tag::Heading { .. }
            | Tag::BlockQuote(_)
            | Tag::CodeBlock(_)
            | Tag::HtmlBlock
            | Tag::List(_)
            | Tag::Item
            | Tag::Table(_)
            | Tag::FootnoteDefinition(_)
    )
}

impl Renderer<'_> {
    fn options(&self) -> Options {
        let mut options = Options::empty();
        if self.whitelist.allows(Construct::Strikethrough) {
            options.insert(Options::ENABLE_STRIKETHROUGH);
        }
        options
    }

    fn run(&self, out: &mut String) {
        let parser = Parser::new_ext(self.source, self.options()).into_offset_iter();
        // Closing markup for each open whitelisted element.
        let mut closers: Vec<&'static str> = Vec::new();
        // Depth inside a construct being emitted literally.
        let mut skip = 0usize;

        for (event, range) in parser {
            if skip > 0 {
                match event {
                    Event::Start(_) => skip += 1,
                    Event::End(_) => skip -= 1,
                    _ => {}
                }
                continue;
            }
            let literal = &self.source[range];
            match event {
                Event::Start(tag) => {
                    let allowed = construct_of(&tag).is_some_and(|c| self.whitelist.allows(c));
                    if allowed && matches!(tag, Tag::Image { .. }) {
                        // Alt text is not rendered; the tag is self-closing.
                        self.open(&tag, out);
                        skip = 1;
                    } else if allowed {
                        closers.push(self.open(&tag, out));
                    } else {
                        self.literal(&tag, literal, out);
                        skip = 1;
                    }
                }
                Event::End(_) => {
                    if let Some(closer) = closers.pop() {
                        out.push_str(closer);
                    }
                }
                Event::Text(text) => push_text(out, &text),
                Event::Code(code) => {
                    if self.whitelist.allows(Construct::CodeSpan) {
                        out.push_str("<code>");
                        push_text(out, &code);
                        out.push_str("</code>");
                    } else {
                        push_text(out, literal);
                    }
                }
                Event::Html(html) | Event::InlineHtml(html) => out.push_str(&html),
                Event::SoftBreak => out.push('\n'),
                Event::HardBreak => {
                    if self.whitelist.allows(Construct::LineBreak) {
                        out.push_str("<br />\n");
                    } else {
                        out.push('\n');
                    }
                }
                Event::Rule => {
                    if self.whitelist.allows(Construct::Rule) {
                        out.push_str("<hr />\n");
                    } else {
                        self.block_literal(literal, out);
                    }
                }
                _ => push_text(out, literal),
            }
        }
    }

    /// Write the opening markup of a whitelisted element; returns its closer.
    fn open(&self, tag: &Tag<'_>, out: &mut String) -> &'static str {
        match tag {
            Tag::Paragraph if self.inline => "",
            Tag::Paragraph => {
                out.push_str("<p>");
                "</p>\n"
            }
            Tag::Heading { level, .. } => {
                let n = *level as usize;
                out.push_str(&format!("<h{n}>"));
                HEADING_CLOSERS.get(n.saturating_sub(1)).copied().unwrap_or("</h6>\n")
            }
            Tag::BlockQuote(_) => {
                out.push_str("<blockquote>\n");
                "</blockquote>\n"
            }
            Tag::CodeBlock(_) => {
                out.push_str("<pre><code>");
                "</code></pre>\n"
            }
            Tag::HtmlBlock => "",
            Tag::List(Some(1)) => {
                out.push_str("<ol>\n");
                "</ol>\n"
            }
            Tag::List(Some(start)) => {
                out.push_str(&format!("<ol start=\"{start}\">\n"));
                "</ol>\n"
            }
            Tag::List(None) => {
                out.push_str("<ul>\n");
                "</ul>\n"
            }
            Tag::Item => {
                out.push_str("<li>");
                "</li>\n"
            }
            Tag::Emphasis => {
                out.push_str("<em>");
                "</em>"
            }
            Tag::Strong => {
                out.push_str("<strong>");
                "</strong>"
            }
            Tag::Strikethrough => {
                out.push_str("<del>");
                "</del>"
            }
            Tag::Link { dest_url, .. } => {
                out.push_str("<a href=\"");
                let _ = escape_href(&mut *out, dest_url);
                out.push_str("\">");
                "</a>"
            }
            Tag::Image { dest_url, .. } => {
                out.push_str("<img src=\"");
                let _ = escape_href(&mut *out, dest_url);
                out.push_str("\" />");
                ""
            }
            _ => "",
        }
    }

    /// Emit the source of a construct outside the whitelist.
    fn literal(&self, tag: &Tag<'_>, literal: &str, out: &mut String) {
        let literal = literal.trim_end_matches(['\n', '\r']);
        match tag {
            Tag::HtmlBlock => {
                let inner = self.markup_with_text(literal);
                if self.inline {
                    out.push_str(&inner);
                } else {
                    out.push_str("<p>");
                    out.push_str(&inner);
                    out.push_str("</p>\n");
                }
            }
            tag if is_block_level(tag) => self.block_literal(literal, out),
            _ => push_text(out, literal),
        }
    }

    fn block_literal(&self, literal: &str, out: &mut String) {
        let literal = literal.trim_end_matches(['\n', '\r']);
        if self.inline {
            push_text(out, literal);
        } else {
            out.push_str("<p>");
            push_text(out, literal);
            out.push_str("</p>\n");
        }
    }

    /// Tags pass through untouched; the text between them is rendered as
    /// inline Markdown, keeping its surrounding whitespace.
    fn markup_with_text(&self, markup: &str) -> String {
        let mut out = String::new();
        for piece in lexer::split_tags(markup) {
            match piece {
                Piece::Tag(tag) => out.push_str(tag),
                Piece::Text(text) => {
                    let core = text.trim();
                    if core.is_empty() {
                        out.push_str(text);
                        continue;
                    }
                    let lead = &text[..text.len() - text.trim_start().len()];
                    let trail = &text[text.trim_end().len()..];
                    out.push_str(lead);
                    Renderer {
                        source: core,
                        whitelist: self.whitelist,
                        inline: true,
                    }
                    .run(&mut out);
                    out.push_str(trail);
                }
            }
        }
        out
    }
}

const HEADING_CLOSERS: [&str; 6] = [
    "</h1>\n", "</h2>\n", "</h3>\n", "</h4>\n", "</h5>\n", "</h6>\n",
];

fn push_text(out: &mut String, text: &str) {
    let _ = escape_html_body_text(&mut *out, text);
}

fn is_p_open(tag: &str) -> bool {
    tag == "<p>" || tag.starts_with("<p ")
}

fn is_p_close(tag: &str) -> bool {
    tag.starts_with("</p>") || tag.starts_with("</p ")
}

/// Strip `<p>…</p>` when one paragraph wraps the whole of `html`.
fn unwrap_paragraph(html: &str) -> &str {
    let trimmed = html.trim_end();
    if !trimmed.starts_with("<p>") {
        return html;
    }
    let mut depth = 0usize;
    let mut offset = 0usize;
    for piece in lexer::split_tags(trimmed) {
        let len = match piece {
            Piece::Tag(tag) => {
                if is_p_open(tag) {
                    depth += 1;
                } else if is_p_close(tag) {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        if offset + tag.len() == trimmed.len() {
                            return &trimmed[3..offset];
                        }
                        return html;
                    }
                }
                tag.len()
            }
            Piece::Text(text) => text.len(),
        };
        offset += len;
    }
    html
}

// === Document to Markdown ===

/// Write a document as Markdown. Headings, quotes, code, links and images
/// have no Markdown form here and flatten to their text.
pub fn to_markdown(doc: &Document) -> String {
    let blocks: Vec<String> = doc
        .children(doc.root())
        .iter()
        .map(|key| block_markdown(doc, *key))
        .filter(|s| !s.is_empty())
        .collect();
    if blocks.is_empty() {
        return String::new();
    }
    let mut out = blocks.join("\n\n");
    out.push('\n');
    out
}

fn block_markdown(doc: &Document, key: NodeKey) -> String {
    let Some(ty) = doc.block_type(key) else {
        return String::new();
    };
    let children = doc.children(key);
    let has_blocks = children
        .iter()
        .any(|child| doc.get(*child).is_some_and(|n| n.is_block()));
    match ty {
        BlockType::Image => String::new(),
        BlockType::BulletedList | BlockType::NumberedList => {
            let mut items = Vec::new();
            for (i, item) in children.iter().enumerate() {
                let marker = if ty == BlockType::NumberedList {
                    format!("{}. ", i + 1)
                } else {
                    "- ".to_string()
                };
                let body = block_markdown(doc, *item);
                items.push(indent_item(&marker, &body));
            }
            items.join("\n")
        }
        _ if has_blocks => {
            let separator = if ty == BlockType::ListItem { "\n" } else { "\n\n" };
            children
                .iter()
                .map(|child| block_markdown(doc, *child))
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(separator)
        }
        _ => inline_markdown(doc, children),
    }
}

/// Prefix the first line with the marker and indent the rest under it.
fn indent_item(marker: &str, body: &str) -> String {
    let pad = " ".repeat(marker.len());
    let mut out = String::new();
    for (i, line) in body.split('\n').enumerate() {
        if i == 0 {
            out.push_str(marker);
        } else {
            out.push('\n');
            if !line.is_empty() {
                out.push_str(&pad);
            }
        }
        out.push_str(line);
    }
    out
}

fn inline_markdown(doc: &Document, children: &[NodeKey]) -> String {
    let mut out = String::new();
    for run in child_runs(doc, children) {
        match run {
            Run::Text { text, marks } => push_marked(&mut out, &text, &marks),
            Run::Node(key) => {
                if let Some(NodeKind::Inline { .. }) = doc.get(key).map(|n| &n.kind) {
                    out.push_str(&inline_markdown(doc, doc.children(key)));
                }
            }
        }
    }
    escape_line_starts(&out)
}

fn push_marked(out: &mut String, text: &str, marks: &MarkSet) {
    let mut delims = String::new();
    if marks.contains(&MarkType::Bold) {
        delims.push_str("**");
    }
    if marks.contains(&MarkType::Italic) {
        delims.push('_');
    }
    let core = text.trim();
    if delims.is_empty() || core.is_empty() {
        escape_markdown(out, text);
        return;
    }
    let lead = &text[..text.len() - text.trim_start().len()];
    let trail = &text[text.trim_end().len()..];
    escape_markdown(out, lead);
    out.push_str(&delims);
    escape_markdown(out, core);
    out.extend(delims.chars().rev());
    escape_markdown(out, trail);
}

fn escape_markdown(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '\\' | '*' | '_' | '`' | '[' | ']' | '<' | '>' | '#' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\\n"),
            _ => out.push(c),
        }
    }
}

/// Escape what would open a list at the start of a line.
fn escape_line_starts(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for (i, line) in s.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let digits = line.chars().take_while(char::is_ascii_digit).count();
        if line.starts_with("- ") || line.starts_with("+ ") {
            out.push('\\');
            out.push_str(line);
        } else if digits > 0 && line[digits..].starts_with(". ") {
            out.push_str(&line[..digits]);
            out.push('\\');
            out.push_str(&line[digits..]);
        } else {
            out.push_str(line);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::NodeSpec;
    use crate::serialize::html;

    #[test]
    fn whitelisted_constructs_render() {
        insta::assert_snapshot!(
            render_filtered("*em* and **strong**\n\n- a\n- b\n\n1. one\n", false),
            @r"
        <p><em>em</em> and <strong>strong</strong></p>
        <ul>
        <li>a</li>
        <li>b</li>
        </ul>
        <ol>
        <li>one</li>
        </ol>
        "
        );
    }

    #[test]
    fn other_constructs_stay_literal() {
        insta::assert_snapshot!(
            render_filtered("# Title\n\n`x` and [l](u)\n", false),
            @r"
        <p># Title</p>
        <p>`x` and [l](u)</p>
        "
        );
    }

    #[test]
    fn inline_html_passes_through() {
        assert_eq!(
            render_filtered("a <span>b</span>", false),
            "<p>a <span>b</span></p>\n"
        );
    }

    #[test]
    fn unwrap_removes_single_outer_paragraph() {
        assert_eq!(render_filtered("plain", true), "plain");
        assert_eq!(unwrap_paragraph("<p>a</p><p>b</p>"), "<p>a</p><p>b</p>");
        assert_eq!(unwrap_paragraph("<ul></ul>"), "<ul></ul>");
    }

    #[test]
    fn markup_block_becomes_a_paragraph_of_inline_markdown() {
        let markup = "<p>Hello <strong>World</strong> and **more**</p>";
        assert_eq!(
            render_filtered(markup, false),
            "<p><p>Hello <strong>World</strong> and <strong>more</strong></p></p>\n"
        );
        assert_eq!(
            render_filtered(markup, true),
            "<p>Hello <strong>World</strong> and <strong>more</strong></p>"
        );
    }

    #[test]
    fn commit_pipeline_on_a_document() {
        let doc = Document::from_specs([
            NodeSpec::leaf(BlockType::HeadingOne, "Notes"),
            NodeSpec::block(
                BlockType::Paragraph,
                vec![
                    NodeSpec::text("Hello "),
                    NodeSpec::marked("World", &[MarkType::Bold]),
                ],
            ),
        ]);
        insta::assert_snapshot!(
            render_filtered(&html::serialize(&doc), true),
            @"<h1>Notes</h1><p>Hello <strong>World</strong></p>"
        );
    }

    #[test]
    fn document_to_markdown() {
        let doc = Document::from_specs([
            NodeSpec::leaf(BlockType::HeadingTwo, "Title"),
            NodeSpec::block(
                BlockType::Paragraph,
                vec![
                    NodeSpec::text("Hello "),
                    NodeSpec::marked("World ", &[MarkType::Bold]),
                    NodeSpec::link("https://x.org", vec![NodeSpec::text("link")]),
                ],
            ),
            NodeSpec::block(
                BlockType::BulletedList,
                vec![
                    NodeSpec::leaf(BlockType::ListItem, "one"),
                    NodeSpec::block(
                        BlockType::ListItem,
                        vec![NodeSpec::marked("two", &[MarkType::Italic])],
                    ),
                ],
            ),
            NodeSpec::block(
                BlockType::NumberedList,
                vec![NodeSpec::leaf(BlockType::ListItem, "a*b")],
            ),
            NodeSpec::image("cat.png"),
            NodeSpec::paragraph("- not a list"),
            NodeSpec::paragraph(""),
        ]);
        insta::assert_snapshot!(to_markdown(&doc), @r"
        Title

        Hello **World** link

        - one
        - _two_

        1. a\*b

        \- not a list
        ");
    }
}
