//! Syntax decorations: tokenizer output mapped back onto text leaves.
//!
//! Each leaf block's text is concatenated and tokenized. Typed token spans,
//! nested ones included, are counted in block offsets and then re-anchored
//! on the `(text key, offset)` positions of the leaves that hold them.
//! Decorations are transient and never stored in a [`Text`](crate::text::Text).

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::document::Document;
use crate::grammar::{Token, Tokenizer};
use crate::selection::Position;
use crate::text::Mark;
use crate::types::{MarkType, NodeKey};

/// A transient mark over a range of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoration {
    pub anchor: Position,
    pub focus: Position,
    pub mark: MarkType,
}

/// A typed token span in block offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
    kind: MarkType,
}

fn flatten(tokens: &[Token], mut offset: usize, out: &mut Vec<Span>) -> usize {
    for token in tokens {
        let len = token.len();
        if let Token::Typed { kind, content } = token {
            out.push(Span {
                start: offset,
                end: offset + len,
                kind: *kind,
            });
            flatten(content, offset, out);
        }
        offset += len;
    }
    offset
}

/// Text leaves of a block with their starting block offset. Empty texts are
/// left out since no char can land in them.
fn text_starts(doc: &Document, block: NodeKey) -> (Vec<(NodeKey, usize, usize)>, usize) {
    let mut out = Vec::new();
    let mut total = 0;
    for key in doc.texts_in(block) {
        let len = doc.text(key).map_or(0, |t| t.len_chars());
        if len > 0 {
            out.push((key, total, len));
        }
        total += len;
    }
    (out, total)
}

/// Decorations for one leaf block.
pub fn decorate_block(doc: &Document, block: NodeKey, tokenizer: &dyn Tokenizer) -> Vec<Decoration> {
    let text = doc.text_content(block);
    if text.is_empty() {
        return Vec::new();
    }
    let tokens = tokenizer.tokenize(&text);
    let mut spans = Vec::new();
    flatten(&tokens, 0, &mut spans);

    let (leaves, total) = text_starts(doc, block);
    let Some(&(last_key, last_start, last_len)) = leaves.last() else {
        return Vec::new();
    };

    let mut out = Vec::with_capacity(spans.len());
    for span in spans {
        let mut end = span.end;
        if end > total {
            tracing::debug!(
                target: "loom::decorate",
                %block,
                kind = %span.kind,
                end,
                total,
                "token span past block end, clamping"
            );
            end = total;
        }
        if span.start >= end {
            continue;
        }
        let anchor = leaves
            .iter()
            .find(|(_, start, len)| *start <= span.start && span.start < start + len)
            .map(|(key, start, _)| Position::new(*key, span.start - start));
        let focus = leaves
            .iter()
            .find(|(_, start, len)| *start < end && end <= start + len)
            .map(|(key, start, _)| Position::new(*key, end - start));
        let (Some(anchor), Some(focus)) = (anchor, focus) else {
            tracing::debug!(target: "loom::decorate", %block, "unmappable token span");
            let clamped = Position::new(last_key, last_len);
            out.push(Decoration {
                anchor: Position::new(last_key, span.start.saturating_sub(last_start).min(last_len)),
                focus: clamped,
                mark: span.kind,
            });
            continue;
        };
        out.push(Decoration {
            anchor,
            focus,
            mark: span.kind,
        });
    }
    out
}

/// Decorations for every leaf block of the document, in document order.
pub fn decorate_document(doc: &Document, tokenizer: &dyn Tokenizer) -> Vec<Decoration> {
    doc.leaf_blocks()
        .into_iter()
        .filter(|block| !doc.is_void(*block))
        .flat_map(|block| decorate_block(doc, block, tokenizer))
        .collect()
}

/// Split decorations into per-text local marks, ready to layer over a text's
/// own marks with [`Text::segments_with`](crate::text::Text::segments_with).
pub fn decoration_slices(doc: &Document, decorations: &[Decoration]) -> HashMap<NodeKey, Vec<Mark>> {
    let mut out: HashMap<NodeKey, Vec<Mark>> = HashMap::new();
    for deco in decorations {
        let Some(block) = doc.block_of(&deco.anchor) else {
            continue;
        };
        let texts = doc.texts_in(block);
        let from = texts.iter().position(|k| *k == deco.anchor.key);
        let to = texts.iter().position(|k| *k == deco.focus.key);
        let (Some(from), Some(to)) = (from, to) else {
            continue;
        };
        for (i, key) in texts.iter().enumerate().take(to + 1).skip(from) {
            let len = doc.text(*key).map_or(0, |t| t.len_chars());
            let start = if i == from { deco.anchor.offset } else { 0 };
            let end = if i == to { deco.focus.offset } else { len };
            if start < end {
                out.entry(*key)
                    .or_default()
                    .push(Mark::new(deco.mark, start..end));
            }
        }
    }
    out
}

/// Fingerprint of a block's text layout: leaf keys and their strings.
pub fn hash_block(doc: &Document, block: NodeKey) -> u64 {
    let mut hasher = DefaultHasher::new();
    for key in doc.texts_in(block) {
        key.hash(&mut hasher);
        if let Some(text) = doc.text(key) {
            text.as_str().hash(&mut hasher);
        }
    }
    hasher.finish()
}

/// Per-block decoration cache.
///
/// Tokenizing is pure, so a block whose text layout hashes the same as last
/// time reuses its decorations.
#[derive(Debug, Default)]
pub struct DecorationCache {
    blocks: HashMap<NodeKey, (u64, Vec<Decoration>)>,
}

impl DecorationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decorate(&mut self, doc: &Document, tokenizer: &dyn Tokenizer) -> Vec<Decoration> {
        let blocks: Vec<NodeKey> = doc
            .leaf_blocks()
            .into_iter()
            .filter(|block| !doc.is_void(*block))
            .collect();
        self.blocks.retain(|key, _| blocks.contains(key));

        let mut out = Vec::new();
        let mut hits = 0usize;
        for block in blocks {
            let hash = hash_block(doc, block);
            match self.blocks.get(&block) {
                Some((cached, decos)) if *cached == hash => {
                    hits += 1;
                    out.extend_from_slice(decos);
                }
                _ => {
                    let decos = decorate_block(doc, block, tokenizer);
                    out.extend_from_slice(&decos);
                    self.blocks.insert(block, (hash, decos));
                }
            }
        }
        tracing::trace!(target: "loom::decorate", hits, total = self.blocks.len(), "decorated");
        out
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::NodeSpec;
    use crate::grammar::MarkdownGrammar;
    use crate::types::BlockType;

    fn first_block(doc: &Document) -> NodeKey {
        doc.leaf_blocks()[0]
    }

    #[test]
    fn heading_syntax_in_one_text() {
        let doc = Document::from_specs([NodeSpec::paragraph("## Hi")]);
        let decos = decorate_document(&doc, &MarkdownGrammar::default());
        let text = doc.texts()[0];
        assert_eq!(
            decos,
            vec![
                Decoration {
                    anchor: Position::new(text, 0),
                    focus: Position::new(text, 5),
                    mark: MarkType::Title,
                },
                Decoration {
                    anchor: Position::new(text, 0),
                    focus: Position::new(text, 2),
                    mark: MarkType::Punctuation,
                },
            ]
        );
    }

    #[test]
    fn span_crossing_texts() {
        let doc = Document::from_specs([NodeSpec::block(
            BlockType::Paragraph,
            vec![
                NodeSpec::text("a **b"),
                NodeSpec::marked("c** d", &[MarkType::Italic]),
            ],
        )]);
        let decos = decorate_block(&doc, first_block(&doc), &MarkdownGrammar::default());
        let texts = doc.texts();
        let bold = decos
            .iter()
            .find(|d| d.mark == MarkType::Bold)
            .copied()
            .unwrap();
        assert_eq!(bold.anchor, Position::new(texts[0], 2));
        assert_eq!(bold.focus, Position::new(texts[1], 3));

        let slices = decoration_slices(&doc, &decos);
        let first: Vec<_> = slices[&texts[0]]
            .iter()
            .filter(|m| m.kind == MarkType::Bold)
            .map(|m| m.range())
            .collect();
        let second: Vec<_> = slices[&texts[1]]
            .iter()
            .filter(|m| m.kind == MarkType::Bold)
            .map(|m| m.range())
            .collect();
        assert_eq!(first, vec![2..5]);
        assert_eq!(second, vec![0..3]);
    }

    #[test]
    fn span_ending_on_text_boundary_stays_in_earlier_text() {
        let doc = Document::from_specs([NodeSpec::block(
            BlockType::Paragraph,
            vec![NodeSpec::text("`x`"), NodeSpec::text(" tail")],
        )]);
        let decos = decorate_block(&doc, first_block(&doc), &MarkdownGrammar::default());
        let texts = doc.texts();
        let code = decos.iter().find(|d| d.mark == MarkType::Code).unwrap();
        assert_eq!(code.focus, Position::new(texts[0], 3));
    }

    struct Overlong;

    impl Tokenizer for Overlong {
        fn tokenize(&self, text: &str) -> Vec<Token> {
            vec![Token::Typed {
                kind: MarkType::Bold,
                content: vec![Token::Str(format!("{text}extra"))],
            }]
        }
    }

    #[test]
    fn overlong_span_clamps_to_last_text() {
        let doc = Document::from_specs([NodeSpec::paragraph("abc")]);
        let decos = decorate_document(&doc, &Overlong);
        let text = doc.texts()[0];
        assert_eq!(decos.len(), 1);
        assert_eq!(decos[0].anchor, Position::new(text, 0));
        assert_eq!(decos[0].focus, Position::new(text, 3));
    }

    #[test]
    fn containers_and_voids_are_not_decorated() {
        let doc = Document::from_specs([
            NodeSpec::block(
                BlockType::BulletedList,
                vec![NodeSpec::leaf(BlockType::ListItem, "**x**")],
            ),
            NodeSpec::image("a.png"),
            NodeSpec::paragraph(""),
        ]);
        let decos = decorate_document(&doc, &MarkdownGrammar::default());
        let item_text = doc.texts()[0];
        assert!(!decos.is_empty());
        assert!(decos.iter().all(|d| d.anchor.key == item_text));
    }

    #[test]
    fn cache_reuses_unchanged_blocks() {
        let doc = Document::from_specs([NodeSpec::paragraph("**a**"), NodeSpec::paragraph("_b_")]);
        let grammar = MarkdownGrammar::default();
        let mut cache = DecorationCache::new();
        let first = cache.decorate(&doc, &grammar);
        let second = cache.decorate(&doc, &grammar);
        assert_eq!(first, second);
        assert_eq!(first, decorate_document(&doc, &grammar));
    }
}
