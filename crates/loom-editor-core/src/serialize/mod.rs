//! Conversion between the document model and its serialized forms.
//!
//! - [`html`]: the markup form, both directions.
//! - [`markdown`]: one-directional export and the filtered renderer the
//!   commit pipeline runs the markup through.
//! - [`lexer`]: the tolerant tag lexer both of them share.

pub mod html;
pub mod lexer;
pub mod markdown;

use crate::document::{Document, NodeKind};
use crate::types::{MarkSet, NodeKey};

/// A child run of a node, with adjacent sibling texts merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Run {
    /// Text with a uniform mark set. A split text serializes the same as an
    /// unsplit one.
    Text { text: String, marks: MarkSet },
    /// An inline or block child.
    Node(NodeKey),
}

pub(crate) fn child_runs(doc: &Document, children: &[NodeKey]) -> Vec<Run> {
    let mut out: Vec<Run> = Vec::new();
    for key in children {
        let Some(node) = doc.get(*key) else {
            continue;
        };
        let NodeKind::Text(text) = &node.kind else {
            out.push(Run::Node(*key));
            continue;
        };
        for segment in text.segments() {
            let marks: MarkSet = segment
                .marks
                .iter()
                .copied()
                .filter(|m| !m.is_decoration())
                .collect();
            match out.last_mut() {
                Some(Run::Text { text, marks: prev }) if *prev == marks => {
                    text.push_str(segment.text);
                }
                _ => out.push(Run::Text {
                    text: segment.text.to_string(),
                    marks,
                }),
            }
        }
    }
    out
}
