//! The document tree: an arena of nodes addressed by [`NodeKey`].
//!
//! Every node records its parent key, so walking up (closest block, enclosing
//! list, enclosing link) is a chain of map lookups. The tree is strict: a key
//! appears in exactly one parent's child list.
//!
//! `Document` is a plain value. Commands clone it, mutate the clone and hand
//! back a new snapshot, so a failed command never disturbs the caller's copy.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::error::CommandError;
use crate::text::Text;
use crate::types::{BlockType, InlineType, MarkType, NodeData, NodeKey};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Document,
    Block {
        block_type: BlockType,
        data: NodeData,
    },
    Inline {
        inline_type: InlineType,
        data: NodeData,
    },
    Text(Text),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub key: NodeKey,
    pub parent: Option<NodeKey>,
    pub children: Vec<NodeKey>,
    pub kind: NodeKind,
}

impl Node {
    pub fn is_block(&self) -> bool {
        matches!(self.kind, NodeKind::Block { .. })
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.kind, NodeKind::Inline { .. })
    }

    pub fn is_text(&self) -> bool {
        matches!(self.kind, NodeKind::Text(_))
    }

    pub fn block_type(&self) -> Option<BlockType> {
        match &self.kind {
            NodeKind::Block { block_type, .. } => Some(*block_type),
            _ => None,
        }
    }

    pub fn inline_type(&self) -> Option<InlineType> {
        match &self.kind {
            NodeKind::Inline { inline_type, .. } => Some(*inline_type),
            _ => None,
        }
    }

    pub fn data(&self) -> Option<&NodeData> {
        match &self.kind {
            NodeKind::Block { data, .. } | NodeKind::Inline { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&Text> {
        match &self.kind {
            NodeKind::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        self.block_type().is_some_and(|t| t.is_void())
    }
}

/// A key-free description of a subtree.
///
/// Used to build documents, to insert new nodes, and to compare documents
/// structurally (two documents are equal up to keys when their specs are).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeSpec {
    Block {
        block_type: BlockType,
        data: NodeData,
        children: Vec<NodeSpec>,
    },
    Inline {
        inline_type: InlineType,
        data: NodeData,
        children: Vec<NodeSpec>,
    },
    Text(Text),
}

impl NodeSpec {
    pub fn block(block_type: BlockType, children: Vec<NodeSpec>) -> Self {
        NodeSpec::Block {
            block_type,
            data: NodeData::new(),
            children,
        }
    }

    /// A block holding a single unmarked text. Voids get no children.
    pub fn leaf(block_type: BlockType, text: &str) -> Self {
        if block_type.is_void() {
            return Self::block(block_type, Vec::new());
        }
        Self::block(block_type, vec![Self::text(text)])
    }

    pub fn paragraph(text: &str) -> Self {
        Self::leaf(BlockType::Paragraph, text)
    }

    pub fn text(text: &str) -> Self {
        NodeSpec::Text(Text::new(text))
    }

    pub fn marked(text: &str, marks: &[MarkType]) -> Self {
        NodeSpec::Text(Text::with_marks(text, &marks.iter().copied().collect()))
    }

    pub fn link(href: &str, children: Vec<NodeSpec>) -> Self {
        NodeSpec::Inline {
            inline_type: InlineType::Link,
            data: NodeData::new().with(NodeData::HREF, href),
            children,
        }
    }

    pub fn image(src: &str) -> Self {
        NodeSpec::Block {
            block_type: BlockType::Image,
            data: NodeData::new().with(NodeData::SRC, src),
            children: Vec::new(),
        }
    }

    pub fn with_data(self, new_data: NodeData) -> Self {
        match self {
            NodeSpec::Block {
                block_type,
                children,
                ..
            } => NodeSpec::Block {
                block_type,
                data: new_data,
                children,
            },
            NodeSpec::Inline {
                inline_type,
                children,
                ..
            } => NodeSpec::Inline {
                inline_type,
                data: new_data,
                children,
            },
            text => text,
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self, NodeSpec::Block { .. })
    }

    pub fn children(&self) -> &[NodeSpec] {
        match self {
            NodeSpec::Block { children, .. } | NodeSpec::Inline { children, .. } => children,
            NodeSpec::Text(_) => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    nodes: HashMap<NodeKey, Node>,
    root: NodeKey,
    next_key: u64,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// An empty document. Normalization gives it its trailing paragraph.
    pub fn new() -> Self {
        let root = NodeKey(0);
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            Node {
                key: root,
                parent: None,
                children: Vec::new(),
                kind: NodeKind::Document,
            },
        );
        Self {
            nodes,
            root,
            next_key: 1,
        }
    }

    pub fn from_specs(specs: impl IntoIterator<Item = NodeSpec>) -> Self {
        let mut doc = Self::new();
        let root = doc.root;
        for (index, spec) in specs.into_iter().enumerate() {
            doc.attach_spec(root, index, &spec);
        }
        doc
    }

    /// The root's children as key-free specs.
    pub fn to_specs(&self) -> Vec<NodeSpec> {
        self.children(self.root)
            .iter()
            .filter_map(|k| self.spec_of(*k))
            .collect()
    }

    pub fn spec_of(&self, key: NodeKey) -> Option<NodeSpec> {
        let node = self.get(key)?;
        let children = || {
            node.children
                .iter()
                .filter_map(|k| self.spec_of(*k))
                .collect()
        };
        let spec = match &node.kind {
            NodeKind::Document => return None,
            NodeKind::Block { block_type, data } => NodeSpec::Block {
                block_type: *block_type,
                data: data.clone(),
                children: children(),
            },
            NodeKind::Inline { inline_type, data } => NodeSpec::Inline {
                inline_type: *inline_type,
                data: data.clone(),
                children: children(),
            },
            NodeKind::Text(text) => NodeSpec::Text(text.clone()),
        };
        Some(spec)
    }

    pub fn root(&self) -> NodeKey {
        self.root
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the root has no children.
    pub fn is_empty(&self) -> bool {
        self.children(self.root).is_empty()
    }

    pub fn get(&self, key: NodeKey) -> Option<&Node> {
        self.nodes.get(&key)
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.nodes.contains_key(&key)
    }

    /// Like [`get`](Self::get), but a missing key is a stale reference.
    pub fn node(&self, key: NodeKey) -> Result<&Node, CommandError> {
        self.nodes
            .get(&key)
            .ok_or(CommandError::StaleReference { key })
    }

    pub fn children(&self, key: NodeKey) -> &[NodeKey] {
        self.nodes
            .get(&key)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn parent(&self, key: NodeKey) -> Option<NodeKey> {
        self.nodes.get(&key).and_then(|n| n.parent)
    }

    pub fn index_of(&self, key: NodeKey) -> Option<usize> {
        let parent = self.parent(key)?;
        self.children(parent).iter().position(|k| *k == key)
    }

    /// Ancestors, closest first, excluding `key` itself.
    pub fn ancestors(&self, key: NodeKey) -> Vec<NodeKey> {
        let mut out = Vec::new();
        let mut cursor = self.parent(key);
        while let Some(k) = cursor {
            out.push(k);
            cursor = self.parent(k);
        }
        out
    }

    /// Whether `ancestor` is a strict ancestor of `key`.
    pub fn is_ancestor(&self, ancestor: NodeKey, key: NodeKey) -> bool {
        let mut cursor = self.parent(key);
        while let Some(k) = cursor {
            if k == ancestor {
                return true;
            }
            cursor = self.parent(k);
        }
        false
    }

    /// Closest strict ancestor matching `pred`.
    pub fn closest(&self, key: NodeKey, pred: impl Fn(&Node) -> bool) -> Option<NodeKey> {
        self.ancestors(key)
            .into_iter()
            .find(|k| self.get(*k).is_some_and(&pred))
    }

    /// `key` itself if it is a block, else its closest block ancestor.
    pub fn closest_block(&self, key: NodeKey) -> Option<NodeKey> {
        if self.get(key)?.is_block() {
            return Some(key);
        }
        self.closest(key, Node::is_block)
    }

    /// Every key in document (pre-)order, root first.
    pub fn preorder(&self) -> Vec<NodeKey> {
        let mut out = Vec::with_capacity(self.nodes.len());
        self.walk(self.root, &mut out);
        out
    }

    /// Descendants of `key` in document order, excluding `key`.
    pub fn descendants(&self, key: NodeKey) -> Vec<NodeKey> {
        let mut out = Vec::new();
        self.walk(key, &mut out);
        if !out.is_empty() {
            out.remove(0);
        }
        out
    }

    fn walk(&self, key: NodeKey, out: &mut Vec<NodeKey>) {
        if !self.contains(key) {
            return;
        }
        out.push(key);
        for child in self.children(key) {
            self.walk(*child, out);
        }
    }

    /// Text leaves in document order.
    pub fn texts(&self) -> Vec<NodeKey> {
        self.texts_in(self.root)
    }

    pub fn texts_in(&self, key: NodeKey) -> Vec<NodeKey> {
        let mut out = Vec::new();
        self.walk(key, &mut out);
        out.retain(|k| self.get(*k).is_some_and(Node::is_text));
        out
    }

    /// Caret-addressable leaves in document order: text leaves and void blocks.
    pub fn leaves(&self) -> Vec<NodeKey> {
        self.preorder()
            .into_iter()
            .filter(|k| self.get(*k).is_some_and(|n| n.is_text() || n.is_void()))
            .collect()
    }

    /// Whether `key` is a block with no block children.
    pub fn is_leaf_block(&self, key: NodeKey) -> bool {
        self.get(key).is_some_and(|n| {
            n.is_block()
                && !n
                    .children
                    .iter()
                    .any(|c| self.get(*c).is_some_and(Node::is_block))
        })
    }

    /// Blocks with no block children, in document order.
    pub fn leaf_blocks(&self) -> Vec<NodeKey> {
        self.preorder()
            .into_iter()
            .filter(|k| self.is_leaf_block(*k))
            .collect()
    }

    pub fn text(&self, key: NodeKey) -> Option<&Text> {
        self.get(key).and_then(Node::text)
    }

    pub(crate) fn text_mut(&mut self, key: NodeKey) -> Option<&mut Text> {
        match &mut self.nodes.get_mut(&key)?.kind {
            NodeKind::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn block_type(&self, key: NodeKey) -> Option<BlockType> {
        self.get(key).and_then(Node::block_type)
    }

    pub fn is_void(&self, key: NodeKey) -> bool {
        self.get(key).is_some_and(Node::is_void)
    }

    /// Concatenated text of every leaf under `key`.
    pub fn text_content(&self, key: NodeKey) -> String {
        self.texts_in(key)
            .into_iter()
            .filter_map(|k| self.text(k))
            .map(Text::as_str)
            .collect()
    }

    /// Length in chars of every leaf under `key`.
    pub fn text_len(&self, key: NodeKey) -> usize {
        self.texts_in(key)
            .into_iter()
            .filter_map(|k| self.text(k))
            .map(Text::len_chars)
            .sum()
    }

    /// The key the next inserted node will receive.
    pub fn next_key(&self) -> NodeKey {
        NodeKey(self.next_key)
    }

    /// Live nodes allocated at or after `mark`, oldest first.
    pub fn created_since(&self, mark: NodeKey) -> Vec<NodeKey> {
        (mark.0..self.next_key)
            .map(NodeKey)
            .filter(|k| self.contains(*k))
            .collect()
    }

    // === Structural mutation ===

    fn alloc(&mut self) -> NodeKey {
        let key = NodeKey(self.next_key);
        self.next_key += 1;
        key
    }

    /// Insert a subtree built from `spec` as child `index` of `parent`.
    ///
    /// The index is clamped to the child count.
    pub fn insert_node(
        &mut self,
        parent: NodeKey,
        index: usize,
        spec: &NodeSpec,
    ) -> Result<NodeKey, CommandError> {
        let parent_node = self.node(parent)?;
        if parent_node.is_text() {
            return Err(CommandError::InvalidTarget {
                key: parent,
                expected: "a document, block or inline",
            });
        }
        Ok(self.attach_spec(parent, index, spec))
    }

    fn attach_spec(&mut self, parent: NodeKey, index: usize, spec: &NodeSpec) -> NodeKey {
        let key = self.alloc();
        let kind = match spec {
            NodeSpec::Block {
                block_type, data, ..
            } => NodeKind::Block {
                block_type: *block_type,
                data: data.clone(),
            },
            NodeSpec::Inline {
                inline_type, data, ..
            } => NodeKind::Inline {
                inline_type: *inline_type,
                data: data.clone(),
            },
            NodeSpec::Text(text) => NodeKind::Text(text.clone()),
        };
        self.nodes.insert(
            key,
            Node {
                key,
                parent: Some(parent),
                children: Vec::new(),
                kind,
            },
        );
        if let Some(p) = self.nodes.get_mut(&parent) {
            let index = index.min(p.children.len());
            p.children.insert(index, key);
        }
        for (i, child) in spec.children().iter().enumerate() {
            self.attach_spec(key, i, child);
        }
        key
    }

    /// Remove `key` and its whole subtree.
    pub fn remove_node(&mut self, key: NodeKey) -> Result<(), CommandError> {
        if key == self.root {
            return Err(CommandError::InvalidTarget {
                key,
                expected: "a non-root node",
            });
        }
        self.node(key)?;
        self.detach(key);
        let mut doomed = Vec::new();
        self.walk(key, &mut doomed);
        for k in doomed {
            self.nodes.remove(&k);
        }
        Ok(())
    }

    fn detach(&mut self, key: NodeKey) {
        let parent = self.parent(key);
        if let Some(p) = parent.and_then(|parent| self.nodes.get_mut(&parent)) {
            p.children.retain(|k| *k != key);
        }
    }

    /// Move `key` under `new_parent` at `index`.
    ///
    /// The index is interpreted after `key` has been detached from its old
    /// parent, and is clamped to the child count.
    pub fn move_node(
        &mut self,
        key: NodeKey,
        new_parent: NodeKey,
        index: usize,
    ) -> Result<(), CommandError> {
        self.node(key)?;
        self.node(new_parent)?;
        if key == new_parent || self.is_ancestor(key, new_parent) {
            return Err(CommandError::InvalidTarget {
                key: new_parent,
                expected: "a node outside the moved subtree",
            });
        }
        self.detach(key);
        if let Some(p) = self.nodes.get_mut(&new_parent) {
            let index = index.min(p.children.len());
            p.children.insert(index, key);
        }
        if let Some(n) = self.nodes.get_mut(&key) {
            n.parent = Some(new_parent);
        }
        Ok(())
    }

    pub fn set_block_type(&mut self, key: NodeKey, ty: BlockType) -> Result<(), CommandError> {
        match self.nodes.get_mut(&key).map(|n| &mut n.kind) {
            Some(NodeKind::Block { block_type, .. }) => {
                *block_type = ty;
                Ok(())
            }
            Some(_) => Err(CommandError::InvalidTarget {
                key,
                expected: "a block",
            }),
            None => Err(CommandError::StaleReference { key }),
        }
    }

    pub fn set_data(&mut self, key: NodeKey, new_data: NodeData) -> Result<(), CommandError> {
        match self.nodes.get_mut(&key).map(|n| &mut n.kind) {
            Some(NodeKind::Block { data, .. } | NodeKind::Inline { data, .. }) => {
                *data = new_data;
                Ok(())
            }
            Some(_) => Err(CommandError::InvalidTarget {
                key,
                expected: "a block or inline",
            }),
            None => Err(CommandError::StaleReference { key }),
        }
    }

    /// Split a text leaf at `offset`. The tail becomes a new sibling placed
    /// right after it; its key is returned.
    pub fn split_text(&mut self, key: NodeKey, offset: usize) -> Result<NodeKey, CommandError> {
        let tail = match self.text_mut(key) {
            Some(text) => text.split_off(offset),
            None => {
                self.node(key)?;
                return Err(CommandError::InvalidTarget {
                    key,
                    expected: "a text leaf",
                });
            }
        };
        let parent = self.parent(key).ok_or(CommandError::InvalidTarget {
            key,
            expected: "an attached text leaf",
        })?;
        let index = self.index_of(key).map_or(0, |i| i + 1);
        Ok(self.attach_spec(parent, index, &NodeSpec::Text(tail)))
    }

    /// Create an empty copy of a block or inline (same type and data) right
    /// after it in its parent.
    pub(crate) fn insert_shell_after(&mut self, key: NodeKey) -> Result<NodeKey, CommandError> {
        let node = self.node(key)?;
        let spec = match &node.kind {
            NodeKind::Block { block_type, data } => NodeSpec::Block {
                block_type: *block_type,
                data: data.clone(),
                children: Vec::new(),
            },
            NodeKind::Inline { inline_type, data } => NodeSpec::Inline {
                inline_type: *inline_type,
                data: data.clone(),
                children: Vec::new(),
            },
            _ => {
                return Err(CommandError::InvalidTarget {
                    key,
                    expected: "a block or inline",
                });
            }
        };
        let parent = node.parent.ok_or(CommandError::InvalidTarget {
            key,
            expected: "a non-root node",
        })?;
        let index = self.index_of(key).map_or(0, |i| i + 1);
        Ok(self.attach_spec(parent, index, &spec))
    }

    /// Indented one-node-per-line rendering of the tree, for logs and tests.
    pub fn outline(&self) -> String {
        let mut out = String::new();
        for child in self.children(self.root) {
            self.outline_node(*child, 0, &mut out);
        }
        out
    }

    fn outline_node(&self, key: NodeKey, depth: usize, out: &mut String) {
        let Some(node) = self.get(key) else {
            return;
        };
        let indent = "  ".repeat(depth);
        match &node.kind {
            NodeKind::Document => {}
            NodeKind::Block { block_type, data } => {
                let _ = write!(out, "{indent}{block_type}");
                write_data(out, data);
                out.push('\n');
            }
            NodeKind::Inline { inline_type, data } => {
                let _ = write!(out, "{indent}{inline_type}");
                write_data(out, data);
                out.push('\n');
            }
            NodeKind::Text(text) => {
                let _ = write!(out, "{indent}{:?}", text.as_str());
                for mark in text.marks() {
                    let _ = write!(out, " {}[{}..{}]", mark.kind, mark.start, mark.end);
                }
                out.push('\n');
            }
        }
        for child in &node.children {
            self.outline_node(*child, depth + 1, out);
        }
    }
}

fn write_data(out: &mut String, data: &NodeData) {
    for (k, v) in data.iter() {
        let _ = write!(out, " {k}={v:?}");
    }
}
