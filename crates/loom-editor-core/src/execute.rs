//! Command execution against editor snapshots.
//!
//! [`execute_command`] and [`execute_batch`] are the central dispatch point
//! for every mutation. A batch runs on a private copy of the snapshot, is
//! normalized once at the end, and comes back as a new [`EditorState`] with
//! the next revision. Any error leaves the caller's snapshot untouched.

use std::cmp::Ordering;

use crate::actions::Command;
use crate::document::{Document, NodeSpec};
use crate::error::CommandError;
use crate::schema::Schema;
use crate::selection::{Position, Range, Selection};
use crate::types::{BlockType, InlineType, MarkType, NodeData, NodeKey};

/// An immutable editor snapshot: document, selection and revision number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorState {
    pub document: Document,
    pub selection: Selection,
    pub revision: u64,
}

impl EditorState {
    /// Normalize `document` and place the caret at its start.
    pub fn new(mut document: Document, schema: &Schema) -> Result<Self, CommandError> {
        schema.normalize(&mut document)?;
        let root = document.root();
        let start = document.start_of(root).ok_or(CommandError::InvalidTarget {
            key: root,
            expected: "a document with a caret position",
        })?;
        Ok(Self {
            document,
            selection: Selection::collapsed(start),
            revision: 0,
        })
    }

    pub fn with_selection(mut self, range: Range) -> Self {
        self.selection = Selection::new(range);
        self.selection.repair(&self.document);
        self
    }
}

/// Execute a single command. See [`execute_batch`].
pub fn execute_command(
    state: &EditorState,
    schema: &Schema,
    command: &Command,
) -> Result<EditorState, CommandError> {
    execute_batch(state, schema, std::slice::from_ref(command))
}

/// Execute commands in order as one unit, then normalize.
pub fn execute_batch(
    state: &EditorState,
    schema: &Schema,
    commands: &[Command],
) -> Result<EditorState, CommandError> {
    let mut tx = Tx {
        doc: state.document.clone(),
        sel: state.selection.clone(),
    };
    for pos in [tx.sel.anchor(), tx.sel.focus()] {
        tx.doc.node(pos.key)?;
    }

    for command in commands {
        tracing::trace!(target: "loom::execute", ?command, "apply");
        apply(&mut tx, command)?;
        tx.sel.repair(&tx.doc);
    }

    let repairs = schema.normalize(&mut tx.doc)?;
    tx.sel.repair(&tx.doc);
    tracing::trace!(
        target: "loom::execute",
        commands = commands.len(),
        repairs,
        revision = state.revision + 1,
        "batch applied"
    );

    Ok(EditorState {
        document: tx.doc,
        selection: tx.sel,
        revision: state.revision + 1,
    })
}

/// Working copy for a batch.
struct Tx {
    doc: Document,
    sel: Selection,
}

impl Tx {
    fn ordered(&self) -> (Position, Position) {
        self.doc.ordered(&self.sel.range)
    }

    fn collapse_to(&mut self, pos: Position) {
        self.sel = Selection::collapsed(pos);
    }
}

fn apply(tx: &mut Tx, command: &Command) -> Result<(), CommandError> {
    match command {
        Command::SetBlocks { block_type } => execute_set_blocks(tx, *block_type),
        Command::SetBlockData { data } => execute_set_block_data(tx, data),
        Command::WrapBlock { block_type } => execute_wrap_block(tx, *block_type),
        Command::UnwrapBlock { block_type } => execute_unwrap_block(tx, *block_type),
        Command::InsertBlock { block_type, data } => execute_insert_block(tx, *block_type, data),
        Command::SplitBlock => execute_split_block(tx),
        Command::ToggleMark { mark } => execute_toggle_mark(tx, *mark),
        Command::AddMark { mark } => execute_set_mark(tx, *mark, true),
        Command::RemoveMark { mark } => execute_set_mark(tx, *mark, false),
        Command::InsertText { text } => execute_insert_text(tx, text),
        Command::Delete => delete_range(tx),
        Command::DeleteBackward { count } => execute_delete_backward(tx, *count),
        Command::DeleteForward { count } => execute_delete_forward(tx, *count),
        Command::WrapInline { inline_type, data } => execute_wrap_inline(tx, *inline_type, data),
        Command::UnwrapInline { inline_type } => execute_unwrap_inline(tx, *inline_type),
        Command::Select { range } => execute_select(tx, *range),
        Command::MoveTo { position } => execute_select(tx, Range::collapsed(*position)),
        Command::MoveToEnd => {
            let (_, end) = tx.ordered();
            tx.collapse_to(end);
            Ok(())
        }
        Command::MoveToStartOfNode { key } => {
            let start = start_of_node(&tx.doc, *key)?;
            tx.collapse_to(start);
            Ok(())
        }
        Command::MoveFocusToStartOfNode { key } => {
            let start = start_of_node(&tx.doc, *key)?;
            tx.sel = Selection::new(Range::new(tx.sel.anchor(), start));
            Ok(())
        }
        Command::MoveFocusBackward { count } => execute_move_focus_backward(tx, *count),
        Command::InsertNodeByKey {
            parent,
            index,
            node,
        } => tx.doc.insert_node(*parent, *index, node).map(|_| ()),
        Command::RemoveNodeByKey { key } => tx.doc.remove_node(*key),
    }
}

// === Selection ===

fn execute_select(tx: &mut Tx, range: Range) -> Result<(), CommandError> {
    let mut clamped = [range.anchor, range.focus];
    for pos in &mut clamped {
        let node = tx.doc.node(pos.key)?;
        match node.text() {
            Some(text) => pos.offset = pos.offset.min(text.len_chars()),
            None if node.is_void() => pos.offset = 0,
            None => {
                return Err(CommandError::InvalidTarget {
                    key: pos.key,
                    expected: "a text leaf or void block",
                });
            }
        }
    }
    tx.sel = Selection::new(Range::new(clamped[0], clamped[1]));
    Ok(())
}

fn start_of_node(doc: &Document, key: NodeKey) -> Result<Position, CommandError> {
    doc.node(key)?;
    doc.start_of(key).ok_or(CommandError::InvalidTarget {
        key,
        expected: "a node containing a caret position",
    })
}

fn execute_move_focus_backward(tx: &mut Tx, count: usize) -> Result<(), CommandError> {
    let focus = tx.sel.focus();
    let Some(block) = tx.doc.block_of(&focus) else {
        return Ok(());
    };
    let offset = tx.doc.block_offset(&focus).saturating_sub(count);
    if let Some(target) = tx.doc.position_at_block_offset(block, offset) {
        tx.sel = Selection::new(Range::new(tx.sel.anchor(), target));
    }
    Ok(())
}

// === Blocks ===

fn execute_set_blocks(tx: &mut Tx, block_type: BlockType) -> Result<(), CommandError> {
    if block_type.is_void() {
        tracing::debug!(target: "loom::execute", %block_type, "set_blocks to a void type ignored");
        return Ok(());
    }
    for block in tx.doc.blocks_in_range(&tx.sel.range) {
        if !tx.doc.is_void(block) {
            tx.doc.set_block_type(block, block_type)?;
        }
    }
    Ok(())
}

fn execute_set_block_data(tx: &mut Tx, data: &NodeData) -> Result<(), CommandError> {
    for block in tx.doc.blocks_in_range(&tx.sel.range) {
        tx.doc.set_data(block, data.clone())?;
    }
    Ok(())
}

/// The closest node holding both `a` and `b`, with the two children of it on
/// the paths down to `a` and `b`.
fn common_parent(doc: &Document, a: NodeKey, b: NodeKey) -> Option<(NodeKey, NodeKey, NodeKey)> {
    if a == b {
        return doc.parent(a).map(|p| (p, a, a));
    }
    let mut child_a = a;
    for ancestor in doc.ancestors(a) {
        if doc.is_ancestor(ancestor, b) {
            let mut child_b = b;
            while doc.parent(child_b) != Some(ancestor) {
                child_b = doc.parent(child_b)?;
            }
            return Some((ancestor, child_a, child_b));
        }
        child_a = ancestor;
    }
    None
}

fn execute_wrap_block(tx: &mut Tx, block_type: BlockType) -> Result<(), CommandError> {
    let blocks = tx.doc.blocks_in_range(&tx.sel.range);
    let (Some(first), Some(last)) = (blocks.first(), blocks.last()) else {
        return Ok(());
    };
    let Some((parent, first_child, last_child)) = common_parent(&tx.doc, *first, *last) else {
        return Ok(());
    };
    let (Some(from), Some(to)) = (tx.doc.index_of(first_child), tx.doc.index_of(last_child))
    else {
        return Ok(());
    };
    let siblings = tx.doc.children(parent)[from..=to].to_vec();
    let wrapper = tx
        .doc
        .insert_node(parent, from, &NodeSpec::block(block_type, Vec::new()))?;
    for (i, sibling) in siblings.into_iter().enumerate() {
        tx.doc.move_node(sibling, wrapper, i)?;
    }
    tracing::trace!(target: "loom::execute", %block_type, %wrapper, "wrapped blocks");
    Ok(())
}

fn execute_unwrap_block(tx: &mut Tx, block_type: BlockType) -> Result<(), CommandError> {
    let blocks = tx.doc.blocks_in_range(&tx.sel.range);
    let mut wrappers: Vec<NodeKey> = Vec::new();
    for block in &blocks {
        if let Some(w) = tx
            .doc
            .closest(*block, |n| n.block_type() == Some(block_type))
        {
            if !wrappers.contains(&w) {
                wrappers.push(w);
            }
        }
    }

    for wrapper in wrappers {
        let doc = &mut tx.doc;
        if !doc.contains(wrapper) {
            continue;
        }
        let children = doc.children(wrapper).to_vec();
        let touched: Vec<usize> = children
            .iter()
            .enumerate()
            .filter(|(_, c)| blocks.iter().any(|b| b == *c || doc.is_ancestor(**c, *b)))
            .map(|(i, _)| i)
            .collect();
        let (Some(&first), Some(&last)) = (touched.first(), touched.last()) else {
            continue;
        };
        let parent = doc.parent(wrapper).ok_or(CommandError::InvalidTarget {
            key: wrapper,
            expected: "a non-root block",
        })?;
        let at = doc.index_of(wrapper).unwrap_or(0);
        let n = children.len();

        if first == 0 && last == n - 1 {
            for (i, child) in children.into_iter().enumerate() {
                doc.move_node(child, parent, at + i)?;
            }
            doc.remove_node(wrapper)?;
        } else if first == 0 {
            for (i, child) in children[..=last].iter().enumerate() {
                doc.move_node(*child, parent, at + i)?;
            }
        } else if last == n - 1 {
            for (i, child) in children[first..].iter().enumerate() {
                doc.move_node(*child, parent, at + 1 + i)?;
            }
        } else {
            let tail = doc.insert_shell_after(wrapper)?;
            for (i, child) in children[last + 1..].iter().enumerate() {
                doc.move_node(*child, tail, i)?;
            }
            for (i, child) in children[first..=last].iter().enumerate() {
                doc.move_node(*child, parent, at + 1 + i)?;
            }
        }
        tracing::trace!(target: "loom::execute", %block_type, %wrapper, "unwrapped blocks");
    }
    Ok(())
}

fn execute_split_block(tx: &mut Tx) -> Result<(), CommandError> {
    if tx.sel.is_expanded() {
        delete_range(tx)?;
    }
    let caret = tx.sel.focus();

    if tx.doc.is_void(caret.key) {
        let parent = tx.doc.parent(caret.key).unwrap_or(tx.doc.root());
        let index = tx.doc.index_of(caret.key).map_or(0, |i| i + 1);
        let para = tx
            .doc
            .insert_node(parent, index, &NodeSpec::paragraph(""))?;
        let start = start_of_node(&tx.doc, para)?;
        tx.collapse_to(start);
        return Ok(());
    }

    let block = tx.doc.block_of(&caret).ok_or(CommandError::InvalidTarget {
        key: caret.key,
        expected: "a text inside a block",
    })?;
    let right = tx.doc.split_text(caret.key, caret.offset)?;
    let mut child = right;
    let mut node = tx.doc.parent(caret.key);
    while let Some(current) = node {
        let shell = tx.doc.insert_shell_after(current)?;
        let from = tx.doc.index_of(child).unwrap_or(0);
        let tail = tx.doc.children(current)[from..].to_vec();
        for (i, moved) in tail.into_iter().enumerate() {
            tx.doc.move_node(moved, shell, i)?;
        }
        if current == block {
            break;
        }
        child = shell;
        node = tx.doc.parent(current);
    }
    tx.collapse_to(Position::new(right, 0));
    Ok(())
}

fn execute_insert_block(
    tx: &mut Tx,
    block_type: BlockType,
    data: &NodeData,
) -> Result<(), CommandError> {
    if tx.sel.is_expanded() {
        delete_range(tx)?;
    }
    let caret = tx.sel.focus();
    let children = if block_type.is_void() {
        Vec::new()
    } else {
        vec![NodeSpec::text("")]
    };
    let spec = NodeSpec::block(block_type, children).with_data(data.clone());

    let (parent, index) = if tx.doc.is_void(caret.key) {
        let parent = tx.doc.parent(caret.key).unwrap_or(tx.doc.root());
        (parent, tx.doc.index_of(caret.key).map_or(0, |i| i + 1))
    } else {
        let block = tx.doc.block_of(&caret).ok_or(CommandError::InvalidTarget {
            key: caret.key,
            expected: "a text inside a block",
        })?;
        let parent = tx.doc.parent(block).unwrap_or(tx.doc.root());
        let at = tx.doc.index_of(block).unwrap_or(0);
        let len = tx.doc.text_len(block);
        let offset = tx.doc.block_offset(&caret);
        if len == 0 || offset == len {
            (parent, at + 1)
        } else if offset == 0 {
            (parent, at)
        } else {
            execute_split_block(tx)?;
            (parent, at + 1)
        }
    };

    let inserted = tx.doc.insert_node(parent, index, &spec)?;
    tracing::trace!(target: "loom::execute", %block_type, %inserted, "inserted block");

    if block_type.is_void() {
        let next = match tx.doc.next_leaf_block(inserted) {
            Some(next) => next,
            None => {
                let index = tx.doc.index_of(inserted).map_or(0, |i| i + 1);
                tx.doc.insert_node(parent, index, &NodeSpec::paragraph(""))?
            }
        };
        let start = start_of_node(&tx.doc, next)?;
        tx.collapse_to(start);
    } else {
        let start = start_of_node(&tx.doc, inserted)?;
        tx.collapse_to(start);
    }
    Ok(())
}

// === Marks ===

fn execute_toggle_mark(tx: &mut Tx, mark: MarkType) -> Result<(), CommandError> {
    let active = match (&tx.sel.marks, tx.sel.is_collapsed()) {
        (Some(marks), true) => marks.contains(&mark),
        _ => tx.doc.marks_in_range(&tx.sel.range).contains(&mark),
    };
    execute_set_mark(tx, mark, !active)
}

fn execute_set_mark(tx: &mut Tx, mark: MarkType, add: bool) -> Result<(), CommandError> {
    if tx.sel.is_collapsed() {
        let mut marks = tx
            .sel
            .marks
            .take()
            .unwrap_or_else(|| tx.doc.marks_in_range(&tx.sel.range));
        if add {
            marks.insert(mark);
        } else {
            marks.remove(&mark);
        }
        tx.sel.marks = Some(marks);
        return Ok(());
    }

    for key in split_range_edges(tx)? {
        if let Some(text) = tx.doc.text_mut(key) {
            let len = text.len_chars();
            if add {
                text.add_mark(mark, 0..len);
            } else {
                text.remove_mark(mark, 0..len);
            }
        }
    }
    tracing::trace!(target: "loom::execute", %mark, add, "marked range");
    Ok(())
}

/// Split the texts at both edges of an expanded selection so every text in
/// range is covered entirely or not at all. Returns the covered texts and
/// re-points the selection at the split pieces.
fn split_range_edges(tx: &mut Tx) -> Result<Vec<NodeKey>, CommandError> {
    let backward = tx.doc.is_backward(&tx.sel.range);
    let (mut start, mut end) = tx.ordered();

    if let Some(len) = tx.doc.text(end.key).map(|t| t.len_chars()) {
        if end.offset > 0 && end.offset < len {
            tx.doc.split_text(end.key, end.offset)?;
        }
    }
    if let Some(len) = tx.doc.text(start.key).map(|t| t.len_chars()) {
        if start.offset > 0 && start.offset < len {
            let right = tx.doc.split_text(start.key, start.offset)?;
            if end.key == start.key {
                end = Position::new(right, end.offset - start.offset);
            }
            start = Position::new(right, 0);
        }
    }

    tx.sel = Selection::new(if backward {
        Range::new(end, start)
    } else {
        Range::new(start, end)
    });

    let covered = tx
        .doc
        .texts_in_range(&tx.sel.range)
        .into_iter()
        .filter(|key| {
            let len = tx.doc.text(*key).map_or(0, |t| t.len_chars());
            let from = if *key == start.key { start.offset } else { 0 };
            let to = if *key == end.key { end.offset } else { len };
            from < to
        })
        .collect();
    Ok(covered)
}

// === Text ===

fn execute_insert_text(tx: &mut Tx, text: &str) -> Result<(), CommandError> {
    if tx.sel.is_expanded() {
        delete_range(tx)?;
    }
    let caret = tx.sel.focus();
    let pending = tx.sel.marks.take();
    let Some(leaf) = tx.doc.text_mut(caret.key) else {
        tracing::debug!(target: "loom::execute", key = %caret.key, "insert_text into a void ignored");
        return Ok(());
    };
    let marks = pending.unwrap_or_else(|| leaf.marks_before(caret.offset));
    leaf.insert(caret.offset, text, &marks);
    tx.collapse_to(Position::new(
        caret.key,
        caret.offset + text.chars().count(),
    ));
    Ok(())
}

/// Remove a void block and put the caret on the nearest surviving leaf.
fn remove_void(tx: &mut Tx, void: NodeKey) -> Result<(), CommandError> {
    let leaves = tx.doc.leaves();
    let idx = leaves.iter().position(|k| *k == void);
    let before = idx.and_then(|i| i.checked_sub(1)).map(|i| leaves[i]);
    let after = idx.and_then(|i| leaves.get(i + 1)).copied();
    tx.doc.remove_node(void)?;
    let caret = match (before, after) {
        (Some(prev), _) => tx.doc.end_of(prev),
        (None, Some(next)) => tx.doc.start_of(next),
        (None, None) => None,
    };
    if let Some(caret) = caret {
        tx.collapse_to(caret);
    }
    tracing::trace!(target: "loom::execute", %void, "removed void block");
    Ok(())
}

/// Delete the expanded selection, merging the end block into the start
/// block when the range spans blocks.
fn delete_range(tx: &mut Tx) -> Result<(), CommandError> {
    let (mut start, mut end) = tx.ordered();
    if start == end {
        return Ok(());
    }

    // Void endpoints go as a whole unit.
    if tx.doc.is_void(end.key) {
        let void = end.key;
        let leaves = tx.doc.leaves();
        let prev = leaves
            .iter()
            .position(|k| *k == void)
            .and_then(|i| i.checked_sub(1))
            .map(|i| leaves[i]);
        end = prev.and_then(|p| tx.doc.end_of(p)).unwrap_or(start);
        if void == start.key {
            start = end;
        }
        tx.doc.remove_node(void)?;
    }
    if tx.doc.is_void(start.key) {
        let void = start.key;
        let leaves = tx.doc.leaves();
        let next = leaves
            .iter()
            .position(|k| *k == void)
            .and_then(|i| leaves.get(i + 1))
            .copied();
        start = next.and_then(|n| tx.doc.start_of(n)).unwrap_or(end);
        tx.doc.remove_node(void)?;
    }
    if !tx.doc.is_valid_position(&start) || !tx.doc.is_valid_position(&end) {
        let survivor = [start, end]
            .into_iter()
            .find(|p| tx.doc.is_valid_position(p));
        if let Some(pos) = survivor.or_else(|| tx.doc.start_of(tx.doc.root())) {
            tx.collapse_to(pos);
        }
        return Ok(());
    }
    if tx.doc.compare(&start, &end) != Ordering::Less {
        tx.collapse_to(start);
        return Ok(());
    }

    if start.key == end.key {
        if let Some(text) = tx.doc.text_mut(start.key) {
            text.remove(start.offset..end.offset);
        }
        tx.collapse_to(start);
        return Ok(());
    }

    // Drop every node strictly between the two endpoints.
    let order = tx.doc.preorder();
    let si = order.iter().position(|k| *k == start.key).unwrap_or(0);
    let ei = order.iter().position(|k| *k == end.key).unwrap_or(si);
    let mut doomed: Vec<NodeKey> = Vec::new();
    for key in order.iter().take(ei).skip(si + 1) {
        if tx.doc.is_ancestor(*key, end.key) {
            continue;
        }
        if doomed.iter().any(|d| tx.doc.is_ancestor(*d, *key)) {
            continue;
        }
        doomed.push(*key);
    }
    for key in doomed {
        tx.doc.remove_node(key)?;
    }

    if let Some(text) = tx.doc.text_mut(start.key) {
        let len = text.len_chars();
        text.remove(start.offset..len);
    }
    if let Some(text) = tx.doc.text_mut(end.key) {
        text.remove(0..end.offset);
    }

    let start_block = tx.doc.closest_block(start.key);
    let end_block = tx.doc.closest_block(end.key);
    if let (Some(start_block), Some(end_block)) = (start_block, end_block) {
        let nested = tx.doc.is_ancestor(start_block, end_block)
            || tx.doc.is_ancestor(end_block, start_block);
        if start_block != end_block && !nested {
            let base = tx.doc.children(start_block).len();
            let moved = tx.doc.children(end_block).to_vec();
            for (i, child) in moved.into_iter().enumerate() {
                tx.doc.move_node(child, start_block, base + i)?;
            }
            let root = tx.doc.root();
            let mut cursor = Some(end_block);
            while let Some(key) = cursor {
                if key == root
                    || !tx.doc.children(key).is_empty()
                    || tx.doc.is_ancestor(key, start.key)
                {
                    break;
                }
                cursor = tx.doc.parent(key);
                tx.doc.remove_node(key)?;
            }
        }
    }

    tx.collapse_to(start);
    Ok(())
}

fn execute_delete_backward(tx: &mut Tx, count: usize) -> Result<(), CommandError> {
    if tx.sel.is_expanded() {
        return delete_range(tx);
    }
    let caret = tx.sel.focus();
    if tx.doc.is_void(caret.key) {
        return remove_void(tx, caret.key);
    }
    let Some(block) = tx.doc.block_of(&caret) else {
        return Ok(());
    };
    let offset = tx.doc.block_offset(&caret);

    if offset > 0 {
        let target = tx
            .doc
            .position_at_block_offset(block, offset - count.min(offset))
            .unwrap_or(caret);
        tx.sel = Selection::new(Range::new(target, caret));
        return delete_range(tx);
    }

    match tx.doc.previous_leaf_block(block) {
        None => {
            tracing::trace!(target: "loom::execute", "delete_backward at document start");
            Ok(())
        }
        Some(prev) if tx.doc.is_void(prev) => {
            tx.doc.remove_node(prev)?;
            Ok(())
        }
        Some(prev) if tx.doc.text_len(prev) == 0 && tx.doc.texts_in(prev).len() <= 1 => {
            tx.doc.remove_node(prev)?;
            Ok(())
        }
        Some(prev) => {
            let Some(end) = tx.doc.end_of(prev) else {
                return Ok(());
            };
            tx.sel = Selection::new(Range::new(end, caret));
            delete_range(tx)
        }
    }
}

fn execute_delete_forward(tx: &mut Tx, count: usize) -> Result<(), CommandError> {
    if tx.sel.is_expanded() {
        return delete_range(tx);
    }
    let caret = tx.sel.focus();
    if tx.doc.is_void(caret.key) {
        return remove_void(tx, caret.key);
    }
    let Some(block) = tx.doc.block_of(&caret) else {
        return Ok(());
    };
    let offset = tx.doc.block_offset(&caret);
    let len = tx.doc.text_len(block);

    if offset < len {
        let target = tx
            .doc
            .position_at_block_offset(block, offset + count)
            .unwrap_or(caret);
        tx.sel = Selection::new(Range::new(caret, target));
        return delete_range(tx);
    }

    match tx.doc.next_leaf_block(block) {
        None => Ok(()),
        Some(next) if tx.doc.is_void(next) => {
            tx.doc.remove_node(next)?;
            Ok(())
        }
        Some(next) => {
            let Some(start) = tx.doc.start_of(next) else {
                return Ok(());
            };
            tx.sel = Selection::new(Range::new(caret, start));
            delete_range(tx)
        }
    }
}

// === Inlines ===

fn execute_wrap_inline(
    tx: &mut Tx,
    inline_type: InlineType,
    data: &NodeData,
) -> Result<(), CommandError> {
    if tx.sel.is_collapsed() {
        tracing::debug!(target: "loom::execute", %inline_type, "wrap_inline needs an expanded selection");
        return Ok(());
    }
    let covered = split_range_edges(tx)?;

    // Group covered texts into runs of adjacent siblings directly under a block.
    let mut runs: Vec<Vec<NodeKey>> = Vec::new();
    for key in covered {
        let Some(parent) = tx.doc.parent(key) else {
            continue;
        };
        if !tx.doc.get(parent).is_some_and(|n| n.is_block()) {
            continue;
        }
        let idx = tx.doc.index_of(key);
        let extends = runs.last().and_then(|run| run.last()).is_some_and(|prev| {
            tx.doc.parent(*prev) == Some(parent)
                && tx.doc.index_of(*prev).map(|i| i + 1) == idx
        });
        match runs.last_mut() {
            Some(run) if extends => run.push(key),
            _ => runs.push(vec![key]),
        }
    }

    for run in runs {
        let Some(first) = run.first() else {
            continue;
        };
        let (Some(parent), Some(at)) = (tx.doc.parent(*first), tx.doc.index_of(*first)) else {
            continue;
        };
        let spec = NodeSpec::Inline {
            inline_type,
            data: data.clone(),
            children: Vec::new(),
        };
        let inline = tx.doc.insert_node(parent, at, &spec)?;
        for (i, key) in run.into_iter().enumerate() {
            tx.doc.move_node(key, inline, i)?;
        }
        tracing::trace!(target: "loom::execute", %inline_type, %inline, "wrapped inline");
    }
    Ok(())
}

fn execute_unwrap_inline(tx: &mut Tx, inline_type: InlineType) -> Result<(), CommandError> {
    for inline in tx.doc.inlines_in_range(&tx.sel.range, inline_type) {
        let (Some(parent), Some(at)) = (tx.doc.parent(inline), tx.doc.index_of(inline)) else {
            continue;
        };
        let children = tx.doc.children(inline).to_vec();
        for (i, child) in children.into_iter().enumerate() {
            tx.doc.move_node(child, parent, at + i)?;
        }
        tx.doc.remove_node(inline)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MarkSet;

    fn state(specs: Vec<NodeSpec>) -> (EditorState, Schema) {
        let schema = Schema::default();
        let state = EditorState::new(Document::from_specs(specs), &schema).unwrap();
        (state, schema)
    }

    fn caret(state: &EditorState, text_index: usize, offset: usize) -> Range {
        Range::collapsed(Position::new(state.document.texts()[text_index], offset))
    }

    fn span(state: &EditorState, from: (usize, usize), to: (usize, usize)) -> Range {
        let texts = state.document.texts();
        Range::new(
            Position::new(texts[from.0], from.1),
            Position::new(texts[to.0], to.1),
        )
    }

    fn run(state: &EditorState, schema: &Schema, commands: &[Command]) -> EditorState {
        execute_batch(state, schema, commands).unwrap()
    }

    fn texts(state: &EditorState) -> Vec<String> {
        let doc = &state.document;
        doc.leaf_blocks()
            .into_iter()
            .map(|b| doc.text_content(b))
            .collect()
    }

    #[test]
    fn test_insert_text() {
        let (s, schema) = state(vec![NodeSpec::paragraph("hello")]);
        let s = s.clone().with_selection(caret(&s, 0, 5));
        let s = run(&s, &schema, &[Command::insert_text(" world")]);
        assert_eq!(texts(&s)[0], "hello world");
        assert_eq!(s.selection.focus().offset, 11);
        assert_eq!(s.revision, 1);
    }

    #[test]
    fn test_delete_backward_within_block() {
        let (s, schema) = state(vec![NodeSpec::paragraph("hello")]);
        let s = s.clone().with_selection(caret(&s, 0, 5));
        let s = run(&s, &schema, &[Command::DeleteBackward { count: 1 }]);
        assert_eq!(texts(&s)[0], "hell");
    }

    #[test]
    fn delete_backward_at_block_start_merges() {
        let (s, schema) = state(vec![
            NodeSpec::paragraph("one"),
            NodeSpec::paragraph("two"),
        ]);
        let s = s.clone().with_selection(caret(&s, 1, 0));
        let s = run(&s, &schema, &[Command::DeleteBackward { count: 1 }]);
        assert_eq!(texts(&s), vec!["onetwo".to_string()]);
        assert_eq!(s.document.block_offset(&s.selection.focus()), 3);
    }

    #[test]
    fn delete_range_across_blocks() {
        let (s, schema) = state(vec![
            NodeSpec::paragraph("hello"),
            NodeSpec::paragraph("middle"),
            NodeSpec::paragraph("world"),
        ]);
        let s = s.clone().with_selection(span(&s, (0, 2), (2, 3)));
        let s = run(&s, &schema, &[Command::Delete]);
        assert_eq!(texts(&s), vec!["held".to_string()]);
        assert!(s.selection.is_collapsed());
    }

    #[test]
    fn split_block_keeps_type() {
        let (s, schema) = state(vec![NodeSpec::leaf(BlockType::HeadingTwo, "Title")]);
        let s = s.clone().with_selection(caret(&s, 0, 2));
        let s = run(&s, &schema, &[Command::SplitBlock]);
        let doc = &s.document;
        let blocks = doc.leaf_blocks();
        assert_eq!(texts(&s)[..2], ["Ti".to_string(), "tle".to_string()]);
        assert_eq!(doc.block_type(blocks[1]), Some(BlockType::HeadingTwo));
        assert_eq!(doc.block_of(&s.selection.focus()), Some(blocks[1]));
    }

    #[test]
    fn wrap_and_unwrap_list() {
        let (s, schema) = state(vec![
            NodeSpec::paragraph("a"),
            NodeSpec::paragraph("b"),
            NodeSpec::paragraph("c"),
        ]);
        let s = s.clone().with_selection(span(&s, (0, 0), (2, 1)));
        let s = run(
            &s,
            &schema,
            &[
                Command::set_blocks(BlockType::ListItem),
                Command::wrap_block(BlockType::BulletedList),
            ],
        );
        let root = s.document.root();
        let list = s.document.children(root)[0];
        assert_eq!(s.document.block_type(list), Some(BlockType::BulletedList));
        assert_eq!(s.document.children(list).len(), 3);

        // Lift only the middle item: the list splits around it.
        let s = s.clone().with_selection(caret(&s, 1, 0));
        let s = run(
            &s,
            &schema,
            &[
                Command::set_blocks(BlockType::Paragraph),
                Command::unwrap_block(BlockType::BulletedList),
            ],
        );
        let types: Vec<_> = s
            .document
            .children(root)
            .iter()
            .filter_map(|k| s.document.block_type(*k))
            .collect();
        assert_eq!(
            types,
            vec![
                BlockType::BulletedList,
                BlockType::Paragraph,
                BlockType::BulletedList,
                BlockType::Paragraph,
            ]
        );
        assert_eq!(texts(&s)[..3], ["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn toggle_mark_on_partial_text() {
        let (s, schema) = state(vec![NodeSpec::paragraph("Hello World")]);
        let s = s.clone().with_selection(span(&s, (0, 6), (0, 11)));
        let s = run(&s, &schema, &[Command::toggle_mark(MarkType::Bold)]);
        insta::assert_snapshot!(s.document.outline(), @r#"
        paragraph
          "Hello "
          "World" bold[0..5]
        "#);
        assert!(
            s.document
                .marks_in_range(&s.selection.range)
                .contains(&MarkType::Bold)
        );
    }

    #[test]
    fn toggle_mark_collapsed_sets_pending_marks() {
        let (s, schema) = state(vec![NodeSpec::paragraph("ab")]);
        let s = s.clone().with_selection(caret(&s, 0, 1));
        let s = run(
            &s,
            &schema,
            &[
                Command::toggle_mark(MarkType::Italic),
                Command::insert_text("X"),
            ],
        );
        let doc = &s.document;
        let text = doc.text(doc.texts()[0]).unwrap();
        assert_eq!(text.as_str(), "aXb");
        assert_eq!(text.marks_at(1), MarkSet::from([MarkType::Italic]));
        assert!(text.marks_at(2).is_empty());
    }

    #[test]
    fn insert_void_block_moves_caret_past_it() {
        let (s, schema) = state(vec![NodeSpec::paragraph("")]);
        let s = run(&s, &schema, &[Command::insert_image("data:image/png;base64,AAAA")]);
        let doc = &s.document;
        let types: Vec<_> = doc
            .children(doc.root())
            .iter()
            .filter_map(|k| doc.block_type(*k))
            .collect();
        assert_eq!(
            types,
            vec![BlockType::Paragraph, BlockType::Image, BlockType::Paragraph]
        );
        let caret_block = doc.block_of(&s.selection.focus()).unwrap();
        assert_eq!(doc.index_of(caret_block), Some(2));
    }

    #[test]
    fn insert_block_mid_text_splits() {
        let (s, schema) = state(vec![NodeSpec::paragraph("abcd")]);
        let s = s.clone().with_selection(caret(&s, 0, 2));
        let s = run(&s, &schema, &[Command::insert_image("https://x.test/a.png")]);
        let doc = &s.document;
        let types: Vec<_> = doc
            .children(doc.root())
            .iter()
            .filter_map(|k| doc.block_type(*k))
            .collect();
        assert_eq!(
            types,
            vec![BlockType::Paragraph, BlockType::Image, BlockType::Paragraph]
        );
        assert_eq!(texts(&s), vec!["ab".to_string(), String::new(), "cd".to_string()]);
    }

    #[test]
    fn wrap_and_unwrap_link() {
        let (s, schema) = state(vec![NodeSpec::paragraph("see the docs")]);
        let s = s.clone().with_selection(span(&s, (0, 8), (0, 12)));
        let s = run(
            &s,
            &schema,
            &[Command::wrap_link("https://docs.rs"), Command::MoveToEnd],
        );
        insta::assert_snapshot!(s.document.outline(), @r#"
        paragraph
          "see the "
          link href="https://docs.rs"
            "docs"
        "#);
        assert!(s.selection.is_collapsed());

        let s = run(&s, &schema, &[Command::unwrap_link()]);
        assert!(
            s.document
                .inlines_in_range(&s.selection.range, InlineType::Link)
                .is_empty()
        );
        assert_eq!(texts(&s)[0], "see the docs");
    }

    #[test]
    fn stale_selection_is_reported_and_state_kept() {
        let (s, schema) = state(vec![NodeSpec::paragraph("x")]);
        let missing = NodeKey(9_999);
        let err = execute_command(
            &s,
            &schema,
            &Command::Select {
                range: Range::collapsed(Position::new(missing, 0)),
            },
        )
        .unwrap_err();
        assert_eq!(err, CommandError::StaleReference { key: missing });
        assert_eq!(s.revision, 0);
    }

    #[test]
    fn move_focus_backward_selects_inserted_text() {
        let (s, schema) = state(vec![NodeSpec::paragraph("go ")]);
        let s = s.clone().with_selection(caret(&s, 0, 3));
        let s = run(
            &s,
            &schema,
            &[
                Command::insert_text("here"),
                Command::MoveFocusBackward { count: 4 },
            ],
        );
        let (start, end) = s.document.ordered(&s.selection.range);
        assert_eq!((start.offset, end.offset), (3, 7));
        assert!(s.document.is_backward(&s.selection.range));
    }
}
