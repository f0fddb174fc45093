//! Document schema: declarative constraints plus the repair loop that
//! enforces them.
//!
//! Each rule names the nodes it applies to, checks one node, and knows how to
//! repair a violation. [`Schema::normalize`] walks the document once in
//! document order, checking each node against the rules in priority order.
//! After a repair the walk resumes at the repaired node's parent, then the
//! node itself and any nodes the repair created; everything else keeps its
//! verdict. A closing full scan catches rules whose verdict depends on
//! nodes further away. Every repair strictly shrinks the set of violations
//! its rule reports, so the loop reaches a fixed point; the iteration bound
//! only guards against a faulty custom rule.

use crate::document::{Document, Node, NodeSpec};
use crate::error::CommandError;
use crate::types::{BlockType, NodeKey};

/// Which nodes a rule inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleScope {
    Document,
    Blocks(&'static [BlockType]),
    AnyBlock,
    AnyInline,
}

impl RuleScope {
    fn matches(&self, doc: &Document, node: &Node) -> bool {
        match self {
            RuleScope::Document => node.key == doc.root(),
            RuleScope::Blocks(types) => node.block_type().is_some_and(|t| types.contains(&t)),
            RuleScope::AnyBlock => node.is_block(),
            RuleScope::AnyInline => node.is_inline(),
        }
    }
}

/// A structural constraint with its repair.
pub trait SchemaRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn scope(&self) -> RuleScope;

    /// `true` when `key` satisfies the rule.
    fn validate(&self, doc: &Document, key: NodeKey) -> bool;

    /// Fix a node `validate` rejected.
    fn repair(&self, doc: &mut Document, key: NodeKey) -> Result<(), CommandError>;
}

/// A violation found by [`Schema::find_violation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Violation {
    pub rule: usize,
    pub key: NodeKey,
}

pub struct Schema {
    rules: Vec<Box<dyn SchemaRule>>,
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(|r| r.name()))
            .finish()
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            rules: vec![
                Box::new(DocumentChildrenAreBlocks),
                Box::new(NoMixedBlockContent),
                Box::new(ListItemInList),
                Box::new(ListNotEmpty),
                Box::new(InlineNotEmpty),
                Box::new(VoidHasNoChildren),
                Box::new(BlockHasContent),
                Box::new(LastChildIsParagraph),
            ],
        }
    }
}

impl Schema {
    /// A schema with no rules.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule after the built-in ones.
    pub fn with_rule(mut self, rule: impl SchemaRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Iteration bound for a document of `node_count` nodes.
    pub fn iteration_bound(node_count: usize) -> usize {
        4 * node_count + 16
    }

    pub fn find_violation(&self, doc: &Document) -> Option<Violation> {
        let order = doc.preorder();
        for (rule_idx, rule) in self.rules.iter().enumerate() {
            let scope = rule.scope();
            for key in &order {
                let Some(node) = doc.get(*key) else {
                    continue;
                };
                if scope.matches(doc, node) && !rule.validate(doc, *key) {
                    return Some(Violation {
                        rule: rule_idx,
                        key: *key,
                    });
                }
            }
        }
        None
    }

    /// The first rule `key` breaks, if any.
    fn check_node(&self, doc: &Document, key: NodeKey) -> Option<Violation> {
        let node = doc.get(key)?;
        self.rules
            .iter()
            .position(|rule| rule.scope().matches(doc, node) && !rule.validate(doc, key))
            .map(|rule| Violation { rule, key })
    }

    pub fn is_normalized(&self, doc: &Document) -> bool {
        self.find_violation(doc).is_none()
    }

    /// Repair violations until none remain. Returns the number of repairs.
    pub fn normalize(&self, doc: &mut Document) -> Result<usize, CommandError> {
        let bound = Self::iteration_bound(doc.len());
        let mut repairs = 0;
        // Stack of nodes still to check; the next one is on top.
        let mut pending = doc.preorder();
        pending.reverse();
        loop {
            let violation = match pending.pop() {
                Some(key) => match self.check_node(doc, key) {
                    Some(violation) => violation,
                    None => continue,
                },
                None => match self.find_violation(doc) {
                    Some(violation) => violation,
                    None => break,
                },
            };
            if repairs >= bound {
                tracing::error!(
                    target: "loom::schema",
                    iterations = repairs,
                    rule = self.rules[violation.rule].name(),
                    "normalization did not converge"
                );
                return Err(CommandError::NormalizationNonTermination {
                    iterations: repairs,
                });
            }
            let rule = &self.rules[violation.rule];
            tracing::trace!(
                target: "loom::schema",
                rule = rule.name(),
                key = %violation.key,
                "repair"
            );
            let parent = doc.parent(violation.key).unwrap_or(doc.root());
            let mark = doc.next_key();
            rule.repair(doc, violation.key)?;
            repairs += 1;

            let resume = if doc.contains(parent) {
                parent
            } else {
                doc.root()
            };
            let mut created = doc.created_since(mark);
            created.reverse();
            pending.extend(created);
            if violation.key != resume && doc.contains(violation.key) {
                pending.push(violation.key);
            }
            pending.push(resume);
        }
        Ok(repairs)
    }
}

/// Wrap the first run of non-block children of `parent` in a paragraph.
fn wrap_first_inline_run(doc: &mut Document, parent: NodeKey) -> Result<(), CommandError> {
    let children = doc.children(parent).to_vec();
    let is_block = |k: &NodeKey| doc.get(*k).is_some_and(Node::is_block);
    let Some(from) = children.iter().position(|k| !is_block(k)) else {
        return Ok(());
    };
    let run: Vec<NodeKey> = children[from..]
        .iter()
        .take_while(|k| !is_block(k))
        .copied()
        .collect();
    let para = doc.insert_node(
        parent,
        from,
        &NodeSpec::block(BlockType::Paragraph, Vec::new()),
    )?;
    for (i, key) in run.into_iter().enumerate() {
        doc.move_node(key, para, i)?;
    }
    Ok(())
}

fn has_block_child(doc: &Document, key: NodeKey) -> bool {
    doc.children(key)
        .iter()
        .any(|k| doc.get(*k).is_some_and(Node::is_block))
}

struct DocumentChildrenAreBlocks;

impl SchemaRule for DocumentChildrenAreBlocks {
    fn name(&self) -> &'static str {
        "document-children-are-blocks"
    }

    fn scope(&self) -> RuleScope {
        RuleScope::Document
    }

    fn validate(&self, doc: &Document, key: NodeKey) -> bool {
        doc.children(key)
            .iter()
            .all(|k| doc.get(*k).is_some_and(Node::is_block))
    }

    fn repair(&self, doc: &mut Document, key: NodeKey) -> Result<(), CommandError> {
        wrap_first_inline_run(doc, key)
    }
}

struct NoMixedBlockContent;

impl SchemaRule for NoMixedBlockContent {
    fn name(&self) -> &'static str {
        "no-mixed-block-content"
    }

    fn scope(&self) -> RuleScope {
        RuleScope::AnyBlock
    }

    fn validate(&self, doc: &Document, key: NodeKey) -> bool {
        !has_block_child(doc, key)
            || doc
                .children(key)
                .iter()
                .all(|k| doc.get(*k).is_some_and(Node::is_block))
    }

    fn repair(&self, doc: &mut Document, key: NodeKey) -> Result<(), CommandError> {
        wrap_first_inline_run(doc, key)
    }
}

struct ListItemInList;

impl SchemaRule for ListItemInList {
    fn name(&self) -> &'static str {
        "list-item-in-list"
    }

    fn scope(&self) -> RuleScope {
        RuleScope::Blocks(&[BlockType::ListItem])
    }

    fn validate(&self, doc: &Document, key: NodeKey) -> bool {
        doc.parent(key)
            .and_then(|p| doc.block_type(p))
            .is_some_and(|t| t.is_list())
    }

    fn repair(&self, doc: &mut Document, key: NodeKey) -> Result<(), CommandError> {
        let parent = doc.parent(key).ok_or(CommandError::InvalidTarget {
            key,
            expected: "an attached list item",
        })?;
        let at = doc.index_of(key).unwrap_or(0);
        let run: Vec<NodeKey> = doc.children(parent)[at..]
            .iter()
            .take_while(|k| doc.block_type(**k) == Some(BlockType::ListItem))
            .copied()
            .collect();
        let list = doc.insert_node(
            parent,
            at,
            &NodeSpec::block(BlockType::BulletedList, Vec::new()),
        )?;
        for (i, item) in run.into_iter().enumerate() {
            doc.move_node(item, list, i)?;
        }
        Ok(())
    }
}

struct ListNotEmpty;

impl SchemaRule for ListNotEmpty {
    fn name(&self) -> &'static str {
        "list-not-empty"
    }

    fn scope(&self) -> RuleScope {
        RuleScope::Blocks(&[BlockType::BulletedList, BlockType::NumberedList])
    }

    fn validate(&self, doc: &Document, key: NodeKey) -> bool {
        !doc.children(key).is_empty()
    }

    fn repair(&self, doc: &mut Document, key: NodeKey) -> Result<(), CommandError> {
        doc.remove_node(key)
    }
}

struct InlineNotEmpty;

impl SchemaRule for InlineNotEmpty {
    fn name(&self) -> &'static str {
        "inline-not-empty"
    }

    fn scope(&self) -> RuleScope {
        RuleScope::AnyInline
    }

    fn validate(&self, doc: &Document, key: NodeKey) -> bool {
        !doc.children(key).is_empty()
    }

    fn repair(&self, doc: &mut Document, key: NodeKey) -> Result<(), CommandError> {
        doc.remove_node(key)
    }
}

struct VoidHasNoChildren;

impl SchemaRule for VoidHasNoChildren {
    fn name(&self) -> &'static str {
        "void-has-no-children"
    }

    fn scope(&self) -> RuleScope {
        RuleScope::Blocks(&[BlockType::Image])
    }

    fn validate(&self, doc: &Document, key: NodeKey) -> bool {
        doc.children(key).is_empty()
    }

    fn repair(&self, doc: &mut Document, key: NodeKey) -> Result<(), CommandError> {
        for child in doc.children(key).to_vec() {
            doc.remove_node(child)?;
        }
        Ok(())
    }
}

struct BlockHasContent;

impl SchemaRule for BlockHasContent {
    fn name(&self) -> &'static str {
        "block-has-content"
    }

    fn scope(&self) -> RuleScope {
        RuleScope::AnyBlock
    }

    fn validate(&self, doc: &Document, key: NodeKey) -> bool {
        let Some(ty) = doc.block_type(key) else {
            return true;
        };
        ty.is_void() || ty.is_container() || !doc.children(key).is_empty()
    }

    fn repair(&self, doc: &mut Document, key: NodeKey) -> Result<(), CommandError> {
        doc.insert_node(key, 0, &NodeSpec::text("")).map(|_| ())
    }
}

struct LastChildIsParagraph;

impl SchemaRule for LastChildIsParagraph {
    fn name(&self) -> &'static str {
        "last-child-is-paragraph"
    }

    fn scope(&self) -> RuleScope {
        RuleScope::Document
    }

    fn validate(&self, doc: &Document, key: NodeKey) -> bool {
        doc.children(key)
            .last()
            .and_then(|k| doc.block_type(*k))
            == Some(BlockType::Paragraph)
    }

    fn repair(&self, doc: &mut Document, key: NodeKey) -> Result<(), CommandError> {
        let end = doc.children(key).len();
        doc.insert_node(key, end, &NodeSpec::paragraph(""))
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::types::MarkType;

    #[test]
    fn empty_document_gets_a_paragraph() {
        let mut doc = Document::new();
        let repairs = Schema::default().normalize(&mut doc).unwrap();
        assert_eq!(repairs, 1);
        assert_eq!(doc.to_specs(), vec![NodeSpec::paragraph("")]);
    }

    #[test]
    fn trailing_non_paragraph_gets_paragraph_after() {
        let mut doc = Document::from_specs([NodeSpec::leaf(BlockType::HeadingOne, "Title")]);
        Schema::default().normalize(&mut doc).unwrap();
        assert_eq!(
            doc.to_specs(),
            vec![
                NodeSpec::leaf(BlockType::HeadingOne, "Title"),
                NodeSpec::paragraph("")
            ]
        );
    }

    #[test]
    fn messy_document_converges_and_is_idempotent() {
        let schema = Schema::default();
        let mut doc = Document::from_specs([
            NodeSpec::text("loose"),
            NodeSpec::leaf(BlockType::ListItem, "orphan one"),
            NodeSpec::leaf(BlockType::ListItem, "orphan two"),
            NodeSpec::block(BlockType::NumberedList, Vec::new()),
            NodeSpec::block(
                BlockType::Center,
                vec![
                    NodeSpec::marked("mixed", &[MarkType::Bold]),
                    NodeSpec::paragraph("inner"),
                ],
            ),
            NodeSpec::block(BlockType::Paragraph, vec![NodeSpec::link("https://a", Vec::new())]),
            NodeSpec::block(BlockType::Image, vec![NodeSpec::text("junk")]),
        ]);
        let bound = Schema::iteration_bound(doc.len());
        let repairs = schema.normalize(&mut doc).unwrap();
        assert!(repairs <= bound);
        assert!(schema.is_normalized(&doc));

        insta::assert_snapshot!(doc.outline(), @r#"
        paragraph
          "loose"
        bulleted-list
          list-item
            "orphan one"
          list-item
            "orphan two"
        center
          paragraph
            "mixed" bold[0..5]
          paragraph
            "inner"
        paragraph
          ""
        image
        paragraph
          ""
        "#);

        let before = doc.clone();
        assert_eq!(schema.normalize(&mut doc).unwrap(), 0);
        assert_eq!(doc, before);
    }

    struct CountChecks(Arc<AtomicUsize>);

    impl SchemaRule for CountChecks {
        fn name(&self) -> &'static str {
            "count-checks"
        }

        fn scope(&self) -> RuleScope {
            RuleScope::AnyBlock
        }

        fn validate(&self, _doc: &Document, _key: NodeKey) -> bool {
            self.0.fetch_add(1, Ordering::Relaxed);
            true
        }

        fn repair(&self, _doc: &mut Document, _key: NodeKey) -> Result<(), CommandError> {
            Ok(())
        }
    }

    #[test]
    fn repairs_only_revisit_nearby_nodes() {
        let checks = Arc::new(AtomicUsize::new(0));
        let schema = Schema::empty()
            .with_rule(CountChecks(Arc::clone(&checks)))
            .with_rule(InlineNotEmpty);
        let n = 200;
        let mut doc = Document::from_specs((0..n).map(|_| {
            NodeSpec::block(BlockType::Paragraph, vec![NodeSpec::link("https://a", Vec::new())])
        }));

        assert_eq!(schema.normalize(&mut doc).unwrap(), n);
        assert!(schema.is_normalized(&doc));
        // One visit per paragraph, one revisit after its repair, one closing scan.
        assert!(checks.load(Ordering::Relaxed) <= 4 * n, "{checks:?}");
        assert!(doc.children(doc.root()).iter().all(|k| doc.children(*k).is_empty()));
    }

    #[test]
    fn many_orphans_normalize_and_stay_stable() {
        let schema = Schema::default();
        let mut specs = Vec::new();
        for i in 0..100 {
            specs.push(NodeSpec::paragraph(&format!("p{i}")));
            specs.push(NodeSpec::leaf(BlockType::ListItem, "orphan"));
            specs.push(NodeSpec::text("loose"));
        }
        let mut doc = Document::from_specs(specs);
        let bound = Schema::iteration_bound(doc.len());
        let repairs = schema.normalize(&mut doc).unwrap();
        assert!(repairs <= bound);
        assert!(schema.is_normalized(&doc));

        let types: Vec<BlockType> = doc
            .children(doc.root())
            .iter()
            .filter_map(|k| doc.block_type(*k))
            .collect();
        assert_eq!(types.len(), 300);
        assert_eq!(
            &types[..3],
            &[BlockType::Paragraph, BlockType::BulletedList, BlockType::Paragraph]
        );
        assert_eq!(schema.normalize(&mut doc).unwrap(), 0);
    }

    struct Flipper;

    impl SchemaRule for Flipper {
        fn name(&self) -> &'static str {
            "flipper"
        }

        fn scope(&self) -> RuleScope {
            RuleScope::AnyBlock
        }

        fn validate(&self, _doc: &Document, _key: NodeKey) -> bool {
            false
        }

        fn repair(&self, _doc: &mut Document, _key: NodeKey) -> Result<(), CommandError> {
            Ok(())
        }
    }

    #[test]
    fn runaway_rule_hits_the_bound() {
        let schema = Schema::empty().with_rule(Flipper);
        let mut doc = Document::from_specs([NodeSpec::paragraph("x")]);
        let bound = Schema::iteration_bound(doc.len());
        assert_eq!(
            schema.normalize(&mut doc),
            Err(CommandError::NormalizationNonTermination { iterations: bound })
        );
    }
}
