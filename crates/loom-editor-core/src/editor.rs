//! The editor façade.
//!
//! [`Editor`] owns the current snapshot and everything that acts on it: the
//! schema, the input chain and keybindings, the decoration tokenizer, the
//! commit scheduler and the table of outstanding file reads. Hosts feed it
//! events and toolbar actions, render from it, and receive commits through
//! the callback installed with [`Editor::on_commit`].

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine as _;
use web_time::Instant;

use crate::actions::{Command, KeybindingConfig};
use crate::commit::{self, Commit, CommitScheduler, CommitTrigger};
use crate::config::EditorConfig;
use crate::decorate::{Decoration, DecorationCache};
use crate::document::Document;
use crate::error::CommandError;
use crate::execute::{EditorState, execute_batch};
use crate::grammar::{MarkdownGrammar, Tokenizer};
use crate::input::{FilePayload, InputChain, InputContext, InputEvent, InputOutcome};
use crate::render::{RenderTable, render_document};
use crate::schema::Schema;
use crate::selection::Range;
use crate::serialize::{html, markdown};
use crate::types::{BlockType, InlineType, MarkType};

type CommitCallback = Box<dyn FnMut(&str, Option<&str>)>;

/// A file the host should read and hand back through
/// [`Editor::complete_file_read`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub id: u64,
    pub file: FilePayload,
}

/// How the editor dealt with an input event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputResponse {
    /// Consumed; the host should suppress its default behaviour.
    Handled,
    /// Not ours; let the host's surface handle it.
    PassThrough,
    /// Consumed, and these files must be read before anything is inserted.
    Pending(Vec<ReadRequest>),
}

#[derive(Debug, Clone)]
struct PendingRead {
    file: FilePayload,
    revision: u64,
    target: Option<Range>,
}

pub struct Editor {
    state: EditorState,
    schema: Schema,
    config: EditorConfig,
    keybindings: KeybindingConfig,
    input: InputChain,
    tokenizer: Box<dyn Tokenizer>,
    decorations: DecorationCache,
    scheduler: CommitScheduler,
    on_commit: Option<CommitCallback>,
    pending_reads: HashMap<u64, PendingRead>,
    next_request_id: u64,
}

impl std::fmt::Debug for Editor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Editor")
            .field("revision", &self.state.revision)
            .field("config", &self.config)
            .field("pending_reads", &self.pending_reads.len())
            .field("has_commit_callback", &self.on_commit.is_some())
            .finish_non_exhaustive()
    }
}

impl Editor {
    /// An editor over an empty document.
    pub fn new(config: EditorConfig) -> Result<Self, CommandError> {
        Self::with_document(Document::new(), config)
    }

    /// An editor over a document parsed from the markup form.
    pub fn from_html(markup: &str, config: EditorConfig) -> Result<Self, CommandError> {
        let doc = Document::from_specs(html::deserialize(markup));
        Self::with_document(doc, config)
    }

    pub fn with_document(doc: Document, config: EditorConfig) -> Result<Self, CommandError> {
        let schema = Schema::default();
        let state = EditorState::new(doc, &schema)?;
        tracing::debug!(
            target: "loom::editor",
            editor_id = ?config.editor_id,
            blocks = state.document.leaf_blocks().len(),
            "editor created"
        );
        Ok(Self {
            state,
            schema,
            keybindings: KeybindingConfig::default_for_platform(config.mac),
            input: InputChain::default(),
            tokenizer: Box::new(MarkdownGrammar::default()),
            decorations: DecorationCache::new(),
            scheduler: CommitScheduler::new(Duration::from_millis(config.commit_debounce_ms)),
            on_commit: None,
            pending_reads: HashMap::new(),
            next_request_id: 1,
            config,
        })
    }

    /// Replace the decoration tokenizer.
    pub fn with_tokenizer(mut self, tokenizer: impl Tokenizer + 'static) -> Self {
        self.tokenizer = Box::new(tokenizer);
        self.decorations.clear();
        self
    }

    pub fn with_input_chain(mut self, chain: InputChain) -> Self {
        self.input = chain;
        self
    }

    pub fn with_keybindings(mut self, keybindings: KeybindingConfig) -> Self {
        self.keybindings = keybindings;
        self
    }

    /// Install the commit callback. It receives the serialized content and
    /// the configured editor id.
    pub fn on_commit(&mut self, callback: impl FnMut(&str, Option<&str>) + 'static) {
        self.on_commit = Some(Box::new(callback));
    }

    pub fn state(&self) -> &EditorState {
        &self.state
    }

    pub fn document(&self) -> &Document {
        &self.state.document
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    /// Run commands as one batch. On failure the current snapshot is kept and
    /// `false` is returned.
    pub fn apply(&mut self, commands: &[Command]) -> bool {
        if commands.is_empty() {
            return false;
        }
        match execute_batch(&self.state, &self.schema, commands) {
            Ok(next) => {
                self.state = next;
                true
            }
            Err(CommandError::StaleReference { key }) => {
                tracing::debug!(target: "loom::editor", %key, "stale reference, batch dropped");
                false
            }
            Err(err @ CommandError::NormalizationNonTermination { .. }) => {
                tracing::error!(target: "loom::editor", %err, "keeping last valid snapshot");
                false
            }
            Err(err @ CommandError::InvalidTarget { .. }) => {
                tracing::debug!(target: "loom::editor", %err, "batch dropped");
                false
            }
        }
    }

    pub fn select(&mut self, range: Range) -> bool {
        self.apply(&[Command::Select { range }])
    }

    // === Input ===

    /// Interpret one input event. Key events also feed the commit debounce.
    pub fn handle_event(&mut self, event: &InputEvent, now: Instant) -> InputResponse {
        let outcome = {
            let ctx = InputContext {
                state: &self.state,
                keybindings: &self.keybindings,
                image_extensions: &self.config.image_extensions,
            };
            self.input.handle(&ctx, event)
        };

        let (response, changed) = match outcome {
            None => (InputResponse::PassThrough, false),
            Some(InputOutcome::Commands(commands)) => {
                let mutates = commands.iter().any(Command::is_mutation);
                let applied = self.apply(&commands);
                (InputResponse::Handled, applied && mutates)
            }
            Some(InputOutcome::ReadFiles { files, target }) => {
                (InputResponse::Pending(self.request_reads(files, target)), false)
            }
        };

        match event {
            InputEvent::Key(_) => self.scheduler.note_keystroke(now, changed),
            _ if changed => self.scheduler.note_change(),
            _ => {}
        }
        response
    }

    fn request_reads(&mut self, files: Vec<FilePayload>, target: Option<Range>) -> Vec<ReadRequest> {
        let mut requests = Vec::with_capacity(files.len());
        for file in files {
            let id = self.next_request_id;
            self.next_request_id += 1;
            self.pending_reads.insert(
                id,
                PendingRead {
                    file: file.clone(),
                    revision: self.state.revision,
                    target,
                },
            );
            tracing::trace!(target: "loom::editor", id, name = %file.name, "file read requested");
            requests.push(ReadRequest { id, file });
        }
        requests
    }

    /// Hand back the bytes of a requested file. The file is inserted as an
    /// image at the target captured when it was requested. Unknown requests
    /// and targets that no longer exist are ignored.
    pub fn complete_file_read(&mut self, id: u64, bytes: &[u8]) -> bool {
        let Some(read) = self.pending_reads.remove(&id) else {
            tracing::debug!(target: "loom::editor", id, "completion for unknown request");
            return false;
        };
        if read.revision != self.state.revision {
            if let Some(target) = read.target {
                let doc = &self.state.document;
                if !doc.contains(target.anchor.key) || !doc.contains(target.focus.key) {
                    tracing::debug!(
                        target: "loom::editor",
                        id,
                        requested_at = read.revision,
                        revision = self.state.revision,
                        "drop target no longer exists"
                    );
                    return false;
                }
            }
        }

        let src = format!(
            "data:{};base64,{}",
            read.file.mime,
            base64::engine::general_purpose::STANDARD.encode(bytes)
        );
        let mut commands = Vec::with_capacity(2);
        if let Some(range) = read.target {
            commands.push(Command::Select { range });
        }
        commands.push(Command::insert_image(&src));
        let inserted = self.apply(&commands);
        if inserted {
            self.scheduler.note_change();
            tracing::debug!(target: "loom::editor", id, name = %read.file.name, "image inserted");
        }
        inserted
    }

    pub fn pending_reads(&self) -> usize {
        self.pending_reads.len()
    }

    // === Output ===

    /// Decorations for the current snapshot. Unchanged blocks reuse their
    /// previous spans.
    pub fn decorations(&mut self) -> Vec<Decoration> {
        self.decorations
            .decorate(&self.state.document, self.tokenizer.as_ref())
    }

    pub fn render<V>(&mut self, table: &RenderTable<V>) -> V {
        let decorations = self.decorations();
        render_document(&self.state, &decorations, table)
    }

    pub fn to_html(&self) -> String {
        html::serialize(&self.state.document)
    }

    pub fn to_markdown(&self) -> String {
        markdown::to_markdown(&self.state.document)
    }

    /// The document in the configured commit form.
    pub fn commit_content(&self) -> String {
        commit::commit_content(&self.state.document, self.config.commit_format)
    }

    /// Commit if the debounce gap since the last keystroke has elapsed.
    pub fn poll_commit(&mut self, now: Instant) -> Option<Commit> {
        if !self.scheduler.should_fire(now) {
            return None;
        }
        Some(self.commit_now(CommitTrigger::Debounced))
    }

    /// Serialize and hand the document to the commit callback right away.
    pub fn commit_now(&mut self, trigger: CommitTrigger) -> Commit {
        let content = self.commit_content();
        let editor_id = self.config.editor_id.clone();
        if let Some(callback) = self.on_commit.as_mut() {
            callback(&content, editor_id.as_deref());
        }
        self.scheduler.mark_committed();
        tracing::debug!(
            target: "loom::commit",
            ?trigger,
            revision = self.state.revision,
            bytes = content.len(),
            "committed"
        );
        Commit {
            content,
            editor_id,
            trigger,
        }
    }

    /// The initial commit a host expects once the editor is on screen.
    pub fn mount(&mut self) -> Commit {
        self.commit_now(CommitTrigger::Mount)
    }

    /// Replace the document with one parsed from markup. Outstanding file
    /// reads are forgotten.
    pub fn reset(&mut self, markup: &str) -> Result<(), CommandError> {
        let doc = Document::from_specs(html::deserialize(markup));
        let mut state = EditorState::new(doc, &self.schema)?;
        state.revision = self.state.revision + 1;
        self.state = state;
        if !self.pending_reads.is_empty() {
            tracing::debug!(
                target: "loom::editor",
                dropped = self.pending_reads.len(),
                "reset discards pending reads"
            );
        }
        self.pending_reads.clear();
        self.decorations.clear();
        self.scheduler.mark_committed();
        Ok(())
    }

    // === Toolbar ===

    /// Toggle a block type over the selection. List types wrap or lift the
    /// selected blocks; other types retype them, lifting them out of any list.
    pub fn toggle_block(&mut self, block_type: BlockType) -> Commit {
        let in_list = self.has_block(BlockType::ListItem);
        let mut commands = Vec::new();

        if !block_type.is_list() {
            let target = if self.has_block(block_type) {
                BlockType::Paragraph
            } else {
                block_type
            };
            commands.push(Command::set_blocks(target));
            if in_list {
                commands.push(Command::unwrap_block(BlockType::BulletedList));
                commands.push(Command::unwrap_block(BlockType::NumberedList));
            }
        } else if in_list && self.in_list_of(block_type) {
            commands.push(Command::set_blocks(BlockType::Paragraph));
            commands.push(Command::unwrap_block(BlockType::BulletedList));
            commands.push(Command::unwrap_block(BlockType::NumberedList));
        } else if in_list {
            let other = if block_type == BlockType::BulletedList {
                BlockType::NumberedList
            } else {
                BlockType::BulletedList
            };
            commands.push(Command::unwrap_block(other));
            commands.push(Command::wrap_block(block_type));
        } else {
            commands.push(Command::set_blocks(BlockType::ListItem));
            commands.push(Command::wrap_block(block_type));
        }

        tracing::debug!(target: "loom::editor", %block_type, "toolbar block");
        self.apply(&commands);
        self.commit_now(CommitTrigger::Toolbar)
    }

    pub fn toggle_mark(&mut self, mark: MarkType) -> Commit {
        self.apply(&[Command::toggle_mark(mark)]);
        self.commit_now(CommitTrigger::Toolbar)
    }

    /// Remove links under the selection, or link it to `href`. A collapsed
    /// selection needs `text`, which is inserted at the caret and linked.
    pub fn toggle_link(&mut self, href: &str, text: Option<&str>) -> Commit {
        let commands = if self.has_links() {
            vec![Command::unwrap_link()]
        } else if self.state.selection.is_expanded() {
            vec![Command::wrap_link(href), Command::MoveToEnd]
        } else {
            match text.filter(|t| !t.is_empty()) {
                Some(text) => vec![
                    Command::insert_text(text),
                    Command::MoveFocusBackward {
                        count: text.chars().count(),
                    },
                    Command::wrap_link(href),
                    Command::MoveToEnd,
                ],
                None => {
                    tracing::debug!(target: "loom::editor", "link on a collapsed selection needs text");
                    Vec::new()
                }
            }
        };
        self.apply(&commands);
        self.commit_now(CommitTrigger::Toolbar)
    }

    /// Insert an image block at `target`, or at the caret.
    pub fn insert_image(&mut self, src: &str, target: Option<Range>) -> Commit {
        let mut commands = Vec::with_capacity(2);
        if let Some(range) = target {
            commands.push(Command::Select { range });
        }
        commands.push(Command::insert_image(src));
        self.apply(&commands);
        self.commit_now(CommitTrigger::Toolbar)
    }

    // === Queries ===

    pub fn has_mark(&self, mark: MarkType) -> bool {
        let sel = &self.state.selection;
        match (&sel.marks, sel.is_collapsed()) {
            (Some(marks), true) => marks.contains(&mark),
            _ => self
                .state
                .document
                .marks_in_range(&sel.range)
                .contains(&mark),
        }
    }

    pub fn has_block(&self, block_type: BlockType) -> bool {
        let doc = &self.state.document;
        doc.blocks_in_range(&self.state.selection.range)
            .into_iter()
            .any(|b| doc.block_type(b) == Some(block_type))
    }

    pub fn has_links(&self) -> bool {
        !self
            .state
            .document
            .inlines_in_range(&self.state.selection.range, InlineType::Link)
            .is_empty()
    }

    /// Whether the toolbar button for a list type shows as active: the
    /// selection is in list items and the first one sits in that list type.
    pub fn is_list_active(&self, list_type: BlockType) -> bool {
        if !self.has_block(BlockType::ListItem) {
            return false;
        }
        let doc = &self.state.document;
        doc.blocks_in_range(&self.state.selection.range)
            .first()
            .and_then(|b| doc.parent(*b))
            .and_then(|p| doc.block_type(p))
            == Some(list_type)
    }

    fn in_list_of(&self, list_type: BlockType) -> bool {
        let doc = &self.state.document;
        doc.blocks_in_range(&self.state.selection.range)
            .into_iter()
            .any(|b| doc.closest(b, |n| n.block_type() == Some(list_type)).is_some())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::config::CommitFormat;
    use crate::input::DataTransfer;

    fn html_config() -> EditorConfig {
        EditorConfig {
            commit_format: CommitFormat::Html,
            ..EditorConfig::default()
        }
    }

    fn editor(markup: &str) -> Editor {
        Editor::from_html(markup, html_config()).unwrap()
    }

    fn root_types(editor: &Editor) -> Vec<BlockType> {
        let doc = editor.document();
        doc.children(doc.root())
            .iter()
            .filter_map(|k| doc.block_type(*k))
            .collect()
    }

    #[test]
    fn heading_toggles_back_to_paragraph() {
        let mut ed = editor("<p>Title</p>");
        ed.toggle_block(BlockType::HeadingOne);
        assert!(ed.has_block(BlockType::HeadingOne));
        assert_eq!(root_types(&ed)[0], BlockType::HeadingOne);

        ed.toggle_block(BlockType::HeadingOne);
        assert!(!ed.has_block(BlockType::HeadingOne));
        assert_eq!(root_types(&ed)[0], BlockType::Paragraph);
        assert_eq!(ed.document().text_content(ed.document().leaf_blocks()[0]), "Title");
    }

    #[test]
    fn list_buttons_wrap_switch_and_lift() {
        let mut ed = editor("<p>a</p>");
        ed.toggle_block(BlockType::BulletedList);
        assert_eq!(root_types(&ed), vec![BlockType::BulletedList, BlockType::Paragraph]);
        assert!(ed.is_list_active(BlockType::BulletedList));
        assert!(!ed.is_list_active(BlockType::NumberedList));

        ed.toggle_block(BlockType::NumberedList);
        assert_eq!(root_types(&ed), vec![BlockType::NumberedList, BlockType::Paragraph]);
        assert!(ed.is_list_active(BlockType::NumberedList));

        ed.toggle_block(BlockType::NumberedList);
        assert_eq!(root_types(&ed), vec![BlockType::Paragraph, BlockType::Paragraph]);
        assert!(!ed.has_block(BlockType::ListItem));
    }

    #[test]
    fn link_on_caret_inserts_text() {
        let mut ed = editor("<p>go </p>");
        let block = ed.document().leaf_blocks()[0];
        let end = ed.document().end_of(block).unwrap();
        assert!(ed.select(Range::collapsed(end)));

        ed.toggle_link("https://x.test", Some("here"));
        insta::assert_snapshot!(ed.document().outline(), @r#"
        paragraph
          "go "
          link href="https://x.test"
            "here"
        "#);
        assert!(ed.has_links());
        assert!(ed.state().selection.is_collapsed());

        ed.toggle_link("https://x.test", None);
        assert!(!ed.has_links());
        assert_eq!(ed.to_html(), "<p>go here</p>");
    }

    #[test]
    fn link_on_caret_without_text_does_nothing() {
        let mut ed = editor("<p>go</p>");
        let before = ed.state().clone();
        ed.toggle_link("https://x.test", None);
        assert_eq!(ed.state(), &before);
    }

    #[test]
    fn file_read_inserts_one_image() {
        let mut ed = editor("<p>a</p>");
        let target = ed.state().selection.range;
        let event = InputEvent::Drop {
            transfer: DataTransfer::Files(vec![FilePayload::new("cat.png", "image/png")]),
            target: Some(target),
        };
        let InputResponse::Pending(requests) = ed.handle_event(&event, Instant::now()) else {
            panic!("expected a pending read");
        };
        assert_eq!(requests.len(), 1);
        assert_eq!(ed.pending_reads(), 1);

        assert!(ed.complete_file_read(requests[0].id, b"png"));
        assert!(!ed.complete_file_read(requests[0].id, b"png"));

        let doc = ed.document();
        let images: Vec<_> = doc
            .leaf_blocks()
            .into_iter()
            .filter(|b| doc.block_type(*b) == Some(BlockType::Image))
            .collect();
        assert_eq!(images.len(), 1);
        let src = doc.get(images[0]).and_then(|n| n.data()).and_then(|d| d.src());
        assert_eq!(src, Some("data:image/png;base64,cG5n"));
    }

    #[test]
    fn read_for_removed_target_is_ignored() {
        let mut ed = editor("<p>a</p><p>b</p>");
        let second = ed.document().leaf_blocks()[1];
        let start = ed.document().start_of(second).unwrap();
        let event = InputEvent::Drop {
            transfer: DataTransfer::Files(vec![FilePayload::new("cat.gif", "image/gif")]),
            target: Some(Range::collapsed(start)),
        };
        let InputResponse::Pending(requests) = ed.handle_event(&event, Instant::now()) else {
            panic!("expected a pending read");
        };

        assert!(ed.apply(&[Command::RemoveNodeByKey { key: second }]));
        assert!(!ed.complete_file_read(requests[0].id, b"gif"));
        assert!(
            ed.document()
                .leaf_blocks()
                .iter()
                .all(|b| ed.document().block_type(*b) != Some(BlockType::Image))
        );
    }

    #[test]
    fn reset_forgets_pending_reads() {
        let mut ed = editor("<p>a</p>");
        let event = InputEvent::Paste(DataTransfer::Files(vec![FilePayload::new(
            "cat.png",
            "image/png",
        )]));
        let InputResponse::Pending(requests) = ed.handle_event(&event, Instant::now()) else {
            panic!("expected a pending read");
        };
        let revision = ed.state().revision;
        ed.reset("<p>b</p>").unwrap();
        assert!(ed.state().revision > revision);
        assert_eq!(ed.pending_reads(), 0);
        assert!(!ed.complete_file_read(requests[0].id, b"png"));
    }

    #[test]
    fn toolbar_commits_through_callback() {
        let seen: Rc<RefCell<Vec<(String, Option<String>)>>> = Rc::default();
        let sink = Rc::clone(&seen);
        let mut ed = Editor::from_html("<p>a</p>", html_config().with_editor_id("body")).unwrap();
        ed.on_commit(move |content, id| {
            sink.borrow_mut()
                .push((content.to_string(), id.map(str::to_string)));
        });

        let commit = ed.mount();
        assert_eq!(commit.trigger, CommitTrigger::Mount);
        let commit = ed.toggle_block(BlockType::HeadingOne);
        assert_eq!(commit.trigger, CommitTrigger::Toolbar);
        assert!(commit.content.starts_with("<h1>a</h1>"));

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], ("<p>a</p>".to_string(), Some("body".to_string())));
        assert_eq!(seen[1].1.as_deref(), Some("body"));
    }
}
