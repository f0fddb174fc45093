//! Input interpretation: keystrokes, paste and drop become commands.
//!
//! Handlers form an explicit chain. Each one either handles the event and
//! returns an outcome, or delegates with [`Flow::Next`]. The default chain is
//! hotkeys → space autoformat → backspace → enter → paste/drop → default
//! editing. An event nobody handles passes through to the host.

use smol_str::SmolStr;

use crate::actions::{Command, Key, KeyCombo, KeybindingConfig};
use crate::execute::EditorState;
use crate::selection::{Position, Range};
use crate::types::{BlockType, NodeKey};

/// A file offered by a paste or drop. The bytes are read asynchronously by
/// the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePayload {
    pub name: SmolStr,
    pub mime: SmolStr,
}

impl FilePayload {
    pub fn new(name: impl Into<SmolStr>, mime: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
        }
    }

    /// MIME top-level type is `image`.
    pub fn is_image(&self) -> bool {
        self.mime
            .split('/')
            .next()
            .is_some_and(|top| top.eq_ignore_ascii_case("image"))
    }
}

/// Payload of a paste or drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataTransfer {
    Files(Vec<FilePayload>),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Key(KeyCombo),
    Paste(DataTransfer),
    /// `target` is the resolved drop point, if the host could resolve one.
    Drop {
        transfer: DataTransfer,
        target: Option<Range>,
    },
}

/// What a handler decided.
#[derive(Debug, Clone, PartialEq)]
pub enum InputOutcome {
    /// Run as one batch.
    Commands(Vec<Command>),
    /// Read these files, then insert each as an image at `target`.
    ReadFiles {
        files: Vec<FilePayload>,
        target: Option<Range>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Handled(InputOutcome),
    Next,
}

/// Everything a handler may look at.
pub struct InputContext<'a> {
    pub state: &'a EditorState,
    pub keybindings: &'a KeybindingConfig,
    pub image_extensions: &'a [String],
}

impl InputContext<'_> {
    /// Caret position and its leaf block, for a collapsed selection on text.
    fn caret_in_text(&self) -> Option<(Position, NodeKey)> {
        let sel = &self.state.selection;
        if sel.is_expanded() {
            return None;
        }
        let caret = sel.focus();
        let doc = &self.state.document;
        doc.text(caret.key)?;
        Some((caret, doc.block_of(&caret)?))
    }
}

pub trait InputHandler {
    fn name(&self) -> &'static str;

    fn handle(&self, ctx: &InputContext<'_>, event: &InputEvent) -> Flow;
}

pub struct InputChain {
    handlers: Vec<Box<dyn InputHandler>>,
}

impl Default for InputChain {
    fn default() -> Self {
        Self {
            handlers: vec![
                Box::new(HotkeyHandler),
                Box::new(SpaceAutoformat),
                Box::new(BackspaceHandler),
                Box::new(EnterHandler),
                Box::new(TransferHandler),
                Box::new(DefaultEditing),
            ],
        }
    }
}

impl InputChain {
    pub fn empty() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a handler at the front of the chain.
    pub fn prepend(&mut self, handler: impl InputHandler + 'static) {
        self.handlers.insert(0, Box::new(handler));
    }

    pub fn push(&mut self, handler: impl InputHandler + 'static) {
        self.handlers.push(Box::new(handler));
    }

    /// Run the chain. `None` means pass the event through.
    pub fn handle(&self, ctx: &InputContext<'_>, event: &InputEvent) -> Option<InputOutcome> {
        for handler in &self.handlers {
            if let Flow::Handled(outcome) = handler.handle(ctx, event) {
                tracing::trace!(target: "loom::input", handler = handler.name(), "handled");
                return Some(outcome);
            }
        }
        tracing::trace!(target: "loom::input", ?event, "passed through");
        None
    }
}

/// Block type a markdown-ish line prefix turns into.
pub fn block_type_for_prefix(chars: &str) -> Option<BlockType> {
    match chars {
        "*" | "-" | "+" => Some(BlockType::ListItem),
        ">" => Some(BlockType::BlockQuote),
        hashes if !hashes.is_empty() && hashes.chars().all(|c| c == '#') => {
            BlockType::heading(hashes.len())
        }
        _ => None,
    }
}

/// Whether `text` is a URL with a host.
pub fn is_url(text: &str) -> bool {
    url::Url::parse(text.trim()).is_ok_and(|u| u.has_host())
}

/// Whether the URL's path ends in one of `extensions`.
pub fn is_image_url(text: &str, extensions: &[String]) -> bool {
    let Ok(parsed) = url::Url::parse(text.trim()) else {
        return false;
    };
    let Some(ext) = parsed.path().rsplit_once('.').map(|(_, ext)| ext) else {
        return false;
    };
    extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
}

fn handled(commands: Vec<Command>) -> Flow {
    Flow::Handled(InputOutcome::Commands(commands))
}

pub struct HotkeyHandler;

impl InputHandler for HotkeyHandler {
    fn name(&self) -> &'static str {
        "hotkeys"
    }

    fn handle(&self, ctx: &InputContext<'_>, event: &InputEvent) -> Flow {
        let InputEvent::Key(combo) = event else {
            return Flow::Next;
        };
        match ctx.keybindings.lookup(combo) {
            Some(mark) => handled(vec![Command::toggle_mark(mark)]),
            None => Flow::Next,
        }
    }
}

/// Markdown-style shortcuts typed at the start of a block: `#` through
/// `######`, `*`/`-`/`+` and `>` followed by a space.
pub struct SpaceAutoformat;

impl InputHandler for SpaceAutoformat {
    fn name(&self) -> &'static str {
        "space-autoformat"
    }

    fn handle(&self, ctx: &InputContext<'_>, event: &InputEvent) -> Flow {
        let InputEvent::Key(combo) = event else {
            return Flow::Next;
        };
        if !combo.key.is_space() || combo.modifiers.has_command() {
            return Flow::Next;
        }
        let Some((caret, block)) = ctx.caret_in_text() else {
            return Flow::Next;
        };
        let doc = &ctx.state.document;
        let offset = doc.block_offset(&caret);
        let chars: String = doc
            .text_content(block)
            .chars()
            .take(offset)
            .filter(|c| !c.is_whitespace())
            .collect();
        let Some(block_type) = block_type_for_prefix(&chars) else {
            return Flow::Next;
        };
        if block_type == BlockType::ListItem && doc.block_type(block) == Some(BlockType::ListItem)
        {
            return Flow::Next;
        }

        let mut commands = vec![Command::set_blocks(block_type)];
        if block_type == BlockType::ListItem {
            commands.push(Command::wrap_block(BlockType::BulletedList));
        }
        commands.push(Command::MoveFocusToStartOfNode { key: block });
        commands.push(Command::Delete);
        tracing::debug!(target: "loom::input", %block_type, prefix = %chars, "autoformat");
        handled(commands)
    }
}

/// Backspace at the start of a non-paragraph block resets it to a paragraph,
/// lifting list items out of their list.
pub struct BackspaceHandler;

impl BackspaceHandler {
    fn reset_block(ctx: &InputContext<'_>) -> Flow {
        let Some((caret, block)) = ctx.caret_in_text() else {
            return Flow::Next;
        };
        let doc = &ctx.state.document;
        if doc.block_offset(&caret) != 0 {
            return Flow::Next;
        }
        let Some(block_type) = doc.block_type(block) else {
            return Flow::Next;
        };
        if block_type == BlockType::Paragraph {
            return Flow::Next;
        }

        let mut commands = vec![Command::set_blocks(BlockType::Paragraph)];
        if block_type == BlockType::ListItem {
            let list = doc
                .parent(block)
                .and_then(|p| doc.block_type(p))
                .filter(BlockType::is_list)
                .unwrap_or(BlockType::BulletedList);
            commands.push(Command::unwrap_block(list));
        }
        handled(commands)
    }
}

impl InputHandler for BackspaceHandler {
    fn name(&self) -> &'static str {
        "backspace"
    }

    fn handle(&self, ctx: &InputContext<'_>, event: &InputEvent) -> Flow {
        match event {
            InputEvent::Key(combo) if combo.key == Key::Backspace => Self::reset_block(ctx),
            _ => Flow::Next,
        }
    }
}

/// Enter at the end of a heading or block quote starts a fresh paragraph.
pub struct EnterHandler;

impl InputHandler for EnterHandler {
    fn name(&self) -> &'static str {
        "enter"
    }

    fn handle(&self, ctx: &InputContext<'_>, event: &InputEvent) -> Flow {
        let InputEvent::Key(combo) = event else {
            return Flow::Next;
        };
        if combo.key != Key::Enter {
            return Flow::Next;
        }
        let Some((caret, block)) = ctx.caret_in_text() else {
            return Flow::Next;
        };
        let doc = &ctx.state.document;
        let offset = doc.block_offset(&caret);
        let len = doc.text_len(block);
        if offset == 0 && len == 0 {
            return BackspaceHandler::reset_block(ctx);
        }
        if offset != len {
            return Flow::Next;
        }
        match doc.block_type(block) {
            Some(t) if t.is_heading() || t == BlockType::BlockQuote => handled(vec![
                Command::SplitBlock,
                Command::set_blocks(BlockType::Paragraph),
            ]),
            _ => Flow::Next,
        }
    }
}

/// Image files and image URLs dropped or pasted into the document.
pub struct TransferHandler;

impl InputHandler for TransferHandler {
    fn name(&self) -> &'static str {
        "paste-drop"
    }

    fn handle(&self, ctx: &InputContext<'_>, event: &InputEvent) -> Flow {
        let (transfer, target) = match event {
            InputEvent::Paste(transfer) => (transfer, Some(ctx.state.selection.range)),
            InputEvent::Drop {
                transfer,
                target: Some(target),
            } => (transfer, Some(*target)),
            InputEvent::Drop { target: None, .. } => {
                tracing::debug!(target: "loom::input", "drop without a target");
                return Flow::Next;
            }
            InputEvent::Key(_) => return Flow::Next,
        };

        match transfer {
            DataTransfer::Files(files) => {
                let images: Vec<FilePayload> =
                    files.iter().filter(|f| f.is_image()).cloned().collect();
                if images.is_empty() {
                    tracing::warn!(
                        target: "loom::input",
                        files = files.len(),
                        "no image files in transfer"
                    );
                    return Flow::Next;
                }
                Flow::Handled(InputOutcome::ReadFiles {
                    files: images,
                    target,
                })
            }
            DataTransfer::Text(text) => {
                if !is_url(text) || !is_image_url(text, ctx.image_extensions) {
                    return Flow::Next;
                }
                let mut commands = Vec::with_capacity(2);
                if let Some(range) = target {
                    commands.push(Command::Select { range });
                }
                commands.push(Command::insert_image(text.trim()));
                handled(commands)
            }
        }
    }
}

/// Plain editing: typing, deletion and block splitting.
pub struct DefaultEditing;

impl InputHandler for DefaultEditing {
    fn name(&self) -> &'static str {
        "default-editing"
    }

    fn handle(&self, _ctx: &InputContext<'_>, event: &InputEvent) -> Flow {
        match event {
            InputEvent::Key(combo) => {
                if combo.modifiers.has_command() {
                    return Flow::Next;
                }
                match &combo.key {
                    Key::Character(s) => handled(vec![Command::insert_text(s.as_str())]),
                    Key::Space => handled(vec![Command::insert_text(" ")]),
                    Key::Backspace => handled(vec![Command::DeleteBackward { count: 1 }]),
                    Key::Delete => handled(vec![Command::DeleteForward { count: 1 }]),
                    Key::Enter => handled(vec![Command::SplitBlock]),
                    _ => Flow::Next,
                }
            }
            InputEvent::Paste(DataTransfer::Text(text)) => {
                handled(vec![Command::insert_text(text.as_str())])
            }
            InputEvent::Drop {
                transfer: DataTransfer::Text(text),
                target: Some(range),
            } => handled(vec![
                Command::Select { range: *range },
                Command::insert_text(text.as_str()),
            ]),
            _ => Flow::Next,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Modifiers;
    use crate::document::{Document, NodeSpec};
    use crate::schema::Schema;
    use crate::types::MarkType;

    fn state(specs: Vec<NodeSpec>) -> EditorState {
        EditorState::new(Document::from_specs(specs), &Schema::default()).unwrap()
    }

    fn at(state: EditorState, text_index: usize, offset: usize) -> EditorState {
        let key = state.document.texts()[text_index];
        state.with_selection(Range::collapsed(Position::new(key, offset)))
    }

    fn run(state: &EditorState, event: InputEvent) -> Option<InputOutcome> {
        let keys = KeybindingConfig::default_for_platform(false);
        let exts = vec!["png".to_string(), "jpg".to_string()];
        let ctx = InputContext {
            state,
            keybindings: &keys,
            image_extensions: &exts,
        };
        InputChain::default().handle(&ctx, &event)
    }

    fn key(k: Key) -> InputEvent {
        InputEvent::Key(KeyCombo::new(k))
    }

    #[test]
    fn prefixes() {
        assert_eq!(block_type_for_prefix("-"), Some(BlockType::ListItem));
        assert_eq!(block_type_for_prefix(">"), Some(BlockType::BlockQuote));
        assert_eq!(block_type_for_prefix("###"), Some(BlockType::HeadingThree));
        assert_eq!(block_type_for_prefix("#######"), None);
        assert_eq!(block_type_for_prefix("#a"), None);
        assert_eq!(block_type_for_prefix(""), None);
    }

    #[test]
    fn url_detection() {
        let exts = vec!["png".to_string(), "gif".to_string()];
        assert!(is_url("https://example.com/cat.png"));
        assert!(!is_url("not a url"));
        assert!(!is_url("mailto:someone@example.com"));
        assert!(is_image_url("https://example.com/cat.PNG", &exts));
        assert!(is_image_url("https://example.com/cat.gif?size=2", &exts));
        assert!(!is_image_url("https://example.com/cat.html", &exts));
    }

    #[test]
    fn hotkey_toggles_mark() {
        let s = state(vec![NodeSpec::paragraph("x")]);
        let out = run(&s, InputEvent::Key(KeyCombo::ctrl(Key::character("i"))));
        assert_eq!(
            out,
            Some(InputOutcome::Commands(vec![Command::toggle_mark(MarkType::Italic)]))
        );
    }

    #[test]
    fn space_after_hashes_autoformats() {
        let s = at(state(vec![NodeSpec::paragraph("###")]), 0, 3);
        let block = s.document.leaf_blocks()[0];
        let out = run(&s, key(Key::character(" ")));
        assert_eq!(
            out,
            Some(InputOutcome::Commands(vec![
                Command::set_blocks(BlockType::HeadingThree),
                Command::MoveFocusToStartOfNode { key: block },
                Command::Delete,
            ]))
        );
    }

    #[test]
    fn space_inside_list_item_does_not_nest() {
        let s = state(vec![NodeSpec::block(
            BlockType::BulletedList,
            vec![NodeSpec::leaf(BlockType::ListItem, "-")],
        )]);
        let s = at(s, 0, 1);
        assert_eq!(
            run(&s, key(Key::Space)),
            Some(InputOutcome::Commands(vec![Command::insert_text(" ")]))
        );
    }

    #[test]
    fn backspace_in_paragraph_falls_through_to_default() {
        let s = at(state(vec![NodeSpec::paragraph("ab")]), 0, 0);
        assert_eq!(
            run(&s, key(Key::Backspace)),
            Some(InputOutcome::Commands(vec![Command::DeleteBackward { count: 1 }]))
        );
    }

    #[test]
    fn backspace_lifts_numbered_item() {
        let s = state(vec![NodeSpec::block(
            BlockType::NumberedList,
            vec![NodeSpec::leaf(BlockType::ListItem, "one")],
        )]);
        let s = at(s, 0, 0);
        assert_eq!(
            run(&s, key(Key::Backspace)),
            Some(InputOutcome::Commands(vec![
                Command::set_blocks(BlockType::Paragraph),
                Command::unwrap_block(BlockType::NumberedList),
            ]))
        );
    }

    #[test]
    fn enter_mid_heading_delegates() {
        let s = at(state(vec![NodeSpec::leaf(BlockType::HeadingOne, "Title")]), 0, 2);
        assert_eq!(
            run(&s, key(Key::Enter)),
            Some(InputOutcome::Commands(vec![Command::SplitBlock]))
        );
    }

    #[test]
    fn drop_without_target_passes_through() {
        let s = state(vec![NodeSpec::paragraph("")]);
        let event = InputEvent::Drop {
            transfer: DataTransfer::Files(vec![FilePayload::new("a.png", "image/png")]),
            target: None,
        };
        assert_eq!(run(&s, event), None);
    }

    #[test]
    fn dropped_files_request_reads_for_images_only() {
        let s = state(vec![NodeSpec::paragraph("")]);
        let target = s.selection.range;
        let event = InputEvent::Drop {
            transfer: DataTransfer::Files(vec![
                FilePayload::new("notes.txt", "text/plain"),
                FilePayload::new("cat.png", "image/png"),
            ]),
            target: Some(target),
        };
        assert_eq!(
            run(&s, event),
            Some(InputOutcome::ReadFiles {
                files: vec![FilePayload::new("cat.png", "image/png")],
                target: Some(target),
            })
        );
    }

    #[test]
    fn pasted_image_url_inserts_image() {
        let s = state(vec![NodeSpec::paragraph("")]);
        let range = s.selection.range;
        let out = run(
            &s,
            InputEvent::Paste(DataTransfer::Text("https://example.com/cat.jpg".into())),
        );
        assert_eq!(
            out,
            Some(InputOutcome::Commands(vec![
                Command::Select { range },
                Command::insert_image("https://example.com/cat.jpg"),
            ]))
        );
    }

    #[test]
    fn navigation_passes_through() {
        let s = state(vec![NodeSpec::paragraph("")]);
        assert_eq!(run(&s, key(Key::ArrowLeft)), None);
        let combo = KeyCombo::with_modifiers(Key::character("z"), Modifiers::CTRL);
        assert_eq!(run(&s, InputEvent::Key(combo)), None);
    }
}
