//! Editor commands and keyboard input types.
//!
//! `Command` is the vocabulary of document mutations, decoupled from how it
//! was triggered (keystroke, toolbar, paste, host code). `Key`, `Modifiers`
//! and `KeyCombo` are the platform-agnostic keyboard model the input chain
//! matches against.

use std::collections::HashMap;

use smol_str::SmolStr;

use crate::document::NodeSpec;
use crate::selection::{Position, Range};
use crate::types::{BlockType, InlineType, MarkType, NodeData, NodeKey};

/// A document mutation.
///
/// Commands address the current selection unless they carry their own
/// target. Run them through [`execute_command`](crate::execute::execute_command)
/// or, as a unit, through [`execute_batch`](crate::execute::execute_batch).
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // === Blocks ===
    /// Retype every leaf block the selection touches. Voids are skipped.
    SetBlocks { block_type: BlockType },

    /// Replace the data of every leaf block the selection touches.
    SetBlockData { data: NodeData },

    /// Wrap the touched blocks in a new block of `block_type`.
    WrapBlock { block_type: BlockType },

    /// Lift the touched blocks out of their closest `block_type` ancestor.
    UnwrapBlock { block_type: BlockType },

    /// Insert a block at the caret, splitting the current block if needed.
    InsertBlock { block_type: BlockType, data: NodeData },

    /// Divide the caret's block in two at the caret.
    SplitBlock,

    // === Marks ===
    ToggleMark { mark: MarkType },
    AddMark { mark: MarkType },
    RemoveMark { mark: MarkType },

    // === Text ===
    /// Insert text at the caret, replacing any expanded selection.
    InsertText { text: String },

    /// Delete the expanded selection.
    Delete,

    /// Delete `count` chars before the caret (Backspace).
    DeleteBackward { count: usize },

    /// Delete `count` chars after the caret (Delete).
    DeleteForward { count: usize },

    // === Inlines ===
    WrapInline { inline_type: InlineType, data: NodeData },
    UnwrapInline { inline_type: InlineType },

    // === Selection ===
    Select { range: Range },
    MoveTo { position: Position },
    /// Collapse to the end of the selection.
    MoveToEnd,
    MoveToStartOfNode { key: NodeKey },
    /// Move only the focus to the start of a node, extending the selection.
    MoveFocusToStartOfNode { key: NodeKey },
    MoveFocusBackward { count: usize },

    // === Raw structure ===
    InsertNodeByKey {
        parent: NodeKey,
        index: usize,
        node: NodeSpec,
    },
    RemoveNodeByKey { key: NodeKey },
}

impl Command {
    pub fn set_blocks(block_type: BlockType) -> Self {
        Self::SetBlocks { block_type }
    }

    pub fn wrap_block(block_type: BlockType) -> Self {
        Self::WrapBlock { block_type }
    }

    pub fn unwrap_block(block_type: BlockType) -> Self {
        Self::UnwrapBlock { block_type }
    }

    pub fn toggle_mark(mark: MarkType) -> Self {
        Self::ToggleMark { mark }
    }

    pub fn insert_text(text: impl Into<String>) -> Self {
        Self::InsertText { text: text.into() }
    }

    pub fn insert_image(src: &str) -> Self {
        Self::InsertBlock {
            block_type: BlockType::Image,
            data: NodeData::new().with(NodeData::SRC, src),
        }
    }

    pub fn wrap_link(href: &str) -> Self {
        Self::WrapInline {
            inline_type: InlineType::Link,
            data: NodeData::new().with(NodeData::HREF, href),
        }
    }

    pub fn unwrap_link() -> Self {
        Self::UnwrapInline {
            inline_type: InlineType::Link,
        }
    }

    /// Whether the command changes the document rather than only the selection.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Self::Select { .. }
                | Self::MoveTo { .. }
                | Self::MoveToEnd
                | Self::MoveToStartOfNode { .. }
                | Self::MoveFocusToStartOfNode { .. }
                | Self::MoveFocusBackward { .. }
        )
    }
}

/// Key values for keyboard input.
///
/// Platform-agnostic key representation. Platform-specific code converts
/// from native key events to this enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// A character key. Carries the produced text (`"b"`, `"#"`, `"`"`).
    Character(SmolStr),
    Unidentified,
    Space,
    Backspace,
    Delete,
    Enter,
    Tab,
    Escape,
    ArrowLeft,
    ArrowRight,
    ArrowUp,
    ArrowDown,
    Home,
    End,
    PageUp,
    PageDown,
    Alt,
    Control,
    Meta,
    Shift,
    CapsLock,
}

impl Key {
    /// Create a character key.
    pub fn character(s: impl Into<SmolStr>) -> Self {
        Self::Character(s.into())
    }

    /// Space arrives either as the named key or as a `" "` character.
    pub fn is_space(&self) -> bool {
        match self {
            Self::Space => true,
            Self::Character(s) => s == " ",
            _ => false,
        }
    }

    /// Character keys compare case-insensitively in bindings.
    fn normalized(&self) -> Self {
        match self {
            Self::Character(s) => Self::Character(SmolStr::new(s.to_lowercase())),
            other => other.clone(),
        }
    }
}

/// Modifier key state for a key combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Modifiers {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
}

impl Modifiers {
    pub const NONE: Self = Self {
        ctrl: false,
        alt: false,
        shift: false,
        meta: false,
    };

    pub const CTRL: Self = Self {
        ctrl: true,
        alt: false,
        shift: false,
        meta: false,
    };

    pub const META: Self = Self {
        ctrl: false,
        alt: false,
        shift: false,
        meta: true,
    };

    /// Get the primary modifier for the platform (Cmd on Mac, Ctrl elsewhere).
    pub fn primary(is_mac: bool) -> Self {
        if is_mac { Self::META } else { Self::CTRL }
    }

    /// Whether a shortcut modifier (ctrl or meta) is held.
    pub fn has_command(&self) -> bool {
        self.ctrl || self.meta
    }
}

/// A key combination for triggering an action.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyCombo {
    pub key: Key,
    pub modifiers: Modifiers,
}

impl KeyCombo {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            modifiers: Modifiers::NONE,
        }
    }

    pub fn with_modifiers(key: Key, modifiers: Modifiers) -> Self {
        Self { key, modifiers }
    }

    pub fn ctrl(key: Key) -> Self {
        Self::with_modifiers(key, Modifiers::CTRL)
    }

    pub fn meta(key: Key) -> Self {
        Self::with_modifiers(key, Modifiers::META)
    }

    pub fn primary(key: Key, is_mac: bool) -> Self {
        Self::with_modifiers(key, Modifiers::primary(is_mac))
    }

    /// Modifiers must match exactly; only the character's case is folded.
    fn normalized(&self) -> Self {
        Self {
            key: self.key.normalized(),
            modifiers: self.modifiers,
        }
    }
}

/// Hotkey table: key combination to mark toggle.
#[derive(Debug, Clone, PartialEq)]
pub struct KeybindingConfig {
    bindings: HashMap<KeyCombo, MarkType>,
}

impl KeybindingConfig {
    /// The mark hotkeys on the platform's primary modifier:
    /// `mod+b` bold, `mod+i` italic, `mod+u` underlined, ``mod+` `` code.
    pub fn default_for_platform(is_mac: bool) -> Self {
        let mut bindings = HashMap::new();
        for (ch, mark) in [
            ("b", MarkType::Bold),
            ("i", MarkType::Italic),
            ("u", MarkType::Underlined),
            ("`", MarkType::Code),
        ] {
            bindings.insert(KeyCombo::primary(Key::character(ch), is_mac), mark);
        }
        Self { bindings }
    }

    pub fn empty() -> Self {
        Self {
            bindings: HashMap::new(),
        }
    }

    pub fn bind(&mut self, combo: KeyCombo, mark: MarkType) {
        self.bindings.insert(combo.normalized(), mark);
    }

    /// Look up a combo. Shift and character case are ignored.
    pub fn lookup(&self, combo: &KeyCombo) -> Option<MarkType> {
        self.bindings.get(&combo.normalized()).copied()
    }
}
