//! loom-editor-core: headless rich-text editing without a paint layer.
//!
//! This crate provides:
//! - `Document` - arena-backed block/inline/text tree with formatting marks
//! - `Command` and `execute_batch` - snapshot-in, snapshot-out mutations
//! - `Schema` - declarative normalization rules run to a fixed point
//! - `InputChain` - keystrokes, paste and drop turned into commands
//! - Syntax decorations from an injectable `Tokenizer`
//! - HTML import/export and a filtered Markdown renderer
//! - `RenderTable` - per-type render callbacks for any host view type
//! - `Editor` - the façade tying these together, with debounced commits

pub mod actions;
pub mod commit;
pub mod config;
pub mod decorate;
pub mod document;
pub mod editor;
pub mod error;
pub mod execute;
pub mod grammar;
pub mod input;
pub mod render;
pub mod schema;
pub mod selection;
pub mod serialize;
pub mod text;
pub mod types;


pub use actions::{Command, Key, KeyCombo, KeybindingConfig, Modifiers};
pub use commit::{Commit, CommitScheduler, CommitTrigger, commit_content};
pub use config::{CommitFormat, EditorConfig};
pub use decorate::{Decoration, DecorationCache, decorate_block, decorate_document};
pub use document::{Document, Node, NodeKind, NodeSpec};
pub use editor::{Editor, InputResponse, ReadRequest};
pub use error::{CommandError, ConfigError};
pub use execute::{EditorState, execute_batch, execute_command};
pub use grammar::{GrammarRule, MarkdownGrammar, Token, Tokenizer};
pub use input::{DataTransfer, FilePayload, InputChain, InputEvent, InputHandler, InputOutcome};
pub use render::{ElementKind, MarkProps, NodeProps, RenderTable, html_surface, render_document};
pub use schema::Schema;
pub use selection::{Position, Range, Selection};
pub use smol_str::SmolStr;
pub use text::{Mark, Text};
pub use types::{BlockType, InlineType, MarkSet, MarkType, NodeData, NodeKey};
