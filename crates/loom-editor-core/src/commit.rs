//! Commit scheduling: when the serialized document goes out to the host.
//!
//! Keystrokes arm a debounce; [`CommitScheduler::should_fire`] reports true
//! once the idle gap has passed with content still pending. Toolbar actions
//! and mounting bypass the debounce.

use std::time::Duration;

use web_time::Instant;

use crate::config::CommitFormat;
use crate::document::Document;
use crate::serialize::{html, markdown};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitTrigger {
    /// The idle gap after typing elapsed.
    Debounced,
    /// A toolbar action ran.
    Toolbar,
    /// The editor was mounted.
    Mount,
}

/// What the host's commit callback receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub content: String,
    pub editor_id: Option<String>,
    pub trigger: CommitTrigger,
}

#[derive(Debug, Clone)]
pub struct CommitScheduler {
    debounce: Duration,
    last_keystroke: Option<Instant>,
    pending: bool,
}

impl CommitScheduler {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            last_keystroke: None,
            pending: false,
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Record a key event. `changed` says whether it altered the content.
    pub fn note_keystroke(&mut self, now: Instant, changed: bool) {
        self.last_keystroke = Some(now);
        self.pending |= changed;
    }

    /// Mark content as changed without restarting the idle timer.
    pub fn note_change(&mut self) {
        self.pending = true;
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn should_fire(&self, now: Instant) -> bool {
        if !self.pending {
            return false;
        }
        match self.last_keystroke {
            Some(last) => now.saturating_duration_since(last) >= self.debounce,
            None => true,
        }
    }

    pub fn mark_committed(&mut self) {
        self.pending = false;
        self.last_keystroke = None;
    }
}

/// Serialize a document in the commit form.
pub fn commit_content(doc: &Document, format: CommitFormat) -> String {
    let markup = html::serialize(doc);
    match format {
        CommitFormat::Html => markup,
        CommitFormat::FilteredMarkdown { unwrap } => markdown::render_filtered(&markup, unwrap),
    }
}
