//! Tokenizers for syntax decoration.
//!
//! A tokenizer turns a block's plain text into a token stream: plain strings
//! and typed tokens (which may nest). [`MarkdownGrammar`] is the default, an
//! ordered list of regex rules in the style of Prism's markdown grammar.
//! Each rule runs over the text the earlier rules left untouched, so earlier
//! rules win.

use regex::Regex;

use crate::types::MarkType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Str(String),
    Typed { kind: MarkType, content: Vec<Token> },
}

impl Token {
    /// Length in chars.
    pub fn len(&self) -> usize {
        match self {
            Token::Str(s) => s.chars().count(),
            Token::Typed { content, .. } => content.iter().map(Token::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stateless text tokenizer. Must not depend on anything but its input.
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<Token>;
}

/// One grammar rule.
///
/// The token covers the named capture group `t` when the pattern has one,
/// otherwise the whole match. Text matched outside `t` stays plain, which
/// stands in for look-behind and look-ahead.
#[derive(Debug, Clone)]
pub struct GrammarRule {
    pub kind: MarkType,
    pub pattern: Regex,
    pub inside: Vec<GrammarRule>,
}

impl GrammarRule {
    pub fn new(kind: MarkType, pattern: Regex) -> Self {
        Self {
            kind,
            pattern,
            inside: Vec::new(),
        }
    }

    pub fn with_inside(mut self, inside: Vec<GrammarRule>) -> Self {
        self.inside = inside;
        self
    }
}

#[derive(Debug, Clone)]
pub struct MarkdownGrammar {
    rules: Vec<GrammarRule>,
}

/// Build a rule from a pattern known to compile. Returns `None` (and the
/// rule is skipped) if it does not.
fn rule(kind: MarkType, pattern: &str) -> Option<GrammarRule> {
    match Regex::new(pattern) {
        Ok(re) => Some(GrammarRule::new(kind, re)),
        Err(err) => {
            tracing::error!(target: "loom::decorate", %kind, %err, "bad grammar pattern");
            None
        }
    }
}

fn punctuation(pattern: &str) -> Vec<GrammarRule> {
    rule(MarkType::Punctuation, pattern).into_iter().collect()
}

impl Default for MarkdownGrammar {
    fn default() -> Self {
        let rules = [
            rule(MarkType::Punctuation, r"(?m)^>(?:[\t ]*>)*"),
            rule(MarkType::Code, r"`[^`\n]+`")
                .map(|r| r.with_inside(punctuation(r"^`|`$"))),
            rule(MarkType::Title, r"(?m)^#{1,6}[ \t].*$")
                .map(|r| r.with_inside(punctuation(r"^#{1,6}"))),
            rule(
                MarkType::Hr,
                r"(?m)^[ \t]*(?:(?:\*[ \t]*){3,}|(?:-[ \t]*){3,}|(?:_[ \t]*){3,})$",
            ),
            rule(MarkType::List, r"(?m)^[ \t]*(?P<t>[*+-]|\d+\.)[ \t]"),
            rule(MarkType::Bold, r"\*\*[^*\n]+?\*\*|__[^_\n]+?__")
                .map(|r| r.with_inside(punctuation(r"^\*\*|\*\*$|^__|__$"))),
            rule(MarkType::Italic, r"\*[^*\n]+?\*|_[^_\n]+?_")
                .map(|r| r.with_inside(punctuation(r"^[*_]|[*_]$"))),
            rule(MarkType::Strikethrough, r"~~[^~\n]+?~~")
                .map(|r| r.with_inside(punctuation(r"^~~|~~$"))),
            rule(MarkType::Url, r"https?://[^\s<>()]+"),
        ];
        Self {
            rules: rules.into_iter().flatten().collect(),
        }
    }
}

impl MarkdownGrammar {
    pub fn new(rules: Vec<GrammarRule>) -> Self {
        Self { rules }
    }
}

impl Tokenizer for MarkdownGrammar {
    fn tokenize(&self, text: &str) -> Vec<Token> {
        tokenize_with(text, &self.rules)
    }
}

enum Piece {
    Raw(String),
    Done(Token),
}

fn tokenize_with(text: &str, rules: &[GrammarRule]) -> Vec<Token> {
    let mut pieces = vec![Piece::Raw(text.to_string())];
    for rule in rules {
        let mut next = Vec::with_capacity(pieces.len());
        for piece in pieces {
            match piece {
                Piece::Done(token) => next.push(Piece::Done(token)),
                Piece::Raw(s) => split_raw(&s, rule, &mut next),
            }
        }
        pieces = next;
    }
    pieces
        .into_iter()
        .filter_map(|piece| match piece {
            Piece::Raw(s) if s.is_empty() => None,
            Piece::Raw(s) => Some(Token::Str(s)),
            Piece::Done(token) => Some(token),
        })
        .collect()
}

fn split_raw(s: &str, rule: &GrammarRule, out: &mut Vec<Piece>) {
    let mut last = 0;
    for caps in rule.pattern.captures_iter(s) {
        let Some(m) = caps.name("t").or_else(|| caps.get(0)) else {
            continue;
        };
        if m.start() == m.end() || m.start() < last {
            continue;
        }
        if m.start() > last {
            out.push(Piece::Raw(s[last..m.start()].to_string()));
        }
        let matched = m.as_str();
        let content = if rule.inside.is_empty() {
            vec![Token::Str(matched.to_string())]
        } else {
            tokenize_with(matched, &rule.inside)
        };
        out.push(Piece::Done(Token::Typed {
            kind: rule.kind,
            content,
        }));
        last = m.end();
    }
    if last < s.len() {
        out.push(Piece::Raw(s[last..].to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(tokens: &[Token]) -> Vec<Option<MarkType>> {
        tokens
            .iter()
            .map(|t| match t {
                Token::Str(_) => None,
                Token::Typed { kind, .. } => Some(*kind),
            })
            .collect()
    }

    #[test]
    fn heading_with_punctuation() {
        let tokens = MarkdownGrammar::default().tokenize("## Hello");
        assert_eq!(tokens.len(), 1);
        let Token::Typed { kind, content } = &tokens[0] else {
            panic!("expected typed token");
        };
        assert_eq!(*kind, MarkType::Title);
        assert_eq!(
            content,
            &vec![
                Token::Typed {
                    kind: MarkType::Punctuation,
                    content: vec![Token::Str("##".into())]
                },
                Token::Str(" Hello".into()),
            ]
        );
        assert_eq!(tokens[0].len(), 8);
    }

    #[test]
    fn list_marker_excludes_trailing_space() {
        let tokens = MarkdownGrammar::default().tokenize("- item");
        assert_eq!(kinds(&tokens), vec![Some(MarkType::List), None]);
        assert_eq!(tokens[0].len(), 1);
        assert_eq!(tokens[1], Token::Str(" item".into()));
    }

    #[test]
    fn inline_emphasis_and_code() {
        let tokens = MarkdownGrammar::default().tokenize("a **b** _c_ `d` ~~e~~");
        assert_eq!(
            kinds(&tokens),
            vec![
                None,
                Some(MarkType::Bold),
                None,
                Some(MarkType::Italic),
                None,
                Some(MarkType::Code),
                None,
                Some(MarkType::Strikethrough),
            ]
        );
        let total: usize = tokens.iter().map(Token::len).sum();
        assert_eq!(total, "a **b** _c_ `d` ~~e~~".chars().count());
    }

    #[test]
    fn horizontal_rule_beats_list() {
        let tokens = MarkdownGrammar::default().tokenize("* * *");
        assert_eq!(kinds(&tokens), vec![Some(MarkType::Hr)]);
    }

    #[test]
    fn plain_text_is_one_string() {
        let tokens = MarkdownGrammar::default().tokenize("just words");
        assert_eq!(tokens, vec![Token::Str("just words".into())]);
        assert!(MarkdownGrammar::default().tokenize("").is_empty());
    }
}
