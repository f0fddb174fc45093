//! Tolerant HTML-like lexer.
//!
//! Accepts the markup a contenteditable surface or a hand-written document
//! produces: unquoted and valueless attributes, unclosed and stray close
//! tags, comments, doctypes. Never fails; anything it cannot read as a tag
//! is text.

/// A node of the parsed tag tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HtmlNode {
    Element {
        /// Lowercased tag name.
        tag: String,
        attrs: Vec<(String, String)>,
        children: Vec<HtmlNode>,
    },
    Text(String),
}

impl HtmlNode {
    pub fn attr(&self, name: &str) -> Option<&str> {
        match self {
            HtmlNode::Element { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str()),
            HtmlNode::Text(_) => None,
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match self {
            HtmlNode::Element { tag, .. } => Some(tag),
            HtmlNode::Text(_) => None,
        }
    }
}

/// Tags that never have content or a close tag.
pub const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "wbr",
];

/// Tags whose content is dropped entirely.
const RAW_TAGS: &[&str] = &["script", "style"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open {
        tag: String,
        attrs: Vec<(String, String)>,
        self_closing: bool,
    },
    Close(String),
    Text(String),
}

/// A raw slice of markup: either one tag (comment, doctype) or text between
/// tags. Concatenating the pieces gives back the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Piece<'a> {
    Tag(&'a str),
    Text(&'a str),
}

/// Split markup into tag and text slices without interpreting either.
pub fn split_tags(input: &str) -> Vec<Piece<'_>> {
    let mut out = Vec::new();
    let mut pos = 0;
    let mut text_start = 0;
    while pos < input.len() {
        match tag_end(input, pos) {
            Some(end) => {
                if text_start < pos {
                    out.push(Piece::Text(&input[text_start..pos]));
                }
                out.push(Piece::Tag(&input[pos..end]));
                pos = end;
                text_start = end;
            }
            None => {
                pos += input[pos..].chars().next().map_or(1, char::len_utf8);
            }
        }
    }
    if text_start < input.len() {
        out.push(Piece::Text(&input[text_start..]));
    }
    out
}

/// If a tag, comment or doctype starts at `pos`, the byte offset just past it.
fn tag_end(input: &str, pos: usize) -> Option<usize> {
    let rest = &input[pos..];
    if !rest.starts_with('<') {
        return None;
    }
    if rest.starts_with("<!--") {
        return Some(rest.find("-->").map_or(input.len(), |i| pos + i + 3));
    }
    let next = rest[1..].chars().next()?;
    if !(next.is_ascii_alphabetic() || next == '/' || next == '!' || next == '?') {
        return None;
    }
    let mut quote: Option<char> = None;
    for (i, c) in rest.char_indices().skip(1) {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '>' => return Some(pos + i + 1),
            None if c == '<' => return None,
            None => {}
        }
    }
    None
}

fn lex(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut skip_until: Option<String> = None;
    for piece in split_tags(input) {
        match piece {
            Piece::Text(text) => {
                if skip_until.is_none() {
                    tokens.push(Token::Text(decode_entities(text)));
                }
            }
            Piece::Tag(raw) => {
                let Some(token) = read_tag(raw) else {
                    continue;
                };
                if let Some(raw_tag) = &skip_until {
                    if token == Token::Close(raw_tag.clone()) {
                        skip_until = None;
                    }
                    continue;
                }
                if let Token::Open {
                    tag,
                    self_closing: false,
                    ..
                } = &token
                {
                    if RAW_TAGS.contains(&tag.as_str()) {
                        skip_until = Some(tag.clone());
                        continue;
                    }
                }
                tokens.push(token);
            }
        }
    }
    tokens
}

/// Interpret one `<...>` slice. Comments, doctypes and processing
/// instructions yield nothing.
fn read_tag(raw: &str) -> Option<Token> {
    let inner = raw.strip_prefix('<')?;
    let inner = inner.strip_suffix('>').unwrap_or(inner);
    if inner.starts_with('!') || inner.starts_with('?') {
        return None;
    }
    if let Some(name) = inner.strip_prefix('/') {
        let name: String = name
            .trim()
            .chars()
            .take_while(|c| is_name_char(*c))
            .collect();
        return (!name.is_empty()).then(|| Token::Close(name.to_ascii_lowercase()));
    }

    let (body, self_closing) = match inner.trim_end().strip_suffix('/') {
        Some(body) => (body, true),
        None => (inner, false),
    };
    let name_len = body
        .char_indices()
        .find(|(_, c)| !is_name_char(*c))
        .map_or(body.len(), |(i, _)| i);
    if name_len == 0 {
        return None;
    }
    let tag = body[..name_len].to_ascii_lowercase();
    let attrs = read_attrs(&body[name_len..]);
    Some(Token::Open {
        tag,
        attrs,
        self_closing,
    })
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == ':' || c == '_'
}

fn read_attrs(mut s: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    loop {
        s = s.trim_start_matches(|c: char| c.is_whitespace() || c == '/');
        if s.is_empty() {
            break;
        }
        let name_end = s
            .find(|c: char| c.is_whitespace() || c == '=' || c == '/')
            .unwrap_or(s.len());
        let name = s[..name_end].to_string();
        s = s[name_end..].trim_start();
        let value = if let Some(rest) = s.strip_prefix('=') {
            let rest = rest.trim_start();
            let (value, remaining) = match rest.chars().next() {
                Some(q @ ('"' | '\'')) => {
                    let body = &rest[1..];
                    match body.find(q) {
                        Some(end) => (&body[..end], &body[end + 1..]),
                        None => (body, ""),
                    }
                }
                _ => {
                    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                    (&rest[..end], &rest[end..])
                }
            };
            s = remaining;
            decode_entities(value)
        } else {
            String::new()
        };
        if name.is_empty() {
            // Lone `=` or similar junk: skip one char so the loop advances.
            s = s.get(1..).unwrap_or("");
            continue;
        }
        attrs.push((name.to_ascii_lowercase(), value));
    }
    attrs
}

/// Decode the named entities markup editors emit plus numeric references.
/// Unknown entities are kept verbatim.
pub fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest
            .find(';')
            .filter(|end| *end <= 10)
            .and_then(|end| decode_entity(&rest[1..end]).map(|c| (c, end)));
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse().ok()?,
        };
        return char::from_u32(code);
    }
    Some(match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "copy" => '©',
        "reg" => '®',
        "hellip" => '…',
        "mdash" => '—',
        "ndash" => '–',
        "lsquo" => '‘',
        "rsquo" => '’',
        "ldquo" => '“',
        "rdquo" => '”',
        _ => return None,
    })
}

struct Open {
    tag: String,
    attrs: Vec<(String, String)>,
    children: Vec<HtmlNode>,
}

impl Open {
    fn close(self) -> HtmlNode {
        HtmlNode::Element {
            tag: self.tag,
            attrs: self.attrs,
            children: self.children,
        }
    }
}

/// Parse markup into a forest of tag trees.
///
/// A close tag pops back to the nearest open element of the same name,
/// implicitly closing everything opened after it; a close tag with no open
/// counterpart is ignored. Elements still open at the end are closed.
pub fn parse(input: &str) -> Vec<HtmlNode> {
    let mut roots: Vec<HtmlNode> = Vec::new();
    let mut stack: Vec<Open> = Vec::new();

    fn push(roots: &mut Vec<HtmlNode>, stack: &mut [Open], node: HtmlNode) {
        match stack.last_mut() {
            Some(open) => open.children.push(node),
            None => roots.push(node),
        }
    }

    for token in lex(input) {
        match token {
            Token::Text(text) => {
                if !text.is_empty() {
                    push(&mut roots, &mut stack, HtmlNode::Text(text));
                }
            }
            Token::Open {
                tag,
                attrs,
                self_closing,
            } => {
                if self_closing || VOID_TAGS.contains(&tag.as_str()) {
                    let node = HtmlNode::Element {
                        tag,
                        attrs,
                        children: Vec::new(),
                    };
                    push(&mut roots, &mut stack, node);
                } else {
                    stack.push(Open {
                        tag,
                        attrs,
                        children: Vec::new(),
                    });
                }
            }
            Token::Close(tag) => {
                let Some(depth) = stack.iter().rposition(|open| open.tag == tag) else {
                    tracing::trace!(target: "loom::serialize", %tag, "stray close tag");
                    continue;
                };
                while stack.len() > depth {
                    let Some(open) = stack.pop() else {
                        break;
                    };
                    let node = open.close();
                    push(&mut roots, &mut stack, node);
                }
            }
        }
    }
    while let Some(open) = stack.pop() {
        let node = open.close();
        push(&mut roots, &mut stack, node);
    }
    roots
}

#[cfg(test)]
mod tests {
    use super::*;

    fn el(tag: &str, children: Vec<HtmlNode>) -> HtmlNode {
        HtmlNode::Element {
            tag: tag.into(),
            attrs: Vec::new(),
            children,
        }
    }

    fn text(s: &str) -> HtmlNode {
        HtmlNode::Text(s.into())
    }

    #[test]
    fn nested_elements_and_entities() {
        let nodes = parse("<P>a &amp; <b>b&#33;</b></p>");
        assert_eq!(
            nodes,
            vec![el("p", vec![text("a & "), el("b", vec![text("b!")])])]
        );
    }

    #[test]
    fn attributes_in_every_quoting_style() {
        let nodes = parse(r#"<img src="a b.png" alt='x' width=10 hidden>"#);
        let HtmlNode::Element { tag, attrs, children } = &nodes[0] else {
            panic!("expected element");
        };
        assert_eq!(tag, "img");
        assert!(children.is_empty());
        assert_eq!(
            attrs,
            &vec![
                ("src".to_string(), "a b.png".to_string()),
                ("alt".to_string(), "x".to_string()),
                ("width".to_string(), "10".to_string()),
                ("hidden".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn unclosed_and_stray_tags() {
        let nodes = parse("<ul><li>one<li>two</ul></em>tail");
        assert_eq!(
            nodes,
            vec![
                el("ul", vec![el("li", vec![text("one"), el("li", vec![text("two")])])]),
                text("tail"),
            ]
        );
    }

    #[test]
    fn comments_doctype_and_scripts_vanish() {
        let nodes = parse("<!DOCTYPE html><!-- hi --><p>x</p><script>if (a < b) {}</script>");
        assert_eq!(nodes, vec![el("p", vec![text("x")])]);
    }

    #[test]
    fn lone_angle_bracket_is_text() {
        assert_eq!(parse("1 < 2 > 0"), vec![text("1 < 2 > 0")]);
    }

    #[test]
    fn split_tags_round_trips() {
        let input = "<p>a <b>b</b></p>\n";
        let pieces = split_tags(input);
        let joined: String = pieces
            .iter()
            .map(|p| match p {
                Piece::Tag(s) | Piece::Text(s) => *s,
            })
            .collect();
        assert_eq!(joined, input);
        assert_eq!(pieces[0], Piece::Tag("<p>"));
        assert_eq!(pieces[1], Piece::Text("a "));
    }

    #[test]
    fn unknown_entities_are_kept() {
        assert_eq!(decode_entities("a &bogus; &lt;b&gt; &"), "a &bogus; <b> &");
    }
}
