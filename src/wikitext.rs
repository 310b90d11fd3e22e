// SPDX-License-Identifier: MPL-2.0
//! Wikitext scanning.
//!
//! Three views of a page's source text are needed by the change extractor:
//!
//! - the structural *nodes* (templates, wikilinks, references) with their named fields,
//! - the *prose* split into sentences,
//! - a plain-text rendering with markup stripped, which is what gets scored for bias.
//!
//! An opener that is never closed is plain text to both the node parser and the stripper, as
//! it is to MediaWiki. Node parsing only fails on nesting deeper than [`MAX_NESTING_DEPTH`].

use std::{ops::Range, sync::LazyLock};

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use memchr::memmem;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Template,
    Wikilink,
    Reference,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Template => "Template",
            NodeKind::Wikilink => "Wikilink",
            NodeKind::Reference => "Reference",
        }
    }
}

/// A top-level structural element of a page.
///
/// `fields` keeps document order. Templates carry one field per parameter (positional
/// parameters are keyed `1`, `2`, ...), wikilinks carry `title` and `text`, references
/// carry `name` and `text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub name: String,
    pub fields: Vec<(String, String)>,
    /// byte range of the node (including delimiters) in the source text
    pub span: Range<usize>,
}

impl Node {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// MediaWiki's preprocessor expansion depth limit.
pub const MAX_NESTING_DEPTH: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarkupError {
    #[error(
        "{} starting at byte {offset} nests deeper than {} levels",
        .kind.as_str(),
        MAX_NESTING_DEPTH
    )]
    TooDeep { kind: NodeKind, offset: usize },
}

static REGEX_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?(?:-->|\z)").unwrap());
static REGEX_REF_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bname\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s/>]+))"#).unwrap()
});

/// Where a balanced construct ends and how deeply it nests.
struct Balanced {
    /// position right after the closing delimiter
    end: usize,
    max_depth: usize,
}

/// Find the delimiter that closes the construct opened at `start`.
///
/// `open` and `close` are two-byte delimiters like `{{`/`}}`. Nesting is honoured.
fn find_balanced(bytes: &[u8], start: usize, open: &[u8; 2], close: &[u8; 2]) -> Option<Balanced> {
    let mut depth = 0usize;
    let mut max_depth = 0usize;
    let mut i = start;
    while i + 1 < bytes.len() {
        let pair = &bytes[i..i + 2];
        if pair == open {
            depth += 1;
            max_depth = max_depth.max(depth);
            i += 2;
        } else if pair == close {
            depth = depth.saturating_sub(1);
            i += 2;
            if depth == 0 {
                return Some(Balanced { end: i, max_depth });
            }
        } else {
            i += 1;
        }
    }
    None
}

/// End of the balanced construct of `kind` at `start`, or `None` if it is never closed.
fn node_end(
    bytes: &[u8],
    start: usize,
    kind: NodeKind,
    open: &[u8; 2],
    close: &[u8; 2],
) -> Result<Option<usize>, MarkupError> {
    match find_balanced(bytes, start, open, close) {
        Some(balanced) if balanced.max_depth > MAX_NESTING_DEPTH => Err(MarkupError::TooDeep {
            kind,
            offset: start,
        }),
        Some(balanced) => Ok(Some(balanced.end)),
        None => Ok(None),
    }
}

fn starts_with_ref_tag(bytes: &[u8], i: usize) -> bool {
    let rest = &bytes[i..];
    rest.len() > 4
        && rest[..4].eq_ignore_ascii_case(b"<ref")
        && matches!(rest[4], b'>' | b'/' | b' ' | b'\t' | b'\n')
}

/// Span of a `<ref ...>...</ref>` or `<ref ... />` element starting at `start`,
/// together with the range of its inner content.
fn find_reference_end(text: &str, start: usize) -> Option<(usize, Range<usize>)> {
    let bytes = text.as_bytes();
    let tag_end = start + memchr::memchr(b'>', &bytes[start..])? + 1;
    if bytes[tag_end - 2] == b'/' {
        return Some((tag_end, tag_end..tag_end));
    }

    static CLOSE: LazyLock<memmem::Finder<'static>> =
        LazyLock::new(|| memmem::Finder::new(b"</ref>"));
    let close = tag_end + CLOSE.find(&bytes[tag_end..])?;
    Some((close + "</ref>".len(), tag_end..close))
}

/// Split `inner` at `|` characters that are not nested inside `{{ }}` or `[[ ]]`.
fn split_top_level(inner: &str) -> Vec<&str> {
    let bytes = inner.as_bytes();
    let mut parts = Vec::new();
    let mut braces = 0usize;
    let mut brackets = 0usize;
    let mut last = 0;
    let mut i = 0;

    while i < bytes.len() {
        let pair = bytes.get(i..i + 2);
        match pair {
            Some(b"{{") => {
                braces += 1;
                i += 2;
                continue;
            }
            Some(b"}}") => {
                braces = braces.saturating_sub(1);
                i += 2;
                continue;
            }
            Some(b"[[") => {
                brackets += 1;
                i += 2;
                continue;
            }
            Some(b"]]") => {
                brackets = brackets.saturating_sub(1);
                i += 2;
                continue;
            }
            _ => {}
        }

        if bytes[i] == b'|' && braces == 0 && brackets == 0 {
            parts.push(&inner[last..i]);
            last = i + 1;
        }
        i += 1;
    }
    parts.push(&inner[last..]);

    parts
}

fn template_node(inner: &str, span: Range<usize>) -> Node {
    let mut parts = split_top_level(inner).into_iter();
    let name = parts.next().unwrap_or_default().trim().to_string();

    let mut fields = Vec::new();
    let mut positional = 0;
    for part in parts {
        let named = part
            .split_once('=')
            .filter(|(key, _)| !key.contains("{{") && !key.contains("[["));
        if let Some((key, value)) = named {
            fields.push((key.trim().to_string(), value.trim().to_string()));
        } else {
            positional += 1;
            fields.push((positional.to_string(), part.trim().to_string()));
        }
    }

    Node {
        kind: NodeKind::Template,
        name,
        fields,
        span,
    }
}

fn wikilink_node(inner: &str, span: Range<usize>) -> Node {
    let mut parts = split_top_level(inner).into_iter();
    let title = parts.next().unwrap_or_default().trim().to_string();
    let text = parts.collect::<Vec<_>>().join("|").trim().to_string();

    Node {
        kind: NodeKind::Wikilink,
        name: title.clone(),
        fields: vec![("title".to_string(), title), ("text".to_string(), text)],
        span,
    }
}

fn reference_node(text: &str, span: Range<usize>, content: Range<usize>) -> Node {
    let tag = &text[span.start..content.start.max(span.start)];
    let name = REGEX_REF_NAME
        .captures(tag)
        .and_then(|caps| caps.get(1).or(caps.get(2)).or(caps.get(3)))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();

    Node {
        kind: NodeKind::Reference,
        name: name.clone(),
        fields: vec![
            ("name".to_string(), name),
            ("text".to_string(), text[content].trim().to_string()),
        ],
        span,
    }
}

/// Parse the top-level templates, wikilinks and references of `text`.
///
/// Nodes nested inside other nodes (a link inside a template parameter) are part of their
/// parent's field values and are not reported separately. HTML comments are skipped. Openers
/// that are never closed stay in the text and scanning resumes right after them.
pub fn parse_nodes(text: &str) -> Result<Vec<Node>, MarkupError> {
    let bytes = text.as_bytes();
    let mut nodes = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let rest = &bytes[i..];
        if rest.starts_with(b"<!--") {
            i = memmem::find(&bytes[i + 4..], b"-->").map_or(bytes.len(), |p| i + 4 + p + 3);
        } else if rest.starts_with(b"{{") {
            match node_end(bytes, i, NodeKind::Template, b"{{", b"}}")? {
                Some(end) => {
                    nodes.push(template_node(&text[i + 2..end - 2], i..end));
                    i = end;
                }
                None => i += 2,
            }
        } else if rest.starts_with(b"[[") {
            match node_end(bytes, i, NodeKind::Wikilink, b"[[", b"]]")? {
                Some(end) => {
                    nodes.push(wikilink_node(&text[i + 2..end - 2], i..end));
                    i = end;
                }
                None => i += 2,
            }
        } else if starts_with_ref_tag(bytes, i) {
            match find_reference_end(text, i) {
                Some((end, content)) => {
                    nodes.push(reference_node(text, i..end, content));
                    i = end;
                }
                None => i += "<ref".len(),
            }
        } else {
            i += 1;
        }
    }

    Ok(nodes)
}

/// The running prose of a page: `text` with templates, references and comments removed.
///
/// `nodes` must come from [`parse_nodes`] on the same `text`.
pub fn prose(text: &str, nodes: &[Node]) -> String {
    let mut result = String::with_capacity(text.len());
    let mut last_end = 0;
    for node in nodes {
        if node.kind == NodeKind::Wikilink {
            continue;
        }
        result.push_str(&text[last_end..node.span.start]);
        last_end = node.span.end;
    }
    result.push_str(&text[last_end..]);

    REGEX_COMMENT.replace_all(&result, "").into_owned()
}

// where the text is cut around each break pattern: (cut offset, resume offset), both
// relative to the start of the match
const BREAK_PATTERNS: &[(&str, usize, usize)] = &[
    ("\n", 1, 1),
    ("; ", 1, 2),
    ("? ", 1, 2),
    ("! ", 1, 2),
    (": ", 1, 2),
    ("\t", 1, 1),
    ("<!--", 0, 0),
    ("-->", 3, 3),
    ("<ref", 0, 0),
    ("/ref>", 5, 5),
];

/// Split prose into sentences using the WikiWho sentence rules.
///
/// Sentences end after a period that follows three non-space, non-period characters and is
/// followed by a space, after `;`, `?`, `!`, `:` followed by a space, at line breaks and tabs,
/// and around comments, references and bare URLs. Sentences are trimmed; empty ones dropped.
pub fn split_into_sentences(text: &str) -> Vec<String> {
    static BREAKS: LazyLock<AhoCorasick> = LazyLock::new(|| {
        AhoCorasickBuilder::new()
            .match_kind(MatchKind::LeftmostFirst)
            .build(BREAK_PATTERNS.iter().map(|(pattern, _, _)| pattern))
            .unwrap()
    });
    static REGEX_DOT: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[^\s\.=][^\s\.=][^\s\.=]\. ").unwrap());
    static REGEX_URL: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"http.*?://.*?[ \|<>\n\r]").unwrap());

    let mut breaks: Vec<(usize, usize)> = Vec::new();
    for m in BREAKS.find_iter(text) {
        let (_, cut, resume) = BREAK_PATTERNS[m.pattern().as_usize()];
        breaks.push((m.start() + cut, m.start() + resume));
    }
    for m in REGEX_DOT.find_iter(text) {
        // cut after the period, drop the space
        breaks.push((m.end() - 1, m.end()));
    }
    for m in REGEX_URL.find_iter(text) {
        breaks.push((m.start(), m.start()));
        breaks.push((m.end(), m.end()));
    }
    breaks.sort_unstable();

    let mut sentences = Vec::new();
    let mut last = 0;
    for (cut, resume) in breaks {
        if cut < last {
            continue;
        }
        sentences.push(&text[last..cut]);
        last = resume;
    }
    sentences.push(&text[last..]);

    sentences
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_hidden_link_namespace(target: &str) -> bool {
    const HIDDEN: &[&str] = &["file", "image", "category", "media"];
    target
        .split_once(':')
        .is_some_and(|(ns, _)| HIDDEN.contains(&ns.trim().to_ascii_lowercase().as_str()))
}

/// Render wikitext as plain text.
///
/// Templates, references, comments, files and categories disappear; wikilinks are replaced by
/// their display text; external links by their label; emphasis quotes, heading markers and
/// HTML tags are dropped. Whitespace is collapsed and empty lines removed. Unbalanced
/// openers are dropped rather than reported.
pub fn strip_markup(text: &str) -> String {
    static REGEX_EXTERNAL_LINK: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[(?:https?:)?//[^\s\]]+(?:\s+([^\]]*))?\]").unwrap());
    static REGEX_EMPHASIS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"'{2,}").unwrap());
    static REGEX_HEADING: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^=+[ \t]*(.*?)[ \t]*=+[ \t]*$").unwrap());
    static REGEX_HTML_TAG: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"</?[a-zA-Z][^>]*>").unwrap());
    static REGEX_SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());

    let text = REGEX_COMMENT.replace_all(text, "");
    let bytes = text.as_bytes();

    let mut result = String::with_capacity(text.len());
    let mut i = 0;
    while i < bytes.len() {
        let rest = &bytes[i..];
        if rest.starts_with(b"{{") {
            i = find_balanced(bytes, i, b"{{", b"}}").map_or(i + 2, |balanced| balanced.end);
        } else if rest.starts_with(b"[[") {
            match find_balanced(bytes, i, b"[[", b"]]") {
                Some(Balanced { end, .. }) => {
                    let inner = &text[i + 2..end - 2];
                    let (target, label) = match split_top_level(inner).as_slice() {
                        [target] => (*target, *target),
                        [target, .., label] => (*target, *label),
                        [] => ("", ""),
                    };
                    if !is_hidden_link_namespace(target) {
                        result.push_str(&strip_markup(label));
                    }
                    i = end;
                }
                None => i += 2,
            }
        } else if starts_with_ref_tag(bytes, i) {
            i = match find_reference_end(&text, i) {
                Some((end, _)) => end,
                None => i + memchr::memchr(b'>', rest).map_or(rest.len(), |p| p + 1),
            };
        } else {
            // advance one whole character
            let ch_len = text[i..].chars().next().map_or(1, char::len_utf8);
            result.push_str(&text[i..i + ch_len]);
            i += ch_len;
        }
    }

    let result = REGEX_EXTERNAL_LINK.replace_all(&result, "$1");
    let result = REGEX_EMPHASIS.replace_all(&result, "");
    let result = REGEX_HEADING.replace_all(&result, "$1");
    let result = REGEX_HTML_TAG.replace_all(&result, "");

    result
        .lines()
        .map(|line| REGEX_SPACES.replace_all(line.trim(), " "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_template_parameters() {
        let nodes = parse_nodes("{{Infobox country | name = Taiwan | capital=[[Taipei]] | foo}}")
            .unwrap();
        assert_eq!(nodes.len(), 1);
        let node = &nodes[0];
        assert_eq!(node.kind, NodeKind::Template);
        assert_eq!(node.name, "Infobox country");
        assert_eq!(node.field("name"), Some("Taiwan"));
        assert_eq!(node.field("capital"), Some("[[Taipei]]"));
        assert_eq!(node.field("1"), Some("foo"));
    }

    #[test]
    fn parses_links_and_references() {
        let text = r#"See [[Hsinchu|the city]].<ref name="a">Source one</ref> And <ref name=b />"#;
        let nodes = parse_nodes(text).unwrap();
        assert_eq!(nodes.len(), 3);

        assert_eq!(nodes[0].kind, NodeKind::Wikilink);
        assert_eq!(nodes[0].field("title"), Some("Hsinchu"));
        assert_eq!(nodes[0].field("text"), Some("the city"));

        assert_eq!(nodes[1].kind, NodeKind::Reference);
        assert_eq!(nodes[1].name, "a");
        assert_eq!(nodes[1].field("text"), Some("Source one"));

        assert_eq!(nodes[2].kind, NodeKind::Reference);
        assert_eq!(nodes[2].name, "b");
        assert_eq!(nodes[2].field("text"), Some(""));
    }

    #[test]
    fn nested_templates_are_one_node() {
        let nodes = parse_nodes("{{outer|a={{inner|x}}|b}}").unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].field("a"), Some("{{inner|x}}"));
        assert_eq!(nodes[0].field("1"), Some("b"));
    }

    #[test]
    fn unclosed_openers_are_text() {
        let text = "text {{broken|a=1 [[Taipei]] <ref>open [[ {{cn}}";
        let nodes = parse_nodes(text).unwrap();
        assert_eq!(
            nodes.iter().map(|n| n.name.as_str()).collect::<Vec<_>>(),
            vec!["Taipei", "cn"]
        );
        assert_eq!(prose(text, &nodes), "text {{broken|a=1 [[Taipei]] <ref>open [[ ");
    }

    #[test]
    fn excessive_nesting_is_an_error() {
        let depth = MAX_NESTING_DEPTH + 1;
        let text = format!("ok {}{}", "{{".repeat(depth), "}}".repeat(depth));
        assert_eq!(
            parse_nodes(&text),
            Err(MarkupError::TooDeep {
                kind: NodeKind::Template,
                offset: 3
            })
        );

        let depth = MAX_NESTING_DEPTH;
        let text = format!("{}{}", "[[".repeat(depth), "]]".repeat(depth));
        assert_eq!(parse_nodes(&text).unwrap().len(), 1);
    }

    #[test]
    fn nodes_inside_comments_are_ignored() {
        let nodes = parse_nodes("<!-- {{hidden}} -->[[Shown]]").unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name, "Shown");
    }

    #[test]
    fn prose_drops_templates_and_references() {
        let text = "Alpha {{cite|x}}beta<ref>r</ref> [[gamma]].<!-- note -->";
        let nodes = parse_nodes(text).unwrap();
        assert_eq!(prose(text, &nodes), "Alpha beta [[gamma]].");
    }

    #[test]
    fn splits_sentences() {
        let sentences = split_into_sentences("First sentence. Second one; third? Yes!\nLast");
        assert_eq!(
            sentences,
            vec!["First sentence.", "Second one;", "third?", "Yes!", "Last"]
        );
    }

    #[test]
    fn short_abbreviations_do_not_split() {
        // fewer than three characters before the period
        let sentences = split_into_sentences("Dr. Smith arrived. He left.");
        assert_eq!(sentences, vec!["Dr. Smith arrived.", "He left."]);
    }

    #[test]
    fn strips_markup() {
        let text = "'''Hsinchu''' is a [[city]] in [[Taiwan|northern Taiwan]].{{cn}}<ref>x</ref> [[Category:Cities]]";
        assert_eq!(strip_markup(text), "Hsinchu is a city in northern Taiwan.");
    }

    #[test]
    fn strips_external_links_headings_and_tags() {
        let text = "== History ==\nSee [https://example.org the site] <small>now</small>.";
        assert_eq!(strip_markup(text), "History\nSee the site now.");
    }

    #[test]
    fn strip_markup_tolerates_unbalanced_openers() {
        assert_eq!(strip_markup("broken {{ template"), "broken template");
        assert_eq!(strip_markup("<!-- only a comment -->"), "");
    }

    proptest! {
        #[test]
        fn strip_markup_never_panics(input in "(\\{\\{|\\}\\}|\\[\\[|\\]\\]|<ref>|</ref>|<!--|-->|\\||=|'|.)*") {
            let _ = strip_markup(&input);
            let _ = split_into_sentences(&input);
            if let Ok(nodes) = parse_nodes(&input) {
                let _ = prose(&input, &nodes);
            }
        }
    }
}
