// SPDX-License-Identifier: MPL-2.0
//! Structured diff between two revisions of a page.
//!
//! Two classes of edits are detected:
//!
//! - **node-field edits**: a template, wikilink or reference exists on both sides but one of
//!   its fields (a template parameter, a link target, a reference body, ...) differs,
//! - **sentence edits**: sentences of the running prose that were inserted, removed or
//!   rewritten, found by diffing the sentence sequences with the histogram algorithm.
//!
//! Node edits come first in the result, then sentence edits in document order.

use std::ops::Range;

use imara_diff::{intern::Interner, Algorithm};
use rustc_hash::FxHashMap;

use crate::wikitext::{self, MarkupError, Node, NodeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    NodeField,
    SentenceInsert,
    SentenceRemove,
    SentenceChange,
}

/// One atomic edit between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeUnit {
    pub kind: ChangeKind,
    /// e.g. `Node:Template:parameter` or `Text:Sentence:Insert`
    pub change_type: String,
    pub before_text: String,
    pub after_text: String,
    pub description: String,
}

impl ChangeUnit {
    fn sentence(kind: ChangeKind, before_text: &str, after_text: &str) -> Self {
        let (change_type, description) = match kind {
            ChangeKind::SentenceInsert => ("Text:Sentence:Insert", "Inserted Sentence"),
            ChangeKind::SentenceRemove => ("Text:Sentence:Remove", "Removed Sentence"),
            ChangeKind::SentenceChange => ("Text:Sentence:Change", "Changed Sentence"),
            ChangeKind::NodeField => unreachable!("node fields are built by `node_field`"),
        };
        Self {
            kind,
            change_type: change_type.to_string(),
            before_text: before_text.to_string(),
            after_text: after_text.to_string(),
            description: description.to_string(),
        }
    }

    fn node_field(node: &Node, field: &str, before_text: &str, after_text: &str) -> Self {
        Self {
            kind: ChangeKind::NodeField,
            change_type: format!("Node:{}:{}", node.kind.as_str(), field),
            before_text: before_text.to_string(),
            after_text: after_text.to_string(),
            description: format!("{} {} changed {}", node.kind.as_str(), node.name, field),
        }
    }
}

/// Languages whose sentences end in full-width punctuation without a following space.
const FULL_STOP_LANGUAGES: &[&str] = &["zh", "ja", "wuu", "yue", "gan", "lzh", "zh-yue"];

fn sentences_for_language(prose: &str, language: &str) -> Vec<String> {
    let sentences = wikitext::split_into_sentences(prose);
    if !FULL_STOP_LANGUAGES.contains(&language) {
        return sentences;
    }

    sentences
        .iter()
        .flat_map(|sentence| sentence.split_inclusive(|c| matches!(c, '。' | '！' | '？')))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Compute the change units that turn `previous_content` into `current_content`.
///
/// Never fails: if either side cannot be parsed the revision pair contributes no changes.
pub fn extract_changes(
    previous_content: &str,
    current_content: &str,
    language: &str,
) -> Vec<ChangeUnit> {
    if previous_content == current_content {
        return Vec::new();
    }

    match try_extract_changes(previous_content, current_content, language) {
        Ok(changes) => changes,
        Err(error) => {
            tracing::debug!(
                message = "Diff calculation failed, skipping revision pair",
                %error,
                language
            );
            Vec::new()
        }
    }
}

pub fn try_extract_changes(
    previous_content: &str,
    current_content: &str,
    language: &str,
) -> Result<Vec<ChangeUnit>, MarkupError> {
    let before_nodes = wikitext::parse_nodes(previous_content)?;
    let after_nodes = wikitext::parse_nodes(current_content)?;

    let mut changes = node_changes(&before_nodes, &after_nodes);

    let before_sentences = sentences_for_language(
        &wikitext::prose(previous_content, &before_nodes),
        language,
    );
    let after_sentences =
        sentences_for_language(&wikitext::prose(current_content, &after_nodes), language);
    changes.extend(sentence_changes(&before_sentences, &after_sentences));

    Ok(changes)
}

type NodeKey<'a> = (NodeKind, &'a str, &'a [(String, String)]);

fn node_key(node: &Node) -> NodeKey<'_> {
    (node.kind, node.name.as_str(), node.fields.as_slice())
}

/// The nodes of `nodes` that have no identical counterpart in `other` (multiset difference).
fn without_identical<'a>(nodes: &'a [Node], other: &[Node]) -> Vec<&'a Node> {
    let mut available: FxHashMap<NodeKey<'_>, usize> = FxHashMap::default();
    for node in other {
        *available.entry(node_key(node)).or_insert(0) += 1;
    }

    nodes
        .iter()
        .filter(|node| match available.get_mut(&node_key(node)) {
            Some(count) if *count > 0 => {
                *count -= 1;
                false
            }
            _ => true,
        })
        .collect()
}

/// Whether two nodes of the same kind but different names are one node edited in place: they
/// share a non-empty field value under the same key, or neither has any fields.
fn same_node_renamed(b: &Node, a: &Node) -> bool {
    if b.kind != a.kind {
        return false;
    }
    if b.fields.is_empty() && a.fields.is_empty() {
        return true;
    }
    b.fields
        .iter()
        .any(|(key, value)| !value.is_empty() && a.field(key) == Some(value.as_str()))
}

/// Pair edited nodes: same kind and name first, then renamed nodes (see [`same_node_renamed`]),
/// both in document order. Nodes left without a partner were inserted or removed as a whole.
fn pair_nodes<'a>(before: &[&'a Node], after: &[&'a Node]) -> Vec<(&'a Node, &'a Node)> {
    let mut before_taken = vec![false; before.len()];
    let mut partner: Vec<Option<usize>> = vec![None; after.len()];

    let same_name = |b: &Node, a: &Node| b.kind == a.kind && b.name == a.name;
    let passes: [&dyn Fn(&Node, &Node) -> bool; 2] = [&same_name, &same_node_renamed];

    for matches in passes {
        for (a_index, a) in after.iter().enumerate() {
            if partner[a_index].is_some() {
                continue;
            }
            let found = before
                .iter()
                .enumerate()
                .find(|(b_index, b)| !before_taken[*b_index] && matches(b, a));
            if let Some((b_index, _)) = found {
                before_taken[b_index] = true;
                partner[a_index] = Some(b_index);
            }
        }
    }

    after
        .iter()
        .zip(partner)
        .filter_map(|(a, b_index)| b_index.map(|b_index| (before[b_index], *a)))
        .collect()
}

fn node_changes(before_nodes: &[Node], after_nodes: &[Node]) -> Vec<ChangeUnit> {
    let before = without_identical(before_nodes, after_nodes);
    let after = without_identical(after_nodes, before_nodes);

    let mut changes = Vec::new();
    for (b, a) in pair_nodes(&before, &after) {
        match a.kind {
            NodeKind::Template => {
                if b.name != a.name {
                    changes.push(ChangeUnit::node_field(a, "name", &b.name, &a.name));
                }

                let mut keys: Vec<&str> = b.fields.iter().map(|(k, _)| k.as_str()).collect();
                for (key, _) in &a.fields {
                    if !keys.contains(&key.as_str()) {
                        keys.push(key);
                    }
                }
                for key in keys {
                    let before_value = b.field(key).unwrap_or_default();
                    let after_value = a.field(key).unwrap_or_default();
                    if before_value != after_value {
                        changes.push(ChangeUnit::node_field(
                            a,
                            "parameter",
                            before_value,
                            after_value,
                        ));
                    }
                }
            }
            NodeKind::Wikilink | NodeKind::Reference => {
                for (field, after_value) in &a.fields {
                    let before_value = b.field(field).unwrap_or_default();
                    if before_value != after_value.as_str() {
                        changes.push(ChangeUnit::node_field(a, field, before_value, after_value));
                    }
                }
            }
        }
    }

    changes
}

fn sentence_changes(before: &[String], after: &[String]) -> Vec<ChangeUnit> {
    let mut interner: Interner<&str> = Interner::new(before.len() + after.len());
    let before_tokens: Vec<_> = before.iter().map(|s| interner.intern(s.as_str())).collect();
    let after_tokens: Vec<_> = after.iter().map(|s| interner.intern(s.as_str())).collect();

    let mut changes = Vec::new();
    imara_diff::diff_with_tokens(
        Algorithm::Histogram,
        &before_tokens,
        &after_tokens,
        interner.num_tokens(),
        |removed: Range<u32>, inserted: Range<u32>| {
            let removed = &before[removed.start as usize..removed.end as usize];
            let inserted = &after[inserted.start as usize..inserted.end as usize];

            let paired = removed.len().min(inserted.len());
            for (old, new) in removed.iter().zip(inserted) {
                changes.push(ChangeUnit::sentence(ChangeKind::SentenceChange, old, new));
            }
            for new in &inserted[paired..] {
                changes.push(ChangeUnit::sentence(ChangeKind::SentenceInsert, "", new));
            }
            for old in &removed[paired..] {
                changes.push(ChangeUnit::sentence(ChangeKind::SentenceRemove, old, ""));
            }
        },
    );

    changes
}
