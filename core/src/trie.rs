use crate::DocId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// What a completed suggestion points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionPayload {
    Query { text: String },
    Product { id: DocId },
}

impl SuggestionPayload {
    /// Payload lists are deduplicated on this key.
    fn entity_key(&self) -> (u8, &str) {
        match self {
            SuggestionPayload::Query { text } => (0, text),
            SuggestionPayload::Product { id } => (1, id),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Terminal {
    pub payloads: Vec<SuggestionPayload>,
    pub popularity: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct TrieNode {
    children: BTreeMap<char, TrieNode>,
    terminal: Option<Terminal>,
}

/// A completed entry returned by a prefix search.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub text: String,
    pub payloads: Vec<SuggestionPayload>,
    pub popularity: f64,
}

/// Prefix tree of suggestion texts, one node per character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionTrie {
    root: TrieNode,
    len: usize,
    max_visit: usize,
}

impl Default for SuggestionTrie {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl SuggestionTrie {
    pub fn new(max_visit: usize) -> Self {
        Self { root: TrieNode::default(), len: 0, max_visit: max_visit.max(1) }
    }

    /// Number of terminal entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert or reinforce `text`. Popularity only grows here; `decay` is the only way down.
    pub fn insert(&mut self, text: &str, payload: SuggestionPayload, popularity: f64) {
        if text.is_empty() {
            return;
        }
        let mut node = &mut self.root;
        for c in text.chars() {
            node = node.children.entry(c).or_default();
        }
        let terminal = match &mut node.terminal {
            Some(t) => t,
            slot @ None => {
                self.len += 1;
                slot.insert(Terminal::default())
            }
        };
        terminal.popularity += popularity.max(0.0);
        match terminal.payloads.iter_mut().find(|p| p.entity_key() == payload.entity_key()) {
            Some(existing) => *existing = payload,
            None => terminal.payloads.push(payload),
        }
    }

    pub fn get(&self, text: &str) -> Option<&Terminal> {
        self.find_node(text).and_then(|n| n.terminal.as_ref())
    }

    fn find_node(&self, prefix: &str) -> Option<&TrieNode> {
        let mut node = &self.root;
        for c in prefix.chars() {
            node = node.children.get(&c)?;
        }
        Some(node)
    }

    /// Top `limit` completions of `prefix` by popularity (ties by text). The depth-first walk
    /// below the prefix node stops after `max_visit` nodes.
    pub fn search_prefix(&self, prefix: &str, limit: usize) -> Vec<Suggestion> {
        if limit == 0 {
            return Vec::new();
        }
        let Some(start) = self.find_node(prefix) else { return Vec::new() };
        let mut found = Vec::new();
        let mut stack: Vec<(String, &TrieNode)> = vec![(prefix.to_string(), start)];
        let mut visited = 0usize;
        while let Some((text, node)) = stack.pop() {
            visited += 1;
            if let Some(t) = &node.terminal {
                found.push(Suggestion { text: text.clone(), payloads: t.payloads.clone(), popularity: t.popularity });
            }
            if visited >= self.max_visit {
                break;
            }
            for (c, child) in node.children.iter().rev() {
                let mut next = text.clone();
                next.push(*c);
                stack.push((next, child));
            }
        }
        found.sort_by(|a, b| {
            b.popularity
                .partial_cmp(&a.popularity)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.text.cmp(&b.text))
        });
        found.truncate(limit);
        found
    }

    /// Multiply every popularity score by `factor` (expected in (0, 1)).
    pub fn decay(&mut self, factor: f64) {
        let factor = factor.clamp(0.0, 1.0);
        let mut stack = vec![&mut self.root];
        while let Some(node) = stack.pop() {
            if let Some(t) = &mut node.terminal {
                t.popularity *= factor;
            }
            stack.extend(node.children.values_mut());
        }
    }

    /// Every terminal entry with its full text, in lexical order.
    pub fn entries(&self) -> Vec<(String, Terminal)> {
        let mut out = Vec::with_capacity(self.len);
        let mut stack: Vec<(String, &TrieNode)> = vec![(String::new(), &self.root)];
        while let Some((text, node)) = stack.pop() {
            if let Some(t) = &node.terminal {
                out.push((text.clone(), t.clone()));
            }
            for (c, child) in node.children.iter().rev() {
                let mut next = text.clone();
                next.push(*c);
                stack.push((next, child));
            }
        }
        out
    }

    pub fn from_entries(max_visit: usize, entries: impl IntoIterator<Item = (String, Terminal)>) -> Self {
        let mut trie = Self::new(max_visit);
        for (text, terminal) in entries {
            let popularity = terminal.popularity;
            let mut payloads = terminal.payloads.into_iter();
            if let Some(first) = payloads.next() {
                trie.insert(&text, first, popularity);
            }
            for p in payloads {
                trie.insert(&text, p, 0.0);
            }
        }
        trie
    }
}
