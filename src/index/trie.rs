//! Compressed prefix tree over the label vocabulary, used for autocomplete.
//!
//! Nodes use the smallest shape that fits: a bare end-of-word marker, a
//! single unbranched suffix, or a branch keyed by the next character.
//! Serialized to JSON with the same economy: `true`, a string, or an
//! object whose `"$"` key marks a branch that also ends a word.

use crate::utils::tokenizer::split_words;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;

/// Key marking a branch node that also ends a word
pub const END_MARKER: &str = "$";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrieError {
    #[error("invalid trie node: {0}")]
    InvalidNode(&'static str),

    #[error("invalid branch key {0:?}")]
    InvalidKey(String),

    #[error("trie root must be a branch")]
    RootNotBranch,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawNode")]
pub enum Node {
    /// A word ends here and nothing continues
    Terminal,
    /// Exactly one word continues below, spelled by the rest of the string
    Suffix(String),
    Branch {
        ends_word: bool,
        children: BTreeMap<char, Node>,
    },
}

impl Node {
    fn empty_branch() -> Self {
        Node::Branch {
            ends_word: false,
            children: BTreeMap::new(),
        }
    }

    fn leaf(rest: &str) -> Self {
        if rest.is_empty() {
            Node::Terminal
        } else {
            Node::Suffix(rest.to_string())
        }
    }

    fn insert(&mut self, rest: &str) {
        match self {
            Node::Terminal => {
                if rest.is_empty() {
                    return;
                }
                *self = Node::Branch {
                    ends_word: true,
                    children: BTreeMap::new(),
                };
                self.insert(rest);
            }
            Node::Suffix(suffix) => {
                if suffix.as_str() == rest {
                    return;
                }
                let old = std::mem::take(suffix);
                let mut chars = old.chars();
                let mut children = BTreeMap::new();
                if let Some(first) = chars.next() {
                    children.insert(first, Node::leaf(chars.as_str()));
                }
                *self = Node::Branch {
                    ends_word: false,
                    children,
                };
                self.insert(rest);
            }
            Node::Branch { ends_word, children } => {
                let mut chars = rest.chars();
                match chars.next() {
                    None => *ends_word = true,
                    Some(first) => {
                        let tail = chars.as_str();
                        match children.get_mut(&first) {
                            Some(child) => child.insert(tail),
                            None => {
                                children.insert(first, Node::leaf(tail));
                            }
                        }
                    }
                }
            }
        }
    }

    fn count(&self) -> usize {
        match self {
            Node::Branch { children, .. } => 1 + children.values().map(Node::count).sum::<usize>(),
            _ => 1,
        }
    }
}

/// Prefix tree answering autocomplete queries
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Node")]
pub struct Trie {
    root: Node,
}

impl Default for Trie {
    fn default() -> Self {
        Self::new()
    }
}

impl Trie {
    /// Create a new empty trie
    pub fn new() -> Self {
        Self {
            root: Node::empty_branch(),
        }
    }

    /// Build a trie from free text; every token becomes a word
    pub fn build<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut trie = Self::new();
        for text in texts {
            trie.insert(text.as_ref());
        }
        trie
    }

    /// Insert every token of `text`. Inserting a word twice has no effect.
    pub fn insert(&mut self, text: &str) {
        for token in split_words(text) {
            self.root.insert(&token);
        }
    }

    /// All words starting with `prefix`, breadth first from the prefix node
    pub fn complete(&self, prefix: &str) -> Vec<String> {
        let prefix = prefix.to_lowercase();
        let mut node = &self.root;
        let mut remaining = prefix.as_str();

        while let Some(first) = remaining.chars().next() {
            match node {
                Node::Terminal => return Vec::new(),
                Node::Suffix(suffix) => {
                    return match suffix.strip_prefix(remaining) {
                        Some(rest) => vec![format!("{}{}", prefix, rest)],
                        None => Vec::new(),
                    };
                }
                Node::Branch { children, .. } => match children.get(&first) {
                    Some(child) => {
                        node = child;
                        remaining = &remaining[first.len_utf8()..];
                    }
                    None => return Vec::new(),
                },
            }
        }

        let mut words = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back((prefix, node));

        while let Some((word, node)) = queue.pop_front() {
            match node {
                Node::Terminal => words.push(word),
                Node::Suffix(suffix) => words.push(word + suffix),
                Node::Branch { ends_word, children } => {
                    for (c, child) in children {
                        let mut next = word.clone();
                        next.push(*c);
                        queue.push_back((next, child));
                    }
                    if *ends_word {
                        words.push(word);
                    }
                }
            }
        }

        words
    }

    pub fn is_empty(&self) -> bool {
        matches!(&self.root, Node::Branch { ends_word: false, children } if children.is_empty())
    }

    /// Number of nodes, a rough measure of the serialized size
    pub fn node_count(&self) -> usize {
        self.root.count()
    }
}

impl TryFrom<Node> for Trie {
    type Error = TrieError;

    fn try_from(root: Node) -> Result<Self, Self::Error> {
        match root {
            Node::Branch { .. } => Ok(Self { root }),
            _ => Err(TrieError::RootNotBranch),
        }
    }
}

impl Serialize for Trie {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.root.serialize(serializer)
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Node::Terminal => serializer.serialize_bool(true),
            Node::Suffix(suffix) => serializer.serialize_str(suffix),
            Node::Branch { ends_word, children } => {
                let len = children.len() + usize::from(*ends_word);
                let mut map = serializer.serialize_map(Some(len))?;
                if *ends_word {
                    map.serialize_entry(END_MARKER, &true)?;
                }
                let mut key = [0u8; 4];
                for (c, child) in children {
                    map.serialize_entry(&*c.encode_utf8(&mut key), child)?;
                }
                map.end()
            }
        }
    }
}

/// Unvalidated JSON shape of a node
#[derive(Deserialize)]
#[serde(untagged)]
enum RawNode {
    Flag(bool),
    Suffix(String),
    Branch(BTreeMap<String, RawNode>),
}

impl TryFrom<RawNode> for Node {
    type Error = TrieError;

    fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
        match raw {
            RawNode::Flag(true) => Ok(Node::Terminal),
            RawNode::Flag(false) => Err(TrieError::InvalidNode("false is not a node")),
            RawNode::Suffix(suffix) if suffix.is_empty() => {
                Err(TrieError::InvalidNode("empty suffix"))
            }
            RawNode::Suffix(suffix) => Ok(Node::Suffix(suffix)),
            RawNode::Branch(entries) => {
                let mut ends_word = false;
                let mut children = BTreeMap::new();
                for (key, value) in entries {
                    if key == END_MARKER {
                        match value {
                            RawNode::Flag(true) => ends_word = true,
                            _ => return Err(TrieError::InvalidNode("end marker must be true")),
                        }
                        continue;
                    }
                    let mut chars = key.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => {
                            children.insert(c, Node::try_from(value)?);
                        }
                        _ => return Err(TrieError::InvalidKey(key)),
                    }
                }
                Ok(Node::Branch { ends_word, children })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn sorted(mut words: Vec<String>) -> Vec<String> {
        words.sort();
        words
    }

    #[test]
    fn test_complete_shared_prefix() {
        let trie = Trie::build(["cat", "car", "cart"]);
        assert_eq!(sorted(trie.complete("ca")), vec!["car", "cart", "cat"]);
        assert!(trie.complete("do").is_empty());
    }

    #[test]
    fn test_breadth_first_order() {
        let trie = Trie::build(["car cart cat"]);
        assert_eq!(trie.complete("ca"), vec!["car", "cat", "cart"]);
    }

    #[test]
    fn test_prefix_inside_suffix() {
        let trie = Trie::build(["paracetamol"]);
        assert_eq!(trie.complete("PARA"), vec!["paracetamol"]);
        assert!(trie.complete("parx").is_empty());
        assert!(trie.complete("paracetamols").is_empty());
    }

    #[test]
    fn test_word_ending_at_terminal_keeps_marker() {
        let mut trie = Trie::new();
        trie.insert("car");
        trie.insert("ca");
        trie.insert("carbon");
        assert_eq!(sorted(trie.complete("c")), vec!["ca", "car", "carbon"]);
    }

    #[test]
    fn test_insert_is_idempotent() {
        let once = Trie::build(["aspirin"]);
        let twice = Trie::build(["aspirin", "Aspirin"]);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_build_tokenizes() {
        let trie = Trie::build(["Co-codamol 30mg/500mg"]);
        assert_eq!(trie.complete("co"), vec!["co", "codamol"]);
        assert_eq!(trie.complete("30"), vec!["30mg"]);
    }

    #[test]
    fn test_empty_trie() {
        let trie = Trie::new();
        assert!(trie.is_empty());
        assert!(trie.complete("").is_empty());
        assert_eq!(serde_json::to_string(&trie).unwrap(), "{}");
    }

    #[test]
    fn test_json_shape() {
        let trie = Trie::build(["ab", "a"]);
        assert_eq!(serde_json::to_string(&trie).unwrap(), r#"{"a":{"$":true,"b":true}}"#);

        let trie = Trie::build(["cat"]);
        assert_eq!(serde_json::to_string(&trie).unwrap(), r#"{"c":"at"}"#);
    }

    #[test]
    fn test_digit_keys_do_not_collide_with_end_marker() {
        let trie = Trie::build(["a", "a1"]);
        let json = serde_json::to_string(&trie).unwrap();
        let restored: Trie = serde_json::from_str(&json).unwrap();
        assert_eq!(sorted(restored.complete("a")), vec!["a", "a1"]);
    }

    #[test]
    fn test_rejects_malformed_nodes() {
        assert!(serde_json::from_str::<Trie>(r#"{"a": false}"#).is_err());
        assert!(serde_json::from_str::<Trie>(r#"{"ab": true}"#).is_err());
        assert!(serde_json::from_str::<Trie>(r#"{"a": ""}"#).is_err());
        assert!(serde_json::from_str::<Trie>(r#"{"$": "x"}"#).is_err());
        assert!(serde_json::from_str::<Trie>(r#"{"a": 3}"#).is_err());
        assert!(serde_json::from_str::<Trie>("true").is_err());
    }

    proptest! {
        #[test]
        fn prop_every_word_completes_to_itself(words in prop::collection::vec("[a-z0-9]{1,8}", 1..60)) {
            let trie = Trie::build(&words);
            for word in &words {
                prop_assert!(trie.complete(word).contains(word));
            }
        }

        #[test]
        fn prop_completions_match_vocabulary(
            words in prop::collection::vec("[a-c]{1,5}", 1..40),
            prefix in "[a-c]{0,2}",
        ) {
            let trie = Trie::build(&words);
            let expected: HashSet<&String> = words.iter().filter(|w| w.starts_with(&prefix)).collect();
            let completions = trie.complete(&prefix);
            let actual: HashSet<&String> = completions.iter().collect();
            prop_assert_eq!(completions.len(), actual.len());
            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn prop_json_preserves_structure(words in prop::collection::vec("[a-z0-9]{1,8}", 0..40)) {
            let trie = Trie::build(&words);
            let json = serde_json::to_string(&trie).unwrap();
            let restored: Trie = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(restored, trie);
        }
    }
}
