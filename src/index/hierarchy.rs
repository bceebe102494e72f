//! Is-a hierarchy: relationship reduction at build time, descendant
//! expansion at query time.

use crate::index::concepts::ConceptTable;
use crate::index::types::{ConceptOrdinal, Label, RelationshipRecord, Terminology};
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Parent code to child codes, as persisted in relations.json
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Relations(BTreeMap<String, BTreeSet<String>>);

impl Relations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, parent: &str, child: &str) {
        self.0
            .entry(parent.to_string())
            .or_default()
            .insert(child.to_string());
    }

    pub fn children(&self, parent: &str) -> Option<&BTreeSet<String>> {
        self.0.get(parent)
    }

    /// Every code appearing on either end of an edge
    pub fn referenced(&self) -> BTreeSet<String> {
        let mut codes = BTreeSet::new();
        for (parent, children) in &self.0 {
            codes.insert(parent.clone());
            codes.extend(children.iter().cloned());
        }
        codes
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.0.iter()
    }

    /// Number of concepts with at least one child
    pub fn parent_count(&self) -> usize {
        self.0.len()
    }

    pub fn edge_count(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }
}

/// Reduces raw relationship rows to the current active edges
#[derive(Debug, Default)]
pub struct HierarchyBuilder {
    by_id: HashMap<String, usize>,
    records: Vec<RelationshipRecord>,
}

impl HierarchyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one row. A row whose edge id was seen before replaces the
    /// earlier row only if its effective time is strictly greater.
    pub fn add(&mut self, record: RelationshipRecord) {
        let Some(id) = record.id.clone() else {
            self.records.push(record);
            return;
        };
        match self.by_id.get(&id) {
            Some(&slot) => {
                if record.effective_time > self.records[slot].effective_time {
                    self.records[slot] = record;
                }
            }
            None => {
                self.by_id.insert(id, self.records.len());
                self.records.push(record);
            }
        }
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = RelationshipRecord>) {
        for record in records {
            self.add(record);
        }
    }

    /// Active edges inverted to parent to children
    pub fn build(self) -> Relations {
        let mut relations = Relations::new();
        for record in self.records.iter().filter(|r| r.active) {
            relations.add(&record.parent, &record.child);
        }
        relations
    }
}

/// One concept reached by descendant expansion
#[derive(Debug, Clone, PartialEq)]
pub struct Descendant<'t> {
    pub ordinal: ConceptOrdinal,
    pub code: &'t str,
    pub label: Option<&'t Label>,
    pub depth: u32,
}

/// Parent to children adjacency over interned ordinals
#[derive(Debug, Clone)]
pub struct HierarchyGraph {
    terminology: Terminology,
    children: Vec<Vec<ConceptOrdinal>>,
}

impl HierarchyGraph {
    /// Intern every code in `relations` and index children by parent ordinal
    pub fn from_relations(
        terminology: Terminology,
        relations: &Relations,
        table: &mut ConceptTable,
    ) -> Self {
        let edges: Vec<(ConceptOrdinal, Vec<ConceptOrdinal>)> = relations
            .iter()
            .map(|(parent, children)| {
                let parent = table.intern(parent);
                let children = children.iter().map(|c| table.intern(c)).collect();
                (parent, children)
            })
            .collect();

        let mut adjacency = vec![Vec::new(); table.len()];
        for (parent, children) in edges {
            adjacency[parent as usize] = children;
        }

        Self {
            terminology,
            children: adjacency,
        }
    }

    pub fn terminology(&self) -> Terminology {
        self.terminology
    }

    /// Children of a concept, looked up through the terminology's hierarchy key
    pub fn children(&self, table: &ConceptTable, ordinal: ConceptOrdinal) -> &[ConceptOrdinal] {
        let code = table.code(ordinal);
        let key = self.terminology.hierarchy_key(code);
        let slot = if key.len() == code.len() {
            Some(ordinal)
        } else {
            table.ordinal(key)
        };
        slot.and_then(|s| self.children.get(s as usize))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The concept itself followed by everything below it, depth first.
    ///
    /// Each concept appears once even where the hierarchy has diamonds or
    /// cycles. A code with no label yields nothing.
    pub fn descendants<'t>(&self, table: &'t ConceptTable, code: &str) -> Vec<Descendant<'t>> {
        let Some(root) = table.ordinal(code) else {
            return Vec::new();
        };
        if table.label(root).is_none() {
            return Vec::new();
        }

        let mut visited = RoaringBitmap::new();
        let mut stack = vec![(root, 0u32)];
        let mut found = Vec::new();

        while let Some((ordinal, depth)) = stack.pop() {
            if !visited.insert(ordinal) {
                continue;
            }
            found.push(Descendant {
                ordinal,
                code: table.code(ordinal),
                label: table.label(ordinal),
                depth,
            });
            for &child in self.children(table, ordinal) {
                if !visited.contains(child) {
                    stack.push((child, depth + 1));
                }
            }
        }

        found
    }

    /// Everything strictly below the given roots. Unknown roots are ignored.
    pub fn reachable_from(&self, table: &ConceptTable, roots: &[&str]) -> RoaringBitmap {
        let mut reached = RoaringBitmap::new();
        let mut stack: Vec<ConceptOrdinal> = roots
            .iter()
            .filter_map(|code| table.ordinal(code))
            .flat_map(|root| self.children(table, root).iter().copied())
            .collect();

        while let Some(ordinal) = stack.pop() {
            if !reached.insert(ordinal) {
                continue;
            }
            stack.extend(
                self.children(table, ordinal)
                    .iter()
                    .copied()
                    .filter(|child| !reached.contains(*child)),
            );
        }

        reached
    }
}
