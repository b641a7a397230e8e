//! Typed reference sets
//!
//! A `ReferenceMap` maps a reference type id to an insertion-ordered set of targets.
//! `References` wraps the canonical map together with its resolved/unresolved partition.

use crate::error::{ReferenceNotFoundError, SyncError};
use crate::model::node_id::NodeId;
use crate::types::reference_type;
use indexmap::IndexSet;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceMap {
    entries: BTreeMap<i32, IndexSet<NodeId>>,
}

impl ReferenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `target` for `reference_type`. Returns `false` if it was already present.
    pub fn add_reference(&mut self, reference_type: i32, target: NodeId) -> bool {
        self.entries.entry(reference_type).or_default().insert(target)
    }

    pub fn delete_reference(
        &mut self,
        reference_type: i32,
        target: &NodeId,
    ) -> Result<NodeId, ReferenceNotFoundError> {
        let removed = self
            .entries
            .get_mut(&reference_type)
            .and_then(|set| set.shift_take(target));
        match removed {
            Some(target) => {
                if self
                    .entries
                    .get(&reference_type)
                    .map(IndexSet::is_empty)
                    .unwrap_or(false)
                {
                    self.entries.remove(&reference_type);
                }
                Ok(target)
            }
            None => Err(ReferenceNotFoundError {
                reference_type: reference_type::display(reference_type),
                target: target.to_string(),
            }),
        }
    }

    /// The first inserted target of a type.
    pub fn get_single(&self, reference_type: i32) -> Option<&NodeId> {
        self.entries.get(&reference_type).and_then(|set| set.first())
    }

    pub fn get(&self, reference_type: i32) -> Option<&IndexSet<NodeId>> {
        self.entries.get(&reference_type)
    }

    pub fn has(&self, reference_type: i32, target: &NodeId) -> bool {
        self.entries
            .get(&reference_type)
            .map(|set| set.contains(target))
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of (type, target) pairs.
    pub fn len(&self) -> usize {
        self.entries.values().map(IndexSet::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, &NodeId)> {
        self.entries
            .iter()
            .flat_map(|(kind, targets)| targets.iter().map(move |t| (*kind, t)))
    }

    /// Canonical form: type name (or number) to sorted, deduplicated targets.
    pub fn to_json(&self) -> BTreeMap<String, Vec<NodeId>> {
        let mut result: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
        for (kind, targets) in &self.entries {
            let list = result.entry(reference_type::display(*kind)).or_default();
            list.extend(targets.iter().cloned());
            list.sort();
            list.dedup();
        }
        result
    }

    /// Reads the canonical form back. Keys are type names or decimal ids.
    pub fn from_json(raw: &BTreeMap<String, Vec<NodeId>>) -> Result<Self, SyncError> {
        let mut map = ReferenceMap::new();
        for (key, targets) in raw {
            let kind = reference_type::from_name(key)
                .or_else(|| key.parse().ok())
                .ok_or_else(|| SyncError::Config(format!("Unknown reference type '{}'", key)))?;
            for target in targets {
                map.add_reference(kind, target.clone());
            }
        }
        Ok(map)
    }
}

/// Canonical references plus the resolved/unresolved partition.
///
/// Every mutation keeps `resolved ∪ unresolved == all`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct References {
    all: ReferenceMap,
    resolved: ReferenceMap,
    unresolved: ReferenceMap,
}

impl References {
    pub fn new() -> Self {
        Self::default()
    }

    /// References read from a definition file are resolved from the start.
    pub fn resolved_from(map: ReferenceMap) -> Self {
        Self {
            all: map.clone(),
            resolved: map,
            unresolved: ReferenceMap::new(),
        }
    }

    pub fn add(&mut self, reference_type: i32, target: NodeId) {
        if self.all.add_reference(reference_type, target.clone()) {
            self.unresolved.add_reference(reference_type, target);
        }
    }

    pub fn delete(&mut self, reference_type: i32, target: &NodeId) -> Result<(), SyncError> {
        self.all.delete_reference(reference_type, target)?;
        if self.unresolved.has(reference_type, target) {
            self.unresolved.delete_reference(reference_type, target)?;
        } else {
            self.resolved.delete_reference(reference_type, target)?;
        }
        Ok(())
    }

    /// Moves every unresolved reference to `target` into the resolved partition.
    pub fn resolve_target(&mut self, target: &str) {
        let settled: Vec<(i32, NodeId)> = self
            .unresolved
            .iter()
            .filter(|(_, t)| t.to_string() == target)
            .map(|(kind, t)| (kind, t.clone()))
            .collect();
        for (kind, target) in settled {
            if let Ok(target) = self.unresolved.delete_reference(kind, &target) {
                self.resolved.add_reference(kind, target);
            }
        }
    }

    pub fn canonical(&self) -> &ReferenceMap {
        &self.all
    }

    pub fn resolved(&self) -> &ReferenceMap {
        &self.resolved
    }

    pub fn unresolved(&self) -> &ReferenceMap {
        &self.unresolved
    }

    pub fn get_single(&self, reference_type: i32) -> Option<&NodeId> {
        self.all.get_single(reference_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, &NodeId)> {
        self.all.iter()
    }

    #[cfg(test)]
    pub fn is_partition_consistent(&self) -> bool {
        let mut union = self.resolved.clone();
        for (kind, target) in self.unresolved.iter() {
            if !union.add_reference(kind, target.clone()) {
                return false;
            }
        }
        union.len() == self.all.len() && self.all.iter().all(|(k, t)| union.has(k, t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::reference_type::*;

    #[test]
    fn test_add_and_get_single_returns_first_inserted() {
        let mut map = ReferenceMap::new();
        map.add_reference(HAS_TYPE_DEFINITION, NodeId::string("b"));
        map.add_reference(HAS_TYPE_DEFINITION, NodeId::string("a"));
        assert_eq!(map.get_single(HAS_TYPE_DEFINITION), Some(&NodeId::string("b")));
        assert!(!map.add_reference(HAS_TYPE_DEFINITION, NodeId::string("a")));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_delete_missing_reference_fails() {
        let mut map = ReferenceMap::new();
        map.add_reference(HAS_COMPONENT, NodeId::string("AGENT.A"));
        let err = map
            .delete_reference(HAS_COMPONENT, &NodeId::string("AGENT.B"))
            .unwrap_err();
        assert_eq!(err.to_string(), "No HasComponent reference to AGENT.B");

        let err = map.delete_reference(9999, &NodeId::string("X")).unwrap_err();
        assert_eq!(err.to_string(), "No 9999 reference to X");

        map.delete_reference(HAS_COMPONENT, &NodeId::string("AGENT.A"))
            .unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn test_to_json_sorts_and_names() {
        let mut map = ReferenceMap::new();
        map.add_reference(HAS_MODELLING_RULE, NodeId::string("z"));
        map.add_reference(HAS_MODELLING_RULE, NodeId::string("a"));
        map.add_reference(4711, NodeId::Numeric(3));
        map.add_reference(TO_PARENT, NodeId::Numeric(47));

        let json = serde_json::to_string(&map.to_json()).unwrap();
        assert_eq!(
            json,
            r#"{"4711":[3],"HasModellingRule":["a","z"],"toParent":[47]}"#
        );

        let back = ReferenceMap::from_json(&map.to_json()).unwrap();
        assert!(back.has(4711, &NodeId::Numeric(3)));
        assert!(back.has(TO_PARENT, &NodeId::Numeric(47)));
    }

    #[test]
    fn test_partition_stays_consistent() {
        let mut refs = References::new();
        refs.add(HAS_TYPE_DEFINITION, NodeId::string("T"));
        refs.add(ORGANIZES, NodeId::string("O"));
        assert!(refs.is_partition_consistent());
        assert_eq!(refs.unresolved().len(), 2);

        refs.resolve_target("T");
        assert!(refs.is_partition_consistent());
        assert_eq!(refs.resolved().len(), 1);

        refs.resolve_target("T");
        assert_eq!(refs.resolved().len(), 1);
        assert_eq!(refs.unresolved().len(), 1);

        refs.delete(HAS_TYPE_DEFINITION, &NodeId::string("T")).unwrap();
        assert!(refs.is_partition_consistent());
        assert_eq!(refs.canonical().len(), 1);
    }
}
