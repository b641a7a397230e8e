//! Waiter bookkeeping for dependency gating
//!
//! A waiter is an item (usually a node) plus the set of target ids it still waits for. Resolving
//! a target releases every waiter whose set became empty. All mutation happens through
//! `register_waiter`, `resolve` and `fail`.

use crate::error::UnresolvedEdge;
use std::collections::{BTreeMap, BTreeSet};

struct Waiter<T> {
    key: String,
    item: T,
    /// Pending target id to the name of the reference type pointing at it.
    pending: BTreeMap<String, String>,
}

pub struct DependencyTable<T> {
    waiters: Vec<Option<Waiter<T>>>,
    by_target: BTreeMap<String, BTreeSet<usize>>,
    waiting: usize,
}

impl<T> DependencyTable<T> {
    pub fn new() -> Self {
        Self {
            waiters: Vec::new(),
            by_target: BTreeMap::new(),
            waiting: 0,
        }
    }

    /// Registers `item` as waiting for `pending` targets. Hands the item back when there is
    /// nothing to wait for.
    pub fn register_waiter(
        &mut self,
        key: impl Into<String>,
        item: T,
        pending: BTreeMap<String, String>,
    ) -> Option<T> {
        if pending.is_empty() {
            return Some(item);
        }
        let index = self.waiters.len();
        for target in pending.keys() {
            self.by_target.entry(target.clone()).or_default().insert(index);
        }
        self.waiters.push(Some(Waiter {
            key: key.into(),
            item,
            pending,
        }));
        self.waiting += 1;
        None
    }

    /// Marks `target` as handled. Returns the items that have nothing left to wait for, in
    /// registration order.
    pub fn resolve(&mut self, target: &str) -> Vec<T> {
        let Some(indices) = self.by_target.remove(target) else {
            return Vec::new();
        };
        let mut ready = Vec::new();
        for index in indices {
            let done = match self.waiters.get_mut(index) {
                Some(Some(waiter)) => {
                    waiter.pending.remove(target);
                    waiter.pending.is_empty()
                }
                _ => false,
            };
            if done {
                if let Some(waiter) = self.waiters.get_mut(index).and_then(Option::take) {
                    self.waiting -= 1;
                    ready.push(waiter.item);
                }
            }
        }
        ready
    }

    /// Drops every waiter that waits for `target`, which will never be handled. Returns the keys
    /// of the dropped waiters.
    pub fn fail(&mut self, target: &str) -> Vec<String> {
        let Some(indices) = self.by_target.remove(target) else {
            return Vec::new();
        };
        let mut dropped = Vec::new();
        for index in indices {
            let Some(waiter) = self.waiters.get_mut(index).and_then(Option::take) else {
                continue;
            };
            self.waiting -= 1;
            for other in waiter.pending.keys().filter(|t| t.as_str() != target) {
                if let Some(set) = self.by_target.get_mut(other) {
                    set.remove(&index);
                    if set.is_empty() {
                        self.by_target.remove(other);
                    }
                }
            }
            dropped.push(waiter.key);
        }
        dropped
    }

    pub fn is_empty(&self) -> bool {
        self.waiting == 0
    }

    /// Every target someone still waits for, sorted.
    pub fn pending_targets(&self) -> Vec<String> {
        self.by_target.keys().cloned().collect()
    }

    /// Every edge that never resolved, ordered by waiter then target.
    pub fn unresolved_edges(&self) -> Vec<UnresolvedEdge> {
        let mut edges: Vec<UnresolvedEdge> = self
            .waiters
            .iter()
            .flatten()
            .flat_map(|waiter| {
                waiter.pending.iter().map(|(to, reference_type)| UnresolvedEdge {
                    from: waiter.key.clone(),
                    reference_type: reference_type.clone(),
                    to: to.clone(),
                })
            })
            .collect();
        edges.sort_by(|a, b| (&a.from, &a.to).cmp(&(&b.from, &b.to)));
        edges
    }
}

impl<T> Default for DependencyTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
