//! Per-site location tree (spec.md §4.13): enforces acyclicity on `move`
//! and rebuilds cached `/a/b/c` paths on rename/move.
//!
//! Grounded in the same snapshot-grain shape as
//! [`super::device::DeviceRegistry`]; the tree itself is a `HashMap`
//! keyed by node id with parent pointers, walked top-down to rebuild
//! paths — the shape the teacher uses for
//! `vault::user_accounts` hierarchy lookups (parent-pointer map, no
//! separate tree crate).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};
use crate::keys::ActorKey;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationNode {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationTreeState {
    nodes: HashMap<String, LocationNode>,
}

pub struct LocationTree {
    key: ActorKey,
    state: LocationTreeState,
}

impl LocationTree {
    pub fn new(key: ActorKey) -> CoreResult<Self> {
        if !matches!(key, ActorKey::LocationTree { .. }) {
            return Err(CoreError::precondition("not a location tree key"));
        }
        Ok(Self {
            key,
            state: LocationTreeState::default(),
        })
    }

    pub fn from_state(key: ActorKey, state: LocationTreeState) -> CoreResult<Self> {
        if !matches!(key, ActorKey::LocationTree { .. }) {
            return Err(CoreError::precondition("not a location tree key"));
        }
        Ok(Self { key, state })
    }

    pub fn state(&self) -> &LocationTreeState {
        &self.state
    }

    pub fn get(&self, id: &str) -> Option<&LocationNode> {
        self.state.nodes.get(id)
    }

    pub fn add(&mut self, id: &str, name: &str, parent_id: Option<&str>) -> CoreResult<()> {
        if self.state.nodes.contains_key(id) {
            return Err(CoreError::conflict(format!(
                "location {id} already exists at {}",
                self.key
            )));
        }
        if let Some(parent) = parent_id {
            if !self.state.nodes.contains_key(parent) {
                return Err(CoreError::precondition(format!(
                    "parent location {parent} does not exist"
                )));
            }
        }
        let path = self.build_path(parent_id, name);
        self.state.nodes.insert(
            id.to_string(),
            LocationNode {
                id: id.to_string(),
                name: name.to_string(),
                parent_id: parent_id.map(str::to_string),
                path,
            },
        );
        Ok(())
    }

    pub fn rename(&mut self, id: &str, new_name: &str) -> CoreResult<()> {
        let parent_id = self
            .state
            .nodes
            .get(id)
            .ok_or_else(|| CoreError::not_initialized(format!("{}:{}", self.key, id)))?
            .parent_id
            .clone();
        self.state.nodes.get_mut(id).unwrap().name = new_name.to_string();
        self.rebuild_subtree_paths(id, parent_id.as_deref());
        Ok(())
    }

    /// spec.md §4.13: "target parent cannot be in the subtree of the node
    /// being moved" — the acyclicity check.
    pub fn move_node(&mut self, id: &str, new_parent_id: Option<&str>) -> CoreResult<()> {
        if !self.state.nodes.contains_key(id) {
            return Err(CoreError::not_initialized(format!("{}:{}", self.key, id)));
        }
        if let Some(new_parent) = new_parent_id {
            if new_parent == id {
                return Err(CoreError::precondition("a location cannot be its own parent"));
            }
            if !self.state.nodes.contains_key(new_parent) {
                return Err(CoreError::precondition(format!(
                    "parent location {new_parent} does not exist"
                )));
            }
            if self.is_in_subtree(id, new_parent) {
                return Err(CoreError::precondition(
                    "target parent is in the subtree of the node being moved",
                ));
            }
        }
        self.state.nodes.get_mut(id).unwrap().parent_id = new_parent_id.map(str::to_string);
        self.rebuild_subtree_paths(id, new_parent_id);
        Ok(())
    }

    /// Is `candidate` equal to or a descendant of `root`?
    fn is_in_subtree(&self, root: &str, candidate: &str) -> bool {
        let mut cursor = Some(candidate.to_string());
        while let Some(current) = cursor {
            if current == root {
                return true;
            }
            cursor = self.state.nodes.get(&current).and_then(|n| n.parent_id.clone());
        }
        false
    }

    fn build_path(&self, parent_id: Option<&str>, name: &str) -> String {
        match parent_id.and_then(|p| self.state.nodes.get(p)) {
            Some(parent) => format!("{}/{}", parent.path, name),
            None => format!("/{name}"),
        }
    }

    /// Recompute `path` for `id` and every descendant, after a rename or
    /// move changed an ancestor segment.
    fn rebuild_subtree_paths(&mut self, id: &str, parent_id: Option<&str>) {
        let name = self.state.nodes.get(id).unwrap().name.clone();
        let new_path = self.build_path(parent_id, &name);
        self.state.nodes.get_mut(id).unwrap().path = new_path;

        let children: Vec<String> = self
            .state
            .nodes
            .values()
            .filter(|n| n.parent_id.as_deref() == Some(id))
            .map(|n| n.id.clone())
            .collect();
        for child in children {
            let child_parent = Some(id);
            self.rebuild_subtree_paths(&child, child_parent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> LocationTree {
        LocationTree::new(ActorKey::LocationTree {
            org_id: "org1".to_string(),
            site_id: "site1".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn builds_nested_paths() {
        let mut t = tree();
        t.add("a", "Kitchen", None).unwrap();
        t.add("b", "Walk-in", Some("a")).unwrap();
        assert_eq!(t.get("a").unwrap().path, "/Kitchen");
        assert_eq!(t.get("b").unwrap().path, "/Kitchen/Walk-in");
    }

    #[test]
    fn move_rejects_moving_into_own_subtree() {
        let mut t = tree();
        t.add("a", "Kitchen", None).unwrap();
        t.add("b", "Walk-in", Some("a")).unwrap();
        let result = t.move_node("a", Some("b"));
        assert!(matches!(result, Err(CoreError::PreconditionViolation { .. })));
    }

    #[test]
    fn move_rebuilds_descendant_paths() {
        let mut t = tree();
        t.add("a", "Kitchen", None).unwrap();
        t.add("b", "Bar", None).unwrap();
        t.add("c", "Walk-in", Some("a")).unwrap();
        t.move_node("a", Some("b")).unwrap();
        assert_eq!(t.get("a").unwrap().path, "/Bar/Kitchen");
        assert_eq!(t.get("c").unwrap().path, "/Bar/Kitchen/Walk-in");
    }

    #[test]
    fn rename_rebuilds_own_and_descendant_paths() {
        let mut t = tree();
        t.add("a", "Kitchen", None).unwrap();
        t.add("b", "Walk-in", Some("a")).unwrap();
        t.rename("a", "Main Kitchen").unwrap();
        assert_eq!(t.get("a").unwrap().path, "/Main Kitchen");
        assert_eq!(t.get("b").unwrap().path, "/Main Kitchen/Walk-in");
    }
}
