//! Arena-backed mirror of the remote span hierarchy.
//!
//! Nodes live in a flat `id → Node` map; the hierarchy is expressed only
//! through parent ids and ordered child-id lists, so detaching and
//! reattaching never moves a subtree in memory.

use std::collections::HashMap;

/// Id of the implicit root span.
pub const ROOT_ID: u32 = 0;

/// Display name of the root.
pub const ROOT_NAME: &str = "/";

#[derive(Debug, Clone)]
struct Node {
    name: String,
    parent: Option<u32>,
    children: Vec<u32>,
}

impl Node {
    fn new(name: String, parent: Option<u32>) -> Self {
        Self {
            name,
            parent,
            children: Vec::new(),
        }
    }
}

/// Span hierarchy for one connection. Owned by the worker; no locking.
#[derive(Debug, Clone)]
pub struct SpanTree {
    nodes: HashMap<u32, Node>,
}

impl SpanTree {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT_ID, Node::new(ROOT_NAME.to_string(), None));
        Self { nodes }
    }

    /// Drop every span and keep only the root.
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.nodes
            .insert(ROOT_ID, Node::new(ROOT_NAME.to_string(), None));
    }

    /// Number of spans, root excluded.
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: u32) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.nodes.get(&id).map(|n| n.name.as_str())
    }

    /// Last known parent; `None` for the root, unknown ids and dropped nodes.
    pub fn parent_of(&self, id: u32) -> Option<u32> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    /// Children in attachment order.
    pub fn children_of(&self, id: u32) -> &[u32] {
        self.nodes
            .get(&id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Add `id` directly under the root.
    ///
    /// An already known id is renamed and moved back under the root with
    /// its subtree.
    pub fn insert_root_child(&mut self, id: u32, name: impl Into<String>) {
        if id == ROOT_ID {
            return;
        }
        let name = name.into();
        match self.nodes.get_mut(&id) {
            Some(node) => {
                node.name = name;
                if node.parent == Some(ROOT_ID) {
                    return;
                }
                self.detach(id);
                self.attach(id, ROOT_ID);
            }
            None => {
                self.nodes.insert(id, Node::new(name, None));
                self.attach(id, ROOT_ID);
            }
        }
    }

    /// Move `id` under `new_parent`.
    ///
    /// Returns `true` iff the node now sits under `new_parent` and did not
    /// before. If `new_parent` is unknown, or is `id` itself or one of its
    /// descendants, the node is detached and left dropped.
    pub fn relocate(&mut self, id: u32, new_parent: u32) -> bool {
        let Some(node) = self.nodes.get(&id) else {
            return false;
        };
        if id == ROOT_ID || node.parent == Some(new_parent) {
            return false;
        }

        self.detach(id);
        if !self.contains(new_parent) || self.is_in_subtree(new_parent, id) {
            return false;
        }
        self.attach(id, new_parent);
        true
    }

    /// Make `id` a sibling of `followed`. No-op while `followed` has no parent.
    pub fn follows(&mut self, id: u32, followed: u32) -> bool {
        match self.parent_of(followed) {
            Some(parent) => self.relocate(id, parent),
            None => false,
        }
    }

    /// `/`-joined names along the current parent chain, root excluded.
    ///
    /// The root itself is `"/"`; unknown ids have no path.
    pub fn path_of(&self, id: u32) -> Option<String> {
        if id == ROOT_ID {
            return Some(ROOT_NAME.to_string());
        }
        let mut segments = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == ROOT_ID {
                break;
            }
            let node = self.nodes.get(&current)?;
            segments.push(node.name.as_str());
            cursor = node.parent;
        }
        segments.reverse();
        Some(segments.join("/"))
    }

    /// Whether `candidate` is `ancestor` or lies below it.
    fn is_in_subtree(&self, candidate: u32, ancestor: u32) -> bool {
        let mut cursor = Some(candidate);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent_of(current);
        }
        false
    }

    fn detach(&mut self, id: u32) {
        let parent = match self.nodes.get_mut(&id) {
            Some(node) => node.parent.take(),
            None => return,
        };
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.retain(|&child| child != id);
        }
    }

    fn attach(&mut self, id: u32, parent: u32) {
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.push(id);
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent = Some(parent);
        }
    }
}

impl Default for SpanTree {
    fn default() -> Self {
        Self::new()
    }
}
