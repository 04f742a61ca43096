//! Invocation trees
//!
//! An invocation records one traced call and the calls nested in it. Agents
//! control how deep a tree goes, so cloning, dropping, comparing, formatting
//! and (de)serializing a tree all use explicit work-lists instead of
//! call-stack recursion.
//!
//! On the wire a tree is a flat pre-order list of nodes, each carrying its
//! own data and the number of direct children that follow it:
//!
//! ```json
//! {"nodes": [{"identity": {..}, "duration": 4.0, "children": 1},
//!            {"identity": {..}, "duration": 1.5, "children": 0}]}
//! ```
//!
//! Nesting depth of the JSON stays constant however deep the tree is.

use crate::record::{RecordIdentity, SqlStatementRecord, TimerRecord};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// One node of an invocation tree
pub struct InvocationRecord {
    pub identity: RecordIdentity,
    /// Duration of the invocation in milliseconds
    pub duration: f64,
    pub nested: Vec<InvocationRecord>,
    /// Timing measurement captured for this call
    pub timer: Option<TimerRecord>,
    /// SQL statement executed by this call
    pub sql_statement: Option<SqlStatementRecord>,
}

impl InvocationRecord {
    pub fn new(identity: RecordIdentity) -> Self {
        Self {
            identity,
            duration: 0.0,
            nested: Vec::new(),
            timer: None,
            sql_statement: None,
        }
    }

    pub fn with_timer(mut self, timer: TimerRecord) -> Self {
        self.timer = Some(timer);
        self
    }

    pub fn with_sql_statement(mut self, statement: SqlStatementRecord) -> Self {
        self.sql_statement = Some(statement);
        self
    }

    pub fn with_nested(mut self, nested: Vec<InvocationRecord>) -> Self {
        self.nested = nested;
        self
    }

    /// Structurally independent deep copy of the whole tree
    pub fn cloned_invocation(&self) -> InvocationRecord {
        // Each frame holds a source node and the copies of its children
        // finished so far. A frame is complete once every child is copied.
        let mut stack: Vec<(&InvocationRecord, Vec<InvocationRecord>)> =
            vec![(self, Vec::with_capacity(self.nested.len()))];

        loop {
            let next_child = match stack.last() {
                Some(&(node, ref copied)) => node.nested.get(copied.len()),
                None => unreachable!("root frame is popped only when returning"),
            };

            if let Some(child) = next_child {
                stack.push((child, Vec::with_capacity(child.nested.len())));
                continue;
            }

            if let Some((node, children)) = stack.pop() {
                let copy = node.detached_copy(children);
                match stack.last_mut() {
                    Some((_, siblings)) => siblings.push(copy),
                    None => return copy,
                }
            }
        }
    }

    /// Copy of this node's own data with the given children
    fn detached_copy(&self, nested: Vec<InvocationRecord>) -> InvocationRecord {
        InvocationRecord {
            identity: self.identity.clone(),
            duration: self.duration,
            nested,
            timer: self.timer.clone(),
            sql_statement: self.sql_statement.clone(),
        }
    }

    /// Every node below this one, in depth-first pre-order
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants {
            stack: self.nested.iter().rev().collect(),
        }
    }

    /// This node followed by every node below it, in pre-order
    fn pre_order(&self) -> impl Iterator<Item = &InvocationRecord> + '_ {
        std::iter::once(self).chain(self.descendants())
    }

    fn flat_nodes(&self) -> Vec<FlatNodeRef<'_>> {
        self.pre_order().map(FlatNodeRef::from).collect()
    }

    /// Number of nodes in the tree, including this one
    pub fn node_count(&self) -> usize {
        1 + self.descendants().count()
    }

    /// Length of the longest root-to-leaf path, counting nodes
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(self, 1usize)];
        while let Some((node, level)) = stack.pop() {
            deepest = deepest.max(level);
            stack.extend(node.nested.iter().map(|child| (child, level + 1)));
        }
        deepest
    }
}

impl Clone for InvocationRecord {
    fn clone(&self) -> Self {
        self.cloned_invocation()
    }
}

impl Drop for InvocationRecord {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.nested);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.nested);
        }
    }
}

impl PartialEq for InvocationRecord {
    fn eq(&self, other: &Self) -> bool {
        // Pre-order with child counts determines the shape uniquely
        self.pre_order()
            .map(FlatNodeRef::from)
            .eq(other.pre_order().map(FlatNodeRef::from))
    }
}

impl fmt::Debug for InvocationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationRecord")
            .field("nodes", &self.flat_nodes())
            .finish()
    }
}

impl Serialize for InvocationRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        FlatTreeRef {
            nodes: self.flat_nodes(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for InvocationRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tree = FlatTree::deserialize(deserializer)?;
        rebuild(tree.nodes).map_err(D::Error::custom)
    }
}

/// Borrowed wire form of one node
#[derive(Debug, PartialEq, Serialize)]
struct FlatNodeRef<'a> {
    identity: &'a RecordIdentity,
    duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    timer: Option<&'a TimerRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sql_statement: Option<&'a SqlStatementRecord>,
    children: usize,
}

impl<'a> From<&'a InvocationRecord> for FlatNodeRef<'a> {
    fn from(node: &'a InvocationRecord) -> Self {
        Self {
            identity: &node.identity,
            duration: node.duration,
            timer: node.timer.as_ref(),
            sql_statement: node.sql_statement.as_ref(),
            children: node.nested.len(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename = "InvocationRecord")]
struct FlatTreeRef<'a> {
    nodes: Vec<FlatNodeRef<'a>>,
}

#[derive(Deserialize)]
struct FlatNode {
    identity: RecordIdentity,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    timer: Option<TimerRecord>,
    #[serde(default)]
    sql_statement: Option<SqlStatementRecord>,
    #[serde(default)]
    children: usize,
}

impl FlatNode {
    fn into_record(self) -> InvocationRecord {
        InvocationRecord {
            identity: self.identity,
            duration: self.duration,
            nested: Vec::new(),
            timer: self.timer,
            sql_statement: self.sql_statement,
        }
    }
}

#[derive(Deserialize)]
struct FlatTree {
    nodes: Vec<FlatNode>,
}

/// Rebuild a tree from its pre-order node list
fn rebuild(nodes: Vec<FlatNode>) -> Result<InvocationRecord, String> {
    let mut nodes = nodes.into_iter();
    // Each frame holds a node and how many of its children are still to come
    let mut stack: Vec<(InvocationRecord, usize)> = Vec::new();

    loop {
        while matches!(stack.last(), Some((_, 0))) {
            let Some((done, _)) = stack.pop() else {
                break;
            };
            match stack.last_mut() {
                Some((parent, _)) => parent.nested.push(done),
                None if nodes.as_slice().is_empty() => return Ok(done),
                None => {
                    return Err(format!(
                        "{} invocation nodes follow the end of the tree",
                        nodes.len()
                    ))
                }
            }
        }

        let Some(flat) = nodes.next() else {
            return Err(if stack.is_empty() {
                "invocation tree has no nodes".to_string()
            } else {
                "invocation tree ends before all children are listed".to_string()
            });
        };
        if let Some((_, remaining)) = stack.last_mut() {
            *remaining -= 1;
        }
        let children = flat.children;
        stack.push((flat.into_record(), children));
    }
}

/// Pre-order iterator over the descendants of an invocation
pub struct Descendants<'a> {
    stack: Vec<&'a InvocationRecord>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a InvocationRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.nested.iter().rev());
        Some(node)
    }
}
