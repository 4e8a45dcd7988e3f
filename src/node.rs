// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::buffer::BufferQueue;
use core::fmt;

/// Number of nodes in every [`NodeGroup`].
pub const NODE_COUNT: usize = 6;

/// Role of a node within a node group.
///
/// The discriminant is the node's bit in the group streaming map.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeRole {
    /// Primary raw input (required)
    Input0 = 0,
    /// Secondary raw input, used for staggered multi-exposure capture
    Input1 = 1,
    /// Processing parameters
    Params = 2,
    /// Processed output frame (required)
    Frame = 3,
    /// Infrared channel of RGB-IR sensors
    Ir = 4,
    /// Statistics output
    Stats = 5,
}

impl NodeRole {
    pub const ALL: [NodeRole; NODE_COUNT] = [
        NodeRole::Input0,
        NodeRole::Input1,
        NodeRole::Params,
        NodeRole::Frame,
        NodeRole::Ir,
        NodeRole::Stats,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn bit(self) -> RoleMask {
        RoleMask(1 << self as u8)
    }

    pub const fn name(self) -> &'static str {
        match self {
            NodeRole::Input0 => "input0",
            NodeRole::Input1 => "input1",
            NodeRole::Params => "params",
            NodeRole::Frame => "frame",
            NodeRole::Ir => "ir",
            NodeRole::Stats => "stats",
        }
    }

    /// Metadata nodes carry a CPU payload instead of image planes.
    pub const fn is_meta(self) -> bool {
        matches!(self, NodeRole::Params | NodeRole::Stats)
    }

    /// Nodes the hardware writes into.
    pub const fn is_capture(self) -> bool {
        matches!(self, NodeRole::Frame | NodeRole::Stats)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of node roles, one bit per [`NodeRole`].
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct RoleMask(u8);

impl RoleMask {
    pub const EMPTY: RoleMask = RoleMask(0);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, role: NodeRole) -> bool {
        self.0 & role.bit().0 != 0
    }

    pub const fn contains_all(self, other: RoleMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, role: NodeRole) {
        self.0 |= role.bit().0;
    }

    pub fn remove(&mut self, role: NodeRole) {
        self.0 &= !role.bit().0;
    }

    /// Roles present in `self` but not in `other`.
    pub const fn difference(self, other: RoleMask) -> RoleMask {
        RoleMask(self.0 & !other.0)
    }

    pub fn iter(self) -> impl Iterator<Item = NodeRole> {
        NodeRole::ALL.into_iter().filter(move |r| self.contains(*r))
    }
}

impl FromIterator<NodeRole> for RoleMask {
    fn from_iter<I: IntoIterator<Item = NodeRole>>(iter: I) -> Self {
        let mut mask = RoleMask::EMPTY;
        for role in iter {
            mask.insert(role);
        }
        mask
    }
}

impl fmt::Debug for RoleMask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#04x}", self.0)?;
        f.debug_list().entries(self.iter()).finish()
    }
}

/// One logical I/O endpoint of a node group.
#[derive(Debug)]
pub struct Node {
    role: NodeRole,
    queue: BufferQueue,
}

impl Node {
    pub fn new(role: NodeRole) -> Self {
        Self {
            role,
            queue: BufferQueue::new(),
        }
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn queue(&self) -> &BufferQueue {
        &self.queue
    }
}

/// Fixed set of nodes forming one independently schedulable pipeline.
///
/// The group only owns the nodes and their queues. Its streaming map,
/// formats and frame sequence are scheduling state and live behind the
/// scheduler lock.
#[derive(Debug)]
pub struct NodeGroup {
    id: usize,
    nodes: [Node; NODE_COUNT],
}

impl NodeGroup {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            nodes: NodeRole::ALL.map(Node::new),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn node(&self, role: NodeRole) -> &Node {
        &self.nodes[role.index()]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_bits_follow_slot_order() {
        for (i, role) in NodeRole::ALL.iter().enumerate() {
            assert_eq!(role.index(), i);
            assert_eq!(role.bit().bits(), 1 << i);
        }
    }

    #[test]
    fn mask_set_operations() {
        let mut mask: RoleMask = [NodeRole::Input0, NodeRole::Frame].into_iter().collect();
        assert!(mask.contains(NodeRole::Frame));
        assert!(!mask.contains(NodeRole::Params));

        let required: RoleMask = [NodeRole::Input0, NodeRole::Params, NodeRole::Frame]
            .into_iter()
            .collect();
        assert!(!mask.contains_all(required));
        assert_eq!(required.difference(mask), NodeRole::Params.bit());

        mask.insert(NodeRole::Params);
        assert!(mask.contains_all(required));
        mask.remove(NodeRole::Input0);
        assert_eq!(
            mask.iter().collect::<Vec<_>>(),
            vec![NodeRole::Params, NodeRole::Frame]
        );
    }

    #[test]
    fn group_nodes_are_in_role_order() {
        let group = NodeGroup::new(2);
        assert_eq!(group.id(), 2);
        for role in NodeRole::ALL {
            assert_eq!(group.node(role).role(), role);
            assert!(group.node(role).queue().is_empty());
        }
    }
}
