// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Priority-ordered list of in-flight messages for one queue
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: MessageList (insert/remove_highest/len/drain)
//! INVARIANTS: Descending priority; equal priorities keep arrival order

use alloc::collections::VecDeque;

use crate::error::{MqError, Result};
use crate::pool::MessageNode;
use crate::types::Priority;

/// Messages owned by one queue, highest priority at the head.
///
/// Insertion is a linear walk; queue depths are small and bounded by
/// `max_msgs`, and the walk gives exact priority-then-FIFO ordering.
#[derive(Debug, Default)]
pub struct MessageList {
    nodes: VecDeque<MessageNode>,
}

impl MessageList {
    /// Reserves room for `capacity` messages so enqueue never reallocates.
    pub fn try_with_capacity(capacity: usize) -> Result<Self> {
        let mut nodes = VecDeque::new();
        nodes.try_reserve_exact(capacity).map_err(|_| MqError::OutOfMemory)?;
        Ok(Self { nodes })
    }

    /// Links `node` after every queued node of equal or higher priority.
    pub fn insert(&mut self, node: MessageNode) {
        let prio = node.priority();
        let at = self
            .nodes
            .iter()
            .position(|queued| queued.priority() < prio)
            .unwrap_or(self.nodes.len());
        self.nodes.insert(at, node);
    }

    /// Unlinks the head: highest priority, oldest among equals.
    pub fn remove_highest(&mut self) -> Option<MessageNode> {
        self.nodes.pop_front()
    }

    pub fn peek_priority(&self) -> Option<Priority> {
        self.nodes.front().map(MessageNode::priority)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Priorities in delivery order.
    pub fn priorities(&self) -> impl Iterator<Item = Priority> + '_ {
        self.nodes.iter().map(MessageNode::priority)
    }

    /// Unlinks every node, in delivery order.
    pub fn drain(&mut self) -> impl Iterator<Item = MessageNode> + '_ {
        self.nodes.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn node(prio: u32, tag: &[u8]) -> MessageNode {
        MessageNode::detached(Priority::new(prio).unwrap(), tag)
    }

    fn drain_tags(list: &mut MessageList) -> Vec<Vec<u8>> {
        core::iter::from_fn(|| list.remove_highest()).map(|n| n.payload().to_vec()).collect()
    }

    #[test]
    fn higher_priority_first_fifo_among_equals() {
        let mut list = MessageList::try_with_capacity(4).unwrap();
        list.insert(node(5, b"A"));
        list.insert(node(10, b"B"));
        list.insert(node(5, b"C"));
        list.insert(node(10, b"D"));
        assert_eq!(list.peek_priority(), Some(Priority::new(10).unwrap()));
        assert_eq!(drain_tags(&mut list), [b"B".to_vec(), b"D".to_vec(), b"A".to_vec(), b"C".to_vec()]);
        assert!(list.is_empty());
    }

    #[test]
    fn lowest_priority_appends_at_tail() {
        let mut list = MessageList::default();
        list.insert(node(3, b"x"));
        list.insert(node(0, b"y"));
        list.insert(node(1, b"z"));
        let prios: Vec<u32> = list.priorities().map(Priority::as_raw).collect();
        assert_eq!(prios, [3, 1, 0]);
    }

    #[test]
    fn unreservable_capacity_is_out_of_memory() {
        assert_eq!(MessageList::try_with_capacity(usize::MAX).unwrap_err(), MqError::OutOfMemory);
    }

    #[test]
    fn remove_from_empty_is_none() {
        let mut list = MessageList::default();
        assert!(list.remove_highest().is_none());
        assert_eq!(list.peek_priority(), None);
    }

    #[test]
    fn drain_empties_in_order() {
        let mut list = MessageList::default();
        list.insert(node(1, b"lo"));
        list.insert(node(2, b"hi"));
        let drained: Vec<u32> = list.drain().map(|n| n.priority().as_raw()).collect();
        assert_eq!(drained, [2, 1]);
        assert_eq!(list.len(), 0);
    }
}
