// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for queue ordering and node accounting
//! OWNERS: @kernel-ipc-team
//! NOTE: Tests only; single task, non-blocking descriptors.
//!
//! TEST_SCOPE:
//!   - Delivery order: descending priority, FIFO among equal priorities
//!   - Capacity bound holds across arbitrary send/receive interleavings
//!   - Pool node accounting after accepted and rejected sends
//!
//! TEST_SCENARIOS:
//!   - receive_order_is_stable_priority_sort(): any fill of the queue drains in stable priority order
//!   - interleaved_ops_match_model(): random ops agree with a sorted-vector model
//!   - rejected_sends_never_leak_nodes(): oversized/invalid sends leave the pool untouched

use alloc::vec::Vec;

use proptest::prelude::*;

use crate::config::{PoolConfig, QueueAttr, MQ_PRIO_MAX};
use crate::descriptor::{MqDescriptor, OpenFlags};
use crate::error::MqError;
use crate::host::HostKernel;
use crate::queue::MqSubsystem;

const DEPTH: usize = 6;
const MSG_SIZE: usize = 8;

fn open_queue() -> MqDescriptor {
    let kernel = HostKernel::new();
    let sub = MqSubsystem::new(
        PoolConfig::new().with_general(DEPTH).with_irq_reserve(1).with_node_bytes(MSG_SIZE),
        kernel.services(),
    )
    .unwrap();
    let queue = sub.create_queue(QueueAttr::new(DEPTH, MSG_SIZE)).unwrap();
    MqDescriptor::open(queue, OpenFlags::RDWR | OpenFlags::NONBLOCK)
}

#[derive(Debug, Clone)]
enum Op {
    Send(u32, Vec<u8>),
    Receive,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..=MQ_PRIO_MAX, proptest::collection::vec(any::<u8>(), 0..=MSG_SIZE))
            .prop_map(|(prio, payload)| Op::Send(prio, payload)),
        Just(Op::Receive),
    ]
}

proptest! {
    #[test]
    fn receive_order_is_stable_priority_sort(prios in proptest::collection::vec(0..=MQ_PRIO_MAX, 1..=DEPTH)) {
        let desc = open_queue();
        for (seq, &prio) in prios.iter().enumerate() {
            desc.send(&[seq as u8], prio).unwrap();
        }

        let mut expected: Vec<(u32, u8)> = prios.iter().enumerate().map(|(seq, &p)| (p, seq as u8)).collect();
        // sort_by is stable: equal priorities keep send order.
        expected.sort_by(|a, b| b.0.cmp(&a.0));

        let mut buf = [0_u8; MSG_SIZE];
        for (prio, seq) in expected {
            let got = desc.receive(&mut buf).unwrap();
            prop_assert_eq!(got.priority.as_raw(), prio);
            prop_assert_eq!(&buf[..got.len], &[seq][..]);
        }
        prop_assert_eq!(desc.receive(&mut buf), Err(MqError::WouldBlock));
    }

    #[test]
    fn interleaved_ops_match_model(ops in proptest::collection::vec(arb_op(), 1..64)) {
        let desc = open_queue();
        let pool = desc.queue().subsystem().pool();
        // Model: (priority, payload) in delivery order.
        let mut model: Vec<(u32, Vec<u8>)> = Vec::new();
        let mut buf = [0_u8; MSG_SIZE];

        for op in ops {
            match op {
                Op::Send(prio, payload) => {
                    let res = desc.send(&payload, prio);
                    if model.len() == DEPTH {
                        prop_assert_eq!(res, Err(MqError::WouldBlock));
                    } else {
                        prop_assert_eq!(res, Ok(()));
                        let at = model.iter().position(|(p, _)| *p < prio).unwrap_or(model.len());
                        model.insert(at, (prio, payload));
                    }
                }
                Op::Receive => {
                    let res = desc.receive(&mut buf);
                    if model.is_empty() {
                        prop_assert_eq!(res, Err(MqError::WouldBlock));
                    } else {
                        let (prio, payload) = model.remove(0);
                        let got = res.unwrap();
                        prop_assert_eq!(got.priority.as_raw(), prio);
                        prop_assert_eq!(&buf[..got.len], &payload[..]);
                    }
                }
            }
            prop_assert!(desc.queue().len() <= DEPTH);
            prop_assert_eq!(desc.queue().len(), model.len());
            prop_assert_eq!(pool.stats().general_free + model.len(), DEPTH);
            prop_assert_eq!(pool.stats().dynamic_live, 0);
        }
    }

    #[test]
    fn rejected_sends_never_leak_nodes(extra in 1usize..32, bad_prio in (MQ_PRIO_MAX + 1)..1000) {
        let desc = open_queue();
        let pool = desc.queue().subsystem().pool();
        let before = pool.stats();
        let oversized = alloc::vec![0_u8; MSG_SIZE + extra];
        prop_assert_eq!(desc.send(&oversized, 0), Err(MqError::MessageTooLarge));
        prop_assert_eq!(desc.send(b"ok", bad_prio), Err(MqError::InvalidArgument));
        prop_assert_eq!(pool.stats(), before);
        prop_assert!(desc.queue().is_empty());
    }
}
