//! Model-based property tests for the container types

use std::collections::HashMap;

use proptest::prelude::*;

use minisys::collections::{Directory, Fifo, PriorityQueue};

#[derive(Debug, Clone)]
enum DirOp {
    Insert(u64, u32),
    Remove(u64),
    Get(u64),
}

fn dir_op() -> impl Strategy<Value = DirOp> {
    prop_oneof![
        (0u64..512, any::<u32>()).prop_map(|(k, v)| DirOp::Insert(k, v)),
        (0u64..512).prop_map(DirOp::Remove),
        (0u64..512).prop_map(DirOp::Get),
    ]
}

proptest! {
    #[test]
    fn directory_matches_hashmap(ops in proptest::collection::vec(dir_op(), 0..400)) {
        let mut dir = Directory::new();
        let mut model: HashMap<u64, u32> = HashMap::new();
        for op in ops {
            match op {
                DirOp::Insert(k, v) => {
                    prop_assert_eq!(dir.insert(k, v), model.insert(k, v));
                }
                DirOp::Remove(k) => {
                    prop_assert_eq!(dir.remove(k), model.remove(&k));
                }
                DirOp::Get(k) => {
                    prop_assert_eq!(dir.get(k), model.get(&k));
                }
            }
            prop_assert_eq!(dir.len(), model.len());
        }
        let mut entries: Vec<(u64, u32)> = dir.iter().map(|(k, &v)| (k, v)).collect();
        entries.sort();
        let mut expected: Vec<(u64, u32)> = model.into_iter().collect();
        expected.sort();
        prop_assert_eq!(entries, expected);
    }

    #[test]
    fn priority_queue_dequeues_sorted_stable(entries in proptest::collection::vec((0u64..16, any::<u32>()), 0..100)) {
        let mut queue = PriorityQueue::new();
        for (i, &(prio, _)) in entries.iter().enumerate() {
            // tag values with their insertion index to observe tie order
            queue.enqueue(prio, (i, entries[i].1));
        }
        let mut last: Option<(u64, usize)> = None;
        let mut drained = 0;
        while let Some((prio, (index, _))) = queue.dequeue() {
            if let Some((lp, li)) = last {
                prop_assert!(prio >= lp);
                if prio == lp {
                    // equal priorities keep insertion order
                    prop_assert!(index > li);
                }
            }
            last = Some((prio, index));
            drained += 1;
        }
        prop_assert_eq!(drained, entries.len());
    }

    #[test]
    fn fifo_delete_removes_all_and_preserves_order(values in proptest::collection::vec(0u8..8, 0..64), target in 0u8..8) {
        let mut fifo = Fifo::new();
        for &v in &values {
            fifo.append(v);
        }
        let expect_removed = values.contains(&target);
        prop_assert_eq!(fifo.delete(&target), expect_removed);
        let rest: Vec<u8> = fifo.iter().copied().collect();
        let expected: Vec<u8> = values.iter().copied().filter(|&v| v != target).collect();
        prop_assert_eq!(rest, expected);
    }
}
