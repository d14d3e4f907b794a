//! Property-based tests for the file handle registry.
//!
//! Random interleavings of writes, injected write/close failures and idle
//! sweeps must preserve:
//! - at most one open handle per path
//! - every successful write lands exactly once, in order, on its path
//! - a failed write leaves the path without an open handle
//! - a sweep removes every entry even when its close fails

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use proptest::prelude::*;

use auditsink_core::FileHandleRegistry;
use auditsink_core::testing::RecordingHandleFactory;

const PATHS: [&str; 3] = ["/audit/a", "/audit/b", "/audit/c"];

#[derive(Debug, Clone)]
enum Op {
    Write(usize),
    FailNextWrite(usize),
    FailNextClose(usize),
    SweepAll,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0..PATHS.len()).prop_map(Op::Write),
        1 => (0..PATHS.len()).prop_map(Op::FailNextWrite),
        1 => (0..PATHS.len()).prop_map(Op::FailNextClose),
        1 => Just(Op::SweepAll),
    ]
}

proptest! {
    #[test]
    fn registry_preserves_delivery_invariants(ops in prop::collection::vec(arb_op(), 0..120)) {
        let factory = RecordingHandleFactory::new();
        let registry = FileHandleRegistry::new(Arc::new(factory.clone()));

        let mut delivered: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        let mut open: BTreeSet<&str> = BTreeSet::new();
        let mut write_armed: BTreeSet<usize> = BTreeSet::new();

        for (seq, op) in ops.into_iter().enumerate() {
            match op {
                Op::Write(idx) => {
                    let path = PATHS[idx];
                    let payload = format!("p{seq}");
                    let result = registry.write(Path::new(path), "q-prop", &payload);
                    if write_armed.remove(&idx) {
                        prop_assert!(result.is_err());
                        open.remove(path);
                    } else {
                        prop_assert!(result.is_ok());
                        delivered.entry(path).or_default().push(payload);
                        open.insert(path);
                    }
                }
                Op::FailNextWrite(idx) => {
                    factory.fail_write(PATHS[idx], 1);
                    write_armed.insert(idx);
                }
                Op::FailNextClose(idx) => factory.fail_close(PATHS[idx], 1),
                Op::SweepAll => {
                    let report = registry.evict_idle(
                        Instant::now() + Duration::from_secs(3600),
                        Duration::from_secs(1),
                    );
                    prop_assert_eq!(report.removed(), open.len());
                    prop_assert!(registry.is_empty());
                    open.clear();
                }
            }

            let expected: Vec<PathBuf> = open.iter().map(PathBuf::from).collect();
            prop_assert_eq!(registry.open_paths(), expected);
        }

        for path in PATHS {
            let written: Vec<String> = factory
                .handles_for(path)
                .into_iter()
                .flat_map(|handle| handle.writes)
                .collect();
            let expected = delivered.get(path).cloned().unwrap_or_default();
            prop_assert_eq!(written, expected);
        }
    }
}
