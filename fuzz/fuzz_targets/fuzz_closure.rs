//! Fuzz the reachability maintainer with arbitrary edge histories.
//!
//! Every byte pair is one edge insert or delete over eight vertices. Both
//! deletion strategies must end with the same closure.

#![no_main]

use libfuzzer_sys::fuzz_target;

use trellis_eval::{ClosureStrategy, ReachabilityMaintainer};

fuzz_target!(|data: &[u8]| {
    let mut counting = ReachabilityMaintainer::new(ClosureStrategy::Counting);
    let mut dred = ReachabilityMaintainer::new(ClosureStrategy::DeleteAndRederive);
    for op in data.chunks_exact(2) {
        let (s, t) = (op[0] & 7, op[1] & 7);
        if op[0] & 0x80 == 0 {
            counting.insert_edge(s, t);
            dred.insert_edge(s, t);
        } else {
            counting.delete_edge(&s, &t);
            dred.delete_edge(&s, &t);
        }
    }
    assert_eq!(counting.pairs(), dred.pairs());
    assert_eq!(counting.relation_size(), dred.relation_size());
});
