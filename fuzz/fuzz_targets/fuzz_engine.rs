//! Fuzz incremental evaluation of a recursive program.
//!
//! Bytes are read as edge toggles over six vertices, synced in batches of
//! four. The maintained match sets must equal a fresh evaluation.

#![no_main]

use libfuzzer_sys::fuzz_target;

use trellis_eval::{Engine, EngineOptions, FactStore, Value};
use trellis_ir::{Program, ProgramBuilder};

fn program() -> Program {
    let mut b = ProgramBuilder::new();
    b.relation("edge", 2).unwrap();
    b.query("path", &["x", "y"], |q| {
        q.clause(|c| {
            c.relation("edge", &["x", "y"]);
        });
        q.clause(|c| {
            c.relation("edge", &["x", "z"]).call("path", &["z", "y"]);
        });
    })
    .unwrap();
    b.query("reach", &["x", "y"], |q| {
        q.clause(|c| {
            c.transitive_call("path", &["x", "y"]);
        });
    })
    .unwrap();
    b.query("one_way", &["x", "y"], |q| {
        q.clause(|c| {
            c.relation("edge", &["x", "y"]).negated_call("reach", &["y", "x"]);
        });
    })
    .unwrap();
    b.build()
}

fuzz_target!(|data: &[u8]| {
    let mut store = FactStore::new();
    store.declare("edge", 2).unwrap();
    let mut engine = Engine::new(program(), &store, EngineOptions::default()).unwrap();
    for batch in data.chunks(4) {
        for byte in batch {
            let edge = vec![Value::Int(i64::from(byte % 6)), Value::Int(i64::from(byte / 6 % 6))];
            if !store.remove("edge", &edge).unwrap() {
                store.insert("edge", edge).unwrap();
            }
        }
        engine.sync(&mut store).unwrap();
    }
    let fresh = Engine::new(program(), &store, EngineOptions::default()).unwrap();
    for query in ["path", "reach", "one_way"] {
        assert_eq!(
            engine.all_matches(query, &[]).unwrap(),
            fresh.all_matches(query, &[]).unwrap()
        );
    }
});
