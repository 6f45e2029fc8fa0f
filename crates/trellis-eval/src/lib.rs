//! Incremental query evaluation.
//!
//! Queries from a [`trellis_ir::Program`] are compiled clause by clause into
//! join plans ([`planner`]), superimposed into one operator network, and kept
//! up to date as base facts change. Recursive queries are evaluated in
//! phased communication groups; transitive calls are served by a
//! [`ReachabilityMaintainer`].
//!
//! # Example
//!
//! ```
//! use trellis_eval::{Engine, EngineOptions, FactStore, Value};
//! use trellis_ir::ProgramBuilder;
//!
//! let mut builder = ProgramBuilder::new();
//! builder.relation("edge", 2).unwrap();
//! builder
//!     .query("path", &["x", "y"], |q| {
//!         q.clause(|c| {
//!             c.transitive_call("step", &["x", "y"]);
//!         });
//!     })
//!     .unwrap();
//! builder
//!     .query("step", &["x", "y"], |q| {
//!         q.clause(|c| {
//!             c.relation("edge", &["x", "y"]);
//!         });
//!     })
//!     .unwrap();
//!
//! let mut facts = FactStore::new();
//! facts.declare("edge", 2).unwrap();
//! let mut engine = Engine::new(builder.build(), &facts, EngineOptions::default()).unwrap();
//!
//! facts.insert("edge", vec![Value::Int(1), Value::Int(2)]).unwrap();
//! facts.insert("edge", vec![Value::Int(2), Value::Int(3)]).unwrap();
//! engine.sync(&mut facts).unwrap();
//! assert_eq!(engine.count_matches("path", &[]).unwrap(), 3); // (1,2), (2,3), (1,3)
//!
//! facts.remove("edge", &vec![Value::Int(1), Value::Int(2)]).unwrap();
//! engine.sync(&mut facts).unwrap();
//! assert_eq!(engine.all_matches("path", &[]).unwrap(), vec![vec![Value::Int(2), Value::Int(3)]]);
//! ```

mod cancel;
mod classifier;
mod engine;
mod error;
mod facts;
mod network;
mod options;
pub mod planner;
pub mod reachability;
mod relation;
mod scheduler;

pub use cancel::CancellationToken;
pub use classifier::GroupId;
pub use engine::{Engine, ListenerId, MatchListener};
pub use error::{EvalError, PlanError};
pub use facts::{FactBase, FactChange, FactStore};
pub use options::{ClosureStrategy, EngineOptions, PlannerOptions};
pub use reachability::{ClosureObserver, ObserverHandle, ReachabilityMaintainer};
pub use relation::RelationMemory;
pub use scheduler::{FlushStats, GroupKind};
pub use trellis_ir::{Tuple, Value};
