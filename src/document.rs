//! JSON program documents.
//!
//! ```json
//! {
//!   "relations": [{ "name": "edge", "arity": 2 }],
//!   "queries": [{
//!     "name": "path",
//!     "parameters": ["x", "y"],
//!     "clauses": [
//!       [{ "relation": { "view": "edge", "args": ["x", "y"] } }],
//!       [{ "relation": { "view": "edge", "args": ["x", "z"] } },
//!        { "call": { "query": "path", "args": ["z", "y"] } }]
//!     ]
//!   }],
//!   "facts": { "edge": [[1, 2], [2, 3]] },
//!   "steps": [{ "insert": { "edge": [[3, 1]] } }]
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use trellis_eval::{EngineOptions, FactStore, Tuple, Value};
use trellis_ir::{FunctionalDependency, Program, ProgramBuilder};

#[derive(Debug, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub relations: Vec<RelationSpec>,
    #[serde(default)]
    pub queries: Vec<QuerySpec>,
    #[serde(default)]
    pub facts: BTreeMap<String, Vec<Vec<serde_json::Value>>>,
    #[serde(default)]
    pub options: EngineOptions,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
pub struct RelationSpec {
    pub name: String,
    pub arity: usize,
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
}

#[derive(Debug, Deserialize)]
pub struct DependencySpec {
    pub determining: Vec<usize>,
    pub dependent: Vec<usize>,
}

#[derive(Debug, Deserialize)]
pub struct QuerySpec {
    pub name: String,
    pub parameters: Vec<String>,
    pub clauses: Vec<Vec<AtomSpec>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomSpec {
    Relation {
        view: String,
        args: Vec<String>,
    },
    Call {
        query: String,
        args: Vec<String>,
        #[serde(default)]
        negated: bool,
        #[serde(default)]
        transitive: bool,
    },
    Constant {
        var: String,
        value: serde_json::Value,
    },
    Equal(String, String),
    NotEqual(String, String),
}

/// One batch of fact changes, flushed together.
#[derive(Debug, Default, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub insert: BTreeMap<String, Vec<Vec<serde_json::Value>>>,
    #[serde(default)]
    pub remove: BTreeMap<String, Vec<Vec<serde_json::Value>>>,
}

#[derive(Debug)]
pub struct DocumentError(String);

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for DocumentError {}

pub fn value(json: &serde_json::Value) -> Result<Value, DocumentError> {
    use serde_json::Value as Json;
    match json {
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Ok(Value::Int(i)),
            None => n
                .as_f64()
                .map(Value::from)
                .ok_or_else(|| DocumentError(format!("unsupported number {n}"))),
        },
        Json::String(s) => Ok(Value::from(s.as_str())),
        Json::Array(items) => {
            let items = items.iter().map(value).collect::<Result<Vec<_>, _>>()?;
            Ok(Value::tuple(items))
        }
        Json::Null | Json::Object(_) => Err(DocumentError(format!("unsupported value {json}"))),
    }
}

pub fn tuple(json: &[serde_json::Value]) -> Result<Tuple, DocumentError> {
    json.iter().map(value).collect()
}

impl Document {
    pub fn program(&self) -> Result<Program, Box<dyn std::error::Error>> {
        let mut b = ProgramBuilder::new();
        for rel in &self.relations {
            let deps = rel
                .dependencies
                .iter()
                .map(|d| FunctionalDependency::new(d.determining.clone(), d.dependent.clone()))
                .collect();
            b.relation_with_dependencies(&rel.name, rel.arity, deps)?;
        }
        for query in &self.queries {
            let params: Vec<&str> = query.parameters.iter().map(String::as_str).collect();
            let mut bad_value = None;
            b.query(&query.name, &params, |q| {
                for atoms in &query.clauses {
                    q.clause(|c| {
                        for atom in atoms {
                            match atom {
                                AtomSpec::Relation { view, args } => {
                                    c.relation(view, &strs(args));
                                }
                                AtomSpec::Call {
                                    query,
                                    args,
                                    negated,
                                    transitive,
                                } => {
                                    let args = strs(args);
                                    match (*negated, *transitive) {
                                        (false, false) => c.call(query, &args),
                                        (true, false) => c.negated_call(query, &args),
                                        (false, true) => c.transitive_call(query, &args),
                                        (true, true) => c.negated_transitive_call(query, &args),
                                    };
                                }
                                AtomSpec::Constant { var, value: json } => match value(json) {
                                    Ok(v) => {
                                        c.constant(var, v);
                                    }
                                    Err(e) => bad_value = Some(e),
                                },
                                AtomSpec::Equal(a, b) => {
                                    c.equal(a, b);
                                }
                                AtomSpec::NotEqual(a, b) => {
                                    c.not_equal(a, b);
                                }
                            }
                        }
                    });
                }
            })?;
            if let Some(e) = bad_value {
                return Err(Box::new(e));
            }
        }
        Ok(b.build())
    }

    pub fn fact_store(&self) -> Result<FactStore, Box<dyn std::error::Error>> {
        let mut store = FactStore::new();
        for rel in &self.relations {
            store.declare(&rel.name, rel.arity)?;
        }
        for (name, rows) in &self.facts {
            for row in rows {
                store.insert(name, tuple(row)?)?;
            }
        }
        store.take_changes();
        Ok(store)
    }
}

fn strs(args: &[String]) -> Vec<&str> {
    args.iter().map(String::as_str).collect()
}
