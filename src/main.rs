//! CLI for the incremental query engine.
//!
//! Usage:
//!   trellis <file.json>            Evaluate a program document
//!   trellis --plans <file.json>    Also print the join plan of every clause
//!
//! Set `RUST_LOG=trellis_eval=debug` to trace planning and delivery.

mod document;

use std::cell::RefCell;
use std::error::Error;
use std::rc::Rc;
use std::{env, fs};

use tracing_subscriber::EnvFilter;
use trellis_eval::{Engine, Tuple};

use document::{Document, tuple};

fn main() {
    init_logging();
    let args: Vec<String> = env::args().skip(1).collect();
    let result = match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        [] | ["-h" | "--help"] => {
            print_help();
            return;
        }
        ["--plans", path] => run_file(path, true),
        [path] => run_file(path, false),
        _ => {
            print_help();
            std::process::exit(2);
        }
    };
    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}

fn print_help() {
    println!("Incremental query engine\n");
    println!("Usage: trellis [--plans] <file.json>\n");
    println!("  file      Program document: relations, queries, facts, options, steps");
    println!("  --plans   Print the join plan chosen for every clause");
}

type ChangeLog = Rc<RefCell<Vec<(String, Tuple, bool)>>>;

fn run_file(path: &str, show_plans: bool) -> Result<(), Box<dyn Error>> {
    let source = fs::read_to_string(path).map_err(|e| format!("reading {path}: {e}"))?;
    let doc: Document = serde_json::from_str(&source)?;
    let mut store = doc.fact_store()?;
    let mut engine = Engine::new(doc.program()?, &store, doc.options)?;
    let names: Vec<String> = engine.query_names().into_iter().map(str::to_string).collect();
    tracing::debug!(
        queries = names.len(),
        nodes = engine.node_count(),
        groups = engine.group_count(),
        "engine ready"
    );

    if show_plans {
        for name in &names {
            print!("{}", engine.describe_plans(name)?);
        }
        println!();
    }
    dump_all(&engine, &names)?;

    let log = ChangeLog::default();
    for name in &names {
        let (log, query) = (log.clone(), name.clone());
        engine.subscribe(
            name,
            Box::new(move |t: &Tuple, inserted: bool| {
                log.borrow_mut().push((query.clone(), t.clone(), inserted));
            }),
        )?;
    }

    for (i, step) in doc.steps.iter().enumerate() {
        for (relation, rows) in &step.remove {
            for row in rows {
                store.remove(relation, &tuple(row)?)?;
            }
        }
        for (relation, rows) in &step.insert {
            for row in rows {
                store.insert(relation, tuple(row)?)?;
            }
        }
        engine.sync(&mut store)?;

        println!("\nstep {}:", i + 1);
        let changes: Vec<_> = log.borrow_mut().drain(..).collect();
        if changes.is_empty() {
            println!("  (no changes)");
        }
        for (query, t, inserted) in changes {
            println!("  {}{query}{}", if inserted { '+' } else { '-' }, format_tuple(&t));
        }
    }
    Ok(())
}

fn dump_all(engine: &Engine, names: &[String]) -> Result<(), Box<dyn Error>> {
    let mut first = true;
    for name in names {
        let tuples = engine.all_matches(name, &[])?;
        if !first {
            println!();
        }
        first = false;
        println!(
            "{name} ({} match{}):",
            tuples.len(),
            if tuples.len() == 1 { "" } else { "es" }
        );
        for t in tuples {
            println!("  {}", format_tuple(&t));
        }
    }
    Ok(())
}

fn format_tuple(t: &Tuple) -> String {
    let values: Vec<String> = t.iter().map(|v| format!("{v:?}")).collect();
    format!("({})", values.join(", "))
}
