//! Minimal stand-in for `eflint-server`, speaking the line protocol subset
//! the supervisor uses.
//!
//! Usage: `eflint-stub <model> <port>`. Exits with status 1 when the model
//! file cannot be read, like the real server does on a bad model. Its
//! `load-export` handler reproduces the real importer's defects: a graph
//! still using `program` is rejected, and a `Type extension of` line makes
//! the process exit. `status` echoes the last accepted import graph.

use std::env;
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::process::{self, ExitCode};
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};

use eflint_supervisor::codec::{LineReader, LineWriter};
use eflint_supervisor::command::{CREATE_EXPORT, FACTS, INVALID_COMMAND, LOAD_EXPORT, STATUS};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};

struct StubState {
    model: String,
    facts: Vec<String>,
    imports: AtomicU64,
    /// Graph of the most recent accepted `load-export`, echoed by `status`.
    last_import: Mutex<Option<Value>>,
}

impl StubState {
    fn last_import(&self) -> Value {
        self.last_import
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or(Value::Null)
    }
}

enum Reply {
    Line(Value),
    Crash,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let [model, port] = args.as_slice() else {
        eprintln!("usage: eflint-stub <model> <port>");
        return ExitCode::from(2);
    };

    let source = match fs::read_to_string(model) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("cannot read model {model}: {e}");
            return ExitCode::from(1);
        }
    };
    let Ok(port) = port.parse::<u16>() else {
        eprintln!("invalid port {port}");
        return ExitCode::from(2);
    };

    let listener = match TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("cannot listen on {port}: {e}");
            return ExitCode::from(1);
        }
    };

    let state = Arc::new(StubState {
        model: model.clone(),
        facts: source
            .lines()
            .map(str::trim)
            .filter_map(|line| line.strip_prefix('+'))
            .map(|fact| fact.trim_end_matches('.').to_string())
            .collect(),
        imports: AtomicU64::new(0),
        last_import: Mutex::new(None),
    });

    loop {
        let Ok((stream, _)) = listener.accept().await else {
            continue;
        };
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if serve(stream, &state).await.is_err() {
                // Mirrors the real server crashing on unparseable input.
                process::exit(3);
            }
        });
    }
}

/// Answer each request line on `stream`. `Err` means the engine should crash.
async fn serve(stream: TcpStream, state: &StubState) -> Result<(), ()> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = LineReader::new(read_half);
    let mut writer = LineWriter::new(write_half);

    while let Ok(Some(line)) = reader.read_line().await {
        match respond(&line, state) {
            Reply::Line(value) => {
                if writer.write_json(&value).await.is_err() {
                    break;
                }
            }
            Reply::Crash => return Err(()),
        }
    }
    Ok(())
}

fn respond(line: &str, state: &StubState) -> Reply {
    let Ok(request) = serde_json::from_str::<Value>(line) else {
        return Reply::Line(invalid("request is not JSON"));
    };

    match request.get("command").and_then(Value::as_str) {
        Some(FACTS) => Reply::Line(json!({
            "response": "success",
            "values": state.facts,
        })),
        Some(STATUS) => Reply::Line(json!({
            "response": "success",
            "model": state.model,
            "imports": state.imports.load(Ordering::SeqCst),
            "last_import": state.last_import(),
        })),
        Some(CREATE_EXPORT) => Reply::Line(export_graph(state)),
        Some(LOAD_EXPORT) => load_export(request.get("graph"), state),
        Some("phrase") => Reply::Line(json!({ "response": "success" })),
        _ => Reply::Line(invalid("unknown command")),
    }
}

fn invalid(message: &str) -> Value {
    json!({ "response": INVALID_COMMAND, "message": message })
}

fn export_graph(state: &StubState) -> Value {
    let program = state
        .facts
        .iter()
        .map(|fact| format!("+{fact}."))
        .collect::<Vec<_>>()
        .join("\n");
    json!({
        "current": 1,
        "edges": [{
            "source": 0,
            "target": 1,
            "po": { "program": format!("Type extension of fact\n{program}") },
        }],
        "nodes": [{ "id": 0 }, { "id": 1 }],
    })
}

fn load_export(graph: Option<&Value>, state: &StubState) -> Reply {
    let Some(edges) = graph.and_then(|g| g.get("edges")).and_then(Value::as_array) else {
        return Reply::Line(invalid("load-export requires a graph with edges"));
    };

    for po in edges.iter().filter_map(|edge| edge.get("po")) {
        if po.get("program").is_some() {
            return Reply::Line(invalid("Error in $.edges[0].po: key \"label\" not found"));
        }
        let label = po.get("label").and_then(Value::as_str).unwrap_or_default();
        if label
            .lines()
            .any(|line| line.trim().starts_with("Type extension of "))
        {
            return Reply::Crash;
        }
    }

    *state
        .last_import
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = graph.cloned();
    state.imports.fetch_add(1, Ordering::SeqCst);
    Reply::Line(json!({ "response": "success" }))
}
