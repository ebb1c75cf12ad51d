//! Minimal stdio MCP server for integration tests and local demos.
//!
//! ```text
//! mock_mcp_server [ROOT] [--label NAME] [--tools a,b,c] [--prompts]
//!                 [--no-tools] [--no-resources] [--hang] [--slow-init MS]
//!                 [--exit-after-init] [--noise]
//! ```
//!
//! Tool behaviour by name: `read_file` reads `path` under ROOT, `fail` answers
//! with a JSON-RPC error, `sleep` never answers, anything else echoes its
//! arguments tagged with the server label.

use std::io::{BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::{Value, json};

const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

struct Options {
    root: PathBuf,
    label: String,
    tools: Vec<String>,
    tools_enabled: bool,
    resources_enabled: bool,
    prompts_enabled: bool,
    hang: bool,
    /// Delay before answering `initialize`.
    init_delay_ms: u64,
    exit_after_init: bool,
    noise: bool,
}

fn parse_args() -> Options {
    let mut opts = Options {
        root: PathBuf::from("."),
        label: "mock".into(),
        tools: vec!["read_file".into()],
        tools_enabled: true,
        resources_enabled: true,
        prompts_enabled: false,
        hang: false,
        init_delay_ms: 0,
        exit_after_init: false,
        noise: false,
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--label" => opts.label = args.next().unwrap_or_default(),
            "--tools" => {
                opts.tools = args
                    .next()
                    .unwrap_or_default()
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            }
            "--prompts" => opts.prompts_enabled = true,
            "--no-tools" => opts.tools_enabled = false,
            "--no-resources" => opts.resources_enabled = false,
            "--hang" => opts.hang = true,
            "--slow-init" => opts.init_delay_ms = args.next().and_then(|v| v.parse().ok()).unwrap_or(0),
            "--exit-after-init" => opts.exit_after_init = true,
            "--noise" => opts.noise = true,
            other => opts.root = PathBuf::from(other),
        }
    }
    opts
}

fn main() {
    let opts = parse_args();
    eprintln!("mock_mcp_server '{}' starting (root={})", opts.label, opts.root.display());

    let stdin = std::io::stdin();
    let mut out = BufWriter::new(std::io::stdout());
    if opts.noise {
        let _ = writeln!(out, "this line is not JSON");
        let _ = out.flush();
    }

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            eprintln!("mock_mcp_server: unparseable input");
            continue;
        };

        let method = message["method"].as_str().unwrap_or_default().to_string();
        if method == "notifications/initialized" {
            if opts.exit_after_init {
                eprintln!("mock_mcp_server: exiting after init");
                return;
            }
            continue;
        }
        let Some(id) = message.get("id").cloned() else {
            continue;
        };
        if opts.hang && method == "initialize" {
            continue;
        }
        if opts.init_delay_ms > 0 && method == "initialize" {
            std::thread::sleep(std::time::Duration::from_millis(opts.init_delay_ms));
        }

        let reply = match handle(&opts, &method, &message["params"]) {
            Some(Ok(result)) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Some(Err((code, msg))) => json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": msg } }),
            None => continue,
        };
        if writeln!(out, "{}", reply).and_then(|_| out.flush()).is_err() {
            break;
        }
    }
}

type Reply = Option<Result<Value, (i64, String)>>;

fn handle(opts: &Options, method: &str, params: &Value) -> Reply {
    let not_found = || Some(Err((METHOD_NOT_FOUND, format!("Method not found: {}", method))));
    match method {
        "initialize" => Some(Ok(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {
                "tools": {},
                "resources": {},
            },
            "serverInfo": { "name": opts.label, "version": "0.0.1" }
        }))),
        "ping" => Some(Ok(json!({}))),
        "tools/list" if opts.tools_enabled => {
            let tools: Vec<Value> = opts
                .tools
                .iter()
                .map(|name| {
                    json!({
                        "name": name,
                        "description": format!("{} (served by {})", name, opts.label),
                        "inputSchema": {
                            "$schema": "http://json-schema.org/draft-07/schema#",
                            "type": "object",
                            "properties": { "path": { "type": "string" } },
                            "additionalProperties": false
                        }
                    })
                })
                .collect();
            Some(Ok(json!({ "tools": tools })))
        }
        "tools/call" if opts.tools_enabled => call_tool(opts, params),
        "resources/list" if opts.resources_enabled => Some(Ok(json!({
            "resources": [{
                "uri": format!("file://{}", opts.root.display()),
                "name": "root",
                "mimeType": "inode/directory"
            }]
        }))),
        "resources/read" if opts.resources_enabled => {
            let uri = params["uri"].as_str().unwrap_or_default();
            Some(Ok(json!({ "contents": [{ "uri": uri, "text": format!("resource {}", uri) }] })))
        }
        "prompts/list" if opts.prompts_enabled => Some(Ok(json!({
            "prompts": [{
                "name": "greet",
                "description": "Say hello",
                "arguments": [{ "name": "who", "required": true }]
            }]
        }))),
        "prompts/get" if opts.prompts_enabled => {
            let who = params["arguments"]["who"].as_str().unwrap_or("world");
            Some(Ok(json!({
                "messages": [{ "role": "user", "content": { "type": "text", "text": format!("Hello, {}!", who) } }]
            })))
        }
        _ => not_found(),
    }
}

fn call_tool(opts: &Options, params: &Value) -> Reply {
    let name = params["name"].as_str().unwrap_or_default();
    if !opts.tools.iter().any(|t| t == name) {
        return Some(Err((INVALID_PARAMS, format!("Unknown tool: {}", name))));
    }
    let args = &params["arguments"];
    match name {
        "read_file" => {
            let requested = args["path"].as_str().unwrap_or_default();
            Some(Ok(match read_under_root(&opts.root, requested) {
                Ok(text) => json!({ "content": [{ "type": "text", "text": text }] }),
                Err(e) => json!({ "content": [{ "type": "text", "text": e }], "isError": true }),
            }))
        }
        "fail" => Some(Err((-32000, "tool exploded".to_string()))),
        "sleep" => None,
        other => Some(Ok(json!({
            "content": [{ "type": "text", "text": format!("{}/{}: {}", opts.label, other, args) }]
        }))),
    }
}

fn read_under_root(root: &Path, requested: &str) -> Result<String, String> {
    let path = Path::new(requested);
    let path = if path.is_absolute() { path.to_path_buf() } else { root.join(path) };
    let canonical_root = root.canonicalize().map_err(|e| format!("bad root: {}", e))?;
    let canonical = path.canonicalize().map_err(|e| format!("cannot read {}: {}", requested, e))?;
    if !canonical.starts_with(&canonical_root) {
        return Err(format!("{} is outside the served directory", requested));
    }
    std::fs::read_to_string(&canonical).map_err(|e| format!("cannot read {}: {}", requested, e))
}
