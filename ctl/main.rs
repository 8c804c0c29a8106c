#![forbid(unsafe_code)]

//! `botkeeper-ctl`: command-line companion for the `botkeeper` HTTP API.
//!
//! Each subcommand issues one request and prints the `data` field of the
//! response envelope as pretty JSON.

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};

#[derive(Debug, Parser)]
#[command(
    name = "botkeeper-ctl",
    about = "CLI for the botkeeper server",
    version,
    long_about = None
)]
struct Cli {
    /// Base URL of the server.
    #[arg(long, default_value = "http://127.0.0.1:9999")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

/// Script kind selector, mirrors the server's `type` tool argument.
#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum Kind {
    /// Agent-authored skill.
    Skill,
    /// Shared primitive.
    Primitive,
}

impl Kind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Skill => "skill",
            Self::Primitive => "primitive",
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a new agent session.
    Start,

    /// Stop a session.
    Stop {
        /// Session id.
        id: String,
    },

    /// Show a session's lifecycle status.
    Status {
        /// Session id.
        id: String,
    },

    /// Invoke a skill.
    Call {
        /// Session id.
        id: String,
        /// Skill name.
        skill: String,
    },

    /// List skills or primitives.
    List {
        /// Session id.
        id: String,
        /// Which scripts to list.
        #[arg(long, value_enum, default_value_t = Kind::Skill)]
        kind: Kind,
    },

    /// Print the source of a skill or primitive.
    Show {
        /// Session id.
        id: String,
        /// Script name.
        name: String,
        /// Which kind of script.
        #[arg(long, value_enum, default_value_t = Kind::Skill)]
        kind: Kind,
    },

    /// Create or replace a skill from a local file.
    Create {
        /// Session id.
        id: String,
        /// Skill name.
        name: String,
        /// Path to the TOML program.
        file: std::path::PathBuf,
    },
}

type CtlResult<T> = std::result::Result<T, Box<dyn std::error::Error>>;

fn main() {
    let args = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start runtime: {err}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(execute(&args)) {
        Ok(response) => print_envelope(&response),
        Err(err) => {
            eprintln!("Request failed: {err}");
            eprintln!("Is botkeeper running at '{}'?", args.server);
            std::process::exit(1);
        }
    }
}

async fn execute(args: &Cli) -> CtlResult<Value> {
    let client = reqwest::Client::new();
    let base = args.server.trim_end_matches('/');

    let request = match &args.command {
        Command::Start => client.post(format!("{base}/start")),
        Command::Stop { id } => client.post(format!("{base}/stop/{id}")),
        Command::Status { id } => client.get(format!("{base}/status/{id}")),
        Command::Call { id, skill } => client
            .post(format!("{base}/tool-call/{id}"))
            .json(&tool("call_skill", json!({ "name": skill }))),
        Command::List { id, kind } => client
            .post(format!("{base}/tool-call/{id}"))
            .json(&tool("get_skills_or_primitives", json!({ "type": kind.as_str() }))),
        Command::Show { id, name, kind } => client
            .post(format!("{base}/tool-call/{id}"))
            .json(&tool(
                "get_skill_or_primitive_code",
                json!({ "name": name, "type": kind.as_str() }),
            )),
        Command::Create { id, name, file } => {
            let code = tokio::fs::read_to_string(file).await?;
            client
                .post(format!("{base}/tool-call/{id}"))
                .json(&tool("create_skill", json!({ "name": name, "code": code })))
        }
    };

    let response = request.send().await?;
    let body: Value = response.json().await?;
    Ok(body)
}

fn tool(name: &str, args: Value) -> Value {
    json!({ "toolName": name, "toolArgs": args })
}

fn print_envelope(response: &Value) {
    let Some(obj) = response.as_object() else {
        println!("{response}");
        return;
    };

    let success = obj
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    match obj.get("data") {
        Some(Value::String(text)) => println!("{text}"),
        Some(Value::Null) | None => {
            if success {
                println!("OK");
            }
        }
        Some(data) => println!("{}", serde_json::to_string_pretty(data).unwrap_or_default()),
    }

    if !success {
        let err_msg = obj
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("request failed");
        eprintln!("Error: {err_msg}");
        std::process::exit(1);
    }
}
