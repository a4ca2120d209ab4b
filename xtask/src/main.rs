use clap::{Parser, Subcommand};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::Value;
use std::path::PathBuf;
use std::process::{exit, Command};
use std::thread::sleep;
use std::time::{Duration, Instant};

const DEFAULT_BRIDGE_URL: &str = "http://127.0.0.1:8080";
const CONFERENCES_PATH: &str = "colibri/conferences/";

#[derive(Parser)]
#[command(author, version, about = "Developer tasks for the groupcall workspace")]
struct Cli {
    #[command(subcommand)]
    command: Task,
}

#[derive(Subcommand)]
enum Task {
    #[command(about = "Run `cargo fmt --all`")]
    Fmt,
    #[command(about = "Run format + clippy lint checks")]
    Lint,
    #[command(about = "Execute `cargo test --workspace`")]
    Test,
    #[command(about = "Run fmt + clippy + test sequence")]
    Ci,
    #[command(about = "Build the agent and check a live bridge's conference API")]
    BridgeProbe {
        /// Bridge REST base URL.
        #[arg(long, default_value = DEFAULT_BRIDGE_URL)]
        bridge_url: String,
        /// Seconds to wait for the bridge to answer.
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
}

fn main() {
    let cli = Cli::parse();

    let workspace_root = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(|p| p.to_path_buf())
        .expect("workspace root");

    let result = match cli.command {
        Task::Fmt => run_commands(&workspace_root, [("cargo", &["fmt", "--all"])]),
        Task::Lint => run_commands(
            &workspace_root,
            [
                ("cargo", &["fmt", "--all", "--", "--check"]),
                ("cargo", &["clippy", "--workspace", "--", "-D", "warnings"]),
            ],
        ),
        Task::Test => run_commands(&workspace_root, [("cargo", &["test", "--workspace"])]),
        Task::Ci => run_ci(&workspace_root),
        Task::BridgeProbe {
            bridge_url,
            timeout_secs,
        } => run_bridge_probe(
            &workspace_root,
            &bridge_url,
            Duration::from_secs(timeout_secs),
        ),
    };

    if !result {
        exit(1);
    }
}

fn run_ci(workspace_root: &PathBuf) -> bool {
    if !run_commands(
        workspace_root,
        [
            ("cargo", &["fmt", "--all", "--", "--check"]),
            ("cargo", &["clippy", "--workspace", "--", "-D", "warnings"]),
        ],
    ) {
        return false;
    }
    run_commands(workspace_root, [("cargo", &["test", "--workspace"])])
}

fn run_bridge_probe(workspace_root: &PathBuf, bridge_url: &str, timeout: Duration) -> bool {
    if !run_commands(workspace_root, [("cargo", &["build", "-p", "groupcall-agent"])]) {
        return false;
    }

    let client = match Client::builder().timeout(Duration::from_secs(5)).build() {
        Ok(client) => client,
        Err(err) => {
            eprintln!("failed to build HTTP client: {err}");
            return false;
        }
    };

    let conferences_url = format!("{}/{CONFERENCES_PATH}", bridge_url.trim_end_matches('/'));
    if !wait_for_bridge(&client, &conferences_url, timeout) {
        eprintln!("bridge at {bridge_url} did not answer within {timeout:?}");
        return false;
    }
    if !verify_conference_list(&client, &conferences_url) {
        return false;
    }

    run_commands(
        workspace_root,
        [(
            "cargo",
            &[
                "run",
                "--quiet",
                "-p",
                "groupcall-agent",
                "--",
                "--bridge-url",
                bridge_url,
                "list",
            ],
        )],
    )
}

fn wait_for_bridge(client: &Client, url: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        match client.get(url).send() {
            Ok(response) if response.status().is_success() => return true,
            Ok(_) | Err(_) => sleep(Duration::from_millis(500)),
        }
    }
    false
}

fn verify_conference_list(client: &Client, url: &str) -> bool {
    match client.get(url).send() {
        Ok(response) if response.status() == StatusCode::OK => match response.json::<Value>() {
            Ok(Value::Array(conferences)) => {
                println!("bridge reports {} conference(s)", conferences.len());
                true
            }
            Ok(other) => {
                eprintln!("conference list was not a JSON array: {other}");
                false
            }
            Err(err) => {
                eprintln!("failed to decode conference list: {err}");
                false
            }
        },
        Ok(response) => {
            eprintln!("unexpected conference list status: {}", response.status());
            false
        }
        Err(err) => {
            eprintln!("failed to call conference list endpoint: {err}");
            false
        }
    }
}

fn run_commands<const N: usize>(
    workspace_root: &PathBuf,
    commands: [(&str, &[&str]); N],
) -> bool {
    for (program, args) in commands {
        let status = Command::new(program)
            .args(args)
            .current_dir(workspace_root)
            .status();

        match status {
            Ok(status) if status.success() => {}
            Ok(status) => {
                eprintln!("command '{program} {}' failed with {status}", args.join(" "));
                return false;
            }
            Err(err) => {
                eprintln!("failed to spawn '{program}': {err}");
                return false;
            }
        }
    }
    true
}
