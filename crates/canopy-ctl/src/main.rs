//! canopy-ctl — command-line interface for the Canopy daemon.

use anyhow::{Context, Result};
use serde::Deserialize;

const DEFAULT_PORT: u16 = 9101;

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StatusResponse {
    role:    String,
    address: String,
    running: bool,
    root:    Option<String>,
    members: usize,
}

#[derive(Debug, Deserialize)]
struct TopologyResponse {
    root:    Option<NodeInfo>,
    members: Vec<NodeInfo>,
}

#[derive(Debug, Deserialize)]
struct NodeInfo {
    address: String,
    age_ms:  u64,
}

// ── HTTP helpers ──────────────────────────────────────────────────────────────

fn base_url(port: u16) -> String {
    format!("http://127.0.0.1:{}", port)
}

async fn get_json<T: for<'de> Deserialize<'de>>(url: &str) -> Result<T> {
    reqwest::get(url)
        .await
        .with_context(|| format!("failed to connect to canopyd at {} (is it running?)", url))?
        .json::<T>()
        .await
        .context("failed to parse response")
}

// ── Subcommand handlers ───────────────────────────────────────────────────────

async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Canopy Daemon Status");
    println!("═══════════════════════════════════════");
    println!("  Role      : {}", resp.role);
    println!("  Address   : {}", resp.address);
    println!("  Discovery : {}", if resp.running { "running" } else { "stopped" });
    println!("  Root      : {}", resp.root.as_deref().unwrap_or("(none)"));
    println!("  Members   : {}", resp.members);

    Ok(())
}

async fn cmd_topology(port: u16) -> Result<()> {
    let resp: TopologyResponse = get_json(&format!("{}/topology", base_url(port))).await?;
    print!("{}", render_topology(&resp));
    Ok(())
}

fn render_topology(resp: &TopologyResponse) -> String {
    let Some(root) = &resp.root else {
        return "No root known yet.\n".to_string();
    };

    let mut out = String::new();
    out.push_str(&format!("  root {}  (seen {} ms ago)\n", root.address, root.age_ms));
    if resp.members.is_empty() {
        out.push_str("  └─ no members\n");
    }
    for (i, m) in resp.members.iter().enumerate() {
        let branch = if i + 1 == resp.members.len() { "└─" } else { "├─" };
        out.push_str(&format!("  {} {}  (seen {} ms ago)\n", branch, m.address, m.age_ms));
    }
    out
}

fn print_usage() {
    println!("Usage: canopy-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  status     Show role, address and discovery state (default)");
    println!("  topology   Show the root and its members");
    println!("  help       Show this message");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --port option
    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = args.get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["status"] | []                => cmd_status(port).await,
        ["topology"]                   => cmd_topology(port).await,
        ["help"] | ["--help"] | ["-h"] => { print_usage(); Ok(()) }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
