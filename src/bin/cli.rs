// Watch Party Server CLI Validation Tool
// This tool validates party server functionality through automated scenarios and ad-hoc commands

use clap::{Parser, Subcommand};
use colored::*;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Parser)]
#[command(name = "party-cli")]
#[command(about = "Watch Party Server CLI Validation Tool", long_about = None)]
struct Cli {
    /// Server address (default: 127.0.0.1:8080)
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health endpoint
    Health,

    /// Get server configuration
    Config,

    /// Test WebSocket connection
    Connect,

    /// Join a room and print everything the server pushes
    Join {
        /// Room ID to join (created on first join)
        #[arg(short, long)]
        room_id: String,

        /// Keep watching events (press Ctrl+C to exit)
        #[arg(short, long)]
        watch: bool,
    },

    /// Send a control action through the HTTP ingress
    Control {
        /// Room ID to control
        #[arg(short, long)]
        room_id: String,

        /// Action: play, pause or seek
        #[arg(short, long)]
        action: String,

        /// Seek target in seconds (seek only)
        #[arg(short, long)]
        time: Option<f64>,
    },

    /// Ask the room to load new media
    LoadMedia {
        /// Room ID (joins it first; the first joiner is admin)
        #[arg(short, long)]
        room_id: String,

        /// Source URL handed to the acquisition service
        #[arg(short, long)]
        source_url: String,

        /// Quality selector forwarded verbatim
        #[arg(short, long)]
        quality: Option<String>,
    },

    /// Run automated validation scenarios
    Validate {
        /// Run all validation scenarios
        #[arg(short, long)]
        all: bool,

        /// Run one scenario by name
        #[arg(short, long)]
        scenario: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => check_health(&cli.server).await,
        Commands::Config => check_config(&cli.server).await,
        Commands::Connect => test_connection(&cli.server).await,
        Commands::Join { room_id, watch } => join_room(&cli.server, room_id, *watch).await,
        Commands::Control {
            room_id,
            action,
            time,
        } => send_control(&cli.server, room_id, action, *time).await,
        Commands::LoadMedia {
            room_id,
            source_url,
            quality,
        } => load_media(&cli.server, room_id, source_url, quality.as_deref()).await,
        Commands::Validate { all, scenario } => {
            if *all {
                run_all_validations(&cli.server).await;
            } else if let Some(name) = scenario {
                run_scenario(&cli.server, name).await;
            } else {
                println!("{}", "Use --all or --scenario <name>".yellow());
                list_scenarios();
            }
        }
    }
}

fn ws_url(server: &str) -> String {
    format!("ws://{}/party", server)
}

async fn check_health(server: &str) {
    let url = format!("http://{}/party/health", server);
    match reqwest::get(&url).await {
        Ok(resp) if resp.status().is_success() => {
            let body: Value = resp.json().await.unwrap_or_default();
            println!("{} {}", "Server healthy:".green(), body);
        }
        Ok(resp) => println!("{} HTTP {}", "Unhealthy:".red(), resp.status()),
        Err(e) => println!("{} {}", "Cannot reach server:".red(), e),
    }
}

async fn check_config(server: &str) {
    let url = format!("http://{}/party/config", server);
    match reqwest::get(&url).await {
        Ok(resp) => {
            let body: Value = resp.json().await.unwrap_or_default();
            println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
        }
        Err(e) => println!("{} {}", "Cannot reach server:".red(), e),
    }
}

async fn test_connection(server: &str) {
    match connect_async(ws_url(server)).await {
        Ok((stream, _)) => {
            println!("{}", "WebSocket connection established".green());
            drop(stream);
        }
        Err(e) => println!("{} {}", "WebSocket connection failed:".red(), e),
    }
}

async fn join_room(server: &str, room_id: &str, watch: bool) {
    let (stream, _) = match connect_async(ws_url(server)).await {
        Ok(ok) => ok,
        Err(e) => {
            println!("{} {}", "Cannot connect:".red(), e);
            return;
        }
    };
    let (mut write, mut read) = stream.split();

    let join = json!({ "type": "join", "room_id": room_id });
    if write.send(Message::Text(join.to_string())).await.is_err() {
        println!("{}", "Failed to send join".red());
        return;
    }

    println!("{} {}", "Joined room".green(), room_id.bold());
    loop {
        let next = if watch {
            read.next().await
        } else {
            match timeout(Duration::from_secs(2), read.next()).await {
                Ok(next) => next,
                Err(_) => break,
            }
        };
        match next {
            Some(Ok(Message::Text(text))) => print_event(&text),
            Some(Ok(_)) => {}
            _ => break,
        }
    }
}

fn print_event(text: &str) {
    let value: Value = serde_json::from_str(text).unwrap_or_default();
    let kind = value["type"].as_str().unwrap_or("?");
    let line = match kind {
        "clock_sync" => format!("clock_sync t={}", value["time"]).cyan(),
        "action_performed" => {
            format!("action {} t={}", value["action"], value["time"]).yellow()
        }
        "download_progress" => format!("download {}%", value["percent"]).blue(),
        "error_notice" => format!("error: {}", value["message"]).red(),
        _ => text.normal(),
    };
    println!("  {}", line);
}

async fn send_control(server: &str, room_id: &str, action: &str, time: Option<f64>) {
    let url = format!(
        "http://{}/party/room/{}/control",
        server,
        urlencoding::encode(room_id)
    );
    let body = json!({ "action": action, "time": time });
    let client = reqwest::Client::new();
    match client.post(&url).json(&body).send().await {
        Ok(resp) => {
            let status = resp.status();
            let body: Value = resp.json().await.unwrap_or_default();
            if status.is_success() {
                println!("{} {}", "OK:".green(), body);
            } else {
                println!("{} HTTP {} {}", "Rejected:".red(), status, body);
            }
        }
        Err(e) => println!("{} {}", "Request failed:".red(), e),
    }
}

async fn load_media(server: &str, room_id: &str, source_url: &str, quality: Option<&str>) {
    let (stream, _) = match connect_async(ws_url(server)).await {
        Ok(ok) => ok,
        Err(e) => {
            println!("{} {}", "Cannot connect:".red(), e);
            return;
        }
    };
    let (mut write, mut read) = stream.split();

    let join = json!({ "type": "join", "room_id": room_id });
    let _ = write.send(Message::Text(join.to_string())).await;

    let load = json!({
        "type": "load_media",
        "room_id": room_id,
        "source_url": source_url,
        "quality": quality,
    });
    let _ = write.send(Message::Text(load.to_string())).await;
    println!("{}", "Acquisition requested, watching progress...".green());

    while let Ok(Some(Ok(message))) = timeout(Duration::from_secs(120), read.next()).await {
        if let Message::Text(text) = message {
            print_event(&text);
            let value: Value = serde_json::from_str(&text).unwrap_or_default();
            if value["type"] == "error_notice" {
                break;
            }
            if value["type"] == "room_updated" && value["room"]["status"] == "playing" {
                println!("{}", "Media loaded and playing".green().bold());
                break;
            }
        }
    }
}

fn list_scenarios() {
    println!("Available scenarios:");
    println!("  {} - first joiner becomes admin", "admin_grant".bold());
    println!("  {} - non-admin control is ignored", "fail_closed".bold());
    println!("  {} - control endpoint 404 on unknown room", "control_404".bold());
}

async fn run_all_validations(server: &str) {
    run_scenario(server, "admin_grant").await;
    run_scenario(server, "fail_closed").await;
    run_scenario(server, "control_404").await;
}

async fn run_scenario(server: &str, name: &str) {
    println!("{} {}", "Running scenario:".bold(), name);
    let passed = match name {
        "admin_grant" => scenario_admin_grant(server).await,
        "fail_closed" => scenario_fail_closed(server).await,
        "control_404" => scenario_control_404(server).await,
        _ => {
            println!("{} {}", "Unknown scenario:".red(), name);
            list_scenarios();
            return;
        }
    };
    if passed {
        println!("{} {}", "PASS".green().bold(), name);
    } else {
        println!("{} {}", "FAIL".red().bold(), name);
    }
}

/// Joins a fresh room and checks the initial snapshot marks this
/// connection as the sole admin.
async fn scenario_admin_grant(server: &str) -> bool {
    let room_id = format!("cli-validate-{}", std::process::id());
    let Ok((stream, _)) = connect_async(ws_url(server)).await else {
        return false;
    };
    let (mut write, mut read) = stream.split();
    let join = json!({ "type": "join", "room_id": room_id });
    if write.send(Message::Text(join.to_string())).await.is_err() {
        return false;
    }

    let mut connection_id = None;
    while let Ok(Some(Ok(Message::Text(text)))) =
        timeout(Duration::from_secs(2), read.next()).await
    {
        let value: Value = serde_json::from_str(&text).unwrap_or_default();
        match value["type"].as_str() {
            Some("connected") => {
                connection_id = value["connection_id"].as_str().map(String::from);
            }
            Some("initial_state") => {
                let admins = &value["room"]["admins"];
                return match connection_id {
                    Some(ref id) => admins
                        .as_array()
                        .map(|a| a.iter().any(|v| v.as_str() == Some(id.as_str())))
                        .unwrap_or(false),
                    None => false,
                };
            }
            _ => {}
        }
    }
    false
}

/// A second joiner issues a pause; the admin must observe no action.
async fn scenario_fail_closed(server: &str) -> bool {
    let room_id = format!("cli-validate-fc-{}", std::process::id());

    let Ok((admin_stream, _)) = connect_async(ws_url(server)).await else {
        return false;
    };
    let (mut admin_write, mut admin_read) = admin_stream.split();
    let join = json!({ "type": "join", "room_id": room_id });
    let _ = admin_write.send(Message::Text(join.to_string())).await;

    let Ok((viewer_stream, _)) = connect_async(ws_url(server)).await else {
        return false;
    };
    let (mut viewer_write, _viewer_read) = viewer_stream.split();
    let join = json!({ "type": "join", "room_id": room_id });
    let _ = viewer_write.send(Message::Text(join.to_string())).await;
    sleep(Duration::from_millis(200)).await;

    let pause = json!({ "type": "pause", "room_id": room_id });
    let _ = viewer_write.send(Message::Text(pause.to_string())).await;

    // Drain for a second; any action_performed means the check failed.
    while let Ok(Some(Ok(Message::Text(text)))) =
        timeout(Duration::from_secs(1), admin_read.next()).await
    {
        let value: Value = serde_json::from_str(&text).unwrap_or_default();
        if value["type"] == "action_performed" {
            return false;
        }
    }
    true
}

async fn scenario_control_404(server: &str) -> bool {
    let url = format!("http://{}/party/room/no-such-room/control", server);
    let client = reqwest::Client::new();
    match client
        .post(&url)
        .json(&json!({ "action": "play" }))
        .send()
        .await
    {
        Ok(resp) => resp.status() == reqwest::StatusCode::NOT_FOUND,
        Err(_) => false,
    }
}
