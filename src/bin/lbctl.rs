use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "lbctl")]
#[command(about = "Management CLI for the backend balancer", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check balancer status
    Status,
    /// List backend health, connections and latency
    Backends,
    /// Show circuit breaker states
    Breakers,
    /// Show latency percentiles and throughput
    Performance,
    /// Switch the active load balancing strategy
    SetStrategy {
        /// round_robin, least_connections, weighted_round_robin, ip_hash or geographic
        strategy: String,
    },
    /// Deregister a backend
    Remove {
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let base = cli.url.trim_end_matches('/');
    let request = match &cli.command {
        Commands::Status => client.get(format!("{base}/admin/status")),
        Commands::Backends => client.get(format!("{base}/admin/backends")),
        Commands::Breakers => client.get(format!("{base}/admin/breakers")),
        Commands::Performance => client.get(format!("{base}/admin/performance")),
        Commands::SetStrategy { strategy } => client
            .put(format!("{base}/admin/strategy"))
            .json(&json!({ "strategy": strategy })),
        Commands::Remove { id } => client.delete(format!("{base}/admin/backends/{id}")),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    if status == reqwest::StatusCode::NO_CONTENT {
        println!("OK");
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
