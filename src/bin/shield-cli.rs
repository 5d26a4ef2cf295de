use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "shield-cli")]
#[command(about = "Management CLI for the edu-shield ops server", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[arg(short, long, env = "SHIELD_ADMIN_API_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server status and limiter variant
    Status,
    /// Show every circuit breaker's state
    Circuits,
    /// Force a circuit breaker closed
    Reset {
        /// Service name, e.g. azureOpenAI
        name: String,
    },
    /// Show cache backend health
    Cache,
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

    let request = match &cli.command {
        Commands::Status => client.get(format!("{}/admin/status", cli.url)),
        Commands::Circuits => client.get(format!("{}/admin/circuits", cli.url)),
        Commands::Reset { name } => {
            client.post(format!("{}/admin/circuits/{}/reset", cli.url, name))
        }
        Commands::Cache => client.get(format!("{}/admin/cache", cli.url)),
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

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
