use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Command-line client for the pub/sub HTTP gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// JID to authenticate as.
    #[arg(long, env = "GATEWAY_USER")]
    user: String,

    #[arg(long, env = "GATEWAY_PASSWORD")]
    password: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the role map of a node
    List { owner: String, node: String },
    /// Subscribe to a node
    Subscribe { owner: String, node: String },
    /// Unsubscribe from a node
    Unsubscribe { owner: String, node: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let endpoint = |owner: &str, node: &str| {
        format!(
            "{}/channels/{}/{}/subscriptions",
            cli.url.trim_end_matches('/'),
            owner,
            node
        )
    };

    let res = match &cli.command {
        Commands::List { owner, node } => {
            client
                .get(endpoint(owner, node))
                .basic_auth(&cli.user, Some(&cli.password))
                .send()
                .await?
        }
        Commands::Subscribe { owner, node } | Commands::Unsubscribe { owner, node } => {
            let subscribe = matches!(cli.command, Commands::Subscribe { .. });
            client
                .post(endpoint(owner, node))
                .basic_auth(&cli.user, Some(&cli.password))
                .json(&[subscribe])
                .send()
                .await?
        }
    };
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: gateway returned status {}", status);
        if !text.is_empty() {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    if text.is_empty() {
        println!("OK");
        return Ok(());
    }
    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
