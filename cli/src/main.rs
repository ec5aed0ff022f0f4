use clap::{Parser, Subcommand};
use serde_json::json;

#[derive(Parser)]
#[command(
    name = "mentora",
    version,
    about = "Mentora Nudge CLI — trigger detection passes and inspect the delivery outbox"
)]
struct Cli {
    /// API base URL
    #[arg(long, env = "MENTORA_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// Operator token (required when the API has MENTORA_ADMIN_TOKEN set)
    #[arg(long, env = "MENTORA_ADMIN_TOKEN")]
    admin_token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// Run one nudge detection pass now
    RunPass,
    /// Outbox operations
    Outbox {
        #[command(subcommand)]
        command: OutboxCommands,
    },
}

#[derive(Subcommand)]
enum OutboxCommands {
    /// List outbox entries (newest first)
    List {
        /// Filter by status: pending, sent or failed
        #[arg(long)]
        status: Option<String>,
        /// Maximum number of entries to return
        #[arg(long)]
        limit: Option<u32>,
        /// Pagination cursor from previous response
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Show a single outbox entry
    Get {
        /// Outbox entry id
        id: String,
    },
    /// Manually retry a failed entry
    Retry {
        /// Outbox entry id
        id: String,
    },
}

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!("{}", serde_json::to_string_pretty(&err).unwrap());
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let ctx = ApiContext {
        api_url: cli.api_url,
        admin_token: cli.admin_token,
    };

    let result = match cli.command {
        Commands::Health => ctx.get("/health").await,
        Commands::RunPass => ctx.post("/v1/nudges/run-pass").await,
        Commands::Outbox { command } => match command {
            OutboxCommands::List {
                status,
                limit,
                cursor,
            } => {
                let mut params = Vec::new();
                if let Some(s) = status {
                    params.push(format!("status={s}"));
                }
                if let Some(l) = limit {
                    params.push(format!("limit={l}"));
                }
                if let Some(c) = cursor {
                    params.push(format!("cursor={c}"));
                }
                let path = if params.is_empty() {
                    "/v1/outbox".to_string()
                } else {
                    format!("/v1/outbox?{}", params.join("&"))
                };
                ctx.get(&path).await
            }
            OutboxCommands::Get { id } => ctx.get(&format!("/v1/outbox/{id}")).await,
            OutboxCommands::Retry { id } => ctx.post(&format!("/v1/outbox/{id}/retry")).await,
        },
    };

    if let Err(e) = result {
        exit_error(&e.to_string(), None);
    }
}

struct ApiContext {
    api_url: String,
    admin_token: Option<String>,
}

impl ApiContext {
    async fn get(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let mut req = client().get(format!("{}{}", self.api_url, path));
        if let Some(token) = &self.admin_token {
            req = req.header("x-admin-token", token);
        }
        print_response(req.send().await?).await
    }

    async fn post(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let mut req = client().post(format!("{}{}", self.api_url, path));
        if let Some(token) = &self.admin_token {
            req = req.header("x-admin-token", token);
        }
        print_response(req.send().await?).await
    }
}

async fn print_response(resp: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = resp.status();
    let body: serde_json::Value = resp.json().await?;

    if !status.is_success() {
        eprintln!("{}", serde_json::to_string_pretty(&body)?);
        std::process::exit(1);
    }

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
