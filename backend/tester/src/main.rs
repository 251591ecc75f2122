use anyhow::{Context, Result};
use clap::Parser;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};

/// Submits clicks to a running server and prints the stored user.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    telegram_id: String,

    name: String,

    #[arg(allow_negative_numbers = true)]
    clicks: i64,

    #[arg(long, default_value = "http://localhost:3000")]
    url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let client = Client::new();

    let submitted: Value = client
        .post(format!("{}/api/clicks", args.url))
        .json(&json!({
            "telegramId": args.telegram_id,
            "name": args.name,
            "clicks": args.clicks,
        }))
        .send()
        .await
        .context("Failed to submit clicks")?
        .error_for_status()?
        .json()
        .await?;

    println!("Submitted: {submitted:#}");

    let response = client
        .get(format!("{}/api/user", args.url))
        .query(&[("telegramId", &args.telegram_id)])
        .send()
        .await
        .context("Failed to fetch user")?;

    if response.status() == StatusCode::NOT_FOUND {
        println!("User {} not found", args.telegram_id);
        return Ok(());
    }

    let user: Value = response.error_for_status()?.json().await?;
    println!("Stored: {user:#}");

    Ok(())
}
