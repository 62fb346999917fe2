use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    error::ApiError,
    protocol::{
        ChatsResponse, ReconnectResponse, SendMessageRequest, SendMessageResponse, StatusResponse,
    },
};

/// Operator client for the gateway's HTTP API.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Status,
    Send { phone: String, message: String },
    Chats,
    Reconnect,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let http = Client::new();
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Command::Status => {
            let status: StatusResponse =
                read(http.get(format!("{base}/api/status")).send().await?).await?;
            println!("{}", render_status(&status));
        }
        Command::Send { phone, message } => {
            let sent: SendMessageResponse = read(
                http.post(format!("{base}/api/send-message"))
                    .json(&SendMessageRequest {
                        phone: Some(phone),
                        message: Some(message),
                    })
                    .send()
                    .await?,
            )
            .await?;
            println!(
                "sent message_id={} to={} timestamp={}",
                sent.data.message_id, sent.data.to, sent.data.timestamp
            );
        }
        Command::Chats => {
            let chats: ChatsResponse =
                read(http.get(format!("{base}/api/chats")).send().await?).await?;
            for chat in &chats.data {
                let kind = if chat.is_group { "group" } else { "direct" };
                println!("{}\t{}\t{kind}\tunread={}", chat.id, chat.name, chat.unread_count);
            }
            println!("{} chats", chats.count);
        }
        Command::Reconnect => {
            let reconnect: ReconnectResponse =
                read(http.post(format!("{base}/api/reconnect")).send().await?).await?;
            println!("{}", reconnect.message);
        }
    }

    Ok(())
}

async fn read<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let body = response.text().await?;
    Err(anyhow!("{status}: {}", describe_error(&body)))
}

fn describe_error(body: &str) -> String {
    match serde_json::from_str::<ApiError>(body) {
        Ok(err) => match err.reconnect_attempts {
            Some(attempts) => format!("{} ({}, attempt {attempts})", err.error, err.message),
            None => format!("{} ({})", err.error, err.message),
        },
        Err(_) => body.to_string(),
    }
}

fn render_status(status: &StatusResponse) -> String {
    let mut out = format!(
        "state={} connected={} reconnecting={} attempts={}/{}",
        status.state,
        status.connected,
        status.reconnecting,
        status.reconnect_attempts,
        status.max_reconnect_attempts
    );
    if let Some(info) = &status.info {
        out.push_str(&format!(" account={} ({}, {})", info.name, info.phone, info.platform));
    }
    out
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
