use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::StreamExt;
use reqwest::Url;
use serde_json::json;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use roomcast::protocol::*;

#[derive(Parser)]
#[command(name = "client", about = "Watch a room and print its events")]
struct Args {
    /// Server address (host:port)
    #[arg(long, default_value = "localhost:8080")]
    addr: String,

    /// Room to join
    #[arg(long)]
    room: String,

    /// Bearer token (see `server --issue-token`)
    #[arg(long, env = "ROOMCAST_TOKEN", hide_env_values = true)]
    token: String,

    /// Post one chat message after joining
    #[arg(long)]
    say: Option<String>,

    /// Ask the AI one question after joining
    #[arg(long)]
    ask: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let urls = RoomUrls::new(&args.addr, &args.room, &args.token)?;
    let (socket, _) = connect_async(urls.ws.as_str())
        .await
        .with_context(|| format!("connecting to {}", args.addr))?;
    eprintln!("joined room {:?}", args.room);

    let http = reqwest::Client::new();

    if let Some(text) = &args.say {
        let resp = http
            .post(urls.messages.clone())
            .bearer_auth(&args.token)
            .json(&json!({ "message": text }))
            .send()
            .await?;
        if !resp.status().is_success() {
            bail!("posting message failed: {}", resp.text().await.unwrap_or_default());
        }
    }

    if let Some(prompt) = args.ask.clone() {
        // the AI call only returns once the whole answer has streamed
        let request = http
            .post(urls.ai.clone())
            .bearer_auth(&args.token)
            .json(&json!({ "prompt": prompt }));
        tokio::spawn(async move {
            match request.send().await {
                Ok(resp) if !resp.status().is_success() => {
                    eprintln!("AI request failed: {}", resp.status());
                }
                Err(e) => eprintln!("AI request failed: {e}"),
                Ok(_) => {}
            }
        });
    }

    let (_write, mut read) = socket.split();
    while let Some(msg) = read.next().await {
        match msg? {
            Message::Text(text) => match serde_json::from_str::<Envelope>(text.as_str()) {
                Ok(envelope) => render(&envelope)?,
                Err(_) => eprintln!("unparseable frame: {}", text.as_str()),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }
    eprintln!("disconnected");
    Ok(())
}

/// Endpoints of one room, with the room id percent-encoded as a path segment.
struct RoomUrls {
    ws: Url,
    messages: Url,
    ai: Url,
}

impl RoomUrls {
    fn new(addr: &str, room: &str, token: &str) -> Result<Self> {
        let room_url = |scheme: &str, tail: &[&str]| -> Result<Url> {
            let mut url = Url::parse(&format!("{scheme}://{addr}/"))
                .with_context(|| format!("invalid server address {addr:?}"))?;
            url.path_segments_mut()
                .map_err(|_| anyhow::anyhow!("invalid server address {addr:?}"))?
                .pop_if_empty()
                .extend(["api", "v1", "rooms", room])
                .extend(tail);
            Ok(url)
        };

        let mut ws = room_url("ws", &["chat", "ws"])?;
        ws.query_pairs_mut().append_pair("token", token);
        Ok(Self {
            ws,
            messages: room_url("http", &["messages"])?,
            ai: room_url("http", &["ai"])?,
        })
    }
}

fn render(envelope: &Envelope) -> Result<()> {
    let mut out = io::stdout().lock();
    match envelope.event_type {
        EventType::Message => {
            let msg: StoredMessage = serde_json::from_value(envelope.payload.clone())?;
            writeln!(
                out,
                "[{}] {}: {}",
                msg.created_at.format("%H:%M:%S"),
                msg.user_name.as_deref().unwrap_or(&msg.user_id),
                msg.message
            )?;
        }
        EventType::AiTyping => writeln!(out, "* AI is thinking (asked by {})", envelope.user_id)?,
        EventType::AiStream => {
            let chunk: StreamChunkPayload = serde_json::from_value(envelope.payload.clone())?;
            // redraw the growing answer in place
            write!(out, "\r\x1b[2K{}: {}", chunk.user_name, chunk.content.replace('\n', " "))?;
        }
        EventType::AiComplete => {
            let done: CompletePayload = serde_json::from_value(envelope.payload.clone())?;
            writeln!(out)?;
            writeln!(
                out,
                "[{}] {}: {}",
                done.message.created_at.format("%H:%M:%S"),
                done.message.user_name.as_deref().unwrap_or(&done.message.user_id),
                done.message.message
            )?;
        }
        EventType::AiError => {
            let failure: ErrorPayload = serde_json::from_value(envelope.payload.clone())?;
            writeln!(out, "! AI error: {}", failure.error)?;
        }
    }
    out.flush()?;
    Ok(())
}
