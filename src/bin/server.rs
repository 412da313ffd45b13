use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use roomcast::auth::JwtValidator;
use roomcast::config::Config;
use roomcast::server::Server;

#[derive(Parser)]
#[command(name = "server", about = "Room broadcast hub server")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "ROOMCAST_ADDR", default_value = "0.0.0.0:8080")]
    addr: String,

    /// Directory for persistent storage
    #[arg(long, env = "ROOMCAST_DATA", default_value = "./data")]
    data: PathBuf,

    /// Secret used to sign and verify bearer tokens
    #[arg(long, env = "ROOMCAST_JWT_SECRET", hide_env_values = true)]
    jwt_secret: String,

    /// Base URL of the chat completions provider
    #[arg(long, env = "ROOMCAST_AI_URL", default_value = "")]
    ai_url: String,

    /// API key for the chat completions provider
    #[arg(long, env = "ROOMCAST_AI_KEY", default_value = "", hide_env_values = true)]
    ai_key: String,

    /// Characters per streamed AI chunk
    #[arg(long, env = "ROOMCAST_CHUNK_SIZE", default_value_t = 20)]
    chunk_size: usize,

    /// Delay between streamed AI chunks, in milliseconds
    #[arg(long, env = "ROOMCAST_CHUNK_DELAY_MS", default_value_t = 50)]
    chunk_delay_ms: u64,

    /// Capacity of each connection's outbound queue
    #[arg(long, env = "ROOMCAST_OUTBOUND_CAPACITY", default_value_t = 256)]
    outbound_capacity: usize,

    /// Capacity of the hub control queue
    #[arg(long, env = "ROOMCAST_CONTROL_CAPACITY", default_value_t = 1024)]
    control_capacity: usize,

    /// Keep-alive ping interval in seconds (0 disables)
    #[arg(long, env = "ROOMCAST_PING_SECS", default_value_t = 30)]
    ping_secs: u64,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Print a token for USER (valid for 24h) and exit
    #[arg(long, value_name = "USER")]
    issue_token: Option<String>,
}

impl Args {
    fn config(&self) -> Config {
        Config {
            addr: self.addr.clone(),
            data_dir: self.data.clone(),
            jwt_secret: self.jwt_secret.clone(),
            ai_api_url: self.ai_url.clone(),
            ai_api_key: self.ai_key.clone(),
            control_capacity: self.control_capacity,
            outbound_capacity: self.outbound_capacity,
            chunk_size: self.chunk_size,
            chunk_delay: Duration::from_millis(self.chunk_delay_ms),
            ping_interval: (self.ping_secs > 0).then(|| Duration::from_secs(self.ping_secs)),
        }
    }
}

fn init_logging(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("roomcast=info,server=info,tower_http=info"));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .ok();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_json);

    if let Some(user) = &args.issue_token {
        let token =
            JwtValidator::new(&args.jwt_secret).issue(user, Duration::from_secs(24 * 3600))?;
        println!("{token}");
        return Ok(());
    }

    let config = args.config();
    let srv = Server::new(&config)?;
    let listener = TcpListener::bind(&config.addr).await?;

    // Graceful shutdown on Ctrl-C
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
    };

    srv.listen_and_serve(listener, shutdown).await?;
    Ok(())
}
