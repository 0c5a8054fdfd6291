use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use vein_peer::{Client, ClientBuilder, ClientConfig, HandshakeConfig};

use crate::exit::{io_error, peer_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod listen;
pub mod ping;
pub mod relay;
pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a hub server with an ECHO handler, relay and ping.
    Serve(ServeArgs),
    /// Send one packet, optionally waiting for its reply.
    Send(SendArgs),
    /// Ask the server to forward one packet to another client.
    Relay(RelayArgs),
    /// Connect and print packets of the given types.
    Listen(ListenArgs),
    /// Measure round-trip time to a server.
    Ping(PingArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Relay(args) => relay::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Ping(args) => ping::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(env = "VEIN_ADDR", default_value = "127.0.0.1:53802")]
    pub addr: String,
    /// Handshake timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub handshake_timeout: String,
}

#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Server address.
    #[arg(env = "VEIN_ADDR", default_value = "127.0.0.1:53802")]
    pub addr: String,
    /// Username announced to the server.
    #[arg(long, short = 'u', env = "VEIN_USERNAME", default_value = "")]
    pub username: String,
    /// Connect and handshake timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub connect_timeout: String,
}

#[derive(Args, Debug)]
pub struct PayloadArgs {
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Packet type tag.
    #[arg(long = "type", short = 't', default_value = "ECHO")]
    pub packet_type: String,
    #[command(flatten)]
    pub payload: PayloadArgs,
    /// Send as a request and print the reply.
    #[arg(long)]
    pub wait: bool,
    /// How long to wait for the reply when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct RelayArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Connection id of the destination client.
    #[arg(long)]
    pub to: uuid::Uuid,
    /// Packet type tag of the relayed packet.
    #[arg(long = "type", short = 't')]
    pub packet_type: String,
    #[command(flatten)]
    pub payload: PayloadArgs,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Packet types to print (comma-separated).
    #[arg(long, value_delimiter = ',', required = true)]
    pub types: Vec<String>,
    /// Exit after receiving N packets.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct PingArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Number of pings.
    #[arg(long, short = 'n', default_value = "1")]
    pub count: u32,
    /// Per-ping timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Dial the server described by `args`; `configure` may register handlers.
pub fn connect(
    args: &ConnectArgs,
    configure: impl FnOnce(ClientBuilder) -> ClientBuilder,
) -> CliResult<Client> {
    let timeout = parse_duration(&args.connect_timeout)?;
    let config = ClientConfig {
        username: args.username.clone(),
        handshake: HandshakeConfig {
            timeout,
            ..HandshakeConfig::default()
        },
        connect_timeout: timeout,
        ..ClientConfig::default()
    };

    configure(ClientBuilder::new().with_config(config))
        .connect(args.addr.as_str())
        .map_err(|err| peer_error("connect failed", err))
}

pub fn resolve_payload(args: &PayloadArgs) -> CliResult<Vec<u8>> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(json.as_bytes().to_vec());
    }
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Vec::new())
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

pub fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
