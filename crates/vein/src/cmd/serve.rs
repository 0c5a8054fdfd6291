use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use vein_peer::{HandlerContext, HandlerResult, Packet, ServerBuilder, ServerConfig};

use crate::cmd::{install_ctrlc_handler, parse_duration, ServeArgs};
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_record, OutputFormat};

pub const ECHO: &str = "ECHO";

#[derive(Serialize)]
struct ListeningOutput {
    event: &'static str,
    addr: String,
    server_id: String,
}

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config = ServerConfig::default();
    config.handshake.timeout = parse_duration(&args.handshake_timeout)?;

    let mut server = ServerBuilder::new()
        .with_config(config)
        .register_handler(ECHO, echo)
        .on_client_connected(|conn| {
            tracing::info!(
                connection_id = %conn.id(),
                username = conn.username(),
                peer = ?conn.peer_addr(),
                "client joined"
            );
        })
        .on_client_disconnected(|conn, reason| {
            tracing::info!(connection_id = %conn.id(), %reason, "client left");
        })
        .listen(args.addr.as_str())
        .map_err(|err| peer_error("listen failed", err))?;

    let out = ListeningOutput {
        event: "listening",
        addr: server.local_addr().to_string(),
        server_id: server.id().to_string(),
    };
    print_record(
        &out,
        &[
            ("event", out.event.to_string()),
            ("addr", out.addr.clone()),
            ("server_id", out.server_id.clone()),
        ],
        format,
    );

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;
    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    tracing::info!(clients = server.connection_count(), "shutting down");
    server.stop();
    Ok(SUCCESS)
}

fn echo(packet: &Packet, ctx: &HandlerContext<'_>) -> HandlerResult {
    tracing::debug!(
        connection_id = %ctx.connection().id(),
        size = packet.payload.len(),
        "echoing packet"
    );
    ctx.reply(packet, ECHO, packet.payload.clone())?;
    Ok(())
}
