use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use vein_peer::{HandlerContext, HandlerResult, Packet};

use crate::cmd::{connect, install_ctrlc_handler, ListenArgs};
use crate::exit::{CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_packet, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let (tx, rx) = mpsc::channel::<Packet>();
    let types = args.types.clone();
    let client = connect(&args.connect, move |mut builder| {
        for packet_type in types {
            let tx = tx.clone();
            builder = builder.register_handler(
                packet_type,
                move |packet: &Packet, _: &HandlerContext<'_>| -> HandlerResult {
                    tx.send(packet.clone())?;
                    Ok(())
                },
            );
        }
        builder
    })?;

    tracing::info!(
        connection_id = %client.id(),
        types = ?args.types,
        "listening for packets"
    );

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let packet = match rx.recv_timeout(POLL_INTERVAL) {
            Ok(packet) => packet,
            Err(RecvTimeoutError::Timeout) => {
                if !client.is_connected() {
                    return Err(CliError::new(FAILURE, "server closed the connection"));
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        print_packet(&packet, format);
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                break;
            }
        }
    }

    client.disconnect();
    Ok(SUCCESS)
}
