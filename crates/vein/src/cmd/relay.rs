use serde::Serialize;
use vein_peer::Packet;

use crate::cmd::{connect, resolve_payload, RelayArgs};
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_record, OutputFormat};

#[derive(Serialize)]
struct RelayOutput {
    from: String,
    to: String,
    packet_type: String,
    payload_size: usize,
    relayed: bool,
}

pub fn run(args: RelayArgs, format: OutputFormat) -> CliResult<i32> {
    let payload = resolve_payload(&args.payload)?;
    let client = connect(&args.connect, |builder| builder)?;

    let payload_size = payload.len();
    client
        .relay(args.to, Packet::new(args.packet_type.clone(), payload))
        .map_err(|err| peer_error("relay failed", err))?;

    let out = RelayOutput {
        from: client.id().to_string(),
        to: args.to.to_string(),
        packet_type: args.packet_type,
        payload_size,
        relayed: true,
    };
    print_record(
        &out,
        &[
            ("from", out.from.clone()),
            ("to", out.to.clone()),
            ("type", out.packet_type.clone()),
            ("size", out.payload_size.to_string()),
        ],
        format,
    );

    client.disconnect();
    Ok(SUCCESS)
}
