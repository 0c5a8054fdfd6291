use vein_peer::Packet;

use crate::cmd::{connect, parse_duration, resolve_payload, SendArgs};
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_packet, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let payload = resolve_payload(&args.payload)?;
    let client = connect(&args.connect, |builder| builder)?;

    let packet = Packet::new(args.packet_type, payload);
    if args.wait {
        let reply = client
            .send_and_await_reply(packet, timeout)
            .map_err(|err| peer_error("request failed", err))?;
        print_packet(&reply.packet, format);
    } else {
        client
            .send(packet)
            .map_err(|err| peer_error("send failed", err))?;
    }

    client.disconnect();
    Ok(SUCCESS)
}
