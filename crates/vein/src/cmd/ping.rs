use serde::Serialize;

use crate::cmd::{connect, parse_duration, PingArgs};
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_record, OutputFormat};

#[derive(Serialize)]
struct PingOutput {
    server_id: String,
    client_id: String,
    seq: u32,
    rtt_ms: f64,
}

pub fn run(args: PingArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let client = connect(&args.connect, |builder| builder)?;

    for seq in 1..=args.count.max(1) {
        let rtt = client
            .ping(timeout)
            .map_err(|err| peer_error("ping failed", err))?;
        let out = PingOutput {
            server_id: client.server_id().to_string(),
            client_id: client.id().to_string(),
            seq,
            rtt_ms: (rtt.as_secs_f64() * 1000.0 * 100.0).round() / 100.0,
        };
        print_record(
            &out,
            &[
                ("seq", out.seq.to_string()),
                ("server", out.server_id.clone()),
                ("rtt_ms", format!("{:.2}", out.rtt_ms)),
            ],
            format,
        );
    }

    client.disconnect();
    Ok(SUCCESS)
}
