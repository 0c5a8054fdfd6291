use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("vein {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    let handshake = vein_peer::HandshakeConfig::default();
    println!("name: vein");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "protocol: {} {}",
        handshake.protocol_name, handshake.protocol_version
    );
    println!(
        "build_target: {}",
        option_env!("VEIN_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "max_payload_bytes: {}",
        vein_frame::DEFAULT_MAX_PAYLOAD
    );

    Ok(SUCCESS)
}
