use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vein_frame::{FrameError, FrameReader, FrameWriter};

use crate::correlation::deadline_after;
use crate::error::{PeerError, Result};

const MAX_PROTOCOL_LEN: usize = 32;
const MAX_VERSION_LEN: usize = 16;
/// Longest username accepted during the handshake, in bytes.
pub const MAX_USERNAME_LEN: usize = 64;

/// Client handshake request; the first frame a client sends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Protocol name. Must be `vein` by default.
    pub protocol: String,
    /// Protocol version string.
    pub version: String,
    /// Username the client wants to be known by. May be empty.
    #[serde(default)]
    pub username: String,
}

/// Server handshake response; the first frame a server sends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// Protocol name. Must match request protocol.
    pub protocol: String,
    /// Negotiated protocol version.
    pub version: String,
    /// Identifier the server assigned to this connection.
    pub connection_id: Uuid,
    /// The server's own identity, stamped on packets it originates.
    pub server_id: Uuid,
}

/// Result of a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    /// Server-assigned connection identifier.
    pub connection_id: Uuid,
    /// Identity of the server.
    pub server_id: Uuid,
    /// Negotiated protocol version.
    pub protocol_version: String,
    /// Username the client announced.
    pub username: String,
}

/// Configuration for handshake negotiation.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Timeout for each blocking handshake operation.
    pub timeout: Duration,
    /// Expected protocol name.
    pub protocol_name: String,
    /// Local protocol version.
    pub protocol_version: String,
    /// Maximum handshake frame payload size in bytes.
    pub max_handshake_payload: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            protocol_name: "vein".to_string(),
            protocol_version: "1.0".to_string(),
            max_handshake_payload: 16 * 1024,
        }
    }
}

/// Perform client-side handshake using default configuration.
pub fn handshake_client<R: Read, W: Write>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    username: &str,
) -> Result<HandshakeResult> {
    handshake_client_with_config(reader, writer, username, &HandshakeConfig::default())
}

/// Perform client-side handshake using explicit configuration.
pub fn handshake_client_with_config<R: Read, W: Write>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    username: &str,
    config: &HandshakeConfig,
) -> Result<HandshakeResult> {
    validate_protocol_name(&config.protocol_name)?;
    validate_version(&config.protocol_version)?;
    validate_username(username)?;

    let req = HandshakeRequest {
        protocol: config.protocol_name.clone(),
        version: config.protocol_version.clone(),
        username: username.to_string(),
    };
    send_json(writer, &req)?;

    let deadline = deadline_after(config.timeout);
    let payload = recv_payload(reader, deadline, config.timeout, config.max_handshake_payload)?;
    let resp: HandshakeResponse = serde_json::from_slice(&payload)?;

    validate_protocol_name(&resp.protocol)?;
    validate_version(&resp.version)?;

    if resp.protocol != config.protocol_name {
        return Err(PeerError::HandshakeFailed(format!(
            "unknown protocol '{}' (expected '{}')",
            resp.protocol, config.protocol_name
        )));
    }

    if !is_version_compatible(&config.protocol_version, &resp.version)? {
        return Err(PeerError::HandshakeFailed(format!(
            "incompatible version '{}' (local '{}')",
            resp.version, config.protocol_version
        )));
    }

    if resp.connection_id.is_nil() {
        return Err(PeerError::HandshakeFailed(
            "server assigned a nil connection id".to_string(),
        ));
    }

    Ok(HandshakeResult {
        connection_id: resp.connection_id,
        server_id: resp.server_id,
        protocol_version: resp.version,
        username: username.to_string(),
    })
}

/// Read and validate a client's handshake request.
///
/// The server side of the handshake is split in two so the caller can
/// register the connection before the client learns its id: call this, do
/// the bookkeeping, then [`send_handshake_response`].
pub fn read_handshake_request<R: Read>(
    reader: &mut FrameReader<R>,
    config: &HandshakeConfig,
) -> Result<HandshakeRequest> {
    validate_protocol_name(&config.protocol_name)?;
    validate_version(&config.protocol_version)?;

    let deadline = deadline_after(config.timeout);
    let payload = recv_payload(reader, deadline, config.timeout, config.max_handshake_payload)?;
    let req: HandshakeRequest = serde_json::from_slice(&payload)?;

    validate_protocol_name(&req.protocol)?;
    validate_version(&req.version)?;
    validate_username(&req.username)?;

    if req.protocol != config.protocol_name {
        return Err(PeerError::HandshakeFailed(format!(
            "unknown protocol '{}' (expected '{}')",
            req.protocol, config.protocol_name
        )));
    }

    if !is_version_compatible(&req.version, &config.protocol_version)? {
        return Err(PeerError::HandshakeFailed(format!(
            "incompatible version '{}' (server '{}')",
            req.version, config.protocol_version
        )));
    }

    Ok(req)
}

/// Accept a validated request, telling the client its assigned id.
pub fn send_handshake_response<W: Write>(
    writer: &mut FrameWriter<W>,
    connection_id: Uuid,
    server_id: Uuid,
    config: &HandshakeConfig,
) -> Result<()> {
    let resp = HandshakeResponse {
        protocol: config.protocol_name.clone(),
        version: config.protocol_version.clone(),
        connection_id,
        server_id,
    };
    send_json(writer, &resp)
}

fn send_json<T: Serialize, W: Write>(writer: &mut FrameWriter<W>, value: &T) -> Result<()> {
    let payload = serde_json::to_vec(value)?;
    writer.send(&payload)?;
    Ok(())
}

fn recv_payload<R: Read>(
    reader: &mut FrameReader<R>,
    deadline: Instant,
    timeout: Duration,
    max_handshake_payload: usize,
) -> Result<Vec<u8>> {
    loop {
        if Instant::now() >= deadline {
            return Err(PeerError::Timeout(timeout));
        }

        match reader.read_frame_before(deadline) {
            Ok(frame) => {
                if frame.len() > max_handshake_payload {
                    return Err(PeerError::HandshakeFailed(format!(
                        "handshake payload too large: {} (max {})",
                        frame.len(),
                        max_handshake_payload
                    )));
                }
                return Ok(frame.to_vec());
            }
            Err(FrameError::Io(err))
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(FrameError::ConnectionClosed) => {
                return Err(PeerError::HandshakeFailed(
                    "connection closed during handshake".to_string(),
                ));
            }
            Err(FrameError::PayloadTooLarge { size, max }) => {
                return Err(PeerError::HandshakeFailed(format!(
                    "handshake payload too large: {size} (max {max})"
                )));
            }
            Err(err) => return Err(PeerError::Frame(err)),
        }
    }
}

fn validate_protocol_name(protocol: &str) -> Result<()> {
    if protocol.is_empty() || protocol.len() > MAX_PROTOCOL_LEN {
        return Err(PeerError::HandshakeFailed(format!(
            "invalid protocol name length: {}",
            protocol.len()
        )));
    }
    Ok(())
}

fn validate_version(version: &str) -> Result<()> {
    if version.is_empty() || version.len() > MAX_VERSION_LEN {
        return Err(PeerError::HandshakeFailed(format!(
            "invalid protocol version length: {}",
            version.len()
        )));
    }
    let _ = parse_version(version)?;
    Ok(())
}

fn validate_username(username: &str) -> Result<()> {
    if username.len() > MAX_USERNAME_LEN {
        return Err(PeerError::HandshakeFailed(format!(
            "username too long: {} bytes (max {})",
            username.len(),
            MAX_USERNAME_LEN
        )));
    }
    Ok(())
}

fn is_version_compatible(client_version: &str, server_version: &str) -> Result<bool> {
    let (client_major, client_minor) = parse_version(client_version)?;
    let (server_major, server_minor) = parse_version(server_version)?;

    Ok(client_major == server_major && client_minor >= server_minor)
}

fn parse_version(version: &str) -> Result<(u16, u16)> {
    let mut parts = version.split('.');

    let major = parts.next().ok_or_else(|| {
        PeerError::HandshakeFailed(format!("invalid version '{}': missing major", version))
    })?;
    let minor = parts.next().ok_or_else(|| {
        PeerError::HandshakeFailed(format!("invalid version '{}': missing minor", version))
    })?;

    if parts.next().is_some() {
        return Err(PeerError::HandshakeFailed(format!(
            "invalid version '{}': expected '<major>.<minor>'",
            version
        )));
    }

    let major = major.parse::<u16>().map_err(|_| {
        PeerError::HandshakeFailed(format!("invalid version '{}': non-numeric major", version))
    })?;
    let minor = minor.parse::<u16>().map_err(|_| {
        PeerError::HandshakeFailed(format!("invalid version '{}': non-numeric minor", version))
    })?;

    Ok((major, minor))
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, ErrorKind, Read};
    use std::net::{TcpListener, TcpStream};
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn serve_one(
        stream: TcpStream,
        connection_id: Uuid,
        server_id: Uuid,
        config: &HandshakeConfig,
    ) -> Result<HandshakeRequest> {
        let mut reader = FrameReader::new(stream.try_clone().unwrap());
        let mut writer = FrameWriter::new(stream);
        let req = read_handshake_request(&mut reader, config)?;
        send_handshake_response(&mut writer, connection_id, server_id, config)?;
        Ok(req)
    }

    fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = thread::spawn(move || TcpStream::connect(addr).unwrap());
        let (server, _) = listener.accept().unwrap();
        (server, client.join().unwrap())
    }

    #[test]
    fn successful_handshake() {
        let (left, right) = tcp_pair();
        let connection_id = Uuid::new_v4();
        let server_id = Uuid::new_v4();

        let server = thread::spawn(move || {
            serve_one(left, connection_id, server_id, &HandshakeConfig::default()).unwrap()
        });

        let mut reader = FrameReader::new(right.try_clone().unwrap());
        let mut writer = FrameWriter::new(right);
        let client_result = handshake_client(&mut reader, &mut writer, "alice").unwrap();
        let server_result = server.join().unwrap();

        assert_eq!(client_result.connection_id, connection_id);
        assert_eq!(client_result.server_id, server_id);
        assert_eq!(client_result.protocol_version, "1.0");
        assert_eq!(server_result.username, "alice");
        assert_eq!(server_result.version, "1.0");
    }

    #[test]
    fn empty_username_allowed() {
        let (left, right) = tcp_pair();

        let server = thread::spawn(move || {
            serve_one(left, Uuid::new_v4(), Uuid::new_v4(), &HandshakeConfig::default()).unwrap()
        });

        let mut reader = FrameReader::new(right.try_clone().unwrap());
        let mut writer = FrameWriter::new(right);
        handshake_client(&mut reader, &mut writer, "").unwrap();
        assert_eq!(server.join().unwrap().username, "");
    }

    #[test]
    fn wrong_protocol_name_rejected() {
        let (left, right) = tcp_pair();

        let server = thread::spawn(move || {
            serve_one(left, Uuid::new_v4(), Uuid::new_v4(), &HandshakeConfig::default())
        });

        let mut reader = FrameReader::new(right.try_clone().unwrap());
        let mut writer = FrameWriter::new(right);
        let cfg = HandshakeConfig {
            protocol_name: "foobar".to_string(),
            ..HandshakeConfig::default()
        };
        let client_result = handshake_client_with_config(&mut reader, &mut writer, "bob", &cfg);

        assert!(matches!(client_result, Err(PeerError::HandshakeFailed(_))));
        assert!(matches!(
            server.join().unwrap(),
            Err(PeerError::HandshakeFailed(_))
        ));
    }

    #[test]
    fn version_mismatch() {
        let (left, right) = tcp_pair();

        let server = thread::spawn(move || {
            let cfg = HandshakeConfig {
                protocol_version: "2.0".to_string(),
                ..HandshakeConfig::default()
            };
            serve_one(left, Uuid::new_v4(), Uuid::new_v4(), &cfg)
        });

        let mut reader = FrameReader::new(right.try_clone().unwrap());
        let mut writer = FrameWriter::new(right);
        let result = handshake_client(&mut reader, &mut writer, "carol");

        assert!(matches!(result, Err(PeerError::HandshakeFailed(_))));
        assert!(matches!(
            server.join().unwrap(),
            Err(PeerError::HandshakeFailed(_))
        ));
    }

    #[test]
    fn newer_client_minor_is_compatible() {
        assert!(is_version_compatible("1.3", "1.0").unwrap());
        assert!(!is_version_compatible("1.0", "1.3").unwrap());
        assert!(!is_version_compatible("2.0", "1.0").unwrap());
        assert!(parse_version("1").is_err());
        assert!(parse_version("1.2.3").is_err());
        assert!(parse_version("a.b").is_err());
    }

    #[test]
    fn invalid_json_rejected() {
        let (left, right) = tcp_pair();
        let mut raw_writer = FrameWriter::new(left);
        raw_writer.send(b"{not-json").unwrap();

        let result = serve_one(right, Uuid::new_v4(), Uuid::new_v4(), &HandshakeConfig::default());
        assert!(matches!(result, Err(PeerError::Json(_))));
    }

    #[test]
    fn handshake_timeout() {
        let mut reader = FrameReader::new(AlwaysTimedOutReader);
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        let cfg = HandshakeConfig {
            timeout: Duration::from_millis(25),
            ..HandshakeConfig::default()
        };

        let result = handshake_client_with_config(&mut reader, &mut writer, "dave", &cfg);
        assert!(matches!(result, Err(PeerError::Timeout(_))));
    }

    #[test]
    fn rejects_oversized_username() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        let name = "x".repeat(MAX_USERNAME_LEN + 1);

        let result = handshake_client(&mut reader, &mut writer, &name);
        assert!(matches!(result, Err(PeerError::HandshakeFailed(_))));
    }

    #[test]
    fn rejects_oversized_handshake_payload() {
        let (left, right) = tcp_pair();
        let mut raw_writer = FrameWriter::new(left);
        raw_writer.send(&vec![b' '; 256]).unwrap();

        let cfg = HandshakeConfig {
            max_handshake_payload: 64,
            ..HandshakeConfig::default()
        };
        let mut reader = FrameReader::with_config(
            right.try_clone().unwrap(),
            vein_frame::FrameConfig {
                max_payload_size: cfg.max_handshake_payload,
                ..vein_frame::FrameConfig::default()
            },
        );
        let result = read_handshake_request(&mut reader, &cfg);
        assert!(matches!(result, Err(PeerError::HandshakeFailed(_))));
    }

    #[test]
    fn closed_during_handshake() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        let result = handshake_client(&mut reader, &mut writer, "erin");
        assert!(matches!(result, Err(PeerError::HandshakeFailed(_))));
    }

    #[test]
    fn dripping_client_cannot_outlast_timeout() {
        let (left, mut right) = tcp_pair();
        let dripper = thread::spawn(move || {
            let mut wire = Vec::new();
            wire.extend_from_slice(&64u32.to_be_bytes());
            wire.extend_from_slice(&[b' '; 64]);
            for byte in wire {
                if std::io::Write::write_all(&mut right, &[byte]).is_err() {
                    return;
                }
                thread::sleep(Duration::from_millis(20));
            }
        });

        let cfg = HandshakeConfig {
            timeout: Duration::from_millis(150),
            ..HandshakeConfig::default()
        };
        let mut reader = FrameReader::new(left);
        let started = Instant::now();
        let result = read_handshake_request(&mut reader, &cfg);

        assert!(matches!(result, Err(PeerError::Timeout(_))), "{result:?}");
        assert!(started.elapsed() < Duration::from_millis(600));
        drop(reader);
        dripper.join().unwrap();
    }

    struct AlwaysTimedOutReader;

    impl Read for AlwaysTimedOutReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::TimedOut))
        }
    }
}
