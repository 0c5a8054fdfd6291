#![cfg(feature = "cli")]

use std::io::{BufRead, BufReader};
use std::net::TcpListener;
use std::process::{Child, Command, Stdio};

struct ServeProcess {
    child: Child,
    addr: String,
    server_id: String,
}

impl Drop for ServeProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Start `vein serve` on an ephemeral port and wait for its listening record.
fn spawn_server() -> ServeProcess {
    let mut child = Command::new(env!("CARGO_BIN_EXE_vein"))
        .args(["--format", "json", "--log-level", "error", "serve", "127.0.0.1:0"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve command should start");

    let stdout = child.stdout.take().expect("stdout should be piped");
    let mut line = String::new();
    BufReader::new(stdout)
        .read_line(&mut line)
        .expect("listening record should be printed");
    let record: serde_json::Value =
        serde_json::from_str(&line).expect("listening record should be json");
    assert_eq!(record["event"], "listening");

    ServeProcess {
        child,
        addr: record["addr"].as_str().expect("addr").to_string(),
        server_id: record["server_id"].as_str().expect("server_id").to_string(),
    }
}

fn vein(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_vein"))
        .args(["--format", "json", "--log-level", "error"])
        .args(args)
        .output()
        .expect("vein should run")
}

#[test]
fn send_wait_prints_the_echoed_reply() {
    let server = spawn_server();
    let output = vein(&[
        "send",
        &server.addr,
        "--type",
        "ECHO",
        "--data",
        "hello",
        "--wait",
        "--username",
        "cli",
    ]);
    assert_eq!(output.status.code(), Some(0), "{output:?}");

    let reply: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("reply should be json");
    assert_eq!(reply["packet_type"], "ECHO");
    assert_eq!(reply["payload"], "hello");
    assert_eq!(reply["sender_id"], server.server_id.as_str());
    assert_eq!(reply["is_reply"], true);
}

#[test]
fn ping_reports_each_round_trip() {
    let server = spawn_server();
    let output = vein(&["ping", &server.addr, "--count", "3"]);
    assert_eq!(output.status.code(), Some(0), "{output:?}");

    let records: Vec<serde_json::Value> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("ping record should be json"))
        .collect();
    assert_eq!(records.len(), 3);
    for (seq, record) in records.iter().enumerate() {
        assert_eq!(record["seq"], seq as u64 + 1);
        assert_eq!(record["server_id"], server.server_id.as_str());
        assert!(record["rtt_ms"].as_f64().is_some());
    }
}

#[test]
fn relay_to_unknown_client_fails() {
    let server = spawn_server();
    let output = vein(&[
        "relay",
        &server.addr,
        "--to",
        "00000000-0000-4000-8000-000000000001",
        "--type",
        "CHAT",
        "--data",
        "anyone?",
    ]);
    assert_eq!(output.status.code(), Some(1), "{output:?}");
    assert!(String::from_utf8_lossy(&output.stderr).contains("not connected"));
}

#[test]
fn unanswered_request_exits_with_timeout_code() {
    let server = spawn_server();
    let output = vein(&[
        "send",
        &server.addr,
        "--type",
        "NOBODY_HOME",
        "--wait",
        "--timeout",
        "200ms",
    ]);
    assert_eq!(output.status.code(), Some(124), "{output:?}");
}

#[test]
fn refused_connection_exits_with_transport_code() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
        listener.local_addr().expect("local addr").to_string()
    };
    let output = vein(&["ping", &addr]);
    assert_eq!(output.status.code(), Some(3), "{output:?}");
}

#[test]
fn version_extended_reports_protocol() {
    let output = vein(&["version", "--extended"]);
    assert_eq!(output.status.code(), Some(0));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(&format!("version: {}", env!("CARGO_PKG_VERSION"))));
    assert!(stdout.contains("protocol: vein 1.0"));
}
