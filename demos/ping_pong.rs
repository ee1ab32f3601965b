//! Example: Ping/Pong over TCP
//!
//! A server and a client negotiate a three-way handshake over a loopback
//! TCP connection, then trade requests and commands in both directions.
//!
//! Run with: `cargo run --example ping_pong`

#![allow(clippy::uninlined_format_args)]

use serde::{Deserialize, Serialize};
use session_protocol::prelude::*;
use session_protocol::utils::{global_metrics, logging::init_logging};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    name: String,
    nonce: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Welcome {
    nonce: u64,
    motd: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Confirm {
    nonce: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Ping {
    seq: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Pong {
    seq: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Announce(String);

fn protocol() -> Result<Arc<Protocol>> {
    let protocol = Protocol::builder()
        .message::<Hello>(1, SerializationFormat::Bincode)
        .message::<Welcome>(2, SerializationFormat::Json)
        .message::<Confirm>(3, SerializationFormat::Bincode)
        .message::<Ping>(10, SerializationFormat::Bincode)
        .message::<Pong>(11, SerializationFormat::Bincode)
        .message::<Announce>(20, SerializationFormat::MessagePack)
        .handshake()
        .initiated_by(Endpoint::Client)
        .three_way::<Hello, Welcome, Confirm>()
        .generate(|| Hello {
            name: "demo-client".to_string(),
            nonce: 0x5EED,
        })
        .receive(|hello| {
            info!(client = %hello.name, "Greeting received");
            (
                Welcome {
                    nonce: hello.nonce,
                    motd: format!("welcome, {}", hello.name),
                },
                HandshakeOutcome::Accepted,
            )
        })
        .verify(|hello, welcome| {
            let outcome = if welcome.nonce == hello.nonce {
                HandshakeOutcome::Accepted
            } else {
                HandshakeOutcome::Invalid
            };
            (Confirm { nonce: hello.nonce }, outcome)
        })
        .acknowledge(|hello, _, confirm| confirm.nonce == hello.nonce)
        .finish()
        .for_request::<Ping>()
        .respond_with(|ping: Ping| async move { Ok(Pong { seq: ping.seq }) })
        .for_response::<Pong>()
        .to_request::<Ping>()
        .handle_with(|pong: &Pong| {
            info!(seq = pong.seq, "Pong observed");
            Ok(())
        })
        .for_command::<Announce>()
        .execute(|announce: Announce| async move {
            info!(text = %announce.0, "Announcement");
            Ok(())
        })
        .build()?;
    Ok(Arc::new(protocol))
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let config = ProtocolConfig::default_with_overrides(|c| {
        c.session.request_timeout = Duration::from_secs(2);
    });
    config.validate_strict()?;
    init_logging(&config.logging)?;

    let protocol = protocol()?;
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let address = listener.local_addr()?.to_string();

    let server_protocol = protocol.clone();
    let server_config = config.clone();
    let server = tokio::spawn(async move {
        let mut transport = TcpTransport::accept(&listener).await?;
        let session =
            Orchestrator::open(server_protocol, &mut transport, Endpoint::Server, &server_config)
                .await?;
        session.start().await?;
        session
            .send_command(Announce("server is up".to_string()))
            .await?;
        let outcome = session.run_to_end().await;
        Ok::<_, ProtocolError>(outcome)
    });

    let mut transport = TcpTransport::new(address);
    let client = Orchestrator::open(protocol, &mut transport, Endpoint::Client, &config).await?;
    client.start().await?;

    for seq in 1..=5 {
        let pong: Pong = client.request(Ping { seq }).await?;
        println!("ping {} -> pong {}", seq, pong.seq);
    }
    client.send_command(Announce("client says bye".to_string())).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.close().await?;
    let server_outcome = server.await??;
    println!("client outcome: {:?}", client.run_to_end().await);
    println!("server outcome: {:?}", server_outcome);

    global_metrics().log_metrics();
    Ok(())
}
