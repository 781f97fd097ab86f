// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Result;
use bytes::Bytes;
use line_rpc::{
    client::RpcClient,
    codec::{decoder::FrameDecoder, envelope::{Envelope, EnvelopeKind}},
    engine::connection::ConnectionTemplate,
    server::Server,
    service::registry::{MethodDescriptor, ServiceDescriptor},
    utils::hash8,
};
use serial_test::serial;
use tokio::{
    io::AsyncWriteExt,
    net::TcpStream,
    task::JoinSet,
    time::timeout,
};

use crate::integration_tests::support::{
    AddRequest, AddResponse, EchoRequest, EchoResponse, SeqNote, TEST_MAX_FRAME,
    client_config, eventually, frame_bytes, read_one_envelope, test_template,
};

fn spawn_server_template() -> (ConnectionTemplate, Arc<Mutex<Vec<u64>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    (test_template(seen.clone()), seen)
}

#[tokio::test]
#[serial]
async fn test_echo_roundtrip() -> Result<()> {
    let (template, _) = spawn_server_template();
    let server = Server::new(2, 2)?;
    let addr = server.listen("127.0.0.1", 0, template).await?;

    let client = RpcClient::new(client_config(addr.port()), ConnectionTemplate::new())?;
    let conn = client.connect().await?;

    let response: EchoResponse = timeout(
        Duration::from_secs(5),
        conn.call("test.Echo.Echo", &EchoRequest {
            message: "hello".to_string(),
        }),
    )
    .await??;
    assert_eq!(response.message, "hello");

    client.shutdown();
    server.stop();
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_hundred_concurrent_calls_share_one_connection() -> Result<()> {
    let (template, _) = spawn_server_template();
    let server = Server::new(2, 4)?;
    let addr = server.listen("127.0.0.1", 0, template).await?;

    let client = RpcClient::new(client_config(addr.port()), ConnectionTemplate::new())?;
    let conn = client.connect().await?;

    let mut calls = JoinSet::new();
    for i in 0..100i64 {
        let conn = conn.clone();
        calls.spawn(async move {
            let response: AddResponse = conn
                .call("test.Calc.Add", &AddRequest { a: i, b: i })
                .await?;
            anyhow::ensure!(response.sum == 2 * i, "Add({i}, {i}) returned {}", response.sum);
            Ok::<_, anyhow::Error>(())
        });
    }

    let mut completed = 0;
    while let Some(joined) = timeout(Duration::from_secs(10), calls.join_next()).await? {
        joined??;
        completed += 1;
    }
    assert_eq!(completed, 100, "every done callback must fire exactly once");

    client.shutdown();
    server.stop();
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_unknown_response_id_is_dropped_and_connection_survives() -> Result<()> {
    let (template, _) = spawn_server_template();
    let server = Server::new(1, 1)?;
    let addr = server.listen("127.0.0.1", 0, template).await?;

    let mut stream = TcpStream::connect(addr).await?;
    eventually(|| server.connection_count() == 1, "server saw the raw peer").await?;

    // A RESPONSE that matches nothing: logged and dropped, nothing dies.
    let stray = Envelope::response(0xDEAD_BEEF, Bytes::from_static(b"junk"));
    stream.write_all(&frame_bytes(&stray)).await?;

    // The connection must still serve a normal request afterwards.
    let payload = serde_json::to_vec(&EchoRequest {
        message: "still alive".to_string(),
    })?;
    let request = Envelope::request(
        hash8("test.Echo.Echo"),
        42,
        Bytes::from(payload),
    );
    stream.write_all(&frame_bytes(&request)).await?;

    let mut decoder = FrameDecoder::new(TEST_MAX_FRAME);
    let reply = timeout(
        Duration::from_secs(5),
        read_one_envelope(&mut stream, &mut decoder),
    )
    .await??;
    assert_eq!(reply.kind, EnvelopeKind::Response);
    assert_eq!(reply.identify, 42);
    let echoed: EchoResponse = serde_json::from_slice(&reply.content)?;
    assert_eq!(echoed.message, "still alive");
    assert_eq!(server.connection_count(), 1);

    server.stop();
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_malformed_frame_closes_without_firing_handlers() -> Result<()> {
    let invoked = Arc::new(Mutex::new(0u64));
    let counter = invoked.clone();
    let mut template = ConnectionTemplate::new();
    template.register_service(ServiceDescriptor::new("test.Echo").method(
        MethodDescriptor::deferred("Echo", move |_req: EchoRequest, _responder| {
            *counter.lock().expect("counter poisoned") += 1;
        }),
    ))?;

    let server = Server::new(1, 1)?;
    let addr = server.listen("127.0.0.1", 0, template).await?;

    let mut stream = TcpStream::connect(addr).await?;
    eventually(|| server.connection_count() == 1, "server saw the raw peer").await?;

    // Declared length 5 but the envelope inside is garbage.
    stream.write_all(b"5:ab").await?;
    stream.shutdown().await?;

    eventually(
        || server.connection_count() == 0,
        "truncated malformed frame must close the connection",
    )
    .await?;
    assert_eq!(*invoked.lock().expect("counter poisoned"), 0);

    server.stop();
    Ok(())
}

/// A response type whose serialization always fails.
struct Unserializable;

impl serde::Serialize for Unserializable {
    fn serialize<S>(&self, _serializer: S) -> Result<S::Ok, S::Error>
    where S: serde::Serializer {
        Err(serde::ser::Error::custom("deliberately unserializable"))
    }
}

#[tokio::test]
#[serial]
async fn test_unserializable_response_drops_reply_not_connection() -> Result<()> {
    let mut template = ConnectionTemplate::new();
    template.register_service(ServiceDescriptor::new("test.Echo").method(
        MethodDescriptor::unary("Echo", |req: EchoRequest| EchoResponse {
            message: req.message,
        }),
    ))?;
    template.register_service(ServiceDescriptor::new("test.Broken").method(
        MethodDescriptor::unary("Render", |_req: EchoRequest| Unserializable),
    ))?;

    let server = Server::new(1, 1)?;
    let addr = server.listen("127.0.0.1", 0, template).await?;

    let client = RpcClient::new(client_config(addr.port()), ConnectionTemplate::new())?;
    let conn = client.connect().await?;

    // The reply cannot be encoded, so it is dropped and the call never
    // completes; nothing malformed goes on the wire.
    let broken = timeout(
        Duration::from_millis(500),
        conn.call::<EchoRequest, EchoResponse>("test.Broken.Render", &EchoRequest {
            message: "boom".to_string(),
        }),
    )
    .await;
    assert!(broken.is_err(), "a dropped reply must leave the call pending");

    // The connection survived and still serves ordinary calls.
    assert!(conn.is_connected());
    assert_eq!(server.connection_count(), 1);
    let response: EchoResponse = timeout(
        Duration::from_secs(5),
        conn.call("test.Echo.Echo", &EchoRequest {
            message: "alive".to_string(),
        }),
    )
    .await??;
    assert_eq!(response.message, "alive");

    client.shutdown();
    server.stop();
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_inbound_dispatch_is_fifo_per_connection() -> Result<()> {
    let (template, seen) = spawn_server_template();
    // One worker: submission order is observable as execution order.
    let server = Server::new(1, 1)?;
    let addr = server.listen("127.0.0.1", 0, template).await?;

    let mut stream = TcpStream::connect(addr).await?;
    let mut wire = Vec::new();
    for seq in 0..50u64 {
        let payload = serde_json::to_vec(&SeqNote { seq })?;
        let request =
            Envelope::request(hash8("test.Seq.Note"), 1000 + seq, Bytes::from(payload));
        wire.extend_from_slice(&frame_bytes(&request));
    }
    stream.write_all(&wire).await?;

    eventually(
        || seen.lock().expect("sequence log poisoned").len() == 50,
        "all fifty notes dispatched",
    )
    .await?;
    let order = seen.lock().expect("sequence log poisoned").clone();
    assert_eq!(order, (0..50).collect::<Vec<u64>>());

    server.stop();
    Ok(())
}
