// Copyright 2021 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Full-stack smoke tests over the facade.

use futures::prelude::*;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use peerlink::identity::Keypair;
use peerlink::{AddrInfo, Executor, Host, HostBuilder, IdService, ProtocolId};

fn executor() -> Arc<dyn Executor> {
    Arc::new(|future: Pin<Box<dyn Future<Output = ()> + Send>>| {
        async_std::task::spawn(future);
    })
}

fn new_host() -> (Host, Arc<IdService>) {
    let keypair = Keypair::generate_ed25519();
    HostBuilder::new(keypair)
        .yamux_config(peerlink::YamuxConfig {
            keep_alive_interval: Some(Duration::from_secs(5)),
            ..peerlink::YamuxConfig::default()
        })
        .executor(executor())
        .build()
        .unwrap()
}

#[async_std::test]
async fn dial_identify_and_speak_a_protocol() {
    let (server, _server_id) = new_host();
    let (client, client_id) = new_host();

    server.set_stream_handler(ProtocolId::from("/shout/1.0.0"), |mut stream| async move {
        let mut line = Vec::new();
        if stream.read_to_end(&mut line).await.is_ok() {
            line.make_ascii_uppercase();
            let _ = stream.write_all(&line).await;
        }
        let _ = stream.close().await;
    });

    let server_peer = server.local_peer().clone();
    let addr = server.swarm().listen_on(&"/memory/0".parse().unwrap()).unwrap();

    let conn = client.connect(AddrInfo::new(server_peer.clone(), vec![addr])).await.unwrap();
    client_id.identify_wait(&conn).await.unwrap();

    // Identify told us what the server speaks.
    let known = client.peerstore().get_protocols(&server_peer);
    assert!(known.contains(&ProtocolId::from("/shout/1.0.0")));

    let mut stream = client
        .new_stream(&server_peer, vec![ProtocolId::from("/shout/1.0.0")])
        .await
        .unwrap();
    stream.write_all(b"quiet words").await.unwrap();
    stream.close().await.unwrap();
    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    assert_eq!(reply, b"QUIET WORDS");

    // The session ping gives a round-trip measurement.
    let rtt = conn.ping().await.unwrap();
    assert!(rtt < Duration::from_secs(1));

    client.close().await;
    server.close().await;
}

#[async_std::test]
async fn connect_is_idempotent() {
    let (server, _ids) = new_host();
    let (client, _idc) = new_host();

    let server_peer = server.local_peer().clone();
    let addr = server.swarm().listen_on(&"/memory/0".parse().unwrap()).unwrap();
    let info = AddrInfo::new(server_peer, vec![addr]);

    let first = client.connect(info.clone()).await.unwrap();
    let second = client.connect(info).await.unwrap();
    assert_eq!(first.id(), second.id());
    assert_eq!(client.swarm().connections().len(), 1);
}
