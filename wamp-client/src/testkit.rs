//! In-process mock router for exercising the session engine without a
//! real WAMP router or socket: holds the peer side of a channel-backed
//! transport link and speaks `wamp-proto` messages over it.

use crate::config::SessionConfig;
use crate::session::Session;
use crate::transport::{TransportEvent, TransportLink};
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc;
use wamp_proto::{Codec, Dict, JsonCodec, Message};

const RECV_DEADLINE: Duration = Duration::from_secs(5);

pub struct MockRouter {
    to_client: mpsc::Sender<TransportEvent>,
    from_client: mpsc::Receiver<Bytes>,
}

impl MockRouter {
    /// Builds a transport link plus the router side of it.
    pub fn link() -> (TransportLink, MockRouter) {
        // Engine logs show up under RUST_LOG when a test fails.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let (link, from_client, to_client) = TransportLink::pair();
        (
            link,
            MockRouter {
                to_client,
                from_client,
            },
        )
    }

    /// Next message from the client; panics if none arrives in time so
    /// a broken test fails instead of hanging.
    pub async fn recv(&mut self) -> Message {
        let frame = tokio::time::timeout(RECV_DEADLINE, self.from_client.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client dropped the transport");
        JsonCodec.decode(&frame).expect("undecodable client frame")
    }

    pub async fn send(&self, message: Message) {
        let frame = JsonCodec.encode(&message).unwrap();
        self.to_client
            .send(TransportEvent::Frame(frame))
            .await
            .expect("client side of the link is gone");
    }

    /// Sends a raw byte frame, bypassing the codec. For feeding the
    /// session garbage.
    pub async fn send_raw(&self, frame: &[u8]) {
        self.to_client
            .send(TransportEvent::Frame(Bytes::copy_from_slice(frame)))
            .await
            .expect("client side of the link is gone");
    }

    /// Simulates the link going down.
    pub async fn close(&self, reason: Option<&str>) {
        let _ = self
            .to_client
            .send(TransportEvent::Closed(reason.map(str::to_string)))
            .await;
    }

    /// Consumes the client's HELLO and answers WELCOME.
    pub async fn welcome(&mut self, session_id: u64) {
        match self.recv().await {
            Message::Hello { .. } => {}
            other => panic!("expected HELLO, got {:?}", other),
        }
        self.send(Message::Welcome {
            session_id,
            details: Dict::new(),
        })
        .await;
    }
}

/// Connects a session against a fresh mock router and completes the
/// handshake.
pub async fn established(realm: &str) -> (Session, MockRouter) {
    let (link, mut router) = MockRouter::link();
    let connect = Session::connect(link, SessionConfig::new(realm));
    let (session, router) = tokio::join!(connect, async move {
        router.welcome(4000).await;
        router
    });
    (session.expect("handshake failed"), router)
}
