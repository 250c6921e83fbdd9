use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use wamp_proto::framing;

/// Depth of the per-link channels between the socket tasks and the
/// session dispatch loop.
const LINK_BUFFER: usize = 64;

/// Notifications delivered by a transport to the session engine.
#[derive(Debug)]
pub enum TransportEvent {
    /// One complete inbound message frame.
    Frame(Bytes),
    /// The link went down, with a reason when one is known.
    Closed(Option<String>),
}

/// An established, ordered, reliable byte-message link to a router.
///
/// The engine consumes the link as a channel pair: frames written to
/// `tx` are sent to the peer in order, and everything the peer sends
/// arrives on `rx`, terminated by a single [`TransportEvent::Closed`].
/// Any transport that produces this shape plugs in; reconnection policy
/// lives above the session, not here.
pub struct TransportLink {
    pub tx: mpsc::Sender<Bytes>,
    pub rx: mpsc::Receiver<TransportEvent>,
}

impl TransportLink {
    /// Builds a link plus its peer-side endpoints. Used by in-process
    /// transports and test harnesses that stand in for a router.
    pub fn pair() -> (TransportLink, mpsc::Receiver<Bytes>, mpsc::Sender<TransportEvent>) {
        let (out_tx, out_rx) = mpsc::channel(LINK_BUFFER);
        let (in_tx, in_rx) = mpsc::channel(LINK_BUFFER);
        (
            TransportLink {
                tx: out_tx,
                rx: in_rx,
            },
            out_rx,
            in_tx,
        )
    }
}

/// Connects a TCP stream to a router and bridges it to a
/// [`TransportLink`] with length-prefixed framing, one reader and one
/// writer task per connection.
pub async fn connect_tcp(addr: &str, max_frame_size: u32) -> std::io::Result<TransportLink> {
    let stream = TcpStream::connect(addr).await?;
    debug!("TCP transport connected to {}", addr);
    Ok(spawn_io(stream, max_frame_size))
}

fn spawn_io(stream: TcpStream, max_frame_size: u32) -> TransportLink {
    let (link, mut out_rx, in_tx) = TransportLink::pair();
    let (mut read_half, mut write_half) = stream.into_split();

    tokio::spawn(async move {
        loop {
            match framing::read_frame(&mut read_half, max_frame_size).await {
                Ok(frame) => {
                    if in_tx.send(TransportEvent::Frame(frame)).await.is_err() {
                        // Session side is gone; stop reading.
                        break;
                    }
                }
                Err(e) => {
                    debug!("transport read ended: {}", e);
                    let _ = in_tx
                        .send(TransportEvent::Closed(Some(e.to_string())))
                        .await;
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if let Err(e) = framing::write_frame(&mut write_half, &frame).await {
                warn!("transport write failed: {}", e);
                break;
            }
        }
        // Dropping the write half closes our sending direction.
    });

    link
}
