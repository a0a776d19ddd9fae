//! Duplex socket boundary.
//!
//! A [`Connector`] opens one socket per connection attempt and hands back a
//! [`SocketHandle`]: a stream of [`SocketEvent`]s and a sink for
//! [`SocketCommand`]s. The transport never sees the socket type itself, so
//! the WebSocket implementation here and the in-process mock in
//! [`crate::testing`] are interchangeable.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use pylon_core::Frame;
use pylon_core::close_codes;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, warn};

/// Something that happened on the socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketEvent {
    /// The socket finished opening.
    Open,
    /// A message arrived.
    Message(Frame),
    /// The socket reported a failure. A [`SocketEvent::Close`] follows.
    Error(String),
    /// The socket closed. No further events follow.
    Close {
        /// Close code.
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
}

/// An instruction for the socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketCommand {
    /// Send a message.
    Send(Frame),
    /// Close with a code and reason.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// The two ends of an opened socket as seen by the transport.
///
/// Dropping the handle closes the socket.
#[derive(Debug)]
pub struct SocketHandle {
    /// Socket lifecycle and inbound messages.
    pub events: mpsc::UnboundedReceiver<SocketEvent>,
    /// Outbound messages and close requests.
    pub commands: mpsc::UnboundedSender<SocketCommand>,
}

impl SocketHandle {
    /// Create a connected pair: the handle for the transport and the
    /// opposite ends for whatever drives the socket.
    pub fn pair() -> (
        Self,
        mpsc::UnboundedSender<SocketEvent>,
        mpsc::UnboundedReceiver<SocketCommand>,
    ) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        (
            Self {
                events: event_rx,
                commands: command_tx,
            },
            event_tx,
            command_rx,
        )
    }
}

/// Opens sockets.
pub trait Connector: Send + Sync + 'static {
    /// Begin opening a socket to `url`.
    ///
    /// Must not block. Connection progress and failure are reported through
    /// the returned handle's events.
    fn open(&self, url: &str) -> SocketHandle;
}

impl<C: Connector + ?Sized> Connector for Arc<C> {
    fn open(&self, url: &str) -> SocketHandle {
        (**self).open(url)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket connector
// ─────────────────────────────────────────────────────────────────────────────

/// [`Connector`] backed by `tokio-tungstenite`.
///
/// Each socket runs on its own task that pumps frames between the WebSocket
/// and the handle's channels. Must be used from within a tokio runtime.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(&self, url: &str) -> SocketHandle {
        let (handle, events, commands) = SocketHandle::pair();
        let _ = tokio::spawn(ws_pump(url.to_owned(), events, commands));
        handle
    }
}

async fn ws_pump(
    url: String,
    events: mpsc::UnboundedSender<SocketEvent>,
    mut commands: mpsc::UnboundedReceiver<SocketCommand>,
) {
    // Frames sent before the socket opened go out right after it does.
    let mut early = Vec::new();
    let connecting = connect_async(url.as_str());
    tokio::pin!(connecting);
    let ws = loop {
        tokio::select! {
            result = &mut connecting => match result {
                Ok((ws, _)) => break ws,
                Err(e) => {
                    warn!(%url, error = %e, "websocket connect failed");
                    let _ = events.send(SocketEvent::Error(e.to_string()));
                    let _ = events.send(abnormal_close());
                    return;
                }
            },
            command = commands.recv() => match command {
                Some(SocketCommand::Send(frame)) => early.push(frame),
                Some(SocketCommand::Close { code, reason }) => {
                    debug!(%url, code, "closed while connecting");
                    let _ = events.send(SocketEvent::Close { code, reason });
                    return;
                }
                None => {
                    debug!(%url, "handle dropped while connecting");
                    return;
                }
            },
        }
    };
    debug!(%url, "websocket open");
    let _ = events.send(SocketEvent::Open);

    let (mut ws_tx, mut ws_rx) = ws.split();
    for frame in early {
        if let Err(e) = ws_tx.send(to_message(frame)).await {
            let _ = events.send(SocketEvent::Error(e.to_string()));
            let _ = events.send(abnormal_close());
            return;
        }
    }

    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(SocketCommand::Send(frame)) => {
                        if let Err(e) = ws_tx.send(to_message(frame)).await {
                            let _ = events.send(SocketEvent::Error(e.to_string()));
                            let _ = events.send(abnormal_close());
                            return;
                        }
                    }
                    Some(SocketCommand::Close { code, reason }) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.clone().into(),
                        };
                        let _ = ws_tx.send(Message::Close(Some(frame))).await;
                        let _ = events.send(SocketEvent::Close { code, reason });
                        return;
                    }
                    None => {
                        // Handle dropped.
                        let _ = ws_tx.send(Message::Close(None)).await;
                        return;
                    }
                }
            }
            message = ws_rx.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        let frame = Frame::Text(text.as_str().to_owned());
                        let _ = events.send(SocketEvent::Message(frame));
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        let _ = events.send(SocketEvent::Message(Frame::Binary(bytes.to_vec())));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame.map_or_else(
                            || (close_codes::NO_STATUS, String::new()),
                            |f| (u16::from(f.code), f.reason.as_str().to_owned()),
                        );
                        debug!(code, %reason, "websocket closed by peer");
                        let _ = events.send(SocketEvent::Close { code, reason });
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let _ = events.send(SocketEvent::Error(e.to_string()));
                        let _ = events.send(abnormal_close());
                        return;
                    }
                    None => {
                        let _ = events.send(abnormal_close());
                        return;
                    }
                }
            }
        }
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(bytes) => Message::Binary(bytes.into()),
    }
}

fn abnormal_close() -> SocketEvent {
    SocketEvent::Close {
        code: close_codes::ABNORMAL,
        reason: close_codes::describe(close_codes::ABNORMAL).to_owned(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncReadExt;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn pair_connects_both_ends() {
        let (mut handle, events, mut commands) = SocketHandle::pair();
        events.send(SocketEvent::Open).unwrap();
        assert_eq!(handle.events.recv().await, Some(SocketEvent::Open));
        handle
            .commands
            .send(SocketCommand::Send(Frame::Text("x".into())))
            .unwrap();
        assert_eq!(
            commands.recv().await,
            Some(SocketCommand::Send(Frame::Text("x".into())))
        );
    }

    /// Accepts one TCP connection but never answers the upgrade.
    struct SilentPeer {
        url: String,
        accepted: oneshot::Receiver<()>,
        gone: oneshot::Receiver<()>,
    }

    async fn silent_peer() -> SilentPeer {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (accepted_tx, accepted) = oneshot::channel();
        let (gone_tx, gone) = oneshot::channel();
        let _ = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = accepted_tx.send(());
            let mut buf = Vec::new();
            let _ = stream.read_to_end(&mut buf).await;
            let _ = gone_tx.send(());
        });
        SilentPeer {
            url: format!("ws://127.0.0.1:{port}/"),
            accepted,
            gone,
        }
    }

    #[tokio::test]
    async fn close_while_connecting_abandons_the_attempt() {
        let peer = silent_peer().await;
        let mut handle = WsConnector.open(&peer.url);
        peer.accepted.await.unwrap();
        handle
            .commands
            .send(SocketCommand::Close {
                code: 4000,
                reason: "bye".into(),
            })
            .unwrap();

        let event = timeout(WAIT, handle.events.recv()).await.unwrap();
        assert_eq!(
            event,
            Some(SocketEvent::Close {
                code: 4000,
                reason: "bye".into(),
            })
        );
        timeout(WAIT, peer.gone).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn dropping_the_handle_while_connecting_ends_the_pump() {
        let peer = silent_peer().await;
        let handle = WsConnector.open(&peer.url);
        peer.accepted.await.unwrap();
        drop(handle);
        timeout(WAIT, peer.gone).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn ws_connector_reports_unreachable_peer() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut handle = WsConnector.open(&format!("ws://127.0.0.1:{port}/"));
        let first = handle.events.recv().await.unwrap();
        assert!(matches!(first, SocketEvent::Error(_)));
        let second = handle.events.recv().await.unwrap();
        assert_eq!(
            second,
            SocketEvent::Close {
                code: close_codes::ABNORMAL,
                reason: "Socket hung up".into(),
            }
        );
    }
}
