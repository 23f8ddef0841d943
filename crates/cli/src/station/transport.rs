//! WebSocket transport
//!
//! Two listeners. The control channel carries JSON text frames both ways:
//! inbound frames go to the command dispatcher, outbound messages come from
//! the message registry. The video channel is write-only binary: each frame
//! is a 16-byte little-endian header (`width u32`, `height u32`, `pts u64`)
//! followed by the RGB bytes.
//!
//! Every connection owns a writer task fed by a bounded queue; the registry
//! sees the queue as a [`Subscriber`]. A closed queue is a failed send, so a
//! dropped connection leaves the registry on the next broadcast at the latest.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use contracts::{ContractError, ExperimentManager, ServerMessage, Subscriber, VideoFrame};
use dispatcher::{CommandDispatcher, SubscriberRegistry};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::CliError;

/// Size of the binary video header
pub const VIDEO_HEADER_LEN: usize = 16;

const CONTROL_QUEUE: usize = 64;
const VIDEO_QUEUE: usize = 4;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Encode a canonical frame for the video channel
pub fn encode_video_frame(frame: &VideoFrame) -> Vec<u8> {
    let pixels = frame.frame.as_slice();
    let mut buf = Vec::with_capacity(VIDEO_HEADER_LEN + pixels.len());
    buf.extend_from_slice(&frame.frame.width().to_le_bytes());
    buf.extend_from_slice(&frame.frame.height().to_le_bytes());
    buf.extend_from_slice(&frame.pts.to_le_bytes());
    buf.extend_from_slice(pixels);
    buf
}

/// Outbound value that can be written to a WebSocket
pub trait WireEncode {
    fn to_wire(&self) -> Result<Message, ContractError>;
}

impl WireEncode for ServerMessage {
    fn to_wire(&self) -> Result<Message, ContractError> {
        Ok(Message::Text(self.to_json()?))
    }
}

impl WireEncode for VideoFrame {
    fn to_wire(&self) -> Result<Message, ContractError> {
        Ok(Message::Binary(encode_video_frame(self)))
    }
}

/// Registry-facing end of one connection
///
/// A lossy subscriber skips messages while its queue is full instead of
/// waiting; only a closed queue counts as a failure.
pub struct WsSubscriber {
    name: String,
    outbound: mpsc::Sender<Message>,
    lossy: bool,
    skipped: u64,
}

impl WsSubscriber {
    pub fn new(name: impl Into<String>, outbound: mpsc::Sender<Message>, lossy: bool) -> Self {
        Self {
            name: name.into(),
            outbound,
            lossy,
            skipped: 0,
        }
    }

    fn closed(&self) -> ContractError {
        ContractError::subscriber_send(&self.name, "connection closed")
    }
}

#[async_trait]
impl<M: WireEncode + Sync> Subscriber<M> for WsSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&mut self, message: &M) -> Result<(), ContractError> {
        let frame = message.to_wire()?;
        if !self.lossy {
            return self.outbound.send(frame).await.map_err(|_| self.closed());
        }
        match self.outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.skipped += 1;
                trace!(subscriber = %self.name, skipped = self.skipped, "Slow client, frame skipped");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(self.closed()),
        }
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        // Best effort; the writer may already be gone
        let _ = self.outbound.try_send(Message::Close(None));
        if self.skipped > 0 {
            debug!(subscriber = %self.name, skipped = self.skipped, "Subscriber closed");
        }
        Ok(())
    }
}

/// Bind one channel's listener
pub async fn bind(channel: &'static str, host: &str, port: u16) -> Result<TcpListener, CliError> {
    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| CliError::bind(channel, &addr, e.to_string()))?;
    let local = listener
        .local_addr()
        .map_err(|e| CliError::bind(channel, &addr, e.to_string()))?;
    info!(channel, addr = %local, "Listening");
    Ok(listener)
}

/// Serve the control channel until `cancel` fires
pub fn spawn_control<E>(
    listener: TcpListener,
    dispatcher: CommandDispatcher<E>,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    E: ExperimentManager + Send + Sync + 'static,
{
    tokio::spawn(accept_loop("control", listener, cancel, move |stream, peer, cancel| {
        serve_control(stream, peer, dispatcher.clone(), cancel)
    }))
}

/// Serve the video channel until `cancel` fires
pub fn spawn_video(
    listener: TcpListener,
    video: Arc<SubscriberRegistry<VideoFrame>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(accept_loop("video", listener, cancel, move |stream, peer, cancel| {
        serve_video(stream, peer, Arc::clone(&video), cancel)
    }))
}

async fn accept_loop<F, Fut>(
    channel: &'static str,
    listener: TcpListener,
    cancel: CancellationToken,
    serve: F,
) where
    F: Fn(TcpStream, SocketAddr, CancellationToken) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                debug!(channel, %peer, "Incoming connection");
                tokio::spawn(serve(stream, peer, cancel.child_token()));
            }
            Err(e) => {
                warn!(channel, error = %e, "Accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
    info!(channel, "Listener stopped");
}

async fn serve_control<E>(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: CommandDispatcher<E>,
    cancel: CancellationToken,
) where
    E: ExperimentManager + Send + Sync + 'static,
{
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(%peer, error = %e, "Control handshake failed");
            return;
        }
    };
    let (sink, mut inbound) = ws.split();
    let (tx, rx) = mpsc::channel(CONTROL_QUEUE);
    let writer = tokio::spawn(write_loop(sink, rx));

    let messages = Arc::clone(dispatcher.messages());
    let id = messages.add(WsSubscriber::new(format!("control:{peer}"), tx, false));
    info!(%peer, id, "Control client connected");

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = inbound.next() => next,
        };
        match next {
            Some(Ok(Message::Text(text))) => {
                let outcome = dispatcher.handle_text(Some(id), &text).await;
                trace!(%peer, outcome = outcome.label(), "Control frame handled");
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(%peer, error = %e, "Control connection error");
                break;
            }
        }
    }

    messages.remove(id).await;
    let _ = writer.await;
    info!(%peer, "Control client disconnected");
}

async fn serve_video(
    stream: TcpStream,
    peer: SocketAddr,
    video: Arc<SubscriberRegistry<VideoFrame>>,
    cancel: CancellationToken,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(%peer, error = %e, "Video handshake failed");
            return;
        }
    };
    let (sink, mut inbound) = ws.split();
    let (tx, rx) = mpsc::channel(VIDEO_QUEUE);
    let writer = tokio::spawn(write_loop(sink, rx));

    let id = video.add(WsSubscriber::new(format!("video:{peer}"), tx, true));
    info!(%peer, id, "Video client connected");

    // Inbound frames are ignored; reading only detects the close
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = inbound.next() => next,
        };
        match next {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
            Some(Ok(_)) => {}
        }
    }

    video.remove(id).await;
    let _ = writer.await;
    info!(%peer, "Video client disconnected");
}

/// Drain the queue into the socket; ends when every sender is gone
async fn write_loop<S>(mut sink: S, mut rx: mpsc::Receiver<Message>)
where
    S: futures_util::Sink<Message> + Unpin,
{
    while let Some(message) = rx.recv().await {
        let closing = matches!(message, Message::Close(_));
        if sink.send(message).await.is_err() || closing {
            break;
        }
    }
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use contracts::{CanonicalFrame, FrameOrigin};
    use sim_bridge::MockEngine;
    use tokio_tungstenite::connect_async;

    fn frame(pts: u64) -> VideoFrame {
        VideoFrame {
            pts,
            captured_at: Utc::now(),
            origin: FrameOrigin::Placeholder,
            frame: CanonicalFrame::filled(4, 2, [10, 20, 30]),
        }
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_encode_video_frame_header() {
        let encoded = encode_video_frame(&frame(7));
        assert_eq!(encoded.len(), VIDEO_HEADER_LEN + 4 * 2 * 3);
        assert_eq!(&encoded[0..4], &4u32.to_le_bytes());
        assert_eq!(&encoded[4..8], &2u32.to_le_bytes());
        assert_eq!(&encoded[8..16], &7u64.to_le_bytes());
        assert_eq!(&encoded[16..19], &[10, 20, 30]);
    }

    #[tokio::test]
    async fn test_lossy_subscriber_skips_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut subscriber = WsSubscriber::new("video:test", tx, true);
        Subscriber::<VideoFrame>::send(&mut subscriber, &frame(1)).await.unwrap();
        Subscriber::<VideoFrame>::send(&mut subscriber, &frame(2)).await.unwrap();
        assert_eq!(subscriber.skipped, 1);
        assert!(matches!(rx.recv().await, Some(Message::Binary(_))));

        drop(rx);
        assert!(Subscriber::<VideoFrame>::send(&mut subscriber, &frame(3)).await.is_err());
    }

    #[tokio::test]
    async fn test_control_round_trip() {
        let listener = bind("control", "127.0.0.1", 0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let engine = Arc::new(MockEngine::new(&[]));
        let messages = Arc::new(SubscriberRegistry::<ServerMessage>::new("messages"));
        let dispatcher = CommandDispatcher::builder(engine, Arc::clone(&messages)).build();
        let cancel = CancellationToken::new();
        let server = spawn_control(listener, dispatcher, cancel.clone());

        let (mut client, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        client
            .send(Message::Text(r#"{"type":"no_such_command"}"#.to_string()))
            .await
            .unwrap();

        let reply = loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => break text,
                Some(Ok(_)) => continue,
                other => panic!("unexpected frame: {other:?}"),
            }
        };
        let value: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(messages.len(), 1);

        client.close(None).await.unwrap();
        wait_for(|| messages.is_empty()).await;

        cancel.cancel();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_video_clients_receive_binary_frames() {
        let listener = bind("video", "127.0.0.1", 0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let video = Arc::new(SubscriberRegistry::<VideoFrame>::new("video"));
        let cancel = CancellationToken::new();
        let server = spawn_video(listener, Arc::clone(&video), cancel.clone());

        let (mut client, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        wait_for(|| video.len() == 1).await;
        assert_eq!(video.broadcast(&frame(42)).await, 1);

        let Some(Ok(Message::Binary(bytes))) = client.next().await else {
            panic!("expected a binary frame");
        };
        assert_eq!(&bytes[8..16], &42u64.to_le_bytes());

        cancel.cancel();
        server.await.unwrap();
    }
}
