use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::debug;

use crate::error::Error;

const READ_CHANNEL_CAPACITY: usize = 64;

type FrameSink = Pin<Box<dyn Sink<WsMessage, Error = WsError> + Send>>;

struct LiveConnection {
    generation: u64,
    sink: FrameSink,
}

/// One gateway's connection slot.
///
/// The socket underneath is swapped on every reconnect while readers and writers keep
/// the same handle: inbound frames from whichever socket is live arrive on one channel,
/// and writes go to the live socket or fail with `NotConnected`.
pub struct ConnectionWrapper {
    name: String,
    writer: Mutex<Option<LiveConnection>>,
    generation: AtomicU64,
    read_tx: mpsc::Sender<Vec<u8>>,
    read_rx: Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl ConnectionWrapper {
    pub fn new(name: &str) -> Arc<Self> {
        let (read_tx, read_rx) = mpsc::channel(READ_CHANNEL_CAPACITY);
        Arc::new(ConnectionWrapper {
            name: String::from(name),
            writer: Mutex::new(None),
            generation: AtomicU64::new(0),
            read_tx,
            read_rx: Mutex::new(read_rx),
        })
    }

    /// Makes `conn` the live connection, closing the previous one.
    ///
    /// The returned receiver fires once `conn` stops delivering frames.
    pub async fn reset<S>(self: &Arc<Self>, conn: S) -> oneshot::Receiver<()>
    where
        S: Stream<Item = Result<WsMessage, WsError>> + Sink<WsMessage, Error = WsError> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (sink, mut stream) = conn.split();
        let previous = self.writer.lock().await.replace(LiveConnection {
            generation,
            sink: Box::pin(sink),
        });
        if let Some(mut previous) = previous {
            let _ = previous.sink.close().await;
        }

        let (closed_tx, closed_rx) = oneshot::channel();
        let wrapper = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let data = match frame {
                    Ok(WsMessage::Binary(data)) => data,
                    Ok(WsMessage::Text(text)) => text.into_bytes(),
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(err) => {
                        debug!("{}: read error {}", wrapper.name, err);
                        break;
                    }
                };
                if wrapper.read_tx.send(data).await.is_err() {
                    break;
                }
            }
            wrapper.clear(generation).await;
            let _ = closed_tx.send(());
        });
        closed_rx
    }

    async fn clear(&self, generation: u64) {
        let mut writer = self.writer.lock().await;
        if writer.as_ref().map(|live| live.generation) == Some(generation) {
            *writer = None;
        }
    }

    pub async fn write(&self, data: Vec<u8>) -> crate::Result<()> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(live) => Ok(live.sink.send(WsMessage::Binary(data)).await?),
            None => Err(Error::NotConnected(self.name.clone())),
        }
    }

    /// Next inbound frame from any connection this wrapper has held.
    pub async fn read(&self) -> Option<Vec<u8>> {
        self.read_rx.lock().await.recv().await
    }

    pub async fn is_connected(&self) -> bool {
        self.writer.lock().await.is_some()
    }

    pub async fn close(&self) {
        let live = self.writer.lock().await.take();
        if let Some(mut live) = live {
            if let Err(err) = live.sink.close().await {
                debug!("{}: close error {}", self.name, err);
            }
        }
    }
}
