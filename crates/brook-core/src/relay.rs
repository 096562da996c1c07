use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::event::StreamEvent;

const KEEPALIVE_FRAME: &[u8] = b": keep-alive\n\n";

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub keepalive_interval: Duration,
    /// A send blocked longer than this treats the client as gone.
    pub write_timeout: Duration,
    pub channel_capacity: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(15),
            write_timeout: Duration::from_secs(5),
            channel_capacity: 32,
        }
    }
}

/// Client-facing half of one generation stream.
///
/// Frames are forwarded only while the connection is open. Once the client
/// disconnects (or stalls past the write timeout), `send` becomes a silent
/// no-op: a write racing a close is expected, never a fault, and closing
/// never reaches back into the supervisor.
pub struct ClientRelay {
    tx: Option<mpsc::Sender<Bytes>>,
    write_timeout: Duration,
}

impl ClientRelay {
    /// Creates a relay and the frame receiver to hand to the HTTP response
    /// body. Keep-alive comments are injected between the two on a fixed
    /// interval, independent of chunk arrival.
    pub fn channel(settings: &RelaySettings) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel::<Bytes>(settings.channel_capacity);
        let rx = spawn_keepalive(rx, settings.keepalive_interval, settings.channel_capacity);
        (Self::from_sender(tx, settings.write_timeout), rx)
    }

    /// Wires a relay directly onto an existing sender, without the
    /// keep-alive pump.
    pub fn from_sender(tx: mpsc::Sender<Bytes>, write_timeout: Duration) -> Self {
        Self {
            tx: Some(tx),
            write_timeout,
        }
    }

    pub fn is_open(&self) -> bool {
        self.tx.is_some()
    }

    pub async fn send(&mut self, event: &StreamEvent) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        let frame = event.to_frame();
        match tokio::time::timeout(self.write_timeout, tx.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                debug!("client stream closed; dropping further frames");
                self.tx = None;
            }
            Err(_) => {
                debug!("client stream stalled past write timeout; treating as closed");
                self.tx = None;
            }
        }
    }
}

/// Merges periodic keep-alive comments into the outbound frame stream so
/// intermediary proxies do not drop an idle connection. Ends as soon as
/// either side goes away.
fn spawn_keepalive(
    mut upstream: mpsc::Receiver<Bytes>,
    interval: Duration,
    capacity: usize,
) -> mpsc::Receiver<Bytes> {
    let (tx, rx) = mpsc::channel::<Bytes>(capacity);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate tick; the first keep-alive should come after
        // one full interval.
        ticker.tick().await;

        loop {
            tokio::select! {
                maybe_frame = upstream.recv() => {
                    let Some(frame) = maybe_frame else {
                        break;
                    };
                    if tx.send(frame).await.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if tx.send(Bytes::from_static(KEEPALIVE_FRAME)).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}
