//! Status telemetry for producer stages.
//!
//! A stage publishes a [`StatusSnapshot`] at each transition of its streaming
//! loop. Publishing is fire-and-forget: snapshots fan out through an
//! in-process [`TelemetryHub`] and, when an address is configured, as UDP
//! datagrams to a remote monitor. Neither path ever waits on a subscriber.

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use tokio::sync::broadcast;

use crate::error::{Error, Result};

/// Topic tag carried by every producer status message
pub const PRODUCER_STATUS_TOPIC: &str = "GUI_PRODUCER_CHANGE";

/// Current version of the [`StatusSnapshot`] schema
pub const SNAPSHOT_VERSION: u32 = 1;

/// Default number of messages the hub retains for slow subscribers
pub const DEFAULT_TELEMETRY_CAPACITY: usize = 1024;

/// Point-in-time status of a producer stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub version: u32,
    pub stage: String,
    pub running: bool,
    pub nb_job_done: u64,
    #[serde(default)]
    pub failure: Option<String>,
}

impl StatusSnapshot {
    pub fn new(stage: impl Into<String>, running: bool, nb_job_done: u64) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            stage: stage.into(),
            running,
            nb_job_done,
            failure: None,
        }
    }

    /// Attach the cause that ended the stage
    pub fn with_failure(mut self, failure: &Error) -> Self {
        self.failure = Some(failure.to_string());
        self
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a snapshot, rejecting schema versions this crate does not know
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let snapshot: StatusSnapshot = serde_json::from_slice(bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::Telemetry(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(snapshot)
    }
}

/// A two-part telemetry message: topic and serialized snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl TelemetryMessage {
    pub fn status(snapshot: &StatusSnapshot) -> Result<Self> {
        Ok(Self {
            topic: PRODUCER_STATUS_TOPIC.to_string(),
            payload: snapshot.to_json()?,
        })
    }

    /// Datagram form: topic, a zero byte, then the payload
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.topic.len() + 1 + self.payload.len());
        frame.extend_from_slice(self.topic.as_bytes());
        frame.push(0);
        frame.extend_from_slice(&self.payload);
        frame
    }

    pub fn decode(frame: &[u8]) -> Result<Self> {
        let split = frame
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| Error::Telemetry("missing topic delimiter".to_string()))?;
        let topic = std::str::from_utf8(&frame[..split])
            .map_err(|e| Error::Telemetry(e.to_string()))?
            .to_string();
        Ok(Self {
            topic,
            payload: frame[split + 1..].to_vec(),
        })
    }

    /// Decode the payload as a producer status snapshot
    pub fn snapshot(&self) -> Result<StatusSnapshot> {
        if self.topic != PRODUCER_STATUS_TOPIC {
            return Err(Error::Telemetry(format!("unexpected topic '{}'", self.topic)));
        }
        StatusSnapshot::from_json(&self.payload)
    }
}

/// In-process publish/subscribe fan-out for telemetry messages.
///
/// The hub is handed to stages explicitly; cloning it shares the same
/// subscribers.
#[derive(Debug, Clone)]
pub struct TelemetryHub {
    tx: broadcast::Sender<TelemetryMessage>,
}

impl TelemetryHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> TelemetrySubscriber {
        TelemetrySubscriber {
            rx: self.tx.subscribe(),
        }
    }

    fn publish(&self, message: TelemetryMessage) {
        // No subscribers is not an error for a fire-and-forget channel
        let _ = self.tx.send(message);
    }
}

impl Default for TelemetryHub {
    fn default() -> Self {
        Self::new(DEFAULT_TELEMETRY_CAPACITY)
    }
}

/// A monitor's view of a [`TelemetryHub`]
#[derive(Debug)]
pub struct TelemetrySubscriber {
    rx: broadcast::Receiver<TelemetryMessage>,
}

impl TelemetrySubscriber {
    /// Wait for the next status snapshot, or `None` once every publisher is gone.
    ///
    /// Messages dropped because this subscriber lagged behind are skipped.
    pub async fn recv(&mut self) -> Option<Result<StatusSnapshot>> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message.snapshot()),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "telemetry subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take every snapshot already queued without waiting
    pub fn drain(&mut self) -> Vec<StatusSnapshot> {
        let mut snapshots = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(message) => match message.snapshot() {
                    Ok(snapshot) => snapshots.push(snapshot),
                    Err(e) => tracing::warn!(error = %e, "skipping undecodable telemetry"),
                },
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "telemetry subscriber lagged");
                }
                Err(_) => return snapshots,
            }
        }
    }
}

/// The publishing end owned by a single stage
#[derive(Debug)]
pub struct TelemetryChannel {
    hub: TelemetryHub,
    remote: Option<UdpSocket>,
    published: u64,
}

impl TelemetryChannel {
    /// Open a channel publishing into `hub`
    pub fn open(hub: TelemetryHub) -> Self {
        Self {
            hub,
            remote: None,
            published: 0,
        }
    }

    /// Connect the remote monitor at `address` (`host:port`)
    pub fn connect(&mut self, address: &str) -> Result<()> {
        let connection_error = |reason: String| Error::Connection {
            address: address.to_string(),
            reason,
        };

        let target = address
            .to_socket_addrs()
            .map_err(|e| connection_error(e.to_string()))?
            .next()
            .ok_or_else(|| connection_error("address resolved to nothing".to_string()))?;
        let local: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };

        let socket = UdpSocket::bind(local).map_err(|e| connection_error(e.to_string()))?;
        socket
            .connect(target)
            .map_err(|e| connection_error(e.to_string()))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| connection_error(e.to_string()))?;

        tracing::debug!(%target, "telemetry connected");
        self.remote = Some(socket);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.remote.is_some()
    }

    /// Publish a snapshot without waiting on any subscriber
    pub fn publish(&mut self, snapshot: &StatusSnapshot) {
        let message = match TelemetryMessage::status(snapshot) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, stage = %snapshot.stage, "failed to encode snapshot");
                return;
            }
        };

        if let Some(socket) = &self.remote {
            match socket.send(&message.encode()) {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    tracing::debug!("telemetry socket busy, dropping snapshot");
                }
                Err(e) => tracing::debug!(error = %e, "telemetry datagram dropped"),
            }
        }

        self.hub.publish(message);
        self.published += 1;
    }

    /// Close the channel, releasing the remote socket
    pub fn close(self) -> u64 {
        tracing::trace!(published = self.published, "telemetry channel closed");
        self.published
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_schema() {
        let snapshot = StatusSnapshot::new("producer", true, 3);
        let json: serde_json::Value = serde_json::from_slice(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["stage"], "producer");
        assert_eq!(json["running"], true);
        assert_eq!(json["nb_job_done"], 3);
        assert!(json["failure"].is_null());
    }

    #[test]
    fn test_unknown_version_rejected() {
        let bytes = br#"{"version":2,"stage":"p","running":false,"nb_job_done":0}"#;
        assert!(matches!(
            StatusSnapshot::from_json(bytes),
            Err(Error::Telemetry(_))
        ));
    }

    #[test]
    fn test_message_frame() {
        let snapshot = StatusSnapshot::new("p", false, 1).with_failure(&Error::Routing {
            label: "B".to_string(),
        });
        let message = TelemetryMessage::status(&snapshot).unwrap();
        let decoded = TelemetryMessage::decode(&message.encode()).unwrap();

        assert_eq!(decoded.topic, PRODUCER_STATUS_TOPIC);
        assert_eq!(decoded.snapshot().unwrap(), snapshot);
        assert!(TelemetryMessage::decode(b"no-delimiter").is_err());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let mut channel = TelemetryChannel::open(TelemetryHub::new(4));
        channel.publish(&StatusSnapshot::new("p", false, 0));
        assert_eq!(channel.close(), 1);
    }

    #[test]
    fn test_slow_subscriber_never_blocks() {
        let hub = TelemetryHub::new(2);
        let mut subscriber = hub.subscribe();
        let mut channel = TelemetryChannel::open(hub);

        for n in 0..10 {
            channel.publish(&StatusSnapshot::new("p", false, n));
        }

        // Only the newest messages survive
        let snapshots = subscriber.drain();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots.last().unwrap().nb_job_done, 9);
    }

    #[tokio::test]
    async fn test_recv_skips_lag_and_ends_with_publishers() {
        let hub = TelemetryHub::new(2);
        let mut subscriber = hub.subscribe();
        let mut channel = TelemetryChannel::open(hub);

        for n in 0..5 {
            channel.publish(&StatusSnapshot::new("p", false, n));
        }
        channel.close();

        let first = subscriber.recv().await.unwrap().unwrap();
        assert_eq!(first.nb_job_done, 3);
        let second = subscriber.recv().await.unwrap().unwrap();
        assert_eq!(second.nb_job_done, 4);
        assert!(subscriber.recv().await.is_none());
    }

    #[test]
    fn test_connect_udp_monitor() {
        let monitor = UdpSocket::bind("127.0.0.1:0").unwrap();
        monitor
            .set_read_timeout(Some(std::time::Duration::from_secs(5)))
            .unwrap();
        let address = monitor.local_addr().unwrap().to_string();

        let mut channel = TelemetryChannel::open(TelemetryHub::default());
        channel.connect(&address).unwrap();
        assert!(channel.is_connected());
        channel.publish(&StatusSnapshot::new("p", true, 2));

        let mut buf = [0u8; 512];
        let len = monitor.recv(&mut buf).unwrap();
        let snapshot = TelemetryMessage::decode(&buf[..len])
            .unwrap()
            .snapshot()
            .unwrap();
        assert_eq!(snapshot, StatusSnapshot::new("p", true, 2));
    }

    #[test]
    fn test_connect_bad_address() {
        let mut channel = TelemetryChannel::open(TelemetryHub::default());
        let err = channel.connect("not an address").unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
    }
}
