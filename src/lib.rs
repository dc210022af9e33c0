//! # Threaded producer stage for request/reply streaming pipelines
//!
//! This crate provides the source end of a streaming pipeline: a producer stage
//! that drives a user-supplied work generator on its own thread, forwards each
//! item to the next stage over a blocking request/reply channel, and publishes
//! status telemetry for external monitors.
//!
//! ## Core Concepts
//!
//! - **WorkSource**: Hands out a lazy, possibly infinite sequence of items
//! - **Item**: A payload, optionally labeled with a destination
//! - **Router**: Maps destination labels to downstream channels
//! - **Channel**: Request/reply transport; each send waits for the reply
//! - **ProducerStage**: Owns the thread that ties all of the above together
//! - **Telemetry**: Fire-and-forget status snapshots for monitors
//!
//! ## Example
//!
//! ```rust
//! use pipeweld::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (tx, rx) = request_channel::<String>(1);
//!     let consumer = tokio::spawn(rx.collect_all());
//!
//!     let hub = TelemetryHub::default();
//!     let mut monitor = hub.subscribe();
//!
//!     let mut stage = ProducerStage::new("producer", Connexions::new("reco", tx))
//!         .source(VecSource::plain(vec!["a".to_string(), "b".to_string()]))
//!         .monitor(hub);
//!
//!     stage.init()?;
//!     stage.start()?;
//!     let report = tokio::task::spawn_blocking(move || {
//!         let report = stage.join();
//!         stage.finish();
//!         report
//!     })
//!     .await
//!     .unwrap()?;
//!
//!     assert_eq!(report.nb_job_done, 2);
//!     assert_eq!(consumer.await.unwrap().len(), 2);
//!     assert_eq!(monitor.drain().len(), 6);
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod error;
pub mod item;
pub mod router;
pub mod sources;
pub mod stage;
pub mod telemetry;
pub mod traits;

// Re-export commonly used items
pub mod prelude {
    pub use crate::channel::{request_channel, Request, RequestReceiver, RequestSender};
    pub use crate::error::{Error, Result};
    pub use crate::item::Item;
    pub use crate::router::Connexions;
    pub use crate::sources::{ChannelSource, IterSource, VecSource};
    pub use crate::stage::{ProducerConfig, ProducerStage, RunReport};
    pub use crate::telemetry::{StatusSnapshot, TelemetryHub, TelemetrySubscriber};
    pub use crate::traits::{Channel, Router, WorkSource, WorkStream};
}

// Re-export main error type
pub use error::{Error, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
