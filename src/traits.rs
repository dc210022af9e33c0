//! Core traits for the producer stage.
//!
//! This module defines the seams between a [`ProducerStage`](crate::stage::ProducerStage)
//! and its collaborators: the user's work generator, the downstream
//! request/reply transport and the routing table that picks a transport per item.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

use crate::error::Result;
use crate::item::Item;

/// The lazy, possibly infinite sequence of items handed out by a work source.
pub type WorkStream<P> = BoxStream<'static, Item<P>>;

/// A work source generates the items a producer stage streams downstream.
///
/// The stage calls `init` once before its thread starts, `run` once on its
/// own thread, and `finish` once after the stream has been consumed.
///
/// # Examples
///
/// ```rust
/// use futures::stream::{self, StreamExt};
/// use pipeweld::item::Item;
/// use pipeweld::traits::{WorkSource, WorkStream};
///
/// struct Counter {
///     max: u64,
/// }
///
/// impl WorkSource for Counter {
///     type Payload = u64;
///
///     fn init(&mut self) -> bool {
///         self.max > 0
///     }
///
///     fn run(&mut self) -> Option<WorkStream<u64>> {
///         Some(stream::iter((0..self.max).map(Item::Plain)).boxed())
///     }
///
///     fn finish(&mut self) {}
/// }
/// ```
pub trait WorkSource: Send + 'static {
    /// The payload type sent downstream
    type Payload: Send + 'static;

    /// Prepare the source. Returning false aborts the stage's `init`.
    fn init(&mut self) -> bool;

    /// Hand out the item sequence.
    ///
    /// `None` means the source has no sequence to offer; the stage logs a
    /// warning and completes with zero items instead of failing.
    fn run(&mut self) -> Option<WorkStream<Self::Payload>>;

    /// Release whatever the source acquired in `init`.
    fn finish(&mut self);
}

/// A strict request/reply transport to the next pipeline stage.
#[async_trait]
pub trait Channel<P>: Send + Sync {
    /// Send a payload and wait for the downstream reply.
    ///
    /// Returning `Ok(())` means the downstream stage acknowledged the payload.
    async fn request(&self, payload: P) -> Result<()>;
}

/// Resolves destination labels to downstream channels.
pub trait Router<P>: Send + Sync {
    /// The channel registered under `label`, if any
    fn resolve(&self, label: &str) -> Option<Arc<dyn Channel<P>>>;

    /// The channel used for items without a label
    fn default_channel(&self) -> Arc<dyn Channel<P>>;
}
