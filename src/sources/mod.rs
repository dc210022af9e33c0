//! Work source implementations.
//!
//! Ready-made [`WorkSource`]s for the common cases: a fixed list of items, any
//! iterator, or items pushed in from another task through a channel.

use futures::StreamExt;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::item::Item;
use crate::traits::{WorkSource, WorkStream};

/// A source that yields items from a vector
pub struct VecSource<P> {
    items: VecDeque<Item<P>>,
}

impl<P> VecSource<P> {
    /// Create a new vector source
    pub fn new(items: Vec<Item<P>>) -> Self {
        Self {
            items: items.into(),
        }
    }

    /// Create a source of unlabeled payloads
    pub fn plain(payloads: Vec<P>) -> Self {
        Self::new(payloads.into_iter().map(Item::Plain).collect())
    }

    /// Add more items to the source
    pub fn push(&mut self, item: Item<P>) {
        self.items.push_back(item);
    }

    /// Check if the source has more items
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Get the number of remaining items
    pub fn len(&self) -> usize {
        self.items.len()
    }
}

impl<P: Send + 'static> WorkSource for VecSource<P> {
    type Payload = P;

    fn init(&mut self) -> bool {
        true
    }

    fn run(&mut self) -> Option<WorkStream<P>> {
        let items = std::mem::take(&mut self.items);
        Some(tokio_stream::iter(items).boxed())
    }

    fn finish(&mut self) {}
}

/// A source that lazily pulls items from an iterator, which may be infinite
pub struct IterSource<I> {
    iter: Option<I>,
}

impl<I> IterSource<I> {
    pub fn new(iter: I) -> Self {
        Self { iter: Some(iter) }
    }
}

impl<I, P> WorkSource for IterSource<I>
where
    I: Iterator<Item = Item<P>> + Send + 'static,
    P: Send + 'static,
{
    type Payload = P;

    fn init(&mut self) -> bool {
        self.iter.is_some()
    }

    /// The iterator is handed out once; later calls have no sequence to offer
    fn run(&mut self) -> Option<WorkStream<P>> {
        self.iter.take().map(|iter| tokio_stream::iter(iter).boxed())
    }

    fn finish(&mut self) {}
}

/// A source fed from another task.
///
/// The stream ends once every [`mpsc::Sender`] returned by [`channel`](Self::channel)
/// has been dropped.
pub struct ChannelSource<P> {
    rx: Option<mpsc::Receiver<Item<P>>>,
}

impl<P: Send + 'static> ChannelSource<P> {
    /// Create a source and the sender that feeds it
    pub fn channel(buffer: usize) -> (mpsc::Sender<Item<P>>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self { rx: Some(rx) })
    }
}

impl<P: Send + 'static> WorkSource for ChannelSource<P> {
    type Payload = P;

    fn init(&mut self) -> bool {
        self.rx.is_some()
    }

    fn run(&mut self) -> Option<WorkStream<P>> {
        self.rx.take().map(|rx| ReceiverStream::new(rx).boxed())
    }

    fn finish(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_vec_source() {
        let mut source = VecSource::plain(vec![1, 2, 3]);
        assert_eq!(source.len(), 3);
        assert!(source.init());

        let items: Vec<_> = source.run().unwrap().collect().await;
        assert_eq!(items, vec![Item::Plain(1), Item::Plain(2), Item::Plain(3)]);
        assert!(source.is_empty());
    }

    #[tokio::test]
    async fn test_iter_source_runs_once() {
        let mut source = IterSource::new((0..).map(|n| Item::routed(n, "calib")));
        assert!(source.init());

        let items: Vec<_> = source.run().unwrap().take(2).collect().await;
        assert_eq!(items, vec![Item::routed(0, "calib"), Item::routed(1, "calib")]);
        assert!(source.run().is_none());
    }

    #[tokio::test]
    async fn test_channel_source_ends_with_senders() {
        let (tx, mut source) = ChannelSource::channel(4);
        let stream = source.run().unwrap();

        tx.send(Item::plain("a")).await.unwrap();
        tx.send(Item::plain("b")).await.unwrap();
        drop(tx);

        let items: Vec<_> = stream.collect().await;
        assert_eq!(items, vec![Item::plain("a"), Item::plain("b")]);
    }
}
