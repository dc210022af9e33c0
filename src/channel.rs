//! In-process request/reply transport.
//!
//! A [`RequestSender`] is the producer side of a strict request/reply pair: each
//! `request` enqueues the payload together with a oneshot reply slot and waits
//! until the downstream stage answers through [`Request::reply`].

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::traits::Channel;

/// Create a request/reply channel pair with room for `buffer` queued requests.
///
/// With the producer waiting for every reply, at most one request per
/// sender is ever in flight regardless of the buffer size.
pub fn request_channel<P: Send + 'static>(buffer: usize) -> (RequestSender<P>, RequestReceiver<P>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (RequestSender { tx }, RequestReceiver { rx })
}

/// A payload awaiting its reply
#[derive(Debug)]
pub struct Request<P> {
    payload: P,
    reply: oneshot::Sender<()>,
}

impl<P> Request<P> {
    /// Borrow the payload
    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Acknowledge the request, releasing the waiting producer
    pub fn reply(self) -> P {
        // The requester may have timed out and gone away
        let _ = self.reply.send(());
        self.payload
    }

    /// Take the payload and the reply handle apart
    pub fn into_parts(self) -> (P, Responder) {
        (
            self.payload,
            Responder {
                reply: self.reply,
            },
        )
    }
}

/// A detached reply handle for a [`Request`]
#[derive(Debug)]
pub struct Responder {
    reply: oneshot::Sender<()>,
}

impl Responder {
    /// Acknowledge the request
    pub fn reply(self) {
        let _ = self.reply.send(());
    }
}

/// The producer side of a request/reply pair
#[derive(Debug)]
pub struct RequestSender<P> {
    tx: mpsc::Sender<Request<P>>,
}

impl<P> Clone for RequestSender<P> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

#[async_trait]
impl<P: Send + 'static> Channel<P> for RequestSender<P> {
    async fn request(&self, payload: P) -> Result<()> {
        let (reply, answered) = oneshot::channel();
        self.tx.send(Request { payload, reply }).await?;
        answered.await.map_err(Error::from)
    }
}

/// The downstream side of a request/reply pair
#[derive(Debug)]
pub struct RequestReceiver<P> {
    rx: mpsc::Receiver<Request<P>>,
}

impl<P> RequestReceiver<P> {
    /// Wait for the next request, or `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<Request<P>> {
        self.rx.recv().await
    }

    /// Reply to every request until the senders are dropped, returning the payloads
    pub async fn collect_all(mut self) -> Vec<P> {
        let mut payloads = Vec::new();
        while let Some(request) = self.recv().await {
            payloads.push(request.reply());
        }
        payloads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_request_waits_for_reply() {
        let (tx, mut rx) = request_channel::<u32>(4);

        let consumer = tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            assert_eq!(*request.payload(), 7);
            request.reply()
        });

        assert_ok!(tx.request(7).await);
        assert_eq!(consumer.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_dropped_request_is_channel_closed() {
        let (tx, mut rx) = request_channel::<u32>(1);

        tokio::spawn(async move {
            // Drop without replying
            let _ = rx.recv().await;
        });

        let err = assert_err!(tx.request(1).await);
        assert!(matches!(err, Error::ChannelClosed));
    }

    #[tokio::test]
    async fn test_closed_receiver() {
        let (tx, rx) = request_channel::<u32>(1);
        drop(rx);
        assert!(matches!(tx.request(1).await, Err(Error::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_reply_through_detached_responder() {
        let (tx, mut rx) = request_channel::<String>(1);

        let consumer = tokio::spawn(async move {
            let (payload, responder) = rx.recv().await.unwrap().into_parts();
            let seen = payload.to_uppercase();
            responder.reply();
            seen
        });

        assert_ok!(tx.request("frame".to_string()).await);
        assert_eq!(consumer.await.unwrap(), "FRAME");
    }

    #[tokio::test]
    async fn test_collect_all() {
        let (tx, rx) = request_channel::<&'static str>(2);
        let collector = tokio::spawn(rx.collect_all());

        for word in ["a", "b", "c"] {
            tx.request(word).await.unwrap();
        }
        drop(tx);

        assert_eq!(collector.await.unwrap(), vec!["a", "b", "c"]);
    }
}
