//! Per-session outbound message queue.
//!
//! Many producers (handlers, subscription tasks) push into an
//! [`OutboundSink`]; the session's outbound loop drains the matching
//! [`OutboundQueue`]. Closing the sink wakes every blocked producer and the
//! consumer, so a full queue can never wedge teardown.
//!
//! Messages pushed with [`OutboundSink::push_from`] carry the token of the
//! subscription that produced them. Once that token is cancelled the queue
//! drops them instead of handing them to the consumer.

use huddle_core::Message;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Queued {
    message: Message,
    origin: Option<CancellationToken>,
}

/// Producer side. Cheap to clone.
#[derive(Clone, Debug)]
pub struct OutboundSink {
    tx: mpsc::Sender<Queued>,
    closed: CancellationToken,
}

/// Consumer side, owned by the outbound loop.
#[derive(Debug)]
pub struct OutboundQueue {
    rx: mpsc::Receiver<Queued>,
    closed: CancellationToken,
}

/// Create a bounded sink/queue pair.
pub fn outbound(capacity: usize) -> (OutboundSink, OutboundQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let closed = CancellationToken::new();
    (
        OutboundSink {
            tx,
            closed: closed.clone(),
        },
        OutboundQueue { rx, closed },
    )
}

impl OutboundSink {
    /// Queue a message, waiting for room.
    ///
    /// Returns `false` without queuing once the sink is closed, including
    /// when it closes while this call is waiting.
    pub async fn push(&self, message: Message) -> bool {
        self.enqueue(Queued {
            message,
            origin: None,
        })
        .await
    }

    /// Queue a message on behalf of the subscription owning `origin`.
    ///
    /// The message is discarded before delivery if `origin` is cancelled
    /// while it waits in the queue.
    pub async fn push_from(&self, message: Message, origin: &CancellationToken) -> bool {
        self.enqueue(Queued {
            message,
            origin: Some(origin.clone()),
        })
        .await
    }

    async fn enqueue(&self, queued: Queued) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            () = self.closed.cancelled() => false,
            res = self.tx.send(queued) => res.is_ok(),
        }
    }

    /// Close the sink. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether [`OutboundSink::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the sink is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }
}

impl OutboundQueue {
    /// Next deliverable message, or `None` once the sink is closed.
    ///
    /// Messages whose producing subscription was cancelled are skipped.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            let queued = tokio::select! {
                biased;
                () = self.closed.cancelled() => return None,
                queued = self.rx.recv() => queued?,
            };
            if queued.origin.as_ref().is_some_and(CancellationToken::is_cancelled) {
                continue;
            }
            return Some(queued.message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn messages_arrive_in_order() {
        let (sink, mut queue) = outbound(8);
        assert!(sink.push(Message::new("a", json!(1))).await);
        assert!(sink.push(Message::new("b", json!(2))).await);
        assert_eq!(queue.recv().await.unwrap().name, "a");
        assert_eq!(queue.recv().await.unwrap().name, "b");
    }

    #[tokio::test]
    async fn push_after_close_is_rejected() {
        let (sink, _queue) = outbound(8);
        sink.close();
        assert!(sink.is_closed());
        assert!(!sink.push(Message::new("a", json!(null))).await);
    }

    #[tokio::test]
    async fn close_unblocks_producer_on_full_queue() {
        let (sink, _queue) = outbound(1);
        assert!(sink.push(Message::new("fill", json!(null))).await);

        let blocked = sink.clone();
        let handle = tokio::spawn(async move { blocked.push(Message::new("x", json!(null))).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        sink.close();
        let pushed = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(!pushed);
    }

    #[tokio::test]
    async fn close_ends_consumer() {
        let (sink, mut queue) = outbound(8);
        sink.close();
        assert!(queue.recv().await.is_none());
    }

    #[tokio::test]
    async fn cancelled_origin_is_never_delivered() {
        let (sink, mut queue) = outbound(8);
        let stale = CancellationToken::new();
        let live = CancellationToken::new();
        assert!(sink.push_from(Message::new("stale", json!(1)), &stale).await);
        assert!(sink.push_from(Message::new("live", json!(2)), &live).await);
        assert!(sink.push(Message::new("direct", json!(3))).await);

        stale.cancel();
        assert_eq!(queue.recv().await.unwrap().name, "live");
        assert_eq!(queue.recv().await.unwrap().name, "direct");
        sink.close();
        assert!(queue.recv().await.is_none());
    }

    #[tokio::test]
    async fn closed_resolves_for_every_clone() {
        let (sink, _queue) = outbound(8);
        let other = sink.clone();
        sink.close();
        tokio::time::timeout(Duration::from_secs(1), other.closed())
            .await
            .unwrap();
        assert!(other.is_closed());
    }
}
