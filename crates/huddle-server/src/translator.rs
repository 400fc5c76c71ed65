//! Turns a raw `(old, new)` change stream into client events.

use futures::{Stream, StreamExt};
use huddle_core::{ChangeEvent, Message};
use huddle_store::{Change, StoreError};
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metrics::CHANGE_EVENTS_TOTAL;
use crate::outbound::OutboundSink;

/// Why a translator loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TranslatorExit {
    /// The subscription's token fired.
    Cancelled,
    /// The stream yielded an error, which was reported to the session.
    Errored,
    /// The stream finished.
    StreamEnded,
    /// The session's outbound sink closed.
    SinkClosed,
}

/// Forward classified changes from `stream` to `sink` until cancelled.
///
/// Cancellation is checked before every item and wins over an item that is
/// ready at the same time. The stream is dropped on return.
pub async fn run_translator<S>(
    mut stream: S,
    entity_kind: &str,
    cancel: CancellationToken,
    sink: OutboundSink,
) -> TranslatorExit
where
    S: Stream<Item = Result<Change, StoreError>> + Unpin,
{
    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => return TranslatorExit::Cancelled,
            item = stream.next() => item,
        };

        let change = match item {
            None => {
                debug!(entity_kind, "change stream ended");
                return TranslatorExit::StreamEnded;
            }
            Some(Err(e)) => {
                warn!(entity_kind, error = %e, "change stream failed");
                let _ = sink.push_from(Message::error(e.to_string()), &cancel).await;
                return TranslatorExit::Errored;
            }
            Some(Ok(change)) => change,
        };

        let Some(event) = ChangeEvent::classify(entity_kind, change.old_value, change.new_value)
        else {
            continue;
        };
        counter!(
            CHANGE_EVENTS_TOTAL,
            "kind" => entity_kind.to_owned(),
            "op" => event.operation.as_str()
        )
        .increment(1);

        tokio::select! {
            biased;
            () = cancel.cancelled() => return TranslatorExit::Cancelled,
            pushed = sink.push_from(event.into_message(), &cancel) => {
                if !pushed {
                    return TranslatorExit::SinkClosed;
                }
            }
        }
    }
}
