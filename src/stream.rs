// src/stream.rs
//
// Push channel: every subscriber gets its own ticker task that re-sends the
// aggregated list until the client goes away.
use axum::response::sse::Event;
use metrics::gauge;
use serde::Serialize;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;

use crate::aggregator::Aggregator;
use crate::ingest::types::RawItem;

pub const EVENT_NAME: &str = "alerts";

#[derive(Serialize)]
struct StreamPayload<'a> {
    items: &'a [RawItem],
}

/// `event: alerts` with `{"items": [...]}` as data.
pub fn alerts_event(items: &[RawItem]) -> Result<Event, axum::Error> {
    Event::default()
        .event(EVENT_NAME)
        .json_data(StreamPayload { items })
}

/// Counts itself in `active` for as long as it lives.
struct SubscriberGuard {
    active: Arc<AtomicUsize>,
}

impl SubscriberGuard {
    fn new(active: Arc<AtomicUsize>) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        gauge!("alerts_stream_subscribers").set(now as f64);
        Self { active }
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        let now = self.active.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        gauge!("alerts_stream_subscribers").set(now as f64);
    }
}

#[derive(Clone)]
pub struct StreamHub {
    aggregator: Arc<Aggregator>,
    interval: Duration,
    active: Arc<AtomicUsize>,
}

impl StreamHub {
    pub fn new(aggregator: Arc<Aggregator>, interval: Duration) -> Self {
        Self {
            aggregator,
            interval,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Subscriber tasks currently alive.
    pub fn active_subscribers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Spawn a ticker for one subscriber. The first push happens immediately.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(4);
        let guard = SubscriberGuard::new(Arc::clone(&self.active));
        let aggregator = Arc::clone(&self.aggregator);
        let period = self.interval;

        let task = tokio::spawn(async move {
            let _guard = guard;
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = ticker.tick() => {
                        let items = aggregator.items_or_empty().await;
                        let event = match alerts_event(&items) {
                            Ok(ev) => ev,
                            Err(e) => {
                                tracing::warn!(error = ?e, "failed to encode alerts event");
                                continue;
                            }
                        };
                        if tx.send(Ok(event)).await.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("alerts subscriber closed");
        });

        Subscription {
            events: ReceiverStream::new(rx),
            task,
        }
    }
}

/// Event stream for one client. Dropping it (client disconnect) stops its ticker.
pub struct Subscription {
    events: ReceiverStream<Result<Event, Infallible>>,
    task: JoinHandle<()>,
}

impl Stream for Subscription {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
