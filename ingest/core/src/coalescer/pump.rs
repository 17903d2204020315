//! Async driver for [`EventCoalescer`]

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{CoalescerStats, EventCoalescer};
use crate::push::PushEvent;

/// Feed `events` through `coalescer`, sending each batch on `batches`
///
/// Runs until the input closes (remaining events are drained and sent) or
/// the batch receiver is dropped. Returns the final counters.
pub async fn run_coalescer(
    mut events: mpsc::UnboundedReceiver<PushEvent>,
    mut coalescer: EventCoalescer,
    batches: mpsc::Sender<Vec<PushEvent>>,
) -> CoalescerStats {
    loop {
        let deadline = coalescer.next_deadline();

        // Deadline first so a busy input cannot starve the flush
        let batch = tokio::select! {
            biased;
            () = sleep_until(deadline) => coalescer.poll_due(Instant::now()),
            event = events.recv() => match event {
                Some(event) => coalescer.add(event),
                None => break,
            },
        };

        if let Some(batch) = batch {
            if batches.send(batch).await.is_err() {
                tracing::debug!("Batch receiver dropped, stopping coalescer");
                return coalescer.stats();
            }
        }
    }

    let rest = coalescer.drain();
    if !rest.is_empty() && batches.send(rest).await.is_err() {
        tracing::debug!("Batch receiver dropped before final drain");
    }

    let stats = coalescer.stats();
    tracing::debug!(
        received = stats.received,
        superseded = stats.superseded,
        batches = stats.flushed_batches,
        "Coalescer stopped"
    );
    stats
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn status(session: &str, value: &str) -> PushEvent {
        PushEvent::new(
            "c",
            "session.status",
            json!({"sessionId": session, "status": value}),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_becomes_one_batch() {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (batches_tx, mut batches_rx) = mpsc::channel(8);
        let coalescer = EventCoalescer::new(Duration::from_millis(50), 100);
        let pump = tokio::spawn(run_coalescer(events_rx, coalescer, batches_tx));

        // Opening event goes out immediately (idle window)
        events_tx.send(status("s1", "idle")).unwrap();
        let first = batches_rx.recv().await.unwrap();
        assert_eq!(first.len(), 1);

        for value in ["busy", "busy", "retry", "busy"] {
            events_tx.send(status("s1", value)).unwrap();
        }
        events_tx
            .send(PushEvent::new("c", "file.edited", json!({})))
            .unwrap();

        let second = batches_rx.recv().await.unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].property_str(&["status"]), Some("busy"));
        assert_eq!(second[1].event_type, "file.edited");

        drop(events_tx);
        let stats = pump.await.unwrap();
        assert_eq!(stats.received, 6);
        assert_eq!(stats.superseded, 3);
        assert_eq!(stats.flushed_events, 3);
        assert!(batches_rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_drains_pending_events() {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (batches_tx, mut batches_rx) = mpsc::channel(8);
        let coalescer = EventCoalescer::new(Duration::from_secs(10), 100);

        events_tx.send(status("s1", "a")).unwrap();
        events_tx.send(status("s2", "b")).unwrap();
        drop(events_tx);

        let stats = run_coalescer(events_rx, coalescer, batches_tx).await;
        let mut delivered = 0;
        while let Some(batch) = batches_rx.recv().await {
            delivered += batch.len();
        }
        assert_eq!(delivered, 2);
        assert_eq!(stats.flushed_events, 2);
    }
}
