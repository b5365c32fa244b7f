//! Waiting helpers for query tests

use cfdi_reporter::{Event, Folio, Query, Status};
use std::time::Duration;
use tokio::sync::broadcast;

/// Default time a query gets to settle
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Wait for `query` to finish or be marked for repetition
///
/// Panics if it does not settle within [`SETTLE_TIMEOUT`].
pub async fn wait_settled(query: &Query) -> Status {
    match tokio::time::timeout(SETTLE_TIMEOUT, query.wait_until_settled()).await {
        Ok(status) => status,
        Err(_) => panic!(
            "query {} did not settle within {:?} (status {})",
            query.folio(),
            SETTLE_TIMEOUT,
            query.status()
        ),
    }
}

/// Collect events until `predicate` matches one, or until `timeout`
pub async fn collect_events_until<F>(
    events: &mut broadcast::Receiver<Event>,
    timeout: Duration,
    mut predicate: F,
) -> Vec<Event>
where
    F: FnMut(&Event) -> bool,
{
    let mut collected = Vec::new();
    let _ = tokio::time::timeout(timeout, async {
        while let Ok(event) = events.recv().await {
            let done = predicate(&event);
            collected.push(event);
            if done {
                break;
            }
        }
    })
    .await;
    collected
}

/// Statuses reported for `folio`, in order
pub fn statuses_of(events: &[Event], folio: Folio) -> Vec<Status> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::StatusChanged { folio: f, status } if *f == folio => Some(*status),
            _ => None,
        })
        .collect()
}
