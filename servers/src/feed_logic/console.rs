use std::sync::Arc;

use lib_quakefeed::FeedController;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Logs feed state changes, connectivity transitions and alerts until a
/// shutdown signal arrives.
pub async fn run(controller: Arc<FeedController>, mut shutdown: broadcast::Receiver<()>) {
    let mut state = controller.subscribe();
    let mut transitions = controller.subscribe_transitions();
    let mut alerts = controller.subscribe_alerts();
    let mut last_newest: Option<String> = None;

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = state.borrow_and_update().clone();
                let newest = snapshot.working_set.newest().map(|e| e.id.clone());
                if newest != last_newest {
                    if let Some(event) = snapshot.working_set.newest() {
                        log::info!(
                            "Newest: M{} {} at {} ({} event(s) held)",
                            event.magnitude,
                            event.place,
                            event.occurred_at,
                            snapshot.working_set.len()
                        );
                    }
                    last_newest = newest;
                }
                if let Some(error) = &snapshot.last_error {
                    log::warn!("Last fetch failed: {}", error);
                }
            }
            transition = transitions.recv() => match transition {
                Ok(connectivity) => log::info!("Stream: {:?}", connectivity),
                Err(RecvError::Lagged(n)) => log::warn!("Missed {} connectivity transition(s)", n),
                Err(RecvError::Closed) => break,
            },
            alert = alerts.recv() => match alert {
                Ok(alert) => log::warn!("ALERT {}: {}", alert.title, alert.body),
                Err(RecvError::Lagged(n)) => log::warn!("Missed {} alert(s)", n),
                Err(RecvError::Closed) => break,
            },
        }
    }
    log::info!("Console follower stopped.");
}
