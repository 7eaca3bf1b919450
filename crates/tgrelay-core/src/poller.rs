//! Long-polling loop over `getUpdates`.

use std::sync::Arc;
use std::time::Duration;

use tgrelay_channels::ChatTransport;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::router::CommandRouter;

/// Server-side long-poll timeout passed to `getUpdates`.
pub const POLL_TIMEOUT_SECS: u64 = 50;
/// Pause after a failed `getUpdates` before retrying with the same offset.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(2);

pub struct Poller {
    transport: Arc<dyn ChatTransport>,
    router: CommandRouter,
    offset: i64,
    poll_timeout_secs: u64,
    backoff: Duration,
}

impl Poller {
    pub fn new(transport: Arc<dyn ChatTransport>, router: CommandRouter) -> Self {
        Self {
            transport,
            router,
            offset: 0,
            poll_timeout_secs: POLL_TIMEOUT_SECS,
            backoff: ERROR_BACKOFF,
        }
    }

    pub fn with_timing(mut self, poll_timeout_secs: u64, backoff: Duration) -> Self {
        self.poll_timeout_secs = poll_timeout_secs;
        self.backoff = backoff;
        self
    }

    /// Poll until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// Shutdown is checked between polls. A long poll already in flight is
    /// left to finish (bounded by the poll timeout) and its batch is
    /// dispatched; only the error backoff is cut short.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("telegram polling started");

        while !stop_requested(&shutdown) {
            let result = self
                .transport
                .get_updates(self.offset, self.poll_timeout_secs)
                .await;

            match result {
                Ok(mut updates) => {
                    // Acknowledge the whole batch before handling any of it.
                    if let Some(max) = updates.iter().map(|u| u.update_id).max() {
                        self.offset = self.offset.max(max + 1);
                    }
                    updates.sort_by_key(|u| u.update_id);

                    for update in &updates {
                        if let Err(err) = self.router.handle_update(update).await {
                            warn!(update_id = update.update_id, "failed to handle update: {err}");
                        }
                    }
                }
                Err(err) => {
                    warn!("polling error: {err}");
                    tokio::select! {
                        _ = tokio::time::sleep(self.backoff) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        info!(offset = self.offset, "telegram polling stopped");
    }
}

fn stop_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgrelay_channels::{Chat, Message, Update, User};

    use crate::config::BridgeConfig;
    use crate::context::BridgeContext;
    use crate::testing::{FakeTmux, RecordingTransport};

    fn text_update(update_id: i64, text: &str) -> Update {
        Update {
            update_id,
            message: Some(Message {
                message_id: update_id,
                from: Some(User {
                    id: 1,
                    first_name: "Ann".into(),
                    username: None,
                }),
                chat: Chat {
                    id: 10,
                    chat_type: None,
                },
                text: Some(text.to_string()),
            }),
            callback_query: None,
        }
    }

    fn setup() -> (Poller, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let config = BridgeConfig {
            chat_id: 10,
            ..BridgeConfig::default()
        };
        let ctx = Arc::new(BridgeContext::new(
            config,
            None,
            transport.clone(),
            Arc::new(FakeTmux::default()),
        ));
        let poller = Poller::new(transport.clone(), CommandRouter::new(ctx))
            .with_timing(0, Duration::from_millis(10));
        (poller, transport)
    }

    async fn wait_for_polls(transport: &RecordingTransport, n: usize) {
        for _ in 0..200 {
            if transport.offsets().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("poller never reached {n} polls");
    }

    #[tokio::test]
    async fn offset_advances_past_whole_batch_and_dispatches_in_order() {
        let (poller, transport) = setup();
        transport.push_updates(vec![text_update(8, "/nope2"), text_update(7, "/nope1")]);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(poller.run(rx));
        wait_for_polls(&transport, 2).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let offsets = transport.offsets();
        assert_eq!(offsets[0], 0);
        assert_eq!(offsets[1], 9);
        let texts = transport.sent_texts();
        assert!(texts[0].starts_with("Unknown command: /nope1"));
        assert!(texts[1].starts_with("Unknown command: /nope2"));
    }

    #[tokio::test]
    async fn transport_error_retries_with_same_offset() {
        let (poller, transport) = setup();
        transport.push_updates(vec![text_update(3, "/help")]);
        transport.push_poll_error("Bad Gateway");

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(poller.run(rx));
        wait_for_polls(&transport, 3).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(&transport.offsets()[..3], &[0, 4, 4]);
    }

    #[tokio::test]
    async fn handler_failure_does_not_stop_the_loop() {
        let (poller, transport) = setup();
        transport.fail_sends(true);
        transport.push_updates(vec![text_update(1, "/help"), text_update(2, "/help")]);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(poller.run(rx));
        wait_for_polls(&transport, 2).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(transport.offsets()[1], 3);
    }

    #[tokio::test]
    async fn shutdown_lets_in_flight_poll_finish() {
        let (poller, transport) = setup();
        transport.set_poll_delay(Duration::from_millis(100));
        transport.push_updates(vec![text_update(5, "/late")]);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(poller.run(rx));
        wait_for_polls(&transport, 1).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(transport.offsets(), vec![0]);
        assert!(transport.sent_texts()[0].starts_with("Unknown command: /late"));
    }

    #[tokio::test]
    async fn dropped_sender_stops_the_loop() {
        let (poller, _transport) = setup();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(poller.run(rx));
        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("poller should stop")
            .unwrap();
    }
}
