//! In-process transport: a live client attached directly to a hub.

use std::sync::Arc;

use async_trait::async_trait;

use super::client::{LiveTransport, TransportError};
use crate::hub::{CatalogVersion, EndpointHub};
use crate::notify::{LiveMessage, Subscription};

/// Subscribes to the hub's notifier and polls its version.
pub struct HubTransport {
    hub: Arc<EndpointHub>,
    subscription: Option<Subscription>,
}

impl HubTransport {
    pub fn new(hub: Arc<EndpointHub>) -> Self {
        Self {
            hub,
            subscription: None,
        }
    }
}

#[async_trait]
impl LiveTransport for HubTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if let Some(old) = self.subscription.take() {
            self.hub.notifier().unsubscribe(&old.id);
        }
        self.subscription = Some(self.hub.subscribe());
        Ok(())
    }

    async fn next_message(&mut self) -> Option<LiveMessage> {
        match self.subscription.as_mut() {
            Some(subscription) => subscription.receiver.recv().await,
            None => None,
        }
    }

    async fn poll(&mut self) -> Result<CatalogVersion, TransportError> {
        self.hub
            .catalog_version()
            .await
            .map_err(|e| TransportError::Poll(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::{mpsc, watch};

    use super::*;
    use crate::hub::test_support::test_hub;
    use crate::live::client::{run_client, BackoffPolicy, ClientEvent, ConnectionState};
    use crate::notify::ChangeKind;
    use crate::reload::TriggerOrigin;

    #[tokio::test]
    async fn test_client_receives_sync_events() {
        let (_dir, hub) = test_hub();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let driver = tokio::spawn(run_client(
            HubTransport::new(Arc::clone(&hub)),
            BackoffPolicy::default(),
            cancel_rx,
            events_tx,
        ));

        loop {
            if events_rx.recv().await.unwrap() == ClientEvent::State(ConnectionState::Connected) {
                break;
            }
        }
        hub.trigger(TriggerOrigin::Manual).await;

        let event = tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            ClientEvent::Message(LiveMessage::Change(change)) => {
                assert!(matches!(change.kind, ChangeKind::SyncCompleted { .. }))
            }
            other => panic!("unexpected event: {:?}", other),
        }

        cancel_tx.send(true).unwrap();
        driver.await.unwrap();
    }
}
