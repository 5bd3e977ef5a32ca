//! Lifecycle notifications.
//!
//! Publishing is fire-and-forget: the market never waits for, or depends on,
//! a subscriber. Lagging or dropped receivers lose notifications, never
//! state.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::types::AccountId;

pub const DEFAULT_EVENT_CAPACITY: usize = 64;

pub type EventReceiver = broadcast::Receiver<MarketEvent>;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEvent {
    NewAsset {
        seller: AccountId,
        name: String,
        index: u64,
    },
    AssetWithdrawn {
        seller: AccountId,
        index: u64,
    },
    Upgraded {
        version: u32,
    },
}

#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<MarketEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Deliver `event` to current subscribers, returning how many saw it.
    pub fn publish(&self, event: MarketEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                trace!(?event, "no subscribers");
                0
            }
        }
    }
}

/// Collect every event already queued on `rx` without waiting.
pub fn drain(rx: &mut EventReceiver) -> Vec<MarketEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                trace!(skipped, "subscriber lagged");
            }
            Err(_) => return events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(MarketEvent::Upgraded { version: 2 }), 0);
    }

    #[test]
    fn every_subscriber_receives_events_in_order() {
        let bus = EventBus::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        bus.publish(MarketEvent::NewAsset {
            seller: "s".into(),
            name: "a".into(),
            index: 0,
        });
        assert_eq!(bus.publish(MarketEvent::Upgraded { version: 2 }), 2);

        for rx in [&mut first, &mut second] {
            assert!(matches!(
                rx.try_recv().unwrap(),
                MarketEvent::NewAsset { index: 0, .. }
            ));
            assert_eq!(rx.try_recv().unwrap(), MarketEvent::Upgraded { version: 2 });
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn drain_skips_over_lagged_events() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for version in 1..=3 {
            bus.publish(MarketEvent::Upgraded { version });
        }
        assert_eq!(
            drain(&mut rx),
            vec![
                MarketEvent::Upgraded { version: 2 },
                MarketEvent::Upgraded { version: 3 }
            ]
        );
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_string(&MarketEvent::AssetWithdrawn {
            seller: "s".into(),
            index: 4,
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"asset_withdrawn","seller":"s","index":4}"#);
    }
}
