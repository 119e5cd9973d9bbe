//! Event fan-out to independent viewers
//!
//! The engine is the single writer. Control panels, public displays and phone
//! buzzers each hold their own subscription:
//!
//! - session and device events go through a bounded broadcast channel; a viewer
//!   that falls behind loses the oldest events and is told how many it missed,
//! - the latest device table lives in a watch channel so a late subscriber always
//!   starts from current state.

use futures::{Stream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tracing::{trace, warn};

use crate::arbitration::PressSummary;
use crate::error::Rejection;
use crate::registry::DeviceStatus;
use crate::stream::ThrottleExt;
use crate::types::{DeviceId, GroupId, UpdateRate};

/// Everything the engine tells the outside world.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    QuestionStarted {
        question_id: u64,
        started_at: SystemTime,
        time_limit_ms: u64,
        original_points: u64,
    },
    QuestionEnded {
        question_id: u64,
        presses_so_far: Vec<PressSummary>,
    },
    BuzzPressAccepted {
        group_id: GroupId,
        device_id: DeviceId,
        position: u32,
        delta_ms: u64,
    },
    /// First accepted press of the question
    FirstBuzz {
        group_id: GroupId,
        device_id: DeviceId,
    },
    PressRejected {
        device_id: DeviceId,
        reason: Rejection,
    },
    AnswerEvaluated {
        group_id: GroupId,
        is_correct: bool,
        points_awarded: u64,
        question_resolved: bool,
    },
    ScoreChanged {
        group_id: GroupId,
        total: u64,
    },
    /// No further evaluation will happen for this question
    QuestionResolved {
        question_id: u64,
        winner: Option<GroupId>,
    },
    /// Session discarded by a reset
    QuestionAborted {
        question_id: u64,
    },
    GameOver {
        scores: Vec<(GroupId, u64)>,
    },
    DeviceStatusChanged {
        device_id: DeviceId,
        online: bool,
        armed: bool,
        pressed: bool,
        battery_pct: Option<u8>,
    },
    DeviceAck {
        text: String,
    },
    DeviceError {
        text: String,
    },
}

impl Event {
    /// Device status event from a resolved registry view.
    pub fn device_status(status: &DeviceStatus) -> Self {
        Event::DeviceStatusChanged {
            device_id: status.device_id.clone(),
            online: status.online,
            armed: status.armed,
            pressed: status.pressed,
            battery_pct: status.battery_pct,
        }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Event::QuestionStarted { .. } => "question_started",
            Event::QuestionEnded { .. } => "question_ended",
            Event::BuzzPressAccepted { .. } => "buzz_press_accepted",
            Event::FirstBuzz { .. } => "first_buzz",
            Event::PressRejected { .. } => "press_rejected",
            Event::AnswerEvaluated { .. } => "answer_evaluated",
            Event::ScoreChanged { .. } => "score_changed",
            Event::QuestionResolved { .. } => "question_resolved",
            Event::QuestionAborted { .. } => "question_aborted",
            Event::GameOver { .. } => "game_over",
            Event::DeviceStatusChanged { .. } => "device_status_changed",
            Event::DeviceAck { .. } => "device_ack",
            Event::DeviceError { .. } => "device_error",
        }
    }
}

/// Device table shared with displays.
pub type DeviceTable = Arc<Vec<DeviceStatus>>;

/// Writer side of the fan-out, owned by the engine.
#[derive(Debug, Clone)]
pub struct EventGateway {
    events: broadcast::Sender<Event>,
    devices: watch::Sender<DeviceTable>,
}

impl EventGateway {
    /// Create a gateway whose event buffer holds `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        let (devices, _) = watch::channel(Arc::new(Vec::new()));
        Self { events, devices }
    }

    /// Publish one event. Having no subscribers is not an error.
    pub fn publish(&self, event: Event) {
        trace!(event = event.name(), "Publishing event");
        let _ = self.events.send(event);
    }

    /// Replace the device table if it differs from the current one.
    ///
    /// Returns whether subscribers were notified.
    pub fn publish_devices(&self, table: Vec<DeviceStatus>) -> bool {
        self.devices.send_if_modified(|current| {
            if current.as_slice() == table.as_slice() {
                false
            } else {
                *current = Arc::new(table);
                true
            }
        })
    }

    /// Raw broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Event stream that skips over gaps left by a slow consumer.
    pub fn events(&self) -> impl Stream<Item = Event> + Send + 'static {
        BroadcastStream::new(self.events.subscribe()).filter_map(|item| async move {
            match item {
                Ok(event) => Some(event),
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    warn!(missed, "Event subscriber lagged, skipping ahead");
                    None
                }
            }
        })
    }

    /// Current device table.
    pub fn devices(&self) -> DeviceTable {
        self.devices.borrow().clone()
    }

    /// Device table stream, starting with the current table.
    pub fn device_updates(&self, rate: UpdateRate) -> impl Stream<Item = DeviceTable> + Send + 'static {
        let tables = WatchStream::new(self.devices.subscribe());
        match rate.throttle_interval() {
            None => tables.boxed(),
            Some(period) => tables.throttle(period).boxed(),
        }
    }

    /// Number of live event subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::wall_clock;

    fn status(id: u8, online: bool) -> DeviceStatus {
        DeviceStatus {
            device_id: DeviceId::Hardware(id),
            online,
            display_online: online,
            armed: false,
            pressed: false,
            battery_pct: None,
            battery_volts: None,
            mac: None,
            last_seen_at: wall_clock(0),
            last_online_at: None,
        }
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let gateway = EventGateway::new(8);
        let mut panel = gateway.subscribe();
        let mut display = gateway.subscribe();

        gateway.publish(Event::DeviceAck { text: "OK".into() });

        assert_eq!(panel.recv().await.unwrap(), Event::DeviceAck { text: "OK".into() });
        assert_eq!(display.recv().await.unwrap(), Event::DeviceAck { text: "OK".into() });
    }

    #[tokio::test]
    async fn lagging_stream_skips_ahead() {
        let gateway = EventGateway::new(2);
        let mut events = Box::pin(gateway.events());

        for i in 0..5 {
            gateway.publish(Event::DeviceError { text: format!("e{i}") });
        }

        // Oldest events were overwritten; the stream resumes with what is left.
        assert_eq!(events.next().await, Some(Event::DeviceError { text: "e3".into() }));
        assert_eq!(events.next().await, Some(Event::DeviceError { text: "e4".into() }));
    }

    #[test]
    fn unchanged_device_table_is_not_republished() {
        let gateway = EventGateway::new(4);
        assert!(gateway.publish_devices(vec![status(1, true)]));
        assert!(!gateway.publish_devices(vec![status(1, true)]));
        assert!(gateway.publish_devices(vec![status(1, false)]));
        assert_eq!(gateway.devices().len(), 1);
    }

    #[tokio::test]
    async fn device_updates_start_from_current_table() {
        let gateway = EventGateway::new(4);
        gateway.publish_devices(vec![status(2, true)]);

        let mut updates = Box::pin(gateway.device_updates(UpdateRate::Immediate));
        let first = updates.next().await.unwrap();
        assert_eq!(first[0].device_id, DeviceId::Hardware(2));
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = Event::ScoreChanged { group_id: GroupId::Team(2), total: 80 };
        let yaml = serde_yaml_ng::to_string(&event).unwrap();
        assert!(yaml.contains("type: score_changed"));
        assert!(yaml.contains("total: 80"));
    }
}
