use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

// `user:<id>` topics carry Matched, `conv:<id>` topics carry the rest
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Matched {
        conversation_id: Uuid,
        partner_id: Uuid,
        shared_interest: Option<String>,
    },
    Message {
        id: Uuid,
        conversation_id: Uuid,
        sender_id: Option<Uuid>,
        content: String,
        created_at: i64,
    },
    Skipped {
        conversation_id: Uuid,
        by: Uuid,
    },
}

pub fn user_topic(id: Uuid) -> String {
    format!("user:{id}")
}

pub fn conv_topic(id: Uuid) -> String {
    format!("conv:{id}")
}

/// Topic-keyed broadcast. Senders stay in the map for the process lifetime
/// so a subscriber is never cut off mid-search.
#[derive(Default)]
pub struct Notifier {
    topics: Mutex<HashMap<String, broadcast::Sender<Event>>>,
}

impl Notifier {
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<Event> {
        let mut topics = self.topics.lock().unwrap();
        topics
            .entry(topic.to_owned())
            .or_insert_with(|| broadcast::channel(64).0)
            .subscribe()
    }

    pub fn publish(&self, topic: &str, event: Event) {
        let topics = self.topics.lock().unwrap();
        if let Some(tx) = topics.get(topic) {
            let _ = tx.send(event);
        }
    }
}
