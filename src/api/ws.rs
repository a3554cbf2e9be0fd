use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use crate::api::AppState;
use crate::broadcast::{room_name, Published, Topic, WatchlistSubscription};
use crate::ingest::types::FilingRecord;

/// How many delivered corp_ids a connection remembers for at-most-once delivery.
const SEEN_CAPACITY: usize = 2_048;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientCommand {
    Join { room: String },
    Leave { room: String },
    Watch(WatchlistSubscription),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent<'a> {
    NewAnnouncement { data: &'a FilingRecord },
    Status { message: String, error: bool },
}

impl ServerEvent<'_> {
    fn status(message: impl Into<String>, error: bool) -> Self {
        ServerEvent::Status {
            message: message.into(),
            error,
        }
    }
}

/// Per-connection room membership and delivery memory.
#[derive(Debug)]
pub struct Session {
    rooms: HashSet<String>,
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            rooms: HashSet::from([Topic::All.to_string()]),
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }
}

impl Session {
    pub fn rooms(&self) -> &HashSet<String> {
        &self.rooms
    }

    /// Apply a client command, returning the status line to send back.
    pub fn apply(&mut self, cmd: ClientCommand) -> ServerEvent<'static> {
        match cmd {
            ClientCommand::Join { room } => match room_name(&room) {
                Some(r) => {
                    let msg = format!("joined {r}");
                    self.rooms.insert(r);
                    ServerEvent::status(msg, false)
                }
                None => ServerEvent::status("room name is empty", true),
            },
            ClientCommand::Leave { room } => match room_name(&room) {
                Some(r) if self.rooms.remove(&r) => ServerEvent::status(format!("left {r}"), false),
                Some(r) => ServerEvent::status(format!("not in {r}"), true),
                None => ServerEvent::status("room name is empty", true),
            },
            ClientCommand::Watch(list) => {
                let topics = list.topics();
                if topics.is_empty() {
                    return ServerEvent::status("watchlist is empty", true);
                }
                let n = topics.len();
                self.rooms.extend(topics.iter().map(ToString::to_string));
                ServerEvent::status(format!("watching {n} topics"), false)
            }
        }
    }

    /// The record to deliver for this publication, if the connection is in its room
    /// and has not received the same announcement through another room.
    pub fn accept(&mut self, msg: &Published) -> Option<Arc<FilingRecord>> {
        if !self.rooms.contains(&msg.topic) {
            return None;
        }
        let id = msg.record.corp_id.clone();
        if !self.seen.insert(id.clone()) {
            return None;
        }
        self.order.push_back(id);
        while self.order.len() > SEEN_CAPACITY {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        Some(msg.record.clone())
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_event(socket: &mut WebSocket, event: &ServerEvent<'_>) -> bool {
    match serde_json::to_string(event) {
        Ok(text) => socket.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "ws event not serializable");
            true
        }
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut rx = state.hub.subscribe();
    let mut session = Session::default();
    tracing::debug!(subscribers = state.hub.subscriber_count(), "ws client connected");

    if !send_event(&mut socket, &ServerEvent::status("connected", false)).await {
        return;
    }

    loop {
        tokio::select! {
            incoming = socket.next() => {
                let Some(Ok(msg)) = incoming else { break };
                match msg {
                    Message::Text(text) => {
                        let reply = match serde_json::from_str::<ClientCommand>(text.as_str()) {
                            Ok(cmd) => session.apply(cmd),
                            Err(e) => ServerEvent::status(format!("bad command: {e}"), true),
                        };
                        if !send_event(&mut socket, &reply).await {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            published = rx.recv() => match published {
                Ok(p) => {
                    if let Some(record) = session.accept(&p) {
                        let event = ServerEvent::NewAnnouncement { data: record.as_ref() };
                        if !send_event(&mut socket, &event).await {
                            break;
                        }
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "ws client lagging, publications dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
    tracing::debug!(rooms = session.rooms().len(), "ws client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn published(topic: &str, corp_id: &str) -> Published {
        Published {
            topic: topic.into(),
            record: Arc::new(FilingRecord {
                corp_id: corp_id.into(),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn parses_client_commands() {
        let join: ClientCommand = serde_json::from_str(r#"{"action":"join","room":"RELIANCE"}"#).unwrap();
        assert_eq!(join, ClientCommand::Join { room: "RELIANCE".into() });

        let watch: ClientCommand =
            serde_json::from_str(r#"{"action":"watch","isins":["INE002A01018"]}"#).unwrap();
        assert!(matches!(watch, ClientCommand::Watch(w) if w.isins.len() == 1 && w.categories.is_empty()));
    }

    #[test]
    fn delivers_once_across_matching_rooms() {
        let mut s = Session::default();
        s.apply(ClientCommand::Join { room: "INE002A01018".into() });

        assert!(s.accept(&published("all", "c1")).is_some());
        assert!(s.accept(&published("INE002A01018", "c1")).is_none());
        assert!(s.accept(&published("category:Buyback", "c2")).is_none());
        assert!(s.accept(&published("INE002A01018", "c2")).is_some());
    }

    #[test]
    fn leave_stops_delivery() {
        let mut s = Session::default();
        let reply = s.apply(ClientCommand::Leave { room: " all ".into() });
        assert!(matches!(reply, ServerEvent::Status { error: false, .. }));
        assert!(s.accept(&published("all", "c1")).is_none());

        let again = s.apply(ClientCommand::Leave { room: "all".into() });
        assert!(matches!(again, ServerEvent::Status { error: true, .. }));
    }

    #[test]
    fn status_events_serialize_with_tag() {
        let v = serde_json::to_value(ServerEvent::status("joined all", false)).unwrap();
        assert_eq!(v["event"], "status");
        assert_eq!(v["error"], false);
    }
}
