//! Subscription Fan-out (spec §4.11): WebSocket sessions subscribe to a
//! connection's schema events; delivery is best-effort.
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use actix::{Actor, ActorContext, AsyncContext, Handler, Message, StreamHandler};
use actix_web_actors::ws;
use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

use crate::models::SchemaChange;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "topic", rename_all = "snake_case")]
pub enum Topic {
    #[serde(rename = "schema:change")]
    SchemaChange { change: SchemaChange },
    #[serde(rename = "schema:discovered")]
    SchemaDiscovered { connection_id: Uuid, version_hash: String },
    #[serde(rename = "schema:cache_invalidated")]
    SchemaCacheInvalidated { connection_id: Uuid },
    #[serde(rename = "server:shutdown")]
    ServerShutdown,
}

#[derive(Message, Clone)]
#[rtype(result = "()")]
struct Envelope(String);

/// Bidirectional session↔connection index so a connection-level publish can
/// reach every subscribed session, and a session close can clean up its
/// subscriptions without a linear scan (§4.11).
#[derive(Default)]
struct Index {
    session_to_connections: HashMap<Uuid, HashSet<Uuid>>,
    connection_to_sessions: HashMap<Uuid, HashSet<Uuid>>,
    session_addr: HashMap<Uuid, actix::Addr<SchemaSession>>,
}

pub struct Fanout {
    index: RwLock<Index>,
}

impl Default for Fanout {
    fn default() -> Self {
        Fanout { index: RwLock::new(Index::default()) }
    }
}

impl Fanout {
    pub fn new() -> Self {
        Fanout::default()
    }

    fn register(&self, session: Uuid, addr: actix::Addr<SchemaSession>) {
        self.index.write().session_addr.insert(session, addr);
    }

    fn deregister(&self, session: Uuid) {
        let mut index = self.index.write();
        index.session_addr.remove(&session);
        if let Some(connections) = index.session_to_connections.remove(&session) {
            for connection_id in connections {
                if let Some(sessions) = index.connection_to_sessions.get_mut(&connection_id) {
                    sessions.remove(&session);
                }
            }
        }
    }

    pub fn subscribe(&self, session: Uuid, connection_id: Uuid) {
        let mut index = self.index.write();
        index.session_to_connections.entry(session).or_default().insert(connection_id);
        index.connection_to_sessions.entry(connection_id).or_default().insert(session);
    }

    pub fn unsubscribe(&self, session: Uuid, connection_id: Uuid) {
        let mut index = self.index.write();
        if let Some(connections) = index.session_to_connections.get_mut(&session) {
            connections.remove(&connection_id);
        }
        if let Some(sessions) = index.connection_to_sessions.get_mut(&connection_id) {
            sessions.remove(&session);
        }
    }

    fn deliver_to_connection(&self, connection_id: Uuid, topic: &Topic) {
        let payload = match serde_json::to_string(topic) {
            Ok(p) => p,
            Err(_) => return,
        };
        let index = self.index.read();
        if let Some(sessions) = index.connection_to_sessions.get(&connection_id) {
            for session in sessions {
                if let Some(addr) = index.session_addr.get(session) {
                    addr.do_send(Envelope(payload.clone()));
                }
            }
        }
    }

    pub async fn publish_change(&self, change: &SchemaChange) {
        self.deliver_to_connection(change.connection_id, &Topic::SchemaChange { change: change.clone() });
    }

    pub async fn publish_discovered(&self, connection_id: Uuid, version_hash: &str) {
        self.deliver_to_connection(
            connection_id,
            &Topic::SchemaDiscovered { connection_id, version_hash: version_hash.to_string() },
        );
    }

    pub async fn publish_cache_invalidated(&self, connection_id: Uuid) {
        self.deliver_to_connection(connection_id, &Topic::SchemaCacheInvalidated { connection_id });
    }

    /// Broadcasts to every connected session regardless of subscriptions,
    /// used only on graceful shutdown (§4.11).
    pub fn broadcast_shutdown(&self) {
        let payload = match serde_json::to_string(&Topic::ServerShutdown) {
            Ok(p) => p,
            Err(_) => return,
        };
        let index = self.index.read();
        for addr in index.session_addr.values() {
            addr.do_send(Envelope(payload.clone()));
        }
    }
}

pub struct SchemaSession {
    id: Uuid,
    fanout: std::sync::Arc<Fanout>,
    last_heartbeat: Instant,
}

impl SchemaSession {
    pub fn new(fanout: std::sync::Arc<Fanout>) -> Self {
        SchemaSession { id: Uuid::new_v4(), fanout, last_heartbeat: Instant::now() }
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for SchemaSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.heartbeat(ctx);
        self.fanout.register(self.id, ctx.address());
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.fanout.deregister(self.id);
    }
}

impl Handler<Envelope> for SchemaSession {
    type Result = ();

    fn handle(&mut self, msg: Envelope, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_populates_both_sides_of_the_index() {
        let fanout = Fanout::new();
        let session = Uuid::new_v4();
        let connection = Uuid::new_v4();
        fanout.subscribe(session, connection);
        let index = fanout.index.read();
        assert!(index.session_to_connections[&session].contains(&connection));
        assert!(index.connection_to_sessions[&connection].contains(&session));
    }

    #[test]
    fn unsubscribe_removes_both_sides_without_dropping_other_subscriptions() {
        let fanout = Fanout::new();
        let session = Uuid::new_v4();
        let c1 = Uuid::new_v4();
        let c2 = Uuid::new_v4();
        fanout.subscribe(session, c1);
        fanout.subscribe(session, c2);
        fanout.unsubscribe(session, c1);
        let index = fanout.index.read();
        assert!(!index.session_to_connections[&session].contains(&c1));
        assert!(index.session_to_connections[&session].contains(&c2));
        assert!(!index.connection_to_sessions.contains_key(&c1));
    }

    #[test]
    fn deregister_clears_session_from_every_connection_room() {
        let fanout = Fanout::new();
        let session = Uuid::new_v4();
        let connection = Uuid::new_v4();
        fanout.subscribe(session, connection);
        fanout.deregister(session);
        let index = fanout.index.read();
        assert!(!index.session_to_connections.contains_key(&session));
        assert!(index.connection_to_sessions[&connection].is_empty());
    }
}

#[derive(serde::Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClientCommand {
    Subscribe { connection_id: Uuid },
    Unsubscribe { connection_id: Uuid },
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for SchemaSession {
    fn handle(&mut self, item: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match item {
            Ok(ws::Message::Ping(msg)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                if let Ok(cmd) = serde_json::from_str::<ClientCommand>(&text) {
                    match cmd {
                        ClientCommand::Subscribe { connection_id } => self.fanout.subscribe(self.id, connection_id),
                        ClientCommand::Unsubscribe { connection_id } => self.fanout.unsubscribe(self.id, connection_id),
                    }
                }
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(_) => ctx.stop(),
            _ => {}
        }
    }
}
