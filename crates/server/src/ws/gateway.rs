//! Live event hub.
//!
//! One coordinator task owns the registry of connected clients. Everything
//! else talks to it through a [`GatewayHandle`], which only sends commands.
//! Each client has a bounded outbound queue; a client whose queue is full is
//! evicted instead of slowing the hub down.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;

use crate::ws::events::ServerEvent;

pub type ClientId = u64;

enum Command {
    Register {
        client_id: ClientId,
        user_id: String,
        tx: mpsc::Sender<String>,
    },
    Unregister {
        client_id: ClientId,
        user_id: String,
        reply: oneshot::Sender<bool>,
    },
    Publish {
        user_ids: Vec<String>,
        payload: String,
        exclude: Option<ClientId>,
    },
    SendTo {
        client_id: ClientId,
        payload: String,
    },
    OnlineUsers {
        reply: oneshot::Sender<Vec<String>>,
    },
}

struct ConnectedClient {
    user_id: String,
    tx: mpsc::Sender<String>,
}

#[derive(Default)]
struct Hub {
    clients: HashMap<ClientId, ConnectedClient>,
    by_user: HashMap<String, HashSet<ClientId>>,
}

impl Hub {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(cmd) = commands.recv().await {
            self.process(cmd);
        }
        tracing::info!("Gateway hub stopped");
    }

    fn process(&mut self, cmd: Command) {
        match cmd {
            Command::Register {
                client_id,
                user_id,
                tx,
            } => {
                self.by_user
                    .entry(user_id.clone())
                    .or_default()
                    .insert(client_id);
                self.clients
                    .insert(client_id, ConnectedClient { user_id, tx });
            }
            Command::Unregister {
                client_id,
                user_id,
                reply,
            } => {
                // The client may already be gone if it was evicted
                self.remove(client_id);
                let _ = reply.send(self.by_user.contains_key(&user_id));
            }
            Command::Publish {
                user_ids,
                payload,
                exclude,
            } => {
                let targets: Vec<ClientId> = user_ids
                    .iter()
                    .filter_map(|u| self.by_user.get(u))
                    .flatten()
                    .copied()
                    .filter(|cid| Some(*cid) != exclude)
                    .collect();
                for cid in targets {
                    self.deliver(cid, payload.clone());
                }
            }
            Command::SendTo { client_id, payload } => {
                self.deliver(client_id, payload);
            }
            Command::OnlineUsers { reply } => {
                let _ = reply.send(self.by_user.keys().cloned().collect());
            }
        }
    }

    fn deliver(&mut self, client_id: ClientId, payload: String) {
        let Some(client) = self.clients.get(&client_id) else {
            return;
        };
        match client.tx.try_send(payload) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    client_id,
                    user_id = %client.user_id,
                    "Client send queue full, evicting"
                );
                self.remove(client_id);
            }
            Err(TrySendError::Closed(_)) => {
                self.remove(client_id);
            }
        }
    }

    /// Drop a client and its queue. Returns the user it belonged to.
    fn remove(&mut self, client_id: ClientId) -> Option<String> {
        let client = self.clients.remove(&client_id)?;
        if let Some(set) = self.by_user.get_mut(&client.user_id) {
            set.remove(&client_id);
            if set.is_empty() {
                self.by_user.remove(&client.user_id);
            }
        }
        Some(client.user_id)
    }
}

/// Cheap, cloneable access to the hub.
#[derive(Clone)]
pub struct GatewayHandle {
    commands: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
}

impl GatewayHandle {
    /// Start the hub coordinator. It stops once every handle is dropped.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(Hub::default().run(rx));
        Self {
            commands: tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn next_client_id(&self) -> ClientId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register(&self, client_id: ClientId, user_id: String, tx: mpsc::Sender<String>) {
        self.send(Command::Register {
            client_id,
            user_id,
            tx,
        });
    }

    /// Remove a client. Returns whether `user_id` still has another
    /// connection open.
    pub async fn unregister(&self, client_id: ClientId, user_id: &str) -> bool {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Unregister {
            client_id,
            user_id: user_id.to_string(),
            reply,
        });
        rx.await.unwrap_or(false)
    }

    /// Deliver `event` to every connection of the given users.
    pub fn publish(&self, user_ids: &[String], event: &ServerEvent, exclude: Option<ClientId>) {
        let Some(payload) = encode(event) else {
            return;
        };
        self.send(Command::Publish {
            user_ids: user_ids.to_vec(),
            payload,
            exclude,
        });
    }

    pub fn send_to(&self, client_id: ClientId, event: &ServerEvent) {
        let Some(payload) = encode(event) else {
            return;
        };
        self.send(Command::SendTo { client_id, payload });
    }

    pub async fn online_users(&self) -> Vec<String> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::OnlineUsers { reply });
        rx.await.unwrap_or_default()
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.online_users().await.iter().any(|u| u == user_id)
    }

    fn send(&self, cmd: Command) {
        if self.commands.send(cmd).is_err() {
            tracing::warn!("Gateway hub is not running");
        }
    }
}

fn encode(event: &ServerEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(payload) => Some(payload),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode server event");
            None
        }
    }
}
