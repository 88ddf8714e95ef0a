//! The chat room: membership, dispatch and broadcast
//!
//! All clients live in one map behind an `RwLock`. Every critical section is
//! short: sends are `try_send` into bounded per-client queues, so nothing
//! under the lock ever waits on a socket. A client whose queue is full is
//! considered dead and dropped on the spot.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;

use super::client::{ChatClient, ChatSession, Role};
use super::command::{help_text, ChatCommand};
use super::config::ChatConfig;
use super::emotes::{escape_html, Emotes};
use super::error::ChatError;
use super::message::{now_millis, ChatEvent};
use crate::settings::Settings;
use crate::stats::StreamStats;

const NAME_MIN: usize = 3;
const NAME_MAX: usize = 36;

#[derive(Default)]
struct RoomState {
    clients: HashMap<u64, ChatClient>,
    now_playing: Option<String>,
    closed: bool,
}

impl RoomState {
    fn find_by_name(&self, name: &str) -> Option<u64> {
        self.clients
            .iter()
            .find(|(_, c)| c.name.eq_ignore_ascii_case(name))
            .map(|(id, _)| *id)
    }

    fn user_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.values().map(|c| c.name.clone()).collect();
        names.sort_unstable_by_key(|n| n.to_ascii_lowercase());
        names
    }

    /// Offer `event` to every client except `skip`; returns how many took it
    ///
    /// Clients that cannot take it are removed and announced as left.
    fn deliver(&mut self, event: &ChatEvent, skip: Option<u64>) -> u64 {
        let (delivered, dead) = self.offer(event, skip);
        delivered + self.drop_clients(dead)
    }

    fn offer(&self, event: &ChatEvent, skip: Option<u64>) -> (u64, Vec<u64>) {
        let mut delivered = 0;
        let mut dead = Vec::new();

        for (id, client) in &self.clients {
            if Some(*id) == skip {
                continue;
            }
            match client.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(client_id = id, name = %client.name, "Dropping unresponsive chat client");
                    dead.push(*id);
                }
                Err(TrySendError::Closed(_)) => dead.push(*id),
            }
        }
        (delivered, dead)
    }

    /// Remove `dead` clients and tell everyone else they left
    ///
    /// A `Left` notice can overflow another queue, so removals repeat until
    /// no one else falls off.
    fn drop_clients(&mut self, dead: Vec<u64>) -> u64 {
        let mut delivered = 0;
        let mut gone: Vec<String> = dead
            .into_iter()
            .filter_map(|id| self.clients.remove(&id))
            .map(|client| client.name)
            .collect();

        while let Some(name) = gone.pop() {
            let (n, dead) = self.offer(&ChatEvent::Left { name, at: now_millis() }, None);
            delivered += n;
            gone.extend(
                dead.into_iter()
                    .filter_map(|id| self.clients.remove(&id))
                    .map(|client| client.name),
            );
        }
        delivered
    }

    fn send_to(&mut self, id: u64, event: ChatEvent) -> u64 {
        let Some(client) = self.clients.get(&id) else {
            return 0;
        };
        match client.tx.try_send(event) {
            Ok(()) => 1,
            Err(_) => self.drop_clients(vec![id]),
        }
    }
}

/// Validate a display name: 3 to 36 of `[A-Za-z0-9_-]`
pub fn validate_name(name: &str) -> Result<(), ChatError> {
    let valid_len = (NAME_MIN..=NAME_MAX).contains(&name.len());
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid_len && valid_chars {
        Ok(())
    } else {
        Err(ChatError::InvalidName(name.to_string()))
    }
}

pub struct ChatRoom {
    state: RwLock<RoomState>,
    config: ChatConfig,
    admin_password: String,
    emotes: Emotes,
    stats: Arc<StreamStats>,
    next_id: AtomicU64,
}

impl ChatRoom {
    /// Create the room, loading emotes from the settings' emote directory
    pub fn new(
        config: ChatConfig,
        settings: &Settings,
        stats: Arc<StreamStats>,
    ) -> Result<Self, ChatError> {
        let emotes = Emotes::load(&settings.emotes_dir).map_err(|source| ChatError::Init {
            path: settings.emotes_dir.clone(),
            source,
        })?;
        Ok(Self::with_emotes(
            config,
            settings.admin_password.clone(),
            emotes,
            stats,
        ))
    }

    pub fn with_emotes(
        config: ChatConfig,
        admin_password: String,
        emotes: Emotes,
        stats: Arc<StreamStats>,
    ) -> Self {
        Self {
            state: RwLock::new(RoomState::default()),
            config,
            admin_password,
            emotes,
            stats,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn emotes(&self) -> &Emotes {
        &self.emotes
    }

    /// Add a client under `requested_name`
    pub async fn join(&self, peer: SocketAddr, requested_name: &str) -> Result<ChatSession, ChatError> {
        let name = requested_name.trim();

        let mut state = self.state.write().await;
        if state.closed {
            return Err(ChatError::RoomClosed);
        }
        validate_name(name)?;
        if state.find_by_name(name).is_some() {
            return Err(ChatError::NameTaken(name.to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.config.client_queue_capacity);
        let role = Role::User;

        let at = now_millis();
        let mut delivered = state.deliver(
            &ChatEvent::Joined {
                name: name.to_string(),
                at,
            },
            None,
        );

        state.clients.insert(
            id,
            ChatClient {
                name: name.to_string(),
                role,
                peer,
                joined_at: Instant::now(),
                tx,
            },
        );
        let welcome = ChatEvent::Welcome {
            name: name.to_string(),
            role,
            users: state.user_names(),
            now_playing: state.now_playing.clone(),
        };
        delivered += state.send_to(id, welcome);
        let users = state.clients.len() as u64;
        drop(state);

        self.stats.record_chat_out(delivered);
        self.stats.record_chat_users(users);
        tracing::info!(client_id = id, name = name, peer = %peer, users = users, "Chat client joined");

        Ok(ChatSession::new(id, name.to_string(), role, rx))
    }

    /// Remove a client; unknown ids (already kicked, room shut down) are ignored
    pub async fn leave(&self, client_id: u64) {
        let mut state = self.state.write().await;
        let Some(client) = state.clients.remove(&client_id) else {
            return;
        };

        let delivered = state.deliver(
            &ChatEvent::Left {
                name: client.name.clone(),
                at: now_millis(),
            },
            None,
        );
        let users = state.clients.len() as u64;
        drop(state);

        self.stats.record_chat_out(delivered);
        self.stats.record_chat_users(users);
        tracing::info!(
            client_id = client_id,
            name = %client.name,
            peer = %client.peer,
            connected_secs = client.joined_at.elapsed().as_secs(),
            "Chat client left"
        );
    }

    /// Send an event to every joined client
    pub async fn broadcast(&self, event: ChatEvent) -> u64 {
        let mut state = self.state.write().await;
        let delivered = state.deliver(&event, None);
        let users = state.clients.len() as u64;
        drop(state);

        self.stats.record_chat_out(delivered);
        self.stats.record_chat_users(users);
        delivered
    }

    async fn reply(&self, client_id: u64, event: ChatEvent) {
        let mut state = self.state.write().await;
        let delivered = state.send_to(client_id, event);
        let users = state.clients.len() as u64;
        drop(state);

        self.stats.record_chat_out(delivered);
        self.stats.record_chat_users(users);
    }

    async fn reply_error(&self, client_id: u64, err: &ChatError) {
        self.reply(
            client_id,
            ChatEvent::Error {
                text: escape_html(&err.to_string()),
            },
        )
        .await;
    }

    /// Handle one line of text from a client
    ///
    /// Errors have already been reported privately to the sender when this
    /// returns.
    pub async fn dispatch(&self, client_id: u64, raw_text: &str) -> Result<(), ChatError> {
        let text = raw_text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let (name, role) = {
            let state = self.state.read().await;
            if state.closed {
                return Err(ChatError::RoomClosed);
            }
            let client = state
                .clients
                .get(&client_id)
                .ok_or_else(|| ChatError::UnknownUser(format!("#{client_id}")))?;
            (client.name.clone(), client.role)
        };
        self.stats.record_chat_in();

        let max = self.config.max_message_length;
        let result = if text.chars().count() > max {
            Err(ChatError::MessageTooLong { max })
        } else if text.starts_with('/') {
            match ChatCommand::parse(text) {
                Ok(cmd) if role < cmd.required_role() => {
                    Err(ChatError::Permission(cmd.name().to_string()))
                }
                Ok(cmd) => self.run_command(client_id, &name, role, cmd).await,
                Err(e) => Err(e),
            }
        } else {
            self.broadcast(ChatEvent::Message {
                from: name,
                text: self.emotes.render(text),
                at: now_millis(),
            })
            .await;
            Ok(())
        };

        if let Err(e) = &result {
            tracing::debug!(client_id = client_id, error = %e, "Chat message rejected");
            self.reply_error(client_id, e).await;
        }
        result
    }

    async fn run_command(
        &self,
        client_id: u64,
        name: &str,
        role: Role,
        cmd: ChatCommand,
    ) -> Result<(), ChatError> {
        match cmd {
            ChatCommand::Me(action) => {
                self.broadcast(ChatEvent::Action {
                    from: name.to_string(),
                    text: self.emotes.render(&action),
                    at: now_millis(),
                })
                .await;
            }
            ChatCommand::Help => {
                self.reply(client_id, ChatEvent::Reply { text: help_text(role) })
                    .await;
            }
            ChatCommand::Users => {
                let users = self.users().await.join(", ");
                self.reply(
                    client_id,
                    ChatEvent::Reply {
                        text: format!("Users: {users}"),
                    },
                )
                .await;
            }
            ChatCommand::Nick(new_name) => self.rename(client_id, &new_name).await?,
            ChatCommand::Auth(password) => self.authenticate(client_id, name, &password).await?,
            ChatCommand::Announce(text) => {
                self.broadcast(ChatEvent::Announcement {
                    from: name.to_string(),
                    text: escape_html(&text),
                    at: now_millis(),
                })
                .await;
            }
            ChatCommand::Playing(title) => {
                let title = title.map(|t| escape_html(&t));
                self.state.write().await.now_playing = title.clone();
                tracing::info!(by = name, title = ?title, "Now playing changed");
                self.broadcast(ChatEvent::NowPlaying {
                    title,
                    at: now_millis(),
                })
                .await;
            }
            ChatCommand::Kick(target) => self.kick(name, role, &target).await?,
            ChatCommand::Mod(target) => self.set_role(name, &target, Role::Moderator).await?,
            ChatCommand::Unmod(target) => self.set_role(name, &target, Role::User).await?,
        }
        Ok(())
    }

    async fn rename(&self, client_id: u64, new_name: &str) -> Result<(), ChatError> {
        validate_name(new_name)?;

        let mut state = self.state.write().await;
        if let Some(other) = state.find_by_name(new_name) {
            if other != client_id {
                return Err(ChatError::NameTaken(new_name.to_string()));
            }
        }
        let Some(client) = state.clients.get_mut(&client_id) else {
            return Err(ChatError::RoomClosed);
        };
        let old = std::mem::replace(&mut client.name, new_name.to_string());
        let delivered = state.deliver(
            &ChatEvent::Renamed {
                old: old.clone(),
                new: new_name.to_string(),
                at: now_millis(),
            },
            None,
        );
        let users = state.clients.len() as u64;
        drop(state);

        self.stats.record_chat_out(delivered);
        self.stats.record_chat_users(users);
        tracing::info!(client_id = client_id, old = %old, new = new_name, "Chat client renamed");
        Ok(())
    }

    async fn authenticate(&self, client_id: u64, name: &str, password: &str) -> Result<(), ChatError> {
        if self.admin_password.is_empty() || password != self.admin_password {
            tracing::warn!(client_id = client_id, name = name, "Failed admin authentication");
            return Err(ChatError::Permission("auth".into()));
        }

        let mut state = self.state.write().await;
        if let Some(client) = state.clients.get_mut(&client_id) {
            client.role = Role::Admin;
        }
        let delivered = state.send_to(
            client_id,
            ChatEvent::Reply {
                text: "You are now an admin".into(),
            },
        );
        let users = state.clients.len() as u64;
        drop(state);

        self.stats.record_chat_out(delivered);
        self.stats.record_chat_users(users);
        tracing::info!(client_id = client_id, name = name, "Chat client authenticated as admin");
        Ok(())
    }

    async fn kick(&self, by: &str, role: Role, target: &str) -> Result<(), ChatError> {
        let mut state = self.state.write().await;
        let id = state
            .find_by_name(target)
            .ok_or_else(|| ChatError::UnknownUser(target.to_string()))?;

        let Some((target_name, target_role)) =
            state.clients.get(&id).map(|c| (c.name.clone(), c.role))
        else {
            return Err(ChatError::UnknownUser(target.to_string()));
        };
        if target_role > role {
            return Err(ChatError::Permission("kick".into()));
        }

        // The kicked client sees the notice, then its queue is dropped
        let delivered = state.deliver(
            &ChatEvent::Kicked {
                name: target_name,
                by: by.to_string(),
                at: now_millis(),
            },
            None,
        );
        let kicked = state.clients.remove(&id);
        let users = state.clients.len() as u64;
        drop(state);

        self.stats.record_chat_out(delivered);
        self.stats.record_chat_users(users);
        if let Some(kicked) = kicked {
            tracing::info!(by = by, name = %kicked.name, peer = %kicked.peer, "Chat client kicked");
        }
        Ok(())
    }

    async fn set_role(&self, by: &str, target: &str, role: Role) -> Result<(), ChatError> {
        let mut state = self.state.write().await;
        let id = state
            .find_by_name(target)
            .ok_or_else(|| ChatError::UnknownUser(target.to_string()))?;

        let Some(client) = state.clients.get_mut(&id) else {
            return Err(ChatError::UnknownUser(target.to_string()));
        };
        if client.role == Role::Admin {
            return Err(ChatError::Permission(
                if role == Role::User { "unmod" } else { "mod" }.into(),
            ));
        }
        client.role = role;
        let name = client.name.clone();

        let delivered = state.deliver(
            &ChatEvent::RoleChanged {
                name: name.clone(),
                role,
                at: now_millis(),
            },
            None,
        );
        let users = state.clients.len() as u64;
        drop(state);

        self.stats.record_chat_out(delivered);
        self.stats.record_chat_users(users);
        tracing::info!(by = by, name = %name, role = ?role, "Chat role changed");
        Ok(())
    }

    /// Notify and release every client, then refuse new joins
    ///
    /// Safe to call any number of times; only the first call has an effect.
    pub async fn shutdown(&self) {
        let mut state = self.state.write().await;
        if state.closed {
            return;
        }
        state.closed = true;

        // Everyone is released below, so nobody is announced as left
        let (notified, _) = state.offer(
            &ChatEvent::Shutdown {
                text: "Server is shutting down".into(),
            },
            None,
        );
        // Dropping the senders ends every client's event stream
        state.clients.clear();
        drop(state);

        self.stats.record_chat_out(notified);
        self.stats.record_chat_users(0);
        tracing::info!(clients = notified, "Chat room shut down");
    }

    pub async fn is_closed(&self) -> bool {
        self.state.read().await.closed
    }

    /// Display names of everyone present, sorted
    pub async fn users(&self) -> Vec<String> {
        self.state.read().await.user_names()
    }

    pub async fn now_playing(&self) -> Option<String> {
        self.state.read().await.now_playing.clone()
    }

    /// Role of a client, if still present
    pub async fn role_of(&self, client_id: u64) -> Option<Role> {
        self.state.read().await.clients.get(&client_id).map(|c| c.role)
    }
}
