// Central dispatcher for routing frames between sessions
//
// The hub task owns the session table and the root state. Connection tasks
// send it commands over a channel, so every mutation happens here, one
// command at a time.

use crate::relay::admin::ChatCommand;
use crate::relay::auth::{parse_login, CredentialFile};
use crate::relay::error::RelayError;
use crate::relay::privilege::{PrivilegeManager, RootOwner};
use crate::relay::session::{SessionId, SessionTable};
use crate::relay::wire::{Message, MessageKind};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::sync::{mpsc, oneshot};

const ROOT_GRANTED: &str = "You are now ROOT user. You can use /kick and /root.";
const PERMISSION_DENIED: &str = "Permission denied: root only command.";

/// Handle for communicating with the hub
#[derive(Clone, Debug)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    /// Send a command to the hub
    pub fn send_command(&self, cmd: HubCommand) -> Result<()> {
        self.tx
            .send(cmd)
            .ok()
            .context("Failed to send command to hub")
    }

    /// Register a new connection. Fails with `ServerFull` at capacity.
    pub async fn connect(
        &self,
        peer: SocketAddr,
        outbound: mpsc::Sender<Message>,
        closer: oneshot::Sender<()>,
    ) -> Result<SessionId, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubCommand::Connect {
                peer,
                outbound,
                closer,
                reply,
            })
            .map_err(|_| RelayError::HubClosed)?;
        rx.await.map_err(|_| RelayError::HubClosed)?
    }

    /// Forward a frame read from a session
    pub fn inbound(&self, session: SessionId, message: Message) -> Result<()> {
        self.send_command(HubCommand::Inbound { session, message })
    }

    /// Report that a connection ended
    pub fn disconnected(&self, session: SessionId) {
        let _ = self.send_command(HubCommand::Disconnected { session });
    }

    /// Current sessions, users and root holder
    pub async fn snapshot(&self) -> Result<HubSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send_command(HubCommand::Snapshot { reply })?;
        rx.await.context("Hub dropped the snapshot request")
    }
}

/// Commands that can be sent to the hub
#[derive(Debug)]
pub enum HubCommand {
    /// A connection was accepted
    Connect {
        peer: SocketAddr,
        outbound: mpsc::Sender<Message>,
        closer: oneshot::Sender<()>,
        reply: oneshot::Sender<Result<SessionId, RelayError>>,
    },
    /// A session sent a frame
    Inbound {
        session: SessionId,
        message: Message,
    },
    /// A connection closed or failed
    Disconnected { session: SessionId },
    /// Report current state
    Snapshot { reply: oneshot::Sender<HubSnapshot> },
    /// Shutdown the hub
    Shutdown,
}

/// Point-in-time view of the hub's state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubSnapshot {
    pub sessions: usize,
    /// Bound usernames in connection order
    pub users: Vec<String>,
    pub root: RootOwner,
    /// Username of the root holder, if it is logged in
    pub root_user: Option<String>,
}

/// Message dispatcher owning all session state
pub struct Hub {
    sessions: SessionTable,
    privileges: PrivilegeManager,
    credentials: CredentialFile,
    rx: mpsc::UnboundedReceiver<HubCommand>,
}

impl Hub {
    /// Create a new hub
    pub fn new(max_sessions: usize, credentials: CredentialFile) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::unbounded_channel();

        let hub = Self {
            sessions: SessionTable::new(max_sessions),
            privileges: PrivilegeManager::new(),
            credentials,
            rx,
        };

        (hub, HubHandle { tx })
    }

    /// Run the hub event loop
    pub async fn run(mut self) {
        tracing::info!("Relay hub started");

        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                HubCommand::Connect {
                    peer,
                    outbound,
                    closer,
                    reply,
                } => {
                    let result = self.sessions.insert(peer, outbound, closer);
                    if let Err(e) = &result {
                        tracing::warn!("Rejecting connection from {}: {}", peer, e);
                    }
                    let _ = reply.send(result);
                }
                HubCommand::Inbound { session, message } => {
                    if self.sessions.contains(session) {
                        self.dispatch(session, message).await;
                    } else {
                        tracing::debug!("Dropping frame from closed session {}", session);
                    }
                }
                HubCommand::Disconnected { session } => {
                    if self.remove_session(session) {
                        tracing::info!("Client {} disconnected", session);
                    }
                }
                HubCommand::Snapshot { reply } => {
                    let _ = reply.send(self.snapshot());
                }
                HubCommand::Shutdown => {
                    tracing::info!("Hub shutting down");
                    break;
                }
            }
            self.reconcile_root();
        }

        tracing::info!("Relay hub stopped");
    }

    /// Route one frame by kind
    async fn dispatch(&mut self, session: SessionId, message: Message) {
        match message.kind {
            MessageKind::Login => self.handle_login(session, &message).await,
            MessageKind::Chat => self.handle_chat(session, message),
            MessageKind::DirectMessage => self.handle_direct(session, message),
            MessageKind::ListRequest => {
                let list = self.sessions.user_list();
                self.reply(session, MessageKind::ListResponse, &list);
            }
            MessageKind::Exit => self.handle_exit(session),
            MessageKind::Unknown(raw) => {
                tracing::warn!("Unknown message type {} from session {}", raw, session);
            }
            other => {
                tracing::warn!(
                    "Unexpected {:?} from session {} outside a transfer, ignoring",
                    other,
                    session
                );
            }
        }
    }

    async fn handle_login(&mut self, session: SessionId, message: &Message) {
        let payload = message.text_payload();
        let Some((id, password)) = parse_login(&payload) else {
            tracing::warn!("Malformed login from session {}", session);
            self.reply(session, MessageKind::LoginFail, "LOGIN_FAIL");
            return;
        };

        let valid = match self.credentials.verify(id, password).await {
            Ok(valid) => valid,
            Err(e) => {
                tracing::error!("Credential check failed: {:#}", e);
                false
            }
        };
        if !valid {
            tracing::info!("Login failed: {} (session {})", id, session);
            self.reply(session, MessageKind::LoginFail, "LOGIN_FAIL");
            return;
        }

        match self.sessions.bind(session, id) {
            Ok(()) => {}
            Err(RelayError::DuplicateLogin(name)) => {
                tracing::warn!("Login rejected, {} is already active (session {})", name, session);
                self.reply(session, MessageKind::LoginFail, "ALREADY_LOGGED_IN");
                return;
            }
            Err(e) => {
                tracing::debug!("Login for vanished session: {}", e);
                return;
            }
        }

        tracing::info!("Login succeeded: {} (session {})", id, session);
        self.reply(session, MessageKind::LoginOk, "LOGIN_OK");

        if self.privileges.assign_if_first(session) {
            self.reply(session, MessageKind::Chat, ROOT_GRANTED);
        }
    }

    fn handle_chat(&mut self, session: SessionId, message: Message) {
        let text = message.text_payload();
        match ChatCommand::parse(&text) {
            Some(command) => self.handle_command(session, command),
            None => {
                tracing::info!("Chat: {} - {}", message.sender, text);
                self.sessions.broadcast(Some(session), &message);
            }
        }
    }

    fn handle_command(&mut self, session: SessionId, command: ChatCommand<'_>) {
        if command.requires_root() && !self.privileges.can_kick(session) {
            tracing::info!("Denied {:?} from session {}", command, session);
            self.reply(session, MessageKind::Chat, PERMISSION_DENIED);
            return;
        }

        match command {
            ChatCommand::Users => {
                let list = self.sessions.user_list();
                self.reply(session, MessageKind::Chat, &list);
                tracing::debug!("Sent user list to session {}", session);
            }
            ChatCommand::Kick(name) => self.kick(session, name),
            ChatCommand::Root(name) => self.transfer_root(session, name),
            ChatCommand::Unknown(line) => {
                tracing::debug!("Unknown command {:?} from session {}", line, session);
                self.reply(session, MessageKind::Chat, "Unknown command.");
            }
        }
    }

    fn kick(&mut self, issuer: SessionId, name: &str) {
        let Some(target) = self.sessions.find_by_username(name) else {
            self.reply(issuer, MessageKind::Chat, "No such user.");
            return;
        };

        self.sessions
            .send_to(target, Message::notice(MessageKind::Chat, "You have been kicked by root."));
        self.remove_session(target);
        tracing::info!("{} has been kicked", name);

        let notice = Message::notice(
            MessageKind::KickNotice,
            &format!("{} has been kicked by root.", name),
        );
        self.sessions.broadcast(None, &notice);
    }

    fn transfer_root(&mut self, issuer: SessionId, name: &str) {
        if !self.privileges.can_reassign_root(issuer) {
            self.reply(issuer, MessageKind::Chat, PERMISSION_DENIED);
            return;
        }
        let Some(target) = self.sessions.find_by_username(name) else {
            self.reply(issuer, MessageKind::Chat, "Failed to transfer root: user not found.");
            return;
        };

        self.privileges.transfer_to(target);
        let notice = Message::notice(
            MessageKind::Chat,
            &format!("Root has been transferred to {}.", name),
        );
        self.sessions.broadcast(None, &notice);
    }

    fn handle_direct(&mut self, session: SessionId, message: Message) {
        let Some(target) = self.sessions.find_by_username(&message.target) else {
            tracing::info!("Direct message to unknown user {:?}", message.target);
            self.reply(session, MessageKind::DirectMessageFail, "User not found.");
            return;
        };

        tracing::info!("Direct message: {} -> {}", message.sender, message.target);
        if target != session {
            self.sessions.send_to(target, message.clone());
        }
        self.sessions.send_to(session, message);
    }

    fn handle_exit(&mut self, session: SessionId) {
        let name = self.sessions.username_of(session).map(str::to_string);
        self.remove_session(session);

        if let Some(name) = name {
            tracing::info!("{} exited (session {})", name, session);
            let notice = Message::notice(MessageKind::Chat, &format!("{} has left.", name));
            self.sessions.broadcast(None, &notice);
        }
    }

    fn reply(&mut self, session: SessionId, kind: MessageKind, text: &str) {
        self.sessions.send_to(session, Message::notice(kind, text));
    }

    /// Remove a session and give up root if it held it
    fn remove_session(&mut self, session: SessionId) -> bool {
        let removed = self.sessions.remove(session).is_some();
        self.privileges.release(session);
        removed
    }

    /// Sessions can also vanish inside a broadcast; make sure root follows
    fn reconcile_root(&mut self) {
        if let RootOwner::Owned(owner) = self.privileges.owner() {
            if !self.sessions.contains(owner) {
                self.privileges.release(owner);
            }
        }
    }

    fn snapshot(&self) -> HubSnapshot {
        let root = self.privileges.owner();
        let root_user = match root {
            RootOwner::Owned(id) => self.sessions.username_of(id).map(str::to_string),
            _ => None,
        };

        HubSnapshot {
            sessions: self.sessions.len(),
            users: self
                .sessions
                .active()
                .filter_map(|s| s.username.clone())
                .collect(),
            root,
            root_user,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    struct Peer {
        id: SessionId,
        rx: mpsc::Receiver<Message>,
        _closer: oneshot::Receiver<()>,
    }

    impl Peer {
        async fn next(&mut self) -> Message {
            tokio::time::timeout(Duration::from_secs(2), self.rx.recv())
                .await
                .expect("timed out waiting for frame")
                .expect("session closed")
        }

        fn nothing_pending(&mut self) -> bool {
            matches!(self.rx.try_recv(), Err(mpsc::error::TryRecvError::Empty))
        }
    }

    fn start_hub(capacity: usize) -> (HubHandle, TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.txt");
        std::fs::write(&path, "alice a1\nbob b2\ncarol c3\n").unwrap();

        let (hub, handle) = Hub::new(capacity, CredentialFile::new(path));
        tokio::spawn(hub.run());
        (handle, dir)
    }

    async fn join(hub: &HubHandle) -> Peer {
        let (tx, rx) = mpsc::channel(32);
        let (closer, closer_rx) = oneshot::channel();
        let id = hub
            .connect("127.0.0.1:5000".parse().unwrap(), tx, closer)
            .await
            .unwrap();
        Peer {
            id,
            rx,
            _closer: closer_rx,
        }
    }

    async fn login(hub: &HubHandle, peer: &mut Peer, user: &str, pw: &str) -> Message {
        let msg = Message::text(MessageKind::Login, user, &format!("{} {}", user, pw));
        hub.inbound(peer.id, msg).unwrap();
        peer.next().await
    }

    #[tokio::test]
    async fn test_first_login_becomes_root() {
        let (hub, _dir) = start_hub(4);
        assert_eq!(hub.snapshot().await.unwrap().root, RootOwner::Unassigned);

        let mut alice = join(&hub).await;
        let mut bob = join(&hub).await;

        assert_eq!(login(&hub, &mut alice, "alice", "a1").await.kind, MessageKind::LoginOk);
        assert_eq!(alice.next().await.text_payload(), ROOT_GRANTED);

        assert_eq!(login(&hub, &mut bob, "bob", "b2").await.kind, MessageKind::LoginOk);

        let snapshot = hub.snapshot().await.unwrap();
        assert_eq!(snapshot.root, RootOwner::Owned(alice.id));
        assert_eq!(snapshot.root_user.as_deref(), Some("alice"));
        assert!(bob.nothing_pending());
    }

    #[tokio::test]
    async fn test_bad_credentials_keep_connection() {
        let (hub, _dir) = start_hub(4);
        let mut alice = join(&hub).await;

        let reply = login(&hub, &mut alice, "alice", "wrong").await;
        assert_eq!(reply.kind, MessageKind::LoginFail);
        assert_eq!(hub.snapshot().await.unwrap().sessions, 1);

        let reply = login(&hub, &mut alice, "alice", "a1").await;
        assert_eq!(reply.kind, MessageKind::LoginOk);
    }

    #[tokio::test]
    async fn test_duplicate_login_rejected() {
        let (hub, _dir) = start_hub(4);
        let mut first = join(&hub).await;
        let mut second = join(&hub).await;

        login(&hub, &mut first, "alice", "a1").await;
        let reply = login(&hub, &mut second, "alice", "a1").await;
        assert_eq!(reply.kind, MessageKind::LoginFail);
        assert_eq!(reply.text_payload(), "ALREADY_LOGGED_IN");
    }

    #[tokio::test]
    async fn test_non_root_commands_denied() {
        let (hub, _dir) = start_hub(4);
        let mut alice = join(&hub).await;
        let mut bob = join(&hub).await;
        login(&hub, &mut alice, "alice", "a1").await;
        alice.next().await;
        login(&hub, &mut bob, "bob", "b2").await;

        for line in ["/kick alice", "/root bob", "/dance"] {
            hub.inbound(bob.id, Message::text(MessageKind::Chat, "bob", line))
                .unwrap();
            assert_eq!(bob.next().await.text_payload(), PERMISSION_DENIED);
        }
        hub.snapshot().await.unwrap();
        assert!(alice.nothing_pending());
    }

    #[tokio::test]
    async fn test_kicking_root_vacates_it() {
        let (hub, _dir) = start_hub(4);
        let mut alice = join(&hub).await;
        login(&hub, &mut alice, "alice", "a1").await;
        alice.next().await;

        hub.inbound(alice.id, Message::text(MessageKind::Chat, "alice", "/kick alice"))
            .unwrap();
        assert_eq!(alice.next().await.text_payload(), "You have been kicked by root.");

        let snapshot = hub.snapshot().await.unwrap();
        assert_eq!(snapshot.sessions, 0);
        assert_eq!(snapshot.root, RootOwner::Vacated);
    }

    #[tokio::test]
    async fn test_exit_announces_departure() {
        let (hub, _dir) = start_hub(4);
        let mut alice = join(&hub).await;
        let mut bob = join(&hub).await;
        login(&hub, &mut alice, "alice", "a1").await;
        alice.next().await;
        login(&hub, &mut bob, "bob", "b2").await;

        hub.inbound(bob.id, Message::new(MessageKind::Exit, "bob")).unwrap();
        assert_eq!(alice.next().await.text_payload(), "bob has left.");
        assert_eq!(hub.snapshot().await.unwrap().users, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_kind_is_dropped() {
        let (hub, _dir) = start_hub(4);
        let mut alice = join(&hub).await;

        hub.inbound(alice.id, Message::new(MessageKind::Unknown(77), "x")).unwrap();
        hub.inbound(alice.id, Message::new(MessageKind::FileEnd, "x")).unwrap();

        assert_eq!(hub.snapshot().await.unwrap().sessions, 1);
        assert!(alice.nothing_pending());
    }

    #[tokio::test]
    async fn test_capacity_enforced() {
        let (hub, _dir) = start_hub(1);
        let _alice = join(&hub).await;

        let (tx, _rx) = mpsc::channel(1);
        let (closer, _closer_rx) = oneshot::channel();
        let err = hub
            .connect("127.0.0.1:5001".parse().unwrap(), tx, closer)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::ServerFull { capacity: 1 }));
    }
}
