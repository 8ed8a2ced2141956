//! Room broker: pairs two connections into a room and forwards their
//! traffic verbatim.
//!
//! The relay is content-blind and key-blind. It decodes only the envelope
//! (type and routing id); payloads pass through untouched. Each connection
//! runs a reader loop plus a writer task fed by a queue, so frames to a peer
//! never interleave. The room table sits behind a coarse mutex that is held
//! only to look up or insert a handle; each room guards its own state with
//! its own lock, and forwarding happens without the table lock.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::time;
use uuid::Uuid;

use crate::networking::{read_frame, write_frame};
use crate::protocol::{
    error_code, CreatePersistentPayload, CreateRoomPayload, Envelope, ErrorPayload,
    JoinByIdPayload, JoinRoomPayload, MessageType, RoomJoinedPayload,
};

/// Ephemeral rooms with no second joiner expire after this long.
pub const EPHEMERAL_IDLE: Duration = Duration::from_secs(300);

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const OUTBOX_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomKind {
    /// Keyed by the code-phrase hash; lives for one transfer.
    Ephemeral,
    /// Keyed by a broker-minted id; lives until its TTL elapses.
    Persistent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    Open,
    Ready,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemberRole {
    Creator,
    Joiner,
}

struct Member {
    conn_id: u64,
    role: MemberRole,
    outbox: mpsc::Sender<Envelope>,
}

struct RoomInner {
    state: RoomState,
    members: Vec<Member>,
    last_activity: Instant,
}

pub struct Room {
    id: String,
    kind: RoomKind,
    created_at: Instant,
    expires_at: Option<Instant>,
    inner: Mutex<RoomInner>,
}

impl Room {
    fn new(id: String, kind: RoomKind, expires_at: Option<Instant>, creator: Member) -> Self {
        Room {
            id,
            kind,
            created_at: Instant::now(),
            expires_at,
            inner: Mutex::new(RoomInner {
                state: RoomState::Open,
                members: vec![creator],
                last_activity: Instant::now(),
            }),
        }
    }

    fn ephemeral(code_hash: &str, creator: Member) -> Self {
        Room::new(code_hash.to_string(), RoomKind::Ephemeral, None, creator)
    }

    fn persistent(ttl_hours: i64, creator: Member) -> Self {
        let expires_at = if ttl_hours < 0 {
            None
        } else {
            Instant::now().checked_add(Duration::from_secs(ttl_hours as u64 * 3600))
        };
        Room::new(Uuid::new_v4().to_string(), RoomKind::Persistent, expires_at, creator)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn expired(&self) -> bool {
        self.expires_at.map(|at| Instant::now() >= at).unwrap_or(false)
    }

    /// Admits the second member and signals readiness.
    ///
    /// `announce_join` additionally sends `ROOM_JOINED` to the joiner first
    /// (the symmetric second-`CREATE_ROOM` case; plain joiners expect only
    /// `ROOM_READY`). Both members see `ROOM_READY` enqueued before any peer
    /// message can be forwarded, because forwarding requires this same lock
    /// and the `Ready` state it sets.
    async fn add_joiner(&self, member: Member, announce_join: bool) -> Result<(), &'static str> {
        let mut inner = self.inner.lock().await;
        if inner.state != RoomState::Open {
            return Err(error_code::ROOM_FULL);
        }
        if self.expired() {
            inner.state = RoomState::Closed;
            return Err(error_code::ROOM_NOT_FOUND);
        }
        let creator_present = inner
            .members
            .first()
            .map(|m| !m.outbox.is_closed())
            .unwrap_or(false);
        if !creator_present {
            inner.state = RoomState::Closed;
            return Err(error_code::ROOM_NOT_FOUND);
        }

        if announce_join {
            let _ = member
                .outbox
                .send(Envelope::bare(MessageType::RoomJoined, &self.id))
                .await;
        }
        debug!("room {}: {:?} {} paired", self.id, member.role, member.conn_id);
        inner.members.push(member);
        inner.state = RoomState::Ready;
        inner.last_activity = Instant::now();
        for m in &inner.members {
            let _ = m.outbox.send(Envelope::bare(MessageType::RoomReady, &self.id)).await;
        }
        Ok(())
    }

    /// Forwards a peer message verbatim to the other member.
    async fn forward_from(&self, sender_id: u64, envelope: Envelope) -> Result<(), &'static str> {
        let mut inner = self.inner.lock().await;
        if inner.state != RoomState::Ready {
            return Err(error_code::TRANSFER_FAILED);
        }
        inner.last_activity = Instant::now();
        let peer = inner
            .members
            .iter()
            .find(|m| m.conn_id != sender_id)
            .ok_or(error_code::TRANSFER_FAILED)?;
        peer.outbox
            .send(envelope)
            .await
            .map_err(|_| error_code::TRANSFER_FAILED)
    }

    /// Closes the room, notifying every member other than the leaver.
    ///
    /// A clean departure sends only `CLOSE`; a failure sends
    /// `ERROR{TRANSFER_FAILED}` first.
    async fn close(&self, leaver: u64, clean: bool) {
        let mut inner = self.inner.lock().await;
        if inner.state == RoomState::Closed {
            return;
        }
        inner.state = RoomState::Closed;
        for member in inner.members.iter().filter(|m| m.conn_id != leaver) {
            if !clean {
                if let Ok(envelope) = Envelope::new(
                    MessageType::Error,
                    &self.id,
                    &ErrorPayload {
                        code: error_code::TRANSFER_FAILED.into(),
                        message: "peer connection lost".into(),
                    },
                ) {
                    let _ = member.outbox.send(envelope).await;
                }
            }
            let _ = member
                .outbox
                .send(Envelope::bare(MessageType::Close, &self.id))
                .await;
        }
        inner.members.clear();
    }
}

/// Shared broker state: the room table and a connection id counter.
pub struct Broker {
    rooms: Mutex<HashMap<String, Arc<Room>>>,
    next_conn_id: AtomicU64,
}

impl Broker {
    pub fn new() -> Arc<Self> {
        Arc::new(Broker {
            rooms: Mutex::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
        })
    }

    /// Live rooms, including ones mid-teardown until swept or removed.
    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }

    fn connection_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn remove_room(&self, id: &str) {
        self.rooms.lock().await.remove(id);
    }
}

/// Binds the default listen address and serves forever.
pub async fn run(port: u16) -> io::Result<()> {
    let bind_addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&bind_addr).await?;
    println!("Relay listening on {bind_addr}");
    info!("relay listening on {bind_addr}");
    serve(Broker::new(), listener).await
}

/// Accept loop over an already-bound listener.
pub async fn serve(broker: Arc<Broker>, listener: TcpListener) -> io::Result<()> {
    tokio::spawn(sweeper(broker.clone()));
    loop {
        let (stream, addr) = listener.accept().await?;
        info!("client connected: {addr}");
        tokio::spawn(handle_connection(broker.clone(), stream));
    }
}

/// How a reader loop ended; decides what the surviving peer is told.
enum Exit {
    Clean,
    Failed,
}

async fn handle_connection(broker: Arc<Broker>, stream: TcpStream) {
    let conn_id = broker.connection_id();
    let (mut read, mut write) = stream.into_split();

    let (outbox, mut outbox_rx) = mpsc::channel::<Envelope>(OUTBOX_DEPTH);

    // Writer task: the only place frames for this connection are written,
    // so forwarded messages and broker replies never interleave.
    let writer = tokio::spawn(async move {
        while let Some(envelope) = outbox_rx.recv().await {
            let ending = envelope.kind == MessageType::Close;
            let Ok(text) = envelope.encode() else { break };
            if write_frame(&mut write, &text).await.is_err() {
                break;
            }
            if ending {
                break;
            }
        }
        let _ = write.shutdown().await;
    });

    let mut membership: Option<Arc<Room>> = None;

    let exit = loop {
        let frame = match read_frame(&mut read).await {
            Ok(frame) => frame,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break Exit::Clean,
            Err(e) => {
                debug!("connection {conn_id} read error: {e}");
                break Exit::Failed;
            }
        };
        let envelope = match Envelope::decode(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!("connection {conn_id} sent undecodable frame: {e}");
                break Exit::Failed;
            }
        };

        match envelope.kind {
            MessageType::CreateRoom
            | MessageType::JoinRoom
            | MessageType::CreatePersistent
            | MessageType::JoinById
                if membership.is_some() =>
            {
                warn!("connection {conn_id} tried to enter a second room");
                break Exit::Failed;
            }

            MessageType::CreateRoom => {
                let Ok(payload) = envelope.payload::<CreateRoomPayload>() else {
                    break Exit::Failed;
                };
                match create_or_join(&broker, &payload.code_hash, conn_id, &outbox).await {
                    Ok(room) => membership = Some(room),
                    Err(code) => {
                        send_error(&outbox, &payload.code_hash, code, "cannot enter room").await;
                    }
                }
            }

            MessageType::JoinRoom => {
                let Ok(payload) = envelope.payload::<JoinRoomPayload>() else {
                    break Exit::Failed;
                };
                match join(&broker, &payload.code_hash, conn_id, &outbox).await {
                    Ok(room) => membership = Some(room),
                    Err(code) => {
                        send_error(&outbox, &payload.code_hash, code, "cannot join room").await;
                    }
                }
            }

            MessageType::CreatePersistent => {
                let Ok(payload) = envelope.payload::<CreatePersistentPayload>() else {
                    break Exit::Failed;
                };
                let member = Member {
                    conn_id,
                    role: MemberRole::Creator,
                    outbox: outbox.clone(),
                };
                let room = Arc::new(Room::persistent(payload.ttl_hours, member));
                broker
                    .rooms
                    .lock()
                    .await
                    .insert(room.id().to_string(), room.clone());
                info!("minted persistent room {} (ttl {}h)", room.id(), payload.ttl_hours);

                // The id rides in the payload and the envelope's room_id so
                // the creator can recover it either way.
                if let Ok(reply) = Envelope::new(
                    MessageType::RoomJoined,
                    room.id(),
                    &RoomJoinedPayload {
                        room_id: Some(room.id().to_string()),
                    },
                ) {
                    let _ = outbox.send(reply).await;
                }
                membership = Some(room);
            }

            MessageType::JoinById => {
                let Ok(payload) = envelope.payload::<JoinByIdPayload>() else {
                    break Exit::Failed;
                };
                match join(&broker, &payload.room_id, conn_id, &outbox).await {
                    Ok(room) => membership = Some(room),
                    Err(code) => {
                        send_error(&outbox, &payload.room_id, code, "cannot join room").await;
                    }
                }
            }

            MessageType::PakeA | MessageType::PakeB | MessageType::Encrypted | MessageType::Ack => {
                let Some(room) = membership.as_ref() else {
                    send_error(&outbox, "", error_code::ROOM_NOT_FOUND, "not in a room").await;
                    break Exit::Failed;
                };
                if let Err(code) = room.forward_from(conn_id, envelope).await {
                    send_error(&outbox, room.id(), code, "room is not ready").await;
                    break Exit::Failed;
                }
            }

            MessageType::Close => break Exit::Clean,

            // Relay-originated types have no business arriving from a client.
            MessageType::RoomJoined | MessageType::RoomReady | MessageType::Error => {
                warn!("connection {conn_id} sent relay-only type {}", envelope.kind);
                break Exit::Failed;
            }
        }
    };

    if let Some(room) = membership {
        let clean = matches!(exit, Exit::Clean);
        room.close(conn_id, clean).await;
        broker.remove_room(room.id()).await;
        debug!("room {} closed by connection {conn_id}", room.id());
    }

    // Dropping the outbox ends the writer once its queue drains.
    drop(outbox);
    let _ = writer.await;
    debug!("connection {conn_id} finished");
}

/// CREATE_ROOM: first arrival creates; a second arrival with the same hash
/// joins symmetrically and is told `ROOM_JOINED` before `ROOM_READY`.
async fn create_or_join(
    broker: &Arc<Broker>,
    code_hash: &str,
    conn_id: u64,
    outbox: &mpsc::Sender<Envelope>,
) -> Result<Arc<Room>, &'static str> {
    let existing = {
        let mut rooms = broker.rooms.lock().await;
        match rooms.entry(code_hash.to_string()) {
            Entry::Vacant(slot) => {
                // Confirmation goes out before the table lock is released so
                // a fast joiner cannot get ROOM_READY queued ahead of it.
                let _ = outbox
                    .send(Envelope::bare(MessageType::RoomJoined, code_hash))
                    .await;
                let member = Member {
                    conn_id,
                    role: MemberRole::Creator,
                    outbox: outbox.clone(),
                };
                let room = Arc::new(Room::ephemeral(code_hash, member));
                slot.insert(room.clone());
                debug!("created ephemeral room for connection {conn_id}");
                return Ok(room);
            }
            Entry::Occupied(entry) => entry.get().clone(),
        }
    };

    let member = Member {
        conn_id,
        role: MemberRole::Joiner,
        outbox: outbox.clone(),
    };
    existing.add_joiner(member, true).await?;
    debug!("connection {conn_id} paired via symmetric create");
    Ok(existing)
}

/// JOIN_ROOM / JOIN_BY_ID: the room must already exist and be open.
async fn join(
    broker: &Arc<Broker>,
    room_key: &str,
    conn_id: u64,
    outbox: &mpsc::Sender<Envelope>,
) -> Result<Arc<Room>, &'static str> {
    let room = broker
        .rooms
        .lock()
        .await
        .get(room_key)
        .cloned()
        .ok_or(error_code::ROOM_NOT_FOUND)?;

    let member = Member {
        conn_id,
        role: MemberRole::Joiner,
        outbox: outbox.clone(),
    };
    match room.add_joiner(member, false).await {
        Ok(()) => {
            debug!("connection {conn_id} joined room {}", room.id());
            Ok(room)
        }
        Err(code) => {
            if code == error_code::ROOM_NOT_FOUND {
                broker.remove_room(room.id()).await;
            }
            Err(code)
        }
    }
}

async fn send_error(outbox: &mpsc::Sender<Envelope>, room_id: &str, code: &str, message: &str) {
    if let Ok(envelope) = Envelope::new(
        MessageType::Error,
        room_id,
        &ErrorPayload {
            code: code.to_string(),
            message: message.to_string(),
        },
    ) {
        let _ = outbox.send(envelope).await;
    }
}

/// Background pass that drops expired, idle, and abandoned rooms.
async fn sweeper(broker: Arc<Broker>) {
    let mut tick = time::interval(SWEEP_INTERVAL);
    tick.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        let rooms: Vec<Arc<Room>> = broker.rooms.lock().await.values().cloned().collect();
        for room in rooms {
            let stale = {
                let mut inner = room.inner.lock().await;
                inner.members.retain(|m| !m.outbox.is_closed());
                let stale = match inner.state {
                    RoomState::Closed => true,
                    _ if inner.members.is_empty() => true,
                    _ if room.expired() => true,
                    RoomState::Open => {
                        room.kind == RoomKind::Ephemeral
                            && inner.last_activity.elapsed() >= EPHEMERAL_IDLE
                    }
                    RoomState::Ready => false,
                };
                if stale && !inner.members.is_empty() {
                    inner.state = RoomState::Closed;
                    for member in &inner.members {
                        let _ = member
                            .outbox
                            .send(Envelope::bare(MessageType::Close, room.id()))
                            .await;
                    }
                    inner.members.clear();
                }
                stale
            };
            if stale {
                info!("sweeping room {} (age {:?})", room.id(), room.age());
                broker.remove_room(room.id()).await;
            }
        }
    }
}
