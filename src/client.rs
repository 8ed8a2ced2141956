//! Transfer client: drives one sender or receiver role end to end.
//!
//! Every operation dials the relay, claims or joins a room, runs the PAKE
//! exchange, moves one encrypted payload, acknowledges, and disconnects.
//! Errors propagate to the caller unchanged; a dropped transfer is restarted
//! by the caller, never resumed here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use zeroize::Zeroizing;

use crate::cryptography;
use crate::error::TransferError;
use crate::networking::Connection;
use crate::pake::{Role, Session};
use crate::protocol::{
    CreatePersistentPayload, CreateRoomPayload, EncryptedPayload, Envelope, ErrorPayload,
    JoinByIdPayload, JoinRoomPayload, MessageType, PakePayload, RoomJoinedPayload,
};
use crate::{DEFAULT_RELAY_ADDR, DEFAULT_TIMEOUT_SECS, KEY_SIZE, MAX_PAYLOAD_SIZE};

/// Client configuration: where the relay lives and how long any single
/// blocking receive may take.
#[derive(Debug, Clone)]
pub struct Config {
    pub relay_addr: String,
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            relay_addr: DEFAULT_RELAY_ADDR.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Sends a file through an ephemeral room keyed by the code-phrase hash.
pub async fn send(
    file_path: &Path,
    code_phrase: &str,
    config: &Config,
) -> Result<(), TransferError> {
    let (filename, content) = load_payload(file_path).await?;

    let mut session = Session::new(code_phrase, Role::Sender);
    let room_id = session.code_hash_string();

    let mut conn = Connection::dial(&config.relay_addr, config.timeout).await?;
    conn.send(&Envelope::new(
        MessageType::CreateRoom,
        &room_id,
        &CreateRoomPayload {
            code_hash: room_id.clone(),
        },
    )?)
    .await?;
    expect(&mut conn, MessageType::RoomJoined).await?;

    debug!("room open, waiting for receiver");
    expect(&mut conn, MessageType::RoomReady).await?;

    transmit(&mut conn, &mut session, &room_id, &filename, &content).await?;
    conn.close(&room_id).await;
    info!("sent {filename} ({} bytes)", content.len());
    Ok(())
}

/// Sends a file through a persistent room. The minted room id is handed to
/// `on_room_id` exactly once, after `ROOM_JOINED` and before blocking on the
/// peer, so the surrounding tool can show it to the user.
pub async fn send_persistent(
    file_path: &Path,
    code_phrase: &str,
    ttl_hours: i64,
    config: &Config,
    on_room_id: impl FnOnce(&str),
) -> Result<(), TransferError> {
    let (filename, content) = load_payload(file_path).await?;

    let mut session = Session::new(code_phrase, Role::Sender);

    let mut conn = Connection::dial(&config.relay_addr, config.timeout).await?;
    conn.send(&Envelope::new(
        MessageType::CreatePersistent,
        "",
        &CreatePersistentPayload { ttl_hours },
    )?)
    .await?;

    let joined = expect(&mut conn, MessageType::RoomJoined).await?;
    let room_id = joined
        .payload::<RoomJoinedPayload>()
        .ok()
        .and_then(|p| p.room_id)
        .or_else(|| (!joined.room_id.is_empty()).then(|| joined.room_id.clone()))
        .ok_or_else(|| {
            TransferError::ProtocolViolation("ROOM_JOINED carried no room id".into())
        })?;
    on_room_id(&room_id);

    debug!("persistent room {room_id} open, waiting for receiver");
    expect(&mut conn, MessageType::RoomReady).await?;

    transmit(&mut conn, &mut session, &room_id, &filename, &content).await?;
    conn.close(&room_id).await;
    info!("sent {filename} via persistent room {room_id}");
    Ok(())
}

/// Receives a file from an ephemeral room and stores it under `output_dir`.
/// Returns the stored path.
pub async fn receive(
    code_phrase: &str,
    output_dir: &Path,
    config: &Config,
) -> Result<PathBuf, TransferError> {
    let mut session = Session::new(code_phrase, Role::Receiver);
    let room_id = session.code_hash_string();

    let mut conn = Connection::dial(&config.relay_addr, config.timeout).await?;
    conn.send(&Envelope::new(
        MessageType::JoinRoom,
        &room_id,
        &JoinRoomPayload {
            code_hash: room_id.clone(),
        },
    )?)
    .await?;
    expect(&mut conn, MessageType::RoomReady).await?;

    let stored = collect(&mut conn, &mut session, &room_id, output_dir).await?;
    conn.close(&room_id).await;
    Ok(stored)
}

/// Receives a file from a persistent room identified by its minted id. The
/// code phrase still authenticates the peers; the id only routes.
pub async fn receive_persistent(
    room_id: &str,
    code_phrase: &str,
    output_dir: &Path,
    config: &Config,
) -> Result<PathBuf, TransferError> {
    let mut session = Session::new(code_phrase, Role::Receiver);

    let mut conn = Connection::dial(&config.relay_addr, config.timeout).await?;
    conn.send(&Envelope::new(
        MessageType::JoinById,
        room_id,
        &JoinByIdPayload {
            room_id: room_id.to_string(),
        },
    )?)
    .await?;
    expect(&mut conn, MessageType::RoomReady).await?;

    let stored = collect(&mut conn, &mut session, room_id, output_dir).await?;
    conn.close(room_id).await;
    Ok(stored)
}

/// Reads the file and applies the size gate before any network activity.
async fn load_payload(file_path: &Path) -> Result<(String, Vec<u8>), TransferError> {
    let filename = file_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "path has no file name",
            ))
        })?;
    let content = tokio::fs::read(file_path).await?;
    if content.len() > MAX_PAYLOAD_SIZE {
        return Err(TransferError::PayloadTooLarge {
            size: content.len(),
            limit: MAX_PAYLOAD_SIZE,
        });
    }
    Ok((filename, content))
}

/// Sender half of the paired flow: PAKE, encrypt, transmit, await ACK.
async fn transmit(
    conn: &mut Connection,
    session: &mut Session,
    room_id: &str,
    filename: &str,
    content: &[u8],
) -> Result<(), TransferError> {
    let key = exchange_key(conn, session, room_id).await?;

    // Filename and content share the session key; the protocol has no
    // per-field subkeys.
    let enc_filename = cryptography::encrypt(&key[..], filename.as_bytes())?;
    let enc_data = cryptography::encrypt(&key[..], content)?;

    conn.send(&Envelope::new(
        MessageType::Encrypted,
        room_id,
        &EncryptedPayload {
            filename: enc_filename,
            data: enc_data,
            total_parts: 1,
            part_num: 0,
        },
    )?)
    .await?;

    expect(conn, MessageType::Ack).await?;
    Ok(())
}

/// Receiver half: PAKE, receive, decrypt both blobs, store, ACK.
async fn collect(
    conn: &mut Connection,
    session: &mut Session,
    room_id: &str,
    output_dir: &Path,
) -> Result<PathBuf, TransferError> {
    let key = exchange_key(conn, session, room_id).await?;

    let envelope = expect(conn, MessageType::Encrypted).await?;
    let payload: EncryptedPayload = envelope.payload()?;

    // Both blobs must authenticate before anything touches the disk.
    let filename_bytes = cryptography::decrypt(&key[..], &payload.filename)?;
    let content = cryptography::decrypt(&key[..], &payload.data)?;

    let filename = String::from_utf8_lossy(&filename_bytes).into_owned();
    // Only the final component is honored; a peer does not choose directories.
    let filename = Path::new(&filename)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| TransferError::ProtocolViolation("empty filename in payload".into()))?;

    let stored = output_dir.join(&filename);
    tokio::fs::write(&stored, &content).await?;
    info!("stored {} ({} bytes)", stored.display(), content.len());

    conn.send(&Envelope::bare(MessageType::Ack, room_id)).await?;
    Ok(stored)
}

/// Runs the two-message PAKE over the relay and returns the session key.
/// The sender speaks first; the receiver answers only after consuming.
async fn exchange_key(
    conn: &mut Connection,
    session: &mut Session,
    room_id: &str,
) -> Result<Zeroizing<[u8; KEY_SIZE]>, TransferError> {
    match session.role() {
        Role::Sender => {
            conn.send(&Envelope::new(
                MessageType::PakeA,
                room_id,
                &PakePayload {
                    data: session.outbound().to_vec(),
                },
            )?)
            .await?;

            let reply = expect(conn, MessageType::PakeB).await?;
            let payload: PakePayload = reply.payload()?;
            session.consume(&payload.data)?;
        }
        Role::Receiver => {
            let first = expect(conn, MessageType::PakeA).await?;
            let payload: PakePayload = first.payload()?;
            session.consume(&payload.data)?;

            conn.send(&Envelope::new(
                MessageType::PakeB,
                room_id,
                &PakePayload {
                    data: session.outbound().to_vec(),
                },
            )?)
            .await?;
        }
    }
    Ok(Zeroizing::new(session.shared_key()?))
}

/// Receives one envelope and insists on the expected type. Relay errors map
/// to their classified variants; anything else is a fatal protocol
/// violation.
async fn expect(conn: &mut Connection, want: MessageType) -> Result<Envelope, TransferError> {
    let envelope = conn.recv().await?;
    if envelope.kind == want {
        return Ok(envelope);
    }
    match envelope.kind {
        MessageType::Error => Err(classify(&envelope)),
        MessageType::Close => Err(TransferError::Closed),
        other => Err(TransferError::ProtocolViolation(format!(
            "unexpected message type {other}"
        ))),
    }
}

fn classify(envelope: &Envelope) -> TransferError {
    match envelope.payload::<ErrorPayload>() {
        Ok(payload) => TransferError::from_relay_code(&payload.code, payload.message),
        Err(_) => TransferError::ProtocolViolation("malformed error payload".into()),
    }
}
