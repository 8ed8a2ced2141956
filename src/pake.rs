use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use spake2::{Ed25519Group, Identity, Password, Spake2};
use thiserror::Error;
use zeroize::Zeroize;

use crate::cryptography;
use crate::KEY_SIZE;

const SIDE_SENDER: &[u8] = b"talon-sender";
const SIDE_RECEIVER: &[u8] = b"talon-receiver";
const KEY_INFO: &[u8] = b"talon-file-encryption";

/// Which side of the exchange this party plays. The sender speaks first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PakeError {
    #[error("invalid PAKE message from peer")]
    InvalidMessage,

    #[error("PAKE key exchange failed")]
    KeyExchangeFailed,
}

/// One passphrase-authenticated key exchange.
///
/// Each party constructs a session from the shared code phrase, sends
/// [`outbound`](Session::outbound) to the peer, feeds the peer's message to
/// [`consume`](Session::consume), and then reads the derived key from
/// [`shared_key`](Session::shared_key). A wrong passphrase is not detectable
/// here; it surfaces as an authentication failure on the first decrypt.
///
/// The derived key is zeroized when the session drops.
pub struct Session {
    role: Role,
    code_hash: [u8; 32],
    state: Option<Spake2<Ed25519Group>>,
    outbound: Vec<u8>,
    key: Option<[u8; KEY_SIZE]>,
}

impl Session {
    pub fn new(code_phrase: &str, role: Role) -> Self {
        // The relay only ever sees this hash, never the phrase itself.
        let code_hash = cryptography::sha256(code_phrase.as_bytes());

        let password = Password::new(code_phrase.as_bytes());
        let id_sender = Identity::new(SIDE_SENDER);
        let id_receiver = Identity::new(SIDE_RECEIVER);
        let (state, outbound) = match role {
            Role::Sender => Spake2::<Ed25519Group>::start_a(&password, &id_sender, &id_receiver),
            Role::Receiver => Spake2::<Ed25519Group>::start_b(&password, &id_sender, &id_receiver),
        };

        Session {
            role,
            code_hash,
            state: Some(state),
            outbound,
            key: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// SHA-256 of the code phrase; identical on both sides of a transfer.
    pub fn code_hash(&self) -> [u8; 32] {
        self.code_hash
    }

    /// URL-safe base64 rendering of the code hash, used as the ephemeral
    /// room identifier.
    pub fn code_hash_string(&self) -> String {
        URL_SAFE.encode(self.code_hash)
    }

    /// The PAKE message this party sends to its peer.
    pub fn outbound(&self) -> &[u8] {
        &self.outbound
    }

    /// Feeds the peer's PAKE message and derives the shared key.
    ///
    /// Fails on malformed or replayed messages; after a failure the session
    /// is spent and [`shared_key`](Session::shared_key) reports
    /// `KeyExchangeFailed`.
    pub fn consume(&mut self, inbound: &[u8]) -> Result<(), PakeError> {
        let state = self.state.take().ok_or(PakeError::InvalidMessage)?;
        let mut secret = state
            .finish(inbound)
            .map_err(|_| PakeError::KeyExchangeFailed)?;
        self.key = Some(cryptography::derive_key(&secret, None, KEY_INFO));
        secret.zeroize();
        Ok(())
    }

    /// The 32-byte session key, available once the exchange has completed.
    pub fn shared_key(&self) -> Result<[u8; KEY_SIZE], PakeError> {
        self.key.ok_or(PakeError::KeyExchangeFailed)
    }

    pub fn is_complete(&self) -> bool {
        self.key.is_some()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(key) = self.key.as_mut() {
            key.zeroize();
        }
    }
}
