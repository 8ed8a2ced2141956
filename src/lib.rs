pub mod client;
pub mod codephrase;
pub mod commands;
pub mod cryptography;
pub mod error;
pub mod networking;
pub mod pake;
pub mod protocol;
pub mod relay;
pub mod safereader;

pub use client::Config;
pub use error::TransferError;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;

/// Whole payloads are held in memory; anything larger is rejected before dialing.
pub const MAX_PAYLOAD_SIZE: usize = 32 * 1024 * 1024;

pub const DEFAULT_RELAY_ADDR: &str = "127.0.0.1:9440";
pub const DEFAULT_RELAY_PORT: u16 = 9440;

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const INTERACTIVE_TIMEOUT_SECS: u64 = 300;
