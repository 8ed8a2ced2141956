//! # Commands Module
//!
//! Thin handlers behind the CLI surface:
//!
//! ## `send`
//! Shares a file: generates a code phrase, opens an ephemeral or persistent
//! room at the relay, and streams the encrypted payload to the peer.
//!
//! ## `receive`
//! Fetches a shared file using the code phrase (ephemeral) or a room id plus
//! code (persistent) and stores it in the output directory.
//!
//! ## `relay`
//! Runs the rendezvous relay that pairs peers into rooms and forwards their
//! encrypted traffic without being able to read it.
//!
//! ## `read`
//! Prints a received file wrapped with untrusted-content markers and
//! prompt-injection warnings.

pub mod read;
pub mod receive;
pub mod relay;
pub mod send;
