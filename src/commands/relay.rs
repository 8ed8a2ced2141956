use std::error::Error;

use log::info;

use crate::relay;

/// Runs the relay that coordinates transfers.
///
/// The relay pairs a sender and a receiver into a room keyed by a code-phrase
/// hash or a minted room id, then forwards their envelopes verbatim. It never
/// sees a passphrase, a key, or a plaintext byte.
pub async fn run(port: u16) -> Result<(), Box<dyn Error>> {
    info!("starting relay on port {port}");
    relay::run(port).await?;
    Ok(())
}
