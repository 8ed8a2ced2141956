use std::error::Error;
use std::path::Path;
use std::time::Duration;

use indicatif::ProgressBar;
use log::debug;
use uuid::Uuid;

use crate::client::{self, Config};

/// Function handler to kickoff receiver logic:
///     - Decide whether the identifier is a room id (persistent) or a code
///       phrase (ephemeral)
///     - Join the room at the relay and run the PAKE handshake
///     - Decrypt and store the payload in the output directory
pub async fn run(
    identifier: &str,
    code: Option<String>,
    output_dir: &str,
    config: Config,
) -> Result<(), Box<dyn Error>> {
    let out = Path::new(output_dir);
    std::fs::create_dir_all(out)?;

    let spinner = ProgressBar::new_spinner();
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message("Waiting to receive file");

    // A room id parses as a UUID; anything else is treated as a code phrase.
    let result = if Uuid::parse_str(identifier).is_ok() {
        debug!("joining persistent room {identifier}");
        let code = code.ok_or("persistent rooms need --code <phrase>")?;
        client::receive_persistent(identifier, &code, out, &config).await
    } else {
        debug!("joining ephemeral room");
        client::receive(identifier, out, &config).await
    };
    spinner.finish_and_clear();

    let stored = result?;
    println!("Received: {}", stored.display());
    println!("Run `talon read {}` to view it safely.", stored.display());
    Ok(())
}
