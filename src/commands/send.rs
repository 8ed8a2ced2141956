use std::error::Error;
use std::path::Path;
use std::time::Duration;

use indicatif::ProgressBar;
use log::debug;

use crate::client::{self, Config};
use crate::codephrase;

/// Function handler to kickoff sender logic:
///     - Validate the input path
///     - Generate a memorable code phrase to share with the receiver
///     - Open a room at the relay (ephemeral, or persistent with a TTL)
///     - Run the PAKE handshake and stream the encrypted payload
pub async fn run(
    file_path: &str,
    persistent: bool,
    ttl_hours: i64,
    config: Config,
) -> Result<(), Box<dyn Error>> {
    let path = Path::new(file_path);
    if !path.exists() {
        return Err(format!("path does not exist: {file_path}").into());
    }

    let code = codephrase::generate();
    println!("Code phrase: \x1b[4m\x1b[1m{code}\x1b[0m");

    if persistent {
        debug!("sending {file_path} via persistent room (ttl {ttl_hours}h)");
        client::send_persistent(path, &code, ttl_hours, &config, |room_id| {
            println!("Room id: {room_id}");
            println!("Share with the receiver:");
            println!("    talon receive {room_id} --code {code}");
            println!("Waiting for receiver to connect...");
        })
        .await?;
    } else {
        debug!("sending {file_path} via ephemeral room");
        let spinner = ProgressBar::new_spinner();
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner.set_message("Waiting for receiver");

        let result = client::send(path, &code, &config).await;
        spinner.finish_and_clear();
        result?;
    }

    println!("Transfer complete!");
    Ok(())
}
