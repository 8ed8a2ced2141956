use std::error::Error;
use std::path::Path;

use crate::safereader;

/// Prints a received file wrapped with untrusted-content markers. With
/// `--tagged`, emits the structured form instead of the banner layout.
pub fn run(path: &str, tagged: bool) -> Result<(), Box<dyn Error>> {
    let content = safereader::read_safe(Path::new(path))?;
    if tagged {
        print!("{}", content.tagged());
    } else {
        print!("{}", content.rendered());
    }
    Ok(())
}
