use super::{resolve_state_path, EXIT_SUCCESS};
use kiln_state::force_unlock;
use std::path::Path;

/// The only supported recovery from a lock abandoned by a dead process.
pub fn run(state: Option<&Path>) -> Result<u8, String> {
    let path = resolve_state_path(state, Path::new("."));
    force_unlock(&path).map_err(|e| e.to_string())?;
    println!("Released lock for {}", path.display());
    Ok(EXIT_SUCCESS)
}
