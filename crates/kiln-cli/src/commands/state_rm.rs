use super::{resolve_state_path, EXIT_SUCCESS};
use kiln_state::{Manager, StateError};
use std::path::Path;

pub fn run(state: Option<&Path>, name: &str) -> Result<u8, String> {
    let path = resolve_state_path(state, Path::new("."));
    let mut mgr = Manager::new(&path);
    mgr.open_as("rm").map_err(|e| e.to_string())?;

    let removed = mgr
        .document_mut()
        .map_err(|e| e.to_string())?
        .remove_build(name)
        .is_some();
    if !removed {
        // Nothing changed; release without touching the file.
        let _ = mgr.unlock();
        return Err(StateError::NoSuchBuild(name.to_owned()).to_string());
    }

    mgr.close().map_err(|e| e.to_string())?;
    println!("Removed build '{name}' from state");
    Ok(EXIT_SUCCESS)
}
