//! Content hashing for templates and auxiliary source files.
//!
//! Hashes are rendered as `"sha256:" + lowercase hex` everywhere they appear
//! on disk, so equality checks can compare the strings directly.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use std::path::Path;

/// Hash a file's content in a single streaming pass.
pub fn hash_file(path: impl AsRef<Path>) -> Result<String, io::Error> {
    let mut f = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut f, &mut hasher)?;
    Ok(format!("sha256:{:x}", hasher.finalize()))
}

pub fn hash_string(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    format!("sha256:{:x}", hasher.finalize())
}
