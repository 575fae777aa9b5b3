//! Atomic config writer.
//!
//! 1. Ensure the parent directory exists.
//! 2. Write to `<path>.boxpilot.tmp`.
//! 3. Rename to the final path (atomic on POSIX, replace-existing on Windows).
//!
//! A failed rename removes the temporary file, so the previous config (if any)
//! stays intact and no partial file is left behind.

use std::path::{Path, PathBuf};

use crate::error::{persist_err, SynthError};

pub fn atomic_write(path: &Path, content: &[u8]) -> Result<(), SynthError> {
    let tmp = PathBuf::from(format!("{}.boxpilot.tmp", path.display()));
    atomic_write_with_tmp(path, content, &tmp)
}

fn atomic_write_with_tmp(path: &Path, content: &[u8], tmp: &Path) -> Result<(), SynthError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| persist_err(parent, e))?;
    }

    if let Err(e) = std::fs::write(tmp, content) {
        let _ = std::fs::remove_file(tmp);
        return Err(persist_err(tmp, e));
    }

    if let Err(e) = std::fs::rename(tmp, path) {
        let _ = std::fs::remove_file(tmp);
        return Err(persist_err(path, e));
    }

    tracing::info!("wrote: {}", path.display());
    Ok(())
}
