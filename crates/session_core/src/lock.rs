use std::{fs, io, path::Path};

/// Removes a lock artifact left by an unclean shutdown of the session's
/// browser profile. Returns whether something was removed.
///
/// The artifact is usually a symlink to a host/pid pair that no longer
/// exists, so presence is checked without following links.
pub fn remove_stale_lock(path: &Path) -> io::Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(_) => {
            fs::remove_file(path)?;
            Ok(true)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
#[path = "tests/lock_tests.rs"]
mod tests;
