//! Post-export pruning of empty directories.

use std::path::Path;

use tracing::{debug, instrument};

use kbexport_shared::{KbExportError, Result};

/// Remove every directory below `root` that is empty once its own subdirectories
/// have been pruned. `root` itself is kept, and symlinks are never followed.
///
/// Returns the number of directories removed; a second run over the same tree
/// removes nothing.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn prune_empty_dirs(root: &Path) -> Result<usize> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(KbExportError::io(root, e)),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|e| KbExportError::io(root, e))?;
        let file_type = entry.file_type().map_err(|e| KbExportError::io(entry.path(), e))?;
        if file_type.is_dir() {
            prune_dir(&entry.path(), &mut removed)?;
        }
    }

    debug!(removed, "pruned empty directories");
    Ok(removed)
}

/// Prune `dir` bottom-up. Returns whether `dir` itself was removed.
fn prune_dir(dir: &Path, removed: &mut usize) -> Result<bool> {
    let mut remaining = 0usize;

    for entry in std::fs::read_dir(dir).map_err(|e| KbExportError::io(dir, e))? {
        let entry = entry.map_err(|e| KbExportError::io(dir, e))?;
        let file_type = entry.file_type().map_err(|e| KbExportError::io(entry.path(), e))?;

        if file_type.is_dir() && prune_dir(&entry.path(), removed)? {
            continue;
        }
        remaining += 1;
    }

    if remaining > 0 {
        return Ok(false);
    }

    std::fs::remove_dir(dir).map_err(|e| KbExportError::io(dir, e))?;
    *removed += 1;
    debug!(path = %dir.display(), "removed empty directory");
    Ok(true)
}
