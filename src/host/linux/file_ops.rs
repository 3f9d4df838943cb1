//! Atomic file operations for systemd unit definitions.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::InstallerError;

/// Write `content` to `path` through a synced temp file and a rename, then set `mode`.
pub(super) fn write_file_atomic(path: &Path, content: &str, mode: u32) -> Result<(), InstallerError> {
    let temp_path = path.with_extension("tmp");

    {
        let mut file = fs::File::create(&temp_path).map_err(|e| {
            InstallerError::System(format!("Failed to create temp file: {}", e))
        })?;

        file.write_all(content.as_bytes())
            .map_err(|e| InstallerError::System(format!("Failed to write temp file: {}", e)))?;

        file.sync_all()
            .map_err(|e| InstallerError::System(format!("Failed to sync temp file: {}", e)))?;
    }

    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&temp_path, fs::Permissions::from_mode(mode)).map_err(|e| {
            InstallerError::System(format!("Failed to set file permissions: {}", e))
        })?;
    }

    fs::rename(&temp_path, path)
        .map_err(|e| InstallerError::System(format!("Failed to rename temp file: {}", e)))?;

    Ok(())
}
