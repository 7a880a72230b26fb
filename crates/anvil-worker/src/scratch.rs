// Scratch directory handling.
//
// All file transfers and command execution happen inside a scratch directory.
// Batch systems hand one down through the environment; otherwise the worker
// makes its own uid/pid-qualified directory under /tmp so concurrent workers
// on one host never collide.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

/// Environment variable naming a scratch directory provided by the batch
/// system the worker runs under.
pub const SCRATCH_ENV: &str = "_CONDOR_SCRATCH_DIR";

/// Pick, create if needed, and enter the scratch directory. Returns the
/// directory entered.
pub fn enter_scratch_dir() -> Result<PathBuf> {
    if let Ok(dir) = env::var(SCRATCH_ENV) {
        if !dir.is_empty() {
            let path = PathBuf::from(dir);
            env::set_current_dir(&path)
                .with_context(|| format!("cannot enter scratch directory '{}'", path.display()))?;
            return Ok(path);
        }
    }

    let path = default_scratch_path();
    create_private_dir(&path)
        .with_context(|| format!("cannot create scratch directory '{}'", path.display()))?;
    env::set_current_dir(&path)
        .with_context(|| format!("cannot enter scratch directory '{}'", path.display()))?;
    Ok(path)
}

/// The fallback scratch location: `/tmp/worker-<uid>-<pid>`.
pub fn default_scratch_path() -> PathBuf {
    PathBuf::from(format!("/tmp/worker-{}-{}", current_uid(), std::process::id()))
}

#[cfg(unix)]
fn current_uid() -> u32 {
    nix::unistd::Uid::current().as_raw()
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
    0
}

#[cfg(unix)]
fn create_private_dir(path: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true).mode(0o700);
    builder.create(path)
}

#[cfg(not(unix))]
fn create_private_dir(path: &std::path::Path) -> std::io::Result<()> {
    std::fs::DirBuilder::new().recursive(true).create(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_path_is_uid_and_pid_qualified() {
        let path = default_scratch_path();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(path.starts_with("/tmp"));
        assert_eq!(
            name,
            format!("worker-{}-{}", current_uid(), std::process::id())
        );
    }

    #[cfg(unix)]
    #[test]
    fn private_dir_mode() {
        use std::os::unix::fs::PermissionsExt;
        let base = tempfile::tempdir().unwrap();
        let path = base.path().join("scratch");
        create_private_dir(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}
