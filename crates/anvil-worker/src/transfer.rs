// File transfer engine: byte-exact streaming between the connection and the
// worker's scratch directory.
//
// Filenames come from the controller and are confined to the scratch
// directory: anything carrying a path separator is refused before the
// filesystem is touched. A transfer that moves fewer bytes than promised is a
// recoverable failure, the session drops the connection and the partial file
// stays in place (no rollback).

use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::time::Instant;

use crate::protocol;
use crate::transport::{Connection, TransportError};

/// File transfer failures.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Filename escapes the scratch directory. Recoverable: the connection is
    /// dropped, the controller is not trusted with an explanation.
    #[error("filename '{0}' contains a path separator")]
    Rejected(String),
    /// Requested file cannot be opened; reported to the controller as `-1`,
    /// the connection stays open.
    #[error("file not found")]
    NotFound,
    /// Fewer bytes moved than the header promised. Recoverable.
    #[error("short transfer: expected {expected} bytes, moved {moved}")]
    Short { expected: u64, moved: u64 },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Whether `filename` names a plain entry inside the scratch directory.
pub fn filename_is_safe(filename: &str) -> bool {
    !filename.is_empty() && !filename.chars().any(std::path::is_separator)
}

fn scratch_path(workdir: &Path, filename: &str) -> Result<PathBuf, TransferError> {
    if !filename_is_safe(filename) {
        return Err(TransferError::Rejected(filename.to_string()));
    }
    Ok(workdir.join(filename))
}

/// Receive exactly `length` bytes from the connection into
/// `workdir/filename`, created (or truncated) with the given permission bits.
pub async fn receive_file(
    conn: &mut Connection,
    workdir: &Path,
    filename: &str,
    length: u64,
    mode: u32,
    deadline: Instant,
) -> Result<(), TransferError> {
    let path = scratch_path(workdir, filename)?;

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(mode);
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options.open(&path).await?;
    let moved = conn.stream_to_file(&mut file, length, deadline).await?;
    if moved != length {
        return Err(TransferError::Short {
            expected: length,
            moved,
        });
    }

    tracing::debug!("received file '{filename}' ({length} bytes, mode {mode:o})");
    Ok(())
}

/// Send `workdir/filename` to the connection: the `<size>` header line
/// followed by exactly that many bytes. Returns the size sent.
///
/// A filename that cannot be opened — or that fails the separator check — is
/// `NotFound`, which the session answers with the `-1` reply.
pub async fn send_file(
    conn: &mut Connection,
    workdir: &Path,
    filename: &str,
    deadline: Instant,
) -> Result<u64, TransferError> {
    let path = match scratch_path(workdir, filename) {
        Ok(path) => path,
        Err(_) => return Err(TransferError::NotFound),
    };

    let mut file = match File::open(&path).await {
        Ok(file) => file,
        Err(_) => return Err(TransferError::NotFound),
    };
    let size = file.metadata().await?.len();

    conn.write_line(&protocol::format_file_size(size), deadline)
        .await?;
    let moved = conn.stream_from_file(&mut file, size, deadline).await?;
    if moved != size {
        return Err(TransferError::Short {
            expected: size,
            moved,
        });
    }

    tracing::debug!("sent file '{filename}' ({size} bytes)");
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let deadline = Instant::now() + Duration::from_secs(5);
        let (conn, accepted) = tokio::join!(
            Connection::connect("127.0.0.1", port, None, deadline),
            listener.accept()
        );
        (conn.unwrap(), accepted.unwrap().0)
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[test]
    fn separator_names_are_unsafe() {
        assert!(filename_is_safe("data.bin"));
        assert!(filename_is_safe("..hidden"));
        assert!(!filename_is_safe("../../etc/passwd"));
        assert!(!filename_is_safe("a/b"));
        assert!(!filename_is_safe(""));
    }

    #[tokio::test]
    async fn receive_file_writes_exact_bytes_and_mode() {
        let (mut conn, mut peer) = pair().await;
        let dir = tempfile::tempdir().unwrap();

        let writer = tokio::spawn(async move {
            peer.write_all(b"hello").await.unwrap();
            peer
        });

        receive_file(&mut conn, dir.path(), "x", 5, 0o600, deadline())
            .await
            .unwrap();

        let path = dir.path().join("x");
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o7777, 0o600);
        }
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn receive_file_rejects_separators_without_touching_fs() {
        let (mut conn, _peer) = pair().await;
        let dir = tempfile::tempdir().unwrap();

        let err = receive_file(&mut conn, dir.path(), "../evil", 4, 0o644, deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Rejected(_)));
        assert!(!dir.path().parent().unwrap().join("evil").exists());
    }

    #[tokio::test]
    async fn receive_file_reports_short_transfer() {
        let (mut conn, mut peer) = pair().await;
        let dir = tempfile::tempdir().unwrap();

        peer.write_all(b"abc").await.unwrap();
        drop(peer);

        let err = receive_file(&mut conn, dir.path(), "partial", 10, 0o644, deadline())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::Short {
                expected: 10,
                moved: 3
            }
        ));
        // Partial file is left in place.
        assert_eq!(std::fs::read(dir.path().join("partial")).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn send_file_streams_header_and_body() {
        let (mut conn, mut peer) = pair().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("out"), b"hello").unwrap();

        let reader = tokio::spawn(async move {
            let mut got = Vec::new();
            peer.read_to_end(&mut got).await.unwrap();
            got
        });

        let size = send_file(&mut conn, dir.path(), "out", deadline())
            .await
            .unwrap();
        assert_eq!(size, 5);
        drop(conn);
        assert_eq!(reader.await.unwrap(), b"5\nhello");
    }

    #[tokio::test]
    async fn send_file_missing_is_not_found() {
        let (mut conn, _peer) = pair().await;
        let dir = tempfile::tempdir().unwrap();

        let err = send_file(&mut conn, dir.path(), "absent", deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::NotFound));
    }

    #[tokio::test]
    async fn send_file_separator_is_not_found_without_fs_access() {
        let (mut conn, _peer) = pair().await;
        let dir = tempfile::tempdir().unwrap();

        let err = send_file(&mut conn, dir.path(), "../../etc/passwd", deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::NotFound));
    }
}
