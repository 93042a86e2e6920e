use crate::config::MAX_FILE_SIZE;
use crate::message::{FileTransfer, format_size};
use std::io;
use std::path::{Path, PathBuf};

/// Directory received files are written to, relative to the working directory.
pub const DOWNLOADS_DIR: &str = "downloads";

/// Reads a whole file into a [`FileTransfer`], refusing anything over the size limit.
pub async fn read_transfer(path: &Path, sender: &str, recipient: &str) -> io::Result<FileTransfer> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?
        .to_string();

    let metadata = tokio::fs::metadata(path).await?;
    if !metadata.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a regular file", path.display()),
        ));
    }
    if metadata.len() > MAX_FILE_SIZE as u64 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "file too large: {} (max {})",
                format_size(metadata.len()),
                format_size(MAX_FILE_SIZE as u64)
            ),
        ));
    }

    let data = tokio::fs::read(path).await?;
    Ok(FileTransfer::new(file_name, data, sender, recipient))
}

/// Writes a received file into `dir`, creating it if needed. Only the final path
/// component of the sender-supplied name is used.
pub async fn save_transfer(dir: &Path, transfer: &FileTransfer) -> io::Result<PathBuf> {
    let file_name = Path::new(transfer.file_name())
        .file_name()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unusable file name '{}'", transfer.file_name()),
            )
        })?;

    tokio::fs::create_dir_all(dir).await?;
    let save_path = dir.join(file_name);
    tokio::fs::write(&save_path, transfer.data()).await?;
    Ok(save_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("studylink-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[tokio::test]
    async fn test_read_then_save_keeps_bytes() {
        let dir = scratch_dir("files-roundtrip");
        std::fs::create_dir_all(&dir).unwrap();
        let source = dir.join("notes.txt");
        std::fs::write(&source, b"lecture 4").unwrap();

        let transfer = read_transfer(&source, "alice", "bob").await.unwrap();
        assert_eq!(transfer.file_name(), "notes.txt");
        assert_eq!(transfer.file_size(), 9);
        assert_eq!(transfer.recipient(), "bob");

        let saved = save_transfer(&dir.join("out"), &transfer).await.unwrap();
        assert_eq!(std::fs::read(&saved).unwrap(), b"lecture 4");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_save_strips_directories_from_name() {
        let dir = scratch_dir("files-traversal");
        let transfer = FileTransfer::new("../../etc/evil.sh", vec![1, 2, 3], "mallory", "bob");

        let saved = save_transfer(&dir, &transfer).await.unwrap();
        assert_eq!(saved, dir.join("evil.sh"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let err = read_transfer(Path::new("/nonexistent/slides.pdf"), "a", "b")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
