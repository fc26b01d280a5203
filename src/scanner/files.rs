//! Access to the files a scan pass has listed

use std::future::Future;
use std::io;
use std::path::Path;

use tokio::fs;

/// Reads and deletes image files by path
pub trait ImageFiles: Send + Sync {
    /// Read a whole file
    fn read(&self, path: &Path) -> impl Future<Output = io::Result<Vec<u8>>> + Send;

    /// Delete a file
    fn remove(&self, path: &Path) -> impl Future<Output = io::Result<()>> + Send;
}

/// Files on the local disk
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskFiles;

impl ImageFiles for DiskFiles {
    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path).await
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disk_files_read_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        std::fs::write(&path, b"jpeg").unwrap();

        assert_eq!(DiskFiles.read(&path).await.unwrap(), b"jpeg");
        DiskFiles.remove(&path).await.unwrap();
        assert!(!path.exists());
        assert_eq!(
            DiskFiles.remove(&path).await.unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }
}
