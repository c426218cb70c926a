//! Filesystem identity used to follow a log file through renames.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::Metadata;
use std::io;
use std::path::Path;

/// Device id + inode of a file. Stable across renames, so a rotated
/// `rtl_433.log` that becomes `rtl_433.log.1` keeps the same `FileId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId {
    dev: u64,
    ino: u64,
}

impl FileId {
    pub fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    #[cfg(unix)]
    pub fn from_metadata(metadata: &Metadata) -> io::Result<Self> {
        use std::os::unix::fs::MetadataExt;

        Ok(Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }

    #[cfg(not(unix))]
    pub fn from_metadata(_metadata: &Metadata) -> io::Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "file identity requires device and inode numbers",
        ))
    }

    pub async fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        Self::from_metadata(&metadata)
    }

    pub fn dev(&self) -> u64 {
        self.dev
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn same_file_same_id_across_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rtl_433.log");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"{}\n")
            .unwrap();

        let before = FileId::from_path(&path).await.unwrap();
        let rotated = dir.path().join("rtl_433.log.1");
        std::fs::rename(&path, &rotated).unwrap();
        let after = FileId::from_path(&rotated).await.unwrap();

        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn different_files_differ() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.log");
        let b = dir.path().join("b.log");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();

        assert_ne!(
            FileId::from_path(&a).await.unwrap(),
            FileId::from_path(&b).await.unwrap()
        );
    }

    #[test]
    fn display_is_dev_colon_ino() {
        assert_eq!(FileId::new(8, 1234).to_string(), "8:1234");
    }
}
