//! Disk manager - low-level persistent page I/O.
//!
//! The disk manager moves whole pages between a database file and caller
//! buffers, synchronously. The buffer pool is its only client; everything
//! above the buffer pool sees pages, never files.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use ember_common::{PageId, PAGE_SIZE};
use parking_lot::Mutex;

/// Synchronous page-granular I/O.
///
/// `read_page` must fill the entire buffer: pages that have never been
/// written read back as zeros. The buffer pool relies on this when it
/// reads a freshly allocated page.
pub trait DiskManager: Send + Sync {
    /// Reads page `page_id` into `buf` (`PAGE_SIZE` bytes).
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> io::Result<()>;

    /// Writes `data` (`PAGE_SIZE` bytes) to page `page_id`.
    fn write_page(&self, page_id: PageId, data: &[u8]) -> io::Result<()>;

    /// Releases page `page_id` on disk.
    ///
    /// The default file implementation does not reclaim space; the hook
    /// exists so smarter disk managers can.
    fn deallocate_page(&self, page_id: PageId);
}

/// Disk manager backed by a single database file.
///
/// Page `p` lives at byte offset `p * PAGE_SIZE`.
pub struct FileDiskManager {
    file: Mutex<File>,
    path: PathBuf,
    num_pages: AtomicU64,
}

impl FileDiskManager {
    /// Opens (or creates) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let size = file.metadata()?.len();
        let num_pages = size.div_ceil(PAGE_SIZE as u64);

        Ok(Self {
            file: Mutex::new(file),
            path,
            num_pages: AtomicU64::new(num_pages),
        })
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of pages the file currently spans.
    #[must_use]
    pub fn num_pages(&self) -> u64 {
        self.num_pages.load(Ordering::Relaxed)
    }

    fn check_buffer(buf: &[u8]) -> io::Result<()> {
        if buf.len() != PAGE_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "buffer size must equal PAGE_SIZE",
            ));
        }
        Ok(())
    }
}

impl DiskManager for FileDiskManager {
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> io::Result<()> {
        Self::check_buffer(buf)?;

        // Pages beyond the end of the file have never been written; they
        // read back as zeros.
        if u64::from(page_id.as_u32()) >= self.num_pages() {
            buf.fill(0);
            return Ok(());
        }

        let offset = u64::from(page_id.as_u32()) * PAGE_SIZE as u64;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut read = 0;
        while read < PAGE_SIZE {
            match file.read(&mut buf[read..]) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        // Short read at the tail of the file: the rest of the page is zeros.
        buf[read..].fill(0);
        Ok(())
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> io::Result<()> {
        Self::check_buffer(data)?;

        let offset = u64::from(page_id.as_u32()) * PAGE_SIZE as u64;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;

        let end = u64::from(page_id.as_u32()) + 1;
        self.num_pages.fetch_max(end, Ordering::Relaxed);
        Ok(())
    }

    fn deallocate_page(&self, _page_id: PageId) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn unwritten_pages_read_as_zeros() {
        let dir = tempdir().unwrap();
        let disk = FileDiskManager::open(dir.path().join("test.db")).unwrap();

        let mut buf = vec![0xAAu8; PAGE_SIZE];
        disk.read_page(PageId::new(7), &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn write_then_read_round_trip() {
        let dir = tempdir().unwrap();
        let disk = FileDiskManager::open(dir.path().join("test.db")).unwrap();

        let mut data = vec![0u8; PAGE_SIZE];
        data[0..5].copy_from_slice(b"ember");
        data[PAGE_SIZE - 1] = 0xFF;
        disk.write_page(PageId::new(3), &data).unwrap();

        let mut buf = vec![0u8; PAGE_SIZE];
        disk.read_page(PageId::new(3), &mut buf).unwrap();
        assert_eq!(buf, data);

        // Page 3 written means the file spans four pages.
        assert_eq!(disk.num_pages(), 4);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let mut data = vec![0u8; PAGE_SIZE];
        data[100] = 42;
        {
            let disk = FileDiskManager::open(&path).unwrap();
            disk.write_page(PageId::new(0), &data).unwrap();
        }

        let disk = FileDiskManager::open(&path).unwrap();
        let mut buf = vec![0u8; PAGE_SIZE];
        disk.read_page(PageId::new(0), &mut buf).unwrap();
        assert_eq!(buf[100], 42);
    }

    #[test]
    fn rejects_wrong_buffer_size() {
        let dir = tempdir().unwrap();
        let disk = FileDiskManager::open(dir.path().join("test.db")).unwrap();

        let mut small = vec![0u8; 16];
        assert!(disk.read_page(PageId::new(0), &mut small).is_err());
        assert!(disk.write_page(PageId::new(0), &small).is_err());
    }
}
