//! Page-level access to the database file.
//!
//! The pager is the only thing in this crate that talks to the filesystem.
//! It hands out pinned, mutable views of individual pages (`PageGuard`) and
//! tracks which ones have been written to since the last `flush`. It knows
//! nothing about cells, node types, or B-Trees; that is the storage layer's
//! job, built on top.
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::err;
use crate::errors::Error;
use tracing::{debug, warn};

pub type PageNum = u32;

pub const DEFAULT_PAGE_SIZE: u16 = 4096;
pub const FILE_HEADER_SIZE: usize = 100;

struct PageFrame {
    data: Vec<u8>,
    dirty: bool,
}

/// A pinned, exclusively-held view of one page's bytes.
///
/// Only one `PageGuard` for a given page may exist at a time; a second
/// `Pager::get` for the same page while the first guard is alive fails
/// with `Error::LockTable` rather than blocking.
pub struct PageGuard<'a> {
    inner: MutexGuard<'a, PageFrame>,
}

impl<'a> PageGuard<'a> {
    pub fn data(&self) -> &[u8] {
        &self.inner.data
    }

    /// Marks the page dirty; `flush` will write it back.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.inner.dirty = true;
        &mut self.inner.data
    }
}

pub struct Pager {
    file: File,
    page_size: u16,
    num_pages: u32,
    pages: HashMap<PageNum, Arc<Mutex<PageFrame>>>,
}

impl Pager {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(Pager {
            file,
            page_size: DEFAULT_PAGE_SIZE,
            num_pages: 0,
            pages: HashMap::new(),
        })
    }

    pub fn page_size(&self) -> u16 {
        self.page_size
    }

    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    /// Adopts `page_size` and recomputes the page count from the file's
    /// current length. Call once, before any `get`/`allocate_page`, right
    /// after `open` decides whether this is a fresh or existing file.
    pub fn set_page_size(&mut self, page_size: u16) -> Result<(), Error> {
        self.page_size = page_size;
        let len = self.file.metadata()?.len();
        self.num_pages = (len / page_size as u64) as u32;
        Ok(())
    }

    /// Reads the raw 100-byte file header, or `None` if the file is too
    /// short to contain one (a brand new, empty file).
    pub fn read_header(&mut self) -> Result<Option<[u8; FILE_HEADER_SIZE]>, Error> {
        let len = self.file.metadata()?.len();
        if len < FILE_HEADER_SIZE as u64 {
            return Ok(None);
        }
        let mut buf = [0u8; FILE_HEADER_SIZE];
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_exact(&mut buf)?;
        Ok(Some(buf))
    }

    /// Allocates a new page at the end of the file. Allocation is
    /// monotonic: there is no free-page list, so pages freed by higher
    /// layers (there are none yet) cannot be recycled.
    pub fn allocate_page(&mut self) -> Result<PageNum, Error> {
        self.num_pages += 1;
        let npage = self.num_pages;
        let frame = PageFrame {
            data: vec![0u8; self.page_size as usize],
            dirty: true,
        };
        self.pages.insert(npage, Arc::new(Mutex::new(frame)));
        debug!(page = npage, "Allocated new page");
        Ok(npage)
    }

    fn ensure_loaded(&mut self, npage: PageNum) -> Result<(), Error> {
        if self.pages.contains_key(&npage) {
            return Ok(());
        }
        if npage == 0 || npage > self.num_pages {
            warn!(page = npage, num_pages = self.num_pages, "Rejected out-of-range page");
            return Err(err!(
                PageNo,
                "page {} is out of range (file has {} pages)",
                npage,
                self.num_pages
            ));
        }
        let mut data = vec![0u8; self.page_size as usize];
        self.file
            .seek(SeekFrom::Start((npage - 1) as u64 * self.page_size as u64))?;
        self.file.read_exact(&mut data)?;
        self.pages
            .insert(npage, Arc::new(Mutex::new(PageFrame { data, dirty: false })));
        Ok(())
    }

    /// Pins `npage`, loading it from disk on first access.
    pub fn get(&mut self, npage: PageNum) -> Result<PageGuard<'_>, Error> {
        self.ensure_loaded(npage)?;
        let frame = self
            .pages
            .get(&npage)
            .ok_or_else(|| err!(PageNo, "page {} vanished from cache after loading", npage))?;
        let inner = frame
            .try_lock()
            .map_err(|_| err!(LockTable, "page {} is already pinned", npage))?;
        Ok(PageGuard { inner })
    }

    /// Writes every dirty page back to the file, in page-number order.
    pub fn flush(&mut self) -> Result<(), Error> {
        let page_size = self.page_size as u64;
        let Pager { file, pages, .. } = self;
        let mut npages: Vec<PageNum> = pages.keys().copied().collect();
        npages.sort_unstable();
        let mut written = 0u32;
        for npage in npages {
            let frame = &pages[&npage];
            let mut guard = frame
                .lock()
                .map_err(|_| err!(LockTable, "page {} lock poisoned", npage))?;
            if guard.dirty {
                file.seek(SeekFrom::Start((npage - 1) as u64 * page_size))?;
                file.write_all(&guard.data)?;
                guard.dirty = false;
                written += 1;
            }
        }
        file.flush()?;
        debug!(written, "Flushed pages");
        Ok(())
    }

    pub fn close(mut self) -> Result<(), Error> {
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn fresh_file_has_no_header_and_zero_pages() {
        let tmp = NamedTempFile::new().unwrap();
        let mut pager = Pager::open(tmp.path()).unwrap();
        assert!(pager.read_header().unwrap().is_none());
        pager.set_page_size(DEFAULT_PAGE_SIZE).unwrap();
        assert_eq!(pager.num_pages(), 0);
    }

    #[test]
    fn allocate_and_flush_round_trips_through_disk() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let mut pager = Pager::open(tmp.path()).unwrap();
            pager.set_page_size(512).unwrap();
            let npage = pager.allocate_page().unwrap();
            assert_eq!(npage, 1);
            {
                let mut guard = pager.get(npage).unwrap();
                guard.data_mut()[0] = 0xAB;
            }
            pager.flush().unwrap();
        }
        {
            let mut pager = Pager::open(tmp.path()).unwrap();
            pager.set_page_size(512).unwrap();
            assert_eq!(pager.num_pages(), 1);
            let guard = pager.get(1).unwrap();
            assert_eq!(guard.data()[0], 0xAB);
        }
    }

    #[test]
    fn pinning_a_page_twice_fails_instead_of_deadlocking() {
        let tmp = NamedTempFile::new().unwrap();
        let mut pager = Pager::open(tmp.path()).unwrap();
        pager.set_page_size(512).unwrap();
        pager.allocate_page().unwrap();
        let _first = pager.get(1).unwrap();
        assert!(pager.get(1).is_err());
    }

    #[test]
    fn out_of_range_page_is_rejected() {
        let tmp = NamedTempFile::new().unwrap();
        let mut pager = Pager::open(tmp.path()).unwrap();
        pager.set_page_size(512).unwrap();
        assert!(pager.get(1).is_err());
    }
}
