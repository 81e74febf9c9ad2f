//! Paged file storage with a shared buffer pool.
//!
//! A file is an array of 16 KiB pages. Page 0 is the file header: a magic
//! word, the page count and an allocation bitmap. Every other page is
//! whatever its owner makes of it (record page, B+tree node, TEXT overflow).
//!
//! Frames wrap an in-memory page buffer behind a reader/writer latch and a
//! pin count. `get_this_page`/`allocate_page` hand back pinned frames;
//! callers unpin when done. Dirty frames are written back on eviction and on
//! `flush_all_pages`.

use crate::rc::{DbError, Result};
use crate::util;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use rustc_hash::FxHashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

/// Size of every page in bytes.
pub const PAGE_SIZE: usize = 16 * 1024;

/// Page number that never names a real page.
pub const INVALID_PAGE_NUM: u32 = u32::MAX;

const HEADER_MAGIC: u32 = 0x4D44_4231; // "MDB1"
const BITMAP_OFF: usize = 8;
/// Pages addressable by the header bitmap.
const MAX_PAGES: usize = (PAGE_SIZE - BITMAP_OFF) * 8;

/// Cached frames above this count trigger eviction of unpinned pages.
const FRAME_CAPACITY: usize = 1024;

/// An in-memory page. The latch is the page latch of the concurrency model;
/// the pin count keeps the frame resident while a caller holds it.
pub struct Frame {
    page_num: u32,
    data: RwLock<Box<[u8]>>,
    dirty: AtomicBool,
    pins: AtomicI32,
}

/// Shared handle to a frame.
pub type FramePtr = Arc<Frame>;

impl Frame {
    fn new(page_num: u32, data: Box<[u8]>) -> FramePtr {
        Arc::new(Frame {
            page_num,
            data: RwLock::new(data),
            dirty: AtomicBool::new(false),
            pins: AtomicI32::new(0),
        })
    }

    /// Page number of this frame.
    pub fn page_num(&self) -> u32 {
        self.page_num
    }

    /// Acquire the read latch; released when the guard drops.
    pub fn read(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.data.read()
    }

    /// Acquire the write latch; released when the guard drops.
    pub fn write(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.data.write()
    }

    /// Note that the page content changed and must be written back.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Whether the frame holds unwritten changes.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn pin(&self) {
        self.pins.fetch_add(1, Ordering::AcqRel);
    }

    /// Release one pin. The frame becomes evictable at zero.
    pub fn unpin(&self) {
        self.pins.fetch_sub(1, Ordering::AcqRel);
    }

    fn pin_count(&self) -> i32 {
        self.pins.load(Ordering::Acquire)
    }
}

struct Header {
    page_count: u32,
    bitmap: Vec<u8>,
    dirty: bool,
}

/// Buffer pool over one file.
pub struct DiskBufferPool {
    path: PathBuf,
    file: Mutex<File>,
    frames: Mutex<FxHashMap<u32, FramePtr>>,
    header: Mutex<Header>,
}

impl DiskBufferPool {
    /// Open (or create) the file at `path` and load its header page.
    pub fn open_file(path: &Path) -> Result<Arc<DiskBufferPool>> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| DbError::IoOpen { path: path.display().to_string(), source: e })?;
        let len = file.metadata().map_err(DbError::IoRead)?.len();

        let header = if len == 0 {
            // Fresh file: header page with only page 0 allocated.
            let mut bitmap = vec![0u8; PAGE_SIZE - BITMAP_OFF];
            util::set_bit(&mut bitmap, 0);
            Header { page_count: 1, bitmap, dirty: true }
        } else {
            let mut buf = vec![0u8; PAGE_SIZE];
            file.seek(SeekFrom::Start(0)).map_err(DbError::IoRead)?;
            file.read_exact(&mut buf).map_err(DbError::IoRead)?;
            if util::getu32(&buf, 0) != HEADER_MAGIC {
                return Err(DbError::IoOpen {
                    path: path.display().to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::InvalidData, "bad file header"),
                });
            }
            Header {
                page_count: util::getu32(&buf, 4),
                bitmap: buf[BITMAP_OFF..].to_vec(),
                dirty: false,
            }
        };

        let pool = Arc::new(DiskBufferPool {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            frames: Mutex::new(FxHashMap::default()),
            header: Mutex::new(header),
        });
        pool.flush_header()?;
        log::debug!("opened buffer pool file {}", pool.path.display());
        Ok(pool)
    }

    /// Number of pages the file spans, header page included.
    pub fn page_count(&self) -> u32 {
        self.header.lock().page_count
    }

    /// Is `page_num` currently allocated?
    pub fn is_allocated(&self, page_num: u32) -> bool {
        let h = self.header.lock();
        (page_num as usize) < MAX_PAGES
            && page_num < h.page_count
            && util::get_bit(&h.bitmap, page_num as usize)
    }

    /// Allocate a fresh zeroed page and return its pinned frame.
    pub fn allocate_page(&self) -> Result<FramePtr> {
        let page_num = {
            let mut h = self.header.lock();
            let n = match util::next_clear_bit(&h.bitmap, 1, h.page_count as usize) {
                Some(n) => n,
                None => {
                    let n = h.page_count as usize;
                    if n >= MAX_PAGES {
                        return Err(DbError::Nomem);
                    }
                    h.page_count += 1;
                    n
                }
            };
            util::set_bit(&mut h.bitmap, n);
            h.dirty = true;
            n as u32
        };

        let frame = Frame::new(page_num, vec![0u8; PAGE_SIZE].into_boxed_slice());
        frame.mark_dirty();
        frame.pin();
        self.insert_frame(frame.clone())?;
        log::trace!("allocated page {} in {}", page_num, self.path.display());
        Ok(frame)
    }

    /// Fetch an existing page as a pinned frame, reading from disk on miss.
    pub fn get_this_page(&self, page_num: u32) -> Result<FramePtr> {
        if page_num == 0 || !self.is_allocated(page_num) {
            return Err(DbError::RecordInvalidRid);
        }
        if let Some(frame) = self.frames.lock().get(&page_num) {
            frame.pin();
            return Ok(frame.clone());
        }

        let mut buf = vec![0u8; PAGE_SIZE];
        {
            let mut file = self.file.lock();
            let off = page_num as u64 * PAGE_SIZE as u64;
            let len = file.metadata().map_err(DbError::IoRead)?.len();
            if off < len {
                file.seek(SeekFrom::Start(off)).map_err(DbError::IoRead)?;
                let avail = ((len - off) as usize).min(PAGE_SIZE);
                file.read_exact(&mut buf[..avail]).map_err(DbError::IoRead)?;
            }
        }
        let frame = Frame::new(page_num, buf.into_boxed_slice());
        frame.pin();
        self.insert_frame(frame.clone())?;
        Ok(frame)
    }

    /// Release a frame obtained from this pool.
    pub fn unpin_page(&self, frame: &FramePtr) {
        frame.unpin();
    }

    /// Free a page. Its content is discarded.
    pub fn dispose_page(&self, page_num: u32) -> Result<()> {
        if page_num == 0 {
            return Err(DbError::InvalidArgument("cannot dispose header page".into()));
        }
        self.frames.lock().remove(&page_num);
        let mut h = self.header.lock();
        util::clear_bit(&mut h.bitmap, page_num as usize);
        h.dirty = true;
        Ok(())
    }

    /// Re-mark a page as allocated (recovery path).
    pub fn recover_page(&self, page_num: u32) -> Result<()> {
        let mut h = self.header.lock();
        if page_num as usize >= MAX_PAGES {
            return Err(DbError::InvalidArgument("page number out of range".into()));
        }
        if page_num >= h.page_count {
            h.page_count = page_num + 1;
        }
        util::set_bit(&mut h.bitmap, page_num as usize);
        h.dirty = true;
        Ok(())
    }

    /// Write every dirty frame and the header back to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        let frames: Vec<FramePtr> = self.frames.lock().values().cloned().collect();
        for frame in frames {
            self.flush_frame(&frame)?;
        }
        self.flush_header()?;
        self.file.lock().flush().map_err(DbError::IoWrite)?;
        Ok(())
    }

    /// Pages of this pool in ascending order, starting from page 1.
    pub fn iter_pages(self: &Arc<Self>) -> BufferPoolIterator {
        BufferPoolIterator { pool: self.clone(), next: 1 }
    }

    fn insert_frame(&self, frame: FramePtr) -> Result<()> {
        let mut frames = self.frames.lock();
        frames.insert(frame.page_num(), frame);
        if frames.len() > FRAME_CAPACITY {
            // Evict an arbitrary unpinned frame; write it out first if dirty.
            let victim = frames
                .values()
                .find(|f| f.pin_count() == 0)
                .cloned();
            if let Some(victim) = victim {
                drop(frames);
                self.flush_frame(&victim)?;
                self.frames.lock().remove(&victim.page_num());
            }
        }
        Ok(())
    }

    fn flush_frame(&self, frame: &FramePtr) -> Result<()> {
        if !frame.is_dirty() {
            return Ok(());
        }
        let data = frame.read();
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(frame.page_num() as u64 * PAGE_SIZE as u64))
            .map_err(DbError::IoWrite)?;
        file.write_all(&data).map_err(DbError::IoWrite)?;
        frame.dirty.store(false, Ordering::Release);
        Ok(())
    }

    fn flush_header(&self) -> Result<()> {
        let mut h = self.header.lock();
        if !h.dirty {
            return Ok(());
        }
        let mut buf = vec![0u8; PAGE_SIZE];
        util::setu32(&mut buf, 0, HEADER_MAGIC);
        util::setu32(&mut buf, 4, h.page_count);
        buf[BITMAP_OFF..].copy_from_slice(&h.bitmap);
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0)).map_err(DbError::IoWrite)?;
        file.write_all(&buf).map_err(DbError::IoWrite)?;
        h.dirty = false;
        Ok(())
    }
}

impl Drop for DiskBufferPool {
    fn drop(&mut self) {
        if let Err(e) = self.flush_all_pages() {
            log::warn!("flush on close failed for {}: {}", self.path.display(), e);
        }
    }
}

/// Yields allocated page numbers in ascending order, starting from 1.
pub struct BufferPoolIterator {
    pool: Arc<DiskBufferPool>,
    next: u32,
}

impl Iterator for BufferPoolIterator {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let count = self.pool.page_count();
        while self.next < count {
            let n = self.next;
            self.next += 1;
            if self.pool.is_allocated(n) {
                return Some(n);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_pool(name: &str) -> (tempfile::TempDir, Arc<DiskBufferPool>) {
        let dir = tempfile::tempdir().unwrap();
        let pool = DiskBufferPool::open_file(&dir.path().join(name)).unwrap();
        (dir, pool)
    }

    #[test]
    fn allocate_write_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.data");
        let (p1, p2);
        {
            let pool = DiskBufferPool::open_file(&path).unwrap();
            let f1 = pool.allocate_page().unwrap();
            let f2 = pool.allocate_page().unwrap();
            p1 = f1.page_num();
            p2 = f2.page_num();
            assert_ne!(p1, p2);
            {
                let mut d = f1.write();
                d[0] = 0xAB;
                d[PAGE_SIZE - 1] = 0xCD;
            }
            f1.mark_dirty();
            pool.unpin_page(&f1);
            pool.unpin_page(&f2);
            pool.flush_all_pages().unwrap();
        }
        let pool = DiskBufferPool::open_file(&path).unwrap();
        let f = pool.get_this_page(p1).unwrap();
        {
            let d = f.read();
            assert_eq!(d[0], 0xAB);
            assert_eq!(d[PAGE_SIZE - 1], 0xCD);
        }
        pool.unpin_page(&f);
    }

    #[test]
    fn dispose_and_reuse() {
        let (_dir, pool) = temp_pool("r.data");
        let f1 = pool.allocate_page().unwrap();
        let n1 = f1.page_num();
        pool.unpin_page(&f1);
        pool.dispose_page(n1).unwrap();
        assert!(!pool.is_allocated(n1));
        // Freed page number is reused before the file grows.
        let f2 = pool.allocate_page().unwrap();
        assert_eq!(f2.page_num(), n1);
        pool.unpin_page(&f2);
    }

    #[test]
    fn page_iterator_skips_holes() {
        let (_dir, pool) = temp_pool("i.data");
        let mut nums = Vec::new();
        for _ in 0..4 {
            let f = pool.allocate_page().unwrap();
            nums.push(f.page_num());
            pool.unpin_page(&f);
        }
        pool.dispose_page(nums[1]).unwrap();
        let seen: Vec<u32> = pool.iter_pages().collect();
        assert_eq!(seen, vec![nums[0], nums[2], nums[3]]);
    }
}
