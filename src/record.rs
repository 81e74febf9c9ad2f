//! Heap record storage: slotted record pages with a liveness bitmap, the
//! record file handler that manages them inside one buffer-pool file, and
//! the TEXT overflow chains that spill long text out of fixed-width slots.
//!
//! Page layout (record page):
//! `PageHeader{record_num, column_num, record_real_size, record_size,
//! record_capacity, col_idx_offset, data_offset}` + bitmap + (PAX column
//! index) + slot data. A TEXT overflow page instead starts with
//! `{page_type=2, next_page, data_length, total_length}` and carries raw
//! payload for the rest of the page.

use crate::buffer::{DiskBufferPool, FramePtr, INVALID_PAGE_NUM, PAGE_SIZE};
use crate::rc::{DbError, Result};
use crate::table::{StorageFormat, TableMeta};
use crate::types::AttrType;
use crate::util;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Record identifier: page number and slot within the page.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rid {
    pub page_num: u32,
    pub slot_num: u32,
}

impl Rid {
    pub fn new(page_num: u32, slot_num: u32) -> Rid {
        Rid { page_num, slot_num }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.page_num, self.slot_num)
    }
}

/// A row as raw bytes. After a read the buffer is at least `record_size`
/// long; overflowed TEXT fields extend it past `record_size` (see
/// [`TEXT_EXTENSION_MAGIC`]).
#[derive(Clone, Debug, Default)]
pub struct Record {
    pub rid: Rid,
    pub data: Vec<u8>,
}

impl Record {
    pub fn new(rid: Rid, data: Vec<u8>) -> Record {
        Record { rid, data }
    }
}

/// Byte filled across a whole field to represent NULL.
pub const NULL_FIELD_BYTE: u8 = 0xFF;

/// Size of the record page header.
pub const PAGE_HEADER_SIZE: usize = 28;

/// First word of a TEXT overflow page.
pub const TEXT_OVERFLOW_PAGE_TYPE: u32 = 2;

/// Size of the overflow page header.
pub const OVERFLOW_HEADER_SIZE: usize = 16;

/// Payload bytes per overflow page.
pub const OVERFLOW_CAPACITY: usize = PAGE_SIZE - OVERFLOW_HEADER_SIZE;

/// Bytes of a TEXT value stored inside the record slot before overflow.
pub const INLINE_TEXT_CAPACITY: usize = 768;

/// Size of the overflow pointer at the start of an overflowed TEXT slot:
/// `{table_id: u32, first_page: u32, header_size: u32, total_length: u64}`.
pub const TEXT_POINTER_SIZE: usize = 20;

/// On-disk width of a TEXT field slot.
pub const TEXT_FIELD_WIDTH: usize = TEXT_POINTER_SIZE + INLINE_TEXT_CAPACITY;

/// Marker placed in a TEXT slot of an in-memory record whose full text
/// lives at the tail of the record buffer:
/// `{magic: u32 = 0xFFFF_FFFF, total_length: u64, tail_offset: u32}`.
pub const TEXT_EXTENSION_MAGIC: u32 = 0xFFFF_FFFF;

// ---------------------------------------------------------------------------
// Record page header accessors. All offsets are into the page buffer.

fn ph_record_num(d: &[u8]) -> u32 {
    util::getu32(d, 0)
}
fn ph_set_record_num(d: &mut [u8], v: u32) {
    util::setu32(d, 0, v);
}
fn ph_column_num(d: &[u8]) -> u32 {
    util::getu32(d, 4)
}
fn ph_record_real_size(d: &[u8]) -> u32 {
    util::getu32(d, 8)
}
fn ph_record_size(d: &[u8]) -> u32 {
    util::getu32(d, 12)
}
fn ph_record_capacity(d: &[u8]) -> u32 {
    util::getu32(d, 16)
}
fn ph_col_idx_offset(d: &[u8]) -> u32 {
    util::getu32(d, 20)
}
fn ph_data_offset(d: &[u8]) -> u32 {
    util::getu32(d, 24)
}

/// How many records of `record_size` bytes fit in a page, leaving room for
/// the header, one bitmap bit per record and `fixed` extra header bytes.
fn page_record_capacity(record_size: usize, fixed: usize) -> usize {
    // capacity * record_size + capacity/8 + 1 <= page - header - fixed
    ((PAGE_SIZE - PAGE_HEADER_SIZE - fixed - 1) * 8) / (record_size * 8 + 1)
}

/// Initialise an empty record page in `d`.
pub fn init_empty_page(d: &mut [u8], record_real_size: usize, column_lens: &[usize]) {
    let column_num = column_lens.len();
    let record_size = util::align8(record_real_size);
    let mut capacity = page_record_capacity(record_size, column_num * 4);
    let col_idx_offset = util::align8(PAGE_HEADER_SIZE + util::bitmap_size(capacity));
    let data_offset = col_idx_offset + column_num * 4;
    while capacity > 0 && data_offset + capacity * record_size > PAGE_SIZE {
        capacity -= 1;
    }

    ph_set_record_num(d, 0);
    util::setu32(d, 4, column_num as u32);
    util::setu32(d, 8, record_real_size as u32);
    util::setu32(d, 12, record_size as u32);
    util::setu32(d, 16, capacity as u32);
    util::setu32(d, 20, col_idx_offset as u32);
    util::setu32(d, 24, data_offset as u32);

    for b in &mut d[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + util::bitmap_size(capacity)] {
        *b = 0;
    }
    // PAX column index: entry i is the end offset of column i's slice.
    let mut acc = 0u32;
    for (i, len) in column_lens.iter().enumerate() {
        acc += (*len * capacity) as u32;
        util::setu32(d, col_idx_offset + i * 4, acc);
    }
}

/// Is the page at capacity?
pub fn page_is_full(d: &[u8]) -> bool {
    ph_record_num(d) >= ph_record_capacity(d)
}

fn bitmap_of(d: &[u8]) -> &[u8] {
    let cap = ph_record_capacity(d) as usize;
    &d[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + util::bitmap_size(cap)]
}

fn slot_range(d: &[u8], slot: u32) -> std::ops::Range<usize> {
    let off = ph_data_offset(d) as usize + slot as usize * ph_record_size(d) as usize;
    off..off + ph_record_real_size(d) as usize
}

/// Insert a record into the page; returns the slot number.
pub fn page_insert(d: &mut [u8], record: &[u8]) -> Result<u32> {
    let cap = ph_record_capacity(d) as usize;
    if ph_record_num(d) as usize >= cap {
        return Err(DbError::RecordNomem);
    }
    let slot = {
        let bitmap = bitmap_of(d);
        util::next_clear_bit(bitmap, 0, cap).ok_or(DbError::RecordNomem)?
    };
    util::set_bit(&mut d[PAGE_HEADER_SIZE..], slot);
    ph_set_record_num(d, ph_record_num(d) + 1);
    let real = ph_record_real_size(d) as usize;
    let range = slot_range(d, slot as u32);
    d[range].copy_from_slice(&record[..real]);
    Ok(slot as u32)
}

/// Remove the record in `slot`.
pub fn page_delete(d: &mut [u8], slot: u32) -> Result<()> {
    let cap = ph_record_capacity(d) as usize;
    if slot as usize >= cap {
        return Err(DbError::RecordInvalidRid);
    }
    if !util::get_bit(bitmap_of(d), slot as usize) {
        return Err(DbError::RecordNotExist);
    }
    util::clear_bit(&mut d[PAGE_HEADER_SIZE..], slot as usize);
    ph_set_record_num(d, ph_record_num(d) - 1);
    Ok(())
}

/// Raw bytes of the record in `slot`.
pub fn page_get(d: &[u8], slot: u32) -> Result<&[u8]> {
    if slot >= ph_record_capacity(d) {
        return Err(DbError::RecordInvalidRid);
    }
    if !util::get_bit(bitmap_of(d), slot as usize) {
        return Err(DbError::RecordNotExist);
    }
    Ok(&d[slot_range(d, slot)])
}

/// Overwrite the record in `slot`.
pub fn page_update(d: &mut [u8], slot: u32, record: &[u8]) -> Result<()> {
    if slot >= ph_record_capacity(d) {
        return Err(DbError::InvalidArgument("slot exceeds page capacity".into()));
    }
    if !util::get_bit(bitmap_of(d), slot as usize) {
        return Err(DbError::RecordNotExist);
    }
    let range = slot_range(d, slot);
    let real = range.len();
    d[range].copy_from_slice(&record[..real]);
    Ok(())
}

/// Next live slot at or after `from`.
pub fn page_next_slot(d: &[u8], from: u32) -> Option<u32> {
    let cap = ph_record_capacity(d) as usize;
    util::next_set_bit(bitmap_of(d), from as usize, cap).map(|n| n as u32)
}

/// PAX: slice of the page holding column `col` for `slot`.
/// The column index stores end offsets, so column c starts where c-1 ends.
pub fn pax_field_slice(d: &[u8], slot: u32, col: usize, col_len: usize) -> &[u8] {
    let col_idx_off = ph_col_idx_offset(d) as usize;
    let base = ph_data_offset(d) as usize;
    let col_start = if col == 0 { 0 } else { util::getu32(d, col_idx_off + (col - 1) * 4) as usize };
    let off = base + col_start + col_len * slot as usize;
    &d[off..off + col_len]
}

/// PAX insertion is not implemented; the layout is, the write path is open.
pub fn pax_insert(_d: &mut [u8], _record: &[u8]) -> Result<u32> {
    Err(DbError::Unimplemented("PAX record insertion"))
}

// ---------------------------------------------------------------------------
// Overflow page helpers.

fn ov_next_page(d: &[u8]) -> u32 {
    util::getu32(d, 4)
}
fn ov_data_length(d: &[u8]) -> u32 {
    util::getu32(d, 8)
}

fn ov_init(d: &mut [u8], next: u32, data_len: u32, total_len: u32) {
    util::setu32(d, 0, TEXT_OVERFLOW_PAGE_TYPE);
    util::setu32(d, 4, next);
    util::setu32(d, 8, data_len);
    util::setu32(d, 12, total_len);
}

/// Does this TEXT slot start with a valid overflow pointer for `table_id`?
pub fn is_overflow_pointer(field: &[u8], table_id: u32) -> bool {
    if field.len() < TEXT_POINTER_SIZE {
        return false;
    }
    if util::getu32(field, 0) != table_id {
        return false;
    }
    let page_num = util::getu32(field, 4);
    if page_num == 0 || page_num == INVALID_PAGE_NUM {
        return false;
    }
    if util::getu32(field, 8) != OVERFLOW_HEADER_SIZE as u32 {
        return false;
    }
    let total = util::getu64(field, 12);
    total != 0 && total <= crate::types::TEXT_MAX_LENGTH as u64
}

/// Does this TEXT slot carry the in-memory extension marker?
pub fn is_text_extension(field: &[u8]) -> bool {
    field.len() >= TEXT_POINTER_SIZE && util::getu32(field, 0) == TEXT_EXTENSION_MAGIC
}

/// Write an extension marker: full text lives at `tail_offset` in the record buffer.
pub fn write_text_extension(field: &mut [u8], total_len: u64, tail_offset: u32) {
    for b in field.iter_mut() {
        *b = 0;
    }
    util::setu32(field, 0, TEXT_EXTENSION_MAGIC);
    util::setu64(field, 4, total_len);
    util::setu32(field, 12, tail_offset);
}

/// Extract the text bytes a TEXT slot refers to, given the whole record
/// buffer. Handles raw inline content and the extension marker; overflow
/// pointers are resolved by the record file handler, not here.
pub fn text_slot_content<'a>(record: &'a [u8], field_off: usize, field_len: usize) -> &'a [u8] {
    let field = &record[field_off..field_off + field_len];
    if is_text_extension(field) {
        let total = util::getu64(field, 4) as usize;
        let off = util::getu32(field, 12) as usize;
        return &record[off..off + total];
    }
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    &field[..end]
}

/// Is the whole field 0xFF, i.e. NULL?
pub fn field_is_null(field: &[u8]) -> bool {
    field.iter().all(|&b| b == NULL_FIELD_BYTE)
}

// ---------------------------------------------------------------------------

/// Manages the record pages and TEXT overflow pages of one heap file.
pub struct RecordFileHandler {
    pool: Arc<DiskBufferPool>,
    meta: Arc<TableMeta>,
    /// Record pages with at least one free slot.
    free_pages: Mutex<BTreeSet<u32>>,
    /// Pages known to hold TEXT overflow payload; scans skip these.
    overflow_pages: Mutex<BTreeSet<u32>>,
}

impl RecordFileHandler {
    /// Open the handler over an already-opened buffer pool, classifying
    /// every allocated page as record page or overflow page.
    pub fn open(pool: Arc<DiskBufferPool>, meta: Arc<TableMeta>) -> Result<RecordFileHandler> {
        let handler = RecordFileHandler {
            pool,
            meta,
            free_pages: Mutex::new(BTreeSet::new()),
            overflow_pages: Mutex::new(BTreeSet::new()),
        };
        handler.init_free_pages()?;
        Ok(handler)
    }

    pub fn meta(&self) -> &Arc<TableMeta> {
        &self.meta
    }

    pub fn pool(&self) -> &Arc<DiskBufferPool> {
        &self.pool
    }

    /// One-time startup scan. A page whose first word equals the overflow
    /// page type is an overflow candidate; candidates are then confirmed by
    /// walking the overflow chains referenced from live records, so a record
    /// page that happens to hold exactly two rows is not misclassified.
    fn init_free_pages(&self) -> Result<()> {
        let all: Vec<u32> = self.pool.iter_pages().collect();
        let mut candidates: BTreeSet<u32> = BTreeSet::new();
        let mut record_pages: Vec<u32> = Vec::new();

        for &p in &all {
            let frame = self.pool.get_this_page(p)?;
            let first = util::getu32(&frame.read(), 0);
            self.pool.unpin_page(&frame);
            if first == TEXT_OVERFLOW_PAGE_TYPE {
                candidates.insert(p);
            } else {
                record_pages.push(p);
            }
        }

        let mut confirmed: BTreeSet<u32> = BTreeSet::new();
        let mut processed: BTreeSet<u32> = BTreeSet::new();
        let mut work = record_pages;
        loop {
            while let Some(p) = work.pop() {
                if !processed.insert(p) {
                    continue;
                }
                self.collect_overflow_chains(p, &mut confirmed)?;
            }
            // Candidates never referenced by a chain were record pages all
            // along; demote and scan them too. Scanning a genuine overflow
            // page here is harmless (its header fails the record-size
            // check), and a chain may still confirm it later.
            let demoted: Vec<u32> = candidates
                .iter()
                .copied()
                .filter(|c| !confirmed.contains(c) && !processed.contains(c))
                .collect();
            if demoted.is_empty() {
                break;
            }
            for c in demoted {
                candidates.remove(&c);
                work.push(c);
            }
        }

        let mut free = self.free_pages.lock();
        for &p in &all {
            if confirmed.contains(&p) {
                continue;
            }
            let frame = self.pool.get_this_page(p)?;
            let full = page_is_full(&frame.read());
            self.pool.unpin_page(&frame);
            if !full {
                free.insert(p);
            }
        }
        *self.overflow_pages.lock() = confirmed;
        log::info!(
            "record file init done: {} free pages, {} overflow pages",
            free.len(),
            self.overflow_pages.lock().len()
        );
        Ok(())
    }

    /// Walk every overflow chain referenced from live records of page `p`.
    fn collect_overflow_chains(&self, p: u32, confirmed: &mut BTreeSet<u32>) -> Result<()> {
        let text_fields: Vec<(usize, usize)> = self
            .meta
            .fields
            .iter()
            .filter(|f| f.attr_type == AttrType::Texts)
            .map(|f| (f.offset, f.len))
            .collect();
        if text_fields.is_empty() {
            return Ok(());
        }
        let frame = self.pool.get_this_page(p)?;
        let mut firsts = Vec::new();
        {
            let d = frame.read();
            if ph_record_real_size(&d) as usize == self.meta.record_size {
                let mut slot = page_next_slot(&d, 0);
                while let Some(s) = slot {
                    if let Ok(rec) = page_get(&d, s) {
                        for &(off, len) in &text_fields {
                            let field = &rec[off..off + len];
                            if is_overflow_pointer(field, self.meta.table_id) {
                                firsts.push(util::getu32(field, 4));
                            }
                        }
                    }
                    slot = page_next_slot(&d, s + 1);
                }
            }
        }
        self.pool.unpin_page(&frame);
        for first in firsts {
            let mut cur = first;
            while cur != INVALID_PAGE_NUM && self.pool.is_allocated(cur) {
                if !confirmed.insert(cur) {
                    break;
                }
                let f = self.pool.get_this_page(cur)?;
                let next = ov_next_page(&f.read());
                self.pool.unpin_page(&f);
                cur = next;
            }
        }
        Ok(())
    }

    /// Insert a record. The buffer must be at least `record_size` bytes;
    /// TEXT fields may carry an extension marker whose payload sits past
    /// `record_size`. Returns the new record's RID.
    pub fn insert_record(&self, data: &[u8]) -> Result<Rid> {
        let record_size = self.meta.record_size;
        if data.len() < record_size {
            return Err(DbError::InvalidArgument(format!(
                "record length {} below table record size {}",
                data.len(),
                record_size
            )));
        }

        let column_num = if self.meta.storage_format == StorageFormat::Pax {
            self.meta.fields.len()
        } else {
            0
        };
        if page_record_capacity(util::align8(record_size), column_num * 4) == 0 {
            return Err(DbError::RecordNomem);
        }

        let mut stored = data[..record_size].to_vec();
        for field in &self.meta.fields {
            if field.attr_type != AttrType::Texts {
                continue;
            }
            let slot = &data[field.offset..field.offset + field.len];
            if field_is_null(slot) {
                continue;
            }
            let content = text_slot_content(data, field.offset, field.len).to_vec();
            self.store_text_field(&mut stored, field.offset, field.len, &content)?;
        }

        // Find a record page with room, or start a new one.
        loop {
            let page_num = self.free_pages.lock().iter().next().copied();
            let Some(page_num) = page_num else { break };
            let frame = self.pool.get_this_page(page_num)?;
            let result = {
                let mut d = frame.write();
                if page_is_full(&d) {
                    None
                } else {
                    Some(page_insert(&mut d, &stored)?)
                }
            };
            match result {
                Some(slot) => {
                    frame.mark_dirty();
                    self.pool.unpin_page(&frame);
                    return Ok(Rid::new(page_num, slot));
                }
                None => {
                    self.pool.unpin_page(&frame);
                    self.free_pages.lock().remove(&page_num);
                }
            }
        }

        let frame = self.pool.allocate_page()?;
        let page_num = frame.page_num();
        let slot = {
            let mut d = frame.write();
            let column_lens: Vec<usize> = if self.meta.storage_format == StorageFormat::Pax {
                self.meta.fields.iter().map(|f| f.len).collect()
            } else {
                Vec::new()
            };
            init_empty_page(&mut d, record_size, &column_lens);
            page_insert(&mut d, &stored)?
        };
        frame.mark_dirty();
        self.pool.unpin_page(&frame);
        self.free_pages.lock().insert(page_num);
        Ok(Rid::new(page_num, slot))
    }

    /// Rewrite a TEXT slot in `stored` for `content`, spilling to overflow
    /// pages when the text exceeds the inline capacity.
    fn store_text_field(
        &self,
        stored: &mut Vec<u8>,
        off: usize,
        len: usize,
        content: &[u8],
    ) -> Result<()> {
        if content.len() > crate::types::TEXT_MAX_LENGTH {
            return Err(DbError::InvalidArgument(format!(
                "text length {} exceeds maximum {}",
                content.len(),
                crate::types::TEXT_MAX_LENGTH
            )));
        }
        let slot = &mut stored[off..off + len];
        for b in slot.iter_mut() {
            *b = 0;
        }
        if content.len() <= INLINE_TEXT_CAPACITY {
            slot[..content.len()].copy_from_slice(content);
            return Ok(());
        }

        let first_page = self.build_overflow_chain(content, INLINE_TEXT_CAPACITY)?;
        let slot = &mut stored[off..off + len];
        util::setu32(slot, 0, self.meta.table_id);
        util::setu32(slot, 4, first_page);
        util::setu32(slot, 8, OVERFLOW_HEADER_SIZE as u32);
        util::setu64(slot, 12, content.len() as u64);
        slot[TEXT_POINTER_SIZE..TEXT_POINTER_SIZE + INLINE_TEXT_CAPACITY]
            .copy_from_slice(&content[..INLINE_TEXT_CAPACITY]);
        Ok(())
    }

    /// Allocate and chain overflow pages for `content[inline..]`; returns
    /// the first page of the chain. The first page records the total length.
    fn build_overflow_chain(&self, content: &[u8], inline: usize) -> Result<u32> {
        let remain = &content[inline..];
        let mut first_page = INVALID_PAGE_NUM;
        let mut prev: Option<FramePtr> = None;
        for chunk in remain.chunks(OVERFLOW_CAPACITY) {
            let frame = self.pool.allocate_page()?;
            self.overflow_pages.lock().insert(frame.page_num());
            {
                let mut d = frame.write();
                let total = if first_page == INVALID_PAGE_NUM { content.len() as u32 } else { 0 };
                ov_init(&mut d, INVALID_PAGE_NUM, chunk.len() as u32, total);
                d[OVERFLOW_HEADER_SIZE..OVERFLOW_HEADER_SIZE + chunk.len()].copy_from_slice(chunk);
            }
            frame.mark_dirty();
            if first_page == INVALID_PAGE_NUM {
                first_page = frame.page_num();
            }
            if let Some(p) = prev.take() {
                util::setu32(&mut p.write(), 4, frame.page_num());
                p.mark_dirty();
                self.pool.unpin_page(&p);
            }
            prev = Some(frame);
        }
        if let Some(p) = prev {
            self.pool.unpin_page(&p);
        }
        Ok(first_page)
    }

    /// Release every overflow page owned by TEXT fields of `record_data`.
    pub fn free_text_overflow_pages(&self, record_data: &[u8]) -> Result<()> {
        for field in &self.meta.fields {
            if field.attr_type != AttrType::Texts {
                continue;
            }
            let slot = &record_data[field.offset..field.offset + field.len];
            if !is_overflow_pointer(slot, self.meta.table_id) {
                continue;
            }
            let mut cur = util::getu32(slot, 4);
            let mut freed = 0;
            while cur != INVALID_PAGE_NUM && self.pool.is_allocated(cur) {
                let frame = self.pool.get_this_page(cur)?;
                let next = ov_next_page(&frame.read());
                self.pool.unpin_page(&frame);
                self.pool.dispose_page(cur)?;
                self.overflow_pages.lock().remove(&cur);
                freed += 1;
                cur = next;
            }
            log::debug!("freed {} overflow pages for field {}", freed, field.name);
        }
        Ok(())
    }

    /// Delete the record at `rid`, releasing its overflow chains.
    pub fn delete_record(&self, rid: &Rid) -> Result<()> {
        let frame = self.pool.get_this_page(rid.page_num)?;
        let raw = {
            let d = frame.read();
            page_get(&d, rid.slot_num)?.to_vec()
        };
        self.free_text_overflow_pages(&raw)?;
        {
            let mut d = frame.write();
            page_delete(&mut d, rid.slot_num)?;
        }
        frame.mark_dirty();
        self.pool.unpin_page(&frame);
        self.free_pages.lock().insert(rid.page_num);
        Ok(())
    }

    /// Read the record at `rid` with all TEXT fields reconstructed.
    pub fn get_record(&self, rid: &Rid) -> Result<Record> {
        let frame = self.pool.get_this_page(rid.page_num)?;
        let raw = {
            let d = frame.read();
            if ph_record_real_size(&d) as usize != self.meta.record_size {
                self.pool.unpin_page(&frame);
                return Err(DbError::RecordInvalidRid);
            }
            page_get(&d, rid.slot_num)?.to_vec()
        };
        self.pool.unpin_page(&frame);
        let data = self.process_text_fields_on_read(&raw)?;
        Ok(Record::new(*rid, data))
    }

    /// Expand overflowed TEXT fields. Small texts are rewritten into the
    /// slot NUL-terminated; texts wider than the slot go to the buffer tail
    /// behind an extension marker.
    pub fn process_text_fields_on_read(&self, raw: &[u8]) -> Result<Vec<u8>> {
        if raw.len() != self.meta.record_size {
            return Err(DbError::RecordInvalidRid);
        }
        let mut out = raw.to_vec();
        for field in &self.meta.fields {
            if field.attr_type != AttrType::Texts {
                continue;
            }
            let slot = &raw[field.offset..field.offset + field.len];
            if !is_overflow_pointer(slot, self.meta.table_id) {
                continue;
            }
            let total = util::getu64(slot, 12) as usize;
            let first_page = util::getu32(slot, 4);
            let inline_len = INLINE_TEXT_CAPACITY.min(total);

            let mut full = Vec::with_capacity(total);
            full.extend_from_slice(&slot[TEXT_POINTER_SIZE..TEXT_POINTER_SIZE + inline_len]);
            let mut cur = first_page;
            while cur != INVALID_PAGE_NUM && full.len() < total {
                let frame = self.pool.get_this_page(cur)?;
                let next = {
                    let d = frame.read();
                    if util::getu32(&d, 0) != TEXT_OVERFLOW_PAGE_TYPE {
                        self.pool.unpin_page(&frame);
                        return Err(DbError::InvalidArgument(format!(
                            "page {cur} is not an overflow page"
                        )));
                    }
                    let take = (ov_data_length(&d) as usize).min(total - full.len());
                    full.extend_from_slice(&d[OVERFLOW_HEADER_SIZE..OVERFLOW_HEADER_SIZE + take]);
                    ov_next_page(&d)
                };
                self.pool.unpin_page(&frame);
                cur = next;
            }
            if full.len() != total {
                log::warn!("text field {}: read {} of {} bytes", field.name, full.len(), total);
            }

            let tail = out.len();
            let dest = &mut out[field.offset..field.offset + field.len];
            if full.len() < field.len {
                for b in dest.iter_mut() {
                    *b = 0;
                }
                dest[..full.len()].copy_from_slice(&full);
            } else {
                write_text_extension(dest, full.len() as u64, tail as u32);
                out.extend_from_slice(&full);
            }
        }
        Ok(out)
    }

    /// Read the raw stored bytes at `rid`, without TEXT expansion.
    pub fn get_raw_record(&self, rid: &Rid) -> Result<Record> {
        let frame = self.pool.get_this_page(rid.page_num)?;
        let raw = {
            let d = frame.read();
            page_get(&d, rid.slot_num)?.to_vec()
        };
        self.pool.unpin_page(&frame);
        Ok(Record::new(*rid, raw))
    }

    /// Read, let the caller mutate, and write back if the caller says so.
    /// The callback sees the raw stored bytes, without TEXT expansion.
    pub fn visit_record<F>(&self, rid: &Rid, mut updater: F) -> Result<()>
    where
        F: FnMut(&mut Record) -> bool,
    {
        let frame = self.pool.get_this_page(rid.page_num)?;
        let raw = {
            let d = frame.read();
            page_get(&d, rid.slot_num)?.to_vec()
        };
        let mut record = Record::new(*rid, raw);
        if updater(&mut record) {
            let mut d = frame.write();
            page_update(&mut d, rid.slot_num, &record.data)?;
            frame.mark_dirty();
        }
        self.pool.unpin_page(&frame);
        Ok(())
    }

    /// Overwrite the stored bytes at `rid`; TEXT fields must already be in
    /// their stored form (inline or overflow pointer).
    pub fn update_record(&self, rid: &Rid, data: &[u8]) -> Result<()> {
        let frame = self.pool.get_this_page(rid.page_num)?;
        {
            let mut d = frame.write();
            page_update(&mut d, rid.slot_num, data)?;
        }
        frame.mark_dirty();
        self.pool.unpin_page(&frame);
        Ok(())
    }

    /// Spill a text into the stored form used inside a record slot,
    /// building overflow chains as needed (update path).
    pub fn store_text_into_slot(
        &self,
        stored: &mut Vec<u8>,
        off: usize,
        len: usize,
        content: &[u8],
    ) -> Result<()> {
        self.store_text_field(stored, off, len, content)
    }

    /// Number of TEXT overflow pages currently allocated in this file.
    pub fn overflow_page_count(&self) -> usize {
        self.overflow_pages.lock().len()
    }

    /// Scanner over all live records, pages visited in ascending order.
    pub fn scanner(self: &Arc<Self>) -> RecordFileScanner {
        RecordFileScanner {
            handler: self.clone(),
            pages: self.pool.iter_pages().collect(),
            page_idx: 0,
            pending: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{ColumnSpec, StorageFormat, TableMeta};
    use crate::types::AttrType;

    fn open_handler(dir: &tempfile::TempDir, meta: &Arc<TableMeta>) -> Arc<RecordFileHandler> {
        let pool = DiskBufferPool::open_file(&dir.path().join("t.data")).unwrap();
        Arc::new(RecordFileHandler::open(pool, meta.clone()).unwrap())
    }

    fn int_meta() -> Arc<TableMeta> {
        Arc::new(
            TableMeta::new(
                7,
                "t",
                &[ColumnSpec { name: "id".into(), attr_type: AttrType::Ints, arg: 0, nullable: true }],
                StorageFormat::Row,
            )
            .unwrap(),
        )
    }

    fn text_meta() -> Arc<TableMeta> {
        Arc::new(
            TableMeta::new(
                9,
                "t",
                &[
                    ColumnSpec { name: "id".into(), attr_type: AttrType::Ints, arg: 0, nullable: true },
                    ColumnSpec { name: "body".into(), attr_type: AttrType::Texts, arg: 0, nullable: true },
                ],
                StorageFormat::Row,
            )
            .unwrap(),
        )
    }

    #[test]
    fn insert_get_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let meta = int_meta();
        let handler = open_handler(&dir, &meta);
        let mut rids = Vec::new();
        for i in 0..100i32 {
            rids.push(handler.insert_record(&i.to_le_bytes()).unwrap());
        }
        for (i, rid) in rids.iter().enumerate() {
            let rec = handler.get_record(rid).unwrap();
            assert_eq!(util::geti32(&rec.data, 0), i as i32);
        }
        handler.delete_record(&rids[3]).unwrap();
        assert!(matches!(handler.get_record(&rids[3]), Err(DbError::RecordNotExist)));
        // The freed slot is reused.
        let rid = handler.insert_record(&1234i32.to_le_bytes()).unwrap();
        assert_eq!(rid, rids[3]);
    }

    #[test]
    fn visit_record_writes_back_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let meta = int_meta();
        let handler = open_handler(&dir, &meta);
        let rid = handler.insert_record(&5i32.to_le_bytes()).unwrap();
        handler
            .visit_record(&rid, |rec| {
                util::seti32(&mut rec.data, 0, 6);
                true
            })
            .unwrap();
        assert_eq!(util::geti32(&handler.get_record(&rid).unwrap().data, 0), 6);
        handler
            .visit_record(&rid, |rec| {
                util::seti32(&mut rec.data, 0, 7);
                false
            })
            .unwrap();
        assert_eq!(util::geti32(&handler.get_record(&rid).unwrap().data, 0), 6);
    }

    fn text_record(meta: &TableMeta, id: i32, body: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; meta.record_size];
        util::seti32(&mut data, 0, id);
        let f = meta.field("body").unwrap();
        if body.len() + 1 <= f.len {
            data[f.offset..f.offset + body.len()].copy_from_slice(body);
        } else {
            let tail = data.len();
            write_text_extension(&mut data[f.offset..f.offset + f.len], body.len() as u64, tail as u32);
            data.extend_from_slice(body);
        }
        data
    }

    #[test]
    fn text_overflow_page_law() {
        let dir = tempfile::tempdir().unwrap();
        let meta = text_meta();
        let handler = open_handler(&dir, &meta);
        let f = meta.field("body").unwrap().clone();
        for len in [0usize, 1, INLINE_TEXT_CAPACITY, INLINE_TEXT_CAPACITY + 1, 40000, 65535] {
            let body: Vec<u8> = (0..len).map(|i| b'a' + (i % 26) as u8).collect();
            let rid = handler.insert_record(&text_record(&meta, len as i32, &body)).unwrap();
            let rec = handler.get_record(&rid).unwrap();
            assert_eq!(text_slot_content(&rec.data, f.offset, f.len), &body[..]);
        }
        let expected: usize = [0usize, 1, INLINE_TEXT_CAPACITY, INLINE_TEXT_CAPACITY + 1, 40000, 65535]
            .iter()
            .map(|&l| l.saturating_sub(INLINE_TEXT_CAPACITY).div_ceil(OVERFLOW_CAPACITY))
            .sum();
        assert_eq!(handler.overflow_page_count(), expected);
    }

    #[test]
    fn reopen_classifies_two_record_page_correctly() {
        // A record page holding exactly two rows starts with the word 2,
        // the same as an overflow page header. Reopening must still tell
        // them apart.
        let dir = tempfile::tempdir().unwrap();
        let meta = text_meta();
        {
            let handler = open_handler(&dir, &meta);
            let long: Vec<u8> = vec![b'x'; 3000];
            handler.insert_record(&text_record(&meta, 1, &long)).unwrap();
            handler.insert_record(&text_record(&meta, 2, b"short")).unwrap();
            handler.pool().flush_all_pages().unwrap();
        }
        let handler = open_handler(&dir, &meta);
        assert_eq!(handler.overflow_page_count(), 1);
        let mut scanner = handler.scanner();
        let mut ids = Vec::new();
        let mut long_len = 0;
        let f = meta.field("body").unwrap();
        while let Some(rec) = scanner.next_record().unwrap() {
            ids.push(util::geti32(&rec.data, 0));
            if ids.last() == Some(&1) {
                long_len = text_slot_content(&rec.data, f.offset, f.len).len();
            }
        }
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(long_len, 3000);
    }
}

/// Full-file scan: visits record pages in ascending page order, skipping
/// overflow pages, and yields records with TEXT expanded.
pub struct RecordFileScanner {
    handler: Arc<RecordFileHandler>,
    pages: Vec<u32>,
    page_idx: usize,
    pending: Vec<Record>,
}

impl RecordFileScanner {
    /// Next live record, or `None` at end of file.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        loop {
            if let Some(r) = self.pending.pop() {
                return Ok(Some(r));
            }
            if self.page_idx >= self.pages.len() {
                return Ok(None);
            }
            let page_num = self.pages[self.page_idx];
            self.page_idx += 1;
            if self.handler.overflow_pages.lock().contains(&page_num) {
                continue;
            }
            let frame = self.handler.pool.get_this_page(page_num)?;
            let mut raws = Vec::new();
            {
                let d = frame.read();
                if ph_record_real_size(&d) as usize != self.handler.meta.record_size {
                    self.handler.pool.unpin_page(&frame);
                    continue;
                }
                let mut slot = page_next_slot(&d, 0);
                while let Some(s) = slot {
                    raws.push((s, page_get(&d, s)?.to_vec()));
                    slot = page_next_slot(&d, s + 1);
                }
            }
            self.handler.pool.unpin_page(&frame);
            // Reverse so pop() serves slots in ascending order.
            for (s, raw) in raws.into_iter().rev() {
                let data = self.handler.process_text_fields_on_read(&raw)?;
                self.pending.push(Record::new(Rid::new(page_num, s), data));
            }
        }
    }
}
