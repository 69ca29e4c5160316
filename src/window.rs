//! Page-aligned mmap windows over one worker region.
//!
//! A region is walked in bounded windows so that arbitrarily large inputs
//! never occupy more than one window of address space at a time. Records
//! crossing a window boundary are stitched through the carry buffer: before
//! a window is unmapped, its incomplete tail record (found by scanning
//! backward to the last `>`) is copied out; when the next window opens, the
//! head bytes up to its first `>` complete that record. The filter engine
//! therefore only ever sees ranges made of whole records.

use std::fs::File;
use std::ops::Range;

use memchr::{memchr, memrchr};
use memmap2::{Advice, Mmap, MmapOptions};

use crate::cursor::RECORD_START;
use crate::error::{Error, Result};
use crate::plan::{page_size, Region};

/// Streams one region as a sequence of `(carry, window)` range pairs.
pub struct WindowManager {
    file: File,
    region: Region,
    window: u64,
    nwindows: u64,
    next: u64,
    map: Option<Mmap>,
    view: Range<usize>,
    carry: Vec<u8>,
    pending_tail: Vec<u8>,
}

impl WindowManager {
    /// Creates a window manager with the given window-size target. The
    /// target is reset to 1024 pages if it is smaller than two pages or not
    /// a page multiple; regions smaller than two pages are processed as a
    /// single mapping.
    pub fn new(file: File, region: Region, window_hint: u64) -> WindowManager {
        let page = page_size();
        let mut window = window_hint;
        if window < 2 * page || window % page != 0 {
            window = page * 1024;
        }
        let span = region.inner_shift + region.size;
        if region.size < 2 * page {
            window = span.max(1);
        }
        let nwindows = span.div_ceil(window).max(1);
        WindowManager {
            file,
            region,
            window,
            nwindows,
            next: 0,
            map: None,
            view: 0..0,
            carry: Vec::new(),
            pending_tail: Vec::new(),
        }
    }

    /// Number of windows the region tiles into.
    pub fn windows(&self) -> u64 {
        self.nwindows
    }

    /// Unmaps the current window and opens the next one. Returns `false`
    /// once the region is exhausted.
    pub fn advance(&mut self) -> Result<bool> {
        self.map = None;
        let k = self.next;
        if k == self.nwindows {
            self.carry.clear();
            return Ok(false);
        }
        self.next += 1;

        let span = self.region.inner_shift + self.region.size;
        let offset = self.region.file_base + k * self.window;
        let len = (span - k * self.window).min(self.window) as usize;
        log::debug!(
            "mapping window {} of {} ({} bytes at offset {})",
            k + 1,
            self.nwindows,
            len,
            offset
        );
        let map = unsafe { MmapOptions::new().offset(offset).len(len).map(&self.file)? };
        if let Err(e) = map.advise(Advice::Sequential).and_then(|_| map.advise(Advice::WillNeed)) {
            log::debug!("madvise failed: {}", e);
        }
        if map.lock().is_err() {
            log::warn!("failed to lock window {} to memory", k + 1);
        }

        // The tail saved from the previous window becomes the carry; the
        // head of this window completes it.
        self.carry = std::mem::take(&mut self.pending_tail);
        let mut start = if k == 0 {
            self.region.inner_shift as usize
        } else {
            0
        };
        if k > 0 {
            match memchr(RECORD_START, &map) {
                Some(0) => {}
                Some(pos) => {
                    self.carry.extend_from_slice(&map[..pos]);
                    start = pos;
                }
                // a single record larger than the window
                None => {
                    return Err(Error::RecordTooLarge { window: k, offset });
                }
            }
        }

        // All windows but the last end right before their final record,
        // which is copied out for the next transition.
        let mut end = len;
        if k + 1 < self.nwindows {
            match memrchr(RECORD_START, &map[start..]) {
                Some(rel) => {
                    let pos = start + rel;
                    self.pending_tail.extend_from_slice(&map[pos..]);
                    end = pos;
                }
                None => {
                    return Err(Error::RecordTooLarge { window: k, offset });
                }
            }
        }

        self.view = start..end;
        self.map = Some(map);
        Ok(true)
    }

    /// The record stitched across the previous window boundary. Empty for
    /// the first window. Processed before [`window()`](Self::window) to
    /// keep records in input order.
    pub fn carry(&self) -> &[u8] {
        &self.carry
    }

    /// The current window's whole-record range.
    pub fn window(&self) -> &[u8] {
        match &self.map {
            Some(map) => &map[self.view.clone()],
            None => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // collect all bytes seen through the windows, in order
    fn drain(wm: &mut WindowManager) -> Vec<u8> {
        let mut out = Vec::new();
        while wm.advance().unwrap() {
            out.extend_from_slice(wm.carry());
            out.extend_from_slice(wm.window());
        }
        out
    }

    fn write_file(data: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(data).unwrap();
        f.flush().unwrap();
        f
    }

    fn synthetic_fasta(total: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(total);
        let mut i = 0;
        while data.len() < total {
            data.extend_from_slice(format!(">r{}|f\n", i).as_bytes());
            data.extend_from_slice(&vec![b'C'; 61 + (i * 13) % 200]);
            data.push(b'\n');
            i += 1;
        }
        data.truncate(total);
        // keep the tail a valid record end
        *data.last_mut().unwrap() = b'\n';
        data
    }

    #[test]
    fn single_window_region() {
        let data = b">a\nACGT\n>b\nTTTT\n".to_vec();
        let f = write_file(&data);
        let region = Region {
            file_base: 0,
            inner_shift: 0,
            size: data.len() as u64,
        };
        let mut wm = WindowManager::new(f.reopen().unwrap(), region, 1 << 20);
        assert_eq!(wm.windows(), 1);
        assert_eq!(drain(&mut wm), data);
    }

    #[test]
    fn windowed_region_reassembles_records() {
        let page = page_size() as usize;
        let data = synthetic_fasta(6 * page);
        let f = write_file(&data);
        let region = Region {
            file_base: 0,
            inner_shift: 0,
            size: data.len() as u64,
        };
        // two-page windows force two boundary stitches
        let mut wm = WindowManager::new(f.reopen().unwrap(), region, 2 * page as u64);
        assert_eq!(wm.windows(), 3);
        assert_eq!(drain(&mut wm), data);
    }

    #[test]
    fn undersized_window_hint_is_reset() {
        let page = page_size();
        let data = synthetic_fasta(3 * page as usize);
        let f = write_file(&data);
        let region = Region {
            file_base: 0,
            inner_shift: 0,
            size: data.len() as u64,
        };
        // below two pages the hint falls back to 1024 pages
        let mut wm = WindowManager::new(f.reopen().unwrap(), region, page / 2);
        assert_eq!(wm.windows(), 1);
        assert_eq!(drain(&mut wm), data);
    }

    #[test]
    fn shifted_region_starts_at_record() {
        let page = page_size() as usize;
        let data = synthetic_fasta(4 * page);
        // place a region starting at the first record after the first page
        let start = memchr::memchr(b'>', &data[page..]).unwrap() + page;
        let f = write_file(&data);
        let region = Region {
            file_base: page as u64,
            inner_shift: (start - page) as u64,
            size: (data.len() - start) as u64,
        };
        let mut wm = WindowManager::new(f.reopen().unwrap(), region, 2 * page as u64);
        assert!(wm.windows() > 1);
        assert_eq!(drain(&mut wm), &data[start..]);
    }

    #[test]
    fn boundary_on_record_start_keeps_carry_whole() {
        let page = page_size() as usize;
        // first window is exactly one record; second starts with '>'
        let mut data = Vec::new();
        data.extend_from_slice(b">first\n");
        data.extend_from_slice(&vec![b'G'; 2 * page - data.len() - 1]);
        data.push(b'\n');
        assert_eq!(data.len(), 2 * page);
        data.extend_from_slice(b">second\nACGT\n");
        data.extend_from_slice(&vec![b'T'; 2 * page]);
        data.push(b'\n');
        let f = write_file(&data);
        let region = Region {
            file_base: 0,
            inner_shift: 0,
            size: data.len() as u64,
        };
        let mut wm = WindowManager::new(f.reopen().unwrap(), region, 2 * page as u64);
        assert_eq!(drain(&mut wm), data);
    }

    #[test]
    fn record_larger_than_window_fails() {
        let page = page_size() as usize;
        let mut data = b">huge\n".to_vec();
        data.extend_from_slice(&vec![b'A'; 8 * page]);
        data.push(b'\n');
        let f = write_file(&data);
        let region = Region {
            file_base: 0,
            inner_shift: 0,
            size: data.len() as u64,
        };
        let mut wm = WindowManager::new(f.reopen().unwrap(), region, 2 * page as u64);
        let mut err = None;
        loop {
            match wm.advance() {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    err = Some(e);
                    break;
                }
            }
        }
        assert!(matches!(err, Some(Error::RecordTooLarge { .. })));
    }
}
