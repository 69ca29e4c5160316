//! Partitioning one contiguous input file across a worker group.
//!
//! The planner divides a file of size `S` into `N` regions such that every
//! region starts exactly on a record boundary while its mmap base stays
//! page-aligned. The two constraints rarely coincide, which is what the
//! `inner_shift` member of [`Region`] reconciles: workers map from
//! `file_base` and start parsing at `file_base + inner_shift`.
//!
//! When the file is too small to give every worker at least one record,
//! the planner retries with one worker less until a valid plan exists; a
//! single worker always succeeds.

use std::fs::File;
use std::os::unix::fs::FileExt;

use memchr::memrchr;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One worker's assigned byte range.
///
/// Invariants: `file_base` is a multiple of the page size, the byte at
/// `file_base + inner_shift` starts a record (or is file offset 0), and
/// consecutive regions tile the file without gap or overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Page-aligned mmap base.
    pub file_base: u64,
    /// Offset from `file_base` to the first record of the region.
    pub inner_shift: u64,
    /// Size of the region's logical data.
    pub size: u64,
}

impl Region {
    /// First byte of the region's data.
    #[inline]
    pub fn logical_start(&self) -> u64 {
        self.file_base + self.inner_shift
    }

    /// One past the last byte of the region's data.
    #[inline]
    pub fn logical_end(&self) -> u64 {
        self.logical_start() + self.size
    }
}

/// Ordered list of regions, one per worker, in file-offset order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionPlan {
    pub regions: Vec<Region>,
}

impl PartitionPlan {
    /// Plan covering the whole file with a single worker.
    pub fn solo(size: u64) -> PartitionPlan {
        PartitionPlan {
            regions: vec![Region {
                file_base: 0,
                inner_shift: 0,
                size,
            }],
        }
    }

    /// Number of workers the plan was made for.
    pub fn workers(&self) -> usize {
        self.regions.len()
    }
}

/// System page size.
pub fn page_size() -> u64 {
    // sysconf cannot fail for _SC_PAGESIZE on any supported platform
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as u64 }
}

/// Computes a partition plan for `workers` workers over an open file of
/// `size` bytes. `delim` is the record-start byte (`>` for FASTA).
///
/// The returned plan may hold fewer regions than requested; callers must
/// downsize the group to `plan.workers()`.
pub fn plan_partitions(
    file: &File,
    size: u64,
    workers: usize,
    page: u64,
    delim: u8,
) -> Result<PartitionPlan> {
    let mut n = workers.max(1) as u64;
    let mut buf = vec![0u8; page as usize];
    'attempt: loop {
        if n == 1 {
            return Ok(PartitionPlan::solo(size));
        }
        // Per-partition target size, floored to a page multiple.
        let target = page * (size.div_ceil(n) / page);
        if target == 0 {
            n -= 1;
            log::warn!("too many workers for input size, adjusting to {}", n);
            continue;
        }
        let mut regions = Vec::with_capacity(n as usize);
        let mut prev_end = 0u64;
        for _ in 0..n - 1 {
            let file_base = page * (prev_end / page);
            let inner_shift = prev_end - file_base;
            let scan_hi = (file_base + target).min(size);
            // Backward scan for the last record start strictly inside the
            // partition; the partition ends right before it.
            match rfind_delim(file, prev_end + 1, scan_hi, delim, &mut buf)? {
                Some(pos) => {
                    regions.push(Region {
                        file_base,
                        inner_shift,
                        size: pos - prev_end,
                    });
                    prev_end = pos;
                }
                None => {
                    n -= 1;
                    log::warn!("too many workers for input size, adjusting to {}", n);
                    continue 'attempt;
                }
            }
        }
        let file_base = page * (prev_end / page);
        regions.push(Region {
            file_base,
            inner_shift: prev_end - file_base,
            size: size - prev_end,
        });
        return Ok(PartitionPlan { regions });
    }
}

/// Finds the last `delim` in `[lo, hi)` via positioned reads, scanning
/// backward one buffer-sized chunk at a time.
fn rfind_delim(
    file: &File,
    lo: u64,
    hi: u64,
    delim: u8,
    buf: &mut [u8],
) -> Result<Option<u64>> {
    let chunk = buf.len() as u64;
    let mut chunk_hi = hi;
    while chunk_hi > lo {
        let chunk_lo = chunk_hi.saturating_sub(chunk).max(lo);
        let slice = &mut buf[..(chunk_hi - chunk_lo) as usize];
        file.read_exact_at(slice, chunk_lo)?;
        if let Some(rel) = memrchr(delim, slice) {
            return Ok(Some(chunk_lo + rel as u64));
        }
        chunk_hi = chunk_lo;
    }
    Ok(None)
}
