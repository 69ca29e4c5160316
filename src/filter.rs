//! Record selection, projection and output.
//!
//! The engine is fed ranges of whole records (window views and carry
//! buffers, in input order) and applies the pipeline to each record:
//! selection by mode, annotation projection, byte-budget check, emission.
//! Output always goes through a userspace-buffered stream; the budget is
//! checked against the exact byte count a record would emit, so a truncated
//! record never reaches the output.

use std::io::Write;

use crate::config::{Config, Mode, Projection};
use crate::cursor::{RecordCursor, RefRecord, ANNOT_JOIN, FIELD_DELIM};
use crate::error::Result;
use crate::hits::HitSet;

/// Size of the userspace output stream buffer (4 MiB).
pub const STREAM_BUF_SIZE: usize = 1 << 22;

/// Counters reported by a finished engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    /// Records emitted.
    pub records: u64,
    /// Bytes emitted; never exceeds the configured budget.
    pub bytes: u64,
}

/// Applies the filter pipeline to records surfaced by a [`RecordCursor`].
pub struct FilterEngine<'c, W: Write> {
    cfg: &'c Config,
    hits: Option<&'c mut HitSet>,
    out: W,
    /// Record-count caps only apply when the group has a single worker.
    solo: bool,
    stats: FilterStats,
    done: bool,
}

impl<'c, W: Write> FilterEngine<'c, W> {
    pub fn new(cfg: &'c Config, hits: Option<&'c mut HitSet>, out: W, solo: bool) -> Self {
        FilterEngine {
            cfg,
            hits,
            out,
            solo,
            stats: FilterStats::default(),
            done: false,
        }
    }

    /// True once a quota was reached; remaining input can be skipped.
    pub fn done(&self) -> bool {
        self.done
    }

    pub fn stats(&self) -> FilterStats {
        self.stats
    }

    /// Runs the pipeline over one range of whole records.
    pub fn scan(&mut self, data: &[u8]) -> Result<()> {
        let mut cursor = RecordCursor::new(data);
        loop {
            if self.done || self.quota_reached() {
                self.done = true;
                return Ok(());
            }
            let head = match cursor.find_annotation() {
                Some(head) => head,
                None => return Ok(()),
            };
            let seq = match cursor.find_sequence() {
                Some(seq) => seq,
                None => {
                    log::warn!("record without sequence data, skipping");
                    continue;
                }
            };
            let record = RefRecord::new(data, head, seq);
            if let Some(annot_start) = self.select(&record) {
                self.emit(&record, annot_start)?;
            }
        }
    }

    /// Flushes the stream and hands back the writer and counters.
    pub fn finish(mut self) -> Result<(W, FilterStats)> {
        self.out.flush()?;
        Ok((self.out, self.stats))
    }

    fn quota_reached(&self) -> bool {
        if !self.solo {
            return false;
        }
        if self.stats.records == self.cfg.max_records {
            return true;
        }
        // in hit-set mode a solo run cannot emit more records than hits
        if let Some(hits) = &self.hits {
            if self.stats.records == hits.len() as u64 {
                return true;
            }
        }
        false
    }

    /// Decides whether the record is selected. Returns the effective
    /// annotation start within the parsed range: normally the record's own
    /// `>`, but a hit matched on a joined sub-annotation moves it to the
    /// matched position when field projection is active.
    fn select(&mut self, record: &RefRecord) -> Option<usize> {
        match self.cfg.mode() {
            Mode::All => Some(record.head_start()),
            Mode::ByLength => self
                .cfg
                .lengths
                .matches(record.seq_len())
                .then(|| record.head_start()),
            Mode::ByHitSet => {
                let hits = self.hits.as_mut().expect("hit set loaded in hit-set mode");
                let (_, marker) = hits.match_annotation(record.annotation())?;
                if matches!(self.cfg.projection, Projection::Fields(_)) {
                    Some(record.head_start() + marker)
                } else {
                    Some(record.head_start())
                }
            }
        }
    }

    /// Projects and writes one selected record, unless its exact output
    /// size would break the byte budget; in that case the worker is done.
    fn emit(&mut self, record: &RefRecord, annot_start: usize) -> Result<()> {
        let data = record.data();
        let annot_end = record.head_start() + record.annotation().len();
        // annotation body after the record-start or SOH marker
        let body = &data[annot_start + 1..annot_end];

        match self.cfg.projection {
            Projection::All => {
                let w_bytes = record.raw().len() as u64;
                if self.over_budget(w_bytes) {
                    return Ok(());
                }
                self.out.write_all(record.raw())?;
                self.count(w_bytes);
            }
            Projection::SeqOnly => {
                let w_bytes = record.raw_seq().len() as u64;
                if self.over_budget(w_bytes) {
                    return Ok(());
                }
                self.out.write_all(record.raw_seq())?;
                self.count(w_bytes);
            }
            Projection::Fields(k) => {
                let fields = field_prefix(body, k.unsigned_abs());
                if k > 0 {
                    let w_bytes = 1 + fields.len() as u64 + 1 + record.raw_seq().len() as u64;
                    if self.over_budget(w_bytes) {
                        return Ok(());
                    }
                    self.out.write_all(b">")?;
                    self.out.write_all(fields)?;
                    self.out.write_all(b"\n")?;
                    self.out.write_all(record.raw_seq())?;
                    self.count(w_bytes);
                } else {
                    let w_bytes = fields.len() as u64 + 1;
                    if self.over_budget(w_bytes) {
                        return Ok(());
                    }
                    self.out.write_all(fields)?;
                    self.out.write_all(b"\n")?;
                    self.count(w_bytes);
                }
            }
        }
        Ok(())
    }

    fn over_budget(&mut self, w_bytes: u64) -> bool {
        if self.stats.bytes + w_bytes > self.cfg.byte_budget {
            self.done = true;
            return true;
        }
        false
    }

    fn count(&mut self, w_bytes: u64) {
        self.stats.bytes += w_bytes;
        self.stats.records += 1;
    }
}

/// First `k` fields of an annotation body: the prefix up to the `k`-th
/// field delimiter, or the whole body if it has fewer delimiters.
fn field_prefix(body: &[u8], k: u32) -> &[u8] {
    if k == 0 {
        return &body[..0];
    }
    let mut remaining = k;
    for (pos, &b) in body.iter().enumerate() {
        if b == FIELD_DELIM || b == ANNOT_JOIN {
            remaining -= 1;
            if remaining == 0 {
                return &body[..pos];
            }
        }
    }
    body
}
