//! Locating record boundaries within a byte range.
//!
//! The cursor walks one contiguous range and exposes the two primitives the
//! filter engine needs: finding the next annotation line and the sequence
//! span that follows it. The window manager arranges for every range handed
//! to a cursor (window view or carry buffer) to contain only whole records,
//! so a record never has to be reassembled here.

use std::ops::Range;

use memchr::{memchr, memchr_iter};

/// Byte starting every FASTA record.
pub const RECORD_START: u8 = b'>';
/// Annotation field delimiter.
pub const FIELD_DELIM: u8 = b'|';
/// SOH byte joining the annotations of records that share one sequence body.
pub const ANNOT_JOIN: u8 = 0x01;

/// Span of one sequence body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqSpan {
    /// First byte after the annotation's line feed.
    pub start: usize,
    /// One past the last sequence byte (the next `>` or the end of range).
    pub end: usize,
    /// Sequence length excluding line feeds.
    pub seq_len: u64,
}

impl SeqSpan {
    /// Raw size of the span, line feeds included.
    #[inline]
    pub fn raw_len(&self) -> usize {
        self.end - self.start
    }
}

/// Forward scanner over one byte range.
pub struct RecordCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RecordCursor<'a> {
    #[inline]
    pub fn new(data: &'a [u8]) -> Self {
        RecordCursor { data, pos: 0 }
    }

    /// Scans forward to the next `>` and on to the terminating line feed.
    /// The returned range covers both. `None` if either terminator is
    /// missing before the end of the range.
    pub fn find_annotation(&mut self) -> Option<Range<usize>> {
        let start = self.pos + memchr(RECORD_START, &self.data[self.pos..])?;
        let lf = start + memchr(b'\n', &self.data[start..])?;
        self.pos = lf + 1;
        Some(start..lf + 1)
    }

    /// Scans from the byte after the annotation to the byte before the next
    /// `>`, or to the end of the range. The sequence length (line feeds
    /// excluded) is counted in the same pass. `None` if the span is empty.
    pub fn find_sequence(&mut self) -> Option<SeqSpan> {
        let start = self.pos;
        let end = match memchr(RECORD_START, &self.data[start..]) {
            Some(rel) => start + rel,
            None => self.data.len(),
        };
        if end == start {
            return None;
        }
        let newlines = memchr_iter(b'\n', &self.data[start..end]).count();
        self.pos = end;
        Some(SeqSpan {
            start,
            end,
            seq_len: (end - start - newlines) as u64,
        })
    }
}

/// One record located within a parsed range.
#[derive(Debug, Clone)]
pub struct RefRecord<'a> {
    data: &'a [u8],
    head: Range<usize>,
    seq: SeqSpan,
}

impl<'a> RefRecord<'a> {
    #[inline]
    pub fn new(data: &'a [u8], head: Range<usize>, seq: SeqSpan) -> Self {
        RefRecord { data, head, seq }
    }

    /// Offset of the record's `>` within the range.
    #[inline]
    pub fn head_start(&self) -> usize {
        self.head.start
    }

    /// Annotation bytes from `>` up to, but not including, the line feed.
    #[inline]
    pub fn annotation(&self) -> &'a [u8] {
        &self.data[self.head.start..self.head.end - 1]
    }

    /// The raw sequence body, line feeds included.
    #[inline]
    pub fn raw_seq(&self) -> &'a [u8] {
        &self.data[self.seq.start..self.seq.end]
    }

    /// Sequence length, line feeds excluded.
    #[inline]
    pub fn seq_len(&self) -> u64 {
        self.seq.seq_len
    }

    /// The whole record as it appeared in the input.
    #[inline]
    pub fn raw(&self) -> &'a [u8] {
        &self.data[self.head.start..self.seq.end]
    }

    /// Underlying range the spans index into.
    #[inline]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}
