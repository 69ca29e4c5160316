//! Hit-ID loading from blast tables and search files.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use memchr::memchr_iter;
use memmap2::{Advice, Mmap};

use crate::cursor::ANNOT_JOIN;
use crate::error::{Error, Result};

/// Longest hit or query ID kept; longer IDs are truncated with a warning
/// and consequently matched by prefix only.
pub const HIT_ID_MAX: usize = 63;

/// Deduplicated, insertion-ordered hit-ID set with its coverage vector.
///
/// The query list is only populated in blast-table mode and keeps input
/// order with adjacent duplicates collapsed. `coverage[i]` is set when any
/// record of this worker matched `ids[i]`; the vectors are summed across
/// the group before the uncovered-hit report.
#[derive(Debug, Default)]
pub struct HitSet {
    ids: Vec<Vec<u8>>,
    queries: Vec<Vec<u8>>,
    coverage: Vec<u32>,
}

impl HitSet {
    /// Loads `query_id`/`hit_id` pairs from a whitespace-separated blast
    /// table. Lines with fewer than two fields are skipped with a warning.
    pub fn from_blast_table(path: &Path) -> Result<HitSet> {
        let mut set = HitSet::default();
        let map = map_table(path)?;
        for line in map.split(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }
            let mut fields = line
                .split(|b: &u8| *b == b' ' || *b == b'\t')
                .filter(|f| !f.is_empty());
            let (query, hit) = match (fields.next(), fields.next()) {
                (Some(q), Some(h)) => (q, h),
                _ => {
                    log::warn!("skipping blast table line without query and hit IDs");
                    continue;
                }
            };
            let query = truncate_id(query);
            let hit = truncate_id(hit);
            if set.queries.last().map(Vec::as_slice) != Some(query) {
                set.queries.push(query.to_vec());
            }
            if hit != query {
                set.insert_hit(hit);
            }
        }
        set.coverage = vec![0; set.ids.len()];
        Ok(set)
    }

    /// Loads bare hit IDs, one per line. Blank lines are skipped.
    pub fn from_search_file(path: &Path) -> Result<HitSet> {
        let mut set = HitSet::default();
        let map = map_table(path)?;
        for line in map.split(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }
            set.insert_hit(truncate_id(line));
        }
        set.coverage = vec![0; set.ids.len()];
        Ok(set)
    }

    fn insert_hit(&mut self, id: &[u8]) {
        if self.ids.iter().any(|have| have == id) {
            return;
        }
        self.ids.push(id.to_vec());
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &[u8]> {
        self.ids.iter().map(Vec::as_slice)
    }

    pub fn queries(&self) -> impl Iterator<Item = &[u8]> {
        self.queries.iter().map(Vec::as_slice)
    }

    pub fn coverage(&self) -> &[u32] {
        &self.coverage
    }

    /// Matches the hit list against a record annotation (`>` included,
    /// line feed excluded). Every sub-annotation introduced by an SOH byte
    /// is a candidate. The first hit in list order wins; its coverage entry
    /// is set and `(index, marker offset)` returned, where the marker is
    /// the `>` (offset 0) or the SOH byte preceding the matched candidate.
    pub fn match_annotation(&mut self, annot: &[u8]) -> Option<(usize, usize)> {
        for (i, id) in self.ids.iter().enumerate() {
            if candidate_matches(&annot[1..], id) {
                self.coverage[i] = 1;
                return Some((i, 0));
            }
            for marker in memchr_iter(ANNOT_JOIN, annot) {
                if candidate_matches(&annot[marker + 1..], id) {
                    self.coverage[i] = 1;
                    return Some((i, marker));
                }
            }
        }
        None
    }

    /// Writes every ID whose summed coverage is zero, one per line.
    /// Returns the number of uncovered IDs.
    pub fn write_not_found<W: Write>(&self, summed: &[u32], mut out: W) -> io::Result<u64> {
        let mut n = 0;
        for (id, &count) in self.ids.iter().zip(summed) {
            if count == 0 {
                out.write_all(id)?;
                out.write_all(b"\n")?;
                n += 1;
            }
        }
        Ok(n)
    }
}

/// A candidate matches when it starts with the ID and the following byte
/// cannot belong to an ID (field delimiter, SOH, whitespace or the end of
/// the annotation).
fn candidate_matches(candidate: &[u8], id: &[u8]) -> bool {
    candidate.starts_with(id)
        && match candidate.get(id.len()) {
            None => true,
            Some(&b) => matches!(b, b'|' | ANNOT_JOIN | b' ' | b'\t'),
        }
}

fn truncate_id(id: &[u8]) -> &[u8] {
    if id.len() > HIT_ID_MAX {
        log::warn!(
            "ID is too large ({} bytes), truncating to {} bytes",
            id.len(),
            HIT_ID_MAX
        );
        &id[..HIT_ID_MAX]
    } else {
        id
    }
}

fn map_table(path: &Path) -> Result<Mmap> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let size = file.metadata().map_err(|e| Error::io(path, e))?.len();
    if size == 0 {
        return Err(Error::EmptyInput(path.to_path_buf()));
    }
    let map = unsafe { Mmap::map(&file) }.map_err(|e| Error::io(path, e))?;
    if let Err(e) = map.advise(Advice::Sequential) {
        log::debug!("madvise failed on {}: {}", path.display(), e);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(content: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn blast_table_dedup() {
        let f = write_temp(b"q1\th1\t90.0\nq1\th2\nq1\th1\nq2\tq2\nq2\th3\nq1\th4");
        let set = HitSet::from_blast_table(f.path()).unwrap();
        let ids: Vec<_> = set.ids().collect();
        assert_eq!(ids, vec![&b"h1"[..], b"h2", b"h3", b"h4"]);
        let queries: Vec<_> = set.queries().collect();
        // adjacent duplicates collapse, order preserved
        assert_eq!(queries, vec![&b"q1"[..], b"q2", b"q1"]);
        assert_eq!(set.coverage(), &[0, 0, 0, 0]);
    }

    #[test]
    fn blast_table_skips_short_lines() {
        let f = write_temp(b"q1 h1\nonly-one-field\n\nq2 h2\n");
        let set = HitSet::from_blast_table(f.path()).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn search_file_dedup_and_truncation() {
        let long = vec![b'x'; 100];
        let mut content = b"id1\nid2\nid1\n".to_vec();
        content.extend_from_slice(&long);
        content.push(b'\n');
        let f = write_temp(&content);
        let set = HitSet::from_search_file(f.path()).unwrap();
        let ids: Vec<_> = set.ids().collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0], b"id1");
        assert_eq!(ids[1], b"id2");
        assert_eq!(ids[2].len(), HIT_ID_MAX);
    }

    #[test]
    fn empty_table_is_an_error() {
        let f = write_temp(b"");
        assert!(HitSet::from_search_file(f.path()).is_err());
    }

    #[test]
    fn match_primary_and_joined_annotations() {
        let f = write_temp(b"gi|2\n");
        let mut set = HitSet::from_search_file(f.path()).unwrap();
        // joined annotation: match sits after the SOH at offset 7
        let annot = b">gi|1|X\x01gi|2|Y";
        assert_eq!(set.match_annotation(annot), Some((0, 7)));
        assert_eq!(set.coverage(), &[1]);

        // prefix of a longer ID must not match
        let f = write_temp(b"gi|2\n");
        let mut set = HitSet::from_search_file(f.path()).unwrap();
        assert_eq!(set.match_annotation(b">gi|22|Y"), None);
        assert_eq!(set.coverage(), &[0]);
    }

    #[test]
    fn match_at_annotation_end() {
        let f = write_temp(b"abc\n");
        let mut set = HitSet::from_search_file(f.path()).unwrap();
        assert_eq!(set.match_annotation(b">abc"), Some((0, 0)));
        let f = write_temp(b"abc\n");
        let mut set = HitSet::from_search_file(f.path()).unwrap();
        assert_eq!(set.match_annotation(b">abcd"), None);
    }

    #[test]
    fn not_found_report() {
        let f = write_temp(b"a\nb\nc\n");
        let set = HitSet::from_search_file(f.path()).unwrap();
        let mut out = Vec::new();
        let n = set.write_not_found(&[1, 0, 2], &mut out).unwrap();
        assert_eq!(n, 1);
        assert_eq!(out, b"b\n");
    }
}
