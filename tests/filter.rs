use std::io::Write;

use seq_sift::config::{Config, HitSource, Projection};
use seq_sift::filter::FilterEngine;
use seq_sift::hits::HitSet;

fn search_set(ids: &[u8]) -> HitSet {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(ids).unwrap();
    f.flush().unwrap();
    HitSet::from_search_file(f.path()).unwrap()
}

fn run_engine(cfg: &Config, hits: Option<&mut HitSet>, input: &[u8], solo: bool) -> (Vec<u8>, u64) {
    let mut engine = FilterEngine::new(cfg, hits, Vec::new(), solo);
    engine.scan(input).unwrap();
    let (out, stats) = engine.finish().unwrap();
    assert!(stats.bytes <= cfg.byte_budget);
    assert_eq!(stats.bytes, out.len() as u64);
    (out, stats.records)
}

#[test]
fn all_pass_round_trip() {
    let input = b">a|x\nACG\n>b|y\nTTTT\n";
    let cfg = Config::default();
    let (out, records) = run_engine(&cfg, None, input, true);
    assert_eq!(out, input);
    assert_eq!(records, 2);
}

#[test]
fn exact_length_filter() {
    let input = b">a|x\nACG\n>b|y\nTTTT\n";
    let mut cfg = Config::default();
    cfg.lengths.add_exact(3);
    let (out, records) = run_engine(&cfg, None, input, true);
    assert_eq!(out, b">a|x\nACG\n");
    assert_eq!(records, 1);
}

#[test]
fn range_length_filter_is_half_open() {
    let input = b">a\nAA\n>b\nBBB\n>c\nCCCC\n";
    let mut cfg = Config::default();
    cfg.lengths.add_range(2, 4);
    let (out, _) = run_engine(&cfg, None, input, true);
    assert_eq!(out, b">a\nAA\n>b\nBBB\n");
}

#[test]
fn exact_and_range_predicates_are_additive() {
    let input = b">a\nA\n>b\nBB\n>c\nCCCCC\n";
    let mut cfg = Config::default();
    cfg.lengths.add_exact(5);
    cfg.lengths.add_range(1, 2);
    let (out, _) = run_engine(&cfg, None, input, true);
    assert_eq!(out, b">a\nA\n>c\nCCCCC\n");
}

#[test]
fn length_counts_exclude_line_feeds() {
    // 4 characters over two lines
    let input = b">a\nAC\nGT\n";
    let mut cfg = Config::default();
    cfg.lengths.add_exact(4);
    let (out, _) = run_engine(&cfg, None, input, true);
    assert_eq!(out, input);
}

#[test]
fn projection_first_field_without_sequence() {
    let input = b">foo|bar|baz\nACGT\n";
    let cfg = Config {
        projection: Projection::Fields(-1),
        ..Config::default()
    };
    let (out, _) = run_engine(&cfg, None, input, true);
    assert_eq!(out, b"foo\n");
}

#[test]
fn projection_two_fields_with_sequence() {
    let input = b">foo|bar|baz\nACGT\n";
    let cfg = Config {
        projection: Projection::Fields(2),
        ..Config::default()
    };
    let (out, _) = run_engine(&cfg, None, input, true);
    assert_eq!(out, b">foo|bar\nACGT\n");
}

#[test]
fn projection_more_fields_than_present() {
    let input = b">foo|bar\nAC\n";
    let cfg = Config {
        projection: Projection::Fields(9),
        ..Config::default()
    };
    let (out, _) = run_engine(&cfg, None, input, true);
    // whole annotation, sequence kept
    assert_eq!(out, b">foo|bar\nAC\n");
}

#[test]
fn projection_sequence_only() {
    let input = b">foo|bar\nAC\nGT\n";
    let cfg = Config {
        projection: Projection::SeqOnly,
        ..Config::default()
    };
    let (out, _) = run_engine(&cfg, None, input, true);
    assert_eq!(out, b"AC\nGT\n");
}

#[test]
fn byte_budget_cuts_cleanly() {
    let input = b">a\nAA\n>b\nBB\n>c\nCC\n";
    let cfg = Config {
        byte_budget: 7,
        ..Config::default()
    };
    let mut engine = FilterEngine::new(&cfg, None, Vec::new(), true);
    engine.scan(input).unwrap();
    assert!(engine.done());
    let (out, stats) = engine.finish().unwrap();
    // exactly one whole record fits; nothing partial follows
    assert_eq!(out, b">a\nAA\n");
    assert_eq!(stats.bytes, 6);
    assert_eq!(stats.records, 1);
}

#[test]
fn byte_budget_counts_projected_size() {
    // projected record is "foo\n" (4 bytes), raw record is far bigger
    let input = b">foo|bar|baz\nACGTACGTACGT\n>qux|y\nAC\n";
    let cfg = Config {
        projection: Projection::Fields(-1),
        byte_budget: 5,
        ..Config::default()
    };
    let (out, records) = run_engine(&cfg, None, input, true);
    assert_eq!(out, b"foo\n");
    assert_eq!(records, 1);
}

#[test]
fn record_count_cap_applies_solo_only() {
    let input = b">a\nAA\n>b\nBB\n>c\nCC\n";
    let cfg = Config {
        max_records: 2,
        ..Config::default()
    };
    let (out, records) = run_engine(&cfg, None, input, true);
    assert_eq!(records, 2);
    assert_eq!(out, b">a\nAA\n>b\nBB\n");

    // a worker in a larger group ignores the cap
    let (out, records) = run_engine(&cfg, None, input, false);
    assert_eq!(records, 3);
    assert_eq!(out, input);
}

#[test]
fn hit_set_selects_on_joined_annotation() {
    let input = b">gi|1|X\x01gi|2|Y\nACGT\n";
    let cfg = Config {
        hit_source: HitSource::Search("ignored".into()),
        ..Config::default()
    };
    let mut hits = search_set(b"gi|2\n");
    let (out, _) = run_engine(&cfg, Some(&mut hits), input, true);
    // ALL projection keeps the full record
    assert_eq!(out, input);
    assert_eq!(hits.coverage(), &[1]);
}

#[test]
fn hit_match_rewrites_annotation_start_for_projection() {
    let input = b">gi|1|X\x01gi|2|Y\nACGT\n";
    let cfg = Config {
        hit_source: HitSource::Search("ignored".into()),
        projection: Projection::Fields(1),
        ..Config::default()
    };
    let mut hits = search_set(b"gi|2\n");
    let (out, _) = run_engine(&cfg, Some(&mut hits), input, true);
    // projection starts at the matched sub-annotation
    assert_eq!(out, b">gi\nACGT\n");
}

#[test]
fn hit_set_prefix_must_end_at_boundary() {
    let input = b">gi|22|Y\nACGT\n";
    let cfg = Config {
        hit_source: HitSource::Search("ignored".into()),
        ..Config::default()
    };
    let mut hits = search_set(b"gi|2\n");
    let (out, records) = run_engine(&cfg, Some(&mut hits), input, true);
    assert!(out.is_empty());
    assert_eq!(records, 0);
    assert_eq!(hits.coverage(), &[0]);
}

#[test]
fn solo_run_stops_once_all_hits_covered() {
    // both records match the single hit; only the first is extracted
    let input = b">h1|a\nAC\n>h1|b\nGT\n";
    let cfg = Config {
        hit_source: HitSource::Search("ignored".into()),
        ..Config::default()
    };
    let mut hits = search_set(b"h1\n");
    let (out, records) = run_engine(&cfg, Some(&mut hits), input, true);
    assert_eq!(records, 1);
    assert_eq!(out, b">h1|a\nAC\n");
}

#[test]
fn records_without_sequence_are_skipped() {
    let input = b">empty\n>a\nAC\n";
    let cfg = Config::default();
    let (out, records) = run_engine(&cfg, None, input, true);
    assert_eq!(out, b">a\nAC\n");
    assert_eq!(records, 1);
}

#[test]
fn scan_resumes_across_ranges() {
    // the engine keeps counters across separate ranges, as handed over by
    // the window manager
    let cfg = Config {
        byte_budget: 12,
        ..Config::default()
    };
    let mut engine = FilterEngine::new(&cfg, None, Vec::new(), true);
    engine.scan(b">a\nAA\n").unwrap();
    engine.scan(b">b\nBB\n").unwrap();
    engine.scan(b">c\nCC\n").unwrap();
    assert!(engine.done());
    let (out, stats) = engine.finish().unwrap();
    assert_eq!(out, b">a\nAA\n>b\nBB\n");
    assert_eq!(stats.records, 2);
}
