//! Filter configuration and option value parsing.
//!
//! The configuration is assembled once by the command line layer, validated,
//! and treated as immutable afterwards. Verbosity is part of it as well:
//! progress reporting goes through the `log` facade, configured at startup,
//! instead of process-wide flags.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Default output path base.
pub const DEFAULT_OUTPUT: &str = "filter.out";

/// Maximum number of exact length predicates, and separately of range
/// predicates. Surplus options are ignored with a warning.
pub const MAX_LENGTH_PREDICATES: usize = 5;

/// Default target size of one mmap window (256 MiB).
pub const DEFAULT_WINDOW_SIZE: u64 = 1 << 28;

/// How the annotation and sequence body of a selected record are shaped
/// on output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// Emit the record unchanged: full annotation (including any joined
    /// sub-annotations) and the raw sequence body.
    All,
    /// Emit only the sequence body.
    SeqOnly,
    /// `Fields(k)` with `k > 0`: emit the first `k` annotation fields and
    /// the sequence body. `k < 0`: emit the first `|k|` fields without the
    /// leading `>` and omit the body.
    Fields(i32),
}

impl Projection {
    pub fn from_annot_count(k: i64) -> Result<Projection> {
        if k <= i64::from(i32::MIN) || k > i64::from(i32::MAX) {
            return Err(Error::config(format!(
                "invalid annotation field count = {} (must be between {} and {})",
                k,
                i32::MIN + 1,
                i32::MAX
            )));
        }
        Ok(match k as i32 {
            i32::MAX => Projection::All,
            0 => Projection::SeqOnly,
            n => Projection::Fields(n),
        })
    }
}

/// Where hit IDs come from, if anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HitSource {
    None,
    /// Blast table file; paired with a pipe mode.
    Table(PathBuf),
    /// Plain file of one hit ID per line.
    Search(PathBuf),
}

/// Record selection mode derived from the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    All,
    ByLength,
    ByHitSet,
}

/// Union of exact lengths and half-open `[lo, hi)` ranges.
///
/// Both kinds are additive: a sequence is selected if it matches any of
/// them. Duplicates are dropped silently, and at most
/// [`MAX_LENGTH_PREDICATES`] of each kind are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LengthFilter {
    exact: Vec<u64>,
    ranges: Vec<(u64, u64)>,
}

impl LengthFilter {
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.ranges.is_empty()
    }

    pub fn exact(&self) -> &[u64] {
        &self.exact
    }

    pub fn ranges(&self) -> &[(u64, u64)] {
        &self.ranges
    }

    /// Parses one `-l` argument: `N`, `A:B`, `:B` or `A:`, and adds the
    /// resulting predicate.
    pub fn add_spec(&mut self, spec: &str) -> Result<()> {
        if let Some((lo, hi)) = spec.split_once(':') {
            if lo.is_empty() && hi.is_empty() {
                return Err(Error::config(format!(
                    "invalid range length option = {:?} (no bounds given)",
                    spec
                )));
            }
            let start = if lo.is_empty() { 0 } else { parse_len(lo, spec)? };
            let end = if hi.is_empty() {
                u64::MAX
            } else {
                parse_len(hi, spec)?
            };
            if end < 1 {
                return Err(Error::config(format!(
                    "invalid end range length = {} (must be 1 or greater)",
                    end
                )));
            }
            if end <= start {
                return Err(Error::config(format!(
                    "invalid range length option = {:?} (start must be less than end)",
                    spec
                )));
            }
            self.add_range(start, end);
        } else {
            self.add_exact(parse_len(spec, spec)?);
        }
        Ok(())
    }

    pub fn add_exact(&mut self, len: u64) {
        if self.exact.contains(&len) {
            return;
        }
        if self.exact.len() == MAX_LENGTH_PREDICATES {
            log::warn!("too many length options, ignoring length = {}", len);
            return;
        }
        self.exact.push(len);
    }

    pub fn add_range(&mut self, lo: u64, hi: u64) {
        if self.ranges.contains(&(lo, hi)) {
            return;
        }
        if self.ranges.len() == MAX_LENGTH_PREDICATES {
            log::warn!("too many range length options, ignoring range = {}:{}", lo, hi);
            return;
        }
        self.ranges.push((lo, hi));
    }

    /// True if `len` equals any exact predicate or falls inside any
    /// `[lo, hi)` range.
    pub fn matches(&self, len: u64) -> bool {
        self.exact.contains(&len) || self.ranges.iter().any(|&(lo, hi)| lo <= len && len < hi)
    }
}

fn parse_len(s: &str, whole: &str) -> Result<u64> {
    s.parse::<u64>().map_err(|_| {
        Error::config(format!(
            "invalid length option = {:?} (lengths must be non-negative integers)",
            whole
        ))
    })
}

/// Parses a byte budget of the form `N`, `NKB`, `NMB` or `NGB`
/// (multipliers 2^10, 2^20, 2^30; suffix case-insensitive).
pub fn parse_byte_limit(arg: &str) -> Result<u64> {
    let bytes = arg.as_bytes();
    let (digits, multiplier) = if bytes.len() >= 2
        && bytes[bytes.len() - 1].is_ascii_alphabetic()
        && bytes[bytes.len() - 2].is_ascii_alphabetic()
    {
        let (num, suffix) = arg.split_at(arg.len() - 2);
        let mult = match suffix.to_ascii_uppercase().as_str() {
            "KB" => 1u64 << 10,
            "MB" => 1u64 << 20,
            "GB" => 1u64 << 30,
            _ => {
                return Err(Error::config(format!(
                    "invalid suffix in byte limit = {:?}",
                    arg
                )))
            }
        };
        (num, mult)
    } else {
        (arg, 1)
    };
    let n = digits
        .parse::<u64>()
        .map_err(|_| Error::config(format!("invalid byte limit = {:?}", arg)))?;
    if n < 1 {
        return Err(Error::config(format!(
            "invalid byte limit = {} (must be 1 or greater)",
            n
        )));
    }
    n.checked_mul(multiplier)
        .ok_or_else(|| Error::config(format!("byte limit overflows = {:?}", arg)))
}

/// Immutable run configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Input FASTA file.
    pub query: PathBuf,
    /// Output path base. Workers write `<output>.<rank>` when the group has
    /// more than one member.
    pub output: PathBuf,
    /// Maximum number of records to emit. Only honored by single-worker
    /// runs.
    pub max_records: u64,
    pub lengths: LengthFilter,
    pub projection: Projection,
    /// Per-worker output byte budget.
    pub byte_budget: u64,
    pub hit_source: HitSource,
    /// 0 = none, 1 = hit-set extraction, 2 = reserved (rejected at runtime).
    pub pipe_mode: u8,
    /// Worker group size.
    pub workers: usize,
    /// Target mmap window size; adjusted to page-size constraints by the
    /// window manager.
    pub window_size: u64,
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            query: PathBuf::new(),
            output: PathBuf::from(DEFAULT_OUTPUT),
            max_records: i64::MAX as u64,
            lengths: LengthFilter::default(),
            projection: Projection::All,
            byte_budget: i64::MAX as u64,
            hit_source: HitSource::None,
            pipe_mode: 0,
            workers: 1,
            window_size: DEFAULT_WINDOW_SIZE,
            verbose: false,
        }
    }
}

impl Config {
    /// Selection mode implied by the configured options.
    pub fn mode(&self) -> Mode {
        if self.hit_source != HitSource::None {
            Mode::ByHitSet
        } else if !self.lengths.is_empty() {
            Mode::ByLength
        } else {
            Mode::All
        }
    }

    /// Checks option combinations and path conflicts. Called once before
    /// the worker group is formed.
    pub fn validate(&self) -> Result<()> {
        if self.query.as_os_str().is_empty() {
            return Err(Error::config("missing query file"));
        }
        if self.workers == 0 {
            return Err(Error::config("worker count must be 1 or greater"));
        }
        if self.query == self.output {
            return Err(Error::config(
                "query and output refer to the same file",
            ));
        }
        match &self.hit_source {
            HitSource::Table(table) => {
                if self.pipe_mode == 0 {
                    return Err(Error::config(
                        "pipe mode is required with a blast table file",
                    ));
                }
                if table == &self.query {
                    return Err(Error::config(
                        "blast table and query refer to the same file",
                    ));
                }
                if table == &self.output {
                    return Err(Error::config(
                        "blast table and output refer to the same file",
                    ));
                }
            }
            HitSource::Search(search) => {
                if self.pipe_mode != 0 {
                    return Err(Error::config(
                        "conflict between pipeline and search mode",
                    ));
                }
                if search == &self.query {
                    return Err(Error::config(
                        "query and search refer to the same file",
                    ));
                }
                if search == &self.output {
                    return Err(Error::config(
                        "search and output refer to the same file",
                    ));
                }
            }
            HitSource::None => {
                if self.pipe_mode != 0 {
                    return Err(Error::config(
                        "blast table file was not provided for pipeline",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Logs the effective configuration, as the progress reporting expects.
    pub fn report(&self) {
        log::info!("query file = {}", self.query.display());
        log::info!("output file = {}", self.output.display());
        log::info!("max record count = {}", self.max_records);
        log::info!("max output bytes = {}", self.byte_budget);
        if self.lengths.is_empty() {
            log::info!("sequence length = ALL");
        } else {
            for len in self.lengths.exact() {
                log::info!("sequence length = {}", len);
            }
            for (lo, hi) in self.lengths.ranges() {
                log::info!("sequence length range = [{}, {})", lo, hi);
            }
        }
        match self.projection {
            Projection::All => log::info!("annotation fields = ALL"),
            Projection::SeqOnly => log::info!("annotation fields = NONE"),
            Projection::Fields(k) => log::info!(
                "annotation fields = {} ({} sequences)",
                k.unsigned_abs(),
                if k < 0 { "without" } else { "with" }
            ),
        }
        match &self.hit_source {
            HitSource::Table(t) => log::info!("blast table file = {}", t.display()),
            HitSource::Search(s) => log::info!("search file = {}", s.display()),
            HitSource::None => {}
        }
        log::info!("workers = {}", self.workers);
    }
}
