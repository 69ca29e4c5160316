//! Scale-out FASTA sequence extraction and filtering.
//!
//! This library pulls selected sequence records out of FASTA inputs that are
//! too large to read into memory. The input is divided by the
//! [partition planner](plan) into per-worker regions whose mmap bases stay
//! page-aligned while no record ever straddles a region boundary. Each
//! worker then walks its region in bounded [mmap windows](window), stitching
//! records that cross a window boundary through a small carry buffer, and
//! runs every record through the [filter engine](filter): selection by
//! sequence length or against a [hit-ID set](hits) loaded from a blast
//! table or search file, annotation field projection, and an exact output
//! byte budget.
//!
//! Workers coordinate only through the group-messaging primitives of
//! [`comm::Group`]: the plan is computed once and broadcast, coverage
//! vectors are reduced for the uncovered-hit report, and per-worker outputs
//! are gathered into one file in rank order. The
//! [worker coordination layer](coordinate) also downsizes the group when
//! the input is too small to feed every worker.
//!
//! # Example
//!
//! Extract all sequences of length 3 from a FASTA file:
//!
//! ```no_run
//! use seq_sift::config::Config;
//! use seq_sift::driver;
//!
//! let mut cfg = Config {
//!     query: "seqs.fasta".into(),
//!     output: "filtered.fasta".into(),
//!     ..Config::default()
//! };
//! cfg.lengths.add_exact(3);
//! cfg.validate().unwrap();
//!
//! let summary = driver::execute(&cfg).unwrap();
//! println!("{} records extracted", summary.records);
//! ```
//!
//! The `seqsift` binary wraps exactly this flow behind the command line.

pub mod comm;
pub mod config;
pub mod coordinate;
pub mod cursor;
pub mod driver;
pub mod error;
pub mod filter;
pub mod hits;
pub mod plan;
pub mod window;

pub use self::config::Config;
pub use self::driver::RunSummary;
pub use self::error::{Error, Result};
