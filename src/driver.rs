//! Composition of the extraction pipeline and worker lifecycle.

use std::fs::{self, File};
use std::io::BufWriter;

use crate::comm::{Group, SoloGroup, ThreadGroup};
use crate::config::{Config, HitSource};
use crate::coordinate::{self, local_output_path};
use crate::cursor::RECORD_START;
use crate::error::{Error, Result};
use crate::filter::{FilterEngine, FilterStats, STREAM_BUF_SIZE};
use crate::hits::HitSet;
use crate::plan::{page_size, plan_partitions, PartitionPlan};
use crate::window::WindowManager;

/// Counters from one worker's run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    pub records: u64,
    pub bytes_written: u64,
    /// Group size after any planner-driven shrink.
    pub workers: usize,
}

/// Runs the configured extraction with a worker group sized by
/// `cfg.workers`: directly on the calling thread for a single worker,
/// otherwise on a scoped worker thread per rank. Returns rank 0's summary.
pub fn execute(cfg: &Config) -> Result<RunSummary> {
    if cfg.workers <= 1 {
        let mut group = SoloGroup::new();
        let summary = run(cfg, &mut group)?;
        return Ok(summary.unwrap_or_default());
    }

    let handles = ThreadGroup::mesh(cfg.workers);
    let results = crossbeam_utils::thread::scope(|s| {
        let joins: Vec<_> = handles
            .into_iter()
            .map(|mut group| {
                s.spawn(move |_| {
                    let rank = group.rank();
                    let result = run(cfg, &mut group);
                    if let Err(e) = &result {
                        log::error!("worker {} failed: {}", rank, e);
                    }
                    result
                })
            })
            .collect();
        joins
            .into_iter()
            .map(|j| j.join().expect("worker thread panicked"))
            .collect::<Vec<_>>()
    })
    .expect("worker scope panicked");

    let mut summary = None;
    let mut first_err = None;
    for result in results {
        match result {
            Ok(Some(s)) if summary.is_none() => summary = Some(s),
            Ok(_) => {}
            Err(e) if first_err.is_none() => first_err = Some(e),
            Err(_) => {}
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(summary.unwrap_or_default()),
    }
}

/// One worker's whole lifecycle against an already formed group. Returns
/// `Ok(None)` on ranks the planner excluded; they have finished cleanly.
pub fn run<G: Group>(cfg: &Config, group: &mut G) -> Result<Option<RunSummary>> {
    #[cfg(feature = "replicate-input")]
    {
        let mut inputs = vec![cfg.query.as_path()];
        match &cfg.hit_source {
            HitSource::Table(t) => inputs.push(t.as_path()),
            HitSource::Search(s) => inputs.push(s.as_path()),
            HitSource::None => {}
        }
        coordinate::replicate_inputs(group, &inputs)?;
        group.barrier()?;
    }

    // every worker opens the query file independently
    let file = File::open(&cfg.query).map_err(|e| Error::io(&cfg.query, e))?;
    let size = file.metadata().map_err(|e| Error::io(&cfg.query, e))?.len();
    if size == 0 {
        return Err(Error::EmptyInput(cfg.query.clone()));
    }

    let plan = match distribute_plan(group, &file, size)? {
        Some(plan) => plan,
        // this rank was shrunk away
        None => return Ok(None),
    };
    let region = plan.regions[group.rank()];
    log::debug!(
        "rank {} region: base {}, shift {}, {} bytes",
        group.rank(),
        region.file_base,
        region.inner_shift,
        region.size
    );

    let mut hits = load_hits(cfg)?;

    let local = local_output_path(&cfg.output, group.rank(), group.size());
    let out_file = File::create(&local).map_err(|e| Error::io(&local, e))?;
    let out = BufWriter::with_capacity(STREAM_BUF_SIZE, out_file);

    let mut engine = FilterEngine::new(cfg, hits.as_mut(), out, group.size() == 1);
    let mut windows = WindowManager::new(file, region, cfg.window_size);
    log::info!(
        "rank {} filtering {} bytes in {} window(s)",
        group.rank(),
        region.size,
        windows.windows()
    );
    while windows.advance()? {
        engine.scan(windows.carry())?;
        engine.scan(windows.window())?;
        if engine.done() {
            break;
        }
    }
    let (_, stats) = engine.finish()?;
    log::info!(
        "rank {}: {} records extracted ({} bytes)",
        group.rank(),
        stats.records,
        stats.bytes
    );

    if let Some(hits) = &hits {
        coordinate::report_not_found(group, hits, &cfg.output)?;
    }

    #[cfg(feature = "gather-output")]
    coordinate::gather_outputs(group, &cfg.output, &local, stats.bytes)?;

    finish_local_output(&local, stats)?;

    Ok(Some(RunSummary {
        records: stats.records,
        bytes_written: stats.bytes,
        workers: group.size(),
    }))
}

/// Rank 0 plans the partitions; the worker count and plan are broadcast,
/// and the group downsized if the planner dropped workers. Returns `None`
/// on excluded ranks.
fn distribute_plan<G: Group>(
    group: &mut G,
    file: &File,
    size: u64,
) -> Result<Option<PartitionPlan>> {
    if group.size() == 1 {
        return Ok(Some(PartitionPlan::solo(size)));
    }

    let plan = if group.rank() == 0 {
        match plan_partitions(file, size, group.size(), page_size(), RECORD_START) {
            Ok(plan) => Some(plan),
            Err(e) => {
                // peers must learn that planning failed before this rank
                // bails, or they would block in the broadcast forever
                group.broadcast(0, &mut vec![0u8; 8])?;
                return Err(e);
            }
        }
    } else {
        None
    };

    let mut keep = plan
        .as_ref()
        .map(|p| (p.workers() as u64).to_le_bytes().to_vec())
        .unwrap_or_default();
    group.broadcast(0, &mut keep)?;
    let keep = u64::from_le_bytes(
        keep.as_slice()
            .try_into()
            .map_err(|_| Error::Comm("short worker-count header".into()))?,
    ) as usize;
    if keep == 0 {
        return Err(Error::Comm("partition planning failed at rank 0".into()));
    }

    if keep < group.size() {
        log::warn!("worker group adjusted to {} for the input size", keep);
        if !group.shrink(keep) {
            log::info!("rank {} not needed, exiting", group.rank());
            return Ok(None);
        }
    }

    let mut encoded = match &plan {
        Some(plan) => bincode::serialize(plan)
            .map_err(|e| Error::Comm(format!("encoding partition plan: {}", e)))?,
        None => Vec::new(),
    };
    group.broadcast(0, &mut encoded)?;
    let plan = match plan {
        Some(plan) => plan,
        None => bincode::deserialize(&encoded)
            .map_err(|e| Error::Comm(format!("decoding partition plan: {}", e)))?,
    };
    Ok(Some(plan))
}

/// Loads the hit set implied by the configuration, if any. The reserved
/// MUSCLE pipe mode is rejected here, after configuration was accepted.
fn load_hits(cfg: &Config) -> Result<Option<HitSet>> {
    match &cfg.hit_source {
        HitSource::None => Ok(None),
        HitSource::Table(path) => {
            if cfg.pipe_mode == 2 {
                return Err(Error::Unsupported(
                    "the MUSCLE pipeline (pipe mode 2) is not implemented".into(),
                ));
            }
            let set = HitSet::from_blast_table(path)?;
            log::info!(
                "loaded {} hit IDs from blast table {}",
                set.len(),
                path.display()
            );
            Ok(Some(set))
        }
        HitSource::Search(path) => {
            let set = HitSet::from_search_file(path)?;
            log::info!("loaded {} search IDs from {}", set.len(), path.display());
            Ok(Some(set))
        }
    }
}

/// Removes an empty worker-local output file. With output gather enabled
/// the local files of a multi-worker group are already gone.
fn finish_local_output(local: &std::path::Path, stats: FilterStats) -> Result<()> {
    if stats.bytes == 0 && local.exists() {
        log::warn!("removing empty output file {}", local.display());
        fs::remove_file(local).map_err(|e| Error::io(local, e))?;
    }
    Ok(())
}
