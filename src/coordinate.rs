//! Worker coordination: input fan-out, output gather, uncovered-hit report.
//!
//! Everything here moves file data in bounded chunks so no worker ever
//! buffers a whole file for the sake of coordination.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::comm::Group;
use crate::error::{Error, Result};
use crate::filter::STREAM_BUF_SIZE;
use crate::hits::HitSet;

/// Chunk size for file broadcast and gather transfers (4 MiB).
pub const TRANSFER_CHUNK: usize = 1 << 22;

/// Local output path of one worker: `<base>.<rank>` in groups of more than
/// one worker, the base path itself otherwise.
pub fn local_output_path(base: &Path, rank: usize, group_size: usize) -> PathBuf {
    if group_size > 1 {
        suffixed(base, &format!(".{}", rank))
    } else {
        base.to_path_buf()
    }
}

/// Path of the uncovered-hit report: `<base>.notFound`.
pub fn not_found_path(base: &Path) -> PathBuf {
    suffixed(base, ".notFound")
}

fn suffixed(base: &Path, suffix: &str) -> PathBuf {
    let mut os = base.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

/// Replicates the given input files from rank 0 to one representative rank
/// per distinct node, in [`TRANSFER_CHUNK`] pieces. Ranks on the same node
/// as a representative read the replicated copy from the shared file
/// system. Single-worker groups skip the whole exchange.
pub fn replicate_inputs<G: Group>(group: &mut G, files: &[&Path]) -> Result<()> {
    if group.size() == 1 {
        return Ok(());
    }

    // one representative per distinct node, discovered from the hostnames
    let name = group.node_name().as_bytes().to_vec();
    let reps = if group.rank() == 0 {
        let mut names: Vec<Vec<u8>> = vec![name.clone()];
        for r in 1..group.size() {
            names.push(group.recv(r)?);
        }
        let mut reps: Vec<usize> = Vec::new();
        for (r, n) in names.iter().enumerate() {
            if !names[..r].contains(n) {
                reps.push(r);
            }
        }
        let mut encoded = bincode::serialize(&reps)
            .map_err(|e| Error::Comm(format!("encoding representative list: {}", e)))?;
        group.broadcast(0, &mut encoded)?;
        reps
    } else {
        group.send(0, &name)?;
        let mut encoded = Vec::new();
        group.broadcast(0, &mut encoded)?;
        bincode::deserialize(&encoded)
            .map_err(|e| Error::Comm(format!("decoding representative list: {}", e)))?
    };

    // all ranks share one node, nothing to copy
    if reps.len() == 1 {
        return Ok(());
    }
    let writes_copy = group.rank() != 0 && reps.contains(&group.rank());

    for path in files {
        if group.rank() == 0 {
            log::info!("distributing input file {}", path.display());
        }
        let mut src = None;
        let mut size = if group.rank() == 0 {
            let file = File::open(path).map_err(|e| Error::io(*path, e))?;
            let size = file.metadata().map_err(|e| Error::io(*path, e))?.len();
            src = Some(file);
            size
        } else {
            0
        };
        let mut header = size.to_le_bytes().to_vec();
        group.broadcast(0, &mut header)?;
        if group.rank() != 0 {
            let arr: [u8; 8] = header
                .as_slice()
                .try_into()
                .map_err(|_| Error::Comm("short file size header".into()))?;
            size = u64::from_le_bytes(arr);
        }

        let mut dst = if writes_copy {
            if path.exists() {
                log::info!(
                    "rank {} found existing {}, overwriting",
                    group.rank(),
                    path.display()
                );
            }
            Some(BufWriter::with_capacity(
                STREAM_BUF_SIZE,
                File::create(path).map_err(|e| Error::io(*path, e))?,
            ))
        } else {
            None
        };

        let mut remaining = size;
        let mut buf = vec![0u8; TRANSFER_CHUNK];
        while remaining > 0 {
            let n = remaining.min(TRANSFER_CHUNK as u64) as usize;
            let mut chunk = if let Some(src) = src.as_mut() {
                src.read_exact(&mut buf[..n])
                    .map_err(|e| Error::io(*path, e))?;
                buf[..n].to_vec()
            } else {
                Vec::new()
            };
            group.broadcast(0, &mut chunk)?;
            if let Some(dst) = dst.as_mut() {
                dst.write_all(&chunk).map_err(|e| Error::io(*path, e))?;
            }
            remaining -= n as u64;
        }
        if let Some(mut dst) = dst {
            dst.flush().map_err(|e| Error::io(*path, e))?;
        }
    }
    Ok(())
}

/// Sums the coverage vectors at rank 0 and writes the IDs nobody covered
/// to `<base>.notFound`, one per line. An empty report file is removed.
pub fn report_not_found<G: Group>(group: &mut G, hits: &HitSet, base: &Path) -> Result<()> {
    let summed = group.reduce_sum_u32(0, hits.coverage())?;
    let Some(summed) = summed else {
        return Ok(());
    };
    let path = not_found_path(base);
    let file = File::create(&path).map_err(|e| Error::io(&path, e))?;
    let mut out = BufWriter::with_capacity(STREAM_BUF_SIZE, file);
    let uncovered = hits
        .write_not_found(&summed, &mut out)
        .map_err(|e| Error::io(&path, e))?;
    out.flush().map_err(|e| Error::io(&path, e))?;
    drop(out);
    if uncovered == 0 {
        log::warn!("removing empty hit-ID report {}", path.display());
        fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
    } else {
        log::info!("{} hit IDs not found", uncovered);
    }
    Ok(())
}

// Gather control flags broadcast by rank 0.
const GATHER_RUN: u8 = 1;
const GATHER_EMPTY: u8 = 2;
const GATHER_FAILED: u8 = 3;

/// Concatenates the per-worker output files into `combined`, in rank
/// order, streaming [`TRANSFER_CHUNK`] pieces to rank 0. Each worker's
/// local file is removed once its bytes are in the combined file. A
/// combined file that would be empty is removed instead.
pub fn gather_outputs<G: Group>(
    group: &mut G,
    combined: &Path,
    local: &Path,
    bytes_written: u64,
) -> Result<()> {
    if group.size() == 1 {
        return Ok(());
    }
    let counts = group.gather_u64(0, bytes_written)?;

    if group.rank() == 0 {
        let counts = counts.ok_or_else(|| Error::Comm("gather returned nothing at root".into()))?;
        let total: u64 = counts.iter().sum();
        let out = if total == 0 {
            let _ = fs::remove_file(combined);
            log::warn!("no output produced by any worker");
            None
        } else {
            match File::create(combined) {
                Ok(file) => match file.set_len(total) {
                    Ok(()) => Some(file),
                    Err(e) => {
                        log::error!("{}: {}", combined.display(), e);
                        None
                    }
                },
                Err(e) => {
                    log::error!("{}: {}", combined.display(), e);
                    None
                }
            }
        };
        let flag = match (&out, total) {
            (_, 0) => GATHER_EMPTY,
            (Some(_), _) => GATHER_RUN,
            (None, _) => GATHER_FAILED,
        };
        group.broadcast(0, &mut vec![flag])?;
        match flag {
            GATHER_RUN => {}
            GATHER_EMPTY => {
                let _ = fs::remove_file(local);
                return Ok(());
            }
            _ => {
                return Err(Error::io(
                    combined,
                    std::io::Error::other("failed to create combined output file"),
                ))
            }
        }
        let mut out = BufWriter::with_capacity(STREAM_BUF_SIZE, out.expect("flag checked"));

        // own data first, then every worker in rank order
        if counts[0] > 0 {
            let mut src = File::open(local).map_err(|e| Error::io(local, e))?;
            let mut buf = vec![0u8; TRANSFER_CHUNK];
            let mut remaining = counts[0];
            while remaining > 0 {
                let n = remaining.min(TRANSFER_CHUNK as u64) as usize;
                src.read_exact(&mut buf[..n]).map_err(|e| Error::io(local, e))?;
                out.write_all(&buf[..n]).map_err(|e| Error::io(combined, e))?;
                remaining -= n as u64;
            }
        }
        for (r, &count) in counts.iter().enumerate().skip(1) {
            let mut remaining = count;
            while remaining > 0 {
                let chunk = group.recv(r)?;
                out.write_all(&chunk).map_err(|e| Error::io(combined, e))?;
                remaining = remaining.saturating_sub(chunk.len() as u64);
            }
        }
        out.flush().map_err(|e| Error::io(combined, e))?;
    } else {
        let mut flag = Vec::new();
        group.broadcast(0, &mut flag)?;
        match flag.first().copied() {
            Some(GATHER_RUN) => {}
            Some(GATHER_EMPTY) => {
                let _ = fs::remove_file(local);
                return Ok(());
            }
            _ => {
                return Err(Error::Comm(
                    "rank 0 failed to create the combined output file".into(),
                ))
            }
        }
        if bytes_written > 0 {
            let mut src = File::open(local).map_err(|e| Error::io(local, e))?;
            let mut buf = vec![0u8; TRANSFER_CHUNK];
            let mut remaining = bytes_written;
            while remaining > 0 {
                let n = remaining.min(TRANSFER_CHUNK as u64) as usize;
                src.read_exact(&mut buf[..n]).map_err(|e| Error::io(local, e))?;
                group.send(0, &buf[..n])?;
                remaining -= n as u64;
            }
        }
    }
    let _ = fs::remove_file(local);
    Ok(())
}
