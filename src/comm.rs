//! Group messaging between workers.
//!
//! The coordination layer only needs a handful of collective primitives, so
//! the transport is abstracted behind the [`Group`] trait: broadcast,
//! gather, reduction, point-to-point transfers, a barrier, and the ability
//! to downsize the group when the partition planner decides the input
//! cannot feed every worker. The planner and coordinator are written
//! against the trait and never see the transport.
//!
//! Two transports are provided: [`SoloGroup`] for single-worker runs, where
//! every operation is trivial, and [`ThreadGroup`], a mesh of channels
//! connecting one worker thread per rank. Workers share no mutable state;
//! all coordination is explicit message passing, and each worker opens its
//! own files.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::error::{Error, Result};

/// Collective-messaging primitives available to every worker.
///
/// All collectives must be entered by every active rank; `root` designates
/// the rank that sources a broadcast or sinks a gather/reduction.
pub trait Group {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Name of the node this rank runs on; used to pick one replication
    /// representative per distinct host.
    fn node_name(&self) -> &str;

    fn barrier(&mut self) -> Result<()>;

    /// Root's `data` is distributed to every rank; on other ranks `data`
    /// is replaced by the received payload.
    fn broadcast(&mut self, root: usize, data: &mut Vec<u8>) -> Result<()>;

    /// Collects one value per rank, in rank order. `Some` at root only.
    fn gather_u64(&mut self, root: usize, value: u64) -> Result<Option<Vec<u64>>>;

    /// Element-wise sum of equally sized vectors. `Some` at root only.
    fn reduce_sum_u32(&mut self, root: usize, values: &[u32]) -> Result<Option<Vec<u32>>>;

    fn send(&mut self, to: usize, data: &[u8]) -> Result<()>;
    fn recv(&mut self, from: usize) -> Result<Vec<u8>>;

    /// Downsizes the group to its first `keep` ranks. Returns `false` on
    /// excluded ranks, which must stop using the group and finish with
    /// success. Every active rank must call this with the same `keep`.
    fn shrink(&mut self, keep: usize) -> bool;
}

/// Best-effort hostname, for the one-representative-per-node replication.
pub fn hostname() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.is_empty() {
            return name;
        }
    }
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "localhost".to_string())
}

/// The trivial single-worker group.
pub struct SoloGroup {
    name: String,
}

impl SoloGroup {
    pub fn new() -> SoloGroup {
        SoloGroup { name: hostname() }
    }
}

impl Default for SoloGroup {
    fn default() -> Self {
        SoloGroup::new()
    }
}

impl Group for SoloGroup {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn node_name(&self) -> &str {
        &self.name
    }

    fn barrier(&mut self) -> Result<()> {
        Ok(())
    }

    fn broadcast(&mut self, _root: usize, _data: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }

    fn gather_u64(&mut self, _root: usize, value: u64) -> Result<Option<Vec<u64>>> {
        Ok(Some(vec![value]))
    }

    fn reduce_sum_u32(&mut self, _root: usize, values: &[u32]) -> Result<Option<Vec<u32>>> {
        Ok(Some(values.to_vec()))
    }

    fn send(&mut self, _to: usize, _data: &[u8]) -> Result<()> {
        Err(Error::Comm("no peers in a solo group".into()))
    }

    fn recv(&mut self, _from: usize) -> Result<Vec<u8>> {
        Err(Error::Comm("no peers in a solo group".into()))
    }

    fn shrink(&mut self, keep: usize) -> bool {
        keep >= 1
    }
}

/// One rank of a channel-mesh group.
///
/// Every ordered rank pair has its own channel, so a receive from a
/// specific peer can never observe another peer's message. Collectives are
/// built from the point-to-point channels and always iterate the active
/// ranks in order, which keeps them deterministic.
pub struct ThreadGroup {
    rank: usize,
    active: usize,
    name: String,
    txs: Vec<Sender<Vec<u8>>>,
    rxs: Vec<Receiver<Vec<u8>>>,
}

impl ThreadGroup {
    /// Creates the connected handles of an `n`-rank group; handle `i` is
    /// moved to the thread acting as rank `i`.
    pub fn mesh(n: usize) -> Vec<ThreadGroup> {
        assert!(n > 0);
        let name = hostname();
        let mut txs: Vec<Vec<Sender<Vec<u8>>>> = (0..n).map(|_| Vec::with_capacity(n)).collect();
        let mut rxs: Vec<Vec<Receiver<Vec<u8>>>> = (0..n).map(|_| Vec::with_capacity(n)).collect();
        for src in 0..n {
            for dst in 0..n {
                let (tx, rx) = unbounded();
                txs[src].push(tx);
                rxs[dst].push(rx);
            }
        }
        txs.into_iter()
            .zip(rxs)
            .enumerate()
            .map(|(rank, (txs, rxs))| ThreadGroup {
                rank,
                active: n,
                name: name.clone(),
                txs,
                rxs,
            })
            .collect()
    }

    fn push(&self, to: usize, data: Vec<u8>) -> Result<()> {
        self.txs[to]
            .send(data)
            .map_err(|_| Error::Comm(format!("rank {} is gone", to)))
    }

    fn pull(&self, from: usize) -> Result<Vec<u8>> {
        self.rxs[from]
            .recv()
            .map_err(|_| Error::Comm(format!("rank {} is gone", from)))
    }
}

impl Group for ThreadGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.active
    }

    fn node_name(&self) -> &str {
        &self.name
    }

    fn barrier(&mut self) -> Result<()> {
        if self.rank == 0 {
            for r in 1..self.active {
                self.pull(r)?;
            }
            for r in 1..self.active {
                self.push(r, Vec::new())?;
            }
        } else {
            self.push(0, Vec::new())?;
            self.pull(0)?;
        }
        Ok(())
    }

    fn broadcast(&mut self, root: usize, data: &mut Vec<u8>) -> Result<()> {
        if self.rank == root {
            for r in 0..self.active {
                if r != root {
                    self.push(r, data.clone())?;
                }
            }
        } else {
            *data = self.pull(root)?;
        }
        Ok(())
    }

    fn gather_u64(&mut self, root: usize, value: u64) -> Result<Option<Vec<u64>>> {
        if self.rank == root {
            let mut out = vec![0u64; self.active];
            out[root] = value;
            for r in 0..self.active {
                if r == root {
                    continue;
                }
                let bytes = self.pull(r)?;
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Comm(format!("short gather payload from rank {}", r)))?;
                out[r] = u64::from_le_bytes(arr);
            }
            Ok(Some(out))
        } else {
            self.push(root, value.to_le_bytes().to_vec())?;
            Ok(None)
        }
    }

    fn reduce_sum_u32(&mut self, root: usize, values: &[u32]) -> Result<Option<Vec<u32>>> {
        if self.rank == root {
            let mut sum = values.to_vec();
            for r in 0..self.active {
                if r == root {
                    continue;
                }
                let bytes = self.pull(r)?;
                let part: Vec<u32> = bincode::deserialize(&bytes)
                    .map_err(|e| Error::Comm(format!("bad reduce payload from rank {}: {}", r, e)))?;
                if part.len() != sum.len() {
                    return Err(Error::Comm(format!(
                        "reduce length mismatch from rank {}",
                        r
                    )));
                }
                for (acc, v) in sum.iter_mut().zip(part) {
                    *acc += v;
                }
            }
            Ok(Some(sum))
        } else {
            let bytes = bincode::serialize(values)
                .map_err(|e| Error::Comm(format!("encoding reduce payload: {}", e)))?;
            self.push(root, bytes)?;
            Ok(None)
        }
    }

    fn send(&mut self, to: usize, data: &[u8]) -> Result<()> {
        self.push(to, data.to_vec())
    }

    fn recv(&mut self, from: usize) -> Result<Vec<u8>> {
        self.pull(from)
    }

    fn shrink(&mut self, keep: usize) -> bool {
        self.active = keep.min(self.active).max(1);
        self.rank < self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_utils::thread;

    fn with_group<F>(n: usize, f: F)
    where
        F: Fn(&mut ThreadGroup) + Send + Sync,
    {
        let handles = ThreadGroup::mesh(n);
        let f = &f;
        thread::scope(|s| {
            for mut g in handles {
                s.spawn(move |_| f(&mut g));
            }
        })
        .unwrap();
    }

    #[test]
    fn broadcast_reaches_all_ranks() {
        with_group(4, |g| {
            let mut data = if g.rank() == 0 {
                b"plan".to_vec()
            } else {
                Vec::new()
            };
            g.broadcast(0, &mut data).unwrap();
            assert_eq!(data, b"plan");
        });
    }

    #[test]
    fn gather_collects_in_rank_order() {
        with_group(3, |g| {
            let got = g.gather_u64(0, 10 * g.rank() as u64).unwrap();
            if g.rank() == 0 {
                assert_eq!(got.unwrap(), vec![0, 10, 20]);
            } else {
                assert!(got.is_none());
            }
        });
    }

    #[test]
    fn reduce_sums_elementwise() {
        with_group(4, |g| {
            let mine = vec![g.rank() as u32, 1];
            let got = g.reduce_sum_u32(0, &mine).unwrap();
            if g.rank() == 0 {
                assert_eq!(got.unwrap(), vec![6, 4]);
            }
        });
    }

    #[test]
    fn shrink_excludes_high_ranks() {
        with_group(4, |g| {
            let stays = g.shrink(2);
            assert_eq!(stays, g.rank() < 2);
            if !stays {
                return;
            }
            assert_eq!(g.size(), 2);
            // the shrunk group still collectives correctly
            let got = g.gather_u64(0, g.rank() as u64 + 7).unwrap();
            if g.rank() == 0 {
                assert_eq!(got.unwrap(), vec![7, 8]);
            }
        });
    }

    #[test]
    fn point_to_point_round_trip() {
        with_group(2, |g| {
            if g.rank() == 0 {
                g.send(1, b"chunk").unwrap();
                assert_eq!(g.recv(1).unwrap(), b"ack");
            } else {
                assert_eq!(g.recv(0).unwrap(), b"chunk");
                g.send(0, b"ack").unwrap();
            }
        });
    }

    #[test]
    fn barrier_all_ranks() {
        with_group(3, |g| {
            g.barrier().unwrap();
            g.barrier().unwrap();
        });
    }

    #[test]
    fn solo_group_is_trivial() {
        let mut g = SoloGroup::new();
        assert_eq!(g.size(), 1);
        assert_eq!(g.gather_u64(0, 5).unwrap(), Some(vec![5]));
        assert_eq!(g.reduce_sum_u32(0, &[1, 2]).unwrap(), Some(vec![1, 2]));
        assert!(g.shrink(1));
        let mut data = b"x".to_vec();
        g.broadcast(0, &mut data).unwrap();
        assert_eq!(data, b"x");
    }
}
