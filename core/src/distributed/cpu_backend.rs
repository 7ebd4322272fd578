use super::backend::CollectiveBackend;
use crate::error::{Error, Result};
use crate::tensor::Tensor;
use crossbeam::channel::{self, Receiver, Sender};

/// A CPU collective backend.
///
/// Implements the **Ring All-Reduce** algorithm using `crossbeam` channels. Each rank
/// talks only to its neighbours: it receives from `rank - 1` and sends to `rank + 1`.
pub struct CpuBackend {
    rank: usize,
    world_size: usize,
    left_rx: Receiver<Tensor>, // Receive from rank - 1
    right_tx: Sender<Tensor>,  // Send to rank + 1
}

impl CpuBackend {
    pub fn new(
        rank: usize,
        world_size: usize,
        left_rx: Receiver<Tensor>,
        right_tx: Sender<Tensor>,
    ) -> Self {
        Self {
            rank,
            world_size,
            left_rx,
            right_tx,
        }
    }

    /// Wires a full ring of `world_size` backends, indexed by rank.
    pub fn ring(world_size: usize) -> Vec<CpuBackend> {
        let (txs, mut rxs): (Vec<Sender<Tensor>>, Vec<Receiver<Tensor>>) =
            (0..world_size).map(|_| channel::unbounded()).unzip();
        // Channel i carries rank i's messages to rank i + 1.
        rxs.rotate_right(1);
        txs.into_iter()
            .zip(rxs)
            .enumerate()
            .map(|(rank, (right_tx, left_rx))| CpuBackend::new(rank, world_size, left_rx, right_tx))
            .collect()
    }

    fn send(&self, tensor: Tensor) -> Result<()> {
        self.right_tx
            .send(tensor)
            .map_err(|_| Error::Collective(format!("rank {}: right neighbour hung up", self.rank)))
    }

    fn recv(&self) -> Result<Tensor> {
        self.left_rx
            .recv()
            .map_err(|_| Error::Collective(format!("rank {}: left neighbour hung up", self.rank)))
    }

    fn chunk_index(&self, offset: isize) -> usize {
        (self.rank as isize + offset).rem_euclid(self.world_size as isize) as usize
    }
}

impl CollectiveBackend for CpuBackend {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_reduce_sum(&self, tensor: &Tensor) -> Result<Tensor> {
        if self.world_size == 1 {
            return Ok(tensor.clone());
        }
        let mut chunks = tensor.split_flat(self.world_size);

        // --- Phase 1: Scatter-Reduce ---
        // At step s, rank r sends chunk (r - s) and folds the received chunk (r - s - 1)
        // into its own copy. Afterwards rank r owns the full sum of chunk (r + 1).
        for step in 0..self.world_size - 1 {
            let send_idx = self.chunk_index(-(step as isize));
            let recv_idx = self.chunk_index(-(step as isize) - 1);
            self.send(chunks[send_idx].clone())?;
            let received = self.recv()?;
            chunks[recv_idx].add_assign(&received)?;
        }

        // --- Phase 2: All-Gather ---
        // Pass the reduced chunks around the ring so every rank ends with all of them.
        for step in 0..self.world_size - 1 {
            let send_idx = self.chunk_index(1 - step as isize);
            let recv_idx = self.chunk_index(-(step as isize));
            self.send(chunks[send_idx].clone())?;
            chunks[recv_idx] = self.recv()?;
        }

        Ok(Tensor::concat_flat(&chunks, tensor.shape())?)
    }

    fn broadcast(&self, tensor: &Tensor, root: usize) -> Result<Tensor> {
        if root >= self.world_size {
            return Err(Error::Collective(format!(
                "broadcast root {root} outside a world of size {}",
                self.world_size
            )));
        }
        if self.world_size == 1 {
            return Ok(tensor.clone());
        }
        let last = (root + self.world_size - 1) % self.world_size;
        if self.rank == root {
            self.send(tensor.clone())?;
            return Ok(tensor.clone());
        }
        let value = self.recv()?;
        if self.rank != last {
            self.send(value.clone())?;
        }
        Ok(value)
    }
}
