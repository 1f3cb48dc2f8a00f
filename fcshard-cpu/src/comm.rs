//! In-process collective communication between threads.
//!
//! [`LocalComm`] plays the role NCCL plays on GPUs: one communicator per
//! rank, all created together, each driven by its own thread. It is what the
//! CPU backend uses to run a model-parallel group inside a single process.

use std::sync::{Arc, Barrier, Mutex, PoisonError};

use fcshard::backend::Comm;
use fcshard::tensor::Tensor;
use fcshard::{Error, Result};

use crate::tensor::CpuTensor;

/// Shared exchange area for one communicator group.
struct Exchange {
    slots: Mutex<Vec<Option<CpuTensor>>>,
    barrier: Barrier,
}

/// One rank's communicator in an in-process group.
///
/// Every rank's thread must call each collective in the same order; a rank
/// that stops participating blocks the others forever.
pub struct LocalComm {
    rank: usize,
    world_size: usize,
    exchange: Arc<Exchange>,
}

impl LocalComm {
    /// Create communicators for a group of `world_size` ranks.
    ///
    /// Returns one `LocalComm` per rank, ordered by rank.
    ///
    /// # Errors
    /// Returns an error if `world_size` is zero.
    pub fn group(world_size: usize) -> Result<Vec<Self>> {
        if world_size == 0 {
            return Err(Error::Config(
                "communicator group needs at least one rank".to_string(),
            ));
        }
        let exchange = Arc::new(Exchange {
            slots: Mutex::new(vec![None; world_size]),
            barrier: Barrier::new(world_size),
        });
        Ok((0..world_size)
            .map(|rank| Self {
                rank,
                world_size,
                exchange: Arc::clone(&exchange),
            })
            .collect())
    }
}

impl Comm for LocalComm {
    type Tensor = CpuTensor;

    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    /// Publish `input`, wait for every rank, then copy every rank's tensor
    /// onto this rank's device.
    fn all_gather(&self, input: &CpuTensor) -> Result<Vec<CpuTensor>> {
        {
            let mut slots = self
                .exchange
                .slots
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            slots[self.rank] = Some(input.clone());
        }
        self.exchange.barrier.wait();

        let published: Vec<Option<CpuTensor>> = self
            .exchange
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        // Nobody may overwrite a slot until every rank has read it.
        self.exchange.barrier.wait();

        let device = input.device();
        published
            .into_iter()
            .enumerate()
            .map(|(rank, slot)| {
                let tensor = slot.ok_or_else(|| {
                    Error::Comm(format!("rank {rank} did not publish a tensor"))
                })?;
                if tensor.shape() != input.shape() || tensor.dtype() != input.dtype() {
                    return Err(Error::Comm(format!(
                        "rank {rank} sent {:?} {}, rank {} sent {:?} {}",
                        tensor.shape(),
                        tensor.dtype(),
                        self.rank,
                        input.shape(),
                        input.dtype()
                    )));
                }
                Ok(tensor.to_device(device))
            })
            .collect()
    }
}
