//! Resource management

use crate::error::PitwallError;

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, SemaphorePermit};

/// [crate::resource_manager::ResourceManager] provides a simple way to allocate various resources
/// to tasks. Resource management is performed using a Tokio Semaphore for each type of resource.
#[derive(Debug)]
pub struct ResourceManager {
    /// Optional semaphore for memory (bytes) held by uploaded telemetry.
    memory: Option<Semaphore>,

    /// Optional total memory pool in bytes.
    total_memory: Option<usize>,

    /// Optional semaphore for CPU-bound chunk tasks.
    ///
    /// Permits are owned so that they can move into spawned workers.
    tasks: Option<Arc<Semaphore>>,
}

impl ResourceManager {
    /// Returns a new ResourceManager object.
    pub fn new(memory_limit: Option<usize>, task_limit: Option<usize>) -> Self {
        Self {
            memory: memory_limit.map(Semaphore::new),
            total_memory: memory_limit,
            tasks: task_limit.map(|limit| Arc::new(Semaphore::new(limit))),
        }
    }

    /// Acquire memory resource.
    pub async fn memory(&self, bytes: usize) -> Result<Option<SemaphorePermit>, PitwallError> {
        if let Some(total_memory) = self.total_memory {
            if bytes > total_memory {
                return Err(PitwallError::InsufficientMemory {
                    requested: bytes,
                    total: total_memory,
                });
            };
        };
        if let Some(sem) = &self.memory {
            sem.acquire_many(bytes.try_into()?)
                .await
                .map(Some)
                .map_err(|err| err.into())
        } else {
            Ok(None)
        }
    }

    /// Acquire memory for `bytes` more, on top of `held` bytes the caller already has.
    ///
    /// Fails instead of waiting if the two together exceed the whole pool.
    pub async fn more_memory(
        &self,
        held: usize,
        bytes: usize,
    ) -> Result<Option<SemaphorePermit>, PitwallError> {
        if let Some(total_memory) = self.total_memory {
            let requested = held.saturating_add(bytes);
            if requested > total_memory {
                return Err(PitwallError::InsufficientMemory {
                    requested,
                    total: total_memory,
                });
            }
        }
        self.memory(bytes).await
    }

    /// Acquire a chunk task resource.
    pub async fn task(&self) -> Result<Option<OwnedSemaphorePermit>, PitwallError> {
        if let Some(sem) = &self.tasks {
            sem.clone()
                .acquire_owned()
                .await
                .map(Some)
                .map_err(|err| err.into())
        } else {
            Ok(None)
        }
    }
}
