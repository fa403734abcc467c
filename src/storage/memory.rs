use super::{CheckpointStore, StorageError};
use crate::event_model::IngestionCheckpoint;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

struct MemoryState {
    checkpoints: HashMap<String, IngestionCheckpoint>,
    failing_saves: u32,
}

/// In-memory checkpoint store with save fault injection.
///
/// Shares state across clones so a test can hold a handle while the pipeline
/// owns another.
#[derive(Clone)]
pub struct MemoryCheckpointStore {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                checkpoints: HashMap::new(),
                failing_saves: 0,
            })),
        }
    }

    /// Makes the next `count` calls to `save` fail with a persistence error.
    pub fn fail_next_saves(&self, count: u32) {
        self.state.lock().unwrap().failing_saves = count;
    }

    /// Snapshot of every stored checkpoint, for assertions.
    pub fn snapshot(&self) -> Vec<IngestionCheckpoint> {
        let mut all: Vec<_> = self
            .state
            .lock()
            .unwrap()
            .checkpoints
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        all
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self, session_id: &str) -> Result<Option<IngestionCheckpoint>, StorageError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .checkpoints
            .get(session_id)
            .cloned())
    }

    fn save(&mut self, checkpoint: &IngestionCheckpoint) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_saves > 0 {
            state.failing_saves -= 1;
            return Err(StorageError::Persist("injected save failure".into()));
        }
        state
            .checkpoints
            .insert(checkpoint.session_id.clone(), checkpoint.clone());
        Ok(())
    }

    fn delete(&mut self, session_id: &str) -> Result<(), StorageError> {
        self.state.lock().unwrap().checkpoints.remove(session_id);
        Ok(())
    }
}
