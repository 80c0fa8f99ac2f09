//! Replay recording and playback.
//!
//! A [`ReplayLog`] holds a binary snapshot of the kernel at the start of
//! recording, the host actions applied afterwards, and signature-hash
//! checkpoints. Playing the log back from the snapshot must reproduce every
//! checkpoint exactly.

use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::intent::Intent;
use crate::kernel::{Kernel, SimError};
use crate::serialize::{DeserializeError, SerializeError};

// ---------------------------------------------------------------------------
// ReplayAction
// ---------------------------------------------------------------------------

/// A host action that can be recorded and replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayAction {
    Submit(Command),
    EnqueueIntent(Intent),
    Step,
    StepN(u64),
}

// ---------------------------------------------------------------------------
// Errors and results
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("replay snapshot: {0}")]
    Snapshot(#[from] DeserializeError),
    #[error("replay action {index} failed: {source}")]
    Step {
        index: usize,
        #[source]
        source: SimError,
    },
}

/// Where playback diverged from the recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayMismatch {
    pub action_index: usize,
    pub tick: u64,
    pub expected_hash: u64,
    pub actual_hash: u64,
}

#[derive(Debug)]
pub struct ReplayResult {
    pub actions_executed: usize,
    pub is_verified: bool,
    pub first_mismatch: Option<ReplayMismatch>,
}

// ---------------------------------------------------------------------------
// ReplayLog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayLog {
    /// Binary kernel snapshot taken when recording began.
    pub initial_snapshot: Vec<u8>,
    pub actions: Vec<ReplayAction>,
    /// `(action_index, signature_hash)` after that action.
    pub hash_checkpoints: Vec<(usize, u64)>,
}

impl ReplayLog {
    pub fn new(kernel: &Kernel) -> Result<Self, SerializeError> {
        Ok(Self {
            initial_snapshot: kernel.serialize()?,
            actions: Vec::new(),
            hash_checkpoints: Vec::new(),
        })
    }

    pub fn record(&mut self, action: ReplayAction) {
        self.actions.push(action);
    }

    /// Record an action together with the signature hash observed after it.
    pub fn record_with_hash(&mut self, action: ReplayAction, hash: u64) {
        let index = self.actions.len();
        self.actions.push(action);
        self.hash_checkpoints.push((index, hash));
    }

    /// Apply `action` to `kernel` and record it, checkpointing the resulting
    /// signature hash.
    pub fn apply_and_record(&mut self, kernel: &mut Kernel, action: ReplayAction) -> Result<(), SimError> {
        apply_action(kernel, &action)?;
        self.record_with_hash(action, kernel.signature_hash());
        Ok(())
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    pub fn serialize(&self) -> Result<Vec<u8>, SerializeError> {
        bitcode::serialize(self).map_err(|e| SerializeError::Encode(e.to_string()))
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, DeserializeError> {
        bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Playback
// ---------------------------------------------------------------------------

fn apply_action(kernel: &mut Kernel, action: &ReplayAction) -> Result<(), SimError> {
    match action {
        ReplayAction::Submit(command) => kernel.submit(command.clone()),
        ReplayAction::EnqueueIntent(intent) => {
            kernel.state_mut().enqueue_intent(intent.clone());
        }
        ReplayAction::Step => kernel.step()?,
        ReplayAction::StepN(n) => kernel.step_n(*n)?,
    }
    Ok(())
}

/// Replay a log and compare every checkpoint.
pub fn replay_and_verify(log: &ReplayLog) -> Result<ReplayResult, ReplayError> {
    let mut kernel = Kernel::deserialize(&log.initial_snapshot)?;
    let mut first_mismatch: Option<ReplayMismatch> = None;
    let mut checkpoint_idx = 0;

    for (index, action) in log.actions.iter().enumerate() {
        apply_action(&mut kernel, action).map_err(|source| ReplayError::Step { index, source })?;

        while let Some(&(at, expected_hash)) = log.hash_checkpoints.get(checkpoint_idx) {
            if at != index {
                break;
            }
            let actual_hash = kernel.signature_hash();
            if actual_hash != expected_hash && first_mismatch.is_none() {
                tracing::warn!(index, tick = kernel.tick(), "replay diverged");
                first_mismatch = Some(ReplayMismatch {
                    action_index: index,
                    tick: kernel.tick(),
                    expected_hash,
                    actual_hash,
                });
            }
            checkpoint_idx += 1;
        }
    }

    Ok(ReplayResult {
        actions_executed: log.actions.len(),
        is_verified: first_mismatch.is_none(),
        first_mismatch,
    })
}

/// Replay a log without verification, returning the final kernel.
pub fn replay(log: &ReplayLog) -> Result<Kernel, ReplayError> {
    let mut kernel = Kernel::deserialize(&log.initial_snapshot)?;
    for (index, action) in log.actions.iter().enumerate() {
        apply_action(&mut kernel, action).map_err(|source| ReplayError::Step { index, source })?;
    }
    Ok(kernel)
}

// ===========================================================================
// Tests
// ===========================================================================
