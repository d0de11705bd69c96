use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OpStatus {
    Pending,
    Success,
    Error,
}

/// A long-running call as the user sees it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub id: Uuid,
    pub kind: String,
    pub status: OpStatus,
    pub message: String,
    /// Failing step, for errors.
    pub step: Option<String>,
    pub started_ms: u64,
    pub finished_ms: Option<u64>,
}

/// In-flight operation status, one entry per started operation.
/// Finished entries beyond `retain` are dropped oldest first.
#[derive(Debug)]
pub struct OperationTracker {
    ops: RwLock<HashMap<Uuid, Operation>>,
    retain: usize,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl Default for OperationTracker {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl OperationTracker {
    pub fn new(retain: usize) -> Self {
        Self { ops: RwLock::new(HashMap::new()), retain: retain.max(1) }
    }

    pub fn begin(&self, kind: &str, message: impl Into<String>) -> Uuid {
        let id = Uuid::new_v4();
        let op = Operation {
            id,
            kind: kind.to_string(),
            status: OpStatus::Pending,
            message: message.into(),
            step: None,
            started_ms: now_ms(),
            finished_ms: None,
        };
        if let Ok(mut ops) = self.ops.write() {
            ops.insert(id, op);
        }
        id
    }

    pub fn succeed(&self, id: Uuid, message: impl Into<String>) {
        self.finish(id, OpStatus::Success, message.into(), None);
    }

    pub fn fail(&self, id: Uuid, step: &str, message: impl Into<String>) {
        self.finish(id, OpStatus::Error, message.into(), Some(step.to_string()));
    }

    pub fn status(&self, id: Uuid) -> Option<Operation> {
        self.ops.read().ok().and_then(|ops| ops.get(&id).cloned())
    }

    pub fn len(&self) -> usize {
        self.ops.read().map(|ops| ops.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn finish(&self, id: Uuid, status: OpStatus, message: String, step: Option<String>) {
        let Ok(mut ops) = self.ops.write() else { return };
        if let Some(op) = ops.get_mut(&id) {
            op.status = status;
            op.message = message;
            op.step = step;
            op.finished_ms = Some(now_ms());
        }

        let mut finished: Vec<(u64, Uuid)> = ops
            .values()
            .filter_map(|op| op.finished_ms.map(|t| (t, op.id)))
            .collect();
        if finished.len() > self.retain {
            finished.sort();
            let excess = finished.len() - self.retain;
            for (_, old) in finished.into_iter().take(excess) {
                ops.remove(&old);
            }
        }
    }
}
