//! `StateSaveEffects`: the state-save directory and atomic-file-replace
//! primitive. Out of scope;
//! only its contract appears here — the actual
//! `write(new) → fsync → link(reg→old) → unlink(reg) → link(new→reg) →
//! unlink(new)` shuffle is a filesystem concern outside this crate family.

use crate::errors::StateSaveError;
use async_trait::async_trait;

#[async_trait]
pub trait StateSaveEffects: Send + Sync {
    /// Atomically replace `filename` in the state-save directory with
    /// `bytes`, using a hard-link shuffle for atomicity.
    async fn atomic_replace(&self, filename: &str, bytes: &[u8]) -> Result<(), StateSaveError>;

    /// Read the current contents of `filename`, if present (used on
    /// restart to load `fed_mgr_state`).
    async fn read(&self, filename: &str) -> Result<Option<Vec<u8>>, StateSaveError>;
}
