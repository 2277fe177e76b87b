use crate::gateway::ScannerError;
use crate::store::StoreError;

/// Errors that end a run
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Scanner(#[from] ScannerError),
    #[error("failed to load saved hosts: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn exit_code(&self) -> u8 {
        match self {
            EngineError::Scanner(e) => e.exit_code(),
            EngineError::Store(_) => 3,
        }
    }
}
