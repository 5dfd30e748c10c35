//! Renderer error types.

use thiserror::Error;

use crate::pipeline::PipelineKey;

/// Why a pipeline could not be made available.
///
/// Failures are remembered per key, so the same error is returned every time
/// the key is resolved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The factory rejected the pipeline description.
    #[error("Pipeline {key} failed to build: {reason}")]
    BuildFailed {
        /// Key whose build failed.
        key: PipelineKey,
        /// Factory-provided reason.
        reason: String,
    },

    /// The background build thread panicked.
    #[error("Pipeline {key} build thread panicked")]
    BuildPanicked {
        /// Key whose build panicked.
        key: PipelineKey,
    },
}

impl PipelineError {
    /// The key this error belongs to.
    #[inline]
    pub fn key(&self) -> PipelineKey {
        match self {
            Self::BuildFailed { key, .. } | Self::BuildPanicked { key } => *key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{MaterialFlags, MeshFlags};

    #[test]
    fn test_error_display() {
        let key = PipelineKey::new(MeshFlags::REQUIRED, MaterialFlags::WIREFRAME);
        let err = PipelineError::BuildFailed {
            key,
            reason: "no wireframe support".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Pipeline 0x0000000700000004 failed to build: no wireframe support"
        );

        let err = PipelineError::BuildPanicked { key };
        assert!(err.to_string().contains("panicked"));
        assert_eq!(err.key(), key);
    }
}
