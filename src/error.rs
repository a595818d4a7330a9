use thiserror::Error;

/// Error taxonomy for the tiled-scene update core.
///
/// `Aborted`, `Transient`, and `Permanent` are expected outcomes of async
/// content fetches and are handled by callers; `Invariant` marks a
/// programming error (id collision, zero-size bounding volume, use of an
/// unregistered CRS code) and should propagate rather than be masked.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("request aborted: {0}")]
    Aborted(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, CoreError::Transient(_))
    }
}

/// Attaches tile-loading context to a fallible result the way
/// `TileLoadingContext` does for the teacher's `AbwError`.
pub trait TileLoadingContext<T> {
    fn tile_loading(self, msg: &str) -> Result<T, CoreError>;
}

impl<T, E> TileLoadingContext<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn tile_loading(self, msg: &str) -> Result<T, CoreError> {
        self.map_err(|e| CoreError::Transient(format!("{msg}: {e}")))
    }
}
