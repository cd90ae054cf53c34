use thiserror::Error;

/// Errors surfaced by the query engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("index writer for {0} is busy")]
    WriterBusy(String),
}

/// The result cache could not be reached. Queries fall back to the live index.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled: {0}")]
    Sled(#[from] sled::Error),

    #[error("encoding: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt store: {0}")]
    Corrupt(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = EngineError::ProjectNotFound("shop-1".into());
        assert!(err.to_string().contains("shop-1"));
        let err = CacheError::Unavailable("redis down".into());
        assert!(err.to_string().contains("unavailable"));
    }
}
