use thiserror::Error;

#[derive(Error, Debug)]
pub enum RiskError {
    #[error("Feature schema mismatch: missing {missing:?}")]
    Schema { missing: Vec<String> },

    #[error("Artifact not found: {path}")]
    ArtifactNotFound { path: String },

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Models not loaded")]
    NotReady,

    #[error("Training run already recorded for version {0}")]
    DuplicateVersion(String),

    #[error("Feature extraction failed: {0}")]
    FeatureExtraction(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Matrix shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RiskError {
    /// Build a schema error from any list of missing feature names.
    pub fn schema<I, S>(missing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RiskError::Schema {
            missing: missing.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_artifact_not_found(&self) -> bool {
        matches!(self, RiskError::ArtifactNotFound { .. })
    }
}

pub type RiskResult<T> = Result<T, RiskError>;
