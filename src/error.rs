use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VqaError>;

#[derive(Debug, Error)]
pub enum VqaError {
    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The pretrained checkpoint could not be parsed at all.
    #[error("failed to read checkpoint {path:?}: {reason}")]
    Checkpoint { path: PathBuf, reason: String },

    /// A parameter path requested during construction is absent from the checkpoint map.
    #[error("required tensor `{0}` is missing from the pretrained checkpoint")]
    MissingTensor(String),

    #[error("tensor `{path}` has shape {actual:?}, expected {expected:?}")]
    TensorShape {
        path: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("tensor `{name}` has unsupported dtype {dtype}")]
    UnsupportedDtype { name: String, dtype: String },

    #[error("word `{0}` is not in the vocabulary")]
    OutOfVocabulary(String),

    #[error("no embedding vector for word `{0}`")]
    MissingEmbedding(String),

    #[error("invalid answer dictionary: {0}")]
    InvalidDictionary(String),

    #[error("malformed example record at line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    /// A stored record refers to a word or answer id the model does not know.
    #[error("invalid example record for {image_file:?}: {reason}")]
    InvalidRecord { image_file: String, reason: String },

    #[error("failed to decode image {path:?}: {reason}")]
    ImageDecode { path: PathBuf, reason: String },

    /// Runtime input does not match the configured model geometry.
    #[error("{what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to persist {what}: {reason}")]
    Recorder { what: String, reason: String },

    #[error("input pipeline closed before a full batch was available")]
    PipelineExhausted,

    #[error("input pipeline worker failed: {0}")]
    Worker(String),
}

impl VqaError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        VqaError::Io {
            path: path.into(),
            source,
        }
    }
}
