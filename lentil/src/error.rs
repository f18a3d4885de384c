use thiserror::Error;

#[derive(Debug, Error)]
pub enum LentilError {
    #[error("malformed input at line {line_no}: `{line}`")]
    Format { line_no: usize, line: Box<str> },

    #[error("nothing to work on: {0}")]
    EmptyInput(&'static str),

    #[error("inference failed for guide {guide}: {message}")]
    Inference { guide: u64, message: String },

    #[error("output directory {0} is not available")]
    OutputUnavailable(Box<str>),

    #[error("configuration: {0}")]
    Configuration(String),

    #[error("interrupted")]
    Interrupted,
}

impl LentilError {
    pub fn inference(guide: u64, err: impl std::fmt::Display) -> Self {
        Self::Inference {
            guide,
            message: err.to_string(),
        }
    }
}
