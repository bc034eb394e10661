use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("resource load error: {0}")]
    ResourceLoad(String),
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("dispatch error: {0}")]
    Dispatch(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_names_the_category() {
        let err = TransportError::Config("x".to_string());
        assert!(format!("{err}").contains("configuration error"));
        let err = TransportError::ResourceLoad("ack template".to_string());
        assert_eq!(err.to_string(), "resource load error: ack template");
    }
}
