use crate::readiness::ReadinessError;

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("empty command for {0}")]
    EmptyCommand(String),

    #[error("spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("wait for {name}: {source}")]
    Wait {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("install {signal} handler: {source}")]
    Signal {
        signal: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("local server not ready: {0}")]
    Readiness(#[from] ReadinessError),
}

pub type InitResult<T> = Result<T, InitError>;
