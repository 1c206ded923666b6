pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("compile error on {device}: {message}")]
    Compile { device: String, message: String },

    #[error("execution error on {device}: {message}")]
    Execution { device: String, message: String },

    #[error("partition error: {0}")]
    Partition(String),

    #[error("worker panic: {0}")]
    WorkerPanic(String),

    #[cfg(feature = "gpu")]
    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn compile<D: Into<String>, S: Into<String>>(device: D, msg: S) -> Self {
        Error::Compile {
            device: device.into(),
            message: msg.into(),
        }
    }

    pub fn execution<D: Into<String>, S: Into<String>>(device: D, msg: S) -> Self {
        Error::Execution {
            device: device.into(),
            message: msg.into(),
        }
    }

    pub fn partition<S: Into<String>>(msg: S) -> Self {
        Error::Partition(msg.into())
    }

    #[cfg(feature = "gpu")]
    pub fn gpu<S: Into<String>>(msg: S) -> Self {
        Error::Gpu(msg.into())
    }

    /// True for errors raised before anything was dispatched.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// True for errors coming out of a device submission.
    pub fn is_execution(&self) -> bool {
        matches!(self, Error::Execution { .. } | Error::WorkerPanic(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::compile("GeForce RTX 3080", "unknown identifier `foo`");
        assert_eq!(
            err.to_string(),
            "compile error on GeForce RTX 3080: unknown identifier `foo`"
        );

        let err = Error::partition("group size must be > 0");
        assert_eq!(err.to_string(), "partition error: group size must be > 0");
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::config("no devices").is_config());
        assert!(!Error::config("no devices").is_execution());
        assert!(Error::execution("cpu", "boom").is_execution());
        assert!(Error::WorkerPanic("boom".into()).is_execution());
    }
}
