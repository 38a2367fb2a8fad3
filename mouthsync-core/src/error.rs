use thiserror::Error;

/// All errors produced by mouthsync-core.
#[derive(Debug, Error)]
pub enum MouthSyncError {
    #[error("render backend failed to start: {0}")]
    BackendStart(String),

    #[error("playback position unavailable: {0}")]
    PositionUnavailable(String),

    #[error("render backend error {code}: {message}")]
    Backend { code: i32, message: String },

    #[error("malformed audio buffer: {0}")]
    MalformedBuffer(String),

    #[error("no utterance is active")]
    NotSpeaking,

    #[error("speak() must be called from within a Tokio runtime")]
    NoRuntime,

    #[error("WAV decode error: {0}")]
    Wav(#[from] hound::Error),

    #[error("settings parse error: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, MouthSyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_display_includes_code() {
        let err = MouthSyncError::Backend {
            code: 3,
            message: "device lost".into(),
        };
        assert_eq!(err.to_string(), "render backend error 3: device lost");
    }

    #[test]
    fn io_errors_convert_and_keep_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "clip.wav");
        let err: MouthSyncError = io.into();
        assert!(err.to_string().contains("clip.wav"));
        let as_std: &dyn std::error::Error = &err;
        assert!(as_std.source().is_some());
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MouthSyncError>();
    }
}
