use std::io;

/// Errors raised while turning an MP3 byte stream into PCM.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("I/O error ({kind:?}): {message}")]
    Io {
        kind: io::ErrorKind,
        message: String,
    },
    #[error("corrupt MPEG audio data at byte {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },
    #[error("stream truncated at byte {offset}: {missing} bytes missing from the last frame")]
    Truncated { offset: u64, missing: usize },
    #[error("unsupported audio stream: {0}")]
    Unsupported(String),
    #[error("MP3 decode error: {0}")]
    Decode(String),
    #[error("internal channel closed unexpectedly")]
    ChannelClosed,
    #[error("{role} task failed: {details}")]
    TaskJoin { role: &'static str, details: String },
}

impl DecodeError {
    /// True when the error came from reading the compressed input.
    pub fn is_io(&self) -> bool {
        matches!(self, DecodeError::Io { .. })
    }
}

impl From<io::Error> for DecodeError {
    fn from(err: io::Error) -> Self {
        // ChannelReader carries scanner errors through std::io
        if let Some(inner) = err.get_ref().and_then(|e| e.downcast_ref::<DecodeError>()) {
            return inner.clone();
        }
        DecodeError::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<String> for DecodeError {
    fn from(msg: String) -> Self {
        DecodeError::Decode(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_decode_errors_survive_io_round_trip() {
        let original = DecodeError::Truncated {
            offset: 8340,
            missing: 217,
        };
        let io_err = io::Error::other(original.clone());
        assert_eq!(DecodeError::from(io_err), original);
    }

    #[test]
    fn plain_io_errors_keep_their_kind() {
        let err = DecodeError::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(err.is_io());
        assert!(matches!(
            err,
            DecodeError::Io {
                kind: io::ErrorKind::ConnectionReset,
                ..
            }
        ));
    }
}
