use thiserror::Error;

/// Recoverable problem found while decoding or encoding node content
///
/// Warnings never abort an operation; they travel next to the result so the
/// caller can surface them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecWarning {
    #[error("Payload '{key}' exceeds the storage ceiling ({size} bytes); replaced by a placeholder")]
    OversizedPayload { key: String, size: u64 },

    #[error("Payload '{key}' is missing from storage; replaced by a placeholder")]
    MissingBlob { key: String },

    #[error("Offset {offset} is past the end of the text stream ({stream_len}); clamped")]
    OffsetOutOfRange { offset: usize, stream_len: usize },

    #[error("Unknown text attribute '{name}' ignored")]
    UnknownAttribute { name: String },

    #[error("Malformed fragment: {context}")]
    MalformedFragment { context: String },
}
