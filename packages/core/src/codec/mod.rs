//! Node Content Codec
//!
//! Bidirectional transformation between the flat, offset-addressed records a
//! backend persists ([`NodeRecords`]) and the unified [`ContentModel`].
//!
//! ```text
//!   backend rows/elements/files
//!            │  (backend adapter)
//!            ▼
//!       NodeRecords ──decode──▶ ContentModel
//!            ▲                       │
//!            └───────encode──────────┘
//! ```
//!
//! One decoder and one encoder serve all backends. Backends only translate
//! their physical layout to and from [`records`]; [`xml`] holds the element
//! vocabulary they share.
//!
//! [`ContentModel`]: crate::models::ContentModel

pub mod decoder;
pub mod encoder;
pub mod offset;
pub mod plain_text;
pub mod records;
pub mod style_map;
pub mod warnings;
pub mod xml;

#[cfg(test)]
mod codec_test;

pub use decoder::{decode, DecodedContent};
pub use encoder::{encode, encode_at, EncodedContent};
pub use offset::{resolve_insert_position, resolve_persisted_offset, OffsetResolver};
pub use records::{
    AttachmentRecord, CodeBoxRecord, FragmentBody, ImageRecord, NodeRecords, OffsetFragment,
    Payload, TableRecord, TextFragment, FORMULA_FILENAME,
};
pub use warnings::CodecWarning;
