//! Offset Resolver
//!
//! Arithmetic between stream positions (what the editor sees) and persisted
//! `char_offset`s.
//!
//! In the persisted format every embedded object counts as one unit of the
//! offset stream, but the persisted text does not contain the objects
//! themselves. On decode, objects are spliced back into a stream builder in
//! ascending offset order. When an object is spliced with a rendered length
//! other than one unit, every later offset shifts by `rendered_len - 1`;
//! tables are cut out of the builder rather than spliced (rendered length 0),
//! so they shift later objects back by one.
//!
//! On encode the inverse holds: an object's persisted offset is the number of
//! text characters before it plus the number of objects already emitted.

/// Stream position at which to splice an object persisted at `persisted_offset`
///
/// Negative results (only possible for malformed input) clamp to zero.
pub fn resolve_insert_position(persisted_offset: usize, running_adjustment: i64) -> usize {
    let position = persisted_offset as i64 + running_adjustment;
    position.max(0) as usize
}

/// Persisted offset of an object found at `stream_position` in the text
/// accumulation, after `extra_offset_counter` objects were already emitted
pub fn resolve_persisted_offset(stream_position: usize, extra_offset_counter: usize) -> usize {
    stream_position + extra_offset_counter
}

/// Decode-side running adjustment
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OffsetResolver {
    running_adjustment: i64,
}

impl OffsetResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn running_adjustment(&self) -> i64 {
        self.running_adjustment
    }

    /// Stream position for the next object persisted at `persisted_offset`
    pub fn insert_position(&self, persisted_offset: usize) -> usize {
        resolve_insert_position(persisted_offset, self.running_adjustment)
    }

    /// Record that an object was spliced with `rendered_len` stream units
    pub fn spliced(&mut self, rendered_len: usize) {
        self.running_adjustment += rendered_len as i64 - 1;
    }

    /// Record an object that splits the stream instead of occupying it
    pub fn split(&mut self) {
        self.spliced(0);
    }
}

/// Encode-side counter of emitted objects
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtraOffsetCounter {
    emitted: usize,
}

impl ExtraOffsetCounter {
    pub fn persisted_offset(&self, stream_position: usize) -> usize {
        resolve_persisted_offset(stream_position, self.emitted)
    }

    pub fn emitted(&mut self) {
        self.emitted += 1;
    }
}
