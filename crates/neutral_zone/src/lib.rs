//! # Neutral Zone
//!
//! The shared, format-agnostic set of named time-ordered buffers between
//! readers and trials, plus the transformer pipeline that drives derived
//! buffers.
//!
//! Buffers hold a sliding window of time: routers append at the tail, the
//! extractor queries copies out of the middle and discards at the head once
//! a trial has been emitted. Every buffer has a single writer (its router)
//! and a single reader (the extractor), so no locking is needed in the
//! cooperative loop.
//!
//! ## Example
//!
//! ```
//! use contracts::{BufferData, NumericEvents};
//! use neutral_zone::Buffer;
//!
//! let prototype = BufferData::NumericEvents(NumericEvents::empty());
//! let mut buffer = Buffer::from_prototype(&prototype);
//! let rows = NumericEvents::new(vec![vec![0.5, 42.0]]);
//! buffer.append(BufferData::NumericEvents(rows)).unwrap();
//! assert_eq!(buffer.end_time(), Some(0.5));
//! ```

mod buffer;
mod transformers;
mod zone;

pub use buffer::Buffer;
pub use transformers::{FilterRange, OffsetThenGain, SparseSignal, Transformer};
pub use zone::NeutralZone;
