//! PDF writing for incremental updates.
//!
//! ## Architecture
//!
//! ```text
//! [ContentStreamBuilder] (stamp operators → content stream bytes)
//!     ↓
//! [IncrementalWriter] (new and replaced objects + xref section + trailer)
//!     ↓
//! [ObjectSerializer] (serializes PDF objects)
//!     ↓
//! original bytes ++ update
//! ```

mod content_stream;
mod incremental;
mod object_serializer;

pub use content_stream::{ContentStreamBuilder, ContentStreamOp};
pub use incremental::{IncrementalOutput, IncrementalWriter};
pub use object_serializer::{format_real, ObjectSerializer};
