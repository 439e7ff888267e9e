//! Memory backends for buffers.
//!
//! - [`HeapSegment`]: private heap allocation
//! - [`BufferPool`]: fixed-size slots recycled when their last buffer drops
//! - [`MappedFile`]: read-only `mmap` regions shared between buffers

mod bitmap;
mod heap;
mod mapped;
mod pool;
mod segment;

pub use bitmap::AtomicBitmap;
pub use heap::HeapSegment;
pub use mapped::{DEFAULT_MAP_BLOCK, MappedFile};
pub use pool::{BufferPool, PoolStats};
pub use segment::{MemorySegment, MemoryType};
