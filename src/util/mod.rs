mod address;
pub mod constants;
pub mod conversions;
pub mod mark_bitmap;
pub mod memory;
pub mod options;
pub mod preserved_marks;
pub mod test_util;

pub use address::{Address, ByteOffset, ByteSize, ObjectReference};
