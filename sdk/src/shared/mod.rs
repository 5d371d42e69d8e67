pub mod alloy_tools;
pub mod ordering_buffer;

pub use ordering_buffer::OrderedBuffer;
