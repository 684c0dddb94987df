pub mod callback;
pub mod ring_buffer;
