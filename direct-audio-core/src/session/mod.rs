pub mod device_session;
pub mod direct_audio;
pub(crate) mod shared;
