//! Small helpers shared by the cache store and the icon transcoder

pub mod atomic_file;
