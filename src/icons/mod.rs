//! Icon assets: the on-disk repository, the `.ico` transcoder and the git refresh job

pub mod refresh;
pub mod repository;
pub mod transcoder;

pub use refresh::IconRefresher;
pub use repository::IconRepository;
pub use transcoder::{
    IcoImageBackend, IconFrame, IconTranscoder, ImageInspector, ImageRenderer, select_frame,
};
