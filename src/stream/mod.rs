pub mod pipe;
pub mod session;
pub mod transcoder;

pub use pipe::BytePipe;
pub use session::{StreamSession, StreamSnapshot, StreamState};
pub use transcoder::Transcoder;
