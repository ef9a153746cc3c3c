pub mod clip;
pub mod codec;
pub mod constants;

pub use clip::{Clip, ClipProgress, PlayOptions};
pub use codec::PacketEncoder;
