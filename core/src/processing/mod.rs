pub mod encoder;
pub mod ffmpeg;
pub mod ffprobe;
pub mod process;
