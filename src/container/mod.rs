pub mod sink;
pub mod stem_writer;
pub mod track_writer;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
