pub mod audio;
pub mod separator;
pub mod shift_progress;
