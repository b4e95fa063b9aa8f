pub mod mp4_atom;
pub mod stem_block;
pub mod synthesizer;
pub mod tags;
