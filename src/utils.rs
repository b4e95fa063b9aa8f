use std::{env, path::PathBuf};

pub const DEFAULT_EXTENSION: &str = "stem.mp4";

pub fn separator_script() -> PathBuf {
    env::var("STEMGEN_SEPARATOR_SCRIPT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("demucs_runner.py"))
}

pub fn python_bin() -> String {
    env::var("STEMGEN_PYTHON").unwrap_or_else(|_| "python3".to_string())
}

pub fn tmp_dir() -> PathBuf {
    env::var("STEMGEN_TMP_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir())
}
