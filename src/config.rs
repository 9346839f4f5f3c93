//! Process-level configuration surface.
//!
//! The core itself needs none of this to function — `Store`/`StoreRegistry`
//! take a root path directly. This struct exists so the CLI (and, someday,
//! an external HTTP layer) has one place to parse `--root`/`--bind`/
//! `--verbose` into, instead of threading loose strings through call sites.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory under which every namespace's subdirectory lives.
    pub root: PathBuf,
    /// Address an (external, not-implemented-here) HTTP layer would bind.
    /// Kept only so config parsing has a stable home; the core never opens
    /// a socket.
    pub bind: String,
    /// 0 = warnings and errors only, 1 = info, 2+ = debug/trace.
    pub verbosity: u8,
}

impl Config {
    pub fn tracing_level(&self) -> tracing::Level {
        match self.verbosity {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self { root: PathBuf::from("."), bind: ":8000".to_string(), verbosity: 0 }
    }
}
