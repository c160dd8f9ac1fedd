use std::path::PathBuf;

/// Run configuration, threaded through the entry points.
///
/// Source files are resolved against `source_dir`; output is written to
/// `dest_dir` under the same filename. `quality_override` beats the
/// filename-derived quality when set.
#[derive(Debug, Clone)]
pub struct Config {
    pub source_dir: PathBuf,
    pub dest_dir: PathBuf,
    /// Linear scale factor in (0, 1]; `None` defers to the name policy.
    pub quality_override: Option<f32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("."),
            dest_dir: PathBuf::from("compressed"),
            quality_override: None,
        }
    }
}
