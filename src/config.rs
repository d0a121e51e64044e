use serde::{Deserialize, Serialize};

/// Knobs for one runtime. The CLI builds this from its flags; embedders
/// usually start from `Config::default()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Emit `SRCFILE`/`SRCLINE` markers so runtime errors know where they
    /// happened.
    pub source_debug: bool,
    /// Drop comments and blank lines instead of compiling them.
    pub strip_comments: bool,
    /// Compile but never run.
    pub no_run: bool,
    /// Print a listing of each immediate block before it runs.
    pub dump: bool,
    /// Print listings as JSON instead of text.
    pub dump_json: bool,
    /// Log every executed instruction at trace level.
    pub trace: bool,
    /// Initial value of the guest-visible `arithEpsilon` global.
    pub epsilon: f32,
    pub stack_size: usize,
    pub var_slots: usize,
    pub frame_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            source_debug: false,
            strip_comments: false,
            no_run: false,
            dump: false,
            dump_json: false,
            trace: false,
            epsilon: 1.0e-3,
            stack_size: 1024,
            var_slots: 1024,
            frame_depth: 128,
        }
    }
}
