use thiserror::Error;

/// Fatal interpreter failures.
///
/// Almost everything that goes wrong while a script runs degrades to a zero
/// value and a diagnostic; the loop-limit guard is the one deliberately fatal
/// condition and unwinds the whole dispatch. I/O errors can only occur while
/// constructing or reloading a script from a file.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("loop limit exceeded at instruction {index} in `{function}`")]
    LoopLimit { index: usize, function: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
