//! Error kinds recognised by the core, per the error handling design.

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    /// `%x` where `x` is not a registered placeholder key.
    #[error("unknown interpolation: %{0}")]
    UnknownInterpolation(char),

    /// No command was supplied (neither `-c` nor a positional tail).
    #[error("must specify command")]
    MissingCommand,

    /// `-n`/`--names` given with an empty item list.
    #[error("-n illegal with empty target list")]
    NamesWithEmptyItems,

    /// More than one of `-a`, `-f`, `-m` supplied at once.
    #[error("-a, -f, and -m are mutually exclusive")]
    ConflictingItemSources,

    /// Failure to spawn a child process.
    #[error("failed to spawn subprocess: {0}")]
    SpawnFailed(#[source] std::io::Error),

    /// Failure to read the argument file given to `-f`.
    #[error("failed to read argument file {path}: {source}")]
    ArgFileUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failure to install a self-pipe signal handler.
    #[error("failed to set up signal handling: {0}")]
    SignalSetupFailed(#[source] std::io::Error),

    /// Any other I/O failure surfacing from the poll/read loop.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Usage errors (missing command, inconsistent flags) exit 2; spawn
    /// failure exits 127. Every other kind is not meant to reach `main`
    /// uncaught -- it is handled internally where it arises.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::MissingCommand
            | AppError::NamesWithEmptyItems
            | AppError::ConflictingItemSources => 2,
            AppError::SpawnFailed(_) => 127,
            AppError::UnknownInterpolation(_)
            | AppError::ArgFileUnreadable { .. }
            | AppError::SignalSetupFailed(_)
            | AppError::Io(_) => 1,
        }
    }
}
