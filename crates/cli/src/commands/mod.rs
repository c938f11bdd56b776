//! Command drivers.
//!
//! Each command is a clap `Args` struct plus an
//! `execute(args, ctx) -> ExitCode` entry point. Recoverable per-item
//! problems go to the error sink and the run continues; a fatal error
//! aborts every pool of the invocation and decides the exit code.

pub mod delete;
pub mod download;
pub mod list;
pub mod post;
pub mod stat;
pub mod upload;

use st_core::{Credentials, DEFAULT_WIDTH, Error, ReportSink, Result};
use st_swift::Connection;

use crate::exit_code::ExitCode;

/// Shared command context built once in `main`.
pub struct Ctx {
    pub credentials: Credentials,
    /// 0 = quiet, 1 = normal, 2+ = extra detail.
    pub verbose: u8,
    pub sink: ReportSink,
}

impl Ctx {
    /// Lazily-authenticating connection for single-call commands.
    pub fn connection(&self) -> Connection {
        Connection::new(self.credentials.clone())
    }

    /// Authenticates once up front. Clones of the returned connection
    /// carry the cached session, so pool workers skip the auth
    /// round-trip.
    pub async fn authenticate(&self) -> Result<Connection> {
        let mut conn = self.connection();
        conn.authenticate().await?;
        Ok(conn)
    }
}

/// One session per worker for a full-width pool.
pub fn sessions(seed: &Connection) -> Vec<Connection> {
    (0..DEFAULT_WIDTH).map(|_| seed.clone()).collect()
}

/// Likely-typo hint when a container argument carries a slash.
pub fn warn_container_slash(container: &str) {
    if let Some((head, tail)) = container.split_once('/') {
        eprintln!(
            "WARNING: / in container name; you might have meant \
             '{head} {tail}' instead of '{container}'."
        );
    }
}

/// Remote path as shown to the user and used on disk: a leading
/// separator is stripped so downloads never write to the filesystem
/// root.
pub fn display_path(path: &str) -> &str {
    path.strip_prefix(['/', '\\']).unwrap_or(path)
}

pub fn exit_for(err: &Error) -> ExitCode {
    if err.is_not_found() {
        return ExitCode::NotFound;
    }
    match err {
        Error::Transport(_) => ExitCode::NetworkError,
        Error::Config(_) => ExitCode::UsageError,
        _ => ExitCode::GeneralError,
    }
}

/// Reports a fatal error and picks its exit code.
pub fn fail(sink: &ReportSink, err: &Error) -> ExitCode {
    sink.error(err.to_string());
    exit_for(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_path_strips_one_leading_separator() {
        assert_eq!(display_path("/etc/passwd"), "etc/passwd");
        assert_eq!(display_path("\\windows"), "windows");
        assert_eq!(display_path("photos/cat.jpg"), "photos/cat.jpg");
    }

    #[test]
    fn exit_codes_follow_the_error_kind() {
        assert_eq!(
            exit_for(&Error::Transport("reset".to_string())),
            ExitCode::NetworkError
        );
        assert_eq!(
            exit_for(&Error::Config("missing key".to_string())),
            ExitCode::UsageError
        );
        assert_eq!(
            exit_for(&Error::Listing("bad entry".to_string())),
            ExitCode::GeneralError
        );
    }
}
