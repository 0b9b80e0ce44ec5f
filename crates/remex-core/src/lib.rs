//! remex core primitives and shared types.

#![deny(unsafe_code)]

/// Version of the remex core library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod ids {
    //! Process identifier utilities.

    use uuid::Uuid;

    /// Generate a fresh process identifier (UUID v4).
    pub fn new_process_id() -> Uuid {
        Uuid::new_v4()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn process_ids_are_unique() {
            assert_ne!(new_process_id(), new_process_id());
        }
    }
}

pub mod context {
    //! Per-call ambient state, threaded explicitly through every operation.

    /// Immutable per-call context carrying the authenticated principal and
    /// the invoked method name. Deadline and cancellation ride on the
    /// runtime's call machinery, not on this value.
    #[derive(Debug, Clone, Default)]
    pub struct CallContext {
        principal: Option<String>,
        method: Option<String>,
    }

    impl CallContext {
        /// An empty context: no principal, no method.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Attach the caller's principal identity.
        #[must_use]
        pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
            self.principal = Some(principal.into());
            self
        }

        /// Attach the full method name of the invoked operation.
        #[must_use]
        pub fn with_method(mut self, method: impl Into<String>) -> Self {
            self.method = Some(method.into());
            self
        }

        /// The caller's principal, if one was authenticated.
        pub fn principal(&self) -> Option<&str> {
            self.principal.as_deref()
        }

        /// The invoked method name, if attached.
        pub fn method(&self) -> Option<&str> {
            self.method.as_deref()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn builder_attaches_fields() {
            let ctx = CallContext::new().with_principal("alice").with_method("/svc/Op");
            assert_eq!(ctx.principal(), Some("alice"));
            assert_eq!(ctx.method(), Some("/svc/Op"));
        }

        #[test]
        fn empty_context_has_nothing() {
            let ctx = CallContext::new();
            assert!(ctx.principal().is_none());
            assert!(ctx.method().is_none());
        }
    }
}

pub mod process {
    //! Observable process state as served by the supervisor.

    use serde::{Deserialize, Serialize};
    use std::fmt;
    use std::str::FromStr;
    use std::time::SystemTime;
    use uuid::Uuid;

    use crate::error::Error;

    /// Which captured output file of a process to read.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum OutputStream {
        /// The child's captured standard output.
        Stdout,
        /// The child's captured standard error.
        Stderr,
    }

    impl OutputStream {
        /// File name of this stream inside the process directory.
        #[must_use]
        pub fn file_name(self) -> &'static str {
            match self {
                Self::Stdout => "stdout",
                Self::Stderr => "stderr",
            }
        }
    }

    impl fmt::Display for OutputStream {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.file_name())
        }
    }

    impl FromStr for OutputStream {
        type Err = Error;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s {
                "stdout" => Ok(Self::Stdout),
                "stderr" => Ok(Self::Stderr),
                _ => Err(Error::InvalidArgument),
            }
        }
    }

    /// Point-in-time snapshot of a supervised process.
    ///
    /// `exit` is the UNIX epoch and `exit_code` is zero for as long as
    /// `running` is true; both become meaningful together once the reaper
    /// publishes the terminal state.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ProcessInfo {
        /// Registry identifier, assigned at spawn.
        pub id: Uuid,
        /// OS process id.
        pub pid: u32,
        /// Exit code; `-1` when the child was terminated by a signal.
        pub exit_code: i32,
        /// Whether the child has not yet been reaped.
        pub running: bool,
        /// Executable path as requested by the caller.
        pub path: String,
        /// Argument vector, excluding argv[0].
        pub args: Vec<String>,
        /// Principal that spawned the child.
        pub owner_id: String,
        /// Spawn instant (UTC).
        pub create: SystemTime,
        /// Exit instant (UTC); UNIX epoch while running.
        pub exit: SystemTime,
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn stream_names_round_trip() {
            for s in [OutputStream::Stdout, OutputStream::Stderr] {
                assert_eq!(s.file_name().parse::<OutputStream>().unwrap(), s);
            }
        }

        #[test]
        fn unknown_stream_is_invalid() {
            assert!(matches!("stdlog".parse::<OutputStream>(), Err(Error::InvalidArgument)));
        }
    }
}

pub mod error {
    //! Service error taxonomy shared by the supervisor and the transport.

    use thiserror::Error;

    /// Errors produced by remex operations.
    ///
    /// `NotFound` and `InvalidArgument` deliberately share their display
    /// literal; the variants (and their transport codes) stay distinct, and
    /// nothing may dispatch on the message text.
    #[derive(Debug, Error)]
    pub enum Error {
        /// The peer presented no usable TLS client certificate.
        #[error("unable to read tls credentials")]
        TlsCredentials,
        /// No principal was established for the call.
        #[error("unauthenticated")]
        Unauthenticated,
        /// Policy or ownership rejected the call.
        #[error("access denied")]
        AccessDenied,
        /// The requested process id is not in the registry.
        #[error("not found")]
        NotFound,
        /// A malformed id or an unknown stream target.
        #[error("not found")]
        InvalidArgument,
        /// The OS refused to spawn the child; the cause preserves the OS
        /// error, including the missing-executable case.
        #[error("failed to spawn process")]
        Spawn(#[source] std::io::Error),
        /// Creating or reading process state on disk failed.
        #[error("io failure")]
        Io(#[source] std::io::Error),
        /// Delivering a signal failed, including "process already finished".
        #[error("failed to signal process")]
        Signal(#[source] std::io::Error),
    }

}
