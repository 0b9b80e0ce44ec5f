//! JSON cause-chain envelope carried inside transport status messages.
//!
//! The server serializes a handler error's full `source()` chain into the
//! status message as nested `{"Message": ..., "Next": ...}` nodes while the
//! status code keeps the outermost kind. The client parses the message back
//! into a [`RemoteError`] linked list, so cause-aware matching survives the
//! process boundary. Inner node codes are not transmitted.

use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};
use tonic::{Code, Status};

use remex_core::error::Error;

/// One node of the marshalled cause chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNode {
    /// Display message of this link.
    #[serde(rename = "Message")]
    pub message: String,
    /// The cause of this link, if any.
    #[serde(rename = "Next", default, skip_serializing_if = "Option::is_none")]
    pub next: Option<Box<ErrorNode>>,
}

/// Serialize an error and its `source()` chain into the envelope JSON.
///
/// Falls back to the plain display message if serialization fails.
pub fn marshal(err: &(dyn StdError + 'static)) -> String {
    let mut messages = Vec::new();
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(link) = current {
        messages.push(link.to_string());
        current = link.source();
    }
    let mut chain: Option<Box<ErrorNode>> = None;
    for message in messages.into_iter().rev() {
        chain = Some(Box::new(ErrorNode { message, next: chain }));
    }
    match chain {
        Some(root) => serde_json::to_string(&root).unwrap_or_else(|_| err.to_string()),
        None => err.to_string(),
    }
}

/// Parse an envelope back into a cause chain. Returns `None` when the
/// message is not the envelope format.
pub fn unmarshal(message: &str) -> Option<RemoteError> {
    let root: ErrorNode = serde_json::from_str(message).ok()?;
    Some(RemoteError::from_node(root))
}

/// A reconstructed server-side error chain.
///
/// Implements `std::error::Error` with a real `source()` chain so callers
/// can match on any cause, not just the outermost message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    message: String,
    source: Option<Box<RemoteError>>,
}

impl RemoteError {
    /// A single-node chain, used when a status message is not an envelope.
    pub fn leaf(message: impl Into<String>) -> Self {
        Self { message: message.into(), source: None }
    }

    fn from_node(node: ErrorNode) -> Self {
        Self {
            message: node.message,
            source: node.next.map(|next| Box::new(Self::from_node(*next))),
        }
    }

    /// The outermost message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for RemoteError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_deref().map(|s| s as &(dyn StdError + 'static))
    }
}

/// Whether any link of the chain mentions `needle`.
pub fn chain_contains(err: &(dyn StdError + 'static), needle: &str) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(link) = current {
        if link.to_string().contains(needle) {
            return true;
        }
        current = link.source();
    }
    false
}

/// Wrap a service error into a status: kind-derived code, enveloped message.
pub fn status_from_error(err: &Error) -> Status {
    Status::new(code_for(err), marshal(err))
}

/// Reconstruct a cause chain from a returned status, falling back to the
/// raw message for non-envelope statuses.
pub fn remote_error(status: &Status) -> RemoteError {
    unmarshal(status.message()).unwrap_or_else(|| RemoteError::leaf(status.message()))
}

fn code_for(err: &Error) -> Code {
    match err {
        Error::TlsCredentials | Error::Unauthenticated => Code::Unauthenticated,
        Error::AccessDenied => Code::PermissionDenied,
        Error::NotFound => Code::NotFound,
        Error::InvalidArgument => Code::InvalidArgument,
        Error::Spawn(_) | Error::Io(_) | Error::Signal(_) => Code::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marshal_unmarshal_round_trips_the_chain() {
        let os = std::io::Error::new(std::io::ErrorKind::NotFound, "executable file not found");
        let err = Error::Spawn(os);
        let remote = unmarshal(&marshal(&err)).unwrap();

        assert_eq!(remote.message(), "failed to spawn process");
        let mut messages = Vec::new();
        let mut current: Option<&(dyn StdError + 'static)> = Some(&remote);
        while let Some(link) = current {
            messages.push(link.to_string());
            current = link.source();
        }
        assert_eq!(messages, ["failed to spawn process", "executable file not found"]);
    }

    #[test]
    fn single_node_chains_round_trip() {
        let remote = unmarshal(&marshal(&Error::AccessDenied)).unwrap();
        assert_eq!(remote, RemoteError::leaf("access denied"));
    }

    #[test]
    fn non_envelope_messages_surface_as_leaves() {
        assert!(unmarshal("plain failure").is_none());
        let status = Status::internal("plain failure");
        assert_eq!(remote_error(&status), RemoteError::leaf("plain failure"));
    }

    #[test]
    fn chain_matching_finds_inner_causes() {
        let os = std::io::Error::new(std::io::ErrorKind::NotFound, "executable file not found");
        let remote = unmarshal(&marshal(&Error::Spawn(os))).unwrap();
        assert!(chain_contains(&remote, "executable file not found"));
        assert!(chain_contains(&remote, "spawn"));
        assert!(!chain_contains(&remote, "permission"));
    }

    #[test]
    fn status_codes_follow_the_kind() {
        assert_eq!(status_from_error(&Error::TlsCredentials).code(), Code::Unauthenticated);
        assert_eq!(status_from_error(&Error::Unauthenticated).code(), Code::Unauthenticated);
        assert_eq!(status_from_error(&Error::AccessDenied).code(), Code::PermissionDenied);
        assert_eq!(status_from_error(&Error::NotFound).code(), Code::NotFound);
        assert_eq!(status_from_error(&Error::InvalidArgument).code(), Code::InvalidArgument);
        let io = std::io::Error::other("disk gone");
        assert_eq!(status_from_error(&Error::Io(io)).code(), Code::Internal);
    }

    #[test]
    fn not_found_and_invalid_argument_stay_distinct_kinds() {
        // Same display literal, different transport codes.
        let not_found = status_from_error(&Error::NotFound);
        let invalid = status_from_error(&Error::InvalidArgument);
        assert_eq!(remote_error(&not_found).message(), remote_error(&invalid).message());
        assert_ne!(not_found.code(), invalid.code());
    }
}
