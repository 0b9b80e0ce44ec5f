//! Principal extraction from the verified TLS peer certificate.

use tonic::{Request, Status};
use tracing::{debug, warn};
use x509_parser::prelude::*;

use remex_core::error::Error;

use crate::envelope;

/// The authenticated caller identity: the subject common name of the TLS
/// client certificate. Attached to request extensions by the interceptor.
#[derive(Debug, Clone)]
pub struct Principal(pub String);

/// Interceptor running first in the chain: requires a verified TLS peer
/// certificate and attaches its subject common name as the principal.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrincipalExtractor;

impl tonic::service::Interceptor for PrincipalExtractor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let certs = request.peer_certs().ok_or_else(unauthenticated)?;
        let first = certs.first().ok_or_else(unauthenticated)?;
        if certs.len() > 1 {
            warn!("peer presented multiple certificates; using the first");
        }
        let principal = subject_common_name(first.as_ref()).ok_or_else(unauthenticated)?;
        debug!(%principal, "authenticated tls peer");
        request.extensions_mut().insert(Principal(principal));
        Ok(request)
    }
}

fn unauthenticated() -> Status {
    envelope::status_from_error(&Error::TlsCredentials)
}

fn subject_common_name(der: &[u8]) -> Option<String> {
    let (_, cert) = X509Certificate::from_der(der).ok()?;
    let subject = cert.subject();
    let cn = subject
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_string);
    cn
}
