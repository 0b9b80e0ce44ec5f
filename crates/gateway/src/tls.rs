//! TLS material loading for the mutual-TLS transport.

use std::io;
use std::path::Path;

use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};

/// Server-side mTLS: the server identity plus the CA that client
/// certificates must chain to. Clients without a valid certificate are
/// rejected during the handshake.
pub fn server_tls_config(ca: &Path, cert: &Path, key: &Path) -> io::Result<ServerTlsConfig> {
    let identity = Identity::from_pem(std::fs::read(cert)?, std::fs::read(key)?);
    let client_ca = Certificate::from_pem(std::fs::read(ca)?);
    Ok(ServerTlsConfig::new().identity(identity).client_ca_root(client_ca))
}

/// Client-side mTLS: trust `ca` for the server certificate, present our own
/// identity, and verify the server under `domain`.
pub fn client_tls_config(
    ca: &Path,
    cert: &Path,
    key: &Path,
    domain: &str,
) -> io::Result<ClientTlsConfig> {
    let identity = Identity::from_pem(std::fs::read(cert)?, std::fs::read(key)?);
    let server_ca = Certificate::from_pem(std::fs::read(ca)?);
    Ok(ClientTlsConfig::new()
        .ca_certificate(server_ca)
        .identity(identity)
        .domain_name(domain))
}
