//! End-to-end scenarios over real mutual-TLS gRPC connections.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair,
};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Server, ServerTlsConfig};

use gateway::client::{CallOptions, Client, ClientError};
use gateway::envelope::chain_contains;
use gateway::{tls, ExecutorService};
use policy::{AccessRule, Effect, Policy};
use remex_core::process::OutputStream;
use supervisor::Supervisor;

struct TestPki {
    dir: tempfile::TempDir,
    ca: Certificate,
    ca_key: KeyPair,
    ca_path: PathBuf,
}

impl TestPki {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let ca_key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::new()).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name.push(DnType::CommonName, "test ca");
        let ca = params.self_signed(&ca_key).unwrap();
        let ca_path = dir.path().join("ca.crt");
        std::fs::write(&ca_path, ca.pem()).unwrap();
        Self { dir, ca, ca_key, ca_path }
    }

    // Issues a leaf and returns the written (cert, key) paths.
    fn issue(&self, cn: &str, server: bool) -> (PathBuf, PathBuf) {
        let key = KeyPair::generate().unwrap();
        let san = if server { vec!["localhost".to_string()] } else { Vec::new() };
        let mut params = CertificateParams::new(san).unwrap();
        params.distinguished_name.push(DnType::CommonName, cn);
        params.extended_key_usages = vec![if server {
            ExtendedKeyUsagePurpose::ServerAuth
        } else {
            ExtendedKeyUsagePurpose::ClientAuth
        }];
        let cert = params.signed_by(&key, &self.ca, &self.ca_key).unwrap();

        let cert_path = self.dir.path().join(format!("{cn}.pem"));
        let key_path = self.dir.path().join(format!("{cn}.key"));
        std::fs::write(&cert_path, cert.pem()).unwrap();
        std::fs::write(&key_path, key.serialize_pem()).unwrap();
        (cert_path, key_path)
    }
}

async fn spawn_server(policy: Policy, tls_config: ServerTlsConfig) -> (String, tempfile::TempDir) {
    let data_dir = tempfile::tempdir().unwrap();
    let supervisor = Arc::new(Supervisor::new(data_dir.path()));
    let svc = ExecutorService::new(supervisor, policy).into_server();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        Server::builder()
            .tls_config(tls_config)
            .unwrap()
            .add_service(svc)
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });
    (format!("https://localhost:{port}"), data_dir)
}

async fn mtls_server(pki: &TestPki, policy: Policy) -> (String, tempfile::TempDir) {
    let (cert, key) = pki.issue("localhost", true);
    let tls_config = tls::server_tls_config(&pki.ca_path, &cert, &key).unwrap();
    spawn_server(policy, tls_config).await
}

async fn connect_as(pki: &TestPki, url: &str, cn: &str) -> Client {
    let (cert, key) = pki.issue(cn, false);
    let tls_config = tls::client_tls_config(&pki.ca_path, &cert, &key, "localhost").unwrap();
    Client::connect(url.to_string(), tls_config).await.unwrap()
}

fn allow_all() -> Policy {
    Policy::chain([AccessRule::new("*", "*", Effect::Allow).unwrap()])
}

fn remote_message(err: &ClientError) -> String {
    match err {
        ClientError::Remote(remote) => remote.message().to_string(),
        other => panic!("expected a remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn exec_get_read_round_trip_with_certificate_identity() {
    let pki = TestPki::new();
    let (url, _data) = mtls_server(&pki, allow_all()).await;
    let mut alice = connect_as(&pki, &url, "alice").await;
    let opts = CallOptions::default();

    let id = alice.exec(opts, "echo", &["hello".into()]).await.unwrap();

    let mut info = alice.get_process_info(opts, id).await.unwrap();
    while info.running {
        tokio::time::sleep(Duration::from_millis(10)).await;
        info = alice.get_process_info(opts, id).await.unwrap();
    }
    assert_eq!(info.owner_id, "alice", "principal is the certificate CN");
    assert_eq!(info.path, "echo");
    assert_eq!(info.args, ["hello"]);
    assert_eq!(info.exit_code, 0);
    assert!(info.exit >= info.create);

    let content = alice.read(opts, id, OutputStream::Stdout).await.unwrap();
    assert_eq!(content, b"hello\n");
}

#[tokio::test]
async fn other_principals_are_denied_per_handle() {
    let pki = TestPki::new();
    let (url, _data) = mtls_server(&pki, allow_all()).await;
    let mut alice = connect_as(&pki, &url, "alice").await;
    let mut bob = connect_as(&pki, &url, "bob").await;
    let opts = CallOptions::default();

    let id = alice.exec(opts, "sleep", &["1".into()]).await.unwrap();

    let err = bob.get_process_info(opts, id).await.unwrap_err();
    assert_eq!(remote_message(&err), "access denied");
    let err = bob.read(opts, id, OutputStream::Stdout).await.unwrap_err();
    assert_eq!(remote_message(&err), "access denied");
    let err = bob.kill(opts, id, 15).await.unwrap_err();
    assert_eq!(remote_message(&err), "access denied");

    // The owner can signal it.
    alice.kill(opts, id, 15).await.unwrap();
}

#[tokio::test]
async fn listing_is_visible_to_any_allowed_principal() {
    let pki = TestPki::new();
    let (url, _data) = mtls_server(&pki, allow_all()).await;
    let mut alice = connect_as(&pki, &url, "alice").await;
    let mut bob = connect_as(&pki, &url, "bob").await;
    let opts = CallOptions::default();

    alice.exec(opts, "echo", &["a".into()]).await.unwrap();
    bob.exec(opts, "echo", &["b".into()]).await.unwrap();

    let listing = bob.list_process_info(opts).await.unwrap();
    assert_eq!(listing.len(), 2);
    for pair in listing.windows(2) {
        assert!(pair[0].create >= pair[1].create, "newest first");
    }
}

#[tokio::test]
async fn empty_policy_chain_denies_authenticated_callers() {
    let pki = TestPki::new();
    let (url, _data) = mtls_server(&pki, Policy::chain([])).await;
    let mut alice = connect_as(&pki, &url, "alice").await;
    let opts = CallOptions::default();

    let err = alice.exec(opts, "echo", &[]).await.unwrap_err();
    assert_eq!(remote_message(&err), "access denied");
    let err = alice.list_process_info(opts).await.unwrap_err();
    assert_eq!(remote_message(&err), "access denied");
}

#[tokio::test]
async fn deny_rules_override_allows_per_principal() {
    let pki = TestPki::new();
    let policy = Policy::chain([
        AccessRule::new("*", "*", Effect::Allow).unwrap(),
        AccessRule::new("bob", "*", Effect::Deny).unwrap(),
    ]);
    let (url, _data) = mtls_server(&pki, policy).await;
    let mut alice = connect_as(&pki, &url, "alice").await;
    let mut bob = connect_as(&pki, &url, "bob").await;
    let opts = CallOptions::default();

    alice.exec(opts, "echo", &[]).await.unwrap();
    let err = bob.exec(opts, "echo", &[]).await.unwrap_err();
    assert_eq!(remote_message(&err), "access denied");
}

#[tokio::test]
async fn spawn_failure_cause_chain_crosses_the_wire() {
    let pki = TestPki::new();
    let (url, _data) = mtls_server(&pki, allow_all()).await;
    let mut alice = connect_as(&pki, &url, "alice").await;

    let err = alice
        .exec(CallOptions::default(), "/definitely/not/a/binary", &[])
        .await
        .unwrap_err();
    let ClientError::Remote(remote) = err else {
        panic!("expected a remote error, got {err:?}");
    };
    assert_eq!(remote.message(), "failed to spawn process");
    // The OS-level cause survives the envelope round trip.
    assert!(chain_contains(&remote, "No such file"), "chain: {remote:?}");
}

#[tokio::test]
async fn peers_without_a_client_certificate_are_unauthenticated() {
    let pki = TestPki::new();
    // Make the handshake tolerate a missing client certificate so the
    // request reaches the principal extractor.
    let (cert, key) = pki.issue("localhost", true);
    let tls_config = tls::server_tls_config(&pki.ca_path, &cert, &key)
        .unwrap()
        .client_auth_optional(true);
    let (url, _data) = spawn_server(allow_all(), tls_config).await;

    let anonymous_tls = tonic::transport::ClientTlsConfig::new()
        .ca_certificate(tonic::transport::Certificate::from_pem(
            std::fs::read(&pki.ca_path).unwrap(),
        ))
        .domain_name("localhost");
    let mut anonymous = Client::connect(url, anonymous_tls).await.unwrap();

    let err = anonymous.exec(CallOptions::default(), "echo", &[]).await.unwrap_err();
    assert_eq!(remote_message(&err), "unable to read tls credentials");
}
