//! Optional channel encryption.
//!
//! Plaintext is the default on both ends. A server opts in with
//! [`ServerTls`], a client with [`ClientTls`]; the client then only trusts the
//! certificates it was given.

use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::errors::TlsError;

#[derive(Clone)]
pub struct ServerTls {
    config: Arc<ServerConfig>,
}

impl std::fmt::Debug for ServerTls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerTls").finish_non_exhaustive()
    }
}

impl ServerTls {
    pub fn new(
        certs: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> Result<Self, TlsError> {
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self, TlsError> {
        let certs = load_certs(cert_path)?;
        let key = PrivateKeyDer::from_pem_file(key_path).map_err(|e| TlsError::Pem {
            path: key_path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::new(certs, key)
    }

    pub(crate) fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.config.clone())
    }
}

#[derive(Clone)]
pub struct ClientTls {
    config: Arc<ClientConfig>,
    server_name: ServerName<'static>,
}

impl std::fmt::Debug for ClientTls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientTls")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

impl ClientTls {
    /// Trusts exactly `roots` and expects the server to present `server_name`.
    pub fn new(
        roots: Vec<CertificateDer<'static>>,
        server_name: impl Into<String>,
    ) -> Result<Self, TlsError> {
        let server_name = server_name.into();
        let server_name = ServerName::try_from(server_name.clone())
            .map_err(|_| TlsError::InvalidServerName(server_name))?;

        let mut store = RootCertStore::empty();
        for cert in roots {
            store.add(cert)?;
        }
        let config = ClientConfig::builder()
            .with_root_certificates(store)
            .with_no_client_auth();

        Ok(Self {
            config: Arc::new(config),
            server_name,
        })
    }

    pub fn from_ca_pem_file(ca_path: &Path, server_name: impl Into<String>) -> Result<Self, TlsError> {
        Self::new(load_certs(ca_path)?, server_name)
    }

    pub(crate) fn connector(&self) -> TlsConnector {
        TlsConnector::from(self.config.clone())
    }

    pub(crate) fn server_name(&self) -> ServerName<'static> {
        self.server_name.clone()
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let pem_error = |e: rustls::pki_types::pem::Error| TlsError::Pem {
        path: path.display().to_string(),
        reason: e.to_string(),
    };
    let certs = CertificateDer::pem_file_iter(path)
        .map_err(pem_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(pem_error)?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.display().to_string()));
    }
    Ok(certs)
}

/// A freshly generated self-signed certificate, for development and tests.
pub struct SelfSigned {
    pub cert: CertificateDer<'static>,
    key: Vec<u8>,
}

impl SelfSigned {
    pub fn generate(names: &[&str]) -> Result<Self, TlsError> {
        let names: Vec<String> = names.iter().map(|name| name.to_string()).collect();
        let certified = rcgen::generate_simple_self_signed(names)
            .map_err(|e| TlsError::CertificateGeneration(e.to_string()))?;
        Ok(Self {
            cert: certified.cert.der().clone(),
            key: certified.key_pair.serialize_der(),
        })
    }

    pub fn server_tls(&self) -> Result<ServerTls, TlsError> {
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key.clone()));
        ServerTls::new(vec![self.cert.clone()], key)
    }

    pub fn client_tls(&self, server_name: impl Into<String>) -> Result<ClientTls, TlsError> {
        ClientTls::new(vec![self.cert.clone()], server_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_signed_builds_both_ends() {
        let identity = SelfSigned::generate(&["localhost"]).unwrap();
        identity.server_tls().unwrap();
        let client = identity.client_tls("localhost").unwrap();
        assert_eq!(client.server_name(), ServerName::try_from("localhost").unwrap());
    }

    #[test]
    fn rejects_invalid_server_name() {
        let identity = SelfSigned::generate(&["localhost"]).unwrap();
        let err = identity.client_tls("not a host name!").unwrap_err();
        assert!(matches!(err, TlsError::InvalidServerName(_)));
    }

    #[test]
    fn missing_pem_file_is_reported() {
        let err = ServerTls::from_pem_files(
            Path::new("does/not/exist/cert.pem"),
            Path::new("does/not/exist/key.pem"),
        )
        .unwrap_err();
        assert!(matches!(err, TlsError::Pem { .. }), "{err:?}");
    }
}
