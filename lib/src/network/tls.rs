use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use log::debug;
use rustls::server::AllowAnyAuthenticatedClient;
use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore, ServerConfig};
use rustls_pemfile::{pkcs8_private_keys, rsa_private_keys};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::error::Error;
use crate::settings::Tls;

/// Initialize our client [TlsConnector]. \
/// 1. Only trust servers whose certificate chains up to the configured CA bundle.
/// 2. Present our own certificate, so servers with client verification accept us.
pub fn get_tls_connector(tls: &Tls) -> Result<TlsConnector, Error> {
    let cert_store = load_root_store(&tls.ca_cert())?;
    let certs = load_certs(&tls.cert())?;
    let key = load_key(&tls.key())?;

    let config: ClientConfig = ClientConfig::builder()
        .with_safe_default_cipher_suites()
        .with_safe_default_kx_groups()
        .with_safe_default_protocol_versions()
        .map_err(|err| Error::CertificateFailure(format!("Unsupported TLS versions: {err}")))?
        .with_root_certificates(cert_store)
        .with_single_cert(certs, key)
        .map_err(|err| {
            Error::CertificateFailure(format!("Failed to build TLS Connector: {err}"))
        })?;

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Configure the server using rustls. \
/// A TLS server needs a certificate and a fitting private key.
/// If `verify_client` is set, clients must present a certificate signed by the CA bundle.
pub fn get_tls_acceptor(tls: &Tls, verify_client: bool) -> Result<TlsAcceptor, Error> {
    // Set the server-side key and certificate that should be used for all communication.
    let certs = load_certs(&tls.cert())?;
    let key = load_key(&tls.key())?;

    let builder = ServerConfig::builder()
        .with_safe_default_cipher_suites()
        .with_safe_default_kx_groups()
        .with_safe_default_protocol_versions()
        .map_err(|err| Error::CertificateFailure(format!("Unsupported TLS versions: {err}")))?;

    let builder = if verify_client {
        let roots = load_root_store(&tls.ca_cert())?;
        builder.with_client_cert_verifier(AllowAnyAuthenticatedClient::new(roots))
    } else {
        builder.with_no_client_auth()
    };

    let config = builder.with_single_cert(certs, key).map_err(|err| {
        Error::CertificateFailure(format!("Failed to build TLS Acceptor: {err}"))
    })?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Load the passed certificates file
fn load_certs(path: &Path) -> Result<Vec<Certificate>, Error> {
    let file = File::open(path)
        .map_err(|_| Error::FileNotFound(format!("Cannot open cert {path:?}")))?;
    let certs: Vec<Certificate> = rustls_pemfile::certs(&mut BufReader::new(file))
        .map_err(|_| Error::CertificateFailure(format!("Failed to parse certificate {path:?}")))?
        .into_iter()
        .map(Certificate)
        .collect();

    if certs.is_empty() {
        return Err(Error::CertificateFailure(format!(
            "Couldn't find any certificate in {path:?}"
        )));
    }

    Ok(certs)
}

/// Load the passed keys file.
/// Only the first key will be used. It should match the certificate.
fn load_key(path: &Path) -> Result<PrivateKey, Error> {
    let open = || {
        File::open(path)
            .map(BufReader::new)
            .map_err(|_| Error::FileNotFound(format!("Cannot open key {path:?}")))
    };

    // Try to read pkcs8 format first
    if let Ok(keys) = pkcs8_private_keys(&mut open()?) {
        if let Some(key) = keys.into_iter().next() {
            return Ok(PrivateKey(key));
        }
    }

    // Try the normal rsa format afterwards.
    let keys = rsa_private_keys(&mut open()?)
        .map_err(|_| Error::CertificateFailure(format!("Failed to parse key {path:?}")))?;

    if let Some(key) = keys.into_iter().next() {
        return Ok(PrivateKey(key));
    }

    Err(Error::CertificateFailure(format!(
        "Couldn't extract private key from keyfile {path:?}"
    )))
}

/// Build a root store from every certificate in the given PEM bundle.
fn load_root_store(path: &Path) -> Result<RootCertStore, Error> {
    let certs = load_certs(path)?;

    let mut cert_store = RootCertStore::empty();
    let ders: Vec<Vec<u8>> = certs.into_iter().map(|cert| cert.0).collect();
    let (added, ignored) = cert_store.add_parsable_certificates(&ders);
    debug!("Loaded {added} root certificates from {path:?}, ignored {ignored}");

    if added == 0 {
        return Err(Error::CertificateFailure(format!(
            "No usable CA certificate in {path:?}"
        )));
    }

    Ok(cert_store)
}
