use crate::config::{TLS_CERT_PATH_ENV_VAR, TLS_KEY_PATH_ENV_VAR};
use crate::logger;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use rustls_pemfile::{certs, private_key};
use std::env;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::{TlsAcceptor, TlsConnector};

pub fn load_server_config(cert_path: &Path, key_path: &Path) -> io::Result<ServerConfig> {
    let cert_file = File::open(cert_path).map_err(|e| {
        io::Error::new(e.kind(), format!("certificate file {}: {}", cert_path.display(), e))
    })?;
    let key_file = File::open(key_path)
        .map_err(|e| io::Error::new(e.kind(), format!("key file {}: {}", key_path.display(), e)))?;

    let certs = certs(&mut BufReader::new(cert_file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("invalid certificate: {}", e))
        })?;
    if certs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "no certificates found",
        ));
    }

    let key = private_key(&mut BufReader::new(key_file))
        .map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("invalid private key: {}", e))
        })?
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no private key found"))?;

    ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("TLS config error: {}", e)))
}

/// Builds an acceptor from the TLS env vars. Returns `None` (plain TCP) when they are
/// unset, point at missing files, or fail to load.
pub fn acceptor_from_env() -> Option<TlsAcceptor> {
    let (cert_path, key_path) = match (env::var(TLS_CERT_PATH_ENV_VAR), env::var(TLS_KEY_PATH_ENV_VAR)) {
        (Ok(cert), Ok(key)) if Path::new(&cert).exists() && Path::new(&key).exists() => (cert, key),
        _ => {
            logger::log_info("TLS not configured - running without encryption");
            logger::log_info(&format!(
                "To enable TLS, set {} and {}",
                TLS_CERT_PATH_ENV_VAR, TLS_KEY_PATH_ENV_VAR
            ));
            return None;
        }
    };

    logger::log_info("TLS enabled - loading certificates...");
    match load_server_config(Path::new(&cert_path), Path::new(&key_path)) {
        Ok(config) => {
            logger::log_success("TLS certificates loaded");
            Some(TlsAcceptor::from(Arc::new(config)))
        }
        Err(e) => {
            logger::log_error(&format!("Failed to load TLS config: {}", e));
            logger::log_warning("Starting WITHOUT TLS encryption");
            None
        }
    }
}

/// Connector that verifies servers against the webpki root store.
pub fn client_connector() -> TlsConnector {
    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}
