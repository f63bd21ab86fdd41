use crate::config::BrokerConfig;
use crate::error::CertificateError;
use lapin::tcp::{RustlsConnector, RustlsConnectorConfig};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Client-side TLS material for mutually authenticated broker connections
#[derive(Clone)]
pub struct TlsMaterial {
    pub connector: RustlsConnector,
    /// Name the broker certificate is verified against
    pub server_name: String,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

/// Load the CA bundle, client chain and key named in `config`.
///
/// Runs before the first connection attempt; any failure here is final.
pub fn load_tls_material(config: &BrokerConfig) -> Result<TlsMaterial, CertificateError> {
    let ca_path = required_path(config.ca_cert.as_deref(), "CA certificate")?;
    let cert_path = required_path(config.client_cert.as_deref(), "client certificate")?;
    let key_path = required_path(config.client_key.as_deref(), "client key")?;

    let roots = read_certificates(&ca_path, "CA certificate")?;
    let chain = read_certificates(&cert_path, "client certificate")?;
    let key = read_private_key(&key_path)?;

    let mut tls_config = RustlsConnectorConfig::default();
    let (added, ignored) = tls_config.add_parsable_certificates(roots);
    debug!(added, ignored, "Loaded CA certificates");
    if added == 0 {
        return Err(CertificateError::Invalid {
            kind: "CA certificate",
            path: ca_path,
            details: "no usable certificate in bundle".to_string(),
        });
    }

    let connector = tls_config
        .connector_with_single_cert(chain, key)
        .map_err(|e| CertificateError::Invalid {
            kind: "client key",
            path: key_path.clone(),
            details: e.to_string(),
        })?;

    info!(
        ca = %ca_path.display(),
        cert = %cert_path.display(),
        "TLS material loaded"
    );

    Ok(TlsMaterial {
        connector,
        server_name: config.server_name().to_string(),
    })
}

fn required_path(value: Option<&str>, kind: &'static str) -> Result<PathBuf, CertificateError> {
    match value.map(str::trim) {
        Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
        _ => Err(CertificateError::Missing { kind }),
    }
}

fn open(path: &Path, kind: &'static str) -> Result<BufReader<File>, CertificateError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| CertificateError::Read {
            kind,
            path: path.to_path_buf(),
            source,
        })
}

fn read_certificates(
    path: &Path,
    kind: &'static str,
) -> Result<Vec<CertificateDer<'static>>, CertificateError> {
    let mut reader = open(path, kind)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CertificateError::Invalid {
            kind,
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;

    if certs.is_empty() {
        return Err(CertificateError::Invalid {
            kind,
            path: path.to_path_buf(),
            details: "no PEM certificates found".to_string(),
        });
    }
    Ok(certs)
}

fn read_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, CertificateError> {
    let kind = "client key";
    let mut reader = open(path, kind)?;

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| CertificateError::Invalid {
            kind,
            path: path.to_path_buf(),
            details: e.to_string(),
        })?
        .ok_or_else(|| CertificateError::Invalid {
            kind,
            path: path.to_path_buf(),
            details: "no PEM private key found".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VigilConfig;
    use std::io::Write;

    fn broker_config(ca: Option<String>, cert: Option<String>, key: Option<String>) -> BrokerConfig {
        let mut config = VigilConfig::default().broker;
        config.ca_cert = ca;
        config.client_cert = cert;
        config.client_key = key;
        config
    }

    #[test]
    fn test_missing_paths_are_rejected() {
        let err = load_tls_material(&broker_config(None, None, None)).unwrap_err();
        assert!(matches!(err, CertificateError::Missing { kind: "CA certificate" }));

        let err = load_tls_material(&broker_config(
            Some("/tmp/ca.pem".into()),
            Some("  ".into()),
            None,
        ))
        .unwrap_err();
        assert!(matches!(err, CertificateError::Missing { kind: "client certificate" }));
    }

    #[test]
    fn test_unreadable_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.pem").to_string_lossy().to_string();

        let err = load_tls_material(&broker_config(
            Some(missing.clone()),
            Some(missing.clone()),
            Some(missing),
        ))
        .unwrap_err();
        assert!(matches!(err, CertificateError::Read { .. }));
    }

    #[test]
    fn test_file_without_certificates_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.pem");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "this is not a certificate").unwrap();
        let path = path.to_string_lossy().to_string();

        let err = load_tls_material(&broker_config(
            Some(path.clone()),
            Some(path.clone()),
            Some(path),
        ))
        .unwrap_err();
        assert!(matches!(err, CertificateError::Invalid { kind: "CA certificate", .. }));
    }
}
