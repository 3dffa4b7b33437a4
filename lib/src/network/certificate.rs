use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::info;
use rcgen::generate_simple_self_signed;

use crate::error::Error;

/// Create a self-signed certificate and key as `<name>.cert` and `<name>.key` in `certs_dir`.
///
/// Existing files are kept. Since the certificate is self-signed, it also serves as its own
/// CA bundle, i.e. the peer can use the `.cert` file as `ca_cert`.
///
/// Returns the paths to the certificate and the key.
pub fn create_certificates(
    certs_dir: &Path,
    name: &str,
    subject_alt_names: Vec<String>,
) -> Result<(PathBuf, PathBuf), Error> {
    let cert_path = certs_dir.join(format!("{name}.cert"));
    let key_path = certs_dir.join(format!("{name}.key"));

    if key_path.exists() || cert_path.exists() {
        if !(key_path.exists() && cert_path.exists()) {
            return Err(Error::CertificateFailure(format!(
                "Only one of {cert_path:?} and {key_path:?} exists. \
                 Remove the other one or fix your cert/key paths."
            )));
        }
        info!("Certificate and key for {name} do exist.");
        return Ok((cert_path, key_path));
    }

    if !certs_dir.exists() {
        std::fs::create_dir_all(certs_dir).map_err(|err| {
            Error::IoPathError(certs_dir.to_path_buf(), "creating certificate directory", err)
        })?;
    }

    let cert = generate_simple_self_signed(subject_alt_names)
        .map_err(|err| Error::CertificateFailure(format!("Failed to generate certificate: {err}")))?;
    let pem = cert
        .serialize_pem()
        .map_err(|_| Error::CertificateFailure("Failed to serialize certificate.".into()))?;
    write_file(pem, &format!("{name} cert"), &cert_path)?;

    let key = cert.serialize_private_key_pem();
    write_file(key, &format!("{name} key"), &key_path)?;

    Ok((cert_path, key_path))
}

fn write_file(blob: String, name: &str, path: &Path) -> Result<(), Error> {
    info!("Generate {name}.");
    let mut file = File::create(path)
        .map_err(|err| Error::IoPathError(path.to_path_buf(), "creating file", err))?;

    file.write_all(&blob.into_bytes())
        .map_err(|err| Error::IoPathError(path.to_path_buf(), "writing file", err))?;

    #[cfg(not(target_os = "windows"))]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = file
            .metadata()
            .map_err(|_| Error::CertificateFailure("Failed to read file permission.".into()))?
            .permissions();
        permissions.set_mode(0o640);
        std::fs::set_permissions(path, permissions)
            .map_err(|_| Error::CertificateFailure("Failed to set file permission.".into()))?;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use tempdir::TempDir;

    use super::*;

    #[test]
    fn test_existing_files_are_kept() {
        let tempdir = TempDir::new("pdu_certs").unwrap();
        let (cert, key) =
            create_certificates(tempdir.path(), "server", vec!["localhost".into()]).unwrap();
        let original = std::fs::read(&cert).unwrap();

        let (cert_again, key_again) =
            create_certificates(tempdir.path(), "server", vec!["localhost".into()]).unwrap();
        assert_eq!(cert, cert_again);
        assert_eq!(key, key_again);
        assert_eq!(original, std::fs::read(&cert).unwrap());
    }

    #[test]
    fn test_half_existing_pair() {
        let tempdir = TempDir::new("pdu_certs").unwrap();
        std::fs::write(tempdir.path().join("server.cert"), "dangling").unwrap();

        let result = create_certificates(tempdir.path(), "server", vec!["localhost".into()]);
        assert!(matches!(result, Err(Error::CertificateFailure(_))));
    }
}
