use std::fs::{create_dir_all, File};
use std::io::{prelude::*, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;
use serde_derive::{Deserialize, Serialize};
use shellexpand::tilde;

use crate::error::Error;
use crate::network::framing::FramingParams;
use crate::setting_defaults::*;

/// The three PEM files needed for a TLS endpoint.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
pub struct Tls {
    /// Bundle of root certificates the remote side has to chain up to.
    pub ca_cert: PathBuf,
    /// Our own certificate chain.
    pub cert: PathBuf,
    /// The private key that belongs to `cert`.
    pub key: PathBuf,
}

impl Tls {
    pub fn ca_cert(&self) -> PathBuf {
        expand_home(&self.ca_cert)
    }

    pub fn cert(&self) -> PathBuf {
        expand_home(&self.cert)
    }

    pub fn key(&self) -> PathBuf {
        expand_home(&self.key)
    }
}

/// All settings which are used by both, the server and the client
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
pub struct Shared {
    /// Where the length field lives in the protocol's frame header.
    #[serde(default = "default_framing")]
    pub framing: FramingParams,
    /// Size of the scratch buffer each connection reads into.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Close a connection if the peer stays silent for this many milliseconds.
    /// No deadline if unset.
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,
    /// Deadline for a single write (and for a graceful shutdown) in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: Option<u64>,
    /// Deadline for dialing and for the TLS handshake in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: Option<u64>,
}

/// All settings which are used by the server
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
pub struct Server {
    /// The address to bind to. An empty host binds on all interfaces.
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: String,
    /// Plain TCP is used, if this isn't set.
    #[serde(default)]
    pub tls: Option<Tls>,
    /// Require clients to present a certificate signed by `tls.ca_cert`.
    #[serde(default)]
    pub verify_client: bool,
    /// Idle time in seconds before TCP keepalive probes are sent.
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: Option<u64>,
}

/// All settings which are used by the client
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
pub struct Client {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: String,
    /// The name the server's certificate is checked against.
    /// Defaults to `host`.
    #[serde(default)]
    pub server_name: Option<String>,
    /// Plain TCP is used, if this isn't set.
    #[serde(default)]
    pub tls: Option<Tls>,
}

/// The parent settings struct. \
/// This contains all other setting structs.
#[derive(PartialEq, Clone, Debug, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default = "Default::default")]
    pub shared: Shared,
    #[serde(default = "Default::default")]
    pub server: Server,
    #[serde(default = "Default::default")]
    pub client: Client,
}

impl Default for Shared {
    fn default() -> Self {
        Shared {
            framing: default_framing(),
            read_buffer_size: default_read_buffer_size(),
            read_timeout_ms: None,
            write_timeout_ms: default_write_timeout(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl Default for Server {
    fn default() -> Self {
        Server {
            host: default_host(),
            port: default_port(),
            tls: None,
            verify_client: false,
            keepalive_secs: default_keepalive(),
        }
    }
}

impl Default for Client {
    fn default() -> Self {
        Client {
            host: default_host(),
            port: default_port(),
            server_name: None,
            tls: None,
        }
    }
}

/// Little helper which expands a given path's `~` characters to a fully qualified path.
pub fn expand_home(old_path: &Path) -> PathBuf {
    PathBuf::from(tilde(&old_path.to_string_lossy()).into_owned())
}

impl Shared {
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

impl Server {
    /// The address in `host:port` notation.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn keepalive(&self) -> Option<Duration> {
        self.keepalive_secs.map(Duration::from_secs)
    }
}

impl Client {
    /// The address in `host:port` notation.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn server_name(&self) -> &str {
        self.server_name.as_deref().unwrap_or(&self.host)
    }
}

/// The location of the config file, if none is passed explicitly.
pub fn default_config_path() -> Result<PathBuf, Error> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| Error::InvalidPath("Couldn't resolve config directory".into()))?;

    Ok(config_dir.join("pdu_transport").join("pdu.yml"))
}

impl Settings {
    /// Try to read an existing config file, while using default values for non-existing fields.
    /// If successful, this will return a full config as well as a boolean on whether we found an
    /// existing configuration file or not.
    pub fn read(from_file: &Option<PathBuf>) -> Result<(Settings, bool), Error> {
        // Load the config from a very specific file path
        if let Some(path) = from_file {
            if !path.exists() || !path.is_file() {
                return Err(Error::FileNotFound(format!(
                    "Couldn't find config at path {path:?}"
                )));
            }

            return Ok((Settings::read_file(path)?, true));
        };

        let path = default_config_path()?;
        info!("Checking path: {path:?}");
        if path.exists() && path.is_file() {
            info!("Found config file at: {path:?}");
            return Ok((Settings::read_file(&path)?, true));
        }

        info!("No config file found. Use default config.");
        Ok((Settings::default(), false))
    }

    fn read_file(path: &Path) -> Result<Settings, Error> {
        // Open the file in read-only mode with buffer.
        let file = File::open(path)
            .map_err(|err| Error::IoPathError(path.to_path_buf(), "opening config file", err))?;
        let reader = BufReader::new(file);

        let settings: Settings = serde_yaml::from_reader(reader)
            .map_err(|err| Error::ConfigDeserialization(err.to_string()))?;
        settings.shared.framing.validate()?;

        Ok(settings)
    }

    /// Save the current configuration as a file to the given path. \
    /// If no path is given, the default configuration path will be used.
    pub fn save(&self, path: &Option<PathBuf>) -> Result<(), Error> {
        let config_path = if let Some(path) = path {
            path.clone()
        } else {
            default_config_path()?
        };
        let config_dir = config_path
            .parent()
            .ok_or_else(|| Error::InvalidPath("Couldn't resolve config directory".into()))?;

        // Create the config dir, if it doesn't exist yet
        if !config_dir.exists() {
            create_dir_all(config_dir)?;
        }

        let content = match serde_yaml::to_string(self) {
            Ok(content) => content,
            Err(error) => {
                return Err(Error::Generic(format!(
                    "Configuration file serialization failed:\n{error}"
                )))
            }
        };
        let mut file = File::create(config_path)?;
        file.write_all(content.as_bytes())?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use tempdir::TempDir;

    use super::*;
    use crate::network::framing::LengthMode;

    /// Missing fields fall back to their defaults.
    #[test]
    fn test_partial_config() {
        let yaml = "
server:
  port: \"9000\"
  verify_client: true
shared:
  read_timeout_ms: 500
  framing:
    min_header_len: 4
    length_field_start: 0
    length_field_end: 2
    length_mode: payload
";
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(settings.server.port, "9000");
        assert_eq!(settings.server.host, default_host());
        assert!(settings.server.verify_client);
        assert_eq!(settings.server.keepalive(), Some(Duration::from_secs(60)));
        assert_eq!(settings.shared.read_timeout(), Some(Duration::from_millis(500)));
        assert_eq!(settings.shared.read_buffer_size, 2048);
        assert_eq!(settings.shared.framing.length_mode, LengthMode::Payload);
        assert_eq!(settings.client, Client::default());
    }

    #[test]
    fn test_save_and_read() {
        let tempdir = TempDir::new("pdu_settings").unwrap();
        let path = Some(tempdir.path().join("nested").join("pdu.yml"));

        let mut settings = Settings::default();
        settings.client.server_name = Some("rtr.example".into());
        settings.server.tls = Some(Tls {
            ca_cert: "~/certs/ca.pem".into(),
            cert: "/etc/pdu/server.pem".into(),
            key: "/etc/pdu/server.key".into(),
        });
        settings.save(&path).unwrap();

        let (read, found) = Settings::read(&path).unwrap();
        assert!(found);
        assert_eq!(read, settings);
        assert_eq!(read.client.server_name(), "rtr.example");
    }

    /// A config with inconsistent framing parameters is rejected on load.
    #[test]
    fn test_invalid_framing_in_file() {
        let tempdir = TempDir::new("pdu_settings").unwrap();
        let path = tempdir.path().join("pdu.yml");
        std::fs::write(
            &path,
            "shared:\n  framing:\n    min_header_len: 4\n    length_field_start: 2\n    length_field_end: 8\n",
        )
        .unwrap();

        let result = Settings::read(&Some(path));
        assert!(matches!(result, Err(Error::InvalidFraming(_))));
    }

    #[test]
    fn test_missing_config_file() {
        let result = Settings::read(&Some(PathBuf::from("/this/path/does/not/exist.yml")));
        assert!(matches!(result, Err(Error::FileNotFound(_))));
    }
}
