//! Client for the daemon's local control socket.
//!
//! The daemon speaks HTTP with a JSON envelope over `<data dir>/unix.socket`.
//! Requests are sent as HTTP/1.0 so the server closes the connection after
//! each response and the body can be read to end of stream.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use socket2::{Domain, SockAddr, Socket, Type};
use thiserror::Error;
use tracing::debug;

pub(crate) const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(30);
const CONTROL_TARGET: &str = "lxd_migrate::control";
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// API extension advertising storage pools.
pub const STORAGE_EXTENSION: &str = "storage";
/// API extension advertising managed networks.
pub const NETWORK_EXTENSION: &str = "network";

/// Errors raised while talking to a daemon.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("failed to connect to {socket:?}: {source}")]
    Connect {
        socket: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("request {method} {path} failed: {source}")]
    Transport {
        method: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("the daemon closed the connection during {method} {path}")]
    Closed { method: &'static str, path: String },
    #[error("malformed response to {path}: {reason}")]
    MalformedResponse { path: String, reason: String },
    #[error("failed to decode response to {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path} returned {status}: {message}")]
    Api {
        path: String,
        status: u16,
        message: String,
    },
}

/// Server description returned by `GET /1.0`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServerInfo {
    /// API extensions the daemon supports.
    #[serde(default)]
    pub api_extensions: Vec<String>,
    /// Runtime environment details.
    #[serde(default)]
    pub environment: ServerEnvironment,
}

/// Environment section of [`ServerInfo`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServerEnvironment {
    /// Dotted daemon version.
    #[serde(default)]
    pub server_version: String,
    /// Daemon process id.
    #[serde(default)]
    pub server_pid: Option<u32>,
    /// Storage backend reported by pre-pool daemons.
    #[serde(default)]
    pub storage: String,
}

impl ServerInfo {
    /// Dotted daemon version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.environment.server_version
    }

    /// Whether the daemon advertises `extension`.
    #[must_use]
    pub fn has_extension(&self, extension: &str) -> bool {
        self.api_extensions.iter().any(|name| name == extension)
    }
}

/// A network known to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Network {
    pub name: String,
    #[serde(default)]
    pub managed: bool,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// A storage pool known to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoragePool {
    pub name: String,
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_code: u16,
    #[serde(default)]
    metadata: serde_json::Value,
}

/// Connection details for one daemon's control socket.
#[derive(Debug, Clone)]
pub struct ControlClient {
    socket: PathBuf,
}

impl ControlClient {
    /// Creates a client for the socket at `socket`.
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    /// Path of the control socket.
    #[must_use]
    pub fn socket(&self) -> &Path {
        &self.socket
    }

    pub fn server_info(&self) -> Result<ServerInfo, ControlError> {
        self.get("/1.0")
    }

    pub fn networks(&self) -> Result<Vec<Network>, ControlError> {
        self.get("/1.0/networks?recursion=1")
    }

    pub fn storage_pools(&self) -> Result<Vec<StoragePool>, ControlError> {
        self.get("/1.0/storage-pools?recursion=1")
    }

    pub fn containers(&self) -> Result<Vec<String>, ControlError> {
        self.get_names("/1.0/containers")
    }

    pub fn images(&self) -> Result<Vec<String>, ControlError> {
        self.get_names("/1.0/images")
    }

    pub fn profiles(&self) -> Result<Vec<String>, ControlError> {
        self.get_names("/1.0/profiles")
    }

    /// Asks the daemon to stop its containers and exit.
    ///
    /// The daemon may drop the connection instead of answering once it has
    /// shut down; that counts as success.
    pub fn shutdown(&self) -> Result<(), ControlError> {
        match self.request::<serde_json::Value>("PUT", "/internal/shutdown", None) {
            Ok(_) | Err(ControlError::Closed { .. }) => Ok(()),
            Err(error) => Err(error),
        }
    }

    /// Issues a `GET` and decodes the envelope metadata.
    pub fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ControlError> {
        self.request("GET", path, Some(READ_TIMEOUT))
    }

    fn get_names(&self, path: &str) -> Result<Vec<String>, ControlError> {
        let urls: Vec<String> = self.get(path)?;
        Ok(urls
            .into_iter()
            .map(|url| url.rsplit('/').next().unwrap_or(&url).to_owned())
            .collect())
    }

    fn request<T: DeserializeOwned>(
        &self,
        method: &'static str,
        path: &str,
        read_timeout: Option<Duration>,
    ) -> Result<T, ControlError> {
        debug!(target: CONTROL_TARGET, method, path, socket = %self.socket.display(), "request");
        let mut stream = connect_unix(&self.socket).map_err(|source| ControlError::Connect {
            socket: self.socket.clone(),
            source,
        })?;
        let transport = |source: io::Error| classify_io(method, path, source);
        stream.set_read_timeout(read_timeout).map_err(transport)?;
        write!(
            stream,
            "{method} {path} HTTP/1.0\r\nHost: lxd\r\nUser-Agent: lxd-migrate\r\nContent-Length: 0\r\n\r\n"
        )
        .map_err(transport)?;
        stream.flush().map_err(transport)?;

        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).map_err(transport)?;
        if raw.is_empty() {
            return Err(ControlError::Closed {
                method,
                path: path.to_owned(),
            });
        }
        decode_response(path, &raw)
    }
}

fn connect_unix(path: &Path) -> io::Result<UnixStream> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    let address = SockAddr::unix(path)?;
    socket.connect_timeout(&address, CONNECTION_TIMEOUT)?;
    Ok(UnixStream::from(OwnedFd::from(socket)))
}

fn classify_io(method: &'static str, path: &str, source: io::Error) -> ControlError {
    match source.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => ControlError::Closed {
            method,
            path: path.to_owned(),
        },
        _ => ControlError::Transport {
            method,
            path: path.to_owned(),
            source,
        },
    }
}

/// Splits a raw HTTP response and decodes the envelope metadata into `T`.
pub(crate) fn decode_response<T: DeserializeOwned>(
    path: &str,
    raw: &[u8],
) -> Result<T, ControlError> {
    let malformed = |reason: &str| ControlError::MalformedResponse {
        path: path.to_owned(),
        reason: reason.to_owned(),
    };
    let split = raw
        .windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
        .ok_or_else(|| malformed("missing header terminator"))?;
    let (head, rest) = raw.split_at(split);
    let head = String::from_utf8_lossy(head);
    let body = rest.get(HEADER_TERMINATOR.len()..).unwrap_or_default();
    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| malformed("missing status line"))?;

    let envelope: Envelope = serde_json::from_slice(body).map_err(|source| ControlError::Decode {
        path: path.to_owned(),
        source,
    })?;
    if status >= 400 || envelope.kind == "error" {
        return Err(ControlError::Api {
            path: path.to_owned(),
            status: if envelope.error_code == 0 {
                status
            } else {
                envelope.error_code
            },
            message: envelope.error,
        });
    }
    serde_json::from_value(envelope.metadata).map_err(|source| ControlError::Decode {
        path: path.to_owned(),
        source,
    })
}
