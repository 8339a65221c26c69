//! TCP and Unix-domain listeners behind one accept interface.

use std::io;
use std::net::SocketAddr;
#[cfg(unix)]
use std::path::PathBuf;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tracing::info;

use texhub_core::error::{AppError, ErrorKind};
use texhub_core::result::AppResult;

/// A byte stream accepted by a [`Listener`].
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased accepted stream.
pub type BoxedIo = Box<dyn Io>;

/// Where the connection server accepts sockets.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener, PathBuf),
}

impl Listener {
    /// Bind `host:port`, or `unix:/path/to.sock` on Unix.
    pub async fn bind(address: &str) -> AppResult<Self> {
        #[cfg(unix)]
        if let Some(path) = address.strip_prefix("unix:") {
            let path = PathBuf::from(path);
            // A socket file left behind by a previous run blocks bind.
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
            let listener = UnixListener::bind(&path).map_err(|e| {
                AppError::with_source(
                    ErrorKind::Io,
                    format!("Failed to bind {}", path.display()),
                    e,
                )
            })?;
            info!(path = %path.display(), "Listening on unix socket");
            return Ok(Self::Unix(listener, path));
        }

        let listener = TcpListener::bind(address).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Io,
                format!("Failed to bind {address}"),
                e,
            )
        })?;
        info!(address = %address, "Listening on tcp");
        Ok(Self::Tcp(listener))
    }

    /// Bound TCP address, if this is a TCP listener.
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            Self::Unix(..) => None,
        }
    }

    /// Human-readable bound address.
    pub fn describe(&self) -> String {
        match self {
            Self::Tcp(listener) => listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "tcp".to_string()),
            #[cfg(unix)]
            Self::Unix(_, path) => format!("unix:{}", path.display()),
        }
    }

    /// Accept the next connection and its peer description.
    pub async fn accept(&self) -> io::Result<(BoxedIo, String)> {
        match self {
            Self::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok((Box::new(stream), peer.to_string()))
            }
            #[cfg(unix)]
            Self::Unix(listener, path) => {
                let (stream, _) = listener.accept().await?;
                Ok((Box::new(stream), format!("unix:{}", path.display())))
            }
        }
    }
}
