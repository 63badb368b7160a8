use async_imap::Session;
use async_native_tls::TlsStream;
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::info;

use crate::types::error::SyncError;

// An IMAP session is generic over the stream type; ours is TLS-encrypted TCP
// wrapped in a tokio compat layer.
pub type ImapStream = TlsStream<Compat<TcpStream>>;
pub type ImapSession = Session<ImapStream>;

pub async fn connect(
    host: &str,
    port: u16,
    username: &str,
    password: &str,
) -> Result<ImapSession, SyncError> {
    info!(host = %host, port = port, "Connecting to IMAP server");

    let tcp = TcpStream::connect((host, port))
        .await
        .map_err(|e| SyncError::Connection(format!("TCP connection failed: {}", e)))?;

    let tcp = tcp.compat();
    let tls = async_native_tls::TlsConnector::new();
    let tls_stream = tls
        .connect(host, tcp)
        .await
        .map_err(|e| SyncError::Connection(format!("TLS handshake failed: {}", e)))?;

    let client = async_imap::Client::new(tls_stream);

    let session = client
        .login(username, password)
        .await
        .map_err(|(e, _)| SyncError::Auth(format!("Login failed: {}", e)))?;

    info!(user = %username, "Logged in");
    Ok(session)
}
