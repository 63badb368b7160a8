use std::fmt::Debug;

use async_imap::Session;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use futures::io::{AsyncRead, AsyncWrite};
use futures::{Stream, StreamExt, TryStreamExt};
use tracing::{debug, warn};

use super::connection::ImapStream;
use crate::types::error::{Result, SyncError};

/// INTERNALDATE layout; the value goes on the wire as a quoted string
const INTERNAL_DATE_FORMAT: &str = "%d-%b-%Y %H:%M:%S %z";

/// The mailbox operations the sync engine relies on.
///
/// Every call is a single protocol round trip; nothing here retries.
#[async_trait]
pub trait MailStore: Send {
    /// Create `name` if needed and make it the current folder
    async fn select_or_create_folder(&mut self, name: &str) -> Result<()>;

    /// Raw header blocks for `range` in the current folder, keyed by UID
    async fn fetch_headers(
        &mut self,
        range: &str,
        header_names: &[&str],
    ) -> Result<Vec<(u32, Vec<u8>)>>;

    /// Append `message` to `folder`. `flags` holds space-separated flag
    /// names such as `\Seen`, without the surrounding parentheses.
    async fn append(
        &mut self,
        folder: &str,
        flags: Option<&str>,
        timestamp: DateTime<FixedOffset>,
        message: &[u8],
    ) -> Result<()>;

    async fn mark_deleted(&mut self, uid: u32) -> Result<()>;

    async fn expunge(&mut self) -> Result<()>;

    async fn logout(&mut self) -> Result<()>;

    /// Flag then expunge straight away, one message at a time
    async fn delete(&mut self, uid: u32) -> Result<()> {
        self.mark_deleted(uid).await?;
        self.expunge().await
    }
}

/// `MailStore` over an authenticated session. Generic over the stream so
/// the command encoding can be checked without a network.
pub struct ImapStore<T = ImapStream>
where
    T: AsyncRead + AsyncWrite + Unpin + Debug,
{
    session: Session<T>,
    /// Message count of the selected folder
    exists: u32,
}

impl<T> ImapStore<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Debug + Send,
{
    pub fn new(session: Session<T>) -> Self {
        Self { session, exists: 0 }
    }
}

/// Quoted INTERNALDATE for APPEND
fn internal_date(timestamp: &DateTime<FixedOffset>) -> String {
    format!("\"{}\"", timestamp.format(INTERNAL_DATE_FORMAT))
}

/// Parenthesized flag list for APPEND; `None` when there are no flags
fn flag_list(flags: Option<&str>) -> Option<String> {
    flags
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(|f| format!("({})", f))
}

/// Collects a FETCH stream tolerantly: responses that fail to parse are
/// logged and skipped.
async fn collect_tolerant<T, E: std::fmt::Display>(
    stream: impl Stream<Item = std::result::Result<T, E>>,
    context: &str,
) -> Vec<T> {
    futures::pin_mut!(stream);
    let mut items = Vec::new();
    while let Some(result) = stream.next().await {
        match result {
            Ok(item) => items.push(item),
            Err(e) => {
                warn!("Skipping unparseable IMAP response ({}): {}", context, e);
            }
        }
    }
    items
}

#[async_trait]
impl<T> MailStore for ImapStore<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Debug + Send,
{
    async fn select_or_create_folder(&mut self, name: &str) -> Result<()> {
        if let Err(e) = self.session.create(name).await {
            debug!(folder = %name, error = %e, "CREATE refused, assuming folder exists");
        }

        let mailbox = self
            .session
            .select(name)
            .await
            .map_err(|e| SyncError::Backend(format!("SELECT failed: {}", e)))?;

        self.exists = mailbox.exists;
        debug!(folder = %name, exists = mailbox.exists, "Selected folder");
        Ok(())
    }

    async fn fetch_headers(
        &mut self,
        range: &str,
        header_names: &[&str],
    ) -> Result<Vec<(u32, Vec<u8>)>> {
        if self.exists == 0 {
            return Ok(Vec::new());
        }

        let query = format!("(UID BODY.PEEK[HEADER.FIELDS ({})])", header_names.join(" "));
        let fetches = collect_tolerant(
            self.session
                .fetch(range, &query)
                .await
                .map_err(|e| SyncError::Backend(format!("FETCH failed: {}", e)))?,
            "header fetch",
        )
        .await;

        Ok(fetches
            .iter()
            .filter_map(|f| {
                let uid = f.uid?;
                Some((uid, f.header().unwrap_or_default().to_vec()))
            })
            .collect())
    }

    async fn append(
        &mut self,
        folder: &str,
        flags: Option<&str>,
        timestamp: DateTime<FixedOffset>,
        message: &[u8],
    ) -> Result<()> {
        let flags = flag_list(flags);
        let internal_date = internal_date(&timestamp);
        self.session
            .append(
                folder,
                flags.as_deref(),
                Some(internal_date.as_str()),
                message,
            )
            .await
            .map_err(|e| SyncError::Backend(format!("APPEND failed: {}", e)))?;
        self.exists += 1;
        Ok(())
    }

    async fn mark_deleted(&mut self, uid: u32) -> Result<()> {
        let _updated: Vec<_> = self
            .session
            .uid_store(uid.to_string(), "+FLAGS (\\Deleted)")
            .await
            .map_err(|e| SyncError::Backend(format!("STORE failed: {}", e)))?
            .try_collect()
            .await
            .map_err(|e| SyncError::Backend(format!("Failed to collect STORE: {}", e)))?;
        Ok(())
    }

    async fn expunge(&mut self) -> Result<()> {
        let expunged: Vec<_> = self
            .session
            .expunge()
            .await
            .map_err(|e| SyncError::Backend(format!("EXPUNGE failed: {}", e)))?
            .try_collect()
            .await
            .map_err(|e| SyncError::Backend(format!("Failed to collect EXPUNGE: {}", e)))?;
        self.exists = self.exists.saturating_sub(expunged.len() as u32);
        debug!(count = expunged.len(), "Expunged");
        Ok(())
    }

    async fn logout(&mut self) -> Result<()> {
        self.session
            .logout()
            .await
            .map_err(|e| SyncError::Backend(format!("LOGOUT failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};
    use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

    fn sample_time() -> DateTime<FixedOffset> {
        FixedOffset::west_opt(4 * 3600)
            .unwrap()
            .with_ymd_and_hms(2014, 9, 4, 15, 45, 41)
            .unwrap()
    }

    fn literal_size(line: &str) -> Option<usize> {
        let open = line.rfind('{')?;
        line.strip_suffix('}')?.get(open + 1..)?.parse().ok()
    }

    /// Minimal server: grants every literal, answers every command with a
    /// tagged OK and returns the command lines it received.
    async fn serve(stream: DuplexStream) -> Vec<String> {
        let mut stream = BufReader::new(stream);
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            if stream.read_line(&mut line).await.unwrap() == 0 {
                break;
            }
            let line = line.trim_end().to_string();
            let tag = line.split(' ').next().unwrap_or_default().to_string();

            if let Some(size) = literal_size(&line) {
                stream.get_mut().write_all(b"+ go ahead\r\n").await.unwrap();
                let mut body = vec![0; size];
                stream.read_exact(&mut body).await.unwrap();
                let mut rest = String::new();
                stream.read_line(&mut rest).await.unwrap();
            }

            stream
                .get_mut()
                .write_all(format!("{} OK done\r\n", tag).as_bytes())
                .await
                .unwrap();
            lines.push(line);
        }
        lines
    }

    async fn login(stream: DuplexStream) -> ImapStore<Compat<DuplexStream>> {
        let client = async_imap::Client::new(stream.compat());
        let session = client
            .login("me", "secret")
            .await
            .map_err(|(e, _)| e)
            .unwrap();
        ImapStore::new(session)
    }

    /// Command lines without their tags
    fn commands(lines: &[String]) -> Vec<&str> {
        lines
            .iter()
            .map(|l| l.split_once(' ').map(|(_, rest)| rest).unwrap_or(l.as_str()))
            .collect()
    }

    #[test]
    fn test_internal_date_is_quoted() {
        assert_eq!(internal_date(&sample_time()), "\"04-Sep-2014 15:45:41 -0400\"");
    }

    #[test]
    fn test_flag_list_is_parenthesized() {
        assert_eq!(flag_list(Some("\\Seen")).as_deref(), Some("(\\Seen)"));
        assert_eq!(flag_list(Some("  ")), None);
        assert_eq!(flag_list(None), None);
    }

    #[tokio::test]
    async fn test_commands_on_the_wire() {
        let (client_io, server_io) = tokio::io::duplex(8192);
        let server = tokio::spawn(serve(server_io));
        let mut store = login(client_io).await;

        // Nothing selected yet, so nothing to fetch
        let fetched = store.fetch_headers("1:*", &["Message-ID"]).await.unwrap();
        assert!(fetched.is_empty());

        store
            .append("ChatLog", Some("\\Seen"), sample_time(), b"x")
            .await
            .unwrap();
        store
            .append("ChatLog", None, sample_time(), b"y")
            .await
            .unwrap();
        store.mark_deleted(7).await.unwrap();
        drop(store);

        let lines = server.await.unwrap();
        let sent = commands(&lines);
        assert_eq!(sent.len(), 4);
        assert!(sent[0].starts_with("LOGIN"));
        assert_eq!(
            sent[1],
            r#"APPEND "ChatLog" (\Seen) "04-Sep-2014 15:45:41 -0400" {1}"#
        );
        assert_eq!(sent[2], r#"APPEND "ChatLog" "04-Sep-2014 15:45:41 -0400" {1}"#);
        assert_eq!(sent[3], r"UID STORE 7 +FLAGS (\Deleted)");
    }
}
