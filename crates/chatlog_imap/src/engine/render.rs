//! Transcript → RFC 5322 message
//!
//! Plain text logs become a text body, Pidgin HTML logs an HTML body with
//! their images attached inline, and Adium XML logs a flattened text body.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use chrono_tz::Tz;
use encoding_rs::Encoding;
use mail_builder::headers::raw::Raw;
use mail_builder::MessageBuilder;
use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::{Captures, Regex};
use tracing::{debug, warn};

use crate::engine::identity::Transcript;
use crate::types::error::{Result, SyncError};

const CREATOR: &str = concat!("chatlog-imap v", env!("CARGO_PKG_VERSION"));

static IMG_SRC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(<img\b[^>]*?\bsrc\s*=\s*)(["'])([^"']*)(["'])"#).unwrap()
});

pub struct Renderer {
    encodings: Vec<String>,
    timezone: Tz,
}

/// One image referenced from an HTML log and found on disk
struct InlineImage {
    cid: String,
    content_type: String,
    data: Vec<u8>,
}

impl Renderer {
    pub fn new(encodings: Vec<String>, timezone: Tz) -> Self {
        Self { encodings, timezone }
    }

    pub fn render(&self, transcript: &Transcript) -> Result<Vec<u8>> {
        let dir = &transcript.dir;
        let text = read_text(&transcript.path, &self.encodings)?;

        let references = format!(
            "Chats between {} and {}",
            dir.from_address, dir.to_address
        );
        let created = Utc::now()
            .with_timezone(&self.timezone)
            .format("%Y-%m-%d %H:%M:%S%z")
            .to_string();

        let mut builder = MessageBuilder::new()
            .from(dir.from_address.as_str())
            .to(dir.to_address.as_str())
            .subject(format!("chat with {}", dir.from_address))
            .message_id(transcript.message_id.as_str())
            .date(transcript.timestamp.timestamp())
            .header("References", Raw::new(references.clone()))
            .header("In-Reply-To", Raw::new(references))
            .header("X-Creation-Date", Raw::new(created))
            .header("X-Creator", Raw::new(CREATOR))
            .header(
                "X-Source-File",
                Raw::new(transcript.path.display().to_string()),
            )
            .header(
                "X-Source-File-ModifiedTime",
                Raw::new(transcript.file_mod_time.to_string()),
            );

        builder = match transcript.extension() {
            "html" => {
                let (html, images) = inline_images(&text, &dir.path);
                debug!(path = %transcript.path.display(), images = images.len(), "Rendering HTML log");
                let mut builder = builder.html_body(html);
                for image in images {
                    builder = builder.inline(image.content_type, image.cid, image.data);
                }
                builder
            }
            "xml" => {
                let body = render_chat_xml(&text).map_err(|reason| SyncError::Render {
                    path: transcript.path.clone(),
                    reason,
                })?;
                builder.text_body(body)
            }
            _ => builder.text_body(text),
        };

        builder.write_to_vec().map_err(|e| SyncError::Render {
            path: transcript.path.clone(),
            reason: e.to_string(),
        })
    }
}

/// Decode a file with the first encoding that accepts it, then drop trailing
/// whitespace and NUL padding.
pub fn read_text(path: &Path, encodings: &[String]) -> Result<String> {
    let bytes =
        fs::read(path).map_err(|e| SyncError::Io(format!("{}: {}", path.display(), e)))?;

    for label in encodings {
        let Some(encoding) = Encoding::for_label(label.trim().as_bytes()) else {
            warn!(encoding = %label, "Unknown text encoding");
            continue;
        };

        match encoding.decode_without_bom_handling_and_without_replacement(&bytes) {
            Some(text) => {
                let text = text.trim_start_matches('\u{feff}');
                return Ok(text
                    .trim_end_matches([' ', '\t', '\r', '\n', '\0'])
                    .to_string());
            }
            None => {
                warn!(encoding = %label, path = %path.display(), "Encoding failed");
            }
        }
    }

    Err(SyncError::Encoding {
        path: path.to_path_buf(),
    })
}

/// Point every `<img src>` that resolves to a file next to the log at a
/// `cid:` reference and load the files. Unresolvable images keep their
/// original `src`.
fn inline_images(html: &str, dir: &Path) -> (String, Vec<InlineImage>) {
    let mut images: Vec<InlineImage> = Vec::new();

    let rewritten = IMG_SRC.replace_all(html, |caps: &Captures| {
        let src = &caps[3];
        let original = caps[0].to_string();

        if src.is_empty() || src.starts_with("cid:") {
            return original;
        }

        if !images.iter().any(|i| i.cid == src) {
            let file: PathBuf = dir.join(src);
            match fs::read(&file) {
                Ok(data) => images.push(InlineImage {
                    cid: src.to_string(),
                    content_type: mime_guess::from_path(&file)
                        .first_or_octet_stream()
                        .to_string(),
                    data,
                }),
                Err(e) => {
                    debug!(image = %file.display(), error = %e, "Image not attached");
                    return original;
                }
            }
        }

        format!("{}{}cid:{}{}", &caps[1], &caps[2], src, &caps[4])
    });

    (rewritten.into_owned(), images)
}

/// A `<message>` or `<status>` being collected
struct Entry {
    status: bool,
    time: String,
    sender: String,
    text: String,
}

/// Flatten an Adium `.xml` log into one line per message or status change.
pub fn render_chat_xml(xml: &str) -> std::result::Result<String, String> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut depth = 0usize;
    let mut in_chat = false;
    let mut entry: Option<Entry> = None;

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) => {
                depth += 1;
                if depth == 1 {
                    in_chat = e.local_name().as_ref() == b"chat";
                } else if depth == 2 && in_chat {
                    entry = open_entry(&e)?;
                }
            }
            Event::Empty(e) => {
                if depth == 1 && in_chat {
                    if let Some(done) = open_entry(&e)? {
                        push_entry(&mut out, done);
                    }
                }
            }
            Event::Text(t) => {
                if let Some(current) = entry.as_mut() {
                    current
                        .text
                        .push_str(&t.unescape().map_err(|e| e.to_string())?);
                }
            }
            Event::CData(t) => {
                if let Some(current) = entry.as_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Event::End(_) => {
                if depth == 2 {
                    if let Some(done) = entry.take() {
                        push_entry(&mut out, done);
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(out)
}

fn open_entry(e: &BytesStart) -> std::result::Result<Option<Entry>, String> {
    let status = match e.local_name().as_ref() {
        b"message" => false,
        b"status" => true,
        b"event" | b"chat" => return Ok(None),
        other => {
            return Err(format!(
                "unexpected element <{}>",
                String::from_utf8_lossy(other)
            ))
        }
    };

    let mut sender = attribute(e, "sender")?.unwrap_or_default();
    if let Some(alias) = attribute(e, "alias")?.filter(|a| !a.is_empty()) {
        sender = format!("{}({})", sender, alias);
    }

    Ok(Some(Entry {
        status,
        time: attribute(e, "time")?
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "(unknown time)".to_string()),
        sender,
        text: String::new(),
    }))
}

fn attribute(e: &BytesStart, name: &str) -> std::result::Result<Option<String>, String> {
    match e.try_get_attribute(name).map_err(|err| err.to_string())? {
        Some(attr) => Ok(Some(
            attr.unescape_value()
                .map_err(|err| err.to_string())?
                .into_owned(),
        )),
        None => Ok(None),
    }
}

fn push_entry(out: &mut String, entry: Entry) {
    let text = entry.text;
    if entry.status {
        out.push_str(&format!("[{} {} - {}]\n", entry.time, entry.sender, text));
    } else {
        out.push_str(&format!("{} {}: {}\n", entry.time, entry.sender, text));
    }
}
