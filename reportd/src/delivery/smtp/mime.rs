//! Hand-built MIME messages.
//!
//! Plain mails are a single `text/plain` quoted-printable part. Mails with
//! attachments are `multipart/mixed`: the text body first, then one
//! base64 part per attachment.

use std::fmt::Write;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, TimeZone};
use report_render::Attachment;

use crate::delivery::Mail;

const CRLF: &str = "\r\n";
const BASE64_LINE: usize = 76;
/// Longest encoded word allowed by RFC 2047.
const ENCODED_WORD_MAX: usize = 75;

/// Render `mail` as an RFC 5322 message.
pub fn build_message<Tz>(mail: &Mail, from: &str, host: &str, now: &DateTime<Tz>) -> Vec<u8>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let mut out = String::new();

    header(&mut out, "From", from);
    header(&mut out, "To", &mail.to.join(", "));
    if !mail.cc.is_empty() {
        header(&mut out, "Cc", &mail.cc.join(", "));
    }
    header(&mut out, "Subject", &encode_subject(&mail.subject));
    header(&mut out, "Date", &now.format("%a, %d %b %Y %H:%M:%S %z").to_string());
    header(&mut out, "Message-ID", &message_id(now, host));
    header(&mut out, "MIME-Version", "1.0");

    if mail.attachments.is_empty() {
        text_part(&mut out, &mail.body);
        return out.into_bytes();
    }

    let boundary = format!("boundary-{:016x}", rand::random::<u64>());
    header(
        &mut out,
        "Content-Type",
        &format!("multipart/mixed; boundary=\"{boundary}\""),
    );
    out.push_str(CRLF);

    let _ = write!(out, "--{boundary}{CRLF}");
    text_part(&mut out, &mail.body);
    for attachment in &mail.attachments {
        let _ = write!(out, "{CRLF}--{boundary}{CRLF}");
        attachment_part(&mut out, attachment);
    }
    let _ = write!(out, "{CRLF}--{boundary}--{CRLF}");

    out.into_bytes()
}

fn header(out: &mut String, name: &str, value: &str) {
    let _ = write!(out, "{name}: {value}{CRLF}");
}

fn message_id<Tz: TimeZone>(now: &DateTime<Tz>, host: &str) -> String {
    let nanos = now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp());
    format!("<{nanos}.{:016x}@{host}>", rand::random::<u64>())
}

fn text_part(out: &mut String, body: &str) {
    header(out, "Content-Type", "text/plain; charset=utf-8");
    header(out, "Content-Transfer-Encoding", "quoted-printable");
    out.push_str(CRLF);
    out.push_str(&quoted_printable::encode_to_str(normalize_newlines(body)));
    out.push_str(CRLF);
}

fn attachment_part(out: &mut String, attachment: &Attachment) {
    let mime = mime_guess::from_path(&attachment.name).first_or_octet_stream();
    let name = attachment.name.replace(['"', '\\', '\r', '\n'], "_");
    header(out, "Content-Type", &format!("{}; name=\"{name}\"", mime.essence_str()));
    header(out, "Content-Transfer-Encoding", "base64");
    header(out, "Content-Disposition", &format!("attachment; filename=\"{name}\""));
    out.push_str(CRLF);
    out.push_str(&wrap_base64(&attachment.data));
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', CRLF)
}

/// Base64 with a CRLF after every 76 characters.
pub fn wrap_base64(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / BASE64_LINE * 2 + 2);
    // Base64 output is ASCII, so byte chunks are char boundaries.
    for line in encoded.as_bytes().chunks(BASE64_LINE) {
        out.push_str(std::str::from_utf8(line).unwrap_or_default());
        out.push_str(CRLF);
    }
    out
}

/// RFC 2047 Q-encoding of a UTF-8 header value, split into encoded words
/// that fit the line limit.
pub fn encode_subject(subject: &str) -> String {
    const PREFIX: &str = "=?UTF-8?Q?";
    const SUFFIX: &str = "?=";
    let budget = ENCODED_WORD_MAX - PREFIX.len() - SUFFIX.len();

    let mut words = Vec::new();
    let mut current = String::new();
    let mut buf = [0u8; 4];
    for c in subject.chars() {
        let mut encoded = String::new();
        for byte in c.encode_utf8(&mut buf).bytes() {
            match byte {
                b' ' => encoded.push('_'),
                b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'!' | b'*' | b'+' | b'-' | b'/' => {
                    encoded.push(byte as char)
                }
                other => {
                    let _ = write!(encoded, "={other:02X}");
                }
            }
        }
        if current.len() + encoded.len() > budget && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        current.push_str(&encoded);
    }
    words.push(current);

    words
        .iter()
        .map(|w| format!("{PREFIX}{w}{SUFFIX}"))
        .collect::<Vec<_>>()
        .join("\r\n ")
}
