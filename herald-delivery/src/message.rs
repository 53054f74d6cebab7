//! Finished messages, batch templates, and their MIME rendering.

use std::{borrow::Cow, collections::BTreeMap, fmt::Write};

use base64::Engine;
use serde::{Deserialize, Serialize};

/// Width of base64 body lines (RFC 2045).
const BASE64_LINE_WIDTH: usize = 76;

/// Preferred header line width (RFC 5322 section 2.1.1).
const HEADER_LINE_WIDTH: usize = 78;

/// Raw bytes per RFC 2047 encoded word. 39 bytes encode to 52 base64
/// characters, a 64 character word once wrapped in `=?UTF-8?B?...?=`.
const ENCODED_WORD_BYTES: usize = 39;

/// A finished message for one recipient.
///
/// Immutable once built. When no text body is supplied, one is derived from
/// the HTML on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    recipient: String,
    subject: String,
    html: String,
    #[serde(default)]
    text: Option<String>,
}

impl Message {
    #[must_use]
    pub fn new(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        html: impl Into<String>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            subject: subject.into(),
            html: html.into(),
            text: None,
        }
    }

    /// Attach an explicit plain-text alternative.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[must_use]
    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn html(&self) -> &str {
        &self.html
    }

    /// The explicit text body, or the HTML with its markup stripped.
    #[must_use]
    pub fn text_body(&self) -> Cow<'_, str> {
        self.text
            .as_deref()
            .map_or_else(|| Cow::Owned(html_to_text(&self.html)), Cow::Borrowed)
    }

    /// Render the message as an RFC 5322 `multipart/alternative` document.
    ///
    /// Lines are CRLF terminated. Dot-stuffing is left to the SMTP client.
    #[must_use]
    pub fn to_mime(&self, from: &str, message_id: &str) -> String {
        let boundary = format!("herald-{}", ulid::Ulid::new());
        let mut out = String::with_capacity(self.html.len() * 2 + 1024);

        // Writing into a String cannot fail.
        let _ = write!(
            out,
            "From: {from}\r\n\
             To: {to}\r\n\
             {subject}\r\n\
             Date: {date}\r\n\
             Message-ID: {message_id}\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: multipart/alternative; boundary=\"{boundary}\"\r\n\
             \r\n",
            to = self.recipient,
            subject = header("Subject", &self.subject),
            date = chrono::Utc::now().to_rfc2822(),
        );

        for (content_type, body) in [
            ("text/plain", self.text_body()),
            ("text/html", Cow::Borrowed(self.html.as_str())),
        ] {
            let _ = write!(
                out,
                "--{boundary}\r\n\
                 Content-Type: {content_type}; charset=utf-8\r\n\
                 Content-Transfer-Encoding: base64\r\n\
                 \r\n\
                 {encoded}",
                encoded = encode_body(&body),
            );
        }

        let _ = write!(out, "--{boundary}--\r\n");
        out
    }
}

/// Render `name: value` as a folded header.
///
/// Plain ASCII is folded at spaces. Anything else, or a word too long to
/// fold, becomes a run of RFC 2047 encoded words split on character
/// boundaries, one per line.
fn header(name: &str, value: &str) -> String {
    let value = value.replace(['\r', '\n'], " ");
    let longest = value.split(' ').map(str::len).max().unwrap_or_default();

    if value.is_ascii() && name.len() + 2 + longest <= HEADER_LINE_WIDTH {
        fold(name, &value)
    } else {
        format!("{name}: {}", encoded_words(&value))
    }
}

fn fold(name: &str, value: &str) -> String {
    let mut out = format!("{name}:");
    let mut width = out.len();

    for word in value.split(' ') {
        if !word.is_empty() && width + 1 + word.len() > HEADER_LINE_WIDTH {
            out.push_str("\r\n");
            width = 0;
        }
        out.push(' ');
        out.push_str(word);
        width += 1 + word.len();
    }

    out
}

fn encoded_words(value: &str) -> String {
    let mut words = Vec::new();
    let mut start = 0;

    for (index, c) in value.char_indices() {
        if index + c.len_utf8() - start > ENCODED_WORD_BYTES {
            words.push(encoded_word(&value[start..index]));
            start = index;
        }
    }
    words.push(encoded_word(&value[start..]));

    words.join("\r\n ")
}

fn encoded_word(chunk: &str) -> String {
    format!(
        "=?UTF-8?B?{}?=",
        base64::engine::general_purpose::STANDARD.encode(chunk)
    )
}

fn encode_body(body: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(body.as_bytes());
    let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / BASE64_LINE_WIDTH * 2 + 2);

    for chunk in encoded.as_bytes().chunks(BASE64_LINE_WIDTH) {
        // base64 output is ASCII, so every chunk is valid UTF-8.
        wrapped.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        wrapped.push_str("\r\n");
    }

    wrapped
}

/// Returns `true` if `address` looks like a bare `local@domain` mailbox.
///
/// Deliberately loose: it only rules out values that can never be an
/// envelope address.
#[must_use]
pub fn is_plausible_address(address: &str) -> bool {
    let Some((local, domain)) = address.rsplit_once('@') else {
        return false;
    };

    !local.is_empty()
        && !domain.is_empty()
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !address
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '<' | '>' | ',' | ';'))
}

/// Elements whose boundaries become line breaks in the text rendering.
const BLOCK_TAGS: &[&str] = &[
    "br", "p", "div", "li", "tr", "table", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6",
    "blockquote", "hr",
];

/// Strip markup from an HTML body to produce a readable text alternative.
#[must_use]
pub fn html_to_text(html: &str) -> String {
    let mut raw = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(start) = rest.find('<') {
        raw.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        let Some(end) = after.find('>') else {
            // Unterminated tag: keep the text as-is.
            raw.push_str(&rest[start..]);
            rest = "";
            break;
        };

        let tag = &after[..end];
        rest = &after[end + 1..];

        let name = tag
            .trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();

        if (name == "script" || name == "style") && !tag.starts_with('/') {
            let closing = format!("</{name}");
            rest = rest
                .to_ascii_lowercase()
                .find(&closing)
                .and_then(|pos| rest[pos..].find('>').map(|gt| &rest[pos + gt + 1..]))
                .unwrap_or("");
            continue;
        }

        if BLOCK_TAGS.contains(&name.as_str()) {
            raw.push('\n');
        }
    }
    raw.push_str(rest);

    let decoded = decode_entities(&raw);

    let mut text = String::with_capacity(decoded.len());
    let mut blank_run = false;
    for line in decoded.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            if !blank_run && !text.is_empty() {
                text.push('\n');
            }
            blank_run = true;
        } else {
            text.push_str(&line);
            text.push('\n');
            blank_run = false;
        }
    }

    text.trim_end().to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// One batch recipient and the values substituted into its copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub address: String,
    #[serde(default)]
    pub tokens: BTreeMap<String, String>,
}

impl Recipient {
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            tokens: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_token(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tokens.insert(key.into(), value.into());
        self
    }
}

/// A message shared by every recipient of a batch.
///
/// `{{email}}` and `{{key}}` placeholders are filled in per recipient by
/// [`MessageTemplate::personalize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub subject: String,
    pub html: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl MessageTemplate {
    #[must_use]
    pub fn new(subject: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            html: html.into(),
            text: None,
        }
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Produce the copy of this template addressed to `recipient`.
    #[must_use]
    pub fn personalize(&self, recipient: &Recipient) -> Message {
        let fill = |input: &str| {
            recipient.tokens.iter().fold(
                input.replace("{{email}}", &recipient.address),
                |acc, (key, value)| acc.replace(&format!("{{{{{key}}}}}"), value),
            )
        };

        let message = Message::new(&recipient.address, fill(&self.subject), fill(&self.html));
        match &self.text {
            Some(text) => message.with_text(fill(text)),
            None => message,
        }
    }
}
