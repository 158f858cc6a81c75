use std::fmt;

use content_inspector::ContentType;
use serde::{Serialize, Serializer};

/// Text encoding of an item, or the `binary` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Binary,
    /// A charset label understood by [`decode`].
    Text(&'static str),
}

impl Encoding {
    pub fn is_binary(&self) -> bool {
        matches!(self, Encoding::Binary)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Encoding::Binary => "binary",
            Encoding::Text(label) => label,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for Encoding {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// Result of sniffing one buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub mime_type: String,
    pub encoding: Encoding,
    pub is_container: bool,
}

/// Classify raw bytes.  Never fails: anything that cannot be sniffed falls
/// back to `application/octet-stream` / binary.
pub fn classify(bytes: &[u8], name: &str) -> Classification {
    classify_with_text(bytes, name).0
}

/// Like [`classify`], but also hands back the decoded text view so callers
/// that need both (see `Item`) decode only once.
pub fn classify_with_text(bytes: &[u8], name: &str) -> (Classification, Option<String>) {
    let encoding = detect_encoding(bytes, name);
    let text = decode(bytes, encoding);
    let mime_type = sniff_mime(bytes, text.as_deref());
    let classification = Classification {
        mime_type,
        encoding,
        is_container: is_container(name),
    };
    (classification, text)
}

/// MIME type from content.  Magic bytes win; text content is refined by a
/// cheap look at its first non-blank characters.
pub fn sniff_mime(bytes: &[u8], text: Option<&str>) -> String {
    if bytes.is_empty() {
        return "application/x-empty".into();
    }
    if let Some(kind) = infer::get(bytes) {
        return kind.mime_type().to_string();
    }
    let Some(text) = text else {
        return "application/octet-stream".into();
    };
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    if trimmed.starts_with("<?xml") {
        return "text/xml".into();
    }
    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<serde::de::IgnoredAny>(trimmed).is_ok()
    {
        return "application/json".into();
    }
    "text/plain".into()
}

/// Best-guess charset.  Only the file name decides for formats that are
/// binary no matter what their bytes look like.
pub fn detect_encoding(bytes: &[u8], name: &str) -> Encoding {
    if has_suffix(name, &[".pdf"]) || bytes.is_empty() {
        return Encoding::Binary;
    }
    match content_inspector::inspect(bytes) {
        ContentType::BINARY => Encoding::Binary,
        ContentType::UTF_8_BOM => Encoding::Text("utf-8"),
        ContentType::UTF_16LE => Encoding::Text("utf-16le"),
        ContentType::UTF_16BE => Encoding::Text("utf-16be"),
        ContentType::UTF_32LE => Encoding::Text("utf-32le"),
        ContentType::UTF_32BE => Encoding::Text("utf-32be"),
        ContentType::UTF_8 => {
            if bytes.is_ascii() {
                Encoding::Text("us-ascii")
            } else if std::str::from_utf8(bytes).is_ok() {
                Encoding::Text("utf-8")
            } else {
                // Instrument software on Windows mostly writes Latin-1.
                Encoding::Text("iso-8859-1")
            }
        }
    }
}

/// Decode `bytes` as `encoding`.  Undecodable sequences are dropped, a
/// leading byte-order mark is removed.  Returns `None` only for binary.
pub fn decode(bytes: &[u8], encoding: Encoding) -> Option<String> {
    let label = match encoding {
        Encoding::Binary => return None,
        Encoding::Text(label) => label,
    };
    let text = match label {
        "utf-32le" => decode_utf32(bytes, u32::from_le_bytes),
        "utf-32be" => decode_utf32(bytes, u32::from_be_bytes),
        _ => {
            let charset = encoding_rs::Encoding::for_label(label.as_bytes())
                .unwrap_or(encoding_rs::UTF_8);
            let (text, _, had_errors) = charset.decode(bytes);
            if had_errors {
                text.chars().filter(|c| *c != char::REPLACEMENT_CHARACTER).collect()
            } else {
                text.into_owned()
            }
        }
    };
    Some(text)
}

fn decode_utf32(bytes: &[u8], word: fn([u8; 4]) -> u32) -> String {
    bytes
        .chunks_exact(4)
        .filter_map(|c| char::from_u32(word([c[0], c[1], c[2], c[3]])))
        .filter(|c| *c != '\u{feff}')
        .collect()
}

/// Containers are recognised by name only; members are validated when the
/// archive is opened.
pub fn is_container(name: &str) -> bool {
    has_suffix(name, &[".tar", ".tar.gz", ".tgz", ".tar.xz", ".txz"])
}

fn has_suffix(name: &str, suffixes: &[&str]) -> bool {
    let name = name.to_lowercase();
    suffixes.iter().any(|s| name.ends_with(s))
}
