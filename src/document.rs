//! Document collaborator: splits a document into body + metadata and puts
//! it back together.
//!
//! The PDF implementation lifts the trailer's `/Info` dictionary out of the
//! file. The dictionary interior is overwritten with spaces of the same
//! length, so every cross-reference offset stays valid and the body is
//! still a well-formed PDF with an empty Info dictionary. The removed bytes
//! travel in the metadata segment and are spliced back on reassembly.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Output of [`DocumentFormat::extract`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub body: Vec<u8>,
    pub metadata: Vec<u8>,
}

/// Capabilities the pipelines need from a document format.
pub trait DocumentFormat {
    /// Lowercase file extension without the dot, e.g. `"pdf"`.
    fn extension(&self) -> &'static str;

    /// Cheap structural check (signature bytes).
    fn is_valid_document(&self, bytes: &[u8]) -> bool;

    /// Split a document into independent body and metadata byte sequences.
    fn extract(&self, document: &[u8]) -> Result<Extracted>;

    /// Inverse of `extract`.
    fn reassemble(&self, body: &[u8], metadata: &[u8]) -> Result<Vec<u8>>;
}

/// Strict structured form of `metadata_bytes`.
///
/// Always parsed with `serde_json`; field order is deterministic because
/// `fields` is a `BTreeMap`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentMetadata {
    /// Decoded Info entries (`Title`, `Author`, ...), for display.
    pub fields: BTreeMap<String, String>,
    /// Exact bytes removed from the body, if any.
    pub info_span: Option<InfoSpan>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InfoSpan {
    pub offset: u64,
    /// Base64 of the original dictionary interior.
    pub raw: String,
}

impl DocumentMetadata {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Metadata(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Metadata(e.to_string()))
    }
}

pub const PDF_SIGNATURE: &[u8] = b"%PDF-";

#[derive(Debug, Clone, Copy, Default)]
pub struct PdfDocument;

impl DocumentFormat for PdfDocument {
    fn extension(&self) -> &'static str {
        "pdf"
    }

    fn is_valid_document(&self, bytes: &[u8]) -> bool {
        bytes.starts_with(PDF_SIGNATURE)
    }

    fn extract(&self, document: &[u8]) -> Result<Extracted> {
        if !self.is_valid_document(document) {
            return Err(Error::InvalidInputFormat(
                "missing %PDF- signature".into(),
            ));
        }

        let Some((start, end)) = locate_info_dict(document) else {
            tracing::debug!("no uncompressed /Info dictionary; metadata is empty");
            return Ok(Extracted {
                body: document.to_vec(),
                metadata: DocumentMetadata::default().to_bytes()?,
            });
        };

        let interior = &document[start..end];
        if interior.iter().all(|b| is_whitespace(*b)) {
            return Ok(Extracted {
                body: document.to_vec(),
                metadata: DocumentMetadata::default().to_bytes()?,
            });
        }

        let meta = DocumentMetadata {
            fields: parse_info_fields(interior),
            info_span: Some(InfoSpan {
                offset: start as u64,
                raw: STANDARD.encode(interior),
            }),
        };

        let mut body = document.to_vec();
        body[start..end].fill(b' ');

        Ok(Extracted {
            body,
            metadata: meta.to_bytes()?,
        })
    }

    fn reassemble(&self, body: &[u8], metadata: &[u8]) -> Result<Vec<u8>> {
        let meta = DocumentMetadata::from_bytes(metadata)?;
        let mut out = body.to_vec();

        if let Some(span) = meta.info_span {
            let raw = STANDARD
                .decode(&span.raw)
                .map_err(|e| Error::Metadata(format!("info span base64: {e}")))?;
            let start = usize::try_from(span.offset)
                .map_err(|_| Error::Metadata("info span offset overflows".into()))?;
            let end = start
                .checked_add(raw.len())
                .filter(|end| *end <= out.len())
                .ok_or_else(|| Error::Metadata("info span lies outside the body".into()))?;
            if !out[start..end].iter().all(|b| *b == b' ') {
                return Err(Error::Metadata(
                    "info span does not match a blanked region of the body".into(),
                ));
            }
            out[start..end].copy_from_slice(&raw);
        }

        Ok(out)
    }
}

fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b'\x0c' | b'\0')
}

fn is_delimiter(b: u8) -> bool {
    matches!(
        b,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

fn is_regular(b: u8) -> bool {
    !is_whitespace(b) && !is_delimiter(b)
}

fn skip_ws(buf: &[u8], mut i: usize) -> usize {
    while i < buf.len() {
        if is_whitespace(buf[i]) {
            i += 1;
        } else if buf[i] == b'%' {
            while i < buf.len() && buf[i] != b'\n' && buf[i] != b'\r' {
                i += 1;
            }
        } else {
            break;
        }
    }
    i
}

fn read_uint(buf: &[u8], i: usize) -> Option<(u64, usize)> {
    let end = buf[i..]
        .iter()
        .position(|b| !b.is_ascii_digit())
        .map_or(buf.len(), |p| i + p);
    if end == i {
        return None;
    }
    let n = std::str::from_utf8(&buf[i..end]).ok()?.parse().ok()?;
    Some((n, end))
}

/// Parse `N G R` at `i`.
fn read_reference(buf: &[u8], i: usize) -> Option<(u64, u64, usize)> {
    let (num, i) = read_uint(buf, skip_ws(buf, i))?;
    let (gen, i) = read_uint(buf, skip_ws(buf, i))?;
    let i = skip_ws(buf, i);
    if buf.get(i) == Some(&b'R') && buf.get(i + 1).map_or(true, |b| !is_regular(*b)) {
        Some((num, gen, i + 1))
    } else {
        None
    }
}

fn rfind_from(hay: &[u8], needle: &[u8], before: usize) -> Option<usize> {
    if needle.len() > before {
        return None;
    }
    (0..=before - needle.len())
        .rev()
        .find(|&p| &hay[p..p + needle.len()] == needle)
}

/// Byte range of the Info dictionary interior (between `<<` and `>>`).
///
/// Uses the last `/Info N G R` reference and the last `N G obj` definition,
/// which is what an incremental update would leave in force.
fn locate_info_dict(doc: &[u8]) -> Option<(usize, usize)> {
    let mut search_end = doc.len();
    let (num, gen) = loop {
        let p = rfind_from(doc, b"/Info", search_end)?;
        search_end = p;
        let after = p + b"/Info".len();
        if doc.get(after).map_or(false, |b| is_regular(*b)) {
            continue;
        }
        if let Some((num, gen, _)) = read_reference(doc, after) {
            break (num, gen);
        }
    };

    let header = format!("{num} {gen} obj");
    let mut search_end = doc.len();
    let obj_end = loop {
        let p = rfind_from(doc, header.as_bytes(), search_end)?;
        search_end = p;
        if p > 0 && is_regular(doc[p - 1]) {
            continue;
        }
        break p + header.len();
    };

    let i = skip_ws(doc, obj_end);
    if !doc[i..].starts_with(b"<<") {
        return None;
    }
    let start = i + 2;
    let end = find_dict_end(doc, start)?;
    Some((start, end))
}

/// Skip a literal string starting at the `(` at `i`; returns the index after `)`.
fn skip_literal(buf: &[u8], mut i: usize) -> Option<usize> {
    let mut depth = 0usize;
    while i < buf.len() {
        match buf[i] {
            b'\\' => i += 1,
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Index of the `>>` closing a dictionary whose interior starts at `i`.
fn find_dict_end(buf: &[u8], mut i: usize) -> Option<usize> {
    let mut depth = 1usize;
    while i < buf.len() {
        match buf[i] {
            b'(' => {
                i = skip_literal(buf, i)?;
                continue;
            }
            b'%' => {
                i = skip_ws(buf, i);
                continue;
            }
            b'<' if buf.get(i + 1) == Some(&b'<') => {
                depth += 1;
                i += 2;
                continue;
            }
            b'<' => {
                i += buf[i..].iter().position(|b| *b == b'>')? + 1;
                continue;
            }
            b'>' if buf.get(i + 1) == Some(&b'>') => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
                i += 2;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Index after the `]` closing an array whose `[` is at `i`.
fn skip_array(buf: &[u8], mut i: usize) -> Option<usize> {
    let mut depth = 0usize;
    while i < buf.len() {
        match buf[i] {
            b'(' => {
                i = skip_literal(buf, i)?;
                continue;
            }
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn decode_literal(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let b = raw[i];
        if b != b'\\' {
            out.push(b);
            i += 1;
            continue;
        }
        i += 1;
        let Some(&esc) = raw.get(i) else { break };
        match esc {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'\r' => {
                if raw.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
            }
            b'\n' => {}
            b'0'..=b'7' => {
                let mut v: u32 = 0;
                let mut n = 0;
                while n < 3 && i < raw.len() && (b'0'..=b'7').contains(&raw[i]) {
                    v = v * 8 + u32::from(raw[i] - b'0');
                    i += 1;
                    n += 1;
                }
                out.push((v & 0xff) as u8);
                continue;
            }
            other => out.push(other),
        }
        i += 1;
    }
    out
}

fn decode_hex(raw: &[u8]) -> Vec<u8> {
    let digits: Vec<u8> = raw
        .iter()
        .filter_map(|b| (*b as char).to_digit(16).map(|d| d as u8))
        .collect();
    digits
        .chunks(2)
        .map(|pair| (pair[0] << 4) | pair.get(1).copied().unwrap_or(0))
        .collect()
}

/// PDF text string: UTF-16BE with BOM, otherwise treated as Latin-1.
fn text_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xfe, 0xff]) {
        let units: Vec<u16> = rest
            .chunks(2)
            .map(|c| u16::from_be_bytes([c[0], c.get(1).copied().unwrap_or(0)]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_string();
    }
    bytes.iter().map(|b| *b as char).collect()
}

/// Decode `/Key value` pairs of an Info dictionary interior. Lenient: this
/// only feeds display, never reassembly.
fn parse_info_fields(dict: &[u8]) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    let mut i = skip_ws(dict, 0);

    while i < dict.len() {
        if dict[i] != b'/' {
            i += 1;
            i = skip_ws(dict, i);
            continue;
        }
        let key_start = i + 1;
        let key_end = dict[key_start..]
            .iter()
            .position(|b| !is_regular(*b))
            .map_or(dict.len(), |p| key_start + p);
        let key = String::from_utf8_lossy(&dict[key_start..key_end]).into_owned();

        let v = skip_ws(dict, key_end);
        let Some((value, next)) = parse_value(dict, v) else {
            break;
        };
        if !key.is_empty() {
            fields.insert(key, value);
        }
        i = skip_ws(dict, next);
    }
    fields
}

fn parse_value(buf: &[u8], i: usize) -> Option<(String, usize)> {
    match *buf.get(i)? {
        b'(' => {
            let end = skip_literal(buf, i)?;
            Some((text_string(&decode_literal(&buf[i + 1..end - 1])), end))
        }
        b'<' if buf.get(i + 1) == Some(&b'<') => {
            let end = find_dict_end(buf, i + 2)? + 2;
            Some((String::from_utf8_lossy(&buf[i..end]).into_owned(), end))
        }
        b'<' => {
            let close = i + buf[i..].iter().position(|b| *b == b'>')?;
            Some((text_string(&decode_hex(&buf[i + 1..close])), close + 1))
        }
        b'[' => {
            let end = skip_array(buf, i)?;
            Some((String::from_utf8_lossy(&buf[i..end]).into_owned(), end))
        }
        b'/' => {
            let end = buf[i + 1..]
                .iter()
                .position(|b| !is_regular(*b))
                .map_or(buf.len(), |p| i + 1 + p);
            Some((String::from_utf8_lossy(&buf[i + 1..end]).into_owned(), end))
        }
        _ => {
            if let Some((num, gen, end)) = read_reference(buf, i) {
                return Some((format!("{num} {gen} R"), end));
            }
            let end = buf[i..]
                .iter()
                .position(|b| !is_regular(*b))
                .map_or(buf.len(), |p| i + p);
            if end == i {
                return None;
            }
            Some((String::from_utf8_lossy(&buf[i..end]).into_owned(), end))
        }
    }
}
