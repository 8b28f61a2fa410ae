// RouterOS API wire framing
//
// A sentence is a sequence of length-prefixed words terminated by a
// zero-length word. Lengths use a 1 to 5 byte variable encoding whose
// leading bits select the width. `SentenceCodec` plugs the framing into
// `tokio_util::codec::Framed`; `Response` classifies decoded sentences.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::Error;

/// Upper bound on a single word. The router never sends anything close;
/// a larger prefix means the stream is out of sync.
const MAX_WORD_LEN: usize = 16 * 1024 * 1024;

// ── Sentence ─────────────────────────────────────────────────────────

/// One framed unit on the wire: an ordered list of words.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sentence {
    words: Vec<String>,
}

impl Sentence {
    pub fn new(words: Vec<String>) -> Self {
        Self { words }
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn into_words(self) -> Vec<String> {
        self.words
    }

    /// The first word, which names the command or reply type.
    pub fn head(&self) -> Option<&str> {
        self.words.first().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for Sentence {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            words: iter.into_iter().map(Into::into).collect(),
        }
    }
}

// ── Length prefix ────────────────────────────────────────────────────

#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn encode_length(len: usize, dst: &mut BytesMut) -> Result<(), Error> {
    if len < 0x80 {
        dst.put_u8(len as u8);
    } else if len < 0x4000 {
        dst.put_u16(len as u16 | 0x8000);
    } else if len < 0x20_0000 {
        let v = len as u32 | 0x00C0_0000;
        dst.put_u8((v >> 16) as u8);
        dst.put_u16(v as u16);
    } else if len < 0x1000_0000 {
        dst.put_u32(len as u32 | 0xE000_0000);
    } else if let Ok(v) = u32::try_from(len) {
        dst.put_u8(0xF0);
        dst.put_u32(v);
    } else {
        return Err(Error::Protocol(format!("word of {len} bytes cannot be framed")));
    }
    Ok(())
}

/// Decode a length prefix at the start of `src`.
///
/// Returns `(word_len, prefix_len)`, or `None` when more bytes are needed.
fn decode_length(src: &[u8]) -> Result<Option<(usize, usize)>, Error> {
    let Some(&first) = src.first() else {
        return Ok(None);
    };
    let width = match first {
        b if b & 0x80 == 0x00 => 1,
        b if b & 0xC0 == 0x80 => 2,
        b if b & 0xE0 == 0xC0 => 3,
        b if b & 0xF0 == 0xE0 => 4,
        0xF0 => 5,
        b => {
            return Err(Error::Protocol(format!(
                "reserved control byte 0x{b:02X} in length prefix"
            )));
        }
    };
    let Some(prefix) = src.get(..width) else {
        return Ok(None);
    };
    let len = match width {
        1 => u32::from(first),
        5 => prefix[1..]
            .iter()
            .fold(0u32, |acc, b| (acc << 8) | u32::from(*b)),
        _ => {
            let mask: u8 = 0xFF >> width;
            prefix[1..]
                .iter()
                .fold(u32::from(first & mask), |acc, b| (acc << 8) | u32::from(*b))
        }
    };
    let len = usize::try_from(len).map_err(|_| Error::Protocol("length overflow".into()))?;
    if len > MAX_WORD_LEN {
        return Err(Error::Protocol(format!("word length {len} exceeds limit")));
    }
    Ok(Some((len, width)))
}

// ── Codec ────────────────────────────────────────────────────────────

/// `tokio_util` codec for RouterOS API sentences.
#[derive(Debug, Clone, Copy, Default)]
pub struct SentenceCodec;

impl Decoder for SentenceCodec {
    type Item = Sentence;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Sentence>, Error> {
        // Scan without consuming until the terminating empty word arrives.
        let mut spans = Vec::new();
        let mut pos = 0;
        loop {
            let Some((len, width)) = decode_length(&src[pos..])? else {
                return Ok(None);
            };
            let start = pos + width;
            if len == 0 {
                let words = spans
                    .into_iter()
                    .map(|(s, e)| String::from_utf8_lossy(&src[s..e]).into_owned())
                    .collect();
                src.advance(start);
                return Ok(Some(Sentence { words }));
            }
            let end = start + len;
            if end > src.len() {
                src.reserve(end - src.len());
                return Ok(None);
            }
            spans.push((start, end));
            pos = end;
        }
    }
}

impl Encoder<Sentence> for SentenceCodec {
    type Error = Error;

    fn encode(&mut self, item: Sentence, dst: &mut BytesMut) -> Result<(), Error> {
        for word in &item.words {
            encode_length(word.len(), dst)?;
            dst.extend_from_slice(word.as_bytes());
        }
        dst.put_u8(0);
        Ok(())
    }
}

// ── Replies ──────────────────────────────────────────────────────────

/// Reply sentence type, from the leading `!` word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ReplyKind {
    #[strum(serialize = "!re")]
    Re,
    #[strum(serialize = "!done")]
    Done,
    #[strum(serialize = "!trap")]
    Trap,
    #[strum(serialize = "!fatal")]
    Fatal,
    #[strum(serialize = "!empty")]
    Empty,
}

/// A decoded reply sentence: its kind plus `=key=value` attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub kind: ReplyKind,
    pub attributes: BTreeMap<String, String>,
    /// Free-text words (the `!fatal` reason has no `=` prefix).
    pub text: Vec<String>,
}

impl Response {
    pub fn parse(sentence: Sentence) -> Result<Self, Error> {
        let mut words = sentence.into_words().into_iter();
        let kind = match words.next().as_deref() {
            Some("!re") => ReplyKind::Re,
            Some("!done") => ReplyKind::Done,
            Some("!trap") => ReplyKind::Trap,
            Some("!fatal") => ReplyKind::Fatal,
            Some("!empty") => ReplyKind::Empty,
            Some(other) => return Err(Error::Protocol(format!("unexpected reply word '{other}'"))),
            None => return Err(Error::Protocol("empty reply sentence".into())),
        };

        let mut attributes = BTreeMap::new();
        let mut text = Vec::new();
        for word in words {
            if let Some((key, value)) = split_attribute(&word) {
                attributes.insert(key.to_owned(), value.to_owned());
            } else if !word.starts_with(".tag=") {
                // Tags are ignored; commands on a session are serialized.
                text.push(word);
            }
        }
        Ok(Self {
            kind,
            attributes,
            text,
        })
    }
}

/// Split `=key=value` into its parts. The value may itself contain `=`.
pub(crate) fn split_attribute(word: &str) -> Option<(&str, &str)> {
    word.strip_prefix('=')?.split_once('=')
}
