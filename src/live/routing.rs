//! Per-call routing keys and the composite metadata that carries them.
//!
//! Every call is tagged with `"<operation>/<session id>"`. The tag travels as a
//! routing entry inside composite metadata; the handshake credential travels
//! the same way as a bearer authentication entry.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

const WELL_KNOWN_FLAG: u8 = 0x80;
const BEARER_AUTH_TYPE: u8 = 0x01;
const MAX_TAG_LEN: usize = u8::MAX as usize;
const MAX_ENTRY_LEN: usize = 0x00FF_FFFF;

/// Remote operations exposed by the live-session service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    CommentsCounter,
    Comments,
    Views,
    SendComment,
    LikeForUser,
    SendLike,
    LikesCounter,
}

impl Operation {
    pub const ALL: [Operation; 7] = [
        Operation::CommentsCounter,
        Operation::Comments,
        Operation::Views,
        Operation::SendComment,
        Operation::LikeForUser,
        Operation::SendLike,
        Operation::LikesCounter,
    ];

    /// Route prefix understood by the remote service.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::CommentsCounter => "commentsCounter",
            Operation::Comments => "comments",
            Operation::Views => "views",
            Operation::SendComment => "sendComment",
            Operation::LikeForUser => "likeForUser",
            Operation::SendLike => "sendLike",
            Operation::LikesCounter => "likesCounter",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `"<operation>/<session id>"`, built fresh for every call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutingKey {
    operation: Operation,
    route: String,
}

impl RoutingKey {
    pub fn new(operation: Operation, session_id: &str) -> Self {
        Self {
            operation,
            route: format!("{}/{session_id}", operation.as_str()),
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn as_str(&self) -> &str {
        &self.route
    }

    /// Encodes the key as composite metadata with a single routing entry.
    pub fn to_metadata(&self) -> Result<Bytes, RoutingError> {
        let mut metadata = CompositeMetadata::new();
        metadata.push_routing(&[self.as_str()])?;
        Ok(metadata.freeze())
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.route)
    }
}

/// Well-known mime types used by the live-session protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MimeType {
    ApplicationJson,
    Authentication,
    Routing,
    CompositeMetadata,
}

impl MimeType {
    pub fn id(self) -> u8 {
        match self {
            MimeType::ApplicationJson => 0x05,
            MimeType::Authentication => 0x7C,
            MimeType::Routing => 0x7E,
            MimeType::CompositeMetadata => 0x7F,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MimeType::ApplicationJson => "application/json",
            MimeType::Authentication => "message/x.rsocket.authentication.v0",
            MimeType::Routing => "message/x.rsocket.routing.v0",
            MimeType::CompositeMetadata => "message/x.rsocket.composite-metadata.v0",
        }
    }

    fn from_id(id: u8) -> Option<Self> {
        [
            MimeType::ApplicationJson,
            MimeType::Authentication,
            MimeType::Routing,
            MimeType::CompositeMetadata,
        ]
        .into_iter()
        .find(|mime| mime.id() == id)
    }
}

/// Errors raised while encoding or decoding metadata.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("routing tag is {len} bytes, limit is 255")]
    TagTooLong { len: usize },

    #[error("metadata entry is {len} bytes, limit is 16777215")]
    EntryTooLarge { len: usize },

    #[error("malformed composite metadata: {0}")]
    Malformed(&'static str),
}

/// Builder for composite metadata made of well-known entries.
#[derive(Debug, Default)]
pub struct CompositeMetadata {
    buf: BytesMut,
}

impl CompositeMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a raw entry.
    pub fn push(&mut self, mime: MimeType, content: &[u8]) -> Result<&mut Self, RoutingError> {
        if content.len() > MAX_ENTRY_LEN {
            return Err(RoutingError::EntryTooLarge { len: content.len() });
        }
        self.buf.put_u8(WELL_KNOWN_FLAG | mime.id());
        self.buf.put_uint(content.len() as u64, 3);
        self.buf.put_slice(content);
        Ok(self)
    }

    /// Appends a routing entry holding `tags`.
    pub fn push_routing(&mut self, tags: &[&str]) -> Result<&mut Self, RoutingError> {
        let mut content = BytesMut::new();
        for tag in tags {
            if tag.len() > MAX_TAG_LEN {
                return Err(RoutingError::TagTooLong { len: tag.len() });
            }
            content.put_u8(tag.len() as u8);
            content.put_slice(tag.as_bytes());
        }
        self.push(MimeType::Routing, &content)
    }

    /// Appends a bearer authentication entry.
    pub fn push_bearer(&mut self, token: &SecretString) -> Result<&mut Self, RoutingError> {
        let token = token.expose_secret().as_bytes();
        let mut content = BytesMut::with_capacity(token.len() + 1);
        content.put_u8(WELL_KNOWN_FLAG | BEARER_AUTH_TYPE);
        content.put_slice(token);
        self.push(MimeType::Authentication, &content)
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Splits composite metadata into `(mime, content)` entries.
///
/// Entries with a mime id this crate does not know are skipped.
pub fn decode_entries(metadata: &[u8]) -> Result<Vec<(MimeType, Bytes)>, RoutingError> {
    let mut buf = metadata;
    let mut entries = Vec::new();
    while buf.has_remaining() {
        let header = buf.get_u8();
        if header & WELL_KNOWN_FLAG == 0 {
            return Err(RoutingError::Malformed("custom mime types are not supported"));
        }
        if buf.remaining() < 3 {
            return Err(RoutingError::Malformed("truncated entry length"));
        }
        let len = buf.get_uint(3) as usize;
        if buf.remaining() < len {
            return Err(RoutingError::Malformed("truncated entry content"));
        }
        let content = Bytes::copy_from_slice(&buf[..len]);
        buf.advance(len);
        if let Some(mime) = MimeType::from_id(header & !WELL_KNOWN_FLAG) {
            entries.push((mime, content));
        }
    }
    Ok(entries)
}

/// Extracts every routing tag from composite metadata.
pub fn decode_routing(metadata: &[u8]) -> Result<Vec<String>, RoutingError> {
    let mut tags = Vec::new();
    for (mime, content) in decode_entries(metadata)? {
        if mime != MimeType::Routing {
            continue;
        }
        let mut buf = &content[..];
        while buf.has_remaining() {
            let len = buf.get_u8() as usize;
            if buf.remaining() < len {
                return Err(RoutingError::Malformed("truncated routing tag"));
            }
            let tag = std::str::from_utf8(&buf[..len])
                .map_err(|_| RoutingError::Malformed("routing tag is not utf-8"))?;
            tags.push(tag.to_string());
            buf.advance(len);
        }
    }
    Ok(tags)
}

/// Extracts the bearer token from composite metadata, if present.
pub fn decode_bearer(metadata: &[u8]) -> Result<Option<SecretString>, RoutingError> {
    for (mime, content) in decode_entries(metadata)? {
        if mime != MimeType::Authentication {
            continue;
        }
        let Some((&auth_type, token)) = content.split_first() else {
            return Err(RoutingError::Malformed("empty authentication entry"));
        };
        if auth_type != WELL_KNOWN_FLAG | BEARER_AUTH_TYPE {
            continue;
        }
        let token = std::str::from_utf8(token)
            .map_err(|_| RoutingError::Malformed("bearer token is not utf-8"))?;
        return Ok(Some(SecretString::new(token.to_string())));
    }
    Ok(None)
}
