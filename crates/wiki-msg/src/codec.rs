//! ---
//! wiki_section: "02-messaging-bus"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Address-routed bus, envelopes and codecs."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
//! Codec registry for payloads that are not plain JSON.
//!
//! A codec is registered once under a process-wide unique name. Sending a
//! value whose type has no registered codec fails before anything is put on
//! the bus.
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::Body;

/// Size of the big-endian length header written by [`JsonFrameCodec`].
pub const FRAME_HEADER_LEN: usize = 4;

/// Errors raised while encoding or decoding custom payloads.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// No codec is registered for the type or name.
    #[error("codec not found: {0}")]
    NotFound(String),
    /// A codec with this name (or for this type) already exists.
    #[error("codec '{0}' is already registered")]
    Duplicate(String),
    /// The codec exists but handles a different type.
    #[error("codec '{codec}' does not handle {requested}")]
    Mismatch {
        /// Codec that was consulted.
        codec: String,
        /// Type the caller asked for.
        requested: &'static str,
    },
    /// The body is not of the kind the caller tried to read.
    #[error("expected a {expected} body, found {found}")]
    UnexpectedBody {
        /// Kind the caller asked for.
        expected: &'static str,
        /// Kind that was present.
        found: &'static str,
    },
    /// The frame is shorter than its header claims.
    #[error("frame truncated: needed {needed} bytes, got {available}")]
    Truncated {
        /// Bytes required.
        needed: usize,
        /// Bytes present.
        available: usize,
    },
    /// The frame carries bytes past the declared length.
    #[error("frame has {0} trailing bytes")]
    TrailingBytes(usize),
    /// The payload does not fit the 32-bit length header.
    #[error("payload of {0} bytes exceeds the frame limit")]
    FrameTooLarge(usize),
    /// JSON serialisation failure.
    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode/decode pair for one payload type.
pub trait MessageCodec: Send + Sync + 'static {
    /// Type carried by the codec.
    type Value: Send + 'static;

    /// Process-wide unique codec name.
    fn name(&self) -> &str;

    /// Encode a value into a self-contained frame.
    fn encode(&self, value: &Self::Value) -> Result<Bytes, CodecError>;

    /// Decode a frame produced by [`MessageCodec::encode`].
    fn decode(&self, frame: &[u8]) -> Result<Self::Value, CodecError>;
}

/// Length-prefixed JSON codec: a 4-byte big-endian length followed by that
/// many bytes of UTF-8 JSON.
pub struct JsonFrameCodec<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFrameCodec<T> {
    /// Create a codec registered under `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for JsonFrameCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonFrameCodec")
            .field("name", &self.name)
            .field("value", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> MessageCodec for JsonFrameCodec<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Value = T;

    fn name(&self) -> &str {
        &self.name
    }

    fn encode(&self, value: &T) -> Result<Bytes, CodecError> {
        let json = serde_json::to_vec(value)?;
        let len = u32::try_from(json.len()).map_err(|_| CodecError::FrameTooLarge(json.len()))?;
        let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + json.len());
        frame.put_u32(len);
        frame.put_slice(&json);
        Ok(frame.freeze())
    }

    fn decode(&self, frame: &[u8]) -> Result<T, CodecError> {
        if frame.len() < FRAME_HEADER_LEN {
            return Err(CodecError::Truncated {
                needed: FRAME_HEADER_LEN,
                available: frame.len(),
            });
        }
        // The length is read from the start of the frame, where encode put it;
        // the payload begins right after it.
        let mut cursor = frame;
        let len = cursor.get_u32() as usize;
        if cursor.len() < len {
            return Err(CodecError::Truncated {
                needed: FRAME_HEADER_LEN + len,
                available: frame.len(),
            });
        }
        if cursor.len() > len {
            return Err(CodecError::TrailingBytes(cursor.len() - len));
        }
        Ok(serde_json::from_slice(&cursor[..len])?)
    }
}

trait ErasedCodec: Send + Sync {
    fn name(&self) -> &str;
    fn encode_any(&self, value: &dyn Any) -> Result<Bytes, CodecError>;
    fn decode_any(&self, frame: &[u8]) -> Result<Box<dyn Any + Send>, CodecError>;
}

struct Erased<C>(C);

impl<C: MessageCodec> ErasedCodec for Erased<C> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn encode_any(&self, value: &dyn Any) -> Result<Bytes, CodecError> {
        let value = value
            .downcast_ref::<C::Value>()
            .ok_or_else(|| CodecError::Mismatch {
                codec: self.0.name().to_owned(),
                requested: std::any::type_name::<C::Value>(),
            })?;
        self.0.encode(value)
    }

    fn decode_any(&self, frame: &[u8]) -> Result<Box<dyn Any + Send>, CodecError> {
        Ok(Box::new(self.0.decode(frame)?))
    }
}

#[derive(Default)]
struct Inner {
    by_name: HashMap<String, Arc<dyn ErasedCodec>>,
    by_type: HashMap<TypeId, String>,
}

/// Process-wide table of codecs, shared by every clone of the bus.
#[derive(Clone, Default)]
pub struct CodecRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("CodecRegistry")
            .field("codecs", &inner.by_name.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CodecRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a codec. Names and value types must both be unique.
    pub fn register<C: MessageCodec>(&self, codec: C) -> Result<(), CodecError> {
        let name = codec.name().to_owned();
        let type_id = TypeId::of::<C::Value>();
        let mut inner = self.inner.write();
        if inner.by_name.contains_key(&name) {
            return Err(CodecError::Duplicate(name));
        }
        if let Some(existing) = inner.by_type.get(&type_id) {
            return Err(CodecError::Duplicate(existing.clone()));
        }
        inner.by_type.insert(type_id, name.clone());
        inner.by_name.insert(name.clone(), Arc::new(Erased(codec)));
        tracing::debug!(codec = %name, value = std::any::type_name::<C::Value>(), "codec registered");
        Ok(())
    }

    /// Remove a codec by name, returning whether it existed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut inner = self.inner.write();
        let removed = inner.by_name.remove(name).is_some();
        inner.by_type.retain(|_, codec| codec != name);
        removed
    }

    /// Whether a codec with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().by_name.contains_key(name)
    }

    /// Name of the codec registered for `T`, if any.
    pub fn codec_name_for<T: 'static>(&self) -> Option<String> {
        self.inner.read().by_type.get(&TypeId::of::<T>()).cloned()
    }

    /// Encode `value` with the codec registered for its type.
    pub fn encode<T: 'static>(&self, value: &T) -> Result<Body, CodecError> {
        let codec = {
            let inner = self.inner.read();
            inner
                .by_type
                .get(&TypeId::of::<T>())
                .and_then(|name| inner.by_name.get(name))
                .cloned()
        }
        .ok_or_else(|| CodecError::NotFound(std::any::type_name::<T>().to_owned()))?;
        let bytes = codec.encode_any(value)?;
        Ok(Body::Encoded {
            codec: codec.name().to_owned(),
            bytes,
        })
    }

    /// Decode `frame` with the codec called `name`, expecting a `T`.
    pub fn decode<T: 'static>(&self, name: &str, frame: &[u8]) -> Result<T, CodecError> {
        let codec = self
            .inner
            .read()
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| CodecError::NotFound(name.to_owned()))?;
        codec
            .decode_any(frame)?
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| CodecError::Mismatch {
                codec: name.to_owned(),
                requested: std::any::type_name::<T>(),
            })
    }
}
