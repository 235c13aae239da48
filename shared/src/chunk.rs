//! Chunk trait and the tag registry
//!
//! A chunk is one self-describing fragment of a frame. Every concrete chunk
//! type names a short ASCII tag and knows how to turn itself into payload
//! bytes and back. The payload is the `bincode` encoding of the struct, so a
//! chunk type only has to derive `Serialize`/`Deserialize`; fields that only
//! make sense inside the process that created the value are marked
//! `#[serde(skip)]` and come back as their default after a decode.
//!
//! The [`ChunkRegistry`] maps tags to decoders. It is filled by explicit
//! `register` calls, so code outside this crate can add its own chunk types
//! without the frame codec knowing about them up front.

use crate::error::ProtocolError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;

/// Longest tag accepted on the wire, excluding the NUL terminator.
pub const MAX_TAG_LEN: usize = 32;

/// Prefix shared by every chunk that belongs on the update channel.
pub const UPDATE_TAG_PREFIX: &str = "nU";

pub fn is_update_tag(tag: &str) -> bool {
    tag.starts_with(UPDATE_TAG_PREFIX)
}

/// A typed, tagged frame fragment.
pub trait Chunk: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    /// Wire tag. Must be unique per registry.
    const TAG: &'static str;

    /// Whether the chunk carries meaningful content.
    fn is_valid(&self) -> bool {
        true
    }

    /// Whether the frame writer should emit this chunk at all.
    fn is_sendable(&self) -> bool {
        true
    }

    fn read(bytes: &[u8]) -> Result<Self, ProtocolError> {
        bincode::deserialize(bytes).map_err(|source| ProtocolError::Decode {
            tag: Self::TAG,
            source,
        })
    }

    fn write(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(self).map_err(|source| ProtocolError::Encode {
            tag: Self::TAG,
            source,
        })
    }
}

/// Object-safe view of a [`Chunk`] so frames can hold mixed chunk types.
pub trait AnyChunk: Debug + Send + Sync {
    fn tag(&self) -> &'static str;
    fn content_valid(&self) -> bool;
    fn sendable(&self) -> bool;
    fn write_payload(&self) -> Result<Vec<u8>, ProtocolError>;
    fn clone_box(&self) -> Box<dyn AnyChunk>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Chunk> AnyChunk for T {
    fn tag(&self) -> &'static str {
        T::TAG
    }

    fn content_valid(&self) -> bool {
        Chunk::is_valid(self)
    }

    fn sendable(&self) -> bool {
        Chunk::is_sendable(self)
    }

    fn write_payload(&self) -> Result<Vec<u8>, ProtocolError> {
        Chunk::write(self)
    }

    fn clone_box(&self) -> Box<dyn AnyChunk> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Clone for Box<dyn AnyChunk> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

type DecodeFn = fn(&[u8]) -> Result<Box<dyn AnyChunk>, ProtocolError>;
type EncodeFn = fn(&dyn AnyChunk) -> Option<Result<Vec<u8>, ProtocolError>>;

/// Decoder/encoder pair stored per tag.
#[derive(Clone, Copy)]
struct ChunkCodec {
    type_name: &'static str,
    decode: DecodeFn,
    encode: EncodeFn,
}

fn decode_erased<T: Chunk>(bytes: &[u8]) -> Result<Box<dyn AnyChunk>, ProtocolError> {
    Ok(Box::new(T::read(bytes)?))
}

fn encode_erased<T: Chunk>(chunk: &dyn AnyChunk) -> Option<Result<Vec<u8>, ProtocolError>> {
    chunk.as_any().downcast_ref::<T>().map(|c| Chunk::write(c))
}

/// Tag → codec table.
#[derive(Clone, Default)]
pub struct ChunkRegistry {
    codecs: HashMap<&'static str, ChunkCodec>,
}

impl ChunkRegistry {
    /// An empty registry. Every tag is unknown and passes through frames verbatim.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every chunk type defined in [`crate::chunks`].
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        crate::chunks::register_builtin(&mut registry);
        registry
    }

    /// Registers `T` under `T::TAG`. Registering the same type twice is a no-op;
    /// registering a different type under a taken tag fails.
    pub fn register<T: Chunk>(&mut self) -> Result<(), ProtocolError> {
        validate_tag(T::TAG)?;
        let type_name = std::any::type_name::<T>();
        if let Some(existing) = self.codecs.get(T::TAG) {
            if existing.type_name == type_name {
                return Ok(());
            }
            return Err(ProtocolError::DuplicateTag(T::TAG));
        }
        self.codecs.insert(
            T::TAG,
            ChunkCodec {
                type_name,
                decode: decode_erased::<T>,
                encode: encode_erased::<T>,
            },
        );
        Ok(())
    }

    pub fn is_registered(&self, tag: &str) -> bool {
        self.codecs.contains_key(tag)
    }

    /// Decodes a payload for `tag`. Returns `None` when the tag is unknown.
    pub fn decode(
        &self,
        tag: &str,
        payload: &[u8],
    ) -> Option<Result<Box<dyn AnyChunk>, ProtocolError>> {
        self.codecs.get(tag).map(|codec| (codec.decode)(payload))
    }

    /// Encodes through the registered codec, falling back to the chunk's own
    /// encoder when the tag is not registered here.
    pub fn encode(&self, chunk: &dyn AnyChunk) -> Result<Vec<u8>, ProtocolError> {
        match self.codecs.get(chunk.tag()).and_then(|codec| (codec.encode)(chunk)) {
            Some(result) => result,
            None => chunk.write_payload(),
        }
    }

    pub fn tags(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.codecs.keys().copied()
    }
}

impl Debug for ChunkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<_> = self.codecs.keys().collect();
        tags.sort();
        f.debug_struct("ChunkRegistry").field("tags", &tags).finish()
    }
}

/// Tags are 1..=MAX_TAG_LEN printable ASCII bytes; the terminator `"\r\n"` is
/// the only allowed tag containing control characters and is never registered.
pub fn validate_tag(tag: &str) -> Result<(), ProtocolError> {
    let ok = !tag.is_empty()
        && tag.len() <= MAX_TAG_LEN
        && tag.bytes().all(|b| b.is_ascii_graphic());
    if ok {
        Ok(())
    } else {
        Err(ProtocolError::InvalidTag(tag.to_string()))
    }
}
