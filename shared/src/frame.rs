//! Frame codec
//!
//! A frame is the unit of transmission: an identity head, at most one chunk
//! of each type, and any chunks the local registry did not recognise kept as
//! raw bytes so they can be forwarded untouched.
//!
//! Wire layout, repeated per chunk:
//!
//! ```text
//! tag bytes, 0x00 | u32 little-endian payload length | payload
//! ```
//!
//! terminated by the tag `"\r\n"` (also NUL-terminated) with no length or
//! payload after it.

use crate::chunk::{is_update_tag, AnyChunk, Chunk, ChunkRegistry, MAX_TAG_LEN};
use crate::chunks::ChunkHHead;
use crate::error::ProtocolError;
use std::io::Cursor;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Tag that ends a frame.
pub const TERMINATOR_TAG: &str = "\r\n";

/// Upper bound on a single chunk payload (16 MiB).
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// One position in the frame's wire order.
#[derive(Debug, Clone)]
enum Slot {
    /// Where the head goes. The value itself lives in `Frame::head`.
    Head,
    Known(Box<dyn AnyChunk>),
    /// A whole `{tag, length, payload}` record the decoder did not know.
    Unknown(Vec<u8>),
}

#[derive(Debug, Clone, Default)]
pub struct Frame {
    head: Option<ChunkHHead>,
    slots: Vec<Slot>,
    /// Rebroadcast on the management channel. Local to this process.
    pub propagate_m: bool,
    /// Rebroadcast on the update channel. Local to this process.
    pub propagate_u: bool,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    /// A frame carrying one chunk.
    pub fn with<T: Chunk>(chunk: T) -> Self {
        let mut frame = Self::new();
        frame.set(chunk);
        frame
    }

    pub fn with_head(player_id: u32) -> Self {
        Self {
            head: Some(ChunkHHead { player_id }),
            slots: vec![Slot::Head],
            ..Self::default()
        }
    }

    pub fn head(&self) -> Option<u32> {
        self.head.map(|head| head.player_id)
    }

    /// Sets the head if unset. An already assigned head can only be
    /// "reassigned" to the same player.
    pub fn assign_head(&mut self, player_id: u32) -> Result<(), ProtocolError> {
        match self.head {
            None => {
                self.head = Some(ChunkHHead { player_id });
                self.slots.insert(0, Slot::Head);
                Ok(())
            }
            Some(head) if head.player_id == player_id => Ok(()),
            Some(head) => Err(ProtocolError::HeadMismatch {
                assigned: head.player_id,
                requested: player_id,
            }),
        }
    }

    fn known(&self) -> impl Iterator<Item = &dyn AnyChunk> + '_ {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Known(chunk) => Some(&**chunk),
            _ => None,
        })
    }

    /// Typed lookup.
    pub fn get<T: Chunk>(&self) -> Option<&T> {
        self.known()
            .find_map(|chunk| chunk.as_any().downcast_ref::<T>())
    }

    pub fn get_mut<T: Chunk>(&mut self) -> Option<&mut T> {
        self.slots.iter_mut().find_map(|slot| match slot {
            Slot::Known(chunk) => chunk.as_any_mut().downcast_mut::<T>(),
            _ => None,
        })
    }

    pub fn has<T: Chunk>(&self) -> bool {
        self.get::<T>().is_some()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.known().any(|chunk| chunk.tag() == tag)
    }

    /// Stores `chunk`, replacing an existing chunk of the same type in place.
    pub fn set<T: Chunk>(&mut self, chunk: T) {
        if let Some(slot) = self.get_mut::<T>() {
            *slot = chunk;
        } else {
            self.slots.push(Slot::Known(Box::new(chunk)));
        }
    }

    pub fn remove<T: Chunk>(&mut self) -> Option<T> {
        let index = self.slots.iter().position(|slot| match slot {
            Slot::Known(chunk) => chunk.as_any().is::<T>(),
            _ => false,
        })?;
        match self.slots.remove(index) {
            Slot::Known(chunk) => chunk.as_any().downcast_ref::<T>().cloned(),
            _ => None,
        }
    }

    /// Number of recognised chunks, not counting the head.
    pub fn len(&self) -> usize {
        self.known().count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn tags(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.known().map(|chunk| chunk.tag())
    }

    /// Unrecognised chunk records, concatenated in wire order.
    pub fn extra(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for slot in &self.slots {
            if let Slot::Unknown(record) = slot {
                out.extend_from_slice(record);
            }
        }
        out
    }

    pub fn has_extra(&self) -> bool {
        self.slots
            .iter()
            .any(|slot| matches!(slot, Slot::Unknown(_)))
    }

    /// The head and the unrecognised records only, for forwarding chunks
    /// this process cannot interpret.
    pub fn passthrough(&self) -> Frame {
        self.filtered(|_| false)
    }

    /// The head, the update-channel chunks and the unrecognised records.
    /// Anything else has no business on the update channel.
    pub fn update_part(&self) -> Frame {
        self.filtered(is_update_tag)
    }

    fn filtered(&self, keep: impl Fn(&str) -> bool) -> Frame {
        Frame {
            head: self.head,
            slots: self
                .slots
                .iter()
                .filter(|slot| match slot {
                    Slot::Known(chunk) => keep(chunk.tag()),
                    Slot::Head | Slot::Unknown(_) => true,
                })
                .cloned()
                .collect(),
            propagate_m: self.propagate_m,
            propagate_u: self.propagate_u,
        }
    }

    /// Encodes the frame. Chunks that are not sendable are skipped.
    pub fn write(&self, registry: &ChunkRegistry) -> Result<Vec<u8>, ProtocolError> {
        let mut out = Vec::with_capacity(64);

        for slot in &self.slots {
            match slot {
                Slot::Head => {
                    if let Some(head) = &self.head {
                        write_record(&mut out, ChunkHHead::TAG, |buf| {
                            buf.extend_from_slice(&head.write()?);
                            Ok(())
                        })?;
                    }
                }
                Slot::Known(chunk) if chunk.sendable() => {
                    write_record(&mut out, chunk.tag(), |buf| {
                        buf.extend_from_slice(&registry.encode(&**chunk)?);
                        Ok(())
                    })?;
                }
                Slot::Known(_) => {}
                Slot::Unknown(record) => out.extend_from_slice(record),
            }
        }

        write_tag(&mut out, TERMINATOR_TAG);
        Ok(out)
    }

    /// Decodes one frame from `bytes`. Trailing bytes after the terminator
    /// are ignored.
    pub fn read(registry: &ChunkRegistry, bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut cursor = Cursor::new(bytes);
        Self::read_from(registry, &mut cursor)
    }

    fn read_from(
        registry: &ChunkRegistry,
        cursor: &mut Cursor<&[u8]>,
    ) -> Result<Self, ProtocolError> {
        let mut frame = Frame::new();

        loop {
            let record_start = cursor.position() as usize;
            let tag = read_tag(cursor)?;
            if tag == TERMINATOR_TAG {
                return Ok(frame);
            }

            let len = read_len(cursor, &tag)?;
            let payload_start = cursor.position() as usize;
            let payload_end = payload_start + len;
            let data = *cursor.get_ref();
            if payload_end > data.len() {
                return Err(ProtocolError::Truncated("chunk payload"));
            }
            let payload = &data[payload_start..payload_end];
            cursor.set_position(payload_end as u64);

            if tag == ChunkHHead::TAG {
                if frame.head.is_none() {
                    frame.slots.push(Slot::Head);
                }
                frame.head = Some(ChunkHHead::read(payload)?);
                continue;
            }

            match registry.decode(&tag, payload) {
                Some(chunk) => frame.insert_boxed(chunk?),
                None => frame
                    .slots
                    .push(Slot::Unknown(data[record_start..payload_end].to_vec())),
            }
        }
    }

    fn insert_boxed(&mut self, chunk: Box<dyn AnyChunk>) {
        let tag = chunk.tag();
        let existing = self.slots.iter_mut().find(|slot| match slot {
            Slot::Known(c) => c.tag() == tag,
            _ => false,
        });
        match existing {
            Some(slot) => *slot = Slot::Known(chunk),
            None => self.slots.push(Slot::Known(chunk)),
        }
    }
}

/// Writes `{tag, len, payload}`, patching the length once the payload is in.
fn write_record(
    out: &mut Vec<u8>,
    tag: &str,
    payload: impl FnOnce(&mut Vec<u8>) -> Result<(), ProtocolError>,
) -> Result<(), ProtocolError> {
    write_tag(out, tag);
    let len_at = out.len();
    out.extend_from_slice(&[0u8; 4]);
    payload(out)?;

    let len = out.len() - len_at - 4;
    if len > MAX_CHUNK_SIZE {
        return Err(ProtocolError::ChunkTooLarge {
            tag: tag.to_string(),
            len,
            max: MAX_CHUNK_SIZE,
        });
    }
    out[len_at..len_at + 4].copy_from_slice(&(len as u32).to_le_bytes());
    Ok(())
}

fn write_tag(out: &mut Vec<u8>, tag: &str) {
    out.extend_from_slice(tag.as_bytes());
    out.push(0);
}

fn read_tag(cursor: &mut Cursor<&[u8]>) -> Result<String, ProtocolError> {
    let mut tag = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if std::io::Read::read(cursor, &mut byte)? == 0 {
            return Err(ProtocolError::Truncated("chunk tag"));
        }
        if byte[0] == 0 {
            break;
        }
        tag.push(byte[0]);
        if tag.len() > MAX_TAG_LEN {
            return Err(ProtocolError::InvalidTag(
                String::from_utf8_lossy(&tag).into_owned(),
            ));
        }
    }
    String::from_utf8(tag).map_err(|e| {
        ProtocolError::InvalidTag(String::from_utf8_lossy(e.as_bytes()).into_owned())
    })
}

fn read_len(cursor: &mut Cursor<&[u8]>, tag: &str) -> Result<usize, ProtocolError> {
    let mut len = [0u8; 4];
    std::io::Read::read_exact(cursor, &mut len)
        .map_err(|_| ProtocolError::Truncated("chunk length"))?;
    let len = u32::from_le_bytes(len) as usize;
    if len > MAX_CHUNK_SIZE {
        return Err(ProtocolError::ChunkTooLarge {
            tag: tag.to_string(),
            len,
            max: MAX_CHUNK_SIZE,
        });
    }
    Ok(len)
}

/// Reads the raw bytes of exactly one frame from a stream, without decoding
/// any chunk. Pair with [`Frame::read`].
pub async fn read_frame_bytes<R>(reader: &mut R) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut out = Vec::new();
    loop {
        let tag_start = out.len();
        // a tag never needs more than MAX_TAG_LEN bytes plus its NUL
        let n = (&mut *reader)
            .take(MAX_TAG_LEN as u64 + 1)
            .read_until(0, &mut out)
            .await?;
        if n == 0 {
            return Err(ProtocolError::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        if out.last() != Some(&0) {
            let tag = &out[tag_start..];
            if tag.len() > MAX_TAG_LEN {
                return Err(ProtocolError::InvalidTag(
                    String::from_utf8_lossy(tag).into_owned(),
                ));
            }
            return Err(ProtocolError::Truncated("chunk tag"));
        }
        let tag = &out[tag_start..out.len() - 1];
        if tag == TERMINATOR_TAG.as_bytes() {
            return Ok(out);
        }

        let len = reader.read_u32_le().await? as usize;
        if len > MAX_CHUNK_SIZE {
            return Err(ProtocolError::ChunkTooLarge {
                tag: String::from_utf8_lossy(tag).into_owned(),
                len,
                max: MAX_CHUNK_SIZE,
            });
        }
        out.extend_from_slice(&(len as u32).to_le_bytes());
        let payload_start = out.len();
        out.resize(payload_start + len, 0);
        reader.read_exact(&mut out[payload_start..]).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::{ChunkMChat, ChunkMEmote, ChunkMPlayer, ChunkUUpdate, Vec2};

    fn registry() -> ChunkRegistry {
        ChunkRegistry::with_builtin()
    }

    fn raw_record(tag: &str, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(tag.as_bytes());
        out.push(0);
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_empty_frame() {
        let bytes = Frame::new().write(&registry()).unwrap();
        assert_eq!(bytes, b"\r\n\0");

        let frame = Frame::read(&registry(), &bytes).unwrap();
        assert!(frame.is_empty());
        assert_eq!(frame.len(), 0);
    }

    #[test]
    fn test_frame_roundtrip() {
        let registry = registry();
        let mut frame = Frame::with_head(3);
        frame.set(ChunkMPlayer::new("Madeline"));
        frame.set(ChunkMEmote {
            value: "hi".into(),
        });

        let bytes = frame.write(&registry).unwrap();
        let decoded = Frame::read(&registry, &bytes).unwrap();

        assert_eq!(decoded.head(), Some(3));
        assert_eq!(decoded.get::<ChunkMPlayer>().unwrap().name, "Madeline");
        assert_eq!(decoded.get::<ChunkMEmote>().unwrap().value, "hi");
        assert_eq!(decoded.write(&registry).unwrap(), bytes);
    }

    #[test]
    fn test_insertion_order_preserved() {
        let registry = registry();
        let mut frame = Frame::new();
        frame.set(ChunkMEmote {
            value: "first".into(),
        });
        frame.set(ChunkMPlayer::new("second"));
        frame.set(ChunkMEmote {
            value: "replaced".into(),
        });

        let tags: Vec<_> = frame.tags().collect();
        assert_eq!(tags, vec!["nME", "nM"]);

        let decoded = Frame::read(&registry, &frame.write(&registry).unwrap()).unwrap();
        let tags: Vec<_> = decoded.tags().collect();
        assert_eq!(tags, vec!["nME", "nM"]);
        assert_eq!(decoded.get::<ChunkMEmote>().unwrap().value, "replaced");
    }

    #[test]
    fn test_unknown_tag_passes_through() {
        let registry = registry();
        let player = ChunkMPlayer::new("Theo");

        let mut bytes = raw_record("nM", &player.write().unwrap());
        bytes.extend(raw_record("zzzz", &[0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]));
        bytes.extend_from_slice(b"\r\n\0");

        let frame = Frame::read(&registry, &bytes).unwrap();
        assert_eq!(frame.get::<ChunkMPlayer>().unwrap().name, "Theo");
        assert!(frame.has_extra());
        assert_eq!(frame.write(&registry).unwrap(), bytes);

        let forwarded = frame.passthrough();
        assert!(!forwarded.has::<ChunkMPlayer>());
        let mut expected = raw_record("zzzz", &[0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]);
        expected.extend_from_slice(b"\r\n\0");
        assert_eq!(forwarded.write(&registry).unwrap(), expected);
    }

    #[test]
    fn test_propagation_flags_not_transmitted() {
        let registry = registry();
        let mut frame = Frame::with(ChunkMPlayer::new("Theo"));
        frame.propagate_m = true;
        frame.propagate_u = true;

        let decoded = Frame::read(&registry, &frame.write(&registry).unwrap()).unwrap();
        assert!(!decoded.propagate_m);
        assert!(!decoded.propagate_u);
        assert!(frame.clone().propagate_m);
    }

    #[test]
    fn test_unknown_only_with_empty_registry() {
        let empty = ChunkRegistry::new();
        let mut bytes = raw_record("zzzz", b"anything at all");
        bytes.extend(raw_record("nM", &ChunkMPlayer::new("x").write().unwrap()));
        bytes.extend_from_slice(b"\r\n\0");

        let frame = Frame::read(&empty, &bytes).unwrap();
        assert_eq!(frame.len(), 0);
        assert_eq!(frame.write(&empty).unwrap(), bytes);
    }

    #[test]
    fn test_unsendable_chunks_skipped() {
        let registry = registry();
        let mut frame = Frame::new();
        frame.set(ChunkMEmote { value: " ".into() });
        frame.set(ChunkMPlayer::new("p"));

        let decoded = Frame::read(&registry, &frame.write(&registry).unwrap()).unwrap();
        assert!(!decoded.has::<ChunkMEmote>());
        assert!(decoded.has::<ChunkMPlayer>());
    }

    #[test]
    fn test_assign_head() {
        let mut frame = Frame::new();
        frame.assign_head(4).unwrap();
        assert!(frame.assign_head(4).is_ok());
        assert!(matches!(
            frame.assign_head(5),
            Err(ProtocolError::HeadMismatch {
                assigned: 4,
                requested: 5
            })
        ));
        assert_eq!(frame.head(), Some(4));
    }

    #[test]
    fn test_truncated_input() {
        let registry = registry();
        let bytes = Frame::with(ChunkMPlayer::new("p")).write(&registry).unwrap();
        for cut in [1, 3, 6, bytes.len() - 1] {
            assert!(Frame::read(&registry, &bytes[..cut]).is_err(), "cut {}", cut);
        }
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut bytes = b"nM\0".to_vec();
        bytes.extend_from_slice(&((MAX_CHUNK_SIZE as u32) + 1).to_le_bytes());
        assert!(matches!(
            Frame::read(&registry(), &bytes),
            Err(ProtocolError::ChunkTooLarge { .. })
        ));
    }

    #[test]
    fn test_get_mut_and_remove() {
        let mut frame = Frame::with(ChunkUUpdate::default());
        frame.get_mut::<ChunkUUpdate>().unwrap().position = Vec2::new(1.0, 2.0);
        assert_eq!(frame.get::<ChunkUUpdate>().unwrap().position.y, 2.0);

        let removed = frame.remove::<ChunkUUpdate>().unwrap();
        assert_eq!(removed.position.x, 1.0);
        assert!(!frame.has::<ChunkUUpdate>());
        assert!(frame.remove::<ChunkMChat>().is_none());
    }

    #[test]
    fn test_clone_is_deep() {
        let original = Frame::with(ChunkMPlayer::new("before"));
        let mut copy = original.clone();
        copy.get_mut::<ChunkMPlayer>().unwrap().name = "after".into();
        assert_eq!(original.get::<ChunkMPlayer>().unwrap().name, "before");
    }

    #[tokio::test]
    async fn test_read_frame_bytes_from_stream() {
        let registry = registry();
        let first = Frame::with(ChunkMPlayer::new("one")).write(&registry).unwrap();
        let second = Frame::with_head(9).write(&registry).unwrap();

        let mut stream = first.clone();
        stream.extend_from_slice(&second);
        let mut reader = tokio::io::BufReader::new(&stream[..]);

        assert_eq!(read_frame_bytes(&mut reader).await.unwrap(), first);
        assert_eq!(read_frame_bytes(&mut reader).await.unwrap(), second);
        assert!(read_frame_bytes(&mut reader).await.is_err());
    }

    #[test]
    fn test_unknown_before_known_keeps_wire_order() {
        let registry = registry();
        let mut bytes = raw_record("zzzz", &[7, 7, 7]);
        bytes.extend(raw_record("nM", &ChunkMPlayer::new("Theo").write().unwrap()));
        bytes.extend(raw_record("nH", &ChunkHHead { player_id: 5 }.write().unwrap()));
        bytes.extend(raw_record("yyyy", &[]));
        bytes.extend_from_slice(b"\r\n\0");

        let frame = Frame::read(&registry, &bytes).unwrap();
        assert_eq!(frame.head(), Some(5));
        assert_eq!(frame.write(&registry).unwrap(), bytes);

        let mut expected = raw_record("zzzz", &[7, 7, 7]);
        expected.extend(raw_record("nH", &ChunkHHead { player_id: 5 }.write().unwrap()));
        expected.extend(raw_record("yyyy", &[]));
        expected.extend_from_slice(b"\r\n\0");
        assert_eq!(frame.passthrough().write(&registry).unwrap(), expected);
    }

    #[test]
    fn test_update_part_drops_management_chunks() {
        let mut frame = Frame::with_head(2);
        frame.set(ChunkUUpdate::default());
        frame.set(ChunkMChat::outgoing("forged", 0));
        frame.set(ChunkMPlayer::new("Theo"));

        let update = frame.update_part();
        assert_eq!(update.head(), Some(2));
        assert!(update.has::<ChunkUUpdate>());
        assert!(!update.has::<ChunkMChat>());
        assert!(!update.has::<ChunkMPlayer>());
    }

    #[tokio::test]
    async fn test_overlong_tag_rejected_early() {
        let stream = vec![b'a'; 4096];
        let mut reader = tokio::io::BufReader::new(&stream[..]);

        assert!(matches!(
            read_frame_bytes(&mut reader).await,
            Err(ProtocolError::InvalidTag(_))
        ));
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest.len(), stream.len() - (MAX_TAG_LEN + 1));
    }
}
