//! Transport boundary: finished packets leave the engine here.
//!
//! The actual network layer (serialization, connection management) lives in
//! the host; the engine only needs a sink it can hand encoded packets to,
//! plus the wire framing for one packet.

use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Identifies one remote listener at the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecipientId(pub u64);

/// Outbound sink for finished packets.
///
/// Implementations must not block the mixer tick for more than the tick
/// interval under normal conditions; anything slower belongs behind a queue.
pub trait PacketSink: Send + Sync {
    /// Recipients currently ready to receive audio.
    fn ready_recipients(&self) -> Vec<RecipientId>;

    /// Broadcast one encoded packet to every ready recipient.
    fn send(&self, channel_id: u8, payload: &[u8]);

    /// Deliver one encoded packet to a single recipient.
    fn send_to(&self, recipient: RecipientId, channel_id: u8, payload: &[u8]);
}

/// Wire framing for one mixed-and-encoded packet:
/// `{channelId: u8, length: u32, data}`, big-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketFrame {
    pub channel_id: u8,
    pub data: Bytes,
}

impl PacketFrame {
    pub fn new(channel_id: u8, data: impl Into<Bytes>) -> Self {
        Self {
            channel_id,
            data: data.into(),
        }
    }

    /// Encode the frame for the wire.
    pub fn encode(&self) -> Bytes {
        let mut buf = Vec::with_capacity(5 + self.data.len());
        buf.write_u8(self.channel_id).unwrap();
        buf.write_u32::<BigEndian>(self.data.len() as u32).unwrap();
        buf.extend_from_slice(&self.data);
        Bytes::from(buf)
    }

    /// Decode a frame produced by [`PacketFrame::encode`].
    pub fn decode(raw: &[u8]) -> Option<Self> {
        let mut cursor = Cursor::new(raw);
        let channel_id = cursor.read_u8().ok()?;
        let length = cursor.read_u32::<BigEndian>().ok()? as usize;
        let start = cursor.position() as usize;
        let data = raw.get(start..start + length)?;
        Some(Self {
            channel_id,
            data: Bytes::copy_from_slice(data),
        })
    }
}
