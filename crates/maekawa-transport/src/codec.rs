//! Length-delimited JSON codec for protocol messages.
//!
//! ```text
//! +----------------+----------------------------+
//! | len: u32 (BE)  | body: len bytes of JSON    |
//! +----------------+----------------------------+
//! ```
//!
//! Framing is [`LengthDelimitedCodec`]'s default layout. A body that is not
//! a valid message decodes to an `Err` item, so the stream stays usable; a
//! bad length prefix is a stream error and the connection must be dropped.

use bytes::{Bytes, BytesMut};
use maekawa_core::{decode, encode, Message};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::error::{Result, TransportError};

/// Largest accepted frame body (64 KiB).
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Codec for [`Message`] frames.
#[derive(Debug)]
pub struct MessageCodec {
    inner: LengthDelimitedCodec,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageCodec {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_LEN)
                .new_codec(),
        }
    }
}

impl Decoder for MessageCodec {
    /// One frame: the message, or why its body was rejected.
    type Item = maekawa_core::Result<Message>;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        Ok(self.inner.decode(src)?.map(|body| decode(&body)))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = TransportError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<()> {
        let body = encode(&message)?;
        if body.len() > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge(body.len()));
        }
        self.inner.encode(Bytes::from(body), dst)?;
        Ok(())
    }
}
