use bytes::BytesMut;
use splashproto::{FrameError, Message};
use tokio_util::codec::{Decoder, Encoder};

/// Length-delimited framing of [`Message`]s over a byte stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCodec;

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        Message::decode(src)
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), FrameError> {
        item.encode(dst)
    }
}
