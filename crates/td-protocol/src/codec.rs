//! Tokio codec for line-delimited touch events

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::event::{TouchEvent, WireFormat};

/// Longest accepted line, terminator excluded
pub const MAX_LINE_LENGTH: usize = 256;

/// Codec for encoding/decoding one event per `\n`-terminated line
#[derive(Debug, Default, Clone)]
pub struct TouchEventCodec {
    format: WireFormat,
    /// Bytes of the buffer already scanned for a terminator
    scanned: usize,
}

impl TouchEventCodec {
    /// Create a new codec for the given format
    pub fn new(format: WireFormat) -> Self {
        Self { format, scanned: 0 }
    }
}

impl Decoder for TouchEventCodec {
    type Item = TouchEvent;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(offset) = src[self.scanned..].iter().position(|b| *b == b'\n') else {
                if src.len() > MAX_LINE_LENGTH {
                    return Err(ProtocolError::LineTooLong {
                        size: src.len(),
                        max: MAX_LINE_LENGTH,
                    });
                }
                self.scanned = src.len();
                return Ok(None);
            };

            let line_end = self.scanned + offset;
            self.scanned = 0;
            let line = src.split_to(line_end + 1);
            let text = String::from_utf8_lossy(&line[..line_end]);
            let text = text.trim();

            // Blank lines carry nothing
            if text.is_empty() {
                continue;
            }

            let event = match self.format {
                WireFormat::Text => TouchEvent::parse_text(text)?,
                WireFormat::Json => serde_json::from_str(text)?,
            };
            return Ok(Some(event));
        }
    }
}

impl Encoder<TouchEvent> for TouchEventCodec {
    type Error = ProtocolError;

    fn encode(&mut self, event: TouchEvent, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = match self.format {
            WireFormat::Text => event.to_text(),
            WireFormat::Json => serde_json::to_string(&event)?,
        };

        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TouchSource;

    #[test]
    fn test_encode_text_line() {
        let mut codec = TouchEventCodec::new(WireFormat::Text);
        let mut buf = BytesMut::new();

        codec
            .encode(TouchEvent::started(TouchSource::U2f), &mut buf)
            .unwrap();
        codec
            .encode(TouchEvent::stopped(TouchSource::U2f), &mut buf)
            .unwrap();

        assert_eq!(&buf[..], b"U2F 1\nU2F 0\n");
    }

    #[test]
    fn test_decode_json_line() {
        let mut codec = TouchEventCodec::new(WireFormat::Json);
        let mut buf = BytesMut::from(&b"{\"source\":\"SSH\",\"waiting\":false}\n"[..]);

        let event = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(event, TouchEvent::stopped(TouchSource::Ssh));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_partial_read() {
        let mut codec = TouchEventCodec::new(WireFormat::Text);
        let mut buf = BytesMut::from(&b"GP"[..]);

        // No terminator yet
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"G 1\nU2F");
        let event = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(event, TouchEvent::started(TouchSource::Gpg));

        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b" 0\n");
        let event = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(event, TouchEvent::stopped(TouchSource::U2f));
    }

    #[test]
    fn test_decode_skips_blank_lines() {
        let mut codec = TouchEventCodec::new(WireFormat::Text);
        let mut buf = BytesMut::from(&b"\n\r\nSSH 1\r\n"[..]);

        let event = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(event, TouchEvent::started(TouchSource::Ssh));
    }

    #[test]
    fn test_decode_line_too_long() {
        let mut codec = TouchEventCodec::new(WireFormat::Text);
        let mut buf = BytesMut::from(vec![b'x'; MAX_LINE_LENGTH + 1].as_slice());

        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::LineTooLong { .. })
        ));
    }
}
