//! 메시지 프레이머
//!
//! 바이트 스트림을 누적해 헤더의 length 필드로 메시지 경계를 찾음.
//! 부분 메시지는 절대 디코딩으로 넘기지 않음

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::message::{OfpHeader, OFP_HEADER_SIZE};

/// 연결당 프레이머 상태
#[derive(Debug)]
pub struct Framer {
    /// 누적 버퍼
    buf: BytesMut,

    /// 현재 메시지를 완성하기 위해 더 필요한 바이트 수
    needed: usize,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            needed: OFP_HEADER_SIZE,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            needed: OFP_HEADER_SIZE,
        }
    }

    /// 수신한 바이트 추가
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        self.needed = self.needed.saturating_sub(data.len());
    }

    /// 다음 완전한 메시지 추출 (헤더, 헤더 포함 프레임)
    ///
    /// declared length가 헤더 크기보다 작으면 헤더 크기로 보정
    pub fn next_frame(&mut self) -> Option<(OfpHeader, Bytes)> {
        let mut header = match OfpHeader::parse(&self.buf) {
            Some(header) => header,
            None => {
                self.needed = OFP_HEADER_SIZE - self.buf.len();
                return None;
            }
        };

        let mut length = header.length as usize;
        if length < OFP_HEADER_SIZE {
            debug!(
                "invalid message length {} (type={}, xid={}), clamped to {}",
                length, header.msg_type, header.xid, OFP_HEADER_SIZE
            );
            length = OFP_HEADER_SIZE;
            header.length = OFP_HEADER_SIZE as u16;
        }

        if self.buf.len() < length {
            self.needed = length - self.buf.len();
            return None;
        }

        let frame = self.buf.split_to(length).freeze();
        self.needed = match OfpHeader::parse(&self.buf) {
            Some(next) => (next.length as usize)
                .max(OFP_HEADER_SIZE)
                .saturating_sub(self.buf.len()),
            None => OFP_HEADER_SIZE - self.buf.len(),
        };
        Some((header, frame))
    }

    /// 다음 메시지를 완성하기 위해 더 필요한 바이트 수
    pub fn needed(&self) -> usize {
        self.needed
    }

    /// 아직 프레이밍되지 않은 바이트 수
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Codec, OfpCodec};
    use crate::message::Message;

    fn sample_stream() -> (Vec<Message>, Vec<u8>) {
        let messages = vec![
            Message::Hello,
            Message::EchoRequest(Bytes::from_static(b"ping")),
            Message::FeaturesRequest,
            Message::EchoReply(Bytes::from_static(&[0u8; 100])),
            Message::BarrierRequest,
        ];
        let mut stream = Vec::new();
        for (i, msg) in messages.iter().enumerate() {
            stream.extend_from_slice(&OfpCodec.encode(msg, i as u32).unwrap());
        }
        (messages, stream)
    }

    fn drain(framer: &mut Framer) -> Vec<Message> {
        let mut out = Vec::new();
        while let Some((header, frame)) = framer.next_frame() {
            out.push(OfpCodec.decode(&header, &frame).unwrap());
        }
        out
    }

    #[test]
    fn test_frames_concatenated_stream() {
        let (messages, stream) = sample_stream();

        let mut framer = Framer::new();
        framer.extend(&stream);
        assert_eq!(drain(&mut framer), messages);
        assert_eq!(framer.buffered(), 0);
        assert_eq!(framer.needed(), OFP_HEADER_SIZE);
    }

    #[test]
    fn test_partial_message_every_split() {
        let msg = Message::EchoRequest(Bytes::from_static(b"0123456789"));
        let buf = OfpCodec.encode(&msg, 77).unwrap();

        for split in 1..buf.len() {
            let mut framer = Framer::new();
            framer.extend(&buf[..split]);
            assert!(framer.next_frame().is_none(), "split at {}", split);
            assert!(framer.needed() > 0);

            framer.extend(&buf[split..]);
            let (header, frame) = framer.next_frame().unwrap();
            assert_eq!(header.xid, 77);
            assert_eq!(OfpCodec.decode(&header, &frame).unwrap(), msg);
            assert!(framer.next_frame().is_none());
        }
    }

    #[test]
    fn test_needed_tracks_body() {
        let buf = OfpCodec
            .encode(&Message::EchoRequest(Bytes::from_static(&[1u8; 24])), 1)
            .unwrap();

        let mut framer = Framer::new();
        framer.extend(&buf[..10]);
        assert!(framer.next_frame().is_none());
        assert_eq!(framer.needed(), buf.len() - 10);
    }

    #[test]
    fn test_short_length_is_clamped() {
        // length=4 는 헤더보다 작음 -> 8로 보정 후 계속 진행
        let mut stream = vec![0x01, 0x00, 0x00, 0x04, 0, 0, 0, 1];
        stream.extend_from_slice(&OfpCodec.encode(&Message::Hello, 2).unwrap());

        let mut framer = Framer::new();
        framer.extend(&stream);

        let (first, frame) = framer.next_frame().unwrap();
        assert_eq!(first.length as usize, OFP_HEADER_SIZE);
        assert_eq!(frame.len(), OFP_HEADER_SIZE);

        let (second, _) = framer.next_frame().unwrap();
        assert_eq!(second.xid, 2);
        assert!(framer.next_frame().is_none());
    }
}
