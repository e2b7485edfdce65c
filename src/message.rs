//! 프로토콜 메시지 정의
//!
//! 고정 8바이트 헤더 (network byte order):
//! version(1) + type(1) + length(2, 헤더 포함) + xid(4)

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::flow::{Action, FlowFormat, FlowMod, OFP_NO_BUFFER};
use crate::packet::MacAddr;

/// 헤더 크기 (바이트)
pub const OFP_HEADER_SIZE: usize = 8;

pub const OFPT_HELLO: u8 = 0;
pub const OFPT_ERROR: u8 = 1;
pub const OFPT_ECHO_REQUEST: u8 = 2;
pub const OFPT_ECHO_REPLY: u8 = 3;
pub const OFPT_VENDOR: u8 = 4;
pub const OFPT_FEATURES_REQUEST: u8 = 5;
pub const OFPT_FEATURES_REPLY: u8 = 6;
pub const OFPT_SET_CONFIG: u8 = 9;
pub const OFPT_PACKET_IN: u8 = 10;
pub const OFPT_PACKET_OUT: u8 = 13;
pub const OFPT_FLOW_MOD: u8 = 14;
pub const OFPT_STATS_REQUEST: u8 = 16;
pub const OFPT_BARRIER_REQUEST: u8 = 18;
pub const OFPT_BARRIER_REPLY: u8 = 19;

/// 메시지 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Hello = 0,
    Error = 1,
    EchoRequest = 2,
    EchoReply = 3,
    Vendor = 4,
    FeaturesRequest = 5,
    FeaturesReply = 6,
    GetConfigRequest = 7,
    GetConfigReply = 8,
    SetConfig = 9,
    PacketIn = 10,
    FlowRemoved = 11,
    PortStatus = 12,
    PacketOut = 13,
    FlowMod = 14,
    PortMod = 15,
    StatsRequest = 16,
    StatsReply = 17,
    BarrierRequest = 18,
    BarrierReply = 19,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, u8> {
        use MessageType::*;
        Ok(match value {
            0 => Hello,
            1 => Error,
            2 => EchoRequest,
            3 => EchoReply,
            4 => Vendor,
            5 => FeaturesRequest,
            6 => FeaturesReply,
            7 => GetConfigRequest,
            8 => GetConfigReply,
            9 => SetConfig,
            10 => PacketIn,
            11 => FlowRemoved,
            12 => PortStatus,
            13 => PacketOut,
            14 => FlowMod,
            15 => PortMod,
            16 => StatsRequest,
            17 => StatsReply,
            18 => BarrierRequest,
            19 => BarrierReply,
            other => return Err(other),
        })
    }
}

/// 메시지 헤더
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfpHeader {
    /// 프로토콜 버전
    pub version: u8,

    /// 메시지 타입 (원시 값)
    pub msg_type: u8,

    /// 전체 메시지 길이 (헤더 포함)
    pub length: u16,

    /// 트랜잭션 ID
    pub xid: u32,
}

impl OfpHeader {
    pub fn new(version: u8, msg_type: u8, length: u16, xid: u32) -> Self {
        Self {
            version,
            msg_type,
            length,
            xid,
        }
    }

    /// 버퍼 앞부분에서 헤더 파싱 (8바이트 미만이면 None)
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < OFP_HEADER_SIZE {
            return None;
        }
        Some(Self {
            version: buf[0],
            msg_type: buf[1],
            length: u16::from_be_bytes([buf[2], buf[3]]),
            xid: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }

    /// 알려진 메시지 타입
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::try_from(self.msg_type).ok()
    }
}

/// 스위치 물리 포트 정보
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhyPort {
    pub port_no: u16,
    pub hw_addr: MacAddr,
    pub name: String,
}

/// FeaturesReply 바디
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchFeatures {
    pub datapath_id: u64,
    pub n_buffers: u32,
    pub n_tables: u8,
    pub capabilities: u32,
    pub actions: u32,
    pub ports: Vec<PhyPort>,
}

/// SetConfig 바디
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchConfig {
    pub flags: u16,
    pub miss_send_len: u16,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            flags: 0,
            miss_send_len: 128,
        }
    }
}

/// PacketIn 바디
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketIn {
    pub buffer_id: u32,
    pub total_len: u16,
    pub in_port: u16,
    pub reason: u8,
    /// 이더넷 프레임 (miss_send_len으로 잘릴 수 있음)
    pub data: Bytes,
}

impl PacketIn {
    /// 스위치가 패킷을 버퍼링했는지 여부
    pub fn is_buffered(&self) -> bool {
        self.buffer_id != OFP_NO_BUFFER
    }
}

/// PacketOut 바디
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketOut {
    pub buffer_id: u32,
    pub in_port: u16,
    pub actions: Vec<Action>,
    /// buffer_id가 OFP_NO_BUFFER일 때만 의미 있음
    pub data: Bytes,
}

/// 에러 메시지 바디
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMsg {
    pub error_type: u16,
    pub code: u16,
    pub data: Bytes,
}

/// 통합 메시지 enum
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Hello,
    Error(ErrorMsg),
    EchoRequest(Bytes),
    EchoReply(Bytes),
    FeaturesRequest,
    FeaturesReply(SwitchFeatures),
    SetConfig(SwitchConfig),
    PacketIn(PacketIn),
    PacketOut(PacketOut),
    /// 표준 매치 FlowMod
    FlowMod(FlowMod),
    /// 확장 매치(NXM) FlowMod
    NxFlowMod(FlowMod),
    /// 플로우 포맷 변경 (Nicira vendor)
    NxSetFlowFormat(FlowFormat),
    /// 포트 정보 요청 (stats request)
    PortDescRequest,
    BarrierRequest,
    BarrierReply,
    /// 코덱이 해석하지 않는 메시지 (이벤트 버스로 전달)
    Other { msg_type: u8, body: Bytes },
}

impl Message {
    /// 와이어 메시지 타입
    pub fn msg_type(&self) -> u8 {
        match self {
            Message::Hello => OFPT_HELLO,
            Message::Error(_) => OFPT_ERROR,
            Message::EchoRequest(_) => OFPT_ECHO_REQUEST,
            Message::EchoReply(_) => OFPT_ECHO_REPLY,
            Message::FeaturesRequest => OFPT_FEATURES_REQUEST,
            Message::FeaturesReply(_) => OFPT_FEATURES_REPLY,
            Message::SetConfig(_) => OFPT_SET_CONFIG,
            Message::PacketIn(_) => OFPT_PACKET_IN,
            Message::PacketOut(_) => OFPT_PACKET_OUT,
            Message::FlowMod(_) => OFPT_FLOW_MOD,
            Message::NxFlowMod(_) | Message::NxSetFlowFormat(_) => OFPT_VENDOR,
            Message::PortDescRequest => OFPT_STATS_REQUEST,
            Message::BarrierRequest => OFPT_BARRIER_REQUEST,
            Message::BarrierReply => OFPT_BARRIER_REPLY,
            Message::Other { msg_type, .. } => *msg_type,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Hello => write!(f, "Hello"),
            Message::Error(e) => write!(f, "Error(type={}, code={})", e.error_type, e.code),
            Message::EchoRequest(d) => write!(f, "EchoRequest({} bytes)", d.len()),
            Message::EchoReply(d) => write!(f, "EchoReply({} bytes)", d.len()),
            Message::FeaturesRequest => write!(f, "FeaturesRequest"),
            Message::FeaturesReply(fr) => write!(f, "FeaturesReply(dpid={:016x})", fr.datapath_id),
            Message::SetConfig(c) => write!(f, "SetConfig(miss_send_len={})", c.miss_send_len),
            Message::PacketIn(p) => write!(f, "PacketIn(in_port={}, {} bytes)", p.in_port, p.data.len()),
            Message::PacketOut(p) => write!(f, "PacketOut(in_port={})", p.in_port),
            Message::FlowMod(fm) => write!(f, "FlowMod({:?})", fm.command),
            Message::NxFlowMod(fm) => write!(f, "NxFlowMod({:?})", fm.command),
            Message::NxSetFlowFormat(ff) => write!(f, "NxSetFlowFormat({:?})", ff),
            Message::PortDescRequest => write!(f, "PortDescRequest"),
            Message::BarrierRequest => write!(f, "BarrierRequest"),
            Message::BarrierReply => write!(f, "BarrierReply"),
            Message::Other { msg_type, body } => write!(f, "Other(type={}, {} bytes)", msg_type, body.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_parse() {
        let buf = [0x01, 0x02, 0x00, 0x10, 0xde, 0xad, 0xbe, 0xef, 0xff];
        let header = OfpHeader::parse(&buf).unwrap();
        assert_eq!(header.version, 1);
        assert_eq!(header.message_type(), Some(MessageType::EchoRequest));
        assert_eq!(header.length, 16);
        assert_eq!(header.xid, 0xdeadbeef);

        assert!(OfpHeader::parse(&buf[..7]).is_none());
    }

    #[test]
    fn test_message_type_conversion() {
        assert_eq!(MessageType::try_from(10), Ok(MessageType::PacketIn));
        assert_eq!(MessageType::try_from(99), Err(99));
        assert_eq!(Message::NxSetFlowFormat(FlowFormat::ExtendedMatch).msg_type(), OFPT_VENDOR);
        assert_eq!(Message::PortDescRequest.msg_type(), MessageType::StatsRequest as u8);
    }
}
