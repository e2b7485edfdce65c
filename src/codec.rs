//! 메시지 코덱
//!
//! 헤더 + 바디 바이트를 타입이 있는 `Message`로 변환하고 그 반대도 수행.
//! 고정 레이아웃 구조체는 bincode(big endian, 고정 길이 정수)로 직렬화하고
//! 가변 길이 꼬리(액션, 포트 목록, NXM)는 bytes로 처리

use bincode::Options;
use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::flow::{Action, FlowFormat, FlowMod, FlowModCommand, MatchRule, OfpMatch, OFP_MATCH_SIZE};
use crate::message::*;
use crate::packet::MacAddr;
use crate::{Error, Result};

/// OpenFlow 1.0 와이어 버전
pub const OFP_VERSION: u8 = 0x01;

/// Nicira vendor ID
pub const NX_VENDOR_ID: u32 = 0x0000_2320;

const NXT_SET_FLOW_FORMAT: u32 = 12;
const NXT_FLOW_MOD: u32 = 13;

/// PORT_DESC stats 타입
const OFPST_PORT_DESC: u16 = 13;

/// 메시지 인코딩/디코딩 인터페이스
///
/// 연결마다 `Arc<dyn Codec>`으로 주입됨
pub trait Codec: Send + Sync {
    /// 이 코덱이 말하는 와이어 버전
    fn version(&self) -> u8;

    /// 정확히 한 메시지 분량의 프레임(헤더 포함)을 디코딩
    fn decode(&self, header: &OfpHeader, frame: &[u8]) -> Result<Message>;

    /// 헤더를 포함한 전송 가능한 버퍼로 인코딩
    fn encode(&self, msg: &Message, xid: u32) -> Result<Bytes>;
}

/// OpenFlow 1.0 + Nicira 확장 코덱
#[derive(Debug, Clone, Copy, Default)]
pub struct OfpCodec;

impl OfpCodec {
    pub fn new() -> Self {
        Self
    }
}

fn wire() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
        .allow_trailing_bytes()
}

fn put_fixed<T: Serialize>(buf: &mut BytesMut, value: &T) -> Result<()> {
    buf.put_slice(&wire().serialize(value)?);
    Ok(())
}

fn get_fixed<T: DeserializeOwned>(body: &[u8], size: usize, msg_type: u8) -> Result<T> {
    if body.len() < size {
        return Err(Error::decode(
            msg_type,
            format!("body too short: {} < {}", body.len(), size),
        ));
    }
    Ok(wire().deserialize(&body[..size])?)
}

// ═══════════════════════════════════════════════════════════════
// 고정 레이아웃 와이어 구조체
// ═══════════════════════════════════════════════════════════════

#[derive(Serialize, Deserialize)]
struct ErrorFixed {
    error_type: u16,
    code: u16,
}

#[derive(Serialize, Deserialize)]
struct FeaturesFixed {
    datapath_id: u64,
    n_buffers: u32,
    n_tables: u8,
    pad: [u8; 3],
    capabilities: u32,
    actions: u32,
}
const FEATURES_FIXED_SIZE: usize = 24;

#[derive(Serialize, Deserialize)]
struct PhyPortWire {
    port_no: u16,
    hw_addr: [u8; 6],
    name: [u8; 16],
    config: u32,
    state: u32,
    curr: u32,
    advertised: u32,
    supported: u32,
    peer: u32,
}
const PHY_PORT_SIZE: usize = 48;

#[derive(Serialize, Deserialize)]
struct PacketInFixed {
    buffer_id: u32,
    total_len: u16,
    in_port: u16,
    reason: u8,
    pad: u8,
}
const PACKET_IN_FIXED_SIZE: usize = 10;

#[derive(Serialize, Deserialize)]
struct PacketOutFixed {
    buffer_id: u32,
    in_port: u16,
    actions_len: u16,
}
const PACKET_OUT_FIXED_SIZE: usize = 8;

#[derive(Serialize, Deserialize)]
struct FlowModFixed {
    cookie: u64,
    command: u16,
    idle_timeout: u16,
    hard_timeout: u16,
    priority: u16,
    buffer_id: u32,
    out_port: u16,
    flags: u16,
}
const FLOW_MOD_FIXED_SIZE: usize = 24;

#[derive(Serialize, Deserialize)]
struct NxFlowModFixed {
    cookie: u64,
    command: u16,
    idle_timeout: u16,
    hard_timeout: u16,
    priority: u16,
    buffer_id: u32,
    out_port: u16,
    flags: u16,
    match_len: u16,
    pad: [u8; 6],
}
const NX_FLOW_MOD_FIXED_SIZE: usize = 32;

#[derive(Serialize, Deserialize)]
struct VendorHeader {
    vendor: u32,
    subtype: u32,
}
const VENDOR_HEADER_SIZE: usize = 8;

#[derive(Serialize, Deserialize)]
struct StatsRequestFixed {
    stats_type: u16,
    flags: u16,
}

impl FlowModFixed {
    fn from_flow_mod(fm: &FlowMod) -> Self {
        Self {
            cookie: fm.cookie,
            command: fm.command as u16,
            idle_timeout: fm.idle_timeout,
            hard_timeout: fm.hard_timeout,
            priority: fm.priority,
            buffer_id: fm.buffer_id,
            out_port: fm.out_port,
            flags: fm.flags,
        }
    }

    fn into_flow_mod(self, rule: MatchRule, actions: Vec<Action>, msg_type: u8) -> Result<FlowMod> {
        let command = FlowModCommand::try_from(self.command)
            .map_err(|c| Error::decode(msg_type, format!("unknown flow mod command {}", c)))?;
        Ok(FlowMod {
            rule,
            cookie: self.cookie,
            command,
            idle_timeout: self.idle_timeout,
            hard_timeout: self.hard_timeout,
            priority: self.priority,
            buffer_id: self.buffer_id,
            out_port: self.out_port,
            flags: self.flags,
            actions,
        })
    }
}

impl Codec for OfpCodec {
    fn version(&self) -> u8 {
        OFP_VERSION
    }

    fn decode(&self, header: &OfpHeader, frame: &[u8]) -> Result<Message> {
        if header.version != OFP_VERSION {
            return Err(Error::UnsupportedVersion {
                expected: OFP_VERSION,
                got: header.version,
            });
        }

        let t = header.msg_type;
        let body = frame.get(OFP_HEADER_SIZE..).unwrap_or_default();

        let msg = match t {
            OFPT_HELLO => Message::Hello,
            OFPT_ERROR => {
                let fixed: ErrorFixed = get_fixed(body, 4, t)?;
                Message::Error(ErrorMsg {
                    error_type: fixed.error_type,
                    code: fixed.code,
                    data: Bytes::copy_from_slice(&body[4..]),
                })
            }
            OFPT_ECHO_REQUEST => Message::EchoRequest(Bytes::copy_from_slice(body)),
            OFPT_ECHO_REPLY => Message::EchoReply(Bytes::copy_from_slice(body)),
            OFPT_FEATURES_REQUEST => Message::FeaturesRequest,
            OFPT_FEATURES_REPLY => decode_features_reply(body)?,
            OFPT_SET_CONFIG => Message::SetConfig(get_fixed(body, 4, t)?),
            OFPT_PACKET_IN => {
                let fixed: PacketInFixed = get_fixed(body, PACKET_IN_FIXED_SIZE, t)?;
                Message::PacketIn(PacketIn {
                    buffer_id: fixed.buffer_id,
                    total_len: fixed.total_len,
                    in_port: fixed.in_port,
                    reason: fixed.reason,
                    data: Bytes::copy_from_slice(&body[PACKET_IN_FIXED_SIZE..]),
                })
            }
            OFPT_PACKET_OUT => {
                let fixed: PacketOutFixed = get_fixed(body, PACKET_OUT_FIXED_SIZE, t)?;
                let actions_end = PACKET_OUT_FIXED_SIZE + fixed.actions_len as usize;
                if body.len() < actions_end {
                    return Err(Error::decode(t, "actions overrun body"));
                }
                Message::PacketOut(PacketOut {
                    buffer_id: fixed.buffer_id,
                    in_port: fixed.in_port,
                    actions: Action::read_all(&body[PACKET_OUT_FIXED_SIZE..actions_end], t)?,
                    data: Bytes::copy_from_slice(&body[actions_end..]),
                })
            }
            OFPT_FLOW_MOD => {
                let m: OfpMatch = get_fixed(body, OFP_MATCH_SIZE, t)?;
                let rest = &body[OFP_MATCH_SIZE..];
                let fixed: FlowModFixed = get_fixed(rest, FLOW_MOD_FIXED_SIZE, t)?;
                let actions = Action::read_all(&rest[FLOW_MOD_FIXED_SIZE..], t)?;
                Message::FlowMod(fixed.into_flow_mod(MatchRule::from_ofp_match(&m), actions, t)?)
            }
            OFPT_VENDOR => decode_vendor(body)?,
            OFPT_STATS_REQUEST => {
                let fixed: StatsRequestFixed = get_fixed(body, 4, t)?;
                if fixed.stats_type == OFPST_PORT_DESC {
                    Message::PortDescRequest
                } else {
                    Message::Other {
                        msg_type: t,
                        body: Bytes::copy_from_slice(body),
                    }
                }
            }
            OFPT_BARRIER_REQUEST => Message::BarrierRequest,
            OFPT_BARRIER_REPLY => Message::BarrierReply,
            _ => Message::Other {
                msg_type: t,
                body: Bytes::copy_from_slice(body),
            },
        };

        Ok(msg)
    }

    fn encode(&self, msg: &Message, xid: u32) -> Result<Bytes> {
        let mut body = BytesMut::new();

        match msg {
            Message::Hello
            | Message::FeaturesRequest
            | Message::BarrierRequest
            | Message::BarrierReply => {}
            Message::Error(e) => {
                put_fixed(&mut body, &ErrorFixed {
                    error_type: e.error_type,
                    code: e.code,
                })?;
                body.put_slice(&e.data);
            }
            Message::EchoRequest(data) | Message::EchoReply(data) => body.put_slice(data),
            Message::FeaturesReply(f) => encode_features_reply(f, &mut body)?,
            Message::SetConfig(config) => put_fixed(&mut body, config)?,
            Message::PacketIn(p) => {
                put_fixed(&mut body, &PacketInFixed {
                    buffer_id: p.buffer_id,
                    total_len: p.total_len,
                    in_port: p.in_port,
                    reason: p.reason,
                    pad: 0,
                })?;
                body.put_slice(&p.data);
            }
            Message::PacketOut(p) => {
                let actions_len: usize = p.actions.iter().map(Action::wire_len).sum();
                put_fixed(&mut body, &PacketOutFixed {
                    buffer_id: p.buffer_id,
                    in_port: p.in_port,
                    actions_len: actions_len as u16,
                })?;
                Action::write_all(&p.actions, &mut body);
                body.put_slice(&p.data);
            }
            Message::FlowMod(fm) => {
                put_fixed(&mut body, &fm.rule.to_ofp_match())?;
                put_fixed(&mut body, &FlowModFixed::from_flow_mod(fm))?;
                Action::write_all(&fm.actions, &mut body);
            }
            Message::NxFlowMod(fm) => {
                put_fixed(&mut body, &VendorHeader {
                    vendor: NX_VENDOR_ID,
                    subtype: NXT_FLOW_MOD,
                })?;

                let mut nxm = BytesMut::new();
                let match_len = fm.rule.write_nxm(&mut nxm);
                // NXM은 8바이트 경계로 패딩
                nxm.put_bytes(0, (8 - match_len % 8) % 8);

                let fixed = FlowModFixed::from_flow_mod(fm);
                put_fixed(&mut body, &NxFlowModFixed {
                    cookie: fixed.cookie,
                    command: fixed.command,
                    idle_timeout: fixed.idle_timeout,
                    hard_timeout: fixed.hard_timeout,
                    priority: fixed.priority,
                    buffer_id: fixed.buffer_id,
                    out_port: fixed.out_port,
                    flags: fixed.flags,
                    match_len: match_len as u16,
                    pad: [0; 6],
                })?;
                body.put_slice(&nxm);
                Action::write_all(&fm.actions, &mut body);
            }
            Message::NxSetFlowFormat(format) => {
                put_fixed(&mut body, &VendorHeader {
                    vendor: NX_VENDOR_ID,
                    subtype: NXT_SET_FLOW_FORMAT,
                })?;
                body.put_u32(format.wire_value());
            }
            Message::PortDescRequest => put_fixed(&mut body, &StatsRequestFixed {
                stats_type: OFPST_PORT_DESC,
                flags: 0,
            })?,
            Message::Other { body: raw, .. } => body.put_slice(raw),
        }

        let len = OFP_HEADER_SIZE + body.len();
        if len > u16::MAX as usize {
            return Err(Error::MessageTooLarge { len });
        }

        let header = OfpHeader::new(OFP_VERSION, msg.msg_type(), len as u16, xid);
        let mut buf = BytesMut::with_capacity(len);
        put_fixed(&mut buf, &header)?;
        buf.put_slice(&body);
        Ok(buf.freeze())
    }
}

fn decode_features_reply(body: &[u8]) -> Result<Message> {
    let t = OFPT_FEATURES_REPLY;
    let fixed: FeaturesFixed = get_fixed(body, FEATURES_FIXED_SIZE, t)?;

    let ports = body[FEATURES_FIXED_SIZE..]
        .chunks_exact(PHY_PORT_SIZE)
        .map(|raw| -> Result<PhyPort> {
            let port: PhyPortWire = get_fixed(raw, PHY_PORT_SIZE, t)?;
            let name_len = port.name.iter().position(|&b| b == 0).unwrap_or(port.name.len());
            Ok(PhyPort {
                port_no: port.port_no,
                hw_addr: MacAddr(port.hw_addr),
                name: String::from_utf8_lossy(&port.name[..name_len]).into_owned(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Message::FeaturesReply(SwitchFeatures {
        datapath_id: fixed.datapath_id,
        n_buffers: fixed.n_buffers,
        n_tables: fixed.n_tables,
        capabilities: fixed.capabilities,
        actions: fixed.actions,
        ports,
    }))
}

fn encode_features_reply(f: &SwitchFeatures, body: &mut BytesMut) -> Result<()> {
    put_fixed(body, &FeaturesFixed {
        datapath_id: f.datapath_id,
        n_buffers: f.n_buffers,
        n_tables: f.n_tables,
        pad: [0; 3],
        capabilities: f.capabilities,
        actions: f.actions,
    })?;

    for port in &f.ports {
        let mut name = [0u8; 16];
        let raw = port.name.as_bytes();
        let n = raw.len().min(15);
        name[..n].copy_from_slice(&raw[..n]);

        put_fixed(body, &PhyPortWire {
            port_no: port.port_no,
            hw_addr: port.hw_addr.0,
            name,
            config: 0,
            state: 0,
            curr: 0,
            advertised: 0,
            supported: 0,
            peer: 0,
        })?;
    }
    Ok(())
}

fn decode_vendor(body: &[u8]) -> Result<Message> {
    let t = OFPT_VENDOR;
    let vendor: VendorHeader = get_fixed(body, VENDOR_HEADER_SIZE, t)?;
    let rest = &body[VENDOR_HEADER_SIZE..];

    if vendor.vendor != NX_VENDOR_ID {
        return Ok(Message::Other {
            msg_type: t,
            body: Bytes::copy_from_slice(body),
        });
    }

    match vendor.subtype {
        NXT_SET_FLOW_FORMAT => {
            let raw: u32 = get_fixed(rest, 4, t)?;
            let format = FlowFormat::from_wire(raw)
                .ok_or_else(|| Error::decode(t, format!("unknown flow format {}", raw)))?;
            Ok(Message::NxSetFlowFormat(format))
        }
        NXT_FLOW_MOD => {
            let fixed: NxFlowModFixed = get_fixed(rest, NX_FLOW_MOD_FIXED_SIZE, t)?;
            let match_len = fixed.match_len as usize;
            let padded = match_len + (8 - match_len % 8) % 8;
            let tail = &rest[NX_FLOW_MOD_FIXED_SIZE..];
            if tail.len() < padded {
                return Err(Error::decode(t, "nxm overruns body"));
            }
            let rule = MatchRule::read_nxm(&tail[..match_len])?;
            let actions = Action::read_all(&tail[padded..], t)?;

            let common = FlowModFixed {
                cookie: fixed.cookie,
                command: fixed.command,
                idle_timeout: fixed.idle_timeout,
                hard_timeout: fixed.hard_timeout,
                priority: fixed.priority,
                buffer_id: fixed.buffer_id,
                out_port: fixed.out_port,
                flags: fixed.flags,
            };
            Ok(Message::NxFlowMod(common.into_flow_mod(rule, actions, t)?))
        }
        _ => Ok(Message::Other {
            msg_type: t,
            body: Bytes::copy_from_slice(body),
        }),
    }
}
