//! 플로우 테이블 모델
//!
//! - MatchRule: 표준 매치(OpenFlow 1.0)와 확장 매치(NXM)로 인코딩 가능한 매치 규칙
//! - FlowFormat: 연결별로 협상된 매치 포맷
//! - FlowMod: 플로우 추가/삭제 명령

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::message::OFPT_VENDOR;
use crate::packet::MacAddr;
use crate::{Error, Result};

// ═══════════════════════════════════════════════════════════════
// 포트/버퍼 상수
// ═══════════════════════════════════════════════════════════════

/// 물리 포트 최대 번호
pub const OFPP_MAX: u16 = 0xff00;
pub const OFPP_IN_PORT: u16 = 0xfff8;
pub const OFPP_TABLE: u16 = 0xfff9;
pub const OFPP_NORMAL: u16 = 0xfffa;
/// 입력 포트와 STP 차단 포트를 제외한 모든 포트
pub const OFPP_FLOOD: u16 = 0xfffb;
pub const OFPP_ALL: u16 = 0xfffc;
pub const OFPP_CONTROLLER: u16 = 0xfffd;
pub const OFPP_LOCAL: u16 = 0xfffe;
/// 포트 지정 없음
pub const OFPP_NONE: u16 = 0xffff;

/// 스위치가 패킷을 버퍼링하지 않았음을 나타내는 buffer_id
pub const OFP_NO_BUFFER: u32 = 0xffff_ffff;

/// 기본 플로우 우선순위
pub const OFP_DEFAULT_PRIORITY: u16 = 0x8000;

// ═══════════════════════════════════════════════════════════════
// 플로우 포맷
// ═══════════════════════════════════════════════════════════════

/// 매치 인코딩 포맷 (낮은 값 < 높은 값)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FlowFormat {
    /// OpenFlow 1.0 고정 40바이트 매치
    Standard,
    /// Nicira 확장 매치 (NXM)
    ExtendedMatch,
}

impl FlowFormat {
    /// NXT_SET_FLOW_FORMAT 와이어 값
    pub fn wire_value(self) -> u32 {
        match self {
            FlowFormat::Standard => NXFF_OPENFLOW10,
            FlowFormat::ExtendedMatch => NXFF_NXM,
        }
    }

    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            NXFF_OPENFLOW10 => Some(FlowFormat::Standard),
            NXFF_NXM => Some(FlowFormat::ExtendedMatch),
            _ => None,
        }
    }
}

pub const NXFF_OPENFLOW10: u32 = 0;
pub const NXFF_NXM: u32 = 2;

// ═══════════════════════════════════════════════════════════════
// 매치 규칙
// ═══════════════════════════════════════════════════════════════

/// 플로우 매치 규칙 (None 필드는 와일드카드)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchRule {
    pub in_port: Option<u16>,
    pub eth_src: Option<MacAddr>,
    pub eth_dst: Option<MacAddr>,
    /// eth_dst 마스크 (None 또는 전체 1이면 정확 매치)
    pub eth_dst_mask: Option<MacAddr>,
    pub eth_type: Option<u16>,
    pub ip_proto: Option<u8>,
    /// (주소, 프리픽스 길이)
    pub ipv4_src: Option<(Ipv4Addr, u8)>,
    pub ipv4_dst: Option<(Ipv4Addr, u8)>,
    pub tp_src: Option<u16>,
    pub tp_dst: Option<u16>,
    /// 터널 ID (확장 매치 전용)
    pub tun_id: Option<u64>,
}

impl MatchRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_port(mut self, port: u16) -> Self {
        self.in_port = Some(port);
        self
    }

    pub fn eth_src(mut self, mac: MacAddr) -> Self {
        self.eth_src = Some(mac);
        self
    }

    pub fn eth_dst(mut self, mac: MacAddr) -> Self {
        self.eth_dst = Some(mac);
        self
    }

    pub fn eth_dst_masked(mut self, mac: MacAddr, mask: MacAddr) -> Self {
        self.eth_dst = Some(mac);
        self.eth_dst_mask = Some(mask);
        self
    }

    pub fn eth_type(mut self, eth_type: u16) -> Self {
        self.eth_type = Some(eth_type);
        self
    }

    pub fn ip_proto(mut self, proto: u8) -> Self {
        self.ip_proto = Some(proto);
        self
    }

    pub fn ipv4_src(mut self, addr: Ipv4Addr, prefix_len: u8) -> Self {
        self.ipv4_src = Some((addr, prefix_len.min(32)));
        self
    }

    pub fn ipv4_dst(mut self, addr: Ipv4Addr, prefix_len: u8) -> Self {
        self.ipv4_dst = Some((addr, prefix_len.min(32)));
        self
    }

    pub fn tp_src(mut self, port: u16) -> Self {
        self.tp_src = Some(port);
        self
    }

    pub fn tp_dst(mut self, port: u16) -> Self {
        self.tp_dst = Some(port);
        self
    }

    pub fn tun_id(mut self, tun_id: u64) -> Self {
        self.tun_id = Some(tun_id);
        self
    }

    /// 이 규칙을 표현하는 데 필요한 최소 플로우 포맷
    pub fn flow_format(&self) -> FlowFormat {
        let partial_dst_mask = self
            .eth_dst_mask
            .map(|m| m != MacAddr::BROADCAST)
            .unwrap_or(false);

        if self.tun_id.is_some() || partial_dst_mask {
            FlowFormat::ExtendedMatch
        } else {
            FlowFormat::Standard
        }
    }

    /// OpenFlow 1.0 매치 구조체로 변환
    pub(crate) fn to_ofp_match(&self) -> OfpMatch {
        let mut m = OfpMatch {
            wildcards: OFPFW_ALL,
            ..OfpMatch::default()
        };

        if let Some(port) = self.in_port {
            m.wildcards &= !OFPFW_IN_PORT;
            m.in_port = port;
        }
        if let Some(mac) = self.eth_src {
            m.wildcards &= !OFPFW_DL_SRC;
            m.dl_src = mac.0;
        }
        if let Some(mac) = self.eth_dst {
            m.wildcards &= !OFPFW_DL_DST;
            m.dl_dst = mac.0;
        }
        if let Some(eth_type) = self.eth_type {
            m.wildcards &= !OFPFW_DL_TYPE;
            m.dl_type = eth_type;
        }
        if let Some(proto) = self.ip_proto {
            m.wildcards &= !OFPFW_NW_PROTO;
            m.nw_proto = proto;
        }
        if let Some((addr, prefix)) = self.ipv4_src {
            m.wildcards &= !OFPFW_NW_SRC_MASK;
            m.wildcards |= ((32 - prefix as u32) << OFPFW_NW_SRC_SHIFT) & OFPFW_NW_SRC_MASK;
            m.nw_src = u32::from(addr);
        }
        if let Some((addr, prefix)) = self.ipv4_dst {
            m.wildcards &= !OFPFW_NW_DST_MASK;
            m.wildcards |= ((32 - prefix as u32) << OFPFW_NW_DST_SHIFT) & OFPFW_NW_DST_MASK;
            m.nw_dst = u32::from(addr);
        }
        if let Some(port) = self.tp_src {
            m.wildcards &= !OFPFW_TP_SRC;
            m.tp_src = port;
        }
        if let Some(port) = self.tp_dst {
            m.wildcards &= !OFPFW_TP_DST;
            m.tp_dst = port;
        }
        m
    }

    /// OpenFlow 1.0 매치 구조체에서 복원
    pub(crate) fn from_ofp_match(m: &OfpMatch) -> Self {
        let w = m.wildcards;
        let prefix = |shift: u32, mask: u32| -> Option<u8> {
            let bits = (w & mask) >> shift;
            if bits >= 32 {
                None
            } else {
                Some((32 - bits) as u8)
            }
        };

        Self {
            in_port: (w & OFPFW_IN_PORT == 0).then_some(m.in_port),
            eth_src: (w & OFPFW_DL_SRC == 0).then_some(MacAddr(m.dl_src)),
            eth_dst: (w & OFPFW_DL_DST == 0).then_some(MacAddr(m.dl_dst)),
            eth_dst_mask: None,
            eth_type: (w & OFPFW_DL_TYPE == 0).then_some(m.dl_type),
            ip_proto: (w & OFPFW_NW_PROTO == 0).then_some(m.nw_proto),
            ipv4_src: prefix(OFPFW_NW_SRC_SHIFT, OFPFW_NW_SRC_MASK)
                .map(|p| (Ipv4Addr::from(m.nw_src), p)),
            ipv4_dst: prefix(OFPFW_NW_DST_SHIFT, OFPFW_NW_DST_MASK)
                .map(|p| (Ipv4Addr::from(m.nw_dst), p)),
            tp_src: (w & OFPFW_TP_SRC == 0).then_some(m.tp_src),
            tp_dst: (w & OFPFW_TP_DST == 0).then_some(m.tp_dst),
            tun_id: None,
        }
    }

    /// NXM 엔트리 인코딩. 반환값은 패딩 제외 길이
    pub(crate) fn write_nxm(&self, buf: &mut BytesMut) -> usize {
        let start = buf.len();

        if let Some(port) = self.in_port {
            buf.put_u32(nxm_header(NXM_OF_IN_PORT, false));
            buf.put_u16(port);
        }
        if let Some(mac) = self.eth_dst {
            match self.eth_dst_mask.filter(|m| *m != MacAddr::BROADCAST) {
                Some(mask) => {
                    buf.put_u32(nxm_header(NXM_OF_ETH_DST, true));
                    buf.put_slice(&mac.0);
                    buf.put_slice(&mask.0);
                }
                None => {
                    buf.put_u32(nxm_header(NXM_OF_ETH_DST, false));
                    buf.put_slice(&mac.0);
                }
            }
        }
        if let Some(mac) = self.eth_src {
            buf.put_u32(nxm_header(NXM_OF_ETH_SRC, false));
            buf.put_slice(&mac.0);
        }
        if let Some(eth_type) = self.eth_type {
            buf.put_u32(nxm_header(NXM_OF_ETH_TYPE, false));
            buf.put_u16(eth_type);
        }
        if let Some(proto) = self.ip_proto {
            buf.put_u32(nxm_header(NXM_OF_IP_PROTO, false));
            buf.put_u8(proto);
        }
        for (field, value) in [(NXM_OF_IP_SRC, self.ipv4_src), (NXM_OF_IP_DST, self.ipv4_dst)] {
            if let Some((addr, prefix)) = value {
                if prefix >= 32 {
                    buf.put_u32(nxm_header(field, false));
                    buf.put_u32(u32::from(addr));
                } else {
                    buf.put_u32(nxm_header(field, true));
                    buf.put_u32(u32::from(addr));
                    buf.put_u32(prefix_mask(prefix));
                }
            }
        }
        let udp = self.ip_proto == Some(IPPROTO_UDP);
        if let Some(port) = self.tp_src {
            buf.put_u32(nxm_header(if udp { NXM_OF_UDP_SRC } else { NXM_OF_TCP_SRC }, false));
            buf.put_u16(port);
        }
        if let Some(port) = self.tp_dst {
            buf.put_u32(nxm_header(if udp { NXM_OF_UDP_DST } else { NXM_OF_TCP_DST }, false));
            buf.put_u16(port);
        }
        if let Some(tun_id) = self.tun_id {
            buf.put_u32(nxm_header(NXM_NX_TUN_ID, false));
            buf.put_u64(tun_id);
        }

        buf.len() - start
    }

    /// NXM 엔트리 디코딩 (알 수 없는 필드는 건너뜀)
    pub(crate) fn read_nxm(mut buf: &[u8]) -> Result<Self> {
        let mut rule = Self::default();

        while buf.remaining() >= 4 {
            let header = buf.get_u32();
            let len = (header & 0xff) as usize;
            let has_mask = header & 0x100 != 0;
            let field = header & !0x1ff;
            if buf.remaining() < len {
                return Err(Error::decode(OFPT_VENDOR, "truncated nxm entry"));
            }
            if let Some(&(_, _, flen)) = KNOWN_NXM_FIELDS.iter().find(|f| field_id(**f) == field) {
                let expected = if has_mask { flen * 2 } else { flen };
                if len as u32 != expected {
                    return Err(Error::decode(OFPT_VENDOR, format!("bad nxm length {}", len)));
                }
            }
            let (mut value, rest) = buf.split_at(len);
            buf = rest;

            match field {
                f if f == field_id(NXM_OF_IN_PORT) => rule.in_port = Some(value.get_u16()),
                f if f == field_id(NXM_OF_ETH_DST) => {
                    rule.eth_dst = Some(read_mac(&mut value));
                    if has_mask {
                        rule.eth_dst_mask = Some(read_mac(&mut value));
                    }
                }
                f if f == field_id(NXM_OF_ETH_SRC) => rule.eth_src = Some(read_mac(&mut value)),
                f if f == field_id(NXM_OF_ETH_TYPE) => rule.eth_type = Some(value.get_u16()),
                f if f == field_id(NXM_OF_IP_PROTO) => rule.ip_proto = Some(value.get_u8()),
                f if f == field_id(NXM_OF_IP_SRC) || f == field_id(NXM_OF_IP_DST) => {
                    let addr = Ipv4Addr::from(value.get_u32());
                    let prefix = if has_mask { value.get_u32().count_ones() as u8 } else { 32 };
                    if f == field_id(NXM_OF_IP_SRC) {
                        rule.ipv4_src = Some((addr, prefix));
                    } else {
                        rule.ipv4_dst = Some((addr, prefix));
                    }
                }
                f if f == field_id(NXM_OF_TCP_SRC) || f == field_id(NXM_OF_UDP_SRC) => {
                    rule.tp_src = Some(value.get_u16())
                }
                f if f == field_id(NXM_OF_TCP_DST) || f == field_id(NXM_OF_UDP_DST) => {
                    rule.tp_dst = Some(value.get_u16())
                }
                f if f == field_id(NXM_NX_TUN_ID) => rule.tun_id = Some(value.get_u64()),
                _ => {}
            }
        }

        Ok(rule)
    }
}

fn read_mac(buf: &mut &[u8]) -> MacAddr {
    let mut octets = [0u8; 6];
    buf.copy_to_slice(&mut octets);
    MacAddr(octets)
}

fn prefix_mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix as u32)
    }
}

// ═══════════════════════════════════════════════════════════════
// OpenFlow 1.0 매치 구조체 (40 bytes)
// ═══════════════════════════════════════════════════════════════

pub(crate) const OFP_MATCH_SIZE: usize = 40;

const OFPFW_IN_PORT: u32 = 1 << 0;
const OFPFW_DL_SRC: u32 = 1 << 2;
const OFPFW_DL_DST: u32 = 1 << 3;
const OFPFW_DL_TYPE: u32 = 1 << 4;
const OFPFW_NW_PROTO: u32 = 1 << 5;
const OFPFW_TP_SRC: u32 = 1 << 6;
const OFPFW_TP_DST: u32 = 1 << 7;
const OFPFW_NW_SRC_SHIFT: u32 = 8;
const OFPFW_NW_SRC_MASK: u32 = 0x3f << OFPFW_NW_SRC_SHIFT;
const OFPFW_NW_DST_SHIFT: u32 = 14;
const OFPFW_NW_DST_MASK: u32 = 0x3f << OFPFW_NW_DST_SHIFT;
const OFPFW_ALL: u32 = (1 << 22) - 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct OfpMatch {
    pub wildcards: u32,
    pub in_port: u16,
    pub dl_src: [u8; 6],
    pub dl_dst: [u8; 6],
    pub dl_vlan: u16,
    pub dl_vlan_pcp: u8,
    pub pad1: u8,
    pub dl_type: u16,
    pub nw_tos: u8,
    pub nw_proto: u8,
    pub pad2: [u8; 2],
    pub nw_src: u32,
    pub nw_dst: u32,
    pub tp_src: u16,
    pub tp_dst: u16,
}

// ═══════════════════════════════════════════════════════════════
// NXM 필드 (vendor, field, length)
// ═══════════════════════════════════════════════════════════════

type NxmField = (u32, u32, u32);

const NXM_OF_IN_PORT: NxmField = (0, 0, 2);
const NXM_OF_ETH_DST: NxmField = (0, 1, 6);
const NXM_OF_ETH_SRC: NxmField = (0, 2, 6);
const NXM_OF_ETH_TYPE: NxmField = (0, 3, 2);
const NXM_OF_IP_PROTO: NxmField = (0, 6, 1);
const NXM_OF_IP_SRC: NxmField = (0, 7, 4);
const NXM_OF_IP_DST: NxmField = (0, 8, 4);
const NXM_OF_TCP_SRC: NxmField = (0, 9, 2);
const NXM_OF_TCP_DST: NxmField = (0, 10, 2);
const NXM_OF_UDP_SRC: NxmField = (0, 11, 2);
const NXM_OF_UDP_DST: NxmField = (0, 12, 2);
const NXM_NX_TUN_ID: NxmField = (1, 16, 8);

const KNOWN_NXM_FIELDS: [NxmField; 12] = [
    NXM_OF_IN_PORT,
    NXM_OF_ETH_DST,
    NXM_OF_ETH_SRC,
    NXM_OF_ETH_TYPE,
    NXM_OF_IP_PROTO,
    NXM_OF_IP_SRC,
    NXM_OF_IP_DST,
    NXM_OF_TCP_SRC,
    NXM_OF_TCP_DST,
    NXM_OF_UDP_SRC,
    NXM_OF_UDP_DST,
    NXM_NX_TUN_ID,
];

const IPPROTO_UDP: u8 = 17;

fn nxm_header((vendor, field, len): NxmField, has_mask: bool) -> u32 {
    let len = if has_mask { len * 2 } else { len };
    (vendor << 16) | (field << 9) | ((has_mask as u32) << 8) | len
}

fn field_id((vendor, field, _): NxmField) -> u32 {
    (vendor << 16) | (field << 9)
}

// ═══════════════════════════════════════════════════════════════
// 액션
// ═══════════════════════════════════════════════════════════════

const OFPAT_OUTPUT: u16 = 0;

/// 플로우/packet-out 액션
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// 지정 포트로 출력
    Output { port: u16, max_len: u16 },
    /// 디코딩하지 않는 액션 (원본 바디 보존)
    Other { action_type: u16, body: Bytes },
}

impl Action {
    pub fn output(port: u16) -> Self {
        Action::Output { port, max_len: 0 }
    }

    pub fn flood() -> Self {
        Action::output(OFPP_FLOOD)
    }

    pub(crate) fn wire_len(&self) -> usize {
        match self {
            Action::Output { .. } => 8,
            Action::Other { body, .. } => 4 + body.len(),
        }
    }

    pub(crate) fn write(&self, buf: &mut BytesMut) {
        match self {
            Action::Output { port, max_len } => {
                buf.put_u16(OFPAT_OUTPUT);
                buf.put_u16(8);
                buf.put_u16(*port);
                buf.put_u16(*max_len);
            }
            Action::Other { action_type, body } => {
                buf.put_u16(*action_type);
                buf.put_u16((4 + body.len()) as u16);
                buf.put_slice(body);
            }
        }
    }

    pub(crate) fn write_all(actions: &[Action], buf: &mut BytesMut) -> usize {
        let start = buf.len();
        for action in actions {
            action.write(buf);
        }
        buf.len() - start
    }

    pub(crate) fn read_all(mut buf: &[u8], msg_type: u8) -> Result<Vec<Action>> {
        let mut actions = Vec::new();
        while buf.remaining() >= 4 {
            let action_type = buf.get_u16();
            let len = buf.get_u16() as usize;
            if len < 4 || buf.remaining() < len - 4 {
                return Err(Error::decode(msg_type, format!("bad action length {}", len)));
            }
            let (mut body, rest) = buf.split_at(len - 4);
            buf = rest;

            if action_type == OFPAT_OUTPUT && body.len() >= 4 {
                actions.push(Action::Output {
                    port: body.get_u16(),
                    max_len: body.get_u16(),
                });
            } else {
                actions.push(Action::Other {
                    action_type,
                    body: Bytes::copy_from_slice(body),
                });
            }
        }
        Ok(actions)
    }
}

// ═══════════════════════════════════════════════════════════════
// FlowMod
// ═══════════════════════════════════════════════════════════════

/// FlowMod 명령 코드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FlowModCommand {
    Add = 0,
    Modify = 1,
    ModifyStrict = 2,
    Delete = 3,
    DeleteStrict = 4,
}

impl TryFrom<u16> for FlowModCommand {
    type Error = u16;

    fn try_from(value: u16) -> std::result::Result<Self, u16> {
        match value {
            0 => Ok(FlowModCommand::Add),
            1 => Ok(FlowModCommand::Modify),
            2 => Ok(FlowModCommand::ModifyStrict),
            3 => Ok(FlowModCommand::Delete),
            4 => Ok(FlowModCommand::DeleteStrict),
            other => Err(other),
        }
    }
}

/// 플로우 추가/수정/삭제 명령
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowMod {
    pub rule: MatchRule,
    pub cookie: u64,
    pub command: FlowModCommand,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub priority: u16,
    pub buffer_id: u32,
    pub out_port: u16,
    pub flags: u16,
    pub actions: Vec<Action>,
}

impl FlowMod {
    /// 기본값으로 FlowMod 생성
    pub fn new(rule: MatchRule, command: FlowModCommand) -> Self {
        Self {
            rule,
            cookie: 0,
            command,
            idle_timeout: 0,
            hard_timeout: 0,
            priority: OFP_DEFAULT_PRIORITY,
            buffer_id: OFP_NO_BUFFER,
            out_port: OFPP_NONE,
            flags: 0,
            actions: Vec::new(),
        }
    }

    /// 삭제 명령 (우선순위 0, 타임아웃 없음)
    pub fn delete(rule: MatchRule, cookie: u64, out_port: u16) -> Self {
        Self::new(rule, FlowModCommand::Delete)
            .cookie(cookie)
            .priority(0)
            .out_port(out_port)
    }

    /// 전체 플로우 삭제 명령
    pub fn delete_all() -> Self {
        Self::delete(MatchRule::new(), 0, OFPP_NONE).buffer_id(0)
    }

    pub fn cookie(mut self, cookie: u64) -> Self {
        self.cookie = cookie;
        self
    }

    pub fn timeouts(mut self, idle_timeout: u16, hard_timeout: u16) -> Self {
        self.idle_timeout = idle_timeout;
        self.hard_timeout = hard_timeout;
        self
    }

    pub fn priority(mut self, priority: u16) -> Self {
        self.priority = priority;
        self
    }

    pub fn buffer_id(mut self, buffer_id: u32) -> Self {
        self.buffer_id = buffer_id;
        self
    }

    pub fn out_port(mut self, out_port: u16) -> Self {
        self.out_port = out_port;
        self
    }

    pub fn flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    pub fn actions(mut self, actions: Vec<Action>) -> Self {
        self.actions = actions;
        self
    }
}

/// 예약 포트 여부 (OFPP_MAX 초과)
pub fn is_reserved_port(port: u16) -> bool {
    port > OFPP_MAX
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(last: u8) -> MacAddr {
        MacAddr([0, 0, 0, 0, 0, last])
    }

    #[test]
    fn test_flow_format_ordering() {
        assert!(FlowFormat::Standard < FlowFormat::ExtendedMatch);
        assert_eq!(FlowFormat::from_wire(NXFF_NXM), Some(FlowFormat::ExtendedMatch));
        assert_eq!(FlowFormat::from_wire(7), None);
    }

    #[test]
    fn test_required_flow_format() {
        let rule = MatchRule::new().in_port(1).eth_dst(mac(2)).eth_src(mac(1));
        assert_eq!(rule.flow_format(), FlowFormat::Standard);

        let exact_mask = rule.clone().eth_dst_masked(mac(2), MacAddr::BROADCAST);
        assert_eq!(exact_mask.flow_format(), FlowFormat::Standard);

        let partial = rule.clone().eth_dst_masked(mac(2), MacAddr([0xff, 0xff, 0xff, 0, 0, 0]));
        assert_eq!(partial.flow_format(), FlowFormat::ExtendedMatch);

        assert_eq!(MatchRule::new().tun_id(5).flow_format(), FlowFormat::ExtendedMatch);
    }

    #[test]
    fn test_ofp_match_wildcards() {
        let rule = MatchRule::new()
            .in_port(3)
            .eth_type(0x0800)
            .ipv4_src(Ipv4Addr::new(10, 0, 0, 0), 8);
        let m = rule.to_ofp_match();

        assert_eq!(m.wildcards & OFPFW_IN_PORT, 0);
        assert_eq!(m.wildcards & OFPFW_DL_TYPE, 0);
        assert_ne!(m.wildcards & OFPFW_DL_SRC, 0);
        assert_eq!((m.wildcards & OFPFW_NW_SRC_MASK) >> OFPFW_NW_SRC_SHIFT, 24);

        assert_eq!(MatchRule::from_ofp_match(&m), rule);
        assert_eq!(MatchRule::new().to_ofp_match().wildcards, OFPFW_ALL);
    }

    #[test]
    fn test_nxm_entries() {
        let rule = MatchRule::new()
            .in_port(1)
            .eth_dst_masked(mac(2), MacAddr([0xff, 0xff, 0xff, 0, 0, 0]))
            .tun_id(0x42);

        let mut buf = BytesMut::new();
        let len = rule.write_nxm(&mut buf);
        // in_port(4+2) + eth_dst/mask(4+12) + tun_id(4+8)
        assert_eq!(len, 6 + 16 + 12);
        assert_eq!(&buf[..4], &0x0000_0002u32.to_be_bytes());

        assert_eq!(MatchRule::read_nxm(&buf).unwrap(), rule);
    }

    #[test]
    fn test_delete_all_flow_mod() {
        let fm = FlowMod::delete_all();
        assert_eq!(fm.command, FlowModCommand::Delete);
        assert_eq!(fm.priority, 0);
        assert_eq!(fm.buffer_id, 0);
        assert_eq!(fm.out_port, OFPP_NONE);
        assert_eq!(fm.rule, MatchRule::new());
        assert!(fm.actions.is_empty());
    }

    #[test]
    fn test_reserved_ports() {
        assert!(is_reserved_port(OFPP_FLOOD));
        assert!(is_reserved_port(OFPP_CONTROLLER));
        assert!(!is_reserved_port(1));
        assert!(!is_reserved_port(OFPP_MAX));
    }
}
