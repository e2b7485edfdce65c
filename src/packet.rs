//! 이더넷 프레임 파싱 (packet-in 처리용)

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// LLDP (토폴로지 탐색) EtherType
pub const ETH_TYPE_LLDP: u16 = 0x88cc;

/// 802.1Q VLAN 태그 EtherType
pub const ETH_TYPE_8021Q: u16 = 0x8100;

/// IPv4 EtherType
pub const ETH_TYPE_IP: u16 = 0x0800;

/// 이더넷 헤더 크기 (태그 없음)
pub const ETH_HEADER_SIZE: usize = 14;

/// MAC 주소
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    pub fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(|| format!("invalid mac: {}", s))?;
            *octet = u8::from_str_radix(part, 16).map_err(|_| format!("invalid mac: {}", s))?;
        }
        if parts.next().is_some() {
            return Err(format!("invalid mac: {}", s));
        }
        Ok(Self(octets))
    }
}

/// 파싱된 이더넷 헤더
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthernetFrame {
    pub dst: MacAddr,
    pub src: MacAddr,
    /// VLAN 태그가 있으면 내부 EtherType
    pub ethertype: u16,
    pub vlan_tci: Option<u16>,
}

impl EthernetFrame {
    /// 바이트에서 이더넷 헤더 파싱
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < ETH_HEADER_SIZE {
            return None;
        }

        let mut dst = [0u8; 6];
        let mut src = [0u8; 6];
        dst.copy_from_slice(&bytes[0..6]);
        src.copy_from_slice(&bytes[6..12]);

        let mut ethertype = u16::from_be_bytes([bytes[12], bytes[13]]);
        let mut vlan_tci = None;
        if ethertype == ETH_TYPE_8021Q {
            if bytes.len() < ETH_HEADER_SIZE + 4 {
                return None;
            }
            vlan_tci = Some(u16::from_be_bytes([bytes[14], bytes[15]]));
            ethertype = u16::from_be_bytes([bytes[16], bytes[17]]);
        }

        Some(Self {
            dst: MacAddr(dst),
            src: MacAddr(src),
            ethertype,
            vlan_tci,
        })
    }

    /// 토폴로지 탐색 트래픽 여부
    pub fn is_lldp(&self) -> bool {
        self.ethertype == ETH_TYPE_LLDP
    }

    /// 헤더 + 페이로드로 프레임 생성
    pub fn build(dst: MacAddr, src: MacAddr, ethertype: u16, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(ETH_HEADER_SIZE + payload.len());
        buf.put_slice(&dst.0);
        buf.put_slice(&src.0);
        buf.put_u16(ethertype);
        buf.put_slice(payload);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_display_and_parse() {
        let mac: MacAddr = "00:11:22:aa:bb:cc".parse().unwrap();
        assert_eq!(mac.0, [0x00, 0x11, 0x22, 0xaa, 0xbb, 0xcc]);
        assert_eq!(mac.to_string(), "00:11:22:aa:bb:cc");
        assert!("00:11:22".parse::<MacAddr>().is_err());
        assert!("00:11:22:aa:bb:cc:dd".parse::<MacAddr>().is_err());
        assert!(MacAddr::BROADCAST.is_multicast());
    }

    #[test]
    fn test_parse_frame() {
        let a = MacAddr([0, 0, 0, 0, 0, 1]);
        let b = MacAddr([0, 0, 0, 0, 0, 2]);
        let frame = EthernetFrame::build(b, a, ETH_TYPE_IP, &[1, 2, 3]);

        let eth = EthernetFrame::parse(&frame).unwrap();
        assert_eq!(eth.dst, b);
        assert_eq!(eth.src, a);
        assert_eq!(eth.ethertype, ETH_TYPE_IP);
        assert!(!eth.is_lldp());

        assert!(EthernetFrame::parse(&frame[..10]).is_none());
    }

    #[test]
    fn test_parse_vlan_tagged_lldp() {
        let mut frame = vec![0xffu8; 12];
        frame.extend_from_slice(&ETH_TYPE_8021Q.to_be_bytes());
        frame.extend_from_slice(&0x0064u16.to_be_bytes());
        frame.extend_from_slice(&ETH_TYPE_LLDP.to_be_bytes());

        let eth = EthernetFrame::parse(&frame).unwrap();
        assert_eq!(eth.vlan_tci, Some(100));
        assert!(eth.is_lldp());
    }
}
