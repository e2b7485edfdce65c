//! 컨트롤러 설정
//!
//! 리스닝 주소, 능동 연결 대상 스위치 목록, 소켓/keepalive 타이밍

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result, DEFAULT_YIELD_THRESHOLD, OFP_TCP_PORT};

/// 송신 큐 최소 용량
///
/// handshake 응답과 플로우 포맷 협상이 각각 3개 메시지를 한 번에 넣음
pub const MIN_SEND_QUEUE_CAPACITY: usize = 3;

/// 컨트롤러 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// 리스닝 호스트
    pub listen_host: IpAddr,

    /// TCP 리스닝 포트 (None이면 TCP 리스너 비활성)
    pub tcp_listen_port: Option<u16>,

    /// UDP 리스닝 포트 (None이면 UDP 리스너 비활성)
    pub udp_listen_port: Option<u16>,

    /// 능동 연결할 스위치 주소 목록
    /// 예: "127.0.0.1:6653", "[::1]:6653"
    pub switch_addresses: Vec<SocketAddr>,

    /// 스위치 재연결 시도 간격
    pub switch_connect_interval: Duration,

    /// 소켓 송수신 타임아웃
    pub socket_timeout: Duration,

    /// echo request 전송 간격
    pub echo_request_interval: Duration,

    /// 연결 종료 전 허용하는 미응답 echo request 수
    /// 0이면 keepalive 태스크 비활성
    pub max_unreplied_echo_requests: usize,

    /// 연결당 송신 큐 용량
    pub send_queue_capacity: usize,

    /// 한 번에 처리한 메시지 수가 이 값을 넘으면 양보
    pub yield_threshold: usize,

    /// 소켓 읽기 단위 (바이트)
    pub recv_buffer_size: usize,

    /// SetConfig의 miss_send_len
    pub miss_send_len: u16,

    /// 이 시간 동안 데이터그램이 없는 UDP 세션은 종료
    pub udp_session_idle_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            tcp_listen_port: Some(OFP_TCP_PORT),
            udp_listen_port: None,
            switch_addresses: Vec::new(),
            switch_connect_interval: Duration::from_secs(1),
            socket_timeout: Duration::from_secs(5),
            echo_request_interval: Duration::from_secs(15),
            max_unreplied_echo_requests: 0,
            // 메모리 사용을 막기 위한 임의의 제한
            send_queue_capacity: 16,
            yield_threshold: DEFAULT_YIELD_THRESHOLD,
            recv_buffer_size: 64 * 1024,
            miss_send_len: 128,
            udp_session_idle_timeout: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 실험실/테스트용 설정 (짧은 keepalive 주기)
    pub fn lab() -> Self {
        Self {
            switch_connect_interval: Duration::from_millis(200),
            socket_timeout: Duration::from_secs(1),
            echo_request_interval: Duration::from_millis(500),
            max_unreplied_echo_requests: 3,
            udp_session_idle_timeout: Duration::from_secs(10),
            ..Self::default()
        }
    }

    /// 스위치 주소 목록 설정
    pub fn with_switch_addresses(mut self, addrs: &[&str]) -> Result<Self> {
        self.switch_addresses = addrs
            .iter()
            .map(|a| parse_switch_address(a))
            .collect::<Result<Vec<_>>>()?;
        Ok(self)
    }

    /// TCP 리스닝 주소
    pub fn tcp_listen_addr(&self) -> Option<SocketAddr> {
        self.tcp_listen_port
            .map(|port| SocketAddr::new(self.listen_host, port))
    }

    /// UDP 리스닝 주소
    pub fn udp_listen_addr(&self) -> Option<SocketAddr> {
        self.udp_listen_port
            .map(|port| SocketAddr::new(self.listen_host, port))
    }

    /// keepalive 활성 여부
    pub fn keepalive_enabled(&self) -> bool {
        self.max_unreplied_echo_requests > 0
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.send_queue_capacity < MIN_SEND_QUEUE_CAPACITY {
            return Err(Error::InvalidConfig(format!(
                "send_queue_capacity {} < {}",
                self.send_queue_capacity, MIN_SEND_QUEUE_CAPACITY
            )));
        }
        if self.recv_buffer_size == 0 {
            return Err(Error::InvalidConfig("recv_buffer_size 0".into()));
        }
        if self.udp_session_idle_timeout.is_zero() {
            return Err(Error::InvalidConfig("udp_session_idle_timeout 0".into()));
        }
        Ok(())
    }
}

/// "ip:port" 문자열을 SocketAddr로 변환
///
/// IPv6는 대괄호 표기만 허용: `[::1]:6653`
pub fn parse_switch_address(addr: &str) -> Result<SocketAddr> {
    let invalid = || Error::InvalidAddress(addr.to_string());

    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;

    let ip = if let Some(inner) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        IpAddr::V6(inner.parse::<Ipv6Addr>().map_err(|_| invalid())?)
    } else {
        IpAddr::V4(host.parse::<Ipv4Addr>().map_err(|_| invalid())?)
    };

    let port = parse_port(port).ok_or_else(invalid)?;
    Ok(SocketAddr::new(ip, port))
}

fn parse_port(s: &str) -> Option<u16> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16).ok()
    } else {
        s.parse::<u16>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4_address() {
        let addr = parse_switch_address("127.0.0.1:6653").unwrap();
        assert_eq!(addr, "127.0.0.1:6653".parse().unwrap());
    }

    #[test]
    fn test_parse_bracketed_ipv6_address() {
        let addr = parse_switch_address("[::1]:6653").unwrap();
        assert_eq!(addr.ip(), IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(addr.port(), 6653);
    }

    #[test]
    fn test_parse_hex_port() {
        let addr = parse_switch_address("10.0.0.1:0x19fd").unwrap();
        assert_eq!(addr.port(), 6653);
    }

    #[test]
    fn test_reject_malformed_addresses() {
        for bad in [
            "127.0.0.1",
            "::1:6653",
            "[127.0.0.1]:6653",
            "localhost:6653",
            "127.0.0.1:port",
            "127.0.0.1:70000",
            "",
        ] {
            assert!(
                matches!(parse_switch_address(bad), Err(Error::InvalidAddress(_))),
                "{} 는 거부되어야 함",
                bad
            );
        }
    }

    #[test]
    fn test_with_switch_addresses() {
        let config = Config::new()
            .with_switch_addresses(&["127.0.0.1:6653", "[::1]:6654"])
            .unwrap();
        assert_eq!(config.switch_addresses.len(), 2);

        assert!(Config::new().with_switch_addresses(&["nope"]).is_err());
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.tcp_listen_addr(), Some("0.0.0.0:6653".parse().unwrap()));
        assert!(config.udp_listen_addr().is_none());
        assert!(!config.keepalive_enabled());
        assert!(Config::lab().keepalive_enabled());
        assert!(config.validate().is_ok());
        assert!(Config::lab().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_small_send_queue() {
        let config = Config {
            send_queue_capacity: MIN_SEND_QUEUE_CAPACITY - 1,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = Config {
            send_queue_capacity: MIN_SEND_QUEUE_CAPACITY,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }
}
