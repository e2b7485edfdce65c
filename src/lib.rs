//! # OFC (OpenFlow Controller core)
//!
//! 스위치 연결 관리와 프로토콜 상태 머신
//!
//! ## 핵심 특징
//! - **프레이밍**: 고정 8바이트 헤더의 length로 메시지 경계 탐지
//! - **상태 머신**: Handshake -> Active -> Dead, 전이마다 이벤트 한 번
//! - **백프레셔**: 용량 제한 송신 큐, 가득 차면 생산자 대기
//! - **keepalive**: echo request 미응답 누적 시 연결 종료
//! - **플로우 포맷 협상**: 확장 매치가 필요하면 포맷 변경 + barrier 선행
//! - **학습 스위치**: packet-in으로 MAC 학습, 알려진 목적지는 플로우 설치
//! - **능동 연결**: 설정된 스위치 주소로 주기적 재연결

pub mod codec;
pub mod config;
pub mod datapath;
pub mod error;
pub mod event;
pub mod flow;
pub mod framer;
pub mod keepalive;
pub mod learning;
pub mod listener;
pub mod message;
pub mod packet;
pub mod registry;
pub mod send_queue;
pub mod udp;

pub use codec::{Codec, OfpCodec, OFP_VERSION};
pub use config::{parse_switch_address, Config};
pub use datapath::{Datapath, DatapathState};
pub use error::{Error, Result};
pub use event::{ChannelEventBus, DatapathEvent, EventBus, NullEventBus};
pub use flow::{Action, FlowFormat, FlowMod, FlowModCommand, MatchRule};
pub use framer::Framer;
pub use learning::MacTable;
pub use listener::{Controller, ServeContext};
pub use message::{Message, OfpHeader};
pub use packet::MacAddr;
pub use registry::ConnectionRegistry;
pub use send_queue::{SendEntry, SendQueue};
pub use udp::UdpListener;

/// OpenFlow 표준 TCP 포트
pub const OFP_TCP_PORT: u16 = 6653;

/// 한 번의 읽기에서 이 수만큼 메시지를 처리하면 양보
pub const DEFAULT_YIELD_THRESHOLD: usize = 2048;

/// xid 최대값 (이후 0으로 wrap)
pub const MAX_XID: u32 = u32::MAX;
