//! 이벤트 버스
//!
//! 상태 변경과 내장 핸들러가 처리하지 않은 메시지를 애플리케이션으로 전달

use std::net::SocketAddr;

use tokio::sync::mpsc;

use crate::datapath::DatapathState;
use crate::message::{Message, OfpHeader};

/// 데이터패스 이벤트
#[derive(Debug, Clone, PartialEq)]
pub enum DatapathEvent {
    /// 상태 전이 (전이마다 정확히 한 번)
    StateChange {
        address: SocketAddr,
        datapath_id: Option<u64>,
        state: DatapathState,
    },

    /// 내장 핸들러가 없는 메시지
    Message {
        address: SocketAddr,
        datapath_id: Option<u64>,
        state: DatapathState,
        header: OfpHeader,
        message: Message,
    },
}

impl DatapathEvent {
    pub fn address(&self) -> SocketAddr {
        match self {
            DatapathEvent::StateChange { address, .. } | DatapathEvent::Message { address, .. } => {
                *address
            }
        }
    }
}

/// 이벤트 발행 인터페이스
pub trait EventBus: Send + Sync {
    fn publish(&self, event: DatapathEvent);
}

/// mpsc 채널 기반 이벤트 버스
#[derive(Debug, Clone)]
pub struct ChannelEventBus {
    tx: mpsc::UnboundedSender<DatapathEvent>,
}

impl ChannelEventBus {
    /// 버스와 구독 채널 생성
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DatapathEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventBus for ChannelEventBus {
    fn publish(&self, event: DatapathEvent) {
        // 구독자가 사라졌으면 버림
        let _ = self.tx.send(event);
    }
}

/// 이벤트를 버리는 버스
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventBus;

impl EventBus for NullEventBus {
    fn publish(&self, _event: DatapathEvent) {}
}
