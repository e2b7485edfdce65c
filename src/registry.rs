//! 능동 연결 레지스트리
//!
//! 설정된 스위치 주소마다 재연결 루프를 하나씩 유지.
//! 루프는 연결이 끝날 때까지 기다린 뒤 간격만큼 쉬고 다시 연결

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::listener::ServeContext;

/// 주소 하나의 재연결 루프 핸들
#[derive(Debug)]
struct DialHandle {
    /// false면 다음 시도 전에 루프 종료
    active: AtomicBool,

    task: Mutex<Option<JoinHandle<()>>>,
}

/// 주소 -> 재연결 루프
pub struct ConnectionRegistry {
    ctx: ServeContext,
    loops: Mutex<HashMap<SocketAddr, Arc<DialHandle>>>,
}

impl ConnectionRegistry {
    pub fn new(ctx: ServeContext) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            loops: Mutex::new(HashMap::new()),
        })
    }

    /// 재연결 루프 시작. 이미 실행 중이면 false
    pub fn spawn_client_loop(self: &Arc<Self>, addr: SocketAddr, interval: Duration) -> bool {
        let mut loops = self.loops.lock();
        if loops.contains_key(&addr) {
            return false;
        }

        let handle = Arc::new(DialHandle {
            active: AtomicBool::new(true),
            task: Mutex::new(None),
        });
        let task = tokio::spawn(dial_loop(self.ctx.clone(), addr, interval, handle.clone()));
        *handle.task.lock() = Some(task);
        loops.insert(addr, handle);

        info!("dialing switch at {} every {:?}", addr, interval);
        true
    }

    /// 재연결 중단
    ///
    /// 진행 중인 연결은 끊지 않고, 다음 시도부터 막음
    pub fn stop_client_loop(&self, addr: SocketAddr) -> bool {
        match self.loops.lock().remove(&addr) {
            Some(handle) => {
                handle.active.store(false, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn is_dialing(&self, addr: SocketAddr) -> bool {
        self.loops.lock().contains_key(&addr)
    }

    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.loops.lock().keys().copied().collect()
    }

    /// 모든 루프 중단 (진행 중인 연결은 유지)
    pub fn stop_all(&self) {
        for (_, handle) in self.loops.lock().drain() {
            handle.active.store(false, Ordering::SeqCst);
        }
    }

    /// 모든 루프 강제 종료
    pub fn abort_all(&self) {
        for (_, handle) in self.loops.lock().drain() {
            handle.active.store(false, Ordering::SeqCst);
            if let Some(task) = handle.task.lock().take() {
                task.abort();
            }
        }
    }
}

async fn dial_loop(ctx: ServeContext, addr: SocketAddr, interval: Duration, handle: Arc<DialHandle>) {
    while handle.active.load(Ordering::SeqCst) {
        match tokio::time::timeout(ctx.config.socket_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                info!("connected to switch at {}", addr);
                ctx.serve_tcp(stream, addr).await;
            }
            Ok(Err(e)) => debug!("failed to connect to switch at {}: {}", addr, e),
            Err(_) => debug!("connect to switch at {} timed out", addr),
        }

        if !handle.active.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(interval).await;
    }
    debug!("dial loop for {} stopped", addr);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Codec, OfpCodec};
    use crate::event::NullEventBus;
    use crate::message::{Message, OfpHeader, OFP_HEADER_SIZE};
    use crate::Config;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn context() -> ServeContext {
        let config = Config {
            max_unreplied_echo_requests: 0,
            ..Config::lab()
        };
        ServeContext::new(config, Arc::new(OfpCodec), Arc::new(NullEventBus))
    }

    async fn read_message(stream: &mut TcpStream) -> Message {
        let mut head = [0u8; OFP_HEADER_SIZE];
        stream.read_exact(&mut head).await.unwrap();
        let header = OfpHeader::parse(&head).unwrap();
        let mut buf = head.to_vec();
        buf.resize(header.length as usize, 0);
        stream.read_exact(&mut buf[OFP_HEADER_SIZE..]).await.unwrap();
        OfpCodec.decode(&header, &buf).unwrap()
    }

    #[tokio::test]
    async fn test_dials_and_serves() {
        let switch = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = switch.local_addr().unwrap();

        let registry = ConnectionRegistry::new(context());
        assert!(registry.spawn_client_loop(addr, Duration::from_millis(20)));
        assert!(!registry.spawn_client_loop(addr, Duration::from_millis(20)));
        assert!(registry.is_dialing(addr));

        let (mut stream, _) = tokio::time::timeout(Duration::from_secs(2), switch.accept())
            .await
            .unwrap()
            .unwrap();
        stream
            .write_all(&OfpCodec.encode(&Message::Hello, 1).unwrap())
            .await
            .unwrap();
        assert_eq!(read_message(&mut stream).await, Message::Hello);
        assert_eq!(read_message(&mut stream).await, Message::FeaturesRequest);

        registry.abort_all();
    }

    #[tokio::test]
    async fn test_redials_after_disconnect() {
        let switch = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = switch.local_addr().unwrap();

        let registry = ConnectionRegistry::new(context());
        registry.spawn_client_loop(addr, Duration::from_millis(20));

        let (first, _) = tokio::time::timeout(Duration::from_secs(2), switch.accept())
            .await
            .unwrap()
            .unwrap();
        drop(first);

        // 연결이 끊기면 간격 후 다시 연결
        let second = tokio::time::timeout(Duration::from_secs(2), switch.accept()).await;
        assert!(second.is_ok());

        registry.abort_all();
    }

    #[tokio::test]
    async fn test_stop_prevents_future_attempts() {
        let switch = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = switch.local_addr().unwrap();

        let registry = ConnectionRegistry::new(context());
        registry.spawn_client_loop(addr, Duration::from_millis(20));

        let (mut stream, _) = tokio::time::timeout(Duration::from_secs(2), switch.accept())
            .await
            .unwrap()
            .unwrap();

        assert!(registry.stop_client_loop(addr));
        assert!(!registry.stop_client_loop(addr));
        assert!(!registry.is_dialing(addr));

        // 진행 중인 연결은 유지됨
        stream
            .write_all(&OfpCodec.encode(&Message::EchoRequest(Default::default()), 4).unwrap())
            .await
            .unwrap();
        assert_eq!(
            read_message(&mut stream).await,
            Message::EchoReply(Default::default())
        );

        drop(stream);
        let again = tokio::time::timeout(Duration::from_millis(300), switch.accept()).await;
        assert!(again.is_err());
    }
}
