//! UDP 전송 어댑터
//!
//! 송신 주소마다 지속되는 세션을 만들어 데이터그램을 바이트 스트림으로 변환.
//! 데이터패스는 TCP와 같은 스트림 인터페이스로 동작하고,
//! 나가는 메시지는 메시지 하나당 데이터그램 하나로 전송.
//! 세션 채널이 가득 차면 그 세션만 닫고, 유휴 세션은 시간이 지나면 종료

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::datapath::Datapath;
use crate::framer::Framer;
use crate::listener::ServeContext;
use crate::Result;

/// 최대 UDP 페이로드
const MAX_DATAGRAM_SIZE: usize = 65535;

/// 송신 주소 하나의 세션
#[derive(Debug)]
struct Session {
    /// 수신 데이터그램을 세션 스트림으로 전달
    tx: mpsc::Sender<Bytes>,

    datapath: Arc<Datapath>,
}

/// UDP 리스너
pub struct UdpListener {
    socket: Arc<UdpSocket>,
    ctx: ServeContext,
    sessions: Arc<DashMap<SocketAddr, Session>>,
}

impl UdpListener {
    pub async fn bind(addr: SocketAddr, ctx: ServeContext) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket: Arc::new(socket),
            ctx,
            sessions: Arc::new(DashMap::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 활성 세션 수
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// 수신 루프
    pub async fn run(self) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let (n, src) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!("udp receive error: {}", e);
                    continue;
                }
            };

            self.deliver(src, Bytes::copy_from_slice(&buf[..n]));
        }
    }

    /// 데이터그램을 세션으로 전달 (대기하지 않음)
    ///
    /// 세션 채널이 가득 차면 그 세션만 닫고 데이터그램은 버림
    fn deliver(&self, src: SocketAddr, datagram: Bytes) {
        let existing = self.sessions.get(&src).map(|s| (s.tx.clone(), s.datapath.clone()));
        let (tx, datapath) = match existing {
            Some(session) => session,
            None => self.open_session(src),
        };

        match tx.try_send(datagram) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("udp session for {} is congested, closing", src);
                self.sessions
                    .remove_if(&src, |_, s| Arc::ptr_eq(&s.datapath, &datapath));
                datapath.close();
            }
            Err(TrySendError::Closed(datagram)) => {
                // 끝난 세션이 아직 맵에 남아 있으면 새 세션으로 교체
                self.sessions
                    .remove_if(&src, |_, s| Arc::ptr_eq(&s.datapath, &datapath));
                let (tx, _) = self.open_session(src);
                if tx.try_send(datagram).is_err() {
                    debug!("datagram from {} dropped", src);
                }
            }
        }
    }

    fn open_session(&self, src: SocketAddr) -> (mpsc::Sender<Bytes>, Arc<Datapath>) {
        info!("new udp session from {}", src);

        let config = &self.ctx.config;
        let idle_timeout = config.udp_session_idle_timeout;
        let (dp_side, pump_side) = tokio::io::duplex(config.recv_buffer_size.max(MAX_DATAGRAM_SIZE));
        let (tx, mut rx) = mpsc::channel::<Bytes>(config.send_queue_capacity.max(1));
        let datapath = self.ctx.datapath(src);
        self.sessions.insert(
            src,
            Session {
                tx: tx.clone(),
                datapath: datapath.clone(),
            },
        );

        let (mut pump_rd, mut pump_wr) = tokio::io::split(pump_side);

        // 데이터그램 -> 스트림
        let idle_datapath = datapath.clone();
        let inbound = tokio::spawn(async move {
            loop {
                let datagram = match tokio::time::timeout(idle_timeout, rx.recv()).await {
                    Ok(Some(datagram)) => datagram,
                    Ok(None) => break,
                    Err(_) => {
                        debug!("udp session for {} idle for {:?}, closing", src, idle_timeout);
                        idle_datapath.close();
                        break;
                    }
                };
                if pump_wr.write_all(&datagram).await.is_err() {
                    break;
                }
            }
        });

        // 스트림 -> 메시지 단위 데이터그램
        let socket = self.socket.clone();
        tokio::spawn(async move {
            let mut framer = Framer::new();
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                let n = match pump_rd.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                framer.extend(&buf[..n]);
                while let Some((_, frame)) = framer.next_frame() {
                    if let Err(e) = socket.send_to(&frame, src).await {
                        debug!("udp send to {} failed: {}", src, e);
                    }
                }
            }
        });

        let sessions = self.sessions.clone();
        let session_datapath = datapath.clone();
        tokio::spawn(async move {
            let (reader, writer) = tokio::io::split(dp_side);
            session_datapath.clone().serve(reader, writer).await;
            sessions.remove_if(&src, |_, s| Arc::ptr_eq(&s.datapath, &session_datapath));
            inbound.abort();
            debug!("udp session for {} closed", src);
        });

        (tx, datapath)
    }
}
