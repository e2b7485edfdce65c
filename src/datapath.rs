//! 데이터패스 (스위치 연결 하나)
//!
//! - 수신 태스크: 프레이밍, 디코딩, 디스패치
//! - 송신 태스크: 송신 큐를 소켓으로 배출
//! - 상태 머신: Handshake -> Active -> Dead

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::codec::Codec;
use crate::event::{DatapathEvent, EventBus};
use crate::flow::{Action, FlowFormat, FlowMod, MatchRule};
use crate::framer::Framer;
use crate::learning::{self, MacTable};
use crate::message::{Message, OfpHeader, PacketOut, SwitchConfig, SwitchFeatures};
use crate::send_queue::{SendEntry, SendQueue};
use crate::config::MIN_SEND_QUEUE_CAPACITY;
use crate::{keepalive, Config, Error, Result};

/// 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatapathState {
    /// Hello/Features 교환 중
    Handshake,
    /// 정상 동작
    Active,
    /// 종료 (최종 상태)
    Dead,
}

impl fmt::Display for DatapathState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatapathState::Handshake => write!(f, "handshake"),
            DatapathState::Active => write!(f, "active"),
            DatapathState::Dead => write!(f, "dead"),
        }
    }
}

/// 스위치 연결
pub struct Datapath {
    /// 피어 주소
    address: SocketAddr,

    config: Arc<Config>,

    codec: Arc<dyn Codec>,

    bus: Arc<dyn EventBus>,

    /// 송신 큐
    queue: SendQueue,

    state: watch::Sender<DatapathState>,

    /// 마지막으로 할당한 xid
    xid: AtomicU32,

    /// FeaturesReply 전까지 None
    datapath_id: RwLock<Option<u64>>,

    /// 협상된 플로우 포맷
    flow_format: Mutex<FlowFormat>,

    /// 응답 대기 중인 echo xid
    unreplied_echo: Mutex<VecDeque<u32>>,
}

impl Datapath {
    /// 새 데이터패스 생성 (Handshake 상태로 시작)
    pub fn new(
        address: SocketAddr,
        config: Arc<Config>,
        codec: Arc<dyn Codec>,
        bus: Arc<dyn EventBus>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(DatapathState::Handshake);

        let datapath = Arc::new(Self {
            address,
            queue: SendQueue::new(config.send_queue_capacity.max(MIN_SEND_QUEUE_CAPACITY)),
            config,
            codec,
            bus,
            state,
            xid: AtomicU32::new(rand::random()),
            datapath_id: RwLock::new(None),
            flow_format: Mutex::new(FlowFormat::Standard),
            unreplied_echo: Mutex::new(VecDeque::new()),
        });

        datapath.publish_state(DatapathState::Handshake);
        datapath
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn datapath_id(&self) -> Option<u64> {
        *self.datapath_id.read()
    }

    pub fn flow_format(&self) -> FlowFormat {
        *self.flow_format.lock()
    }

    pub fn send_queue(&self) -> &SendQueue {
        &self.queue
    }

    // ═══════════════════════════════════════════════════════════
    // 상태
    // ═══════════════════════════════════════════════════════════

    pub fn state(&self) -> DatapathState {
        *self.state.borrow()
    }

    pub fn is_dead(&self) -> bool {
        self.state() == DatapathState::Dead
    }

    /// 상태 전이. 실제로 바뀐 경우에만 이벤트 발행
    ///
    /// Dead 이후의 전이는 무시
    pub fn set_state(&self, new_state: DatapathState) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == new_state || *current == DatapathState::Dead {
                return false;
            }
            *current = new_state;
            true
        });

        if changed {
            debug!("datapath {} from {} -> {}", self.label(), self.address, new_state);
            self.publish_state(new_state);
        }
        changed
    }

    /// 연결 종료 요청 (송신 태스크가 큐를 비우고 쓰기 방향을 닫음)
    pub fn close(&self) {
        self.set_state(DatapathState::Dead);
    }

    /// Dead 상태가 될 때까지 대기
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        loop {
            if *rx.borrow_and_update() == DatapathState::Dead {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn publish_state(&self, state: DatapathState) {
        self.bus.publish(DatapathEvent::StateChange {
            address: self.address,
            datapath_id: self.datapath_id(),
            state,
        });
    }

    /// 로그용 식별자
    fn label(&self) -> String {
        match self.datapath_id() {
            Some(id) => format!("{:016x}", id),
            None => "unknown".to_string(),
        }
    }

    // ═══════════════════════════════════════════════════════════
    // 송신
    // ═══════════════════════════════════════════════════════════

    /// 다음 xid 할당 (u32 최대값에서 wrap)
    pub fn set_xid(&self) -> u32 {
        self.xid.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// 인코딩된 버퍼를 송신 큐에 추가 (큐가 가득 차면 대기)
    pub async fn send(&self, buf: Bytes, close_after: bool) -> Result<()> {
        let entry = if close_after {
            SendEntry::closing(buf)
        } else {
            SendEntry::new(buf)
        };
        self.queue.enqueue(entry).await
    }

    /// 새 xid로 메시지 전송
    pub async fn send_msg(&self, msg: Message) -> Result<u32> {
        let xid = self.set_xid();
        self.send_msg_with_xid(msg, xid).await?;
        Ok(xid)
    }

    /// 지정 xid로 메시지 전송
    pub async fn send_msg_with_xid(&self, msg: Message, xid: u32) -> Result<()> {
        let buf = self.codec.encode(&msg, xid)?;
        self.send(buf, false).await
    }

    /// 여러 메시지를 끼어들기 없이 연속 전송
    pub async fn send_batch(&self, msgs: Vec<Message>) -> Result<()> {
        let batch = msgs
            .iter()
            .map(|msg| {
                let buf = self.codec.encode(msg, self.set_xid())?;
                Ok(SendEntry::new(buf))
            })
            .collect::<Result<Vec<_>>>()?;
        self.queue.enqueue_many(batch).await
    }

    /// FlowMod 조립
    ///
    /// 규칙이 요구하는 포맷이 현재 포맷보다 높으면
    /// set-flow-format, barrier를 먼저 넣음. 포맷 자체는 바꾸지 않음
    pub fn compose_flow_mod(&self, flow: FlowMod) -> Vec<Message> {
        let required = flow.rule.flow_format();
        let current = self.flow_format();
        let mut msgs = Vec::with_capacity(3);

        if current < required {
            msgs.push(Message::NxSetFlowFormat(required));
            msgs.push(Message::BarrierRequest);
        }

        msgs.push(match current.max(required) {
            FlowFormat::Standard => Message::FlowMod(flow),
            FlowFormat::ExtendedMatch => Message::NxFlowMod(flow),
        });
        msgs
    }

    /// FlowMod 전송 (필요하면 포맷 협상 포함)
    ///
    /// 협상 메시지가 큐에 들어간 뒤에만 포맷을 올림
    pub async fn send_flow_mod(&self, flow: FlowMod) -> Result<()> {
        let required = flow.rule.flow_format();
        let msgs = self.compose_flow_mod(flow);
        self.send_batch(msgs).await?;

        let mut format = self.flow_format.lock();
        if *format < required {
            *format = required;
        }
        Ok(())
    }

    /// 플로우 삭제
    pub async fn send_flow_del(&self, rule: MatchRule, cookie: u64, out_port: u16) -> Result<()> {
        self.send_flow_mod(FlowMod::delete(rule, cookie, out_port)).await
    }

    /// 모든 플로우 삭제
    pub async fn send_delete_all_flows(&self) -> Result<()> {
        self.send_flow_mod(FlowMod::delete_all()).await
    }

    pub async fn send_packet_out(
        &self,
        buffer_id: u32,
        in_port: u16,
        actions: Vec<Action>,
        data: Bytes,
    ) -> Result<()> {
        let packet_out = PacketOut {
            buffer_id,
            in_port,
            actions,
            data,
        };
        self.send_msg(Message::PacketOut(packet_out)).await?;
        Ok(())
    }

    pub async fn send_barrier(&self) -> Result<u32> {
        self.send_msg(Message::BarrierRequest).await
    }

    /// 플로우 포맷 변경 (이미 같은 포맷이면 아무것도 보내지 않음)
    pub async fn send_set_flow_format(&self, format: FlowFormat) -> Result<()> {
        if self.flow_format() == format {
            return Ok(());
        }
        self.send_msg(Message::NxSetFlowFormat(format)).await?;
        *self.flow_format.lock() = format;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════
    // echo
    // ═══════════════════════════════════════════════════════════

    /// 보낸 echo request xid 기록
    pub fn record_echo_request(&self, xid: u32) {
        self.unreplied_echo.lock().push_back(xid);
    }

    /// echo reply 수신 처리. 기록된 xid였으면 true
    pub fn acknowledge_echo_reply(&self, xid: u32) -> bool {
        let mut unreplied = self.unreplied_echo.lock();
        match unreplied.iter().position(|&x| x == xid) {
            Some(idx) => {
                unreplied.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn unreplied_echo_count(&self) -> usize {
        self.unreplied_echo.lock().len()
    }

    // ═══════════════════════════════════════════════════════════
    // 디스패치
    // ═══════════════════════════════════════════════════════════

    /// 디코딩된 메시지 하나 처리
    ///
    /// 내장 핸들러가 없는 메시지는 이벤트 버스로 전달
    pub async fn dispatch(
        &self,
        header: OfpHeader,
        msg: Message,
        mac_table: &mut MacTable,
    ) -> Result<()> {
        match msg {
            Message::Hello => self.on_hello().await,
            Message::FeaturesReply(features) => self.on_features_reply(features).await,
            Message::EchoRequest(data) => {
                self.send_msg_with_xid(Message::EchoReply(data), header.xid)
                    .await
            }
            Message::EchoReply(_) => {
                self.acknowledge_echo_reply(header.xid);
                Ok(())
            }
            Message::PacketIn(packet_in) => {
                learning::handle_packet_in(self, mac_table, packet_in).await
            }
            message => {
                self.bus.publish(DatapathEvent::Message {
                    address: self.address,
                    datapath_id: self.datapath_id(),
                    state: self.state(),
                    header,
                    message,
                });
                Ok(())
            }
        }
    }

    /// Hello -> Hello, FeaturesRequest, SetConfig
    async fn on_hello(&self) -> Result<()> {
        let config = SwitchConfig {
            flags: 0,
            miss_send_len: self.config.miss_send_len,
        };
        self.send_batch(vec![
            Message::Hello,
            Message::FeaturesRequest,
            Message::SetConfig(config),
        ])
        .await
    }

    /// FeaturesReply -> dpid 기록, Active 전이, PortDescRequest
    async fn on_features_reply(&self, features: SwitchFeatures) -> Result<()> {
        *self.datapath_id.write() = Some(features.datapath_id);
        info!(
            "datapath {:016x} connected from {} ({} ports)",
            features.datapath_id,
            self.address,
            features.ports.len()
        );
        self.set_state(DatapathState::Active);
        self.send_msg(Message::PortDescRequest).await?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════
    // 연결 처리
    // ═══════════════════════════════════════════════════════════

    /// 연결 처리 (연결이 끝날 때까지 반환하지 않음)
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, writer: W)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let send_task = tokio::spawn(self.clone().send_loop(writer));

        let echo_task = if self.config.keepalive_enabled() {
            Some(tokio::spawn(keepalive::echo_loop(
                self.clone(),
                self.config.echo_request_interval,
                self.config.max_unreplied_echo_requests,
            )))
        } else {
            None
        };

        match self.recv_loop(reader).await {
            Ok(()) => debug!("datapath {} from {} receive loop ended", self.label(), self.address),
            Err(Error::QueueClosed) => {}
            Err(e) => warn!("datapath {} from {}: {}", self.label(), self.address, e),
        }

        self.close();
        let _ = send_task.await;
        if let Some(task) = echo_task {
            task.abort();
        }
    }

    async fn recv_loop<R: AsyncRead + Unpin>(&self, mut reader: R) -> Result<()> {
        let mut framer = Framer::with_capacity(self.config.recv_buffer_size);
        let mut buf = vec![0u8; self.config.recv_buffer_size.max(1)];
        let mut mac_table = MacTable::new();
        let yield_threshold = self.config.yield_threshold.max(1);

        while !self.is_dead() {
            let n = tokio::select! {
                read = timeout(self.config.socket_timeout, reader.read(&mut buf)) => match read {
                    // 읽기 타임아웃은 정상 (idle 연결)
                    Err(_) => continue,
                    Ok(Ok(0)) => break,
                    Ok(Ok(n)) => n,
                    Ok(Err(e)) => return Err(e.into()),
                },
                _ = self.closed() => break,
            };

            framer.extend(&buf[..n]);

            let mut handled = 0usize;
            while let Some((header, frame)) = framer.next_frame() {
                let msg = match self.codec.decode(&header, &frame) {
                    Ok(msg) => msg,
                    Err(e) => {
                        error!(
                            "datapath {} from {}: failed to decode message type={} xid={}: {}",
                            self.label(),
                            self.address,
                            header.msg_type,
                            header.xid,
                            e
                        );
                        return Err(e);
                    }
                };

                self.dispatch(header, msg, &mut mac_table).await?;

                handled += 1;
                if handled % yield_threshold == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }

        Ok(())
    }

    async fn send_loop<W: AsyncWrite + Unpin>(self: Arc<Self>, mut writer: W) -> Result<()> {
        let result = loop {
            if self.is_dead() {
                break Ok(());
            }

            let entry = tokio::select! {
                entry = self.queue.dequeue() => match entry {
                    Some(entry) => entry,
                    None => break Ok(()),
                },
                _ = self.closed() => break Ok(()),
            };

            match timeout(self.config.socket_timeout, writer.write_all(&entry.buf)).await {
                Err(_) => {
                    debug!("socket timed out while sending data to switch at {}", self.address);
                    break Err(Error::SocketTimeout);
                }
                Ok(Err(e)) => {
                    debug!(
                        "socket error while sending data to switch at {}: code={:?} {}",
                        self.address,
                        e.raw_os_error(),
                        e
                    );
                    break Err(e.into());
                }
                Ok(Ok(())) => {}
            }

            if entry.close_after {
                debug!("closing connection to {} after flush", self.address);
                self.close();
                break Ok(());
            }
        };

        // 큐를 떼어내 이후 생산자를 거부하고, 대기 중인 생산자를 깨움
        let dropped = self.queue.close();
        if dropped > 0 {
            debug!("dropped {} queued messages for {}", dropped, self.address);
        }
        let _ = writer.shutdown().await;

        if result.is_err() {
            self.close();
        }
        result
    }
}

impl fmt::Debug for Datapath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datapath")
            .field("address", &self.address)
            .field("datapath_id", &self.datapath_id())
            .field("state", &self.state())
            .field("flow_format", &self.flow_format())
            .finish()
    }
}
