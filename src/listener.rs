//! 리스너와 컨트롤러
//!
//! - TCP accept 루프: 연결마다 데이터패스 생성
//! - UDP 리스너 (선택)
//! - 설정된 스위치로의 능동 연결

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::codec::{Codec, OfpCodec};
use crate::datapath::Datapath;
use crate::event::EventBus;
use crate::registry::ConnectionRegistry;
use crate::udp::UdpListener;
use crate::{Config, Result};

/// 데이터패스 생성에 필요한 공유 컴포넌트
#[derive(Clone)]
pub struct ServeContext {
    pub config: Arc<Config>,
    pub codec: Arc<dyn Codec>,
    pub bus: Arc<dyn EventBus>,
}

impl ServeContext {
    pub fn new(config: Config, codec: Arc<dyn Codec>, bus: Arc<dyn EventBus>) -> Self {
        Self {
            config: Arc::new(config),
            codec,
            bus,
        }
    }

    /// 피어 주소에 대한 새 데이터패스
    pub fn datapath(&self, address: SocketAddr) -> Arc<Datapath> {
        Datapath::new(address, self.config.clone(), self.codec.clone(), self.bus.clone())
    }

    /// TCP 연결 하나 처리 (연결이 끝날 때까지 대기)
    pub async fn serve_tcp(&self, stream: TcpStream, address: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed for {}: {}", address, e);
        }
        let (reader, writer) = stream.into_split();
        self.datapath(address).serve(reader, writer).await;
        debug!("connection to {} finished", address);
    }
}

/// TCP accept 루프
pub async fn accept_loop(listener: TcpListener, ctx: ServeContext) -> Result<()> {
    loop {
        let (stream, address) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                // EMFILE 등 일시적 에러로 리스너를 내리지 않음
                warn!("accept error: {}", e);
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                continue;
            }
        };

        info!("connected socket from {}", address);
        let ctx = ctx.clone();
        tokio::spawn(async move {
            ctx.serve_tcp(stream, address).await;
        });
    }
}

/// 컨트롤러 (리스너 + 능동 연결)
pub struct Controller {
    ctx: ServeContext,
    registry: Arc<ConnectionRegistry>,
}

impl Controller {
    pub fn new(config: Config, codec: Arc<dyn Codec>, bus: Arc<dyn EventBus>) -> Self {
        let ctx = ServeContext::new(config, codec, bus);
        Self {
            registry: ConnectionRegistry::new(ctx.clone()),
            ctx,
        }
    }

    /// OpenFlow 1.0 코덱을 쓰는 컨트롤러
    pub fn with_bus(config: Config, bus: Arc<dyn EventBus>) -> Self {
        Self::new(config, Arc::new(OfpCodec), bus)
    }

    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    pub fn context(&self) -> &ServeContext {
        &self.ctx
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// 리스너와 재연결 루프 실행
    ///
    /// 리스너가 하나도 없으면 재연결 루프만 돌리며 반환하지 않음
    pub async fn run(&self) -> Result<()> {
        let config = self.ctx.config.clone();
        config.validate()?;

        for &addr in &config.switch_addresses {
            self.registry
                .spawn_client_loop(addr, config.switch_connect_interval);
        }

        let tcp = match config.tcp_listen_addr() {
            Some(addr) => {
                let listener = TcpListener::bind(addr).await?;
                info!("listening on {} (tcp)", listener.local_addr()?);
                Some(tokio::spawn(accept_loop(listener, self.ctx.clone())))
            }
            None => None,
        };

        let udp = match config.udp_listen_addr() {
            Some(addr) => {
                let listener = UdpListener::bind(addr, self.ctx.clone()).await?;
                info!("listening on {} (udp)", listener.local_addr()?);
                Some(tokio::spawn(listener.run()))
            }
            None => None,
        };

        let result = match (tcp, udp) {
            (Some(tcp), Some(udp)) => {
                let (tcp, udp) = tokio::join!(tcp, udp);
                flatten(tcp).and(flatten(udp))
            }
            (Some(task), None) | (None, Some(task)) => flatten(task.await),
            (None, None) => {
                std::future::pending::<()>().await;
                Ok(())
            }
        };

        self.registry.stop_all();
        result
    }
}

fn flatten(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(std::io::Error::new(std::io::ErrorKind::Other, e).into()),
    }
}
