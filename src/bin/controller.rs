//! OFC 컨트롤러
//!
//! 스위치 연결을 받아 handshake, keepalive, 학습 스위치 동작 수행
//!
//! 사용법:
//!   cargo run --release --bin ofc-controller -- [OPTIONS]
//!
//! 예시:
//!   # 기본 포트(6653)에서 대기
//!   cargo run --release --bin ofc-controller
//!
//!   # 스위치 두 대에 능동 연결 + keepalive
//!   cargo run --release --bin ofc-controller -- --switch 10.0.0.1:6633 --switch [fd00::2]:6633 --max-unreplied-echo 3

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ofc::{parse_switch_address, ChannelEventBus, Config, Controller, DatapathEvent};

/// 실행 옵션
struct ControllerArgs {
    verbose: bool,
    config: Config,
}

impl Default for ControllerArgs {
    fn default() -> Self {
        Self {
            verbose: false,
            config: Config::default(),
        }
    }
}

fn next_value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} 에 값이 필요함", flag))
}

fn parse_secs(value: &str, flag: &str) -> Result<Duration, String> {
    value
        .parse::<f64>()
        .ok()
        .filter(|secs| *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .ok_or_else(|| format!("{}: 유효한 초 단위 숫자 필요 ({})", flag, value))
}

fn parse_args() -> Result<ControllerArgs, Box<dyn Error>> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = ControllerArgs::default();
    let config = &mut parsed.config;

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--listen-host" => {
                config.listen_host = next_value(&args, &mut i, flag)?.parse()?;
            }
            "--tcp-port" => {
                let port: u16 = next_value(&args, &mut i, flag)?.parse()?;
                config.tcp_listen_port = (port != 0).then_some(port);
            }
            "--udp-port" => {
                let port: u16 = next_value(&args, &mut i, flag)?.parse()?;
                config.udp_listen_port = (port != 0).then_some(port);
            }
            "--switch" | "-s" => {
                let addr = parse_switch_address(next_value(&args, &mut i, flag)?)?;
                config.switch_addresses.push(addr);
            }
            "--connect-interval" => {
                config.switch_connect_interval = parse_secs(next_value(&args, &mut i, flag)?, flag)?;
            }
            "--socket-timeout" => {
                config.socket_timeout = parse_secs(next_value(&args, &mut i, flag)?, flag)?;
            }
            "--echo-interval" => {
                config.echo_request_interval = parse_secs(next_value(&args, &mut i, flag)?, flag)?;
            }
            "--max-unreplied-echo" => {
                config.max_unreplied_echo_requests = next_value(&args, &mut i, flag)?.parse()?;
            }
            "--verbose" | "-v" => parsed.verbose = true,
            "--help" | "-h" => {
                println!(
                    r#"OFC Controller - OpenFlow 컨트롤러

사용법:
  cargo run --release --bin ofc-controller -- [OPTIONS]

옵션:
  --listen-host <IP>            리스닝 호스트 (기본: 0.0.0.0)
  --tcp-port <PORT>             TCP 리스닝 포트, 0이면 비활성 (기본: 6653)
  --udp-port <PORT>             UDP 리스닝 포트, 0이면 비활성 (기본: 비활성)
  -s, --switch <IP:PORT>        능동 연결할 스위치 (반복 가능, IPv6는 [addr]:port)
  --connect-interval <SECS>     재연결 간격 (기본: 1)
  --socket-timeout <SECS>       소켓 타임아웃 (기본: 5)
  --echo-interval <SECS>        echo request 간격 (기본: 15)
  --max-unreplied-echo <N>      허용 미응답 echo 수, 0이면 keepalive 비활성 (기본: 0)
  -v, --verbose                 debug 로그 출력
  -h, --help                    이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            other => return Err(format!("알 수 없는 옵션: {}", other).into()),
        }
        i += 1;
    }

    Ok(parsed)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args()?;

    // 로깅 설정 (RUST_LOG가 있으면 우선)
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = args.config;
    info!("OFC Controller starting...");
    if let Some(addr) = config.tcp_listen_addr() {
        info!("TCP listen: {}", addr);
    }
    if let Some(addr) = config.udp_listen_addr() {
        info!("UDP listen: {}", addr);
    }
    for addr in &config.switch_addresses {
        info!("Switch: {}", addr);
    }
    if config.keepalive_enabled() {
        info!(
            "Keepalive: every {:?}, max {} unreplied",
            config.echo_request_interval, config.max_unreplied_echo_requests
        );
    }

    let (bus, mut events) = ChannelEventBus::new();
    let controller = Controller::with_bus(config, Arc::new(bus));

    // 이벤트 출력
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                DatapathEvent::StateChange {
                    address,
                    datapath_id,
                    state,
                } => {
                    let dpid = datapath_id
                        .map(|id| format!("{:016x}", id))
                        .unwrap_or_else(|| "unknown".into());
                    info!("[{}] datapath {} -> {}", address, dpid, state);
                }
                DatapathEvent::Message {
                    address, message, ..
                } => {
                    info!("[{}] {}", address, message);
                }
            }
        }
    });

    tokio::select! {
        result = controller.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            controller.registry().stop_all();
        }
    }

    Ok(())
}
