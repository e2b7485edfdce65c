//! OFC 테스트용 가짜 스위치
//!
//! 컨트롤러에 연결(또는 컨트롤러의 능동 연결을 대기)해서 handshake를 수행하고
//! 두 호스트 사이의 packet-in 몇 개를 만들어 학습 스위치 동작을 확인
//!
//! 사용법:
//!   cargo run --release --bin ofc-switch -- [OPTIONS]
//!
//! 예시:
//!   # 컨트롤러에 연결
//!   cargo run --release --bin ofc-switch -- --controller 127.0.0.1:6653
//!
//!   # 컨트롤러의 --switch 연결 대기
//!   cargo run --release --bin ofc-switch -- --listen 127.0.0.1:6633

use std::error::Error;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use ofc::flow::OFP_NO_BUFFER;
use ofc::message::{PacketIn, PhyPort, SwitchFeatures};
use ofc::packet::{EthernetFrame, ETH_TYPE_IP};
use ofc::{parse_switch_address, Codec, Framer, MacAddr, Message, OfpCodec};

/// 스위치 설정
struct SwitchArgs {
    controller: SocketAddr,
    listen: Option<SocketAddr>,
    datapath_id: u64,
    ports: u16,
    packets: usize,
}

impl Default for SwitchArgs {
    fn default() -> Self {
        Self {
            controller: SocketAddr::from(([127, 0, 0, 1], ofc::OFP_TCP_PORT)),
            listen: None,
            datapath_id: 1,
            ports: 3,
            packets: 4,
        }
    }
}

fn parse_args() -> Result<SwitchArgs, Box<dyn Error>> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = SwitchArgs::default();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        let value = args
            .get(i + 1)
            .map(String::as_str)
            .ok_or_else(|| format!("{} 에 값이 필요함", flag));
        match flag {
            "--controller" | "-c" => {
                config.controller = parse_switch_address(value?)?;
                i += 1;
            }
            "--listen" | "-l" => {
                config.listen = Some(parse_switch_address(value?)?);
                i += 1;
            }
            "--dpid" => {
                let raw = value?;
                config.datapath_id = match raw.strip_prefix("0x") {
                    Some(hex) => u64::from_str_radix(hex, 16)?,
                    None => raw.parse()?,
                };
                i += 1;
            }
            "--ports" => {
                config.ports = value?.parse()?;
                i += 1;
            }
            "--packets" => {
                config.packets = value?.parse()?;
                i += 1;
            }
            "--help" | "-h" => {
                println!(
                    r#"OFC Switch - 테스트용 가짜 OpenFlow 스위치

사용법:
  cargo run --release --bin ofc-switch -- [OPTIONS]

옵션:
  -c, --controller <IP:PORT>   연결할 컨트롤러 (기본: 127.0.0.1:6653)
  -l, --listen <IP:PORT>       컨트롤러 연결 대기 (지정하면 --controller 무시)
  --dpid <ID>                  datapath id (10진수 또는 0x 16진수, 기본: 1)
  --ports <N>                  포트 수 (기본: 3)
  --packets <N>                handshake 후 보낼 packet-in 수 (기본: 4)
  -h, --help                   이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            other => return Err(format!("알 수 없는 옵션: {}", other).into()),
        }
        i += 1;
    }

    Ok(config)
}

fn host(n: u8) -> MacAddr {
    MacAddr([0x02, 0, 0, 0, 0, n])
}

/// 두 호스트가 번갈아 보내는 프레임의 packet-in
///
/// 짝수 번째는 host1(port 1) -> host2, 홀수 번째는 host2(port 2) -> host1
fn packet_in(seq: usize) -> PacketIn {
    let (src, dst, in_port) = if seq % 2 == 0 {
        (host(1), host(2), 1)
    } else {
        (host(2), host(1), 2)
    };
    let data = EthernetFrame::build(dst, src, ETH_TYPE_IP, &[0u8; 46]);
    PacketIn {
        buffer_id: OFP_NO_BUFFER,
        total_len: data.len() as u16,
        in_port,
        reason: 0,
        data,
    }
}

async fn run_session(stream: TcpStream, args: &SwitchArgs) -> Result<(), Box<dyn Error>> {
    let codec = OfpCodec::new();
    let (mut reader, mut writer) = stream.into_split();
    let mut xid = 0u32;
    let mut next_xid = || {
        xid = xid.wrapping_add(1);
        xid
    };

    writer.write_all(&codec.encode(&Message::Hello, next_xid())?).await?;

    let mut framer = Framer::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut sent_packets = 0usize;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            info!("controller closed connection");
            return Ok(());
        }
        framer.extend(&buf[..n]);

        while let Some((header, frame)) = framer.next_frame() {
            let msg = codec.decode(&header, &frame)?;
            info!("<- {} (xid={})", msg, header.xid);
            // port-desc 요청이 오면 handshake 완료
            let handshake_done = matches!(msg, Message::PortDescRequest);

            let reply = match msg {
                Message::EchoRequest(data) => {
                    Some(codec.encode(&Message::EchoReply(data), header.xid)?)
                }
                Message::FeaturesRequest => {
                    let features = SwitchFeatures {
                        datapath_id: args.datapath_id,
                        n_buffers: 0,
                        n_tables: 1,
                        capabilities: 0,
                        actions: 1,
                        ports: (1..=args.ports)
                            .map(|port_no| PhyPort {
                                port_no,
                                hw_addr: MacAddr([0x0a, 0, 0, 0, 0, port_no as u8]),
                                name: format!("eth{}", port_no),
                            })
                            .collect(),
                    };
                    Some(codec.encode(&Message::FeaturesReply(features), header.xid)?)
                }
                Message::BarrierRequest => Some(codec.encode(&Message::BarrierReply, header.xid)?),
                _ => None,
            };
            if let Some(reply) = reply {
                writer.write_all(&reply).await?;
            }

            if handshake_done {
                while sent_packets < args.packets {
                    let msg = Message::PacketIn(packet_in(sent_packets));
                    debug!("-> {}", msg);
                    writer.write_all(&codec.encode(&msg, next_xid())?).await?;
                    sent_packets += 1;
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = parse_args()?;
    info!("OFC Switch starting (dpid={:016x})", args.datapath_id);

    let stream = match args.listen {
        Some(addr) => {
            let listener = TcpListener::bind(addr).await?;
            info!("Waiting for controller on {}", addr);
            let (stream, peer) = listener.accept().await?;
            info!("Controller connected from {}", peer);
            stream
        }
        None => {
            info!("Connecting to controller at {}", args.controller);
            TcpStream::connect(args.controller).await?
        }
    };

    tokio::select! {
        result = run_session(stream, &args) => {
            if let Err(e) = result {
                warn!("session error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => info!("Shutting down..."),
    }

    Ok(())
}
