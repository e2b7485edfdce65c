//! MAC 학습 스위치
//!
//! packet-in마다 (dpid, src MAC) -> in_port 를 학습하고,
//! 목적지를 알면 플로우를 설치, 모르면 flood

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::datapath::Datapath;
use crate::flow::{Action, FlowMod, FlowModCommand, MatchRule, OFP_NO_BUFFER};
use crate::message::PacketIn;
use crate::packet::{EthernetFrame, MacAddr};
use crate::Result;

/// 학습된 플로우 우선순위
pub const LEARNED_FLOW_PRIORITY: u16 = 1;

/// dpid -> (MAC -> 포트). dpid를 모르면 0
///
/// 데이터패스 인스턴스의 수신 태스크가 단독으로 소유
pub type MacTable = HashMap<u64, HashMap<MacAddr, u16>>;

/// packet-in 처리
pub async fn handle_packet_in(
    datapath: &Datapath,
    mac_table: &mut MacTable,
    packet_in: PacketIn,
) -> Result<()> {
    let eth = match EthernetFrame::parse(&packet_in.data) {
        Some(eth) => eth,
        None => {
            debug!(
                "packet-in from {} too short for ethernet ({} bytes)",
                datapath.address(),
                packet_in.data.len()
            );
            return Ok(());
        }
    };

    if eth.is_lldp() {
        return Ok(());
    }

    let dpid = datapath.datapath_id().unwrap_or(0);
    let ports = mac_table.entry(dpid).or_default();
    ports.insert(eth.src, packet_in.in_port);
    let learned = ports.get(&eth.dst).copied();

    trace!(
        "packet in {:016x} {} {} {}",
        dpid,
        eth.src,
        eth.dst,
        packet_in.in_port
    );

    match learned {
        Some(out_port) => {
            let actions = vec![Action::output(out_port)];
            let rule = MatchRule::new()
                .in_port(packet_in.in_port)
                .eth_dst(eth.dst)
                .eth_src(eth.src);
            let flow = FlowMod::new(rule, FlowModCommand::Add)
                .priority(LEARNED_FLOW_PRIORITY)
                .buffer_id(packet_in.buffer_id)
                .actions(actions.clone());
            datapath.send_flow_mod(flow).await?;

            // 버퍼링된 패킷은 flow-mod가 처리
            if !packet_in.is_buffered() {
                datapath
                    .send_packet_out(OFP_NO_BUFFER, packet_in.in_port, actions, packet_in.data)
                    .await?;
            }
        }
        None => {
            let data = if packet_in.is_buffered() {
                Default::default()
            } else {
                packet_in.data
            };
            datapath
                .send_packet_out(packet_in.buffer_id, packet_in.in_port, vec![Action::flood()], data)
                .await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datapath::tests::{drain_sent, test_datapath};
    use crate::flow::{OFPP_FLOOD, OFPP_NONE};
    use crate::message::Message;
    use crate::packet::{ETH_TYPE_IP, ETH_TYPE_LLDP};
    use crate::Config;

    const A: MacAddr = MacAddr([0, 0, 0, 0, 0, 0xa]);
    const B: MacAddr = MacAddr([0, 0, 0, 0, 0, 0xb]);

    fn packet_in(src: MacAddr, dst: MacAddr, in_port: u16, buffer_id: u32) -> PacketIn {
        let data = EthernetFrame::build(dst, src, ETH_TYPE_IP, &[0u8; 8]);
        PacketIn {
            buffer_id,
            total_len: data.len() as u16,
            in_port,
            reason: 0,
            data,
        }
    }

    #[tokio::test]
    async fn test_unknown_destination_floods() {
        let dp = test_datapath(Config::default());
        let mut table = MacTable::new();
        let pi = packet_in(A, B, 1, OFP_NO_BUFFER);

        handle_packet_in(&dp, &mut table, pi.clone()).await.unwrap();

        assert_eq!(table[&0].get(&A), Some(&1));
        let sent = drain_sent(&dp);
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].1,
            Message::PacketOut(crate::message::PacketOut {
                buffer_id: OFP_NO_BUFFER,
                in_port: 1,
                actions: vec![Action::output(OFPP_FLOOD)],
                data: pi.data,
            })
        );
    }

    #[tokio::test]
    async fn test_known_destination_installs_flow() {
        let dp = test_datapath(Config::default());
        let mut table = MacTable::new();
        table.entry(0).or_default().insert(B, 2);

        let pi = packet_in(A, B, 1, OFP_NO_BUFFER);
        handle_packet_in(&dp, &mut table, pi.clone()).await.unwrap();

        let sent = drain_sent(&dp);
        assert_eq!(sent.len(), 2);
        match &sent[0].1 {
            Message::FlowMod(flow) => {
                assert_eq!(flow.command, FlowModCommand::Add);
                assert_eq!(
                    flow.rule,
                    MatchRule::new().in_port(1).eth_dst(B).eth_src(A)
                );
                assert_eq!(flow.actions, vec![Action::output(2)]);
                assert_eq!(flow.priority, LEARNED_FLOW_PRIORITY);
                assert_eq!(flow.out_port, OFPP_NONE);
            }
            other => panic!("expected flow mod, got {:?}", other),
        }
        match &sent[1].1 {
            Message::PacketOut(out) => {
                assert_eq!(out.actions, vec![Action::output(2)]);
                assert_eq!(out.data, pi.data);
            }
            other => panic!("expected packet out, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_buffered_packet_needs_no_packet_out() {
        let dp = test_datapath(Config::default());
        let mut table = MacTable::new();
        table.entry(0).or_default().insert(B, 2);

        handle_packet_in(&dp, &mut table, packet_in(A, B, 1, 77)).await.unwrap();

        let sent = drain_sent(&dp);
        assert_eq!(sent.len(), 1);
        match &sent[0].1 {
            Message::FlowMod(flow) => assert_eq!(flow.buffer_id, 77),
            other => panic!("expected flow mod, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_buffered_flood_omits_data() {
        let dp = test_datapath(Config::default());
        let mut table = MacTable::new();

        handle_packet_in(&dp, &mut table, packet_in(A, B, 3, 9)).await.unwrap();

        match &drain_sent(&dp)[..] {
            [(_, Message::PacketOut(out))] => {
                assert_eq!(out.buffer_id, 9);
                assert!(out.data.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lldp_is_ignored() {
        let dp = test_datapath(Config::default());
        let mut table = MacTable::new();
        let data = EthernetFrame::build(B, A, ETH_TYPE_LLDP, &[0u8; 8]);
        let pi = PacketIn {
            buffer_id: OFP_NO_BUFFER,
            total_len: data.len() as u16,
            in_port: 1,
            reason: 0,
            data,
        };

        handle_packet_in(&dp, &mut table, pi).await.unwrap();
        assert!(table.is_empty());
        assert!(dp.send_queue().is_empty());
    }

    #[tokio::test]
    async fn test_tables_are_per_datapath_id() {
        let dp = test_datapath(Config::default());
        let mut table = MacTable::new();
        // 다른 스위치에서 학습한 주소는 사용하지 않음
        table.entry(5).or_default().insert(B, 2);

        handle_packet_in(&dp, &mut table, packet_in(A, B, 1, OFP_NO_BUFFER))
            .await
            .unwrap();

        let sent = drain_sent(&dp);
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].1, Message::PacketOut(_)));
    }
}
