//! echo keepalive
//!
//! 주기적으로 echo request를 보내고, 응답 없는 요청이
//! 최대값을 넘으면 연결을 닫음

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::datapath::Datapath;
use crate::message::Message;
use crate::{Error, Result};

/// 데이터패스 하나에 묶인 echo 루프
///
/// max_unreplied가 0이면 즉시 반환
pub async fn echo_loop(datapath: Arc<Datapath>, interval: Duration, max_unreplied: usize) -> Result<()> {
    if max_unreplied == 0 {
        return Ok(());
    }

    while !datapath.is_dead() && datapath.unreplied_echo_count() <= max_unreplied {
        let xid = datapath.set_xid();
        datapath.record_echo_request(xid);

        match datapath
            .send_msg_with_xid(Message::EchoRequest(Bytes::new()), xid)
            .await
        {
            Ok(()) => {}
            Err(Error::QueueClosed) => return Ok(()),
            Err(e) => return Err(e),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = datapath.closed() => return Ok(()),
        }
    }

    let unreplied = datapath.unreplied_echo_count();
    if datapath.is_dead() {
        debug!("echo loop for {} stopped", datapath.address());
        return Ok(());
    }

    warn!(
        "datapath {:?} at {}: {} echo requests unreplied, closing",
        datapath.datapath_id(),
        datapath.address(),
        unreplied
    );
    datapath.close();
    Err(Error::KeepaliveExpired { unreplied })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datapath::tests::{drain_sent, test_datapath};
    use crate::datapath::DatapathState;
    use crate::Config;

    #[tokio::test]
    async fn test_disabled_returns_immediately() {
        let dp = test_datapath(Config::default());
        echo_loop(dp.clone(), Duration::from_millis(1), 0).await.unwrap();
        assert!(dp.send_queue().is_empty());
        assert_eq!(dp.state(), DatapathState::Handshake);
    }

    #[tokio::test]
    async fn test_unreplied_echo_closes_datapath() {
        let config = Config {
            send_queue_capacity: 64,
            ..Config::lab()
        };
        let dp = test_datapath(config);

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            echo_loop(dp.clone(), Duration::from_millis(5), 2),
        )
        .await
        .unwrap();

        assert!(matches!(result, Err(Error::KeepaliveExpired { unreplied: 3 })));
        assert!(dp.is_dead());

        let sent = drain_sent(&dp);
        assert_eq!(sent.len(), 3);
        assert!(sent
            .iter()
            .all(|(_, msg)| *msg == Message::EchoRequest(Bytes::new())));
    }

    #[tokio::test]
    async fn test_replies_keep_connection_alive() {
        let dp = test_datapath(Config::default());
        let task = tokio::spawn(echo_loop(dp.clone(), Duration::from_millis(5), 5));

        // 송신 태스크 대신 요청마다 응답 처리
        for _ in 0..10 {
            let entry = loop {
                if let Some(entry) = dp.send_queue().try_dequeue() {
                    break entry;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            };
            let xid = u32::from_be_bytes([entry.buf[4], entry.buf[5], entry.buf[6], entry.buf[7]]);
            assert!(dp.acknowledge_echo_reply(xid));
        }
        assert!(!dp.is_dead());

        dp.close();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
