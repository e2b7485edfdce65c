//! 에러 타입 정의

use thiserror::Error;

/// OFC 컨트롤러 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("유효하지 않은 IP 주소/포트 쌍: \"{0}\"")]
    InvalidAddress(String),

    #[error("메시지 디코딩 실패: msg_type={msg_type}, {reason}")]
    Decode { msg_type: u8, reason: String },

    #[error("유효하지 않은 프로토콜 버전: expected {expected}, got {got}")]
    UnsupportedVersion { expected: u8, got: u8 },

    #[error("소켓 타임아웃")]
    SocketTimeout,

    #[error("송신 큐 닫힘")]
    QueueClosed,

    #[error("잘못된 설정: {0}")]
    InvalidConfig(String),

    #[error("echo 응답 없음: unreplied={unreplied}")]
    KeepaliveExpired { unreplied: usize },

    #[error("메시지 길이 {len} 가 최대값 초과")]
    MessageTooLarge { len: usize },

    #[error("배치 크기 {size}가 송신 큐 용량 {capacity} 초과")]
    BatchTooLarge { size: usize, capacity: usize },
}

impl Error {
    /// 디코딩 에러 생성 헬퍼
    pub fn decode(msg_type: u8, reason: impl Into<String>) -> Self {
        Error::Decode {
            msg_type,
            reason: reason.into(),
        }
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
