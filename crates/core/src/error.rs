//! 에러 타입: 도메인별 에러 정의
//!
//! 치명적 에러([`RatecheckError`])와 테스트 케이스 단위 실패([`CaseError`])를
//! 구분합니다. 케이스 실패는 해당 케이스만 실패로 기록하고 다음 케이스로 진행합니다.

use std::path::PathBuf;
use std::time::Duration;

/// ratecheck 최상위 에러 타입
///
/// 이 에러가 발생하면 전체 실행이 중단됩니다.
#[derive(Debug, thiserror::Error)]
pub enum RatecheckError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 테스트 환경(fixture) 구성 에러
    #[error("fixture error: {0}")]
    Fixture(#[from] FixtureError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// fixture 구성 에러
#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    /// 공개키 템플릿 파일이 없음
    #[error("credential template not found: {}", path.display())]
    TemplateMissing { path: PathBuf },

    /// 파일 시스템 쓰기/삭제 실패
    #[error("fixture io failed at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 테스트 케이스 단위 실패
///
/// 모든 변형은 해당 케이스에 대해 최종적이며 재시도하지 않습니다.
#[derive(Debug, thiserror::Error)]
pub enum CaseError {
    /// 역할 프로세스 실행 실패
    #[error("failed to spawn {role}: {reason}")]
    Spawn { role: String, reason: String },

    /// 포트를 사용할 수 없음
    #[error("port {port} unavailable: {reason}")]
    PortUnavailable { port: u16, reason: String },

    /// 준비 확인 시간 초과
    #[error("{role} not ready on {addr} within {timeout:?}")]
    NotReady {
        role: String,
        addr: String,
        timeout: Duration,
    },

    /// 서비스 역할이 준비 전에 종료됨
    #[error("{role} exited before becoming ready ({status})")]
    RoleExited {
        role: String,
        status: String,
        output: Vec<String>,
    },

    /// 클라이언트가 명령 전송 전에 종료됨
    #[error("wrapper exited early with {status}")]
    EarlyExit { status: String, output: Vec<String> },

    /// 클라이언트 입력 스트림이 닫힘
    #[error("broken pipe when sending command")]
    BrokenPipe { output: Vec<String> },

    /// 센티널 문자열을 찾지 못함
    #[error("failed to trigger download")]
    TriggerNotDetected { output: Vec<String> },

    /// 케이스 제한 시간 초과
    #[error("transfer did not finish within {after:?}")]
    Timeout { after: Duration, output: Vec<String> },

    /// 전송이 너무 빨라 속도 제한이 동작하지 않음
    #[error(
        "rate limiting is not effective: took {:.2}s, expected at least {:.2}s (~{:.2}s nominal)",
        elapsed.as_secs_f64(),
        threshold.as_secs_f64(),
        expected.as_secs_f64()
    )]
    RateLimitIneffective {
        elapsed: Duration,
        expected: Duration,
        threshold: Duration,
    },

    /// 전송이 허용 상한보다 느림
    #[error(
        "transfer over-throttled: took {:.2}s, ceiling {:.2}s",
        elapsed.as_secs_f64(),
        ceiling.as_secs_f64()
    )]
    OverThrottled { elapsed: Duration, ceiling: Duration },
}

impl CaseError {
    /// 진단용으로 수집된 프로세스 출력
    pub fn captured_output(&self) -> &[String] {
        match self {
            Self::RoleExited { output, .. }
            | Self::EarlyExit { output, .. }
            | Self::BrokenPipe { output }
            | Self::TriggerNotDetected { output }
            | Self::Timeout { output, .. } => output,
            _ => &[],
        }
    }

    /// 짧은 분류 이름 (보고서용)
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "spawn",
            Self::PortUnavailable { .. } => "port_unavailable",
            Self::NotReady { .. } => "not_ready",
            Self::RoleExited { .. } => "role_exited",
            Self::EarlyExit { .. } => "early_exit",
            Self::BrokenPipe { .. } => "broken_pipe",
            Self::TriggerNotDetected { .. } => "trigger_not_detected",
            Self::Timeout { .. } => "timeout",
            Self::RateLimitIneffective { .. } => "rate_limit_ineffective",
            Self::OverThrottled { .. } => "over_throttled",
        }
    }
}
