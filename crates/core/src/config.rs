//! 설정 관리: ratecheck.toml 파싱 및 런타임 설정
//!
//! [`RatecheckConfig`]는 하네스 전체 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`RATECHECK_TIMING_CASE_TIMEOUT_SECS=60` 형식)
//! 3. 설정 파일 (`ratecheck.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), ratecheck_core::error::RatecheckError> {
//! use ratecheck_core::config::RatecheckConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = RatecheckConfig::load("ratecheck.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = RatecheckConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, RatecheckError};
use crate::types::{
    ByteSize, DEFAULT_ENTRYPOINT_PORT_BASE, DEFAULT_ROOM_PORT_BASE, RateLimit, TestCase,
    duration_from_secs,
};

/// 허용되는 로그 레벨 (`general.log_level`, `--log-level`)
pub const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// ratecheck 통합 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatecheckConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 역할별 실행 파일 경로
    #[serde(default)]
    pub binaries: BinariesConfig,
    /// 사용자/룸 신원 정보
    #[serde(default)]
    pub identity: IdentityConfig,
    /// 시간 관련 설정
    #[serde(default)]
    pub timing: TimingConfig,
    /// 포트 할당 설정
    #[serde(default)]
    pub ports: PortsConfig,
    /// 판정 기준
    #[serde(default)]
    pub validation: ValidationConfig,
    /// 클라이언트 명령/센티널
    #[serde(default)]
    pub protocol: ProtocolConfig,
    /// 테스트 케이스 목록
    #[serde(default = "default_cases")]
    pub cases: Vec<CaseConfig>,
}

impl Default for RatecheckConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            binaries: BinariesConfig::default(),
            identity: IdentityConfig::default(),
            timing: TimingConfig::default(),
            ports: PortsConfig::default(),
            validation: ValidationConfig::default(),
            protocol: ProtocolConfig::default(),
            cases: default_cases(),
        }
    }
}

impl RatecheckConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, RatecheckError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, RatecheckError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RatecheckError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                RatecheckError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, RatecheckError> {
        toml::from_str(toml_str).map_err(|e| {
            RatecheckError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `RATECHECK_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "RATECHECK_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "RATECHECK_GENERAL_LOG_FORMAT");
        override_path(&mut self.general.work_dir, "RATECHECK_GENERAL_WORK_DIR");

        // Binaries
        override_path(&mut self.binaries.entrypoint, "RATECHECK_BINARIES_ENTRYPOINT");
        override_path(&mut self.binaries.room, "RATECHECK_BINARIES_ROOM");
        override_path(&mut self.binaries.client, "RATECHECK_BINARIES_CLIENT");

        // Identity
        override_string(&mut self.identity.user, "RATECHECK_IDENTITY_USER");
        override_string(&mut self.identity.room, "RATECHECK_IDENTITY_ROOM");
        override_path(
            &mut self.identity.private_key,
            "RATECHECK_IDENTITY_PRIVATE_KEY",
        );
        override_path(&mut self.identity.public_key, "RATECHECK_IDENTITY_PUBLIC_KEY");
        override_string(&mut self.identity.host, "RATECHECK_IDENTITY_HOST");

        // Timing
        override_u64(
            &mut self.timing.readiness_timeout_ms,
            "RATECHECK_TIMING_READINESS_TIMEOUT_MS",
        );
        override_u64(
            &mut self.timing.case_timeout_secs,
            "RATECHECK_TIMING_CASE_TIMEOUT_SECS",
        );
        override_u64(&mut self.timing.cooldown_ms, "RATECHECK_TIMING_COOLDOWN_MS");

        // Validation
        override_f64(
            &mut self.validation.tolerance,
            "RATECHECK_VALIDATION_TOLERANCE",
        );
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), RatecheckError> {
        if !LOG_LEVELS.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", LOG_LEVELS.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        for (field, path) in [
            ("binaries.entrypoint", &self.binaries.entrypoint),
            ("binaries.room", &self.binaries.room),
            ("binaries.client", &self.binaries.client),
            ("identity.private_key", &self.identity.private_key),
            ("identity.public_key", &self.identity.public_key),
        ] {
            if path.as_os_str().is_empty() {
                return Err(invalid(field, "path must not be empty"));
            }
        }

        if self.identity.user.is_empty() || self.identity.room.is_empty() {
            return Err(invalid(
                "identity",
                "user and room names must not be empty",
            ));
        }

        if self.timing.readiness_timeout_ms == 0 {
            return Err(invalid(
                "timing.readiness_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.timing.probe_interval_ms == 0 {
            return Err(invalid(
                "timing.probe_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.timing.case_timeout_secs == 0 {
            return Err(invalid(
                "timing.case_timeout_secs",
                "must be greater than zero",
            ));
        }

        let tolerance = self.validation.tolerance;
        if !(0.0..1.0).contains(&tolerance) {
            return Err(invalid(
                "validation.tolerance",
                "must be in the range [0, 1)",
            ));
        }
        if let Some(factor) = self.validation.max_duration_factor {
            if !factor.is_finite() || factor <= 1.0 {
                return Err(invalid(
                    "validation.max_duration_factor",
                    "must be greater than 1",
                ));
            }
        }

        if self.protocol.sentinel.is_empty() {
            return Err(invalid("protocol.sentinel", "must not be empty"));
        }
        if self.protocol.command.is_empty() {
            return Err(invalid("protocol.command", "must not be empty"));
        }

        if self.cases.is_empty() {
            return Err(invalid("cases", "at least one test case is required"));
        }
        let cases = self.test_cases()?;
        if let Some(factor) = self.validation.max_duration_factor {
            for case in &cases {
                let ceiling = case.expected_duration.as_secs_f64() * factor;
                if Duration::try_from_secs_f64(ceiling).is_err() {
                    return Err(invalid(
                        "validation.max_duration_factor",
                        format!("ceiling for {case} exceeds the supported duration range"),
                    ));
                }
            }
        }

        Ok(())
    }

    /// `[[cases]]` 항목을 검증된 [`TestCase`] 목록으로 변환합니다.
    pub fn test_cases(&self) -> Result<Vec<TestCase>, ConfigError> {
        self.cases.iter().map(CaseConfig::to_test_case).collect()
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> RatecheckError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// fixture 디렉토리를 만들 위치
    pub work_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "pretty".to_owned(),
            work_dir: PathBuf::from("."),
        }
    }
}

/// 역할별 실행 파일 경로
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BinariesConfig {
    pub entrypoint: PathBuf,
    pub room: PathBuf,
    pub client: PathBuf,
}

impl Default for BinariesConfig {
    fn default() -> Self {
        Self {
            entrypoint: PathBuf::from("./unn-entrypoint-bin"),
            room: PathBuf::from("./unn-room-bin"),
            client: PathBuf::from("./unn-client-bin"),
        }
    }
}

/// 사용자/룸 신원 정보
///
/// 사용자와 룸은 같은 공개키를 공유합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// 클라이언트 사용자 이름
    pub user: String,
    /// 룸 이름
    pub room: String,
    /// 룸/클라이언트가 사용하는 개인키
    pub private_key: PathBuf,
    /// fixture에 복사할 공개키 템플릿
    pub public_key: PathBuf,
    /// 역할 프로세스에 접속할 호스트
    pub host: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user: "maurits".to_owned(),
            room: "myroom".to_owned(),
            private_key: PathBuf::from("tests/integration/test_user_key"),
            public_key: PathBuf::from("tests/integration/test_user_key.pub"),
            host: "localhost".to_owned(),
        }
    }
}

/// 역할 프로세스 기동 대기 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupMode {
    /// TCP 접속이 될 때까지 폴링
    Probe,
    /// 고정 지연 후 진행
    Delay,
}

/// 시간 관련 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub startup_mode: StartupMode,
    /// `delay` 모드에서 엔트리포인트 기동 후 대기 (ms)
    pub entrypoint_settle_ms: u64,
    /// `delay` 모드에서 룸 기동 후 대기 (ms)
    pub room_settle_ms: u64,
    /// 클라이언트 기동 후 생존 확인까지 대기 (ms)
    pub client_settle_ms: u64,
    /// 역할별 준비 확인 제한 시간 (ms)
    pub readiness_timeout_ms: u64,
    /// 준비 확인 폴링 간격 (ms)
    pub probe_interval_ms: u64,
    /// 룸 준비 후 엔트리포인트 등록을 기다리는 시간 (ms)
    pub post_ready_settle_ms: u64,
    /// 케이스 전체 제한 시간 (초)
    pub case_timeout_secs: u64,
    /// 연속 케이스 사이 대기 (ms)
    pub cooldown_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            startup_mode: StartupMode::Probe,
            entrypoint_settle_ms: 2000,
            room_settle_ms: 3000,
            client_settle_ms: 3000,
            readiness_timeout_ms: 10_000,
            probe_interval_ms: 100,
            post_ready_settle_ms: 1000,
            case_timeout_secs: 120,
            cooldown_ms: 0,
        }
    }
}

impl TimingConfig {
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn case_timeout(&self) -> Duration {
        Duration::from_secs(self.case_timeout_secs)
    }
}

/// 포트 할당 전략
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortStrategy {
    /// OS가 할당한 임시 포트
    Ephemeral,
    /// 파일 크기 기반 결정적 포트
    Derived,
}

/// 포트 할당 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    pub strategy: PortStrategy,
    pub entrypoint_base: u16,
    pub room_base: u16,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            strategy: PortStrategy::Ephemeral,
            entrypoint_base: DEFAULT_ENTRYPOINT_PORT_BASE,
            room_base: DEFAULT_ROOM_PORT_BASE,
        }
    }
}

/// 판정 기준
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// 예상 시간 대비 허용 오차 (0.2 = 80% 이상이면 통과)
    pub tolerance: f64,
    /// 설정 시 `expected * factor`를 넘으면 실패
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_duration_factor: Option<f64>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.2,
            max_duration_factor: None,
        }
    }
}

/// 클라이언트 명령/센티널
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// 전송 시작을 알리는 출력 문자열
    pub sentinel: String,
    /// 다운로드 명령 (`<command> <filename>`)
    pub command: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            sentinel: "UNN DOWNLOAD READY".to_owned(),
            command: "/get".to_owned(),
        }
    }
}

/// `[[cases]]` 항목
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseConfig {
    /// 페이로드 크기 (예: "50KB")
    pub file_size: String,
    /// 룸 업로드 상한 (예: "10KB")
    pub rate_limit: String,
    /// 예상 시간 (초), 없으면 크기/속도로 계산
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_duration_secs: Option<f64>,
}

impl CaseConfig {
    pub fn to_test_case(&self) -> Result<TestCase, ConfigError> {
        let file_size: ByteSize =
            self.file_size
                .parse()
                .map_err(|reason| ConfigError::InvalidValue {
                    field: "cases.file_size".to_owned(),
                    reason,
                })?;
        let rate_limit: RateLimit =
            self.rate_limit
                .parse()
                .map_err(|reason| ConfigError::InvalidValue {
                    field: "cases.rate_limit".to_owned(),
                    reason,
                })?;
        let expected = self
            .expected_duration_secs
            .map(|secs| duration_from_secs("cases.expected_duration_secs", secs))
            .transpose()?;
        TestCase::new(file_size, rate_limit, expected)
    }
}

fn default_cases() -> Vec<CaseConfig> {
    vec![
        CaseConfig {
            file_size: "50KB".to_owned(),
            rate_limit: "10KB".to_owned(),
            expected_duration_secs: Some(5.0),
        },
        CaseConfig {
            file_size: "150KB".to_owned(),
            rate_limit: "30KB".to_owned(),
            expected_duration_secs: Some(5.0),
        },
    ]
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_path(target: &mut PathBuf, env_key: &str) {
    if let Some(val) = std::env::var_os(env_key) {
        *target = PathBuf::from(val);
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_f64(target: &mut f64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<f64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse f64 from env var, ignoring"
            ),
        }
    }
}
