//! 도메인 타입: 하네스 전역에서 사용되는 공통 타입
//!
//! 바이트 크기/속도 파싱, 테스트 케이스, 포트 할당, 전송 구간을 정의합니다.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::ConfigError;

/// 파생 포트 계산의 기본 엔트리포인트 포트
pub const DEFAULT_ENTRYPOINT_PORT_BASE: u16 = 44322;
/// 파생 포트 계산의 기본 룸 포트
pub const DEFAULT_ROOM_PORT_BASE: u16 = 44323;

/// 바이트 크기 (`"50KB"`, `"1MiB"`, `"512"` 등)
///
/// 단위는 대소문자를 구분하지 않으며 1024 배수입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn bytes(self) -> u64 {
        self.0
    }

    /// KiB 단위 (내림)
    pub fn kib(self) -> u64 {
        self.0 / 1024
    }
}

impl FromStr for ByteSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(s.len());
        let (number, unit) = s.split_at(split);
        if number.is_empty() {
            return Err(format!("'{s}' has no numeric magnitude"));
        }
        let magnitude: f64 = number
            .parse()
            .map_err(|_| format!("'{number}' is not a number"))?;

        let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
            "" | "b" => 1,
            "k" | "kb" | "kib" => 1024,
            "m" | "mb" | "mib" => 1024 * 1024,
            "g" | "gb" | "gib" => 1024 * 1024 * 1024,
            other => return Err(format!("unknown unit '{other}'")),
        };

        Ok(Self((magnitude * multiplier as f64).round() as u64))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1024 && self.0 % 1024 == 0 {
            write!(f, "{}KB", self.0 / 1024)
        } else {
            write!(f, "{}B", self.0)
        }
    }
}

/// 룸의 업로드 속도 상한
///
/// `raw`는 룸 프로세스의 `-max-upload` 플래그로 그대로 전달됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimit {
    pub raw: String,
    pub bytes_per_sec: u64,
}

impl FromStr for RateLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let size: ByteSize = s.parse()?;
        if size.bytes() == 0 {
            return Err(format!("rate '{s}' must be greater than zero"));
        }
        Ok(Self {
            raw: s.trim().to_owned(),
            bytes_per_sec: size.bytes(),
        })
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// 초 단위 값을 [`Duration`]으로 변환합니다.
///
/// 음수, NaN, 무한대, `Duration` 범위를 넘는 값은 `InvalidValue`가 됩니다.
pub fn duration_from_secs(field: &str, secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: format!("{secs} seconds is not a valid duration: {e}"),
    })
}

/// 테스트 케이스 하나
#[derive(Debug, Clone, Serialize)]
pub struct TestCase {
    /// 페이로드 크기 (바이트)
    pub file_size: ByteSize,
    /// 속도 상한
    pub rate_limit: RateLimit,
    /// 예상 전송 시간
    #[serde(serialize_with = "serialize_secs")]
    pub expected_duration: Duration,
}

impl TestCase {
    /// 예상 시간이 없으면 `file_size / rate`로 계산합니다.
    pub fn new(
        file_size: ByteSize,
        rate_limit: RateLimit,
        expected_duration: Option<Duration>,
    ) -> Result<Self, ConfigError> {
        if file_size.bytes() == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cases.file_size".to_owned(),
                reason: "payload must not be empty".to_owned(),
            });
        }
        let expected_duration = match expected_duration {
            Some(d) if d.is_zero() => {
                return Err(ConfigError::InvalidValue {
                    field: "cases.expected_duration_secs".to_owned(),
                    reason: "must be greater than zero".to_owned(),
                });
            }
            Some(d) => d,
            None => duration_from_secs(
                "cases.file_size",
                file_size.bytes() as f64 / rate_limit.bytes_per_sec as f64,
            )?,
        };
        Ok(Self {
            file_size,
            rate_limit,
            expected_duration,
        })
    }

    /// `SIZE:RATE[:SECS]` 형식 파싱 (예: `50KB:10KB:5`)
    pub fn parse_spec(spec: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidValue {
            field: "case".to_owned(),
            reason,
        };
        let parts: Vec<&str> = spec.split(':').collect();
        let (size, rate, secs) = match parts.as_slice() {
            [size, rate] => (*size, *rate, None),
            [size, rate, secs] => (*size, *rate, Some(*secs)),
            _ => return Err(invalid(format!("'{spec}' is not SIZE:RATE[:SECS]"))),
        };
        let size: ByteSize = size.parse().map_err(invalid)?;
        let rate: RateLimit = rate.parse().map_err(invalid)?;
        let expected = secs
            .map(|s| {
                let secs: f64 = s
                    .parse()
                    .map_err(|_| invalid(format!("'{s}' is not a duration in seconds")))?;
                duration_from_secs("case", secs)
            })
            .transpose()?;
        Self::new(size, rate, expected)
    }

    /// 룸이 제공할 페이로드 파일 이름
    pub fn payload_name(&self) -> String {
        format!("test_{}.bin", self.file_size.kib())
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} file with {} limit",
            self.file_size, self.rate_limit
        )
    }
}

/// 케이스 하나에 할당된 포트 쌍
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortAssignment {
    pub entrypoint: u16,
    pub room: u16,
}

impl PortAssignment {
    /// 파일 크기(KiB)의 `mod 100`으로 결정적으로 포트를 계산합니다.
    ///
    /// 같은 나머지를 갖는 케이스는 같은 포트를 받으므로 병렬 실행에 안전하지 않습니다.
    pub fn derived(file_size: ByteSize, entrypoint_base: u16, room_base: u16) -> Self {
        let offset = (file_size.kib() % 100) as u16;
        Self {
            entrypoint: entrypoint_base.saturating_add(offset),
            room: room_base.saturating_add(offset),
        }
    }

    /// 두 크기가 파생 포트 방식에서 충돌할 수 있는지 여부
    pub fn may_collide(a: ByteSize, b: ByteSize) -> bool {
        a.kib() % 100 == b.kib() % 100
    }
}

/// 센티널 감지부터 클라이언트 종료까지의 구간
#[derive(Debug, Clone, Copy)]
pub struct TransferWindow {
    pub start: Instant,
    pub end: Instant,
}

impl TransferWindow {
    pub fn elapsed(&self) -> Duration {
        self.end.saturating_duration_since(self.start)
    }
}

/// 판정 결과 측정값
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Measurement {
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    #[serde(serialize_with = "serialize_secs")]
    pub expected: Duration,
    #[serde(serialize_with = "serialize_secs")]
    pub threshold: Duration,
    /// 진단용 처리량 (bytes/sec)
    pub throughput_bps: f64,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_size_units_are_binary() {
        assert_eq!("50KB".parse::<ByteSize>().unwrap().bytes(), 51_200);
        assert_eq!("150kb".parse::<ByteSize>().unwrap().bytes(), 153_600);
        assert_eq!("1MiB".parse::<ByteSize>().unwrap().bytes(), 1_048_576);
        assert_eq!("512".parse::<ByteSize>().unwrap().bytes(), 512);
        assert_eq!("1.5K".parse::<ByteSize>().unwrap().bytes(), 1536);
    }

    #[test]
    fn byte_size_rejects_garbage() {
        assert!("".parse::<ByteSize>().is_err());
        assert!("KB".parse::<ByteSize>().is_err());
        assert!("10XB".parse::<ByteSize>().is_err());
        assert!("-5KB".parse::<ByteSize>().is_err());
    }

    #[test]
    fn rate_limit_keeps_raw_flag_value() {
        let rate: RateLimit = " 30KB ".parse().unwrap();
        assert_eq!(rate.raw, "30KB");
        assert_eq!(rate.bytes_per_sec, 30_720);
        assert!("0KB".parse::<RateLimit>().is_err());
    }

    #[test]
    fn expected_duration_derived_from_rate() {
        let case = TestCase::parse_spec("150KB:30KB").unwrap();
        assert_eq!(case.expected_duration, Duration::from_secs(5));
        assert_eq!(case.payload_name(), "test_150.bin");
    }

    #[test]
    fn explicit_expected_duration_wins() {
        let case = TestCase::parse_spec("50KB:10KB:7.5").unwrap();
        assert_eq!(case.expected_duration, Duration::from_millis(7500));
    }

    #[test]
    fn case_spec_errors() {
        assert!(TestCase::parse_spec("50KB").is_err());
        assert!(TestCase::parse_spec("0:10KB").is_err());
        assert!(TestCase::parse_spec("50KB:10KB:0").is_err());
        assert!(TestCase::parse_spec("50KB:10KB:soon").is_err());
        assert!(TestCase::parse_spec("50KB:10KB:5:9").is_err());
    }

    #[test]
    fn derived_ports_use_kib_modulo() {
        let ports = PortAssignment::derived(ByteSize(50 * 1024), 44322, 44323);
        assert_eq!(ports.entrypoint, 44372);
        assert_eq!(ports.room, 44373);

        let ports = PortAssignment::derived(ByteSize(150 * 1024), 44322, 44323);
        assert_eq!(ports.entrypoint, 44372);
    }

    #[test]
    fn derived_ports_collide_on_same_remainder() {
        assert!(PortAssignment::may_collide(
            ByteSize(50 * 1024),
            ByteSize(150 * 1024)
        ));
        assert!(!PortAssignment::may_collide(
            ByteSize(50 * 1024),
            ByteSize(51 * 1024)
        ));
    }

    #[test]
    fn oversized_expected_duration_is_rejected() {
        let err = TestCase::parse_spec("50KB:10KB:1e30").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "case"));
        assert!(TestCase::parse_spec("50KB:10KB:-1").is_err());
        assert!(TestCase::parse_spec("50KB:10KB:NaN").is_err());
    }

    #[test]
    fn oversized_payload_duration_is_rejected() {
        // 바이트 크기가 u64 최대로 포화되어 초 단위 값이 Duration 범위를 넘습니다.
        let err = TestCase::parse_spec("99999999999999999999999:1").unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "cases.file_size"),
            "{err:?}"
        );
    }

    #[test]
    fn duration_from_secs_accepts_fractions() {
        assert_eq!(
            duration_from_secs("case", 1.5).unwrap(),
            Duration::from_millis(1500)
        );
        assert!(duration_from_secs("case", f64::INFINITY).is_err());
    }

    #[test]
    fn transfer_window_never_negative() {
        let now = Instant::now();
        let window = TransferWindow {
            start: now + Duration::from_secs(1),
            end: now,
        };
        assert_eq!(window.elapsed(), Duration::ZERO);
    }
}
