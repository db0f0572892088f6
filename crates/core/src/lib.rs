//! ratecheck 공통 크레이트
//!
//! 설정, 에러 분류, 도메인 타입을 제공합니다.
//! 하네스 본체(`ratecheck`)는 이 크레이트의 타입만 사용해 케이스를 기술합니다.

pub mod config;
pub mod error;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{CaseError, ConfigError, FixtureError, RatecheckError};

// 설정
pub use config::{PortStrategy, RatecheckConfig, StartupMode};

// 도메인 타입
pub use types::{ByteSize, Measurement, PortAssignment, RateLimit, TestCase, TransferWindow};
