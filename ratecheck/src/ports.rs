//! Port allocation for the entrypoint and room roles.

use std::net::{Ipv4Addr, SocketAddr, TcpListener};

use tracing::debug;

use ratecheck_core::config::{PortStrategy, PortsConfig};
use ratecheck_core::error::CaseError;
use ratecheck_core::types::{PortAssignment, TestCase};

/// Hands out a [`PortAssignment`] per test case.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    config: PortsConfig,
}

impl PortAllocator {
    pub fn new(config: PortsConfig) -> Self {
        Self { config }
    }

    pub fn strategy(&self) -> PortStrategy {
        self.config.strategy
    }

    /// Allocate two distinct ports for `case`.
    pub fn allocate(&self, case: &TestCase) -> Result<PortAssignment, CaseError> {
        let ports = match self.config.strategy {
            PortStrategy::Ephemeral => ephemeral_pair()?,
            PortStrategy::Derived => {
                let ports = PortAssignment::derived(
                    case.file_size,
                    self.config.entrypoint_base,
                    self.config.room_base,
                );
                ensure_free(ports.entrypoint)?;
                ensure_free(ports.room)?;
                ports
            }
        };
        debug!(
            entrypoint = ports.entrypoint,
            room = ports.room,
            strategy = ?self.config.strategy,
            "ports allocated"
        );
        Ok(ports)
    }

    /// Whether two consecutive cases may land on the same ports.
    pub fn may_collide(&self, previous: &TestCase, next: &TestCase) -> bool {
        self.config.strategy == PortStrategy::Derived
            && PortAssignment::may_collide(previous.file_size, next.file_size)
    }
}

/// Ask the OS for two free ports. Both listeners are held until the second is
/// bound so the pair is distinct.
fn ephemeral_pair() -> Result<PortAssignment, CaseError> {
    let first = bind_any()?;
    let second = bind_any()?;
    Ok(PortAssignment {
        entrypoint: local_port(&first)?,
        room: local_port(&second)?,
    })
}

fn bind_any() -> Result<TcpListener, CaseError> {
    TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).map_err(|e| {
        CaseError::PortUnavailable {
            port: 0,
            reason: e.to_string(),
        }
    })
}

fn local_port(listener: &TcpListener) -> Result<u16, CaseError> {
    listener
        .local_addr()
        .map(|addr| addr.port())
        .map_err(|e| CaseError::PortUnavailable {
            port: 0,
            reason: e.to_string(),
        })
}

/// Verify nothing is bound to `port` right now.
fn ensure_free(port: u16) -> Result<(), CaseError> {
    TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
        .map(drop)
        .map_err(|e| CaseError::PortUnavailable {
            port,
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator(strategy: PortStrategy) -> PortAllocator {
        PortAllocator::new(PortsConfig {
            strategy,
            ..PortsConfig::default()
        })
    }

    #[test]
    fn ephemeral_ports_are_distinct_and_nonzero() {
        let case = TestCase::parse_spec("50KB:10KB:5").unwrap();
        let ports = allocator(PortStrategy::Ephemeral).allocate(&case).unwrap();
        assert_ne!(ports.entrypoint, 0);
        assert_ne!(ports.room, 0);
        assert_ne!(ports.entrypoint, ports.room);
    }

    #[test]
    fn derived_port_in_use_is_reported() {
        // Hold an ephemeral port, then point the derived base at it.
        let held = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).unwrap();
        let port = held.local_addr().unwrap().port();
        let allocator = PortAllocator::new(PortsConfig {
            strategy: PortStrategy::Derived,
            entrypoint_base: port,
            room_base: port.wrapping_add(1),
        });
        // 100 KiB -> offset 0
        let case = TestCase::parse_spec("100KB:10KB:5").unwrap();

        match allocator.allocate(&case) {
            Err(CaseError::PortUnavailable { port: p, .. }) => assert_eq!(p, port),
            other => panic!("expected PortUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn collision_only_flagged_for_derived_strategy() {
        let a = TestCase::parse_spec("50KB:10KB:5").unwrap();
        let b = TestCase::parse_spec("150KB:30KB:5").unwrap();
        assert!(allocator(PortStrategy::Derived).may_collide(&a, &b));
        assert!(!allocator(PortStrategy::Ephemeral).may_collide(&a, &b));
    }
}
