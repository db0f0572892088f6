//! Scoped ownership of everything one test case acquires.
//!
//! A [`CaseScope`] owns the fixture and the three role processes. Teardown
//! happens once, in [`CaseScope::close`], on every outcome. If the scope is
//! dropped without `close` (panic, or the run future cancelled by Ctrl-C),
//! `Drop` sends kill signals and the fixture removes itself.

use tracing::{debug, warn};

use crate::fixture::Fixture;
use crate::process::{Role, RoleProcess};

pub struct CaseScope {
    fixture: Fixture,
    entrypoint: Option<RoleProcess>,
    room: Option<RoleProcess>,
    client: Option<RoleProcess>,
}

impl CaseScope {
    pub fn new(fixture: Fixture) -> Self {
        Self {
            fixture,
            entrypoint: None,
            room: None,
            client: None,
        }
    }

    pub fn fixture(&self) -> &Fixture {
        &self.fixture
    }

    /// Take ownership of a spawned process and hand back a handle to it.
    pub fn attach(&mut self, process: RoleProcess) -> &mut RoleProcess {
        let slot = self.slot(process.role());
        if slot.is_some() {
            warn!(role = %process.role(), "replacing an attached role process");
        }
        slot.insert(process)
    }

    pub fn process_mut(&mut self, role: Role) -> Option<&mut RoleProcess> {
        self.slot(role).as_mut()
    }

    fn slot(&mut self, role: Role) -> &mut Option<RoleProcess> {
        match role {
            Role::Entrypoint => &mut self.entrypoint,
            Role::Room => &mut self.room,
            Role::Client => &mut self.client,
        }
    }

    /// Kill every attached role and remove the fixture.
    pub async fn close(mut self) {
        for role in [Role::Client, Role::Room, Role::Entrypoint] {
            if let Some(mut process) = self.slot(role).take() {
                process.kill().await;
            }
        }
        if let Err(e) = self.fixture.remove().await {
            warn!(error = %e, "fixture cleanup failed");
        }
        debug!(path = %self.fixture.root().display(), "case scope closed");
    }
}

impl Drop for CaseScope {
    fn drop(&mut self) {
        for role in [Role::Client, Role::Room, Role::Entrypoint] {
            if let Some(process) = self.slot(role).as_mut() {
                debug!(role = %role, "killing role process on scope drop");
                process.start_kill();
            }
        }
        // `fixture` drops after this and removes its tree if still present.
    }
}
