//! Seams the post-unlock steps call into, each with a no-op default so the
//! state machine is testable without a real desktop session, event store,
//! or update pipeline wired up. Production wiring of these is out of scope.

use bastion_api::error::PostUnlockError;

use super::context::UnlockContext;

/// The logged-in desktop session: login password, autologin toggle.
pub trait SessionEnvironment {
    fn set_login_password(&self, ctx: &UnlockContext) -> Result<(), PostUnlockError> {
        let _ = ctx;
        Ok(())
    }

    fn disable_autologin(&self) -> Result<(), PostUnlockError> {
        Ok(())
    }
}

/// Where unlock-lifecycle events get recorded. Deliberately untyped: the
/// post-unlock steps only need "record that this happened", not a typed
/// event schema.
pub trait EventSink {
    fn record(&self, event: &str) {
        log::debug!("unlock event: {event}");
    }
}

/// Software/firmware update orchestration triggered after unlock. A no-op
/// default means "no update pipeline wired up", not "update succeeded".
pub trait UpdatePipeline {
    fn on_unlocked(&self, ctx: &UnlockContext) -> Result<(), PostUnlockError> {
        let _ = ctx;
        Ok(())
    }
}

#[derive(Default)]
pub struct NoopSessionEnvironment;
impl SessionEnvironment for NoopSessionEnvironment {}

#[derive(Default)]
pub struct NoopEventSink;
impl EventSink for NoopEventSink {}

#[derive(Default)]
pub struct NoopUpdatePipeline;
impl UpdatePipeline for NoopUpdatePipeline {}
