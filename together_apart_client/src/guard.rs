// Echo guard: suppression of local notifications caused by remote actions.
//
// When a remote `sync` is applied, the player emits the same notifications a
// user action would (`play`, `pause`, `seeked`). The guard marks that window so
// the controller does not send those notifications back out.
//
// Transitions:
// - `arm`: a remote action is about to be applied. Starts a new generation;
//   any earlier arming (and its timeout) is superseded. Last writer wins.
// - `clear`: a completion event (`seeked`) or a skipped seek ends the window.
// - `expire(token)`: the timeout fired. Only clears if `token` is still the
//   current generation, so a late timeout from an earlier arming cannot end a
//   window that a later remote action opened.
//
// The guard owns the timeout's `TimerHandle`; clearing or re-arming drops it,
// which cancels the pending timer.

use together_apart_protocol::ActionKind;

use crate::timer::TimerHandle;

/// Identifies one arming of the guard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GuardToken(u64);

#[derive(Debug)]
struct Armed {
    token: GuardToken,
    action: ActionKind,
    timeout: Option<TimerHandle>,
}

#[derive(Debug, Default)]
pub struct EchoGuard {
    armed: Option<Armed>,
    generation: u64,
}

impl EchoGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// The remote action currently being suppressed, if any.
    pub fn armed_for(&self) -> Option<ActionKind> {
        self.armed.as_ref().map(|armed| armed.action)
    }

    pub fn arm(&mut self, action: ActionKind) -> GuardToken {
        self.generation += 1;
        let token = GuardToken(self.generation);
        self.armed = Some(Armed {
            token,
            action,
            timeout: None,
        });
        token
    }

    /// Attach the timeout for arming `token`. If the guard has moved on, the
    /// handle is dropped and the timer cancelled.
    pub fn set_timeout(&mut self, token: GuardToken, timeout: TimerHandle) {
        match self.armed.as_mut() {
            Some(armed) if armed.token == token => armed.timeout = Some(timeout),
            _ => drop(timeout),
        }
    }

    /// End the current window. Returns whether the guard was armed.
    pub fn clear(&mut self) -> bool {
        self.armed.take().is_some()
    }

    /// End the window opened by `token`, if it is still the current one.
    pub fn expire(&mut self, token: GuardToken) -> bool {
        if self.armed.as_ref().is_some_and(|armed| armed.token == token) {
            self.armed = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::{ManualScheduler, Scheduler};
    use std::time::Duration;

    #[test]
    fn arm_and_clear() {
        let mut guard = EchoGuard::new();
        assert!(!guard.is_armed());
        guard.arm(ActionKind::Play);
        assert!(guard.is_armed());
        assert_eq!(guard.armed_for(), Some(ActionKind::Play));
        assert!(guard.clear());
        assert!(!guard.is_armed());
        assert!(!guard.clear());
    }

    #[test]
    fn stale_token_does_not_expire_newer_arming() {
        let mut guard = EchoGuard::new();
        let first = guard.arm(ActionKind::Seek);
        let second = guard.arm(ActionKind::Pause);
        assert!(!guard.expire(first));
        assert!(guard.is_armed());
        assert_eq!(guard.armed_for(), Some(ActionKind::Pause));
        assert!(guard.expire(second));
        assert!(!guard.is_armed());
    }

    #[test]
    fn clearing_cancels_timeout() {
        let scheduler = ManualScheduler::new();
        let mut guard = EchoGuard::new();
        let token = guard.arm(ActionKind::Seek);
        guard.set_timeout(token, scheduler.schedule(Duration::from_millis(100), Box::new(|| {})));
        assert_eq!(scheduler.pending(), 1);
        guard.clear();
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn rearming_cancels_previous_timeout() {
        let scheduler = ManualScheduler::new();
        let mut guard = EchoGuard::new();
        let first = guard.arm(ActionKind::Play);
        guard.set_timeout(first, scheduler.schedule(Duration::from_millis(100), Box::new(|| {})));
        let second = guard.arm(ActionKind::Pause);
        assert_eq!(scheduler.pending(), 0);
        guard.set_timeout(second, scheduler.schedule(Duration::from_millis(100), Box::new(|| {})));
        assert_eq!(scheduler.pending(), 1);
    }

    #[test]
    fn timeout_for_superseded_token_is_dropped() {
        let scheduler = ManualScheduler::new();
        let mut guard = EchoGuard::new();
        let first = guard.arm(ActionKind::Play);
        let _second = guard.arm(ActionKind::Pause);
        guard.set_timeout(first, scheduler.schedule(Duration::from_millis(100), Box::new(|| {})));
        assert_eq!(scheduler.pending(), 0);
    }
}
