//! What the LED shows for each domain state and lifecycle event

use std::time::Duration;

use virt_rpc::{DomainEventType, DomainState};

use crate::led::LedState;

const OFF_STATE_TTL: Duration = Duration::from_secs(4);

pub const VM_RUNNING: LedState = LedState::GREEN;
pub const VM_PAUSED: LedState = LedState::solid(true, true, false)
    .flashing(Duration::from_secs(1))
    .expiring(OFF_STATE_TTL);
pub const VM_CRASHED: LedState = LedState::RED
    .flashing(Duration::from_millis(200))
    .expiring(OFF_STATE_TTL);
pub const VM_OFF: LedState = LedState::RED.expiring(OFF_STATE_TTL);

/// LED for a domain state; `None` for states that show nothing
pub fn state_led(state: DomainState) -> Option<LedState> {
    match state {
        DomainState::Running => Some(VM_RUNNING),
        DomainState::Paused | DomainState::PmSuspended => Some(VM_PAUSED),
        DomainState::Shutdown | DomainState::Shutoff => Some(VM_OFF),
        DomainState::Crashed => Some(VM_CRASHED),
        DomainState::NoState | DomainState::Blocked => None,
    }
}

/// LED for a lifecycle event; `None` for events that are only logged
pub fn event_led(event: DomainEventType) -> Option<LedState> {
    match event {
        DomainEventType::Started | DomainEventType::Resumed => Some(VM_RUNNING),
        DomainEventType::Suspended | DomainEventType::PmSuspended => Some(VM_PAUSED),
        DomainEventType::Stopped | DomainEventType::Shutdown => Some(VM_OFF),
        DomainEventType::Crashed => Some(VM_CRASHED),
        DomainEventType::Defined | DomainEventType::Undefined => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mapping() {
        assert_eq!(state_led(DomainState::Running), Some(LedState::GREEN));
        assert_eq!(
            state_led(DomainState::PmSuspended),
            state_led(DomainState::Paused)
        );
        assert_eq!(state_led(DomainState::Shutoff), Some(VM_OFF));
        assert_eq!(state_led(DomainState::Blocked), None);

        let paused = VM_PAUSED;
        assert!(paused.red && paused.green && !paused.blue);
        assert_eq!(paused.flash, Duration::from_secs(1));
        assert_eq!(paused.ttl, Duration::from_secs(4));

        assert!(!VM_OFF.is_flashing());
        assert_eq!(VM_CRASHED.flash, Duration::from_millis(200));
    }

    #[test]
    fn test_event_mapping() {
        assert_eq!(event_led(DomainEventType::Resumed), Some(VM_RUNNING));
        assert_eq!(event_led(DomainEventType::Shutdown), Some(VM_OFF));
        assert_eq!(event_led(DomainEventType::Crashed), Some(VM_CRASHED));
        assert_eq!(event_led(DomainEventType::Defined), None);
    }
}
