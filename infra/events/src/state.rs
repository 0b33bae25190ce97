use crate::error::EventHubError;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of an [`EventHub`](crate::EventHub): `Active -> ShuttingDown -> Disposed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HubState {
    Active,
    ShuttingDown,
    Disposed,
}

impl HubState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Active,
            1 => Self::ShuttingDown,
            _ => Self::Disposed,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::ShuttingDown => 1,
            Self::Disposed => 2,
        }
    }
}

impl fmt::Display for HubState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::ShuttingDown => "shutting_down",
            Self::Disposed => "disposed",
        })
    }
}

#[derive(Debug)]
pub(crate) struct Lifecycle(AtomicU8);

impl Lifecycle {
    pub(crate) const fn new() -> Self {
        Self(AtomicU8::new(HubState::Active.as_u8()))
    }

    pub(crate) fn get(&self) -> HubState {
        HubState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn is_active(&self) -> bool {
        self.get() == HubState::Active
    }

    pub(crate) fn ensure_active(&self) -> Result<(), EventHubError> {
        if self.is_active() { Ok(()) } else { Err(EventHubError::disposed()) }
    }

    /// `Active -> ShuttingDown`. Only one caller can win the transition.
    pub(crate) fn begin_shutdown(&self) -> Result<(), EventHubError> {
        self.0
            .compare_exchange(
                HubState::Active.as_u8(),
                HubState::ShuttingDown.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|_| EventHubError::disposed())
    }

    pub(crate) fn finish(&self) {
        self.0.store(HubState::Disposed.as_u8(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_are_one_way() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.ensure_active().is_ok());

        lifecycle.begin_shutdown().unwrap();
        assert_eq!(lifecycle.get(), HubState::ShuttingDown);
        assert!(lifecycle.ensure_active().unwrap_err().is_disposed());
        assert!(lifecycle.begin_shutdown().is_err());

        lifecycle.finish();
        assert_eq!(lifecycle.get(), HubState::Disposed);
        assert_eq!(lifecycle.get().to_string(), "disposed");
    }
}
