//! Connectivity tracking for the bootstrap session, probed once per tick.

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connectivity {
    #[default]
    Disconnected,
    Connected,
}

/// A change worth acting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// First healthy probe since start or since the last loss.
    Connected,
    /// Unhealthy probe after being connected. The host bootstraps again.
    Lost,
}

impl Connectivity {
    /// Feed one probe result. Only a healthy probe moves `Disconnected` forward and only an
    /// unhealthy one moves `Connected` back, so flapping before the first connect never
    /// triggers a reconnect.
    pub fn observe(&mut self, healthy: bool) -> Option<Transition> {
        match (*self, healthy) {
            (Connectivity::Disconnected, true) => {
                info!("connected to bootstrap node");
                *self = Connectivity::Connected;
                Some(Transition::Connected)
            }
            (Connectivity::Connected, false) => {
                warn!("disconnected from bootstrap node");
                *self = Connectivity::Disconnected;
                Some(Transition::Lost)
            }
            _ => None,
        }
    }

    #[cfg(test)]
    fn is_connected(&self) -> bool {
        *self == Connectivity::Connected
    }
}
