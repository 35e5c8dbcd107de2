//! Change-tracked outbound parameters
//!
//! Derived state is republished every few hundred milliseconds; wrapping
//! each outbound address in a [`ChangeTracked`] keeps redundant values off
//! the wire.

use super::transport::OscTransport;
use super::types::OscArg;

/// An outbound parameter address paired with the last value sent for it.
#[derive(Debug, Clone)]
pub struct ChangeTracked<T> {
    address: String,
    value: T,
    dirty: bool,
}

impl<T> ChangeTracked<T>
where
    T: Clone + PartialEq + Into<OscArg>,
{
    /// A fresh parameter is dirty so the first flush publishes the initial
    /// state.
    pub fn new(address: impl Into<String>, initial: T) -> Self {
        Self {
            address: address.into(),
            value: initial,
            dirty: true,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// Update the value; marks the parameter dirty only when it changed.
    pub fn set(&mut self, value: T) {
        if value != self.value {
            self.value = value;
            self.dirty = true;
        }
    }

    /// Force the next flush to resend even an unchanged value. Used after
    /// an avatar change when the remote side has lost all state.
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    /// Send the value if it changed since the last flush.
    pub fn flush(&mut self, transport: &OscTransport) {
        if self.dirty {
            transport.send_game(self.address.clone(), vec![self.value.clone().into()]);
            self.dirty = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_tracks_changes_only() {
        let mut param = ChangeTracked::new("/avatar/parameters/ShockOsc/Leg_Active", false);
        assert!(param.dirty);
        param.dirty = false;

        param.set(false);
        assert!(!param.dirty, "unchanged value must not re-dirty");

        param.set(true);
        assert!(param.dirty);
        assert!(*param.value());
    }

    #[test]
    fn invalidate_forces_resend() {
        let mut param = ChangeTracked::new("/x", 0.5f32);
        param.dirty = false;
        param.invalidate();
        assert!(param.dirty);
    }
}
