//! Optimistic state store for machine control panels.
//!
//! A machine controller pushes authoritative full-state snapshots, without
//! request/response correlation. To keep controls responsive, a setpoint
//! change is applied locally as a speculative *overlay* before the controller
//! confirms it; the next snapshot arrival resolves the overlay, whatever it
//! contains.
//!
//! One [`Optimistic`] instance is created per logical state object. It holds
//! at most one canonical value and at most one overlay value; consumers only
//! ever see the *effective* value (overlay if present, else canonical) plus a
//! `provisional` flag.
//!
//! There is no correlation identifier tying a mutation to the snapshot that
//! confirms it: a snapshot unrelated to the outstanding mutation resolves it
//! all the same (latest wins). Callers that need to react to a rejected
//! command must do so from the command response path, not from here.

use thiserror::Error;

/// Lifecycle of a single logical state object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No canonical snapshot has ever been received. The effective value is
    /// absent and must not be treated as authoritative.
    Uninitialized,
    /// Canonical state present, no outstanding overlay.
    Synced,
    /// An overlay is outstanding, awaiting the next snapshot arrival.
    Pending,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutateError {
    #[error("no canonical state received yet")]
    Uninitialized,
    #[error("a mutation is already outstanding")]
    MutationPending,
}

/// Read-only projection of the store, the entire surface a view layer needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection<'a, T> {
    /// Overlay if present, else canonical. `None` only while uninitialized.
    pub effective: Option<&'a T>,
    /// True while the shown value has not been confirmed by the controller.
    pub provisional: bool,
    /// True once at least one canonical snapshot has been received.
    pub initialized: bool,
}

/// Holds the last canonical snapshot and at most one speculative overlay.
#[derive(Debug, Clone)]
pub struct Optimistic<T> {
    canonical: Option<T>,
    overlay: Option<T>,
}

impl<T> Default for Optimistic<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Optimistic<T> {
    pub fn new() -> Self {
        Self {
            canonical: None,
            overlay: None,
        }
    }

    /// Replaces the canonical state wholesale and resolves any outstanding
    /// overlay. Snapshots are never merged field-by-field with an overlay.
    pub fn set_canonical(&mut self, snapshot: T) {
        self.canonical.replace(snapshot);
        self.overlay.take();
    }

    /// Replaces the overlay. Callers must uphold the single-outstanding-
    /// mutation rule; [`Optimistic::try_mutate`] enforces it.
    pub fn set_optimistic(&mut self, overlay: T) {
        self.overlay.replace(overlay);
    }

    /// Drops the outstanding overlay, if any, reverting the effective value
    /// to the canonical state. Used when a command is reported as failed
    /// before the next snapshot arrives.
    pub fn clear_optimistic(&mut self) -> Option<T> {
        self.overlay.take()
    }

    /// Overlay if present, else canonical.
    pub fn effective(&self) -> Option<&T> {
        self.overlay
            .as_ref()
            .or(self.canonical.as_ref())
    }

    pub fn is_provisional(&self) -> bool {
        self.overlay.is_some()
    }

    pub fn is_initialized(&self) -> bool {
        self.canonical.is_some()
    }

    pub fn sync_state(&self) -> SyncState {
        match (&self.canonical, &self.overlay) {
            (None, _) => SyncState::Uninitialized,
            (Some(_), None) => SyncState::Synced,
            (Some(_), Some(_)) => SyncState::Pending,
        }
    }

    pub fn read(&self) -> Projection<'_, T> {
        Projection {
            effective: self.effective(),
            provisional: self.is_provisional(),
            initialized: self.is_initialized(),
        }
    }
}

impl<T: Clone> Optimistic<T> {
    /// Derives a new overlay by applying `transform` to a clone of the
    /// current effective value.
    ///
    /// Rejected while a mutation is already outstanding (overlays are
    /// single-shot, never stacked) and while uninitialized (there is no
    /// value to transform). The overlay is structurally independent of the
    /// canonical state after this call.
    pub fn try_mutate(&mut self, transform: impl FnOnce(&mut T)) -> Result<(), MutateError> {
        if self.overlay.is_some() {
            return Err(MutateError::MutationPending);
        }

        let mut overlay = self
            .canonical
            .as_ref()
            .ok_or(MutateError::Uninitialized)?
            .clone();
        transform(&mut overlay);

        self.set_optimistic(overlay);

        Ok(())
    }
}
