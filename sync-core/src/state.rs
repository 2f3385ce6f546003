//! Coordinator state machine for quotesync.
//!
//! This module provides a pure, side-effect-free state machine for the sync
//! coordinator lifecycle. The state machine takes events as input and produces
//! a new state plus a list of actions to execute.
//!
//! The actual I/O (talking to the remote session, writing the local cache) is
//! performed by sync-client, not by this module.

use quotesync_types::AccountChange;

/// Coordinator state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CoordinatorState {
    /// No remote session yet.
    #[default]
    Uninitialized,
    /// Session open, idle.
    Ready,
    /// An outbound round trip is in flight.
    SendingBatch,
    /// Remote changes are being fetched or applied.
    ApplyingRemoteDelta,
    /// The account signed out or switched; waiting for a fresh sign-in.
    Disabled,
}

impl CoordinatorState {
    /// Create a new state machine in the Uninitialized state.
    pub fn new() -> Self {
        Self::Uninitialized
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (sync-client)
    /// is responsible for executing the returned actions in order.
    pub fn on_event(self, event: Event) -> (Self, Vec<Action>) {
        match (self, event) {
            // Session lifecycle
            (Self::Uninitialized, Event::SessionOpened) => (Self::Ready, vec![]),
            (state, Event::SessionOpened) => (state, vec![]),

            // Commands outside Ready
            (Self::Uninitialized, event) if event.is_command() => (
                Self::Uninitialized,
                vec![Action::Reject(Rejection::NotInitialized)],
            ),
            (Self::Disabled, event) if event.is_command() => {
                (Self::Disabled, vec![Action::Reject(Rejection::Disabled)])
            }
            (state, event) if state.is_busy() && event.is_command() => {
                (state, vec![Action::Reject(Rejection::Busy)])
            }

            // From Ready
            (Self::Ready, Event::PushRequested) => {
                (Self::SendingBatch, vec![Action::SendPendingChanges])
            }
            (Self::Ready, Event::PullRequested) => {
                (Self::ApplyingRemoteDelta, vec![Action::FetchRemoteChanges])
            }
            (Self::Ready, Event::ReuploadRequested) => (
                Self::SendingBatch,
                vec![Action::QueueEverything, Action::SendPendingChanges],
            ),
            (Self::Ready, Event::RemoveAllRequested) => (
                Self::SendingBatch,
                vec![
                    Action::QueueRemoteRemoval,
                    Action::WipeLocalData,
                    Action::Emit(SyncOutcome::LocalDataRemoved),
                    Action::SendPendingChanges,
                ],
            ),
            (Self::Ready, Event::RemoteDeltaArrived) => {
                (Self::ApplyingRemoteDelta, vec![Action::ApplyRemoteDelta])
            }

            // During a round trip
            (state, Event::RemoteDeltaArrived) if state.is_busy() => {
                (state, vec![Action::ApplyRemoteDelta])
            }
            (state, Event::RoundTripFinished) if state.is_busy() => (
                Self::Ready,
                vec![Action::Emit(SyncOutcome::ChangesFinished)],
            ),

            // Remote-driven wipes
            (state, Event::ZoneDeleted) if state.is_active() => (
                state,
                vec![
                    Action::WipeLocalData,
                    Action::Emit(SyncOutcome::LocalDataRemoved),
                ],
            ),

            // Account changes
            (state, Event::AccountChanged(AccountChange::SignIn)) if state.is_active() => {
                (state, vec![Action::QueueEverything])
            }
            (Self::Disabled, Event::AccountChanged(AccountChange::SignIn)) => (
                Self::Ready,
                vec![
                    Action::QueueEverything,
                    Action::Emit(SyncOutcome::ChangesFinished),
                ],
            ),
            (state, Event::AccountChanged(_)) if state.is_active() => (
                Self::Disabled,
                vec![
                    Action::WipeLocalData,
                    Action::ClearPendingChanges,
                    Action::Emit(SyncOutcome::LocalDataRemoved),
                    Action::Emit(SyncOutcome::Disabled),
                ],
            ),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if a session is open and not disabled.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Ready | Self::SendingBatch | Self::ApplyingRemoteDelta
        )
    }

    /// Check if a round trip is in progress.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::SendingBatch | Self::ApplyingRemoteDelta)
    }

    /// Check if the coordinator is waiting for a sign-in.
    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Ready => "ready",
            Self::SendingBatch => "sending",
            Self::ApplyingRemoteDelta => "applying",
            Self::Disabled => "disabled",
        };
        f.write_str(name)
    }
}

/// Events that drive the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The remote session was established.
    SessionOpened,
    /// Caller asked to flush pending changes.
    PushRequested,
    /// Caller asked to fetch remote changes.
    PullRequested,
    /// Caller asked to re-queue every local record.
    ReuploadRequested,
    /// Caller asked to wipe local and remote data.
    RemoveAllRequested,
    /// The remote delivered record modifications or deletions.
    RemoteDeltaArrived,
    /// The remote round trip of the current command completed.
    RoundTripFinished,
    /// The remote zone holding the records was deleted.
    ZoneDeleted,
    /// The remote account changed.
    AccountChanged(AccountChange),
}

impl Event {
    /// Whether this event is a caller-issued command.
    pub fn is_command(&self) -> bool {
        matches!(
            self,
            Self::PushRequested
                | Self::PullRequested
                | Self::ReuploadRequested
                | Self::RemoveAllRequested
        )
    }
}

/// Actions to be executed by the sync-client.
///
/// These are instructions, not side effects. The sync-client interprets
/// these and performs the actual I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Hand pending changes to the remote session.
    SendPendingChanges,
    /// Ask the remote session for outstanding changes.
    FetchRemoteChanges,
    /// Apply the delta that triggered this transition to the local cache.
    ApplyRemoteDelta,
    /// Queue a zone save and a save for every local record.
    QueueEverything,
    /// Queue a delete for every known record and for the zone.
    QueueRemoteRemoval,
    /// Remove the local record blob.
    WipeLocalData,
    /// Forget every pending change.
    ClearPendingChanges,
    /// Notify subscribers.
    Emit(SyncOutcome),
    /// Refuse the command.
    Reject(Rejection),
}

/// Outcomes emitted to the UI-facing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncOutcome {
    /// Local data may have changed; refetch from the cache.
    ChangesFinished,
    /// All local data is gone.
    LocalDataRemoved,
    /// Sync is disabled until a fresh sign-in.
    Disabled,
}

/// Why a command was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    /// `initialize()` has not run.
    NotInitialized,
    /// The account signed out or switched.
    Disabled,
    /// Another round trip is in progress.
    Busy,
}
