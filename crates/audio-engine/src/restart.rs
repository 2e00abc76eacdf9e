//! Disconnect recovery.
//!
//! Devices tend to report a disconnect more than once in quick succession. The guard lets
//! exactly one close/reopen sequence run at a time and drops notifications that arrive
//! while it is in progress instead of queuing them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, TryLockError};

use crate::session::StreamSession;

/// What a call to [`RestartGuard::try_restart`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartOutcome {
    /// The old stream was closed and a reopen was attempted.
    Performed { stream_open: bool },
    /// Another restart held the guard; nothing was done.
    Skipped,
    /// The notification referred to a stream that has since been replaced.
    Stale,
}

#[derive(Debug, Default)]
pub struct RestartGuard {
    restarting: Mutex<()>,
    performed: AtomicU64,
    skipped: AtomicU64,
}

impl RestartGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close `session` and replace it with whatever `reopen` produces.
    ///
    /// Never waits for the guard: if a restart is already underway this logs and returns
    /// [`RestartOutcome::Skipped`]. `reopen` returning `None` leaves the session closed.
    pub fn try_restart<F>(&self, session: &Mutex<StreamSession>, reopen: F) -> RestartOutcome
    where
        F: FnOnce() -> Option<StreamSession>,
    {
        self.try_restart_if(session, || true, reopen)
    }

    /// Like [`RestartGuard::try_restart`], but first asks `is_current` (under the guard)
    /// whether the fault still concerns the installed stream.
    ///
    /// A `false` answer leaves the session untouched and returns [`RestartOutcome::Stale`].
    pub fn try_restart_if<C, F>(
        &self,
        session: &Mutex<StreamSession>,
        is_current: C,
        reopen: F,
    ) -> RestartOutcome
    where
        C: FnOnce() -> bool,
        F: FnOnce() -> Option<StreamSession>,
    {
        let _restarting = match self.restarting.try_lock() {
            Ok(g) => g,
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
            Err(TryLockError::WouldBlock) => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("stream restart already in progress; ignoring this request");
                return RestartOutcome::Skipped;
            }
        };

        if !is_current() {
            tracing::debug!("fault came from a replaced stream; ignoring");
            return RestartOutcome::Stale;
        }

        tracing::info!("restarting stream");
        let mut session = session.lock().unwrap_or_else(|p| p.into_inner());
        let _ = session.close();

        let stream_open = match reopen() {
            Some(fresh) => {
                *session = fresh;
                session.is_open()
            }
            None => false,
        };
        if !stream_open {
            tracing::error!("restart left no output stream; audio stays silent until recreated");
        }

        self.performed.fetch_add(1, Ordering::Relaxed);
        RestartOutcome::Performed { stream_open }
    }

    pub fn performed(&self) -> u64 {
        self.performed.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}
