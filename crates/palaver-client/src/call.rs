//! The call session coordinator.
//!
//! One state machine per call attempt:
//!
//! ```text
//! idle -> calling (caller) | ringing (callee) -> connected -> ended -> idle
//! ```
//!
//! The caller's ring timer auto-ends an unanswered call after the configured
//! timeout; it MUST be cancelled on answer, reject, remote end or failure --
//! a timer that fires after the call progressed would tear down a live call.
//! `ended` reverts to `idle` after a short grace delay so end-of-call state
//! is observable before the reset.
//!
//! The coordinator never touches the network itself: outgoing signals go
//! into an outbound event queue, and remote transitions arrive through
//! [`CallCoordinator::handle_event`] -- both sides advance on events, not on
//! a shared clock.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use palaver_shared::constants::{CALL_RESET_DELAY, CALL_RING_TIMEOUT};
use palaver_shared::protocol::{ClientEvent, ServerEvent, UserPublic};
use palaver_shared::types::{CallId, CallKind, UserId};

use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Idle,
    Calling,
    Ringing,
    Connected,
    Ended,
}

/// How the last call attempt finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// Rang out: nobody answered within the ring timeout.
    Missed,
    Rejected,
    Completed,
    Failed,
}

/// The call currently in progress (outgoing or answered).
#[derive(Debug, Clone)]
pub struct ActiveCall {
    pub call_id: CallId,
    pub peer: UserId,
    pub kind: CallKind,
    pub is_incoming: bool,
}

/// An incoming call that is ringing locally.
#[derive(Debug, Clone)]
pub struct IncomingCall {
    pub call_id: CallId,
    pub kind: CallKind,
    pub caller: UserPublic,
}

#[derive(Debug, Clone, Copy)]
pub struct CallConfig {
    /// How long an outgoing call rings before auto-ending as missed.
    pub ring_timeout: Duration,
    /// Grace delay between `ended` and the reset to `idle`.
    pub reset_delay: Duration,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ring_timeout: CALL_RING_TIMEOUT,
            reset_delay: CALL_RESET_DELAY,
        }
    }
}

// Status plus the pieces that only exist in some states, kept in one place
// so transitions replace everything at once under the same lock.
struct CallInner {
    status: CallStatus,
    active: Option<ActiveCall>,
    incoming: Option<IncomingCall>,
    last_outcome: Option<CallOutcome>,
    ring_timer: Option<JoinHandle<()>>,
    reset_timer: Option<JoinHandle<()>>,
}

impl Default for CallInner {
    fn default() -> Self {
        Self {
            status: CallStatus::Idle,
            active: None,
            incoming: None,
            last_outcome: None,
            ring_timer: None,
            reset_timer: None,
        }
    }
}

#[derive(Clone)]
pub struct CallCoordinator {
    inner: Arc<Mutex<CallInner>>,
    outbound: mpsc::UnboundedSender<ClientEvent>,
    config: CallConfig,
}

impl CallCoordinator {
    pub fn new(outbound: mpsc::UnboundedSender<ClientEvent>, config: CallConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CallInner::default())),
            outbound,
            config,
        }
    }

    // -- accessors -----------------------------------------------------------

    pub async fn status(&self) -> CallStatus {
        self.inner.lock().await.status
    }

    pub async fn active_call(&self) -> Option<ActiveCall> {
        self.inner.lock().await.active.clone()
    }

    pub async fn incoming_call(&self) -> Option<IncomingCall> {
        self.inner.lock().await.incoming.clone()
    }

    pub async fn last_outcome(&self) -> Option<CallOutcome> {
        self.inner.lock().await.last_outcome
    }

    // -- caller side ---------------------------------------------------------

    /// Start an outgoing call: allocate a call id, signal the callee, and arm
    /// the ring timer.  The call kind is fixed here for the whole attempt.
    pub async fn initiate(&self, peer: UserId, kind: CallKind) -> Result<CallId, ClientError> {
        let mut guard = self.inner.lock().await;
        let state = &mut *guard;

        if state.status != CallStatus::Idle {
            return Err(ClientError::InvalidState(
                "a call is already in progress".into(),
            ));
        }

        let call_id = CallId::new();
        state.status = CallStatus::Calling;
        state.active = Some(ActiveCall {
            call_id,
            peer,
            kind,
            is_incoming: false,
        });
        state.last_outcome = None;

        let _ = self.outbound.send(ClientEvent::InitiateCall {
            to: peer,
            call_id,
            kind,
        });

        // Ring timer: auto-end as missed if the callee never answers.  Every
        // other exit path aborts this task.
        let coordinator = self.clone();
        state.ring_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(coordinator.config.ring_timeout).await;
            let mut guard = coordinator.inner.lock().await;
            let state = &mut *guard;
            let still_ringing = state.status == CallStatus::Calling
                && state
                    .active
                    .as_ref()
                    .is_some_and(|active| active.call_id == call_id);
            if still_ringing {
                tracing::info!(call = %call_id, "call unanswered, ending as missed");
                // Tell the callee to stop ringing.
                let _ = coordinator
                    .outbound
                    .send(ClientEvent::EndCall { to: peer, call_id });
                coordinator.enter_ended(state, CallOutcome::Missed);
            }
        }));

        tracing::info!(call = %call_id, peer = %peer, ?kind, "call initiated");
        Ok(call_id)
    }

    // -- callee side ---------------------------------------------------------

    /// Accept the ringing call: signal the caller and go straight to
    /// `connected` (the caller connects when the acceptance arrives).
    pub async fn answer(&self) -> Result<CallId, ClientError> {
        let mut guard = self.inner.lock().await;
        let state = &mut *guard;

        let Some(incoming) = state.incoming.take() else {
            return Err(ClientError::InvalidState("no call is ringing".into()));
        };

        state.status = CallStatus::Connected;
        state.active = Some(ActiveCall {
            call_id: incoming.call_id,
            peer: incoming.caller.id,
            kind: incoming.kind,
            is_incoming: true,
        });

        let _ = self.outbound.send(ClientEvent::AnswerCall {
            to: incoming.caller.id,
            call_id: incoming.call_id,
        });

        tracing::info!(call = %incoming.call_id, "call answered");
        Ok(incoming.call_id)
    }

    /// Decline the ringing call and go back to idle immediately.
    pub async fn reject(&self) -> Result<(), ClientError> {
        let mut guard = self.inner.lock().await;
        let state = &mut *guard;

        let Some(incoming) = state.incoming.take() else {
            return Err(ClientError::InvalidState("no call is ringing".into()));
        };

        let _ = self.outbound.send(ClientEvent::RejectCall {
            to: incoming.caller.id,
            call_id: incoming.call_id,
        });

        state.status = CallStatus::Idle;
        tracing::info!(call = %incoming.call_id, "call rejected");
        Ok(())
    }

    // -- either side ---------------------------------------------------------

    /// Hang up the current attempt, whatever its state.
    pub async fn end(&self) -> Result<(), ClientError> {
        let mut guard = self.inner.lock().await;
        let state = &mut *guard;

        let target = state
            .active
            .as_ref()
            .map(|active| (active.peer, active.call_id))
            .or_else(|| {
                state
                    .incoming
                    .as_ref()
                    .map(|incoming| (incoming.caller.id, incoming.call_id))
            });

        let Some((peer, call_id)) = target else {
            return Err(ClientError::InvalidState("no call to end".into()));
        };

        let _ = self.outbound.send(ClientEvent::EndCall { to: peer, call_id });
        self.enter_ended(state, CallOutcome::Completed);

        tracing::info!(call = %call_id, "call ended locally");
        Ok(())
    }

    /// Advance the state machine on a pushed event.  Non-call events are not
    /// the coordinator's concern.
    pub async fn handle_event(&self, event: &ServerEvent) {
        let mut guard = self.inner.lock().await;
        let state = &mut *guard;

        match event {
            ServerEvent::IncomingCall {
                call_id,
                kind,
                caller,
                ..
            } => {
                if state.status != CallStatus::Idle {
                    tracing::debug!(call = %call_id, "already busy, ignoring incoming call");
                    return;
                }
                state.status = CallStatus::Ringing;
                state.incoming = Some(IncomingCall {
                    call_id: *call_id,
                    kind: *kind,
                    caller: caller.clone(),
                });
            }
            ServerEvent::CallAnswered { call_id, .. } => {
                let ours = state.status == CallStatus::Calling
                    && state
                        .active
                        .as_ref()
                        .is_some_and(|active| active.call_id == *call_id);
                if ours {
                    // The answer arrived: the ring timer must never fire now.
                    if let Some(timer) = state.ring_timer.take() {
                        timer.abort();
                    }
                    state.status = CallStatus::Connected;
                }
            }
            ServerEvent::CallRejected { .. } => {
                if state.status != CallStatus::Idle {
                    self.enter_ended(state, CallOutcome::Rejected);
                }
            }
            ServerEvent::CallEnded { .. } => {
                if state.status != CallStatus::Idle {
                    self.enter_ended(state, CallOutcome::Completed);
                }
            }
            ServerEvent::CallFailed { reason } => {
                if state.status != CallStatus::Idle {
                    tracing::warn!(reason = %reason, "call failed");
                    self.enter_ended(state, CallOutcome::Failed);
                }
            }
            _ => {}
        }
    }

    // -- transitions ---------------------------------------------------------

    /// Move to `ended`, cancel every pending timer, and arm the grace reset
    /// back to `idle`.
    fn enter_ended(&self, state: &mut CallInner, outcome: CallOutcome) {
        if let Some(timer) = state.ring_timer.take() {
            timer.abort();
        }
        if let Some(timer) = state.reset_timer.take() {
            timer.abort();
        }

        state.status = CallStatus::Ended;
        state.active = None;
        state.incoming = None;
        state.last_outcome = Some(outcome);

        let coordinator = self.clone();
        state.reset_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(coordinator.config.reset_delay).await;
            let mut guard = coordinator.inner.lock().await;
            let state = &mut *guard;
            if state.status == CallStatus::Ended {
                state.status = CallStatus::Idle;
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;

    fn coordinator() -> (CallCoordinator, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            CallCoordinator::new(
                tx,
                CallConfig {
                    ring_timeout: Duration::from_secs(60),
                    reset_delay: Duration::from_secs(1),
                },
            ),
            rx,
        )
    }

    fn caller_profile(id: UserId) -> UserPublic {
        UserPublic {
            id,
            email: "caller@example.com".into(),
            display_name: "Caller".into(),
            avatar_url: String::new(),
            is_online: true,
            last_seen: Utc::now(),
            created_at: Utc::now(),
        }
    }

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_call_ends_as_missed_then_resets() {
        let (coordinator, mut rx) = coordinator();
        let peer = UserId::new();

        let call_id = coordinator.initiate(peer, CallKind::Audio).await.unwrap();
        assert_eq!(coordinator.status().await, CallStatus::Calling);
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientEvent::InitiateCall {
                to: peer,
                call_id,
                kind: CallKind::Audio
            }
        );

        // Just past the ring timeout, before the grace reset.
        tokio::time::sleep(Duration::from_millis(60_500)).await;
        settle().await;

        assert_eq!(coordinator.status().await, CallStatus::Ended);
        assert_eq!(coordinator.last_outcome().await, Some(CallOutcome::Missed));
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientEvent::EndCall { to: peer, call_id },
            "the callee is told to stop ringing"
        );

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        settle().await;
        assert_eq!(coordinator.status().await, CallStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn answer_at_thirty_seconds_cancels_the_ring_timer() {
        let (coordinator, mut rx) = coordinator();
        let peer = UserId::new();

        let call_id = coordinator.initiate(peer, CallKind::Video).await.unwrap();
        rx.try_recv().unwrap(); // initiateCall

        tokio::time::sleep(Duration::from_secs(30)).await;
        coordinator
            .handle_event(&ServerEvent::CallAnswered {
                call_id,
                from: peer,
            })
            .await;
        assert_eq!(coordinator.status().await, CallStatus::Connected);

        // Well past the original timeout: the cancelled timer must not fire.
        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;

        assert_eq!(coordinator.status().await, CallStatus::Connected);
        assert!(rx.try_recv().is_err(), "no endCall was emitted");
    }

    #[tokio::test(start_paused = true)]
    async fn callee_rings_answers_and_connects() {
        let (coordinator, mut rx) = coordinator();
        let caller = UserId::new();
        let call_id = CallId::new();

        coordinator
            .handle_event(&ServerEvent::IncomingCall {
                call_id,
                kind: CallKind::Video,
                caller: caller_profile(caller),
                timestamp: Utc::now(),
            })
            .await;

        assert_eq!(coordinator.status().await, CallStatus::Ringing);
        let incoming = coordinator.incoming_call().await.unwrap();
        assert_eq!(incoming.call_id, call_id);
        assert_eq!(incoming.caller.id, caller);

        let answered = coordinator.answer().await.unwrap();
        assert_eq!(answered, call_id);
        assert_eq!(coordinator.status().await, CallStatus::Connected);
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientEvent::AnswerCall {
                to: caller,
                call_id
            }
        );

        let active = coordinator.active_call().await.unwrap();
        assert!(active.is_incoming);
        assert!(active.kind.has_video());
    }

    #[tokio::test(start_paused = true)]
    async fn reject_returns_to_idle_immediately() {
        let (coordinator, mut rx) = coordinator();
        let caller = UserId::new();
        let call_id = CallId::new();

        coordinator
            .handle_event(&ServerEvent::IncomingCall {
                call_id,
                kind: CallKind::Audio,
                caller: caller_profile(caller),
                timestamp: Utc::now(),
            })
            .await;

        coordinator.reject().await.unwrap();
        assert_eq!(coordinator.status().await, CallStatus::Idle);
        assert!(coordinator.incoming_call().await.is_none());
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientEvent::RejectCall {
                to: caller,
                call_id
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn remote_rejection_cancels_timer_and_resets() {
        let (coordinator, mut rx) = coordinator();
        let peer = UserId::new();

        let call_id = coordinator.initiate(peer, CallKind::Audio).await.unwrap();
        rx.try_recv().unwrap();

        coordinator
            .handle_event(&ServerEvent::CallRejected {
                call_id,
                from: peer,
            })
            .await;

        assert_eq!(coordinator.status().await, CallStatus::Ended);
        assert_eq!(
            coordinator.last_outcome().await,
            Some(CallOutcome::Rejected)
        );

        // Past the would-be ring timeout: the aborted timer stays silent.
        tokio::time::sleep(Duration::from_secs(61)).await;
        settle().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(coordinator.status().await, CallStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_callee_fails_the_attempt() {
        let (coordinator, mut rx) = coordinator();
        let peer = UserId::new();

        coordinator.initiate(peer, CallKind::Audio).await.unwrap();
        rx.try_recv().unwrap();

        coordinator
            .handle_event(&ServerEvent::CallFailed {
                reason: "user is offline".into(),
            })
            .await;

        assert_eq!(coordinator.status().await, CallStatus::Ended);
        assert_eq!(coordinator.last_outcome().await, Some(CallOutcome::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn cannot_initiate_while_busy() {
        let (coordinator, _rx) = coordinator();
        let peer = UserId::new();

        coordinator.initiate(peer, CallKind::Audio).await.unwrap();
        let second = coordinator.initiate(peer, CallKind::Audio).await;
        assert!(matches!(second, Err(ClientError::InvalidState(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn local_hangup_notifies_peer_and_resets() {
        let (coordinator, mut rx) = coordinator();
        let peer = UserId::new();

        let call_id = coordinator.initiate(peer, CallKind::Audio).await.unwrap();
        rx.try_recv().unwrap();

        coordinator
            .handle_event(&ServerEvent::CallAnswered {
                call_id,
                from: peer,
            })
            .await;
        assert_eq!(coordinator.status().await, CallStatus::Connected);

        coordinator.end().await.unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientEvent::EndCall { to: peer, call_id }
        );
        assert_eq!(coordinator.status().await, CallStatus::Ended);
        assert_eq!(
            coordinator.last_outcome().await,
            Some(CallOutcome::Completed)
        );

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        settle().await;
        assert_eq!(coordinator.status().await, CallStatus::Idle);
    }
}
