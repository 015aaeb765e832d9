//! Debounced outgoing typing indicator.
//!
//! The first keystroke emits `typing`; each further keystroke re-arms a
//! timer, and once no keystroke has arrived for the debounce interval the
//! notifier emits `stopTyping` on its own.  The clear is client-local --
//! the server never confirms it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use palaver_shared::constants::TYPING_DEBOUNCE;
use palaver_shared::protocol::ClientEvent;
use palaver_shared::types::UserId;

#[derive(Debug, Clone, Copy)]
pub struct TypingConfig {
    /// Idle time after the last keystroke before the indicator self-clears.
    pub debounce: Duration,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            debounce: TYPING_DEBOUNCE,
        }
    }
}

struct ActiveTyping {
    peer: UserId,
    /// Bumped on every keystroke; a timer only clears the indicator when its
    /// captured generation is still current.
    generation: u64,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct TypingInner {
    active: Option<ActiveTyping>,
    next_generation: u64,
}

/// Emits typing/stopTyping events into the realtime outbound queue.
#[derive(Clone)]
pub struct TypingNotifier {
    outbound: mpsc::UnboundedSender<ClientEvent>,
    config: TypingConfig,
    inner: Arc<Mutex<TypingInner>>,
}

impl TypingNotifier {
    pub fn new(outbound: mpsc::UnboundedSender<ClientEvent>, config: TypingConfig) -> Self {
        Self {
            outbound,
            config,
            inner: Arc::new(Mutex::new(TypingInner::default())),
        }
    }

    /// Record a keystroke towards `to`: emit `typing` if the indicator is
    /// not already up, and re-arm the self-clear timer.
    pub fn keystroke(&self, to: UserId) {
        let mut inner = self.inner.lock().expect("typing lock");

        match inner.active.take() {
            Some(previous) => {
                previous.timer.abort();
                if previous.peer != to {
                    let _ = self
                        .outbound
                        .send(ClientEvent::StopTyping { to: previous.peer });
                    let _ = self.outbound.send(ClientEvent::Typing { to });
                }
            }
            None => {
                let _ = self.outbound.send(ClientEvent::Typing { to });
            }
        }

        let generation = inner.next_generation;
        inner.next_generation += 1;

        let notifier = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(notifier.config.debounce).await;
            notifier.clear_if_current(to, generation);
        });

        inner.active = Some(ActiveTyping {
            peer: to,
            generation,
            timer,
        });
    }

    /// Explicitly clear the indicator (message sent, input discarded).
    pub fn stop(&self) {
        let mut inner = self.inner.lock().expect("typing lock");
        if let Some(active) = inner.active.take() {
            active.timer.abort();
            let _ = self
                .outbound
                .send(ClientEvent::StopTyping { to: active.peer });
        }
    }

    fn clear_if_current(&self, peer: UserId, generation: u64) {
        let mut inner = self.inner.lock().expect("typing lock");
        let current = matches!(
            &inner.active,
            Some(active) if active.peer == peer && active.generation == generation
        );
        if current {
            inner.active = None;
            let _ = self.outbound.send(ClientEvent::StopTyping { to: peer });
        }
    }
}
