//! Translates OS signals into lifecycle events.

use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::lifecycle::{LifecycleEvent, SignalKind};

#[cfg(unix)]
pub struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    quit: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    /// Registers the handlers immediately so nothing sent after startup is missed.
    pub fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind as UnixSignal};

        Ok(Signals {
            interrupt: signal(UnixSignal::interrupt())?,
            terminate: signal(UnixSignal::terminate())?,
            quit: signal(UnixSignal::quit())?,
            hangup: signal(UnixSignal::hangup())?,
        })
    }

    async fn next(&mut self) -> Option<SignalKind> {
        tokio::select! {
            Some(()) = self.interrupt.recv() => Some(SignalKind::Interrupt),
            Some(()) = self.terminate.recv() => Some(SignalKind::Terminate),
            Some(()) = self.quit.recv() => Some(SignalKind::Quit),
            Some(()) = self.hangup.recv() => Some(SignalKind::Hangup),
            else => None,
        }
    }
}

#[cfg(not(unix))]
pub struct Signals;

#[cfg(not(unix))]
impl Signals {
    pub fn install() -> std::io::Result<Self> {
        Ok(Signals)
    }

    async fn next(&mut self) -> Option<SignalKind> {
        tokio::signal::ctrl_c().await.ok().map(|()| SignalKind::Interrupt)
    }
}

impl Signals {
    /// Forwards signals until the receiving side goes away.
    pub async fn forward(mut self, events: UnboundedSender<LifecycleEvent>) {
        while let Some(kind) = self.next().await {
            debug!("caught {:?}", kind);
            if events.send(kind.into()).is_err() {
                break;
            }
        }
    }
}
