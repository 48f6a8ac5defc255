//! Install sequencing for synthesis programs.
//!
//! The manager wraps user code in the compute boilerplate, forwards it to the
//! compute context and resolves the caller's [`InstallHandle`] once the
//! compute context reports back. The previously installed program keeps
//! rendering until the new one is confirmed, so a swap always lands on a
//! batch boundary.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::{CompileError, CompileStage, ProgramInfo, ProgramSource};
use crate::worker::{ComputeLink, ComputeRequest};

type InstallResult = Result<ProgramInfo, CompileError>;

fn shutdown_error() -> CompileError {
    CompileError::new(
        CompileStage::Pipeline,
        "compute context shut down before the program was installed",
    )
}

/// Completion of a program install.
///
/// Resolves when the engine drains the matching compute event. Can be
/// awaited or polled with [`InstallHandle::try_result`].
#[derive(Debug)]
pub struct InstallHandle {
    rx: oneshot::Receiver<InstallResult>,
}

impl InstallHandle {
    /// The install outcome if it is already known.
    pub fn try_result(&mut self) -> Option<InstallResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(shutdown_error())),
        }
    }
}

impl Future for InstallHandle {
    type Output = InstallResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or_else(|_| Err(shutdown_error())))
    }
}

struct PendingInstall {
    source_hash: u64,
    reply: oneshot::Sender<InstallResult>,
}

/// Tracks the active program and installs in flight.
#[derive(Default)]
pub struct SynthesisManager {
    active: Option<ProgramInfo>,
    pending: VecDeque<PendingInstall>,
    last_error: Option<CompileError>,
}

impl SynthesisManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap `user_code` and queue it for installation.
    pub fn install(&mut self, link: &mut ComputeLink, user_code: &str) -> InstallHandle {
        let program = ProgramSource::new(user_code);
        let source_hash = program.hash;
        let (reply, rx) = oneshot::channel();

        match link.send(ComputeRequest::Configure(program)) {
            Ok(()) => {
                log::debug!("Queued program install (hash {:016x})", source_hash);
                self.pending.push_back(PendingInstall { source_hash, reply });
            }
            Err(e) => {
                log::error!("Cannot install program: {}", e);
                let _ = reply.send(Err(shutdown_error()));
            }
        }

        InstallHandle { rx }
    }

    /// Apply an install outcome reported by the compute context.
    ///
    /// Outcomes arrive in the order installs were queued.
    pub fn on_installed(&mut self, result: InstallResult) {
        match &result {
            Ok(info) => {
                self.active = Some(*info);
                self.last_error = None;
            }
            Err(e) => self.last_error = Some(e.clone()),
        }

        match self.pending.pop_front() {
            Some(pending) => {
                if let Ok(info) = &result {
                    debug_assert_eq!(info.source_hash, pending.source_hash);
                }
                // The caller may have dropped its handle.
                let _ = pending.reply.send(result);
            }
            None => log::warn!("Install outcome with no pending install"),
        }
    }

    /// True once any program has been installed successfully.
    pub fn is_ready(&self) -> bool {
        self.active.is_some()
    }

    pub fn active(&self) -> Option<ProgramInfo> {
        self.active
    }

    /// Error from the most recent install, cleared by the next success.
    pub fn last_error(&self) -> Option<&CompileError> {
        self.last_error.as_ref()
    }

    pub fn pending_installs(&self) -> usize {
        self.pending.len()
    }

    /// Fail every pending install; used when the compute context goes away.
    pub fn abandon_pending(&mut self) {
        for pending in self.pending.drain(..) {
            let _ = pending.reply.send(Err(shutdown_error()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ComputeMode;
    use crate::synth::{CpuSampleUnit, SynthFn};
    use crate::worker::ComputeEvent;
    use std::sync::Arc;

    fn link() -> ComputeLink {
        let unit = CpuSampleUnit::new(|src: &ProgramSource| {
            if src.user_code.contains("oops") {
                Err(CompileError::new(CompileStage::Parse, "unexpected 'oops'").at_line(1))
            } else {
                Ok(Arc::new(|_: f64| [0.0f32, 0.0]) as SynthFn)
            }
        });
        ComputeLink::new(ComputeMode::Inline, Box::new(unit)).unwrap().0
    }

    fn drain(manager: &mut SynthesisManager, link: &mut ComputeLink) {
        while let Ok(Some(event)) = link.try_next() {
            if let ComputeEvent::Installed(result) = event {
                manager.on_installed(result);
            }
        }
    }

    #[test]
    fn test_install_resolves_after_drain() {
        let mut link = link();
        let mut manager = SynthesisManager::new();
        assert!(!manager.is_ready());

        let mut handle = manager.install(&mut link, "fn main_sound");
        assert!(handle.try_result().is_none());
        assert_eq!(manager.pending_installs(), 1);

        drain(&mut manager, &mut link);
        let info = handle.try_result().unwrap().unwrap();
        assert_eq!(info.generation, 1);
        assert!(manager.is_ready());
        assert_eq!(manager.active(), Some(info));
        assert_eq!(manager.pending_installs(), 0);
    }

    #[test]
    fn test_failed_install_keeps_active_program() {
        let mut link = link();
        let mut manager = SynthesisManager::new();

        let _ = manager.install(&mut link, "good");
        let mut bad = manager.install(&mut link, "oops");
        drain(&mut manager, &mut link);

        let err = bad.try_result().unwrap().unwrap_err();
        assert_eq!(err.stage, CompileStage::Parse);
        assert_eq!(err.line, Some(1));
        assert!(manager.is_ready());
        assert_eq!(manager.active().unwrap().generation, 1);
        assert_eq!(manager.last_error(), Some(&err));
    }

    #[test]
    fn test_outcomes_resolve_in_fifo_order() {
        let mut link = link();
        let mut manager = SynthesisManager::new();

        let mut first = manager.install(&mut link, "a");
        let mut second = manager.install(&mut link, "b");
        drain(&mut manager, &mut link);

        assert_eq!(first.try_result().unwrap().unwrap().generation, 1);
        assert_eq!(second.try_result().unwrap().unwrap().generation, 2);
    }

    #[test]
    fn test_install_on_closed_link_fails() {
        let mut link = link();
        link.shutdown();
        let mut manager = SynthesisManager::new();

        let mut handle = manager.install(&mut link, "a");
        assert!(handle.try_result().unwrap().is_err());
        assert_eq!(manager.pending_installs(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_install_future_resolves() {
        let mut link = link();
        let mut manager = SynthesisManager::new();

        let handle = manager.install(&mut link, "a");
        manager.abandon_pending();
        let result = handle.await;
        assert_eq!(result.unwrap_err().stage, CompileStage::Pipeline);
    }
}
