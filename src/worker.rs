//! Transport between the control context and the compute context.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   ComputeRequest    ┌─────────────────────┐
//! │  Control Thread  │ ──────────────────► │   synth-compute     │
//! │  (Engine::tick)  │                     │ (owns SampleCompute)│
//! │                  │ ◄────────────────── │                     │
//! └──────────────────┘    ComputeEvent     └─────────────────────┘
//! ```
//!
//! Both directions are FIFO and the worker handles one request at a time, so
//! events arrive in request order. Every message is an owned value; the two
//! contexts share no mutable state.

use std::collections::VecDeque;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::config::ComputeMode;
use crate::synth::{
    BatchFailure, BatchRequest, BatchResult, CompileError, ProgramInfo, ProgramSource,
    SampleCompute,
};

/// Work sent to the compute context.
#[derive(Debug, Clone)]
pub enum ComputeRequest {
    /// Compile and install a new program.
    Configure(ProgramSource),
    /// Render one batch with the installed program.
    Render(BatchRequest),
}

/// Completions delivered back to the control context.
#[derive(Debug, Clone)]
pub enum ComputeEvent {
    Installed(Result<ProgramInfo, CompileError>),
    Rendered {
        request: BatchRequest,
        outcome: Result<BatchResult, BatchFailure>,
    },
}

fn handle_request(unit: &mut dyn SampleCompute, request: ComputeRequest) -> ComputeEvent {
    match request {
        ComputeRequest::Configure(program) => {
            let result = unit.configure(&program);
            match &result {
                Ok(info) => log::info!(
                    "Installed synthesis program (generation {}) on {}",
                    info.generation,
                    unit.backend_name()
                ),
                Err(e) => log::warn!("Synthesis program rejected: {}", e),
            }
            ComputeEvent::Installed(result)
        }
        ComputeRequest::Render(request) => {
            let outcome = unit.render(&request);
            if let Err(e) = &outcome {
                log::warn!("Batch at offset {} failed: {}", request.sample_offset, e);
            }
            ComputeEvent::Rendered { request, outcome }
        }
    }
}

/// Same-thread compute context: requests run when sent.
pub struct InlineCompute {
    unit: Box<dyn SampleCompute>,
    events: VecDeque<ComputeEvent>,
    released: bool,
}

impl InlineCompute {
    pub fn new(unit: Box<dyn SampleCompute>) -> Self {
        Self {
            unit,
            events: VecDeque::new(),
            released: false,
        }
    }

    fn send(&mut self, request: ComputeRequest) -> Result<(), BatchFailure> {
        if self.released {
            return Err(BatchFailure::WorkerGone);
        }
        let event = handle_request(self.unit.as_mut(), request);
        self.events.push_back(event);
        Ok(())
    }

    fn shutdown(&mut self) {
        if !self.released {
            self.unit.release();
            self.released = true;
        }
        self.events.clear();
    }
}

/// Compute context on a dedicated thread.
pub struct ComputeWorker {
    request_tx: Option<Sender<ComputeRequest>>,
    event_rx: Receiver<ComputeEvent>,
    thread: Option<JoinHandle<()>>,
}

impl ComputeWorker {
    /// Spawn the worker thread, moving `unit` onto it.
    pub fn spawn(unit: Box<dyn SampleCompute>) -> std::io::Result<Self> {
        let (request_tx, request_rx) = channel::unbounded();
        let (event_tx, event_rx) = channel::unbounded();

        let thread = thread::Builder::new()
            .name("synth-compute".to_string())
            .spawn(move || Self::run(unit, request_rx, event_tx))?;

        Ok(Self {
            request_tx: Some(request_tx),
            event_rx,
            thread: Some(thread),
        })
    }

    /// Main worker loop. Exits when the request channel closes.
    fn run(
        mut unit: Box<dyn SampleCompute>,
        request_rx: Receiver<ComputeRequest>,
        event_tx: Sender<ComputeEvent>,
    ) {
        log::info!("Compute worker started ({})", unit.backend_name());

        while let Ok(request) = request_rx.recv() {
            let event = handle_request(unit.as_mut(), request);
            if event_tx.send(event).is_err() {
                break;
            }
        }

        unit.release();
        log::info!("Compute worker stopped");
    }

    fn send(&self, request: ComputeRequest) -> Result<(), BatchFailure> {
        self.request_tx
            .as_ref()
            .ok_or(BatchFailure::WorkerGone)?
            .send(request)
            .map_err(|_| BatchFailure::WorkerGone)
    }

    /// Close the request channel and wait for any in-flight call to finish.
    fn shutdown(&mut self) {
        self.request_tx = None;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Compute worker panicked");
            }
        }
    }
}

impl Drop for ComputeWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Either compute context behind one interface.
pub enum ComputeLink {
    Inline(InlineCompute),
    Threaded(ComputeWorker),
}

impl ComputeLink {
    /// Create a link of the requested kind. The unit's batch ceiling is
    /// queried before it moves into the compute context.
    pub fn new(
        mode: ComputeMode,
        unit: Box<dyn SampleCompute>,
    ) -> std::io::Result<(Self, LinkInfo)> {
        let info = LinkInfo {
            max_batch_size: unit.max_batch_size(),
            backend: unit.backend_name().to_string(),
        };
        let link = match mode {
            ComputeMode::Inline => ComputeLink::Inline(InlineCompute::new(unit)),
            ComputeMode::Threaded => ComputeLink::Threaded(ComputeWorker::spawn(unit)?),
        };
        Ok((link, info))
    }

    pub fn is_threaded(&self) -> bool {
        matches!(self, ComputeLink::Threaded(_))
    }

    pub fn send(&mut self, request: ComputeRequest) -> Result<(), BatchFailure> {
        match self {
            ComputeLink::Inline(c) => c.send(request),
            ComputeLink::Threaded(w) => w.send(request),
        }
    }

    /// Next completed event, without blocking.
    ///
    /// Events already delivered are returned before a dead worker is
    /// reported as [`BatchFailure::WorkerGone`].
    pub fn try_next(&mut self) -> Result<Option<ComputeEvent>, BatchFailure> {
        match self {
            ComputeLink::Inline(c) => Ok(c.events.pop_front()),
            ComputeLink::Threaded(w) => match w.event_rx.try_recv() {
                Ok(event) => Ok(Some(event)),
                Err(TryRecvError::Empty) => Ok(None),
                Err(TryRecvError::Disconnected) => Err(BatchFailure::WorkerGone),
            },
        }
    }

    /// Next completed event, waiting up to `timeout` on a threaded link.
    pub fn wait_next(&mut self, timeout: Duration) -> Result<Option<ComputeEvent>, BatchFailure> {
        match self {
            ComputeLink::Inline(c) => Ok(c.events.pop_front()),
            ComputeLink::Threaded(w) => match w.event_rx.recv_timeout(timeout) {
                Ok(event) => Ok(Some(event)),
                Err(RecvTimeoutError::Timeout) => Ok(None),
                Err(RecvTimeoutError::Disconnected) => Err(BatchFailure::WorkerGone),
            },
        }
    }

    /// Stop the compute context and release its resources.
    pub fn shutdown(&mut self) {
        match self {
            ComputeLink::Inline(c) => c.shutdown(),
            ComputeLink::Threaded(w) => w.shutdown(),
        }
    }
}

/// Static facts about the compute unit behind a link.
#[derive(Debug, Clone)]
pub struct LinkInfo {
    pub max_batch_size: u32,
    pub backend: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::CpuSampleUnit;

    const WAIT: Duration = Duration::from_secs(5);

    fn ramp_unit() -> Box<dyn SampleCompute> {
        Box::new(CpuSampleUnit::with_program(|t| [t as f32, -(t as f32)]).with_max_batch_size(512))
    }

    #[test]
    fn test_inline_events_in_request_order() {
        let (mut link, info) = ComputeLink::new(ComputeMode::Inline, ramp_unit()).unwrap();
        assert_eq!(info.max_batch_size, 512);
        assert_eq!(info.backend, "cpu");
        assert!(!link.is_threaded());

        link.send(ComputeRequest::Configure(ProgramSource::new("ramp")))
            .unwrap();
        link.send(ComputeRequest::Render(BatchRequest::new(0, 8, 1000.0)))
            .unwrap();

        assert!(matches!(
            link.try_next(),
            Ok(Some(ComputeEvent::Installed(Ok(_))))
        ));
        match link.try_next() {
            Ok(Some(ComputeEvent::Rendered { request, outcome })) => {
                assert_eq!(request.sample_offset, 0);
                assert_eq!(outcome.unwrap().sample_count, 8);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(link.try_next(), Ok(None)));
    }

    #[test]
    fn test_threaded_preserves_order() {
        let (mut link, _) = ComputeLink::new(ComputeMode::Threaded, ramp_unit()).unwrap();
        assert!(link.is_threaded());

        link.send(ComputeRequest::Configure(ProgramSource::new("ramp")))
            .unwrap();
        for i in 0..4u64 {
            link.send(ComputeRequest::Render(BatchRequest::new(i * 100, 100, 1000.0)))
                .unwrap();
        }

        assert!(matches!(
            link.wait_next(WAIT),
            Ok(Some(ComputeEvent::Installed(Ok(_))))
        ));
        for i in 0..4u64 {
            match link.wait_next(WAIT) {
                Ok(Some(ComputeEvent::Rendered { request, outcome })) => {
                    assert_eq!(request.sample_offset, i * 100);
                    assert_eq!(outcome.unwrap().sample_offset, i * 100);
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[test]
    fn test_send_after_shutdown_reports_worker_gone() {
        for mode in [ComputeMode::Inline, ComputeMode::Threaded] {
            let (mut link, _) = ComputeLink::new(mode, ramp_unit()).unwrap();
            link.shutdown();
            let result = link.send(ComputeRequest::Render(BatchRequest::new(0, 1, 1000.0)));
            assert_eq!(result, Err(BatchFailure::WorkerGone));
        }
    }

    struct PanickingUnit;

    impl SampleCompute for PanickingUnit {
        fn max_batch_size(&self) -> u32 {
            64
        }

        fn configure(&mut self, _: &ProgramSource) -> Result<ProgramInfo, CompileError> {
            Ok(ProgramInfo {
                generation: 1,
                source_hash: 0,
            })
        }

        fn render(&mut self, _: &BatchRequest) -> Result<BatchResult, BatchFailure> {
            panic!("device lost");
        }

        fn backend_name(&self) -> &str {
            "panicking"
        }
    }

    #[test]
    fn test_dead_worker_reported_after_pending_events() {
        let (mut link, _) = ComputeLink::new(ComputeMode::Threaded, Box::new(PanickingUnit)).unwrap();
        link.send(ComputeRequest::Configure(ProgramSource::new("x")))
            .unwrap();
        link.send(ComputeRequest::Render(BatchRequest::new(0, 8, 1000.0)))
            .unwrap();

        assert!(matches!(
            link.wait_next(WAIT),
            Ok(Some(ComputeEvent::Installed(Ok(_))))
        ));
        assert_eq!(link.wait_next(WAIT).unwrap_err(), BatchFailure::WorkerGone);
        assert_eq!(link.try_next().unwrap_err(), BatchFailure::WorkerGone);
    }
}
