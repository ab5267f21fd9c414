use std::{
    sync::Arc,
    thread,
    time::Duration,
};

use derive_more::{Deref, DerefMut};
use parking_lot::Mutex;
use thiserror::Error;

use crate::device::Device;

pub mod event;

pub use event::StreamEvent;

#[derive(Debug, Clone, Error)]
pub enum StreamError {
    #[error("stream wait timed out after {0:?}")]
    TimedOut(Duration),
    #[error("stream kernel failure: {0}")]
    Kernel(String),
    #[error("injected test failure")]
    Test,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deref, DerefMut)]
pub struct StreamId(uid::Id<StreamId>);

type Kernel = Box<dyn FnOnce() -> Result<(), StreamError> + Send>;

enum Command {
    Run(Kernel),
    Record(StreamEvent),
    Wait(StreamEvent, Option<Duration>),
}

#[derive(Debug, Default)]
struct StreamShared {
    last_error: Mutex<Option<StreamError>>,
}

impl StreamShared {
    fn fail(&self, err: StreamError) {
        log::error!("stream kernel failed: {err}");
        let mut last_error = self.last_error.lock();
        if last_error.is_none() {
            *last_error = Some(err);
        }
    }
}

/// A single-producer FIFO of closures executed on one device.
///
/// Submission is non-blocking and legal only from the creating thread;
/// execution happens in submission order on a dedicated worker. The first
/// failing closure poisons the stream: later enqueues become no-ops, events
/// recorded afterwards carry the failure, and the next blocking join
/// surfaces it.
#[derive(Debug)]
pub struct DeviceStream {
    device: Device,
    id: StreamId,
    sender: flume::Sender<Command>,
    shared: Arc<StreamShared>,
    creator: thread::ThreadId,
    timeout: Option<Duration>,
    execute_synchronously: bool,
}

impl DeviceStream {
    /// Creates a stream on `device`, spawning its worker.
    pub fn new(device: Device) -> Self {
        let id = StreamId::default();
        let timeout = device.timeout();
        let shared = Arc::new(StreamShared::default());
        let (sender, receiver) = flume::unbounded();
        {
            let shared = shared.clone();
            let name = format!("weft-stream-{}", id.get());
            thread::Builder::new()
                .name(name)
                .spawn(move || serve(receiver, shared))
                .expect("failed to spawn stream worker");
        }
        Self {
            device,
            id,
            sender,
            shared,
            creator: thread::current().id(),
            timeout,
            execute_synchronously: false,
        }
    }

    /// Debug mode: closures run inline on the submitting thread, in order.
    pub fn synchronous(mut self) -> Self {
        self.execute_synchronously = true;
        self
    }

    #[inline]
    pub fn device(&self) -> &Device {
        &self.device
    }

    #[inline]
    pub fn id(&self) -> StreamId {
        self.id
    }

    #[inline]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn last_error(&self) -> Option<StreamError> {
        self.shared.last_error.lock().clone()
    }

    /// Appends a closure to the FIFO. No-op once the stream is poisoned.
    pub fn enqueue(&self, kernel: impl FnOnce() -> Result<(), StreamError> + Send + 'static) {
        self.submit(Command::Run(Box::new(kernel)));
    }

    pub fn create_event(&self) -> StreamEvent {
        StreamEvent::new()
    }

    /// Appends a signal closure for `event` and returns it. A previously
    /// signaled event resets to pending before the enqueue.
    pub fn record(&self, event: StreamEvent) -> StreamEvent {
        event.reset();
        self.submit(Command::Record(event.clone()));
        event
    }

    /// Appends a closure that blocks the worker until `event` signals.
    pub fn wait_for(&self, event: &StreamEvent) {
        self.submit(Command::Wait(event.clone(), self.timeout));
    }

    /// Establishes a happens-before edge: everything enqueued on `other`
    /// before this call completes before anything enqueued on `self` after
    /// it. The submitting thread never blocks.
    pub fn sync_with(&self, other: &DeviceStream, event: &StreamEvent) {
        other.record(event.clone());
        self.wait_for(event);
    }

    /// Blocks the caller until the tail of the FIFO has drained, then
    /// reports the stream's first failure if any.
    pub fn block_until_idle(&self) -> Result<(), StreamError> {
        let event = self.record(self.create_event());
        event.wait(self.timeout)?;
        match self.last_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Poisons the stream through the ordinary kernel-failure path.
    pub fn throw_test_error(&self) {
        self.enqueue(|| Err(StreamError::Test));
    }

    pub(crate) fn drain_error(&self) -> StreamError {
        self.last_error()
            .unwrap_or_else(|| StreamError::Kernel("stream worker terminated".into()))
    }

    fn submit(&self, command: Command) {
        assert_eq!(
            thread::current().id(),
            self.creator,
            "streams are single-producer: enqueue only from the creating thread",
        );
        if let Some(err) = self.last_error() {
            if let Command::Record(event) = command {
                event.poison(err);
            }
            return;
        }
        match self.execute_synchronously {
            true => execute(command, &self.shared),
            false => {
                let _ = self.sender.send(command);
            }
        }
    }
}

fn execute(command: Command, shared: &StreamShared) {
    match command {
        Command::Run(kernel) => {
            if let Err(err) = kernel() {
                shared.fail(err);
            }
        }
        Command::Record(event) => event.signal(),
        Command::Wait(event, timeout) => {
            if let Err(err) = event.wait(timeout) {
                shared.fail(err);
            }
        }
    }
}

fn serve(receiver: flume::Receiver<Command>, shared: Arc<StreamShared>) {
    while let Ok(command) = receiver.recv() {
        let poisoned = shared.last_error.lock().clone();
        match poisoned {
            // skip queued work after a failure, but fail events so that
            // joins surface the original error instead of timing out
            Some(err) => {
                if let Command::Record(event) = command {
                    event.poison(err);
                }
            }
            None => execute(command, &shared),
        }
    }
}
