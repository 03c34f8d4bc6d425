//! Event delivery: polling the queue, or a callback thread draining it.

use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::{debug, warn};

use crate::device::Device;
use crate::error::{DeviceError, Result};
use crate::event::EventBatch;
use crate::flags::DeviceFlags;

/// Handler invoked once per event batch on the callback thread.
pub type EventCallback = Box<dyn FnMut(&EventBatch) + Send + 'static>;

/// The callback thread and its shutdown line.
pub(crate) struct CallbackWorker {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CallbackWorker {
    pub(crate) fn spawn(events: Receiver<EventBatch>, mut callback: EventCallback) -> io::Result<Self> {
        let (shutdown, stop) = channel::bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("motelink-callback".into())
            .spawn(move || {
                debug!("callback thread started");
                loop {
                    crossbeam::select! {
                        recv(stop) -> _ => break,
                        recv(events) -> batch => match batch {
                            Ok(batch) => {
                                let last = batch.is_disconnect();
                                callback(&batch);
                                if last {
                                    break;
                                }
                            }
                            Err(_) => break,
                        },
                    }
                }
                debug!("callback thread stopped");
            })?;
        Ok(Self {
            shutdown: Some(shutdown),
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for it, unless called from the callback
    /// itself, in which case the thread exits after the callback returns.
    pub(crate) fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!("event callback panicked");
        }
    }
}

impl Drop for CallbackWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Device {
    /// Take the next event batch.
    ///
    /// Non-blocking with nothing queued fails with
    /// [`DeviceError::WouldBlock`]. Once the connection is gone and the
    /// queue is drained this fails with [`DeviceError::Disconnected`].
    pub fn poll_events(&self, blocking: bool) -> Result<EventBatch> {
        if blocking {
            return self.events.recv().map_err(|_| DeviceError::Disconnected);
        }
        match self.events.try_recv() {
            Ok(batch) => Ok(batch),
            Err(TryRecvError::Empty) => Err(DeviceError::WouldBlock),
            Err(TryRecvError::Disconnected) => Err(DeviceError::Disconnected),
        }
    }

    /// Like [`poll_events`](Self::poll_events), blocking unless the NONBLOCK
    /// flag is set.
    pub fn poll(&self) -> Result<EventBatch> {
        self.poll_events(!self.flags().contains(DeviceFlags::NONBLOCK))
    }

    /// Wait up to `timeout` for the next event batch.
    pub fn poll_timeout(&self, timeout: Duration) -> Result<EventBatch> {
        self.events.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => DeviceError::Timeout(timeout),
            RecvTimeoutError::Disconnected => DeviceError::Disconnected,
        })
    }

    /// Install or remove the event handler.
    ///
    /// Any previous handler is stopped first. `None` only stops. While a
    /// handler is installed it competes with [`poll_events`](Self::poll_events)
    /// for batches.
    pub fn set_event_callback(&self, callback: Option<EventCallback>) -> Result<()> {
        // Never join a worker while holding the slot: its handler may call
        // back into this method.
        let previous = self.callback.lock().take();
        if let Some(mut worker) = previous {
            worker.stop();
        }
        if let Some(callback) = callback {
            let worker = CallbackWorker::spawn(self.events.clone(), callback)
                .map_err(DeviceError::Thread)?;
            let displaced = self.callback.lock().replace(worker);
            if let Some(mut worker) = displaced {
                worker.stop();
            }
        }
        Ok(())
    }
}
