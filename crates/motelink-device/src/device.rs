//! The device handle and the state it shares with its threads.

use std::os::fd::OwnedFd;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{self, Receiver};
use motelink_frame::{ReportReader, ReportWriter};
use motelink_transport::{PacketChannel, ReportStream, SeqPacketListener};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::correlator::Correlator;
use crate::delivery::CallbackWorker;
use crate::error::{DeviceError, Result};
use crate::event::EventBatch;
use crate::extension::ExtensionType;
use crate::flags::{AtomicFlags, DeviceFlags};
use crate::router;
use crate::state::DeviceState;

/// Socket name for the outbound channel inside a bridge directory.
pub const CONTROL_SOCKET: &str = "control.sock";
/// Socket name for the inbound channel inside a bridge directory.
pub const INTERRUPT_SOCKET: &str = "interrupt.sock";

/// State shared by the handle, the router thread and caller threads.
///
/// Lock order: writer, then correlator slot, then state.
pub(crate) struct Shared {
    pub(crate) writer: Mutex<ReportWriter<Arc<dyn PacketChannel>>>,
    pub(crate) correlator: Correlator,
    pub(crate) state: Mutex<DeviceState>,
    pub(crate) flags: AtomicFlags,
    pub(crate) config: DeviceConfig,
    control: Arc<dyn PacketChannel>,
    interrupt: Arc<dyn PacketChannel>,
}

impl Shared {
    pub(crate) fn set_extension(&self, extension: ExtensionType) {
        self.state.lock().set_extension(extension);
    }
}

/// A connected controller.
///
/// The handle owns a router thread reading the inbound channel. All methods
/// take `&self`; share the handle between threads with an `Arc`.
pub struct Device {
    pub(crate) shared: Arc<Shared>,
    pub(crate) events: Receiver<EventBatch>,
    pub(crate) callback: Mutex<Option<CallbackWorker>>,
    router: Option<JoinHandle<()>>,
}

impl Device {
    /// Start a session over an already-connected channel pair.
    ///
    /// `control` carries commands to the controller, `interrupt` carries its
    /// reports back.
    pub fn connect<C, I>(control: C, interrupt: I, config: DeviceConfig) -> Result<Self>
    where
        C: PacketChannel + 'static,
        I: PacketChannel + 'static,
    {
        let control: Arc<dyn PacketChannel> = Arc::new(control);
        let interrupt: Arc<dyn PacketChannel> = Arc::new(interrupt);
        let (sender, events) = channel::bounded(config.event_queue_capacity.max(1));

        let shared = Arc::new(Shared {
            writer: Mutex::new(ReportWriter::new(Arc::clone(&control))),
            correlator: Correlator::new(),
            state: Mutex::new(DeviceState::new(config.report_mode)),
            flags: AtomicFlags::new(config.flags),
            config,
            control,
            interrupt,
        });

        let reader = ReportReader::new(Arc::clone(&shared.interrupt));
        let router = router::spawn(Arc::clone(&shared), reader, sender).map_err(DeviceError::Thread)?;
        info!("device connected");

        Ok(Self {
            shared,
            events,
            callback: Mutex::new(None),
            router: Some(router),
        })
    }

    /// Adopt two connected seqpacket descriptors, such as L2CAP sockets on
    /// PSM 0x11 (control) and 0x13 (interrupt).
    pub fn connect_fds(control: OwnedFd, interrupt: OwnedFd, config: DeviceConfig) -> Result<Self> {
        let control = ReportStream::from_fd(control)?;
        let interrupt = ReportStream::from_fd(interrupt)?;
        Self::connect(control, interrupt, config)
    }

    /// Connect to a bridge directory holding [`CONTROL_SOCKET`] and
    /// [`INTERRUPT_SOCKET`].
    pub fn connect_path(dir: impl AsRef<Path>, config: DeviceConfig) -> Result<Self> {
        let dir = dir.as_ref();
        let control = SeqPacketListener::connect(dir.join(CONTROL_SOCKET))?;
        let interrupt = SeqPacketListener::connect(dir.join(INTERRUPT_SOCKET))?;
        debug!(dir = %dir.display(), "bridge sockets connected");
        Self::connect(control, interrupt, config)
    }

    /// A copy of the current state snapshot.
    pub fn state(&self) -> DeviceState {
        self.shared.state.lock().clone()
    }

    pub fn flags(&self) -> DeviceFlags {
        self.shared.flags.load()
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.shared.config
    }

    /// Whether the router is still reading reports.
    pub fn is_connected(&self) -> bool {
        !self.shared.correlator.is_closed()
    }

    /// Close both channels and stop all threads.
    pub fn disconnect(mut self) -> Result<()> {
        let result = self.shutdown_channels();
        self.teardown();
        result
    }

    fn shutdown_channels(&self) -> Result<()> {
        let interrupt = self.shared.interrupt.shutdown();
        let control = self.shared.control.shutdown();
        interrupt.and(control).map_err(|err| DeviceError::Transport(err.into()))
    }

    fn teardown(&mut self) {
        let Some(router) = self.router.take() else {
            return;
        };
        let worker = self.callback.lock().take();
        if let Some(mut worker) = worker {
            worker.stop();
        }
        // Unblock a router stuck on a full queue until it drops its sender.
        while self.events.recv().is_ok() {}
        if router.join().is_err() {
            warn!("router thread panicked");
        }
        info!("device disconnected");
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if self.router.is_none() {
            return;
        }
        if let Err(err) = self.shutdown_channels() {
            debug!(error = %err, "channel shutdown failed");
        }
        self.teardown();
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("connected", &self.is_connected())
            .field("flags", &self.flags())
            .finish_non_exhaustive()
    }
}
