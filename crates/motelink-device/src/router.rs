//! The dispatch loop: sole reader of the inbound channel.
//!
//! Each frame is offered to the correlator, then classified by report tag
//! into one event batch. The batch is merged into the state snapshot and,
//! when events are enabled, queued for consumers. The correlator lock is held
//! across the whole dispatch of a frame, never across the channel read.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Sender, TrySendError};
use motelink_frame::report::report_name;
use motelink_frame::{FrameError, InboundFrame, InputReport, Report, ReportReader, StatusFlags};
use motelink_transport::PacketChannel;
use tracing::{debug, trace, warn};

use crate::correlator::Offer;
use crate::device::Shared;
use crate::event::{ErrorKind, Event, EventBatch};
use crate::extension::{ExtensionState, ExtensionType};
use crate::flags::DeviceFlags;
use crate::state::DeviceState;

/// Start the router thread.
pub(crate) fn spawn(
    shared: Arc<Shared>,
    reader: ReportReader<Arc<dyn PacketChannel>>,
    events: Sender<EventBatch>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("motelink-router".into())
        .spawn(move || run(&shared, reader, events))
}

fn run(shared: &Shared, mut reader: ReportReader<Arc<dyn PacketChannel>>, events: Sender<EventBatch>) {
    debug!("router started");
    let mut failed = false;
    loop {
        let frame = match reader.read_frame() {
            Ok(frame) => frame,
            Err(err) if err.is_protocol() => {
                warn!(error = %err, "dropping malformed frame");
                continue;
            }
            Err(FrameError::ConnectionClosed) => {
                debug!("inbound channel closed");
                break;
            }
            Err(err) => {
                warn!(error = %err, "inbound channel failed");
                failed = true;
                break;
            }
        };
        handle_frame(shared, &frame, &events);
    }

    shared.correlator.close();
    shared.state.lock().error = Some(ErrorKind::Disconnect);
    if failed {
        let comm = EventBatch::new(vec![Event::Error {
            error: ErrorKind::Comm,
        }]);
        if events.send(comm).is_err() {
            debug!("event receiver dropped before error notice");
        }
    }
    // The final batch ignores the EVENTS flag and waits for queue space.
    if events.send(EventBatch::disconnect()).is_err() {
        debug!("event receiver dropped before disconnect notice");
    }
    debug!("router stopped");
}

/// Dispatch one frame while holding the correlator lock.
pub(crate) fn handle_frame(shared: &Shared, frame: &InboundFrame, events: &Sender<EventBatch>) {
    let mut slot = shared.correlator.router_lock();
    if slot.offer(frame) == Offer::Consumed {
        return;
    }

    let report = match frame.decode() {
        Ok(report) => report,
        Err(err) => {
            warn!(report = report_name(frame.report()), error = %err, "dropping frame");
            return;
        }
    };

    let batch = {
        let mut state = shared.state.lock();
        let Some(all) = extract(&state, &report) else {
            return;
        };
        for event in &all {
            state.apply(event);
        }
        let mode = state.report_mode;
        all.into_iter()
            .filter(|event| event.enabled_by(mode))
            .collect::<Vec<_>>()
    };

    if batch.is_empty() || !shared.flags.load().contains(DeviceFlags::EVENTS) {
        return;
    }
    trace!(report = report_name(frame.report()), events = batch.len(), "queueing batch");
    match events.try_send(EventBatch::new(batch)) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!(report = report_name(frame.report()), "event queue full; dropping batch");
        }
        Err(TrySendError::Disconnected(_)) => {
            debug!("event receiver dropped");
        }
    }
    drop(slot);
}

/// Classify a report into every event it carries. `None` marks a report the
/// router should not be seeing (an uncaught memory reply).
fn extract(state: &DeviceState, report: &Report) -> Option<Vec<Event>> {
    match report {
        Report::Status(status) => {
            let present = status.flags.contains(StatusFlags::EXTENSION);
            let extension = match (present, state.extension) {
                (false, _) => ExtensionType::None,
                (true, ExtensionType::None) => ExtensionType::Unknown,
                (true, current) => current,
            };
            if extension != state.extension {
                debug!(from = %state.extension, to = %extension, "extension presence changed");
            }
            Some(vec![
                Event::Buttons {
                    buttons: status.buttons,
                },
                Event::Status {
                    battery: status.battery,
                    extension,
                },
            ])
        }
        Report::ReadData(_) => {
            warn!("read reply arrived with no read in progress");
            None
        }
        Report::WriteAck(ack) => {
            warn!(
                acked = report_name(ack.report),
                "write ack arrived with no write in progress"
            );
            None
        }
        Report::Input(input) => Some(extract_input(state, input)),
    }
}

fn extract_input(state: &DeviceState, input: &InputReport) -> Vec<Event> {
    let mut events = Vec::with_capacity(4);
    if let Some(buttons) = input.buttons {
        events.push(Event::Buttons { buttons });
    }
    if let Some(accel) = input.accel {
        events.push(Event::Accel { accel });
    }
    if let Some(dots) = input.ir {
        events.push(Event::Ir { dots });
    }
    if let Some(ext) = &input.ext {
        match state.extension.decode(ext) {
            Some(ExtensionState::Nunchuk(n)) => events.push(Event::Nunchuk(n)),
            Some(ExtensionState::Classic(c)) => events.push(Event::Classic(c)),
            Some(ExtensionState::Balance(b)) => events.push(Event::Balance(b)),
            Some(ExtensionState::MotionPlus(m)) => events.push(Event::MotionPlus(m)),
            Some(ExtensionState::None) | None => {}
        }
    }
    events
}
