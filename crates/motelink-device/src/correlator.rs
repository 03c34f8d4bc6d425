//! Wait/signal rendezvous between caller threads and the router.
//!
//! One caller at a time owns the slot (an exclusive wait). While it owns the
//! slot it may arm a registration for one report tag, send its request, and
//! then block until the router offers a matching frame. A registration stays
//! armed until it is cleared, so a burst of replies (multi-chunk reads,
//! per-chunk write acks, late retries) is queued rather than lost.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use motelink_frame::report::{self, report_name};
use motelink_frame::InboundFrame;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::trace;

use crate::error::{DeviceError, Result};

#[derive(Debug, Clone, Copy)]
struct Registration {
    report: u8,
    capture: bool,
    process_after: bool,
}

#[derive(Debug, Default)]
struct Slot {
    owned: bool,
    armed: Option<Registration>,
    /// Matches not yet consumed by the waiter.
    hits: usize,
    /// Captured frames, one per hit when capturing.
    replies: VecDeque<InboundFrame>,
    closed: bool,
}

impl Slot {
    fn clear(&mut self) {
        self.armed = None;
        self.hits = 0;
        self.replies.clear();
    }
}

/// What the router should do with a frame after offering it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    /// No registration matched; process normally.
    Unmatched,
    /// Handed to the waiter; also process normally.
    Shared,
    /// Handed to the waiter only.
    Consumed,
}

/// The correlation slot plus its condition variable.
#[derive(Debug, Default)]
pub struct Correlator {
    slot: Mutex<Slot>,
    cond: Condvar,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an exclusive wait lifecycle.
    ///
    /// Fails immediately with [`DeviceError::ConcurrencyViolation`] if another
    /// lifecycle is active; it never blocks.
    pub fn begin_exclusive_wait(&self) -> Result<WaitGuard<'_>> {
        let mut slot = self.slot.lock();
        if slot.closed {
            return Err(DeviceError::Disconnected);
        }
        if slot.owned {
            return Err(DeviceError::ConcurrencyViolation);
        }
        slot.owned = true;
        slot.clear();
        Ok(WaitGuard { correlator: self })
    }

    /// Whether an exclusive wait is in progress.
    pub fn is_waiting(&self) -> bool {
        self.slot.lock().owned
    }

    /// Whether the router has stopped.
    pub fn is_closed(&self) -> bool {
        self.slot.lock().closed
    }

    /// Take the router side of the slot. Held for the whole dispatch of one
    /// frame so a woken waiter observes the fully processed frame.
    pub(crate) fn router_lock(&self) -> RouterSlot<'_> {
        RouterSlot {
            slot: self.slot.lock(),
            cond: &self.cond,
        }
    }

    /// Mark the slot closed and wake every waiter with `Disconnected`.
    pub(crate) fn close(&self) {
        let mut slot = self.slot.lock();
        slot.closed = true;
        self.cond.notify_all();
    }
}

/// The router's hold on the slot for one frame.
pub(crate) struct RouterSlot<'a> {
    slot: MutexGuard<'a, Slot>,
    cond: &'a Condvar,
}

impl RouterSlot<'_> {
    /// Offer a frame to the armed registration.
    pub(crate) fn offer(&mut self, frame: &InboundFrame) -> Offer {
        let Some(reg) = self.slot.armed else {
            return Offer::Unmatched;
        };
        if reg.report != frame.report() {
            return Offer::Unmatched;
        }
        trace!(report = report_name(reg.report), "signaling waiter");
        self.slot.hits += 1;
        if reg.capture {
            self.slot.replies.push_back(frame.clone());
        }
        self.cond.notify_all();
        if reg.process_after {
            Offer::Shared
        } else {
            Offer::Consumed
        }
    }
}

/// An active exclusive wait. Dropping it ends the wait and clears the slot.
pub struct WaitGuard<'a> {
    correlator: &'a Correlator,
}

impl WaitGuard<'_> {
    /// Arm a registration for `report` before sending the request it answers.
    ///
    /// `capture` keeps a copy of each matching frame for [`wait`](Self::wait);
    /// `process_after` lets the router also treat the frame as an event.
    /// Tag [`report::NONE`] clears the slot instead. Arming over an armed
    /// registration is a [`DeviceError::ConcurrencyViolation`].
    pub fn expect(&self, report: u8, capture: bool, process_after: bool) -> Result<()> {
        let mut slot = self.correlator.slot.lock();
        if report == report::NONE {
            slot.clear();
            return Ok(());
        }
        if slot.closed {
            return Err(DeviceError::Disconnected);
        }
        if slot.armed.is_some() {
            return Err(DeviceError::ConcurrencyViolation);
        }
        slot.clear();
        slot.armed = Some(Registration {
            report,
            capture,
            process_after,
        });
        Ok(())
    }

    /// Block until the router delivers one match, or `timeout` passes.
    ///
    /// Returns the captured frame (`None` when not capturing). Returns
    /// immediately with `Ok(None)` if nothing is armed or pending. A timeout
    /// leaves the registration armed so the caller may resend and wait again.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<Option<InboundFrame>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut slot = self.correlator.slot.lock();
        loop {
            if slot.hits > 0 {
                slot.hits -= 1;
                return Ok(slot.replies.pop_front());
            }
            if slot.armed.is_none() {
                return Ok(None);
            }
            if slot.closed {
                slot.clear();
                return Err(DeviceError::Disconnected);
            }
            match deadline {
                Some(deadline) => {
                    let timed_out = self.correlator.cond.wait_until(&mut slot, deadline).timed_out();
                    if timed_out && slot.hits == 0 {
                        return Err(DeviceError::Timeout(timeout.unwrap_or_default()));
                    }
                }
                None => self.correlator.cond.wait(&mut slot),
            }
        }
    }

    /// Arm, then wait without a timeout. Tag [`report::NONE`] clears the
    /// slot and returns immediately.
    pub fn await_report(
        &self,
        report: u8,
        capture: bool,
        process_after: bool,
    ) -> Result<Option<InboundFrame>> {
        self.expect(report, capture, process_after)?;
        if report == report::NONE {
            return Ok(None);
        }
        self.wait(None)
    }

    /// End the wait. Equivalent to dropping the guard.
    pub fn end(self) {}
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.correlator.slot.lock();
        slot.owned = false;
        slot.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn frame(bytes: &[u8]) -> InboundFrame {
        InboundFrame::new(bytes.to_vec()).unwrap()
    }

    #[test]
    fn second_wait_is_a_violation() {
        let correlator = Correlator::new();
        let first = correlator.begin_exclusive_wait().unwrap();
        assert!(matches!(
            correlator.begin_exclusive_wait(),
            Err(DeviceError::ConcurrencyViolation)
        ));
        assert!(correlator.is_waiting());
        first.end();
        assert!(!correlator.is_waiting());
        assert!(correlator.begin_exclusive_wait().is_ok());
    }

    #[test]
    fn second_registration_is_a_violation() {
        let correlator = Correlator::new();
        let wait = correlator.begin_exclusive_wait().unwrap();
        wait.expect(report::STATUS, true, true).unwrap();
        assert!(matches!(
            wait.expect(report::READ_DATA, true, false),
            Err(DeviceError::ConcurrencyViolation)
        ));
        wait.expect(report::NONE, false, false).unwrap();
        wait.expect(report::READ_DATA, true, false).unwrap();
    }

    #[test]
    fn none_returns_immediately() {
        let correlator = Correlator::new();
        let wait = correlator.begin_exclusive_wait().unwrap();
        assert!(wait.await_report(report::NONE, true, false).unwrap().is_none());
    }

    #[test]
    fn matching_frame_is_captured() {
        let correlator = Correlator::new();
        let wait = correlator.begin_exclusive_wait().unwrap();
        wait.expect(report::WRITE_ACK, true, false).unwrap();

        let mut router = correlator.router_lock();
        assert_eq!(router.offer(&frame(&[0xA1, 0x30, 0, 0])), Offer::Unmatched);
        assert_eq!(
            router.offer(&frame(&[0xA1, 0x22, 0, 0, 0x16, 0])),
            Offer::Consumed
        );
        drop(router);

        let reply = wait.wait(None).unwrap().unwrap();
        assert_eq!(reply.report(), report::WRITE_ACK);
    }

    #[test]
    fn process_after_shares_frame() {
        let correlator = Correlator::new();
        let wait = correlator.begin_exclusive_wait().unwrap();
        wait.expect(report::STATUS, false, true).unwrap();
        let offer = correlator
            .router_lock()
            .offer(&frame(&[0xA1, 0x20, 0, 0, 0, 0, 0, 0]));
        assert_eq!(offer, Offer::Shared);
        assert!(wait.wait(None).unwrap().is_none());
    }

    #[test]
    fn burst_of_replies_is_queued() {
        let correlator = Correlator::new();
        let wait = correlator.begin_exclusive_wait().unwrap();
        wait.expect(report::WRITE_ACK, true, false).unwrap();
        {
            let mut router = correlator.router_lock();
            router.offer(&frame(&[0xA1, 0x22, 0, 0, 0x16, 0]));
            router.offer(&frame(&[0xA1, 0x22, 0, 0, 0x16, 3]));
        }
        assert_eq!(wait.wait(None).unwrap().unwrap().payload()[3], 0);
        assert_eq!(wait.wait(None).unwrap().unwrap().payload()[3], 3);
    }

    #[test]
    fn timeout_keeps_registration() {
        let correlator = Correlator::new();
        let wait = correlator.begin_exclusive_wait().unwrap();
        wait.expect(report::STATUS, true, true).unwrap();
        let err = wait.wait(Some(Duration::from_millis(10))).unwrap_err();
        assert!(matches!(err, DeviceError::Timeout(_)));

        correlator
            .router_lock()
            .offer(&frame(&[0xA1, 0x20, 0, 0, 0, 0, 0, 0]));
        assert!(wait.wait(Some(Duration::from_millis(10))).unwrap().is_some());
    }

    #[test]
    fn waiter_woken_from_router_thread() {
        let correlator = Arc::new(Correlator::new());
        let router = {
            let correlator = Arc::clone(&correlator);
            thread::spawn(move || {
                while !correlator.is_waiting() {
                    thread::yield_now();
                }
                thread::sleep(Duration::from_millis(20));
                correlator
                    .router_lock()
                    .offer(&frame(&[0xA1, 0x21, 0, 0, 0x00, 0x00, 0xFA]))
            })
        };
        let wait = correlator.begin_exclusive_wait().unwrap();
        wait.expect(report::READ_DATA, true, false).unwrap();
        let reply = wait.wait(Some(Duration::from_secs(5))).unwrap().unwrap();
        assert_eq!(reply.report(), report::READ_DATA);
        assert_eq!(router.join().unwrap(), Offer::Consumed);
    }

    #[test]
    fn close_wakes_waiter() {
        let correlator = Arc::new(Correlator::new());
        let closer = {
            let correlator = Arc::clone(&correlator);
            thread::spawn(move || {
                while !correlator.is_waiting() {
                    thread::yield_now();
                }
                thread::sleep(Duration::from_millis(20));
                correlator.close();
            })
        };
        let wait = correlator.begin_exclusive_wait().unwrap();
        let err = wait.await_report(report::STATUS, true, true).unwrap_err();
        assert!(matches!(err, DeviceError::Disconnected));
        closer.join().unwrap();
        drop(wait);
        assert!(matches!(
            correlator.begin_exclusive_wait(),
            Err(DeviceError::Disconnected)
        ));
    }
}
