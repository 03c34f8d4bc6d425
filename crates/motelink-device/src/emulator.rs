//! A simulated controller speaking the controller end of the protocol.
//!
//! It answers status requests, memory reads and writes, LED and report-mode
//! commands, and models extension identification including MotionPlus
//! activation. Used by the `emulate` command and by tests.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use motelink_frame::report::{self, report_name};
use motelink_frame::{
    encode_report, Accel, AddressSpace, Buttons, CommandFrame, FrameError, InputReport, IrDot,
    ReadReply, ReadRequest, Report, ReportReader, ReportWriter, StatusFlags, StatusReport,
    WriteAck, WriteRequest, IR_DOTS, READ_REPLY_MAX,
};
use motelink_transport::{PacketChannel, ReportStream, SeqPacketListener};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::device::{CONTROL_SOCKET, INTERRUPT_SOCKET};
use crate::extension::{
    ExtensionState, ExtensionType, MotionPlusState, EXT_ID_ADDR, EXT_ID_LEN, EXT_INIT_ADDR_1,
    MOTIONPLUS_ACTIVATE_ADDR,
};

/// Size of the user EEPROM area.
pub const EEPROM_SIZE: u32 = 0x1700;
/// Error code for an access outside any valid area.
pub const ERR_INVALID_ADDRESS: u8 = 0x08;

const BATTERY_LOW_LEVEL: u8 = 0x19;

struct Controller {
    buttons: Buttons,
    accel: Accel,
    ir: [IrDot; IR_DOTS],
    battery: u8,
    leds: u8,
    rumble: bool,
    ir_enabled: bool,
    continuous: bool,
    report: u8,
    extension: ExtensionType,
    ext: ExtensionState,
    motionplus: Option<MotionPlusState>,
    motionplus_active: bool,
    eeprom: Vec<u8>,
    registers: BTreeMap<u32, u8>,
}

impl Default for Controller {
    fn default() -> Self {
        Self {
            buttons: Buttons::empty(),
            accel: Accel {
                x: 0x80,
                y: 0x80,
                z: 0x9A,
            },
            ir: [IrDot::EMPTY; IR_DOTS],
            battery: 0xC0,
            leds: 0,
            rumble: false,
            ir_enabled: false,
            continuous: false,
            report: report::BTN,
            extension: ExtensionType::None,
            ext: ExtensionState::None,
            motionplus: None,
            motionplus_active: false,
            eeprom: vec![0; EEPROM_SIZE as usize],
            registers: BTreeMap::new(),
        }
    }
}

impl Controller {
    fn visible_extension(&self) -> ExtensionType {
        if self.motionplus_active {
            ExtensionType::MotionPlus
        } else {
            self.extension
        }
    }

    fn register(&self, addr: u32) -> u8 {
        if (EXT_ID_ADDR..EXT_ID_ADDR + EXT_ID_LEN as u32).contains(&addr) {
            let id = self.visible_extension().id().unwrap_or([0xFF; EXT_ID_LEN]);
            return id[(addr - EXT_ID_ADDR) as usize];
        }
        self.registers.get(&addr).copied().unwrap_or(0)
    }

    fn status(&self) -> Result<Bytes, FrameError> {
        let mut flags = StatusFlags::from_bits_truncate(self.leds << 4);
        if self.visible_extension() != ExtensionType::None {
            flags |= StatusFlags::EXTENSION;
        }
        if self.ir_enabled {
            flags |= StatusFlags::IR;
        }
        if self.battery <= BATTERY_LOW_LEVEL {
            flags |= StatusFlags::BATTERY_LOW;
        }
        encode_report(&Report::Status(StatusReport {
            buttons: self.buttons,
            flags,
            battery: self.battery,
        }))
    }

    fn input(&self) -> Result<Bytes, FrameError> {
        let mut input = InputReport::new(self.report);
        input.buttons = Some(self.buttons);
        input.accel = Some(self.accel);
        input.ir = Some(if self.ir_enabled {
            self.ir
        } else {
            [IrDot::EMPTY; IR_DOTS]
        });
        if let Some(len) = input.ext_len() {
            let mut ext = match (self.motionplus_active, self.motionplus) {
                (true, Some(gyro)) => ExtensionState::MotionPlus(gyro).encode(),
                _ => self.ext.encode(),
            };
            ext.resize(len, 0);
            input.ext = Some(ext.into());
        }
        encode_report(&Report::Input(input))
    }

    fn handle(&mut self, command: &CommandFrame) -> Result<Vec<Bytes>, FrameError> {
        let payload = command.payload.as_ref();
        let first = payload.first().copied().unwrap_or(0);
        self.rumble = first & 0x01 != 0;

        match command.report {
            report::LED_RUMBLE => {
                self.leds = first >> 4;
                Ok(Vec::new())
            }
            report::REPORT_MODE => {
                let Some(&tag) = payload.get(1) else {
                    return Err(FrameError::InvalidField("report mode needs 2 bytes".into()));
                };
                if !InputReport::is_data_report(tag) {
                    return Err(FrameError::UnsupportedReport(tag));
                }
                self.continuous = first & 0x04 != 0;
                self.report = tag;
                debug!(report = report_name(tag), continuous = self.continuous, "report mode");
                Ok(vec![self.input()?])
            }
            report::IR_ENABLE_1 => {
                self.ir_enabled = first & 0x04 != 0;
                Ok(Vec::new())
            }
            report::STATUS_REQUEST => Ok(vec![self.status()?]),
            report::READ_MEMORY => {
                let request = ReadRequest::decode(payload)?;
                self.read(&request)
            }
            report::WRITE_MEMORY => {
                let request = WriteRequest::decode(payload)?;
                self.write(&request)
            }
            other => {
                debug!(report = report_name(other), "ignoring command");
                Ok(Vec::new())
            }
        }
    }

    fn read(&self, request: &ReadRequest) -> Result<Vec<Bytes>, FrameError> {
        let len = u32::from(request.len);
        let data: Option<Vec<u8>> = match request.space {
            AddressSpace::Eeprom => {
                let end = request.offset + len;
                (end <= EEPROM_SIZE)
                    .then(|| self.eeprom[request.offset as usize..end as usize].to_vec())
            }
            AddressSpace::Register => Some(
                (request.offset..request.offset + len)
                    .map(|addr| self.register(addr))
                    .collect(),
            ),
        };

        let Some(data) = data else {
            debug!(offset = request.offset, len, "read outside EEPROM");
            let reply = ReadReply {
                buttons: self.buttons,
                error: ERR_INVALID_ADDRESS,
                size: 1,
                offset: request.offset as u16,
                data: [0; READ_REPLY_MAX],
            };
            return Ok(vec![encode_report(&Report::ReadData(reply))?]);
        };

        data.chunks(READ_REPLY_MAX)
            .enumerate()
            .map(|(i, chunk)| {
                let addr = request.offset + (i * READ_REPLY_MAX) as u32;
                let mut padded = [0u8; READ_REPLY_MAX];
                padded[..chunk.len()].copy_from_slice(chunk);
                encode_report(&Report::ReadData(ReadReply {
                    buttons: self.buttons,
                    error: 0,
                    size: chunk.len() as u8,
                    offset: addr as u16,
                    data: padded,
                }))
            })
            .collect()
    }

    fn write(&mut self, request: &WriteRequest) -> Result<Vec<Bytes>, FrameError> {
        let data = request.data.as_ref();
        let mut replies = Vec::with_capacity(2);
        let mut extension_changed = false;

        let error = match request.space {
            AddressSpace::Eeprom => {
                let start = request.offset as usize;
                let end = start + data.len();
                if end <= self.eeprom.len() {
                    self.eeprom[start..end].copy_from_slice(data);
                    0
                } else {
                    ERR_INVALID_ADDRESS
                }
            }
            AddressSpace::Register => {
                for (addr, byte) in (request.offset..).zip(data) {
                    self.registers.insert(addr, *byte);
                }
                extension_changed = self.apply_register_write(request.offset, data);
                0
            }
        };

        replies.push(encode_report(&Report::WriteAck(WriteAck {
            buttons: self.buttons,
            report: report::WRITE_MEMORY,
            error,
        }))?);
        if extension_changed {
            replies.push(self.status()?);
        }
        Ok(replies)
    }

    /// Returns true when the write changed what the extension port shows.
    fn apply_register_write(&mut self, offset: u32, data: &[u8]) -> bool {
        let first = data.first().copied();
        if offset == MOTIONPLUS_ACTIVATE_ADDR && first == Some(0x04) {
            if self.motionplus.is_some() && !self.motionplus_active {
                self.motionplus_active = true;
                info!("motionplus activated");
                return true;
            }
        } else if offset == EXT_INIT_ADDR_1 && first == Some(0x55) && self.motionplus_active {
            self.motionplus_active = false;
            info!("motionplus released");
            return true;
        }
        false
    }
}

/// A simulated controller. Clones share the same controller.
#[derive(Clone, Default)]
pub struct Emulator {
    controller: Arc<Mutex<Controller>>,
    outbound: Arc<Mutex<Option<ReportWriter<Arc<dyn PacketChannel>>>>>,
}

impl Emulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plug an extension in, with its resting payload.
    pub fn with_extension(self, extension: ExtensionType) -> Self {
        self.set_extension(extension);
        self
    }

    /// Attach a MotionPlus (inactive until switched on).
    pub fn with_motionplus(self) -> Self {
        self.controller.lock().motionplus = Some(MotionPlusState {
            angle_rate: [0x1F7F; 3],
            low_speed: [true; 3],
        });
        self
    }

    /// Plug in or remove an extension, announcing it with a status report.
    pub fn set_extension(&self, extension: ExtensionType) {
        {
            let mut controller = self.controller.lock();
            controller.extension = extension;
            controller.ext = resting_payload(extension);
        }
        self.push(|c| c.status());
    }

    /// Replace the extension payload and emit a data report.
    pub fn set_extension_state(&self, state: ExtensionState) {
        self.controller.lock().ext = state;
        self.push(|c| c.input());
    }

    /// Replace the pressed buttons and emit a data report.
    pub fn set_buttons(&self, buttons: Buttons) {
        self.controller.lock().buttons = buttons;
        self.push(|c| c.input());
    }

    /// Replace the accelerometer sample and emit a data report.
    pub fn set_accel(&self, accel: Accel) {
        self.controller.lock().accel = accel;
        self.push(|c| c.input());
    }

    /// Replace the tracked IR dots and emit a data report.
    pub fn set_ir(&self, dots: [IrDot; IR_DOTS]) {
        self.controller.lock().ir = dots;
        self.push(|c| c.input());
    }

    pub fn set_battery(&self, level: u8) {
        self.controller.lock().battery = level;
    }

    pub fn leds(&self) -> u8 {
        self.controller.lock().leds
    }

    pub fn rumble(&self) -> bool {
        self.controller.lock().rumble
    }

    pub fn ir_enabled(&self) -> bool {
        self.controller.lock().ir_enabled
    }

    /// The data report tag currently selected.
    pub fn report_mode(&self) -> u8 {
        self.controller.lock().report
    }

    pub fn motionplus_active(&self) -> bool {
        self.controller.lock().motionplus_active
    }

    /// Register contents, as a read would return them.
    pub fn register(&self, addr: u32) -> u8 {
        self.controller.lock().register(addr)
    }

    /// A copy of part of the EEPROM. Out-of-range bytes are omitted.
    pub fn eeprom(&self, offset: u32, len: usize) -> Vec<u8> {
        let controller = self.controller.lock();
        let start = (offset as usize).min(controller.eeprom.len());
        let end = start.saturating_add(len).min(controller.eeprom.len());
        controller.eeprom[start..end].to_vec()
    }

    /// Serve one session until the host closes the control channel.
    pub fn serve<C, I>(&self, control: C, interrupt: I) -> Result<(), FrameError>
    where
        C: PacketChannel,
        I: PacketChannel + 'static,
    {
        let interrupt: Arc<dyn PacketChannel> = Arc::new(interrupt);
        *self.outbound.lock() = Some(ReportWriter::new(Arc::clone(&interrupt)));
        info!("emulator session started");

        let mut reader = ReportReader::new(control);
        let result = loop {
            let command = match reader.read_command() {
                Ok(command) => command,
                Err(FrameError::ConnectionClosed) => break Ok(()),
                Err(err) if err.is_protocol() => {
                    warn!(error = %err, "dropping malformed command");
                    continue;
                }
                Err(err) => break Err(err),
            };
            let replies = match self.controller.lock().handle(&command) {
                Ok(replies) => replies,
                Err(err) => {
                    warn!(report = report_name(command.report), error = %err, "rejecting command");
                    continue;
                }
            };
            if let Err(err) = self.send_all(&replies) {
                break Err(err);
            }
        };

        *self.outbound.lock() = None;
        if let Err(err) = interrupt.shutdown() {
            debug!(error = %err, "interrupt shutdown failed");
        }
        info!("emulator session ended");
        result
    }

    /// Serve one session on a background thread.
    pub fn spawn<C, I>(&self, control: C, interrupt: I) -> io::Result<JoinHandle<Result<(), FrameError>>>
    where
        C: PacketChannel + 'static,
        I: PacketChannel + 'static,
    {
        let emulator = self.clone();
        thread::Builder::new()
            .name("motelink-emulator".into())
            .spawn(move || emulator.serve(control, interrupt))
    }

    /// Emit a status report, as the controller does when its extension
    /// port changes.
    pub fn announce_status(&self) {
        self.push(|c| c.status());
    }

    fn push(&self, build: impl FnOnce(&Controller) -> Result<Bytes, FrameError>) {
        let built = {
            let controller = self.controller.lock();
            build(&controller)
        };
        let frame = match built {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "failed to build report");
                return;
            }
        };
        if let Err(err) = self.send_all(std::slice::from_ref(&frame)) {
            debug!(error = %err, "report not delivered");
        }
    }

    fn send_all(&self, frames: &[Bytes]) -> Result<(), FrameError> {
        let mut outbound = self.outbound.lock();
        let Some(writer) = outbound.as_mut() else {
            return Ok(());
        };
        for frame in frames {
            writer.send_raw(frame)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Emulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let controller = self.controller.lock();
        f.debug_struct("Emulator")
            .field("extension", &controller.extension)
            .field("motionplus_active", &controller.motionplus_active)
            .field("report", &report_name(controller.report))
            .finish_non_exhaustive()
    }
}

fn resting_payload(extension: ExtensionType) -> ExtensionState {
    let zeros = [0u8; 8];
    match extension {
        ExtensionType::Nunchuk => ExtensionType::Nunchuk
            .decode(&[0x80, 0x80, 0x80, 0x80, 0xB3, 0x03])
            .unwrap_or_default(),
        ExtensionType::Classic => ExtensionType::Classic
            .decode(&[0x20, 0x20, 0x10, 0x00, 0xFF, 0xFF])
            .unwrap_or_default(),
        other => other.decode(&zeros).unwrap_or_default(),
    }
}

/// The socket pair a bridge directory exposes.
pub struct EmulatorServer {
    control: SeqPacketListener,
    interrupt: SeqPacketListener,
}

impl EmulatorServer {
    /// Bind [`CONTROL_SOCKET`] and [`INTERRUPT_SOCKET`] inside `dir`.
    pub fn bind(dir: impl AsRef<Path>) -> motelink_transport::Result<Self> {
        let dir = dir.as_ref();
        // Hosts connect control first, so it must appear last.
        let interrupt = SeqPacketListener::bind(dir.join(INTERRUPT_SOCKET))?;
        let control = SeqPacketListener::bind(dir.join(CONTROL_SOCKET))?;
        Ok(Self { control, interrupt })
    }

    /// Wait for a host to connect both channels.
    pub fn accept(&self) -> motelink_transport::Result<(ReportStream, ReportStream)> {
        let control = self.control.accept()?;
        let interrupt = self.interrupt.accept()?;
        Ok((control, interrupt))
    }

    pub fn dir(&self) -> PathBuf {
        self.control
            .path()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }
}
