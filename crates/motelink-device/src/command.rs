//! Settings commands: status, LEDs, rumble, report mode, feature flags.

use motelink_frame::report;
use motelink_frame::{AddressSpace, FrameError, Report, StatusReport};
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{DeviceError, Result};
use crate::flags::DeviceFlags;
use crate::memory::WriteStep;
use crate::state::ReportMode;

/// IR camera sensitivity block and its two tails.
const IR_SENSITIVITY_1: [u8; 9] = [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x90, 0x00, 0xC0];
const IR_SENSITIVITY_2: [u8; 2] = [0x40, 0x00];
const IR_CONTROL_ADDR: u32 = 0xB0_0030;
const IR_SENSITIVITY_1_ADDR: u32 = 0xB0_0000;
const IR_SENSITIVITY_2_ADDR: u32 = 0xB0_001A;
const IR_MODE_ADDR: u32 = 0xB0_0033;
const IR_MODE_BASIC: u8 = 0x01;
const IR_MODE_EXTENDED: u8 = 0x03;

/// Pick the smallest data report that carries everything `mode` asks for.
pub fn report_tag_for(mode: ReportMode) -> u8 {
    let ir = mode.contains(ReportMode::IR);
    let ext = mode.intersects(ReportMode::EXT);
    let acc = mode.contains(ReportMode::ACC);
    match (ir, ext, acc) {
        (true, true, true) => report::BTN_ACC_IR10_EXT6,
        (true, true, false) => report::BTN_IR10_EXT9,
        (true, false, _) => report::BTN_ACC_IR12,
        (false, true, true) => report::BTN_ACC_EXT16,
        (false, true, false) => report::BTN_EXT8,
        (false, false, true) => report::BTN_ACC,
        (false, false, false) => report::BTN,
    }
}

/// Steps that power up the IR camera. Reports that also carry extension
/// data only have room for the basic format.
fn ir_enable_steps(mode: ReportMode) -> Vec<WriteStep> {
    let format = if mode.intersects(ReportMode::EXT) {
        IR_MODE_BASIC
    } else {
        IR_MODE_EXTENDED
    };
    vec![
        WriteStep::report(report::IR_ENABLE_1, &[0x04]),
        WriteStep::report(report::IR_ENABLE_2, &[0x04]),
        WriteStep::memory(AddressSpace::Register, IR_CONTROL_ADDR, &[0x08]),
        WriteStep::memory(AddressSpace::Register, IR_SENSITIVITY_1_ADDR, &IR_SENSITIVITY_1),
        WriteStep::memory(AddressSpace::Register, IR_SENSITIVITY_2_ADDR, &IR_SENSITIVITY_2),
        WriteStep::memory(AddressSpace::Register, IR_MODE_ADDR, &[format]),
        WriteStep::memory(AddressSpace::Register, IR_CONTROL_ADDR, &[0x08]),
    ]
}

fn ir_disable_steps() -> Vec<WriteStep> {
    vec![
        WriteStep::report(report::IR_ENABLE_1, &[0x00]),
        WriteStep::report(report::IR_ENABLE_2, &[0x00]),
    ]
}

impl Device {
    /// Send a raw command report. The rumble bit is added automatically.
    pub fn send_report(&self, report: u8, payload: &[u8]) -> Result<()> {
        self.shared.writer.lock().send(report, payload)?;
        Ok(())
    }

    /// Ask for a status report and wait for it.
    ///
    /// The reply also updates battery and extension presence in the state
    /// snapshot before this returns.
    pub fn request_status(&self) -> Result<StatusReport> {
        let config = &self.shared.config;
        let frame = self.request_command(
            report::STATUS_REQUEST,
            &[0x00],
            report::STATUS,
            config.reply_timeout,
            config.request_retries,
        )?;
        match frame.decode()? {
            Report::Status(status) => Ok(status),
            other => Err(FrameError::UnknownReport(other.report()).into()),
        }
    }

    /// Light LEDs 1-4 from the low nibble of `mask`.
    pub fn set_led(&self, mask: u8) -> Result<()> {
        if mask > 0x0F {
            return Err(DeviceError::InvalidArgument(format!(
                "LED mask 0x{mask:02X} has bits above LED 4"
            )));
        }
        let mut writer = self.shared.writer.lock();
        writer.send(report::LED_RUMBLE, &[mask << 4])?;
        self.shared.state.lock().led = mask;
        debug!(led = mask, "LEDs set");
        Ok(())
    }

    /// Start or stop the rumble motor.
    pub fn set_rumble(&self, on: bool) -> Result<()> {
        let mut writer = self.shared.writer.lock();
        let led = self.shared.state.lock().led;
        let previous = writer.rumble();
        writer.set_rumble(on);
        if let Err(err) = writer.send(report::LED_RUMBLE, &[led << 4]) {
            writer.set_rumble(previous);
            return Err(err.into());
        }
        self.shared.state.lock().rumble = on;
        debug!(rumble = on, "rumble set");
        Ok(())
    }

    /// Choose which data the controller reports and which events are
    /// delivered. Turning IR on or off runs the camera setup first.
    pub fn set_report_mode(&self, mode: ReportMode) -> Result<()> {
        let old = self.shared.state.lock().report_mode;

        let ir_on = mode.contains(ReportMode::IR);
        let ir_format_changed =
            old.intersects(ReportMode::EXT) != mode.intersects(ReportMode::EXT);
        if ir_on && (!old.contains(ReportMode::IR) || ir_format_changed) {
            self.exec_write_seq(&ir_enable_steps(mode))?;
        } else if !ir_on && old.contains(ReportMode::IR) {
            self.exec_write_seq(&ir_disable_steps())?;
        }

        // Reports sent in the new mode are filtered by it.
        self.shared.state.lock().report_mode = mode;
        if let Err(err) = self.send_report_mode(mode) {
            self.shared.state.lock().report_mode = old;
            return Err(err);
        }
        info!(mode = ?mode, tag = format_args!("0x{:02X}", report_tag_for(mode)), "report mode set");
        Ok(())
    }

    fn send_report_mode(&self, mode: ReportMode) -> Result<()> {
        let continuous = if self.flags().contains(DeviceFlags::CONTINUOUS) {
            0x04
        } else {
            0x00
        };
        self.send_report(report::REPORT_MODE, &[continuous, report_tag_for(mode)])
    }

    /// Turn feature flags on. Enabling CONTINUOUS re-sends the report mode.
    pub fn enable(&self, flags: DeviceFlags) -> Result<()> {
        let before = self.flags();
        self.shared.flags.insert(flags);
        if flags.contains(DeviceFlags::MOTIONPLUS) && !before.contains(DeviceFlags::MOTIONPLUS) {
            self.shared.flags.remove(DeviceFlags::MOTIONPLUS);
            self.enable_motionplus()?;
        }
        if flags.contains(DeviceFlags::CONTINUOUS) && !before.contains(DeviceFlags::CONTINUOUS) {
            let mode = self.shared.state.lock().report_mode;
            self.send_report_mode(mode)?;
        }
        debug!(flags = ?self.flags(), "flags enabled");
        Ok(())
    }

    /// Turn feature flags off. Disabling CONTINUOUS re-sends the report mode.
    pub fn disable(&self, flags: DeviceFlags) -> Result<()> {
        let before = self.flags();
        self.shared.flags.remove(flags);
        if flags.contains(DeviceFlags::MOTIONPLUS) && before.contains(DeviceFlags::MOTIONPLUS) {
            self.disable_motionplus()?;
        }
        if flags.contains(DeviceFlags::CONTINUOUS) && before.contains(DeviceFlags::CONTINUOUS) {
            let mode = self.shared.state.lock().report_mode;
            self.send_report_mode(mode)?;
        }
        debug!(flags = ?self.flags(), "flags disabled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_tag_selection() {
        assert_eq!(report_tag_for(ReportMode::BTN), report::BTN);
        assert_eq!(report_tag_for(ReportMode::STATUS), report::BTN);
        assert_eq!(report_tag_for(ReportMode::BTN | ReportMode::ACC), report::BTN_ACC);
        assert_eq!(report_tag_for(ReportMode::NUNCHUK), report::BTN_EXT8);
        assert_eq!(
            report_tag_for(ReportMode::ACC | ReportMode::CLASSIC),
            report::BTN_ACC_EXT16
        );
        assert_eq!(report_tag_for(ReportMode::IR), report::BTN_ACC_IR12);
        assert_eq!(
            report_tag_for(ReportMode::IR | ReportMode::MOTIONPLUS),
            report::BTN_IR10_EXT9
        );
        assert_eq!(
            report_tag_for(ReportMode::IR | ReportMode::ACC | ReportMode::BALANCE),
            report::BTN_ACC_IR10_EXT6
        );
    }

    #[test]
    fn ir_format_follows_extension() {
        let steps = ir_enable_steps(ReportMode::IR);
        assert_eq!(
            steps[5],
            WriteStep::memory(AddressSpace::Register, IR_MODE_ADDR, &[IR_MODE_EXTENDED])
        );
        let steps = ir_enable_steps(ReportMode::IR | ReportMode::NUNCHUK);
        assert_eq!(
            steps[5],
            WriteStep::memory(AddressSpace::Register, IR_MODE_ADDR, &[IR_MODE_BASIC])
        );
    }
}
