use motelink_device::ExtensionType;
use motelink_frame::{Buttons, StatusFlags};
use serde::Serialize;

use crate::cmd::{connect, finish, StatusArgs};
use crate::exit::{device_error, CliResult, SUCCESS};
use crate::output::{print_record, OutputFormat};

#[derive(Serialize)]
struct StatusOutput {
    battery: u8,
    battery_low: bool,
    leds: u8,
    extension_present: bool,
    extension: ExtensionType,
    ir: bool,
    speaker: bool,
    buttons: Buttons,
}

pub fn run(args: StatusArgs, format: OutputFormat) -> CliResult<i32> {
    let device = connect(&args.connect)?;
    let status = device
        .request_status()
        .map_err(|err| device_error("status request failed", err))?;
    let extension = device.state().extension;
    finish(device)?;

    let out = StatusOutput {
        battery: status.battery,
        battery_low: status.flags.contains(StatusFlags::BATTERY_LOW),
        leds: status.flags.leds(),
        extension_present: status.flags.contains(StatusFlags::EXTENSION),
        extension,
        ir: status.flags.contains(StatusFlags::IR),
        speaker: status.flags.contains(StatusFlags::SPEAKER),
        buttons: status.buttons,
    };
    print_record(&out, format);
    Ok(SUCCESS)
}
