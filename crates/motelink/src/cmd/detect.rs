use motelink_device::{DeviceError, DeviceFlags, ExtensionType};
use serde::Serialize;

use crate::cmd::{connect, finish, DetectArgs};
use crate::exit::{device_error, CliResult, SUCCESS};
use crate::output::{print_record, OutputFormat};

#[derive(Serialize)]
struct DetectOutput {
    extension: ExtensionType,
    id: Option<String>,
    motionplus: bool,
}

pub fn run(args: DetectArgs, format: OutputFormat) -> CliResult<i32> {
    let device = connect(&args.connect)?;
    let mut extension = device
        .detect_extension()
        .map_err(|err| device_error("extension detection failed", err))?;

    let mut motionplus = false;
    if args.motionplus {
        match device.enable(DeviceFlags::MOTIONPLUS) {
            Ok(()) => {
                motionplus = true;
                extension = device.state().extension;
            }
            // The regular extension was re-detected; report that one.
            Err(DeviceError::ExtensionMismatch { found, .. }) => extension = found,
            Err(err) => return Err(device_error("MotionPlus activation failed", err)),
        }
    }
    finish(device)?;

    let out = DetectOutput {
        extension,
        id: extension.id().map(|id| crate::output::hex(&id)),
        motionplus,
    };
    print_record(&out, format);
    Ok(SUCCESS)
}
