use motelink_frame::AddressSpace;
use serde::Serialize;

use crate::cmd::{connect, finish, ReadArgs, WriteArgs};
use crate::exit::{device_error, CliResult, SUCCESS};
use crate::output::{hex, print_raw, print_record, OutputFormat};

#[derive(Serialize)]
struct ReadOutput {
    space: String,
    offset: String,
    len: usize,
    data: String,
}

#[derive(Serialize)]
struct WriteOutput {
    space: String,
    offset: String,
    written: usize,
}

pub fn read(args: ReadArgs, format: OutputFormat) -> CliResult<i32> {
    let space = AddressSpace::from(args.space);
    let device = connect(&args.connect)?;
    let data = device
        .read(space, args.offset, args.len as usize)
        .map_err(|err| device_error("read failed", err))?;
    finish(device)?;

    if matches!(format, OutputFormat::Raw) {
        print_raw(&data);
        return Ok(SUCCESS);
    }
    let out = ReadOutput {
        space: space.to_string(),
        offset: format!("0x{:06X}", args.offset),
        len: data.len(),
        data: hex(&data),
    };
    print_record(&out, format);
    Ok(SUCCESS)
}

pub fn write(args: WriteArgs, format: OutputFormat) -> CliResult<i32> {
    let space = AddressSpace::from(args.space);
    let device = connect(&args.connect)?;
    let written = device
        .write(space, args.offset, &args.data.0)
        .map_err(|err| device_error("write failed", err))?;
    finish(device)?;

    let out = WriteOutput {
        space: space.to_string(),
        offset: format!("0x{:06X}", args.offset),
        written,
    };
    print_record(&out, format);
    Ok(SUCCESS)
}
