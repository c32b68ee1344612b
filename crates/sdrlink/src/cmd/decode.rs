use sdrlink_vrt::unpack;

use crate::cmd::DecodeArgs;
use crate::exit::{io_error, packet_error, CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{print_packet, OutputFormat, PacketOutput};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let bytes = match (&args.hex, &args.file) {
        (Some(hex), _) => parse_hex(hex)?,
        (None, Some(path)) => std::fs::read(path)
            .map_err(|err| io_error(&format!("read {}", path.display()), err))?,
        (None, None) => return Err(CliError::new(USAGE, "no packet given")),
    };

    let packet = unpack(&bytes).map_err(|err| packet_error("decode failed", err))?;
    print_packet(&PacketOutput::from_packet(&packet), format);
    Ok(SUCCESS)
}

fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let digits: Vec<u8> = input
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let digits = digits
        .strip_prefix(b"0x".as_slice())
        .unwrap_or(&digits[..]);
    if digits.len() % 2 != 0 {
        return Err(CliError::new(DATA_INVALID, "hex input has an odd number of digits"));
    }
    digits
        .chunks(2)
        .map(|pair| {
            let hi = hex_value(pair[0]);
            let lo = hex_value(pair[1]);
            match (hi, lo) {
                (Some(hi), Some(lo)) => Ok((hi << 4) | lo),
                _ => Err(CliError::new(
                    DATA_INVALID,
                    format!("invalid hex digits: {}", String::from_utf8_lossy(pair)),
                )),
            }
        })
        .collect()
}

fn hex_value(digit: u8) -> Option<u8> {
    char::from(digit).to_digit(16).map(|v| v as u8)
}
