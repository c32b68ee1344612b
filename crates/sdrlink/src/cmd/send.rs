use std::time::Duration;

use num_complex::Complex;
use sdrlink_stream::{AsyncEvent, IoConfig, StreamArgs, TxMetadata};
use sdrlink_vrt::HostFormat;
use serde::Serialize;
use tracing::{info, warn};

use crate::cmd::listen::{connect, open_single_tx};
use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{stream_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_event, print_json, OutputFormat};

/// Packets handed to the streamer per send call.
const PACKETS_PER_CALL: usize = 16;

#[derive(Debug, Serialize)]
struct SendSummary {
    requested: usize,
    sent: usize,
    timed_out: bool,
    drained: bool,
    events: usize,
}

pub fn run(args: SendArgs, config: &IoConfig, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    if !(0.0..=1.0).contains(&args.amplitude) {
        return Err(CliError::new(USAGE, "amplitude must be within 0.0..=1.0"));
    }
    let mut stream_args = StreamArgs::new(HostFormat::Fc32);
    stream_args
        .apply_args(&args.args)
        .map_err(|err| stream_error("invalid stream args", err))?;

    let transport = connect(args.device, None, args.frame_size)?;
    let io = open_single_tx(config, transport)?;
    let mut streamer = io
        .get_tx_stream::<Complex<f32>>(&stream_args)
        .map_err(|err| stream_error("tx stream failed", err))?;

    let tone = test_tone(args.samples, args.tone, args.amplitude);
    let chunk = streamer.max_samples_per_packet() * PACKETS_PER_CALL;

    let mut sent = 0;
    let mut timed_out = false;
    for block in tone.chunks(chunk.max(1)) {
        let metadata = TxMetadata {
            start_of_burst: sent == 0,
            end_of_burst: sent + block.len() == tone.len(),
            time_spec: None,
        };
        let outcome = streamer
            .send(&[block], &metadata, timeout)
            .map_err(|err| stream_error("send failed", err))?;
        sent += outcome.samples;
        if outcome.timed_out {
            warn!(sent, "device stopped acknowledging");
            timed_out = true;
            break;
        }
    }

    let drained = !timed_out && streamer.flush(timeout);
    info!(sent, drained, "transmit finished");

    let events = drain_events(&io, format);
    print_json(&SendSummary {
        requested: args.samples,
        sent,
        timed_out,
        drained,
        events: events.len(),
    });

    Ok(if timed_out { TIMEOUT } else { SUCCESS })
}

fn drain_events(io: &sdrlink_stream::IoSubsystem, format: OutputFormat) -> Vec<AsyncEvent> {
    let mut events = Vec::new();
    while let Some(event) = io.recv_async_msg(Duration::ZERO) {
        print_event(&event, format);
        events.push(event);
    }
    events
}

/// Complex exponential at `cycles_per_sample` of the sample rate.
fn test_tone(len: usize, cycles_per_sample: f32, amplitude: f32) -> Vec<Complex<f32>> {
    let step = std::f32::consts::TAU * cycles_per_sample;
    (0..len)
        .map(|n| Complex::from_polar(amplitude, step * n as f32))
        .collect()
}
