use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sdrlink_stream::{BoardIo, DetachedBoard, IoConfig, IoSubsystem};
use sdrlink_transport::{DatagramTransport, UdpConfig, UdpTransport};
use tracing::info;

use crate::cmd::{parse_duration, ListenArgs};
use crate::exit::{stream_error, transport_error, CliError, CliResult, SUCCESS, TIMEOUT};
use crate::output::{print_event, OutputFormat};

const POLL: Duration = Duration::from_millis(100);

pub fn run(args: ListenArgs, config: &IoConfig, format: OutputFormat) -> CliResult<i32> {
    let deadline = args
        .timeout
        .as_deref()
        .map(parse_duration)
        .transpose()?
        .map(|timeout| Instant::now() + timeout);

    let transport = connect(args.device, args.bind, args.frame_size)?;
    let io = open_single_tx(config, transport)?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        if let Some(event) = io.recv_async_msg(POLL) {
            print_event(&event, format);
            printed = printed.saturating_add(1);
            if args.count.is_some_and(|count| printed >= count) {
                return Ok(SUCCESS);
            }
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            info!(printed, "listen timed out");
            return Ok(if args.count.is_some() { TIMEOUT } else { SUCCESS });
        }
    }

    Ok(SUCCESS)
}

/// Connected UDP transport to one device DSP port.
pub fn connect(
    device: SocketAddr,
    bind: Option<SocketAddr>,
    frame_size: usize,
) -> CliResult<Arc<dyn DatagramTransport>> {
    let config = UdpConfig {
        recv_frame_size: frame_size,
        send_frame_size: frame_size,
        ..UdpConfig::default()
    };
    let transport = match bind {
        Some(local) => UdpTransport::bind_and_connect(local, device, config),
        None => UdpTransport::connect_with_config(device, config),
    }
    .map_err(|err| transport_error("connect failed", err))?;
    Ok(Arc::new(transport))
}

/// I/O subsystem over one board with a single transmit DSP and no
/// register access.
pub fn open_single_tx(
    config: &IoConfig,
    transport: Arc<dyn DatagramTransport>,
) -> CliResult<IoSubsystem> {
    IoSubsystem::new(
        config.clone(),
        vec![BoardIo {
            control: Arc::new(DetachedBoard::new()),
            rx_transports: Vec::new(),
            tx_transports: vec![transport],
        }],
    )
    .map_err(|err| stream_error("io start failed", err))
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
