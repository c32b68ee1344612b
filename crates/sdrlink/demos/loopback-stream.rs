//! Transmit a burst to a simulated device and receive it back.
//!
//! The device thread acknowledges every transmit packet, reports an
//! underflow at end of burst and loops the samples back on its receive
//! DSP. No network or hardware needed.
//!
//! Run with:
//!   cargo run --example loopback-stream --features cli

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use num_complex::Complex;
use sdrlink::stream::{BoardIo, DetachedBoard, IoConfig, IoSubsystem, StreamArgs, TxMetadata};
use sdrlink::transport::{DatagramTransport, LoopbackTransport, DEFAULT_FRAME_SIZE};
use sdrlink::vrt::sid::{rx_sid, tx_async_sid};
use sdrlink::vrt::{encode_packet, unpack, HostFormat, PacketHeader};

const BURST: usize = 5_000;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let (host_tx, device_tx) = LoopbackTransport::pair(DEFAULT_FRAME_SIZE);
    let (host_rx, device_rx) = LoopbackTransport::pair(DEFAULT_FRAME_SIZE);
    let running = Arc::new(AtomicBool::new(true));
    let device = {
        let running = Arc::clone(&running);
        thread::spawn(move || simulate_device(device_tx, device_rx, running))
    };

    let io = IoSubsystem::new(
        IoConfig::default(),
        vec![BoardIo {
            control: Arc::new(DetachedBoard::new()),
            rx_transports: vec![Arc::new(host_rx)],
            tx_transports: vec![Arc::new(host_tx)],
        }],
    )?;

    let mut tx_args = StreamArgs::new(HostFormat::Fc32);
    tx_args.apply_args("underflow_policy=next_burst")?;
    let mut tx = io.get_tx_stream::<Complex<f32>>(&tx_args)?;
    let mut rx = io.get_rx_stream::<Complex<f32>>(&StreamArgs::new(HostFormat::Fc32))?;

    let burst: Vec<Complex<f32>> = (0..BURST)
        .map(|n| Complex::from_polar(0.7, n as f32 * 0.05))
        .collect();
    let metadata = TxMetadata {
        start_of_burst: true,
        end_of_burst: true,
        time_spec: None,
    };
    let outcome = tx.send(&[&burst[..]], &metadata, Duration::from_secs(1))?;
    eprintln!("sent {} samples, drained={}", outcome.samples, tx.flush(Duration::from_secs(1)));

    let mut received = Vec::with_capacity(BURST);
    let mut buff = vec![Complex::default(); rx.max_samples_per_packet()];
    while received.len() < BURST {
        let md = rx.recv(&mut [&mut buff[..]], Duration::from_millis(200))?;
        if md.samples == 0 {
            break;
        }
        received.extend_from_slice(&buff[..md.samples]);
    }
    let worst = burst
        .iter()
        .zip(&received)
        .map(|(a, b)| (a - b).norm())
        .fold(0.0f32, f32::max);
    eprintln!("received {} samples, worst error {worst:.6}", received.len());

    while let Some(event) = io.recv_async_msg(Duration::from_millis(200)) {
        eprintln!("event on channel {}: {:?}", event.channel, event.code);
    }

    running.store(false, Ordering::SeqCst);
    drop(io);
    let _ = device.join();
    Ok(())
}

fn simulate_device(tx: LoopbackTransport, rx: LoopbackTransport, running: Arc<AtomicBool>) {
    let mut rx_seq = 0u32;
    while running.load(Ordering::SeqCst) {
        let Ok(Some(datagram)) = tx.recv_frame(Duration::from_millis(20)) else {
            continue;
        };
        let Ok(packet) = unpack(&datagram) else {
            continue;
        };

        let ack = PacketHeader::context(tx_async_sid(0), 0, 0);
        if let Ok(ack) = encode_packet(&ack, packet.sequence, &[]) {
            tx.send_raw(ack);
        }

        let mut echo = PacketHeader::data(rx_sid(0), 0);
        echo.end_of_burst = packet.header.end_of_burst;
        if let Ok(echo) = encode_packet(&echo, rx_seq, packet.body) {
            rx.send_raw(echo);
            rx_seq = rx_seq.wrapping_add(1);
        }

        if packet.header.end_of_burst {
            let underflow = PacketHeader::context(tx_async_sid(0), 0, 0x02);
            if let Ok(report) = encode_packet(&underflow, 0, &[]) {
                tx.send_raw(report);
            }
        }
    }
}
