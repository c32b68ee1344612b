//! Register-layer seam.
//!
//! The streaming core never touches device registers directly. Everything
//! it needs to configure on a board goes through [`BoardControl`].

use std::sync::{Mutex, PoisonError};

use sdrlink_vrt::WireFormat;
use tracing::debug;

use crate::binder::Direction;
use crate::config::UnderflowPolicy;
use crate::error::{Result, StreamError};

/// DSP units per board in each direction.
pub const DSPS_PER_BOARD: usize = 2;

/// Per-board register and routing access consumed by the I/O subsystem.
pub trait BoardControl: Send + Sync {
    /// Connection string (`IQ`, `QI`, `I`, `Q`) of frontend `subdev` on
    /// daughterboard slot `slot`.
    fn frontend_connection(&self, direction: Direction, slot: &str, subdev: &str) -> Result<String>;

    fn set_rx_dsp_mux(&self, dsp: usize, connection: &str, fe_swapped: bool) -> Result<()>;

    fn set_rx_frontend_mux(&self, frontend: usize, swapped: bool) -> Result<()>;

    fn set_tx_frontend_mux(&self, frontend: usize, connection: &str) -> Result<()>;

    /// DSP-to-frontend crossbar: straight (`false`) or crossed (`true`).
    fn set_front_switch(&self, direction: Direction, crossed: bool) -> Result<()>;

    /// Flush a DSP's device-side queue state.
    fn clear_dsp(&self, direction: Direction, dsp: usize) -> Result<()>;

    fn set_rx_nsamps_per_packet(&self, dsp: usize, samples: usize) -> Result<()>;

    fn set_rx_format(&self, dsp: usize, format: WireFormat, sc8_scalar: u32) -> Result<()>;

    fn set_tx_underflow_policy(&self, dsp: usize, policy: UnderflowPolicy) -> Result<()>;

    /// How often transmit DSP `dsp` reports flow-control progress.
    /// `(0, 0)` disables reports.
    fn set_flow_control_updates(&self, dsp: usize, cycles: u64, packets: u64) -> Result<()>;
}

/// One register-level request, as recorded by [`DetachedBoard`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardCall {
    RxDspMux { dsp: usize, connection: String, fe_swapped: bool },
    RxFrontendMux { frontend: usize, swapped: bool },
    TxFrontendMux { frontend: usize, connection: String },
    FrontSwitch { direction: Direction, crossed: bool },
    ClearDsp { direction: Direction, dsp: usize },
    RxSamplesPerPacket { dsp: usize, samples: usize },
    RxFormat { dsp: usize, format: WireFormat, sc8_scalar: u32 },
    TxUnderflowPolicy { dsp: usize, policy: UnderflowPolicy },
    FlowControlUpdates { dsp: usize, cycles: u64, packets: u64 },
}

/// A board reached only over its data transports.
///
/// Every request is logged and recorded instead of reaching registers.
/// Frontend connections default to `IQ` on both slots.
#[derive(Debug)]
pub struct DetachedBoard {
    connections: Vec<(Direction, String, String, String)>,
    calls: Mutex<Vec<BoardCall>>,
}

impl Default for DetachedBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl DetachedBoard {
    pub fn new() -> Self {
        Self {
            connections: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Override the connection reported for one frontend.
    pub fn with_connection(
        mut self,
        direction: Direction,
        slot: &str,
        subdev: &str,
        connection: &str,
    ) -> Self {
        self.connections.push((
            direction,
            slot.to_string(),
            subdev.to_string(),
            connection.to_string(),
        ));
        self
    }

    /// Requests received so far, oldest first.
    pub fn calls(&self) -> Vec<BoardCall> {
        self.lock().clone()
    }

    pub fn take_calls(&self) -> Vec<BoardCall> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<BoardCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: BoardCall) -> Result<()> {
        debug!(?call, "board request");
        self.lock().push(call);
        Ok(())
    }
}

fn check_dsp(dsp: usize) -> Result<()> {
    if dsp < DSPS_PER_BOARD {
        Ok(())
    } else {
        Err(StreamError::Board(format!("dsp {dsp} does not exist")))
    }
}

impl BoardControl for DetachedBoard {
    fn frontend_connection(&self, direction: Direction, slot: &str, subdev: &str) -> Result<String> {
        if !matches!(slot, "A" | "B") {
            return Err(StreamError::Board(format!("no daughterboard slot '{slot}'")));
        }
        let configured = self
            .connections
            .iter()
            .find(|(d, s, sd, _)| *d == direction && s == slot && sd == subdev)
            .map(|(_, _, _, conn)| conn.clone());
        Ok(configured.unwrap_or_else(|| "IQ".to_string()))
    }

    fn set_rx_dsp_mux(&self, dsp: usize, connection: &str, fe_swapped: bool) -> Result<()> {
        check_dsp(dsp)?;
        self.record(BoardCall::RxDspMux {
            dsp,
            connection: connection.to_string(),
            fe_swapped,
        })
    }

    fn set_rx_frontend_mux(&self, frontend: usize, swapped: bool) -> Result<()> {
        self.record(BoardCall::RxFrontendMux { frontend, swapped })
    }

    fn set_tx_frontend_mux(&self, frontend: usize, connection: &str) -> Result<()> {
        self.record(BoardCall::TxFrontendMux {
            frontend,
            connection: connection.to_string(),
        })
    }

    fn set_front_switch(&self, direction: Direction, crossed: bool) -> Result<()> {
        self.record(BoardCall::FrontSwitch { direction, crossed })
    }

    fn clear_dsp(&self, direction: Direction, dsp: usize) -> Result<()> {
        check_dsp(dsp)?;
        self.record(BoardCall::ClearDsp { direction, dsp })
    }

    fn set_rx_nsamps_per_packet(&self, dsp: usize, samples: usize) -> Result<()> {
        check_dsp(dsp)?;
        self.record(BoardCall::RxSamplesPerPacket { dsp, samples })
    }

    fn set_rx_format(&self, dsp: usize, format: WireFormat, sc8_scalar: u32) -> Result<()> {
        check_dsp(dsp)?;
        self.record(BoardCall::RxFormat {
            dsp,
            format,
            sc8_scalar,
        })
    }

    fn set_tx_underflow_policy(&self, dsp: usize, policy: UnderflowPolicy) -> Result<()> {
        check_dsp(dsp)?;
        self.record(BoardCall::TxUnderflowPolicy { dsp, policy })
    }

    fn set_flow_control_updates(&self, dsp: usize, cycles: u64, packets: u64) -> Result<()> {
        check_dsp(dsp)?;
        self.record(BoardCall::FlowControlUpdates {
            dsp,
            cycles,
            packets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_board_records_in_order() {
        let board = DetachedBoard::new();
        board.clear_dsp(Direction::Tx, 1).unwrap();
        board.set_flow_control_updates(0, 10, 2).unwrap();

        assert_eq!(
            board.take_calls(),
            vec![
                BoardCall::ClearDsp {
                    direction: Direction::Tx,
                    dsp: 1
                },
                BoardCall::FlowControlUpdates {
                    dsp: 0,
                    cycles: 10,
                    packets: 2
                },
            ]
        );
        assert!(board.calls().is_empty());
    }

    #[test]
    fn connection_overrides_and_unknown_slot() {
        let board = DetachedBoard::new().with_connection(Direction::Rx, "B", "0", "QI");
        assert_eq!(board.frontend_connection(Direction::Rx, "B", "0").unwrap(), "QI");
        assert_eq!(board.frontend_connection(Direction::Tx, "B", "0").unwrap(), "IQ");
        assert!(board.frontend_connection(Direction::Rx, "C", "0").is_err());
        assert!(board.set_rx_format(2, WireFormat::Sc16, 0).is_err());
    }
}
