use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::binder::Direction;
use crate::board::{BoardControl, DSPS_PER_BOARD};
use crate::error::{Result, StreamError};

/// One `slot:subdev` entry, e.g. `A:0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubdevSpecPair {
    /// Daughterboard slot, `A` or `B`.
    pub slot: String,
    /// Frontend name on that daughterboard.
    pub subdev: String,
}

impl fmt::Display for SubdevSpecPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.subdev.is_empty() {
            f.write_str(&self.slot)
        } else {
            write!(f, "{}:{}", self.slot, self.subdev)
        }
    }
}

/// Ordered frontend selection for one board; entry `i` feeds DSP `i`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubdevSpec(Vec<SubdevSpecPair>);

impl SubdevSpec {
    pub fn new(pairs: Vec<SubdevSpecPair>) -> Self {
        Self(pairs)
    }

    pub fn pairs(&self) -> &[SubdevSpecPair] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check the spec against a board before touching any register.
    pub fn validate(&self, board: &dyn BoardControl, direction: Direction) -> Result<()> {
        if self.0.is_empty() {
            return Err(StreamError::InvalidSubdevSpec(format!(
                "{direction} subdev spec is empty"
            )));
        }
        if self.0.len() > DSPS_PER_BOARD {
            return Err(StreamError::InvalidSubdevSpec(format!(
                "{direction} subdev spec '{self}' needs {} DSPs, board has {DSPS_PER_BOARD}",
                self.0.len()
            )));
        }
        for (i, pair) in self.0.iter().enumerate() {
            if !matches!(pair.slot.as_str(), "A" | "B") {
                return Err(StreamError::InvalidSubdevSpec(format!(
                    "unknown daughterboard slot '{}'",
                    pair.slot
                )));
            }
            if self.0[..i].contains(pair) {
                return Err(StreamError::InvalidSubdevSpec(format!(
                    "frontend {pair} selected twice"
                )));
            }
            board.frontend_connection(direction, &pair.slot, &pair.subdev)?;
        }
        Ok(())
    }

    fn crossbar_crossed(&self) -> bool {
        self.0.first().is_some_and(|pair| pair.slot != "A")
    }
}

impl fmt::Display for SubdevSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, pair) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{pair}")?;
        }
        Ok(())
    }
}

impl FromStr for SubdevSpec {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        s.split_whitespace()
            .map(|token| {
                let (slot, subdev) = token.split_once(':').unwrap_or((token, ""));
                if slot.is_empty() {
                    return Err(StreamError::InvalidSubdevSpec(format!(
                        "missing slot in '{token}'"
                    )));
                }
                Ok(SubdevSpecPair {
                    slot: slot.to_string(),
                    subdev: subdev.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(SubdevSpec)
    }
}

fn frontend_index(slot: &str) -> usize {
    usize::from(slot != "A")
}

/// Route a board's receive DSPs per `spec`. Returns the new occupancy.
pub fn apply_rx_spec(board: &dyn BoardControl, spec: &SubdevSpec) -> Result<usize> {
    spec.validate(board, Direction::Rx)?;

    for (dsp, pair) in spec.pairs().iter().enumerate() {
        let conn = board.frontend_connection(Direction::Rx, &pair.slot, &pair.subdev)?;
        // Known oddity: "QI" and "Q" count as swapped. Kept as the device
        // firmware expects it.
        let fe_swapped = conn == "QI" || conn == "Q";
        board.set_rx_dsp_mux(dsp, &conn, fe_swapped)?;
        board.set_rx_frontend_mux(frontend_index(&pair.slot), fe_swapped)?;
    }
    board.set_front_switch(Direction::Rx, spec.crossbar_crossed())?;

    debug!(spec = %spec, "rx subdev spec applied");
    Ok(spec.len())
}

/// Route a board's transmit DSPs per `spec`. Returns the new occupancy.
pub fn apply_tx_spec(board: &dyn BoardControl, spec: &SubdevSpec) -> Result<usize> {
    spec.validate(board, Direction::Tx)?;

    for pair in spec.pairs() {
        let conn = board.frontend_connection(Direction::Tx, &pair.slot, &pair.subdev)?;
        board.set_tx_frontend_mux(frontend_index(&pair.slot), &conn)?;
    }
    board.set_front_switch(Direction::Tx, spec.crossbar_crossed())?;

    debug!(spec = %spec, "tx subdev spec applied");
    Ok(spec.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{BoardCall, DetachedBoard};

    #[test]
    fn parses_and_prints() {
        let spec: SubdevSpec = "A:0  B:0".parse().unwrap();
        assert_eq!(spec.len(), 2);
        assert_eq!(spec.pairs()[1].slot, "B");
        assert_eq!(spec.to_string(), "A:0 B:0");

        let bare: SubdevSpec = "B".parse().unwrap();
        assert_eq!(bare.pairs()[0].subdev, "");
        assert!(":0".parse::<SubdevSpec>().is_err());
    }

    #[test]
    fn validation_rejects_bad_specs() {
        let board = DetachedBoard::new();
        for bad in ["", "A:0 B:0 A:1", "C:0", "A:0 A:0"] {
            let spec: SubdevSpec = bad.parse().unwrap();
            assert!(
                spec.validate(&board, Direction::Rx).is_err(),
                "'{bad}' should be rejected"
            );
        }
    }

    #[test]
    fn rx_spec_sets_muxes_and_straight_crossbar() {
        let board = DetachedBoard::new().with_connection(Direction::Rx, "B", "0", "Q");
        let spec: SubdevSpec = "A:0 B:0".parse().unwrap();

        assert_eq!(apply_rx_spec(&board, &spec).unwrap(), 2);
        assert_eq!(
            board.calls(),
            vec![
                BoardCall::RxDspMux { dsp: 0, connection: "IQ".into(), fe_swapped: false },
                BoardCall::RxFrontendMux { frontend: 0, swapped: false },
                BoardCall::RxDspMux { dsp: 1, connection: "Q".into(), fe_swapped: true },
                BoardCall::RxFrontendMux { frontend: 1, swapped: true },
                BoardCall::FrontSwitch { direction: Direction::Rx, crossed: false },
            ]
        );
    }

    #[test]
    fn qi_counts_as_swapped() {
        let board = DetachedBoard::new().with_connection(Direction::Rx, "A", "0", "QI");
        apply_rx_spec(&board, &"A:0".parse().unwrap()).unwrap();
        assert!(board.calls().contains(&BoardCall::RxDspMux {
            dsp: 0,
            connection: "QI".into(),
            fe_swapped: true
        }));
    }

    #[test]
    fn tx_spec_starting_on_b_crosses_crossbar() {
        let board = DetachedBoard::new();
        let spec: SubdevSpec = "B:0 A:0".parse().unwrap();

        assert_eq!(apply_tx_spec(&board, &spec).unwrap(), 2);
        assert_eq!(
            board.calls(),
            vec![
                BoardCall::TxFrontendMux { frontend: 1, connection: "IQ".into() },
                BoardCall::TxFrontendMux { frontend: 0, connection: "IQ".into() },
                BoardCall::FrontSwitch { direction: Direction::Tx, crossed: true },
            ]
        );
    }

    #[test]
    fn invalid_spec_touches_nothing() {
        let board = DetachedBoard::new();
        assert!(apply_tx_spec(&board, &"A:0 C:0".parse().unwrap()).is_err());
        assert!(board.calls().is_empty());
    }
}
