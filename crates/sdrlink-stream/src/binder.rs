use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::error::{Result, StreamError};

/// Stream direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Rx,
    Tx,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Rx => "rx",
            Direction::Tx => "tx",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channels a board currently contributes in each direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoardOccupancy {
    pub rx: usize,
    pub tx: usize,
}

impl BoardOccupancy {
    pub fn get(&self, direction: Direction) -> usize {
        match direction {
            Direction::Rx => self.rx,
            Direction::Tx => self.tx,
        }
    }

    fn set(&mut self, direction: Direction, count: usize) {
        match direction {
            Direction::Rx => self.rx = count,
            Direction::Tx => self.tx = count,
        }
    }
}

/// Physical location of a logical channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelBinding {
    pub board: usize,
    /// DSP unit within the board.
    pub unit: usize,
}

/// Immutable snapshot of every board's occupancy, in board order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceLayout {
    boards: Vec<BoardOccupancy>,
}

impl DeviceLayout {
    pub fn new(boards: Vec<BoardOccupancy>) -> Self {
        Self { boards }
    }

    pub fn boards(&self) -> &[BoardOccupancy] {
        &self.boards
    }

    /// Total logical channels in `direction`.
    pub fn total(&self, direction: Direction) -> usize {
        self.boards.iter().map(|b| b.get(direction)).sum()
    }

    /// Map logical channel `index` to its board and DSP unit.
    ///
    /// Boards contribute contiguous runs of indices in board order.
    pub fn resolve(&self, direction: Direction, index: usize) -> Result<ChannelBinding> {
        let mut first = 0;
        for (board, occupancy) in self.boards.iter().enumerate() {
            let count = occupancy.get(direction);
            if index < first + count {
                return Ok(ChannelBinding {
                    board,
                    unit: index - first,
                });
            }
            first += count;
        }
        Err(StreamError::ChannelOutOfRange {
            index,
            total: first,
        })
    }

    fn with_occupancy(&self, board: usize, direction: Direction, count: usize) -> Result<Self> {
        let mut next = self.clone();
        next.boards
            .get_mut(board)
            .ok_or(StreamError::BoardOutOfRange(board))?
            .set(direction, count);
        Ok(next)
    }
}

/// Shared owner of the current [`DeviceLayout`].
///
/// Readers take an `Arc` snapshot; updates build a new layout and swap it
/// in, so a resolution never sees a half-applied change.
#[derive(Debug, Default)]
pub struct ChannelBinder {
    layout: RwLock<Arc<DeviceLayout>>,
}

impl ChannelBinder {
    pub fn new(layout: DeviceLayout) -> Self {
        Self {
            layout: RwLock::new(Arc::new(layout)),
        }
    }

    /// The layout in effect right now.
    pub fn snapshot(&self) -> Arc<DeviceLayout> {
        Arc::clone(&self.layout.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn resolve(&self, direction: Direction, index: usize) -> Result<ChannelBinding> {
        self.snapshot().resolve(direction, index)
    }

    pub fn total(&self, direction: Direction) -> usize {
        self.snapshot().total(direction)
    }

    /// Publish a new occupancy for one board.
    pub fn set_occupancy(&self, board: usize, direction: Direction, count: usize) -> Result<()> {
        let mut layout = self.layout.write().unwrap_or_else(PoisonError::into_inner);
        let next = layout.with_occupancy(board, direction, count)?;
        *layout = Arc::new(next);
        debug!(board, %direction, count, "channel occupancy updated");
        Ok(())
    }
}
