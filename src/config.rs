//! Engine tunables

use std::time::Duration;

/// Memory page size assumed when sizing write transfers.
const PAGE_SIZE: usize = 4096;

/// Driver configuration, shared by every device the driver attaches
///
/// ```
/// use std::time::Duration;
/// use usbrt::Config;
///
/// let config = Config::new()
///     .with_writes_in_flight(1)
///     .with_read_timeout(Some(Duration::from_millis(50)));
/// assert_eq!(config.writes_in_flight(), 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    writes_in_flight: usize,
    max_transfer: usize,
    read_timeout: Option<Duration>,
    drawdown_timeout: Duration,
}

impl Config {
    /// Default number of send transfers that may be outstanding at once.
    pub const WRITES_IN_FLIGHT: usize = 8;
    /// Default largest write payload.
    ///
    /// Keeps each allocation within a page. 512 is the largest possible
    /// high-speed bulk packet, so a transfer holds a whole number of packets.
    pub const MAX_TRANSFER: usize = PAGE_SIZE - 512;
    /// Default time that draw-down lets send transfers complete on their own.
    pub const DRAWDOWN_TIMEOUT: Duration = Duration::from_millis(1000);

    pub const fn new() -> Self {
        Config {
            writes_in_flight: Self::WRITES_IN_FLIGHT,
            max_transfer: Self::MAX_TRANSFER,
            read_timeout: None,
            drawdown_timeout: Self::DRAWDOWN_TIMEOUT,
        }
    }

    /// Set the number of admission slots
    ///
    /// Clamped to at least one.
    pub const fn with_writes_in_flight(mut self, writes_in_flight: usize) -> Self {
        self.writes_in_flight = if writes_in_flight == 0 {
            1
        } else {
            writes_in_flight
        };
        self
    }

    /// Set the largest payload that one `write()` sends
    ///
    /// Clamped to at least one byte.
    pub const fn with_max_transfer(mut self, max_transfer: usize) -> Self {
        self.max_transfer = if max_transfer == 0 { 1 } else { max_transfer };
        self
    }

    /// Bound how long a blocking read waits for an outstanding receive
    ///
    /// `None`, the default, waits until the receive completes or the
    /// caller is interrupted.
    pub const fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Set how long draw-down waits before cancelling send transfers
    pub const fn with_drawdown_timeout(mut self, drawdown_timeout: Duration) -> Self {
        self.drawdown_timeout = drawdown_timeout;
        self
    }

    pub const fn writes_in_flight(&self) -> usize {
        self.writes_in_flight
    }

    pub const fn max_transfer(&self) -> usize {
        self.max_transfer
    }

    pub const fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub const fn drawdown_timeout(&self) -> Duration {
        self.drawdown_timeout
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
