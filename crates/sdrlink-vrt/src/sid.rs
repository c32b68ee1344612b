//! Stream id assignments.
//!
//! Stream ids tell the device which DSP unit a packet belongs to and
//! whether it carries samples or control traffic. Each board has two DSP
//! units per direction; ids are assigned per board as `BASE + dsp`.

/// Transmit sample streams from host to device.
pub const TX_DATA_SID_BASE: u32 = 0;

/// Asynchronous reports (flow-control acks and events) from a transmit DSP.
pub const TX_ASYNC_SID_BASE: u32 = 2;

/// Receive sample streams from device to host.
pub const RX_SID_BASE: u32 = 4;

/// Stream id for samples sent to transmit DSP `dsp`.
pub fn tx_data_sid(dsp: usize) -> u32 {
    TX_DATA_SID_BASE + dsp as u32
}

/// Stream id of async reports from transmit DSP `dsp`.
pub fn tx_async_sid(dsp: usize) -> u32 {
    TX_ASYNC_SID_BASE + dsp as u32
}

/// Stream id of samples from receive DSP `dsp`.
pub fn rx_sid(dsp: usize) -> u32 {
    RX_SID_BASE + dsp as u32
}

/// Returns a human-readable name for a stream id.
pub fn sid_name(sid: u32) -> &'static str {
    match sid {
        0 | 1 => "TX_DATA",
        2 | 3 => "TX_ASYNC",
        4 | 5 => "RX_DATA",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_do_not_overlap() {
        let ids = [tx_data_sid(0), tx_data_sid(1), tx_async_sid(0), tx_async_sid(1), rx_sid(0), rx_sid(1)];
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), ids.len());
    }

    #[test]
    fn names_follow_ranges() {
        assert_eq!(sid_name(tx_async_sid(1)), "TX_ASYNC");
        assert_eq!(sid_name(rx_sid(0)), "RX_DATA");
        assert_eq!(sid_name(99), "UNKNOWN");
    }
}
