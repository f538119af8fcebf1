//! Counters describing how a device's transfers have fared.

use crate::error::TransferError;

/// Running statistics for the transfers of one device.
///
/// The average is an exponentially weighted one, `avg' = (avg * 7 + latest) / 8`, which smooths out noise without
/// dividing by an ever-growing sample count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferStats {
    /// Transfers which reached a terminal state.
    pub total: u32,
    /// Transfers which completed.
    pub successful: u32,
    /// Transfers which ended in any error state.
    pub failed: u32,
    /// Failures because the transaction overran its timeout.
    pub timeouts: u32,
    /// Failures because the target did not acknowledge.
    pub naks: u32,
    /// Failures because bus arbitration was lost.
    pub arbitration_lost: u32,
    /// Transport-layer failures, including aborted transfers.
    pub transfer_failures: u32,
    /// Weighted rolling average of transfer duration, in microseconds.
    pub average_us: u32,
    /// Longest transfer observed, in microseconds.
    pub max_us: u32,
}

impl TransferStats {
    /// Accounts for one finished transfer.
    pub fn record(&mut self, result: Result<(), TransferError>, duration_us: u32) {
        self.total = self.total.saturating_add(1);
        match result {
            Ok(()) => self.successful = self.successful.saturating_add(1),
            Err(error) => {
                self.failed = self.failed.saturating_add(1);
                let counter = match error {
                    TransferError::Timeout => &mut self.timeouts,
                    TransferError::NakReceived => &mut self.naks,
                    TransferError::ArbitrationLost => &mut self.arbitration_lost,
                    _ => &mut self.transfer_failures,
                };
                *counter = counter.saturating_add(1);
            }
        }
        self.average_us = ((u64::from(self.average_us) * 7 + u64::from(duration_us)) / 8) as u32;
        self.max_us = self.max_us.max(duration_us);
    }

    /// Clears every counter.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
