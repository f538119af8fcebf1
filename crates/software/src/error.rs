//! The one error taxonomy shared by the Transfer HAL, device drivers, and the update coordinator.

use embedded_hal::i2c::{self, ErrorKind};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};

/// Everything that can go wrong between a channel value and the bus.
///
/// Bus-level failures ([`Timeout`](Self::Timeout), [`NakReceived`](Self::NakReceived),
/// [`ArbitrationLost`](Self::ArbitrationLost), [`TransferFailure`](Self::TransferFailure)) are recoverable: the
/// coordinator keeps the device dirty and the next pass or periodic refresh writes it again. The remaining variants
/// signal a programming error and are reported immediately rather than retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ToPrimitive, FromPrimitive, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TransferError {
    /// A prior operation on the same resource is unfinished; nothing was changed.
    #[error("resource busy")]
    Busy = 1,
    /// The bus did not finish the transaction within its budget.
    #[error("transfer timed out")]
    Timeout = 2,
    /// The target did not acknowledge its address or data.
    #[error("no acknowledge received")]
    NakReceived = 3,
    /// Another controller won arbitration of the bus.
    #[error("bus arbitration lost")]
    ArbitrationLost = 4,
    /// A lower-level transport fault, or a transfer which was aborted.
    #[error("transfer failed")]
    TransferFailure = 5,
    /// An argument was empty, too large, or out of range.
    #[error("invalid parameter")]
    InvalidParameter = 6,
    /// The resource has not been initialized.
    #[error("not initialized")]
    NotInitialized = 7,
    /// The resource was initialized twice without being deinitialized in between.
    #[error("already initialized")]
    AlreadyInitialized = 8,
}

impl TransferError {
    /// Maps an I2C bus error onto the taxonomy.
    pub fn from_bus<E: i2c::Error>(error: E) -> Self {
        Self::from(error.kind())
    }

    /// Returns `true` for failures the coordinator retries on its own.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Busy
                | Self::Timeout
                | Self::NakReceived
                | Self::ArbitrationLost
                | Self::TransferFailure
        )
    }

    /// Returns `true` for errors which can only come from incorrect use of the API.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidParameter | Self::NotInitialized | Self::AlreadyInitialized
        )
    }

    /// Stable numeric code, e.g. for status displays that can only count.
    pub fn code(&self) -> u8 {
        self.to_u8().unwrap_or_default()
    }

    /// Inverse of [`code()`](Self::code).
    pub fn from_code(code: u8) -> Option<Self> {
        <Self as FromPrimitive>::from_u8(code)
    }
}

impl From<ErrorKind> for TransferError {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NoAcknowledge(_) => Self::NakReceived,
            ErrorKind::ArbitrationLoss => Self::ArbitrationLost,
            _ => Self::TransferFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::NoAcknowledgeSource;

    #[test]
    fn bus_errors_map_onto_taxonomy() {
        assert_eq!(
            TransferError::NakReceived,
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address).into(),
            "Expected left but got right"
        );
        assert_eq!(
            TransferError::NakReceived,
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data).into(),
            "Expected left but got right"
        );
        assert_eq!(
            TransferError::ArbitrationLost,
            ErrorKind::ArbitrationLoss.into(),
            "Expected left but got right"
        );
        assert_eq!(
            TransferError::TransferFailure,
            ErrorKind::Bus.into(),
            "Expected left but got right"
        );
        assert_eq!(
            TransferError::TransferFailure,
            ErrorKind::Overrun.into(),
            "Expected left but got right"
        );
    }

    #[test]
    fn codes_are_stable_and_reversible() {
        assert_eq!(1, TransferError::Busy.code());
        assert_eq!(3, TransferError::NakReceived.code());
        assert_eq!(8, TransferError::AlreadyInitialized.code());
        assert_eq!(
            Some(TransferError::Timeout),
            TransferError::from_code(TransferError::Timeout.code())
        );
        assert_eq!(None, TransferError::from_code(0));
        assert_eq!(None, TransferError::from_code(9));
    }

    #[test]
    fn recoverable_and_programming_errors_are_disjoint() {
        for code in 1..=8 {
            let error = TransferError::from_code(code).unwrap();
            assert_ne!(
                error.is_recoverable(),
                error.is_programming_error(),
                "{:?} should be exactly one of recoverable or a programming error",
                error
            );
        }
    }
}
