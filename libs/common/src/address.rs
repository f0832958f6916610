//! Address helpers shared by the sync service and its tests.

use alloy_primitives::{Address, B256};

/// Returns true when `address` refers to a deployed contract slot, i.e. it is
/// not the zero sentinel. Controllers, sale managers, converters and
/// distributions are all optional and reported as zero when absent.
pub fn is_usable(address: &Address) -> bool {
    !address.is_zero()
}

/// Left-pads an address to a 32 byte topic word for log filtering.
///
/// `0x5654Fb7027636dE7B985C778Cc063A9de1406Ef8` becomes
/// `0x0000000000000000000000005654fb7027636de7b985c778cc063a9de1406ef8`.
pub fn pad_for_topic(address: &Address) -> B256 {
    address.into_word()
}
