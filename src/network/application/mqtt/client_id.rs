//! Client identifier derived from device-unique entropy.
//!
//! The identifier is computed once at startup as `<prefix>_<crc32>` where the
//! checksum is taken over a hardware id (MCU serial, MAC address, ...). The
//! same board therefore always reconnects under the same name, which keeps
//! the broker's view of the device stable across link losses.

use core::fmt::Write;
use heapless::String;

/// Longest identifier every 3.1.1 broker must accept.
pub const MAX_CLIENT_ID_LEN: usize = 23;
/// Room left for the prefix after `_` and eight hex digits.
const MAX_PREFIX_LEN: usize = MAX_CLIENT_ID_LEN - 9;

/// Why an identifier could not be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClientIdError {
    /// The prefix is empty or not ASCII alphanumeric.
    InvalidPrefix,
    /// No entropy bytes were supplied.
    NoEntropy,
}

/// An MQTT client identifier, at most 23 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientId(String<MAX_CLIENT_ID_LEN>);

impl ClientId {
    /// Build `<prefix>_<crc32 of entropy in lowercase hex>`.
    ///
    /// The prefix is cut to fit the 23 byte limit.
    ///
    /// ```rust
    /// use mqtt_node::network::application::mqtt::ClientId;
    ///
    /// let id = ClientId::from_entropy("nrf52840dk", b"123456789").unwrap();
    /// assert_eq!(id.as_str(), "nrf52840dk_cbf43926");
    /// ```
    pub fn from_entropy(prefix: &str, entropy: &[u8]) -> Result<Self, ClientIdError> {
        if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(ClientIdError::InvalidPrefix);
        }
        if entropy.is_empty() {
            return Err(ClientIdError::NoEntropy);
        }

        let prefix = &prefix[..prefix.len().min(MAX_PREFIX_LEN)];
        let mut id = String::new();
        // 14 + 1 + 8 bytes always fit.
        write!(id, "{}_{:08x}", prefix, crc32fast::hash(entropy))
            .map_err(|_| ClientIdError::InvalidPrefix)?;
        Ok(Self(id))
    }

    /// Use `id` verbatim.
    pub fn new(id: &str) -> Result<Self, ClientIdError> {
        String::try_from(id)
            .map(Self)
            .map_err(|_| ClientIdError::InvalidPrefix)
    }

    /// The identifier as sent in CONNECT.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl core::fmt::Display for ClientId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
