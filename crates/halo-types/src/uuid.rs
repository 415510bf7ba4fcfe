//! Bluetooth UUIDs for HALO devices.
//!
//! The firmware exposes 16-bit identifiers; they are expanded here onto the
//! Bluetooth base UUID. These values must match the firmware.

use uuid::{Uuid, uuid};

// --- Provisioning service ---

/// Network provisioning service (network credentials and role assignment).
pub const PROVISIONING_SERVICE: Uuid = uuid!("0000a000-0000-1000-8000-00805f9b34fb");

/// Write: network name (UTF-8).
pub const NETWORK_NAME: Uuid = uuid!("0000a001-0000-1000-8000-00805f9b34fb");

/// Write: network shared secret (UTF-8).
pub const NETWORK_SECRET: Uuid = uuid!("0000a002-0000-1000-8000-00805f9b34fb");

/// Write: role token. Also accepts single-byte control commands.
pub const ROLE: Uuid = uuid!("0000a003-0000-1000-8000-00805f9b34fb");

// --- Info service ---

/// Info service for reading back the assigned network identity.
///
/// Current firmware hosts the info characteristics on the provisioning
/// service itself, so both constants carry the same UUID.
pub const INFO_SERVICE: Uuid = PROVISIONING_SERVICE;

/// Read: network address assigned after joining (UTF-8).
pub const NETWORK_ADDRESS: Uuid = uuid!("0000a005-0000-1000-8000-00805f9b34fb");

/// Read: hardware address reported by the firmware (UTF-8).
pub const HARDWARE_ADDRESS: Uuid = uuid!("0000a006-0000-1000-8000-00805f9b34fb");

/// Read: signal strength as a decimal string.
pub const SIGNAL_STRENGTH: Uuid = uuid!("0000a007-0000-1000-8000-00805f9b34fb");

/// Read: firmware unique identifier (UTF-8).
pub const FIRMWARE_ID: Uuid = uuid!("0000a008-0000-1000-8000-00805f9b34fb");

// --- Commands ---

/// Control byte written to [`ROLE`] to make the device forget its network.
pub const FORGET_NETWORK_COMMAND: u8 = 0xF0;

/// Characteristics the pairing driver writes, in write order.
pub const PROVISIONING_CHARACTERISTICS: [Uuid; 3] = [NETWORK_NAME, NETWORK_SECRET, ROLE];

/// Characteristics the pairing driver reads back after provisioning.
pub const INFO_CHARACTERISTICS: [Uuid; 4] =
    [NETWORK_ADDRESS, HARDWARE_ADDRESS, SIGNAL_STRENGTH, FIRMWARE_ID];

/// Expand a 16-bit Bluetooth identifier onto the base UUID.
pub const fn from_short(short: u16) -> Uuid {
    Uuid::from_fields(
        short as u32,
        0x0000,
        0x1000,
        &[0x80, 0x00, 0x00, 0x80, 0x5f, 0x9b, 0x34, 0xfb],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_ids_expand_to_constants() {
        assert_eq!(from_short(0xa000), PROVISIONING_SERVICE);
        assert_eq!(from_short(0xa001), NETWORK_NAME);
        assert_eq!(from_short(0xa002), NETWORK_SECRET);
        assert_eq!(from_short(0xa003), ROLE);
        assert_eq!(from_short(0xa005), NETWORK_ADDRESS);
        assert_eq!(from_short(0xa006), HARDWARE_ADDRESS);
        assert_eq!(from_short(0xa007), SIGNAL_STRENGTH);
        assert_eq!(from_short(0xa008), FIRMWARE_ID);
    }

    #[test]
    fn test_write_order() {
        assert_eq!(PROVISIONING_CHARACTERISTICS, [NETWORK_NAME, NETWORK_SECRET, ROLE]);
    }
}
