//! BLE GATT UUIDs of the provisioning service

use uuid::Uuid;

/// Provisioning service UUID, also carried in the advertisement
pub const PROVISIONING_SERVICE_UUID: Uuid = Uuid::from_bytes([
    0x5a, 0x1c, 0x0e, 0x00, 0x7f, 0x3b, 0x4c, 0x52, 0x9e, 0x61, 0x0d, 0x4b, 0x8a, 0x2f, 0x61, 0x90,
]);

/// Request characteristic (read): the pending credential request frame
pub const REQUEST_CHAR_UUID: Uuid = Uuid::from_bytes([
    0x5a, 0x1c, 0x0e, 0x01, 0x7f, 0x3b, 0x4c, 0x52, 0x9e, 0x61, 0x0d, 0x4b, 0x8a, 0x2f, 0x61, 0x90,
]);

/// Response characteristic (write): the peer's answer, long writes allowed
pub const RESPONSE_CHAR_UUID: Uuid = Uuid::from_bytes([
    0x5a, 0x1c, 0x0e, 0x02, 0x7f, 0x3b, 0x4c, 0x52, 0x9e, 0x61, 0x0d, 0x4b, 0x8a, 0x2f, 0x61, 0x90,
]);
