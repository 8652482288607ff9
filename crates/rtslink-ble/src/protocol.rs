//! BLE protocol constants for the robot's GATT service

use uuid::Uuid;

// ----------------------------------------------------------------------------
// BLE Service and Characteristic UUIDs
// ----------------------------------------------------------------------------

/// Robot BLE service UUID (16-bit `0xFEE3`)
pub const ROBOT_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000FEE3_0000_1000_8000_00805F9B34FB);

/// Characteristic the robot notifies frames on
pub const ROBOT_READ_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x7D2A4BDA_D29B_4152_B725_2491478C5CD7);

/// Characteristic the client writes frames to
pub const ROBOT_WRITE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x30619F2D_0F54_41BD_A65A_7588D8C85B45);

// ----------------------------------------------------------------------------
// Device Names
// ----------------------------------------------------------------------------

/// Whether an advertised local name belongs to a robot
pub fn is_robot_name(name: &str, prefix: &str) -> bool {
    name.len() > prefix.len() && name.starts_with(prefix)
}

/// Compare a requested robot name with an advertised one
///
/// Operators often type just the serial suffix (`R2D2` for `Vector-R2D2`).
pub fn matches_robot_name(advertised: &str, requested: &str, prefix: &str) -> bool {
    if advertised.eq_ignore_ascii_case(requested) {
        return true;
    }
    advertised
        .strip_prefix(prefix)
        .map(|rest| rest.trim_start_matches('-'))
        .is_some_and(|suffix| suffix.eq_ignore_ascii_case(requested))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_uuid_expands_short_form() {
        assert_eq!(
            ROBOT_SERVICE_UUID.to_string(),
            "0000fee3-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_robot_name_detection() {
        assert!(is_robot_name("Vector-R2D2", "Vector"));
        assert!(!is_robot_name("Vector", "Vector"));
        assert!(!is_robot_name("Speaker-01", "Vector"));
    }

    #[test]
    fn test_name_matching() {
        assert!(matches_robot_name("Vector-R2D2", "Vector-R2D2", "Vector"));
        assert!(matches_robot_name("Vector-R2D2", "vector-r2d2", "Vector"));
        assert!(matches_robot_name("Vector-R2D2", "R2D2", "Vector"));
        assert!(!matches_robot_name("Vector-R2D2", "C3PO", "Vector"));
    }
}
