use test_case::test_case;

use crate::{DeviceId, DeviceInfo, DeviceKind};

#[test_case("cpu", DeviceKind::Cpu)]
#[test_case("GPU", DeviceKind::Gpu)]
#[test_case(" Accelerator ", DeviceKind::Accelerator)]
#[test_case("acc", DeviceKind::Accelerator)]
fn test_device_kind_parse(input: &str, expected: DeviceKind) {
    assert_eq!(DeviceKind::parse(input).unwrap(), expected);
    assert_eq!(input.parse::<DeviceKind>().unwrap(), expected);
}

#[test]
fn test_device_kind_parse_rejects_unknown() {
    assert!(DeviceKind::parse("fpga").is_err());
}

#[test]
fn test_device_kind_display() {
    assert_eq!(DeviceKind::Gpu.to_string(), "gpu");
    assert_eq!(DeviceKind::default(), DeviceKind::Gpu);
}

#[test]
fn test_name_matching_is_case_insensitive_substring() {
    let device = DeviceInfo::new(1, "NVIDIA GeForce RTX 4090", DeviceKind::Gpu);
    assert!(device.matches_name("rtx"));
    assert!(device.matches_name("GeForce RTX"));
    assert!(!device.matches_name("radeon"));
    assert_eq!(device.id, DeviceId(1));
    assert_eq!(device.id.to_string(), "device:1");
}
