use test_case::test_case;

use crate::{DeviceConfig, DeviceKind};

#[test]
fn test_default_picks_first_gpu() {
    let config = DeviceConfig::default();
    assert_eq!(config, DeviceConfig::builder().build());
    assert_eq!(config.kind, DeviceKind::Gpu);
    assert!(!config.is_explicit());
    assert_eq!(config.to_string(), "first gpu device");
}

#[test]
fn test_builder() {
    let config = DeviceConfig::builder().name("rtx".to_string()).kind(DeviceKind::Accelerator).build();
    assert_eq!(config.name.as_deref(), Some("rtx"));
    assert_eq!(config.id, None);
    assert_eq!(config.kind, DeviceKind::Accelerator);
    assert!(config.is_explicit());
}

#[test_case(Some("2"), None, None, Some(2), DeviceKind::Gpu; "numeric id")]
#[test_case(Some("Simulated"), None, Some("Simulated"), None, DeviceKind::Gpu; "name")]
#[test_case(Some("  "), Some("cpu"), None, None, DeviceKind::Cpu; "blank device with kind")]
#[test_case(None, Some("tpu"), None, None, DeviceKind::Gpu; "invalid kind ignored")]
fn test_from_values(
    device: Option<&str>,
    kind: Option<&str>,
    name: Option<&str>,
    id: Option<usize>,
    expected_kind: DeviceKind,
) {
    let config = DeviceConfig::from_values(device, kind);
    assert_eq!(config.name.as_deref(), name);
    assert_eq!(config.id, id);
    assert_eq!(config.kind, expected_kind);
}
