use std::path::PathBuf;

use super::*;
use crate::error::NetError;

// --- config.rs tests ---

#[test]
fn test_config_defaults() {
    let config = NetConfig::default();

    assert_eq!(config.txts_lost_time_ns, 20_000_000);
    assert_eq!(config.aftersend_guard_time_ns, 300_000);
    assert_eq!(config.extra_timeout_ns, 1_000_000);
    assert_eq!(config.interval_timeout_ns, 125_000_000);
    assert_eq!(config.ovip_start_port, 5018);
    assert_eq!(config.ipc_udp_port, 0);
    assert_eq!(config.ipc_node, PathBuf::from(DEFAULT_IPC_NODE));
    assert_eq!(config.max_ipc_clients, 8);
    assert!(config.master_ptpdev.is_none());
    assert_eq!(config.virtual_clock_rate_ppb, 0);
    assert_eq!(config.max_ports, MAX_PORT_NUMBER_LIMIT);
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_builder() {
    let config = NetConfig::builder()
        .txts_lost_time_ns(40_000_000)
        .aftersend_guard_time_ns(0)
        .extra_timeout_ns(2_000_000)
        .interval_timeout_ns(31_250_000)
        .ovip_start_port(6000)
        .ipc_udp_port(15_000)
        .ipc_node("/run/gptp/ipc")
        .max_ipc_clients(2)
        .master_ptpdev("/dev/ptp1")
        .virtual_clock_rate_ppb(-500)
        .max_ports(4)
        .build();

    assert_eq!(config.txts_lost_time_ns, 40_000_000);
    assert_eq!(config.aftersend_guard_time_ns, 0);
    assert_eq!(config.extra_timeout_ns, 2_000_000);
    assert_eq!(config.interval_timeout_ns, 31_250_000);
    assert_eq!(config.ovip_start_port, 6000);
    assert_eq!(config.ipc_udp_port, 15_000);
    assert_eq!(config.ipc_node, PathBuf::from("/run/gptp/ipc"));
    assert_eq!(config.max_ipc_clients, 2);
    assert_eq!(config.master_ptpdev.as_deref(), Some("/dev/ptp1"));
    assert_eq!(config.virtual_clock_rate_ppb, -500);
    assert_eq!(config.max_ports, 4);
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_json_partial() {
    let config = NetConfig::from_json_str(
        r#"{ "ovip_start_port": 7000, "master_ptpdev": "/dev/ptp2" }"#,
    )
    .unwrap();
    assert_eq!(config.ovip_start_port, 7000);
    assert_eq!(config.master_ptpdev.as_deref(), Some("/dev/ptp2"));
    assert_eq!(config.txts_lost_time_ns, 20_000_000);
}

#[test]
fn test_config_json_empty_object_is_default() {
    assert_eq!(NetConfig::from_json_str("{}").unwrap(), NetConfig::default());
}

#[test]
fn test_config_json_errors() {
    assert!(matches!(
        NetConfig::from_json_str("{ not json"),
        Err(NetError::Config { .. })
    ));
    assert!(matches!(
        NetConfig::from_json_str(r#"{ "ovip_start_port": "x" }"#),
        Err(NetError::Config { .. })
    ));
}

#[test]
fn test_config_validation() {
    let cases = [
        NetConfig::builder().interval_timeout_ns(0).build(),
        NetConfig::builder().extra_timeout_ns(-1).build(),
        NetConfig::builder().aftersend_guard_time_ns(-1).build(),
        NetConfig::builder().txts_lost_time_ns(1_000_000).build(),
        NetConfig::builder().max_ports(0).build(),
        NetConfig::builder().max_ports(MAX_PORT_NUMBER_LIMIT + 1).build(),
        NetConfig::builder().max_ipc_clients(0).build(),
    ];
    for config in cases {
        assert!(
            matches!(config.validate(), Err(NetError::Config { .. })),
            "{config:?} should be rejected"
        );
    }
}

#[test]
fn test_config_json_validates() {
    let err = NetConfig::from_json_str(r#"{ "max_ports": 40 }"#).unwrap_err();
    assert!(err.to_string().contains("max_ports"));
}

#[test]
fn test_config_from_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("gptpnet.json");
    std::fs::write(&path, r#"{ "ipc_udp_port": 5555, "max_ipc_clients": 3 }"#).unwrap();
    let config = NetConfig::from_json_file(&path).unwrap();
    assert_eq!(config.ipc_udp_port, 5555);
    assert_eq!(config.max_ipc_clients, 3);

    let missing = NetConfig::from_json_file(dir.path().join("missing.json"));
    assert!(matches!(missing, Err(NetError::Config { .. })));
}
