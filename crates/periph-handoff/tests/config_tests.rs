use embassy_time::Duration;
use periph_handoff::{
    BoardConfig, ConfigError, DescriptorError, HandoffConfig, HandoffMode, Profile,
    DEFAULT_UNMASK_SETTLE_MS,
};

fn board(json: &str) -> BoardConfig {
    serde_json::from_str(json).unwrap()
}

#[test]
fn full_board_description() {
    let cfg = HandoffConfig::from_board(&board(
        r#"{
            "mode": "vm_mode",
            "touch_type": "secondary",
            "irq": 373,
            "io_bases": [11059200, 10010624],
            "io_sizes": [4096, 4096],
            "release_timeout_ms": 50
        }"#,
    ))
    .unwrap();

    assert_eq!(cfg.profile, Profile::Secondary);
    assert_eq!(cfg.timeouts.release, Duration::from_millis(50));
    assert_eq!(
        cfg.timeouts.unmask_settle,
        Duration::from_millis(DEFAULT_UNMASK_SETTLE_MS)
    );
    let resources = cfg.resources().unwrap();
    assert_eq!(resources.irq(), 373);
    assert_eq!(resources.windows().len(), 2);
}

#[test]
fn missing_touch_type_defaults_to_primary() {
    let cfg = HandoffConfig::from_board(&board(
        r#"{ "mode": "vm_mode", "irq": 5, "io_bases": [4096], "io_sizes": [256] }"#,
    ))
    .unwrap();

    assert_eq!(cfg.profile, Profile::Primary);
}

#[test]
fn other_modes_are_not_supported() {
    let cfg = HandoffConfig::from_board(&board(r#"{ "mode": "native" }"#)).unwrap();
    assert_eq!(cfg.mode, HandoffMode::NotSupported);

    let cfg = HandoffConfig::from_board(&board("{}")).unwrap();
    assert_eq!(cfg.mode, HandoffMode::NotSupported);
    assert!(cfg.resources().is_none());
}

#[test]
fn invalid_board_descriptions_are_rejected() {
    let err = HandoffConfig::from_board(&board(
        r#"{ "mode": "vm_mode", "io_bases": [4096], "io_sizes": [256] }"#,
    ))
    .unwrap_err();
    assert_eq!(err, ConfigError::MissingIrq);

    let err = HandoffConfig::from_board(&board(
        r#"{ "mode": "vm_mode", "touch_type": "tertiary", "irq": 1,
             "io_bases": [4096], "io_sizes": [256] }"#,
    ))
    .unwrap_err();
    assert_eq!(err, ConfigError::UnknownProfile);

    let err = HandoffConfig::from_board(&board(
        r#"{ "mode": "vm_mode", "irq": 1, "io_bases": [4096, 8192], "io_sizes": [256] }"#,
    ))
    .unwrap_err();
    assert_eq!(
        err,
        ConfigError::Descriptor(DescriptorError::MismatchedWindows { bases: 2, sizes: 1 })
    );

    let err = HandoffConfig::from_board(&board(r#"{ "mode": "vm_mode", "irq": 1 }"#))
        .unwrap_err();
    assert_eq!(err, ConfigError::Descriptor(DescriptorError::NoWindows));
}
