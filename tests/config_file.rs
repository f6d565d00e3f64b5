// SPDX-License-Identifier: GPL-3.0-only
use mon_brightness::config::{self, Config, SetResultPolicy};
use mon_brightness::entry;
use mon_brightness::platform::emulated::EmulatedLcd;

#[test]
fn serialized_defaults_name_every_field() {
    let value = serde_json::to_value(Config::default()).unwrap();
    assert_eq!(value["lcd_device_path"], r"\\.\LCD");
    assert_eq!(value["wmi_namespace"], r"root\wmi");
    assert_eq!(value["ioctl_set_result"], "documented");
    assert_eq!(value["release_subsystem_on_last_cleanup"], true);
}

#[test]
fn empty_file_loads_defaults() {
    let path = std::env::temp_dir().join(format!("mbctl-empty-{}.json", std::process::id()));
    std::fs::write(&path, "{}").unwrap();
    let loaded = Config::load(&path);
    std::fs::remove_file(&path).unwrap();
    assert_eq!(loaded.unwrap(), Config::default());
}

#[test]
fn malformed_file_is_an_error() {
    let path = std::env::temp_dir().join(format!("mbctl-bad-{}.json", std::process::id()));
    std::fs::write(&path, r#"{ "ioctl_set_result": "sometimes" }"#).unwrap();
    let loaded = Config::load(&path);
    std::fs::remove_file(&path).unwrap();
    assert!(loaded.is_err());
}

#[test]
fn active_config_drives_the_lcd_backend() {
    let previous = config::current();
    config::replace(Config {
        lcd_device_path: r"\\.\LCD1".to_string(),
        ioctl_set_result: SetResultPolicy::LegacyInverted,
        ..Config::default()
    });

    let lcd = EmulatedLcd::new(r"\\.\LCD1");
    let handle = entry::ioctl_init(&lcd, &config::current()).unwrap();
    // inverted reading: a successful driver call is reported as failure
    assert!(entry::ioctl_set_brightness(handle, 10, 10).is_err());
    entry::ioctl_cleanup(handle).unwrap();

    config::replace(previous);
    assert_eq!(config::current(), Config::default());
}
