// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use filter_camera::Config;
use filter_camera::render::Rotation;

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir()
        .join(format!("filter-camera-config-{}-{}", name, std::process::id()))
        .join("config.json")
}

#[test]
fn test_config_default() {
    let config = Config::default();

    assert!(config.mirror_preview, "Mirror preview should be enabled by default");
    assert_eq!(config.retained_buffer_hint, 3);
    assert_eq!(config.filters.first().map(String::as_str), Some(""));
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_round_trip_through_file() {
    let path = temp_path("roundtrip");
    let config = Config {
        filters: vec!["CISepiaTone".to_string(), String::new()],
        photo_rotation: Rotation::Rotate270,
        photo_quality: 85,
        ..Default::default()
    };
    config.save_to(&path).unwrap();

    let loaded = Config::load_from(&path).unwrap();
    assert_eq!(loaded, config);
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn test_invalid_config_is_rejected() {
    let path = temp_path("invalid");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, r#"{ "frame_queue_depth": 0 }"#).unwrap();

    assert!(Config::load_from(&path).is_err());
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn test_malformed_json_is_rejected() {
    let path = temp_path("malformed");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "{ filters: ").unwrap();

    assert!(Config::load_from(&path).is_err());
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}
