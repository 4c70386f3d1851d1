//! Unit tests for configuration module
//!
//! Tests configuration parsing, validation, serialization/deserialization,
//! and edge cases in configuration handling.

use super::*;
use anyhow::Result;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_default_configuration_is_valid() {
    let config = ClientConfig::default();

    assert!(config.validate().is_ok());
    assert_eq!(config.window.width, 200);
    assert_eq!(config.window.height, 200);
    assert_eq!(config.shm.pixel_format, PixelFormat::Argb8888);
    assert_eq!(config.shell.preference, ShellPreference::Auto);
    assert!(config.shm.runtime_dir.is_none());
}

#[test]
fn test_configuration_serialization_roundtrip() -> Result<()> {
    let mut original_config = ClientConfig::default();
    original_config.shm.runtime_dir = Some(PathBuf::from("/run/user/1000"));
    original_config.shell.preference = ShellPreference::WlShell;

    let toml_string = toml::to_string(&original_config)?;
    let deserialized_config: ClientConfig = toml::from_str(&toml_string)?;

    assert_eq!(original_config, deserialized_config);
    Ok(())
}

#[test]
fn test_configuration_from_file() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("shmwin.toml");

    let test_config = r#"
[window]
width = 640
height = 480
title = "simple-shm"

[shm]
pixel_format = "xrgb8888"
runtime_dir = "/tmp/shmwin"

[shell]
preference = "wl_shell"

[general]
log_level = "debug"
"#;
    fs::write(&file_path, test_config)?;

    let config = ClientConfig::load(&file_path)?;
    assert_eq!(config.window.width, 640);
    assert_eq!(config.window.height, 480);
    assert_eq!(config.window.title, "simple-shm");
    assert_eq!(config.window.app_id, "shmwin");
    assert_eq!(config.shm.pixel_format, PixelFormat::Xrgb8888);
    assert_eq!(config.shm.runtime_dir, Some(PathBuf::from("/tmp/shmwin")));
    assert_eq!(config.shell.preference, ShellPreference::WlShell);
    assert_eq!(config.general.log_level, "debug");

    Ok(())
}

#[test]
fn test_empty_file_gives_defaults() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("empty.toml");
    fs::write(&file_path, "")?;

    assert_eq!(ClientConfig::load(&file_path)?, ClientConfig::default());
    Ok(())
}

#[test]
fn test_partial_section_keeps_other_defaults() -> Result<()> {
    let config: ClientConfig = toml::from_str("[window]\nwidth = 300\n")?;
    assert_eq!(config.window.width, 300);
    assert_eq!(config.window.height, 200);
    assert_eq!(config.window.title, "shmwin");
    Ok(())
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempdir().unwrap();
    let result = ClientConfig::load(dir.path().join("nope.toml"));
    assert!(result.is_err());
}

#[test]
fn test_load_or_default_without_file() -> Result<()> {
    let dir = tempdir()?;
    let config = ClientConfig::load_or_default(dir.path().join("nope.toml"))?;
    assert_eq!(config, ClientConfig::default());
    Ok(())
}

#[test]
fn test_invalid_values_are_rejected() {
    let mut config = ClientConfig::default();
    config.window.width = 0;
    assert!(config.validate().is_err());

    let mut config = ClientConfig::default();
    config.window.height = MAX_DIMENSION + 1;
    assert!(config.validate().is_err());

    let mut config = ClientConfig::default();
    config.window.title = "   ".to_string();
    assert!(config.validate().is_err());

    let mut config = ClientConfig::default();
    config.general.log_level = "loud".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_unknown_pixel_format_fails_to_parse() {
    let result: Result<ClientConfig, _> = toml::from_str("[shm]\npixel_format = \"rgb565\"\n");
    assert!(result.is_err());
}

#[test]
fn test_invalid_file_fails_validation() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("bad.toml");
    fs::write(&file_path, "[window]\nwidth = 0\n")?;

    assert!(ClientConfig::load(&file_path).is_err());
    Ok(())
}

#[test]
fn test_save_and_reload() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("saved.toml");

    let mut config = ClientConfig::default();
    config.window.title = "saved".to_string();
    config.save(&file_path)?;

    assert_eq!(ClientConfig::load(&file_path)?, config);
    Ok(())
}
