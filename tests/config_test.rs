//! Tests for layered configuration loading: defaults, file overlay, and
//! environment overrides.

use std::sync::Mutex;

use canopy::util::testing::init_test_setup;
use canopy::CanopyConfig;
use rstest::rstest;

// Every loader reads the process environment, so tests that touch or depend
// on CANOPY_* variables serialize through this lock.
static ENV_LOCK: Mutex<()> = Mutex::new(());

// A failed test must not poison the lock for the rest of the suite.
fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

#[rstest]
fn given_no_sources_when_loading_then_compiled_defaults() {
    init_test_setup();
    let _guard = env_lock();
    let config = CanopyConfig::load_from(None).unwrap();
    assert_eq!(config, CanopyConfig::default());
    assert_eq!(config.max_segment_len, 16);
    assert_eq!(config.rebalance.min_window, 8);
}

#[rstest]
fn given_partial_file_when_loading_then_unspecified_fields_inherit() {
    init_test_setup();
    let _guard = env_lock();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("canopy.toml");
    std::fs::write(&path, "max_segment_len = 24\n").unwrap();

    let config = CanopyConfig::load_from(Some(&path)).unwrap();
    assert_eq!(config.max_segment_len, 24);
    assert_eq!(config.rebalance.min_window, 8, "inherited from defaults");
}

#[rstest]
fn given_nested_section_when_loading_then_overlay_applies() {
    init_test_setup();
    let _guard = env_lock();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("canopy.toml");
    std::fs::write(&path, "[rebalance]\nmin_window = 32\n").unwrap();

    let config = CanopyConfig::load_from(Some(&path)).unwrap();
    assert_eq!(config.rebalance.min_window, 32);
    assert_eq!(config.max_segment_len, 16);
}

#[rstest]
fn given_env_overrides_when_loading_then_they_beat_the_file() {
    init_test_setup();
    let _guard = env_lock();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("canopy.toml");
    std::fs::write(&path, "max_segment_len = 24\n[rebalance]\nmin_window = 32\n").unwrap();

    std::env::set_var("CANOPY_MAX_SEGMENT_LEN", "10");
    std::env::set_var("CANOPY_REBALANCE__MIN_WINDOW", "12");
    let result = CanopyConfig::load_from(Some(&path));
    std::env::remove_var("CANOPY_MAX_SEGMENT_LEN");
    std::env::remove_var("CANOPY_REBALANCE__MIN_WINDOW");

    let config = result.unwrap();
    assert_eq!(config.max_segment_len, 10);
    assert_eq!(config.rebalance.min_window, 12);
}

#[rstest]
fn given_env_overrides_without_file_when_loading_then_they_beat_defaults() {
    init_test_setup();
    let _guard = env_lock();

    std::env::set_var("CANOPY_MAX_SEGMENT_LEN", "10");
    std::env::set_var("CANOPY_REBALANCE__MIN_WINDOW", "12");
    let result = CanopyConfig::load_from(None);
    std::env::remove_var("CANOPY_MAX_SEGMENT_LEN");
    std::env::remove_var("CANOPY_REBALANCE__MIN_WINDOW");

    let config = result.unwrap();
    assert_eq!(config.max_segment_len, 10);
    assert_eq!(config.rebalance.min_window, 12);
}

#[rstest]
fn given_degenerate_values_when_loading_then_clamped_to_workable_floor() {
    init_test_setup();
    let _guard = env_lock();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("canopy.toml");
    std::fs::write(&path, "max_segment_len = 0\n[rebalance]\nmin_window = 1\n").unwrap();

    let config = CanopyConfig::load_from(Some(&path)).unwrap();
    assert_eq!(config.max_segment_len, 2);
    assert_eq!(config.rebalance.min_window, 2);
}

#[rstest]
fn given_missing_file_when_loading_then_defaults_without_error() {
    init_test_setup();
    let _guard = env_lock();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("does-not-exist.toml");
    let config = CanopyConfig::load_from(Some(&path)).unwrap();
    assert_eq!(config, CanopyConfig::default());
}

#[rstest]
fn given_saved_config_when_reloaded_then_identical() {
    init_test_setup();
    let _guard = env_lock();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("canopy.toml");

    let mut config = CanopyConfig::default();
    config.max_segment_len = 20;
    config.save(&path).unwrap();

    let reloaded = CanopyConfig::load_from(Some(&path)).unwrap();
    assert_eq!(reloaded, config);
}

#[rstest]
fn given_example_toml_when_parsed_then_it_is_the_default_config() {
    init_test_setup();
    let rendered = CanopyConfig::example_toml();
    let parsed: CanopyConfig = toml::from_str(&rendered).unwrap();
    assert_eq!(parsed, CanopyConfig::default());
}
