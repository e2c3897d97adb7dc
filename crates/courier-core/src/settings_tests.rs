//! Tests for dispatch settings.

use super::*;
use serial_test::serial;
use std::io::Write;

#[test]
fn test_defaults() {
    let settings = BusSettings::default();

    assert_eq!(settings.prefix_name, "");
    assert_eq!(settings.send_strategy_name, "bufferized");
    assert_eq!(settings.batch_sending_buffer_size, 20);
    assert_eq!(settings.batch_flush_deadline(), Duration::from_secs(1));
    assert_eq!(settings.batch_send_timeout(), Duration::from_secs(15));
    assert_eq!(settings.append_retry.max_retries, 3);
    assert_eq!(settings.append_retry.delay(), Duration::from_secs(1));
    assert_eq!(settings.receive_message_buffer_size, 10);
    assert_eq!(settings.receive_timeout(), Duration::from_secs(1));
    assert_eq!(settings.entity_options(), EntityOptions::default());
    assert!(!settings.use_mock_for_unit_tests);
    assert!(settings.validate().is_ok());
}

#[test]
fn test_mock_flag_overrides_default_strategy() {
    let settings = BusSettings {
        send_strategy_name: "onebyone".to_string(),
        use_mock_for_unit_tests: true,
        ..BusSettings::default()
    };

    assert_eq!(settings.default_strategy_name(), "mock");
}

#[test]
fn test_prefixed_names() {
    let settings = BusSettings {
        prefix_name: "dev-".to_string(),
        ..BusSettings::default()
    };

    assert_eq!(settings.prefixed("orders"), "dev-orders");
}

mod validation {
    use super::*;

    #[test]
    fn test_zero_capacity_is_rejected() {
        let settings = BusSettings {
            batch_sending_buffer_size: 0,
            ..BusSettings::default()
        };

        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "batch_sending_buffer_size"
        ));
    }

    #[test]
    fn test_zero_poll_settings_are_rejected() {
        let no_buffer = BusSettings {
            receive_message_buffer_size: 0,
            ..BusSettings::default()
        };
        let no_timeout = BusSettings {
            receive_message_timeout_secs: 0,
            ..BusSettings::default()
        };

        assert!(no_buffer.validate().is_err());
        assert!(no_timeout.validate().is_err());
    }

    #[test]
    fn test_blank_strategy_is_rejected() {
        let settings = BusSettings {
            send_strategy_name: "  ".to_string(),
            ..BusSettings::default()
        };

        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Missing { .. })
        ));
    }
}

mod loading {
    use super::*;

    fn write_settings(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn test_load_without_sources_uses_defaults() {
        let settings = BusSettings::load(None).unwrap();
        assert_eq!(settings, BusSettings::default());
    }

    #[test]
    #[serial]
    fn test_load_from_explicit_file() {
        let file = write_settings(
            r#"
prefix_name = "test-"
send_strategy_name = "onebyone"
batch_sending_buffer_size = 5

[append_retry]
max_retries = 1
"#,
        );

        let settings = BusSettings::load(Some(file.path())).unwrap();

        assert_eq!(settings.prefix_name, "test-");
        assert_eq!(settings.send_strategy_name, "onebyone");
        assert_eq!(settings.batch_sending_buffer_size, 5);
        assert_eq!(settings.append_retry.max_retries, 1);
        assert_eq!(settings.append_retry.delay_ms, 1000);
        assert_eq!(settings.max_delivery_count, 1);
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file_fails() {
        let result = BusSettings::load(Some(Path::new("/nonexistent/courier.toml")));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        let file = write_settings("batch_sending_buffer_size = 5\n");
        std::env::set_var("COURIER__BATCH_SENDING_BUFFER_SIZE", "50");

        let result = BusSettings::load(Some(file.path()));
        std::env::remove_var("COURIER__BATCH_SENDING_BUFFER_SIZE");

        assert_eq!(result.unwrap().batch_sending_buffer_size, 50);
    }

    #[test]
    #[serial]
    fn test_invalid_loaded_settings_fail_validation() {
        let file = write_settings("receive_message_buffer_size = 0\n");

        let result = BusSettings::load(Some(file.path()));
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }
}
