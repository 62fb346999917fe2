use super::*;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn defaults_match_the_documented_values() {
    let settings = Settings::default();
    assert_eq!(settings.bind_addr, "0.0.0.0:5000");
    assert_eq!(settings.max_reconnect_attempts, 5);
    assert_eq!(settings.backoff, BackoffTable::default());
    assert_eq!(settings.keepalive_interval, Duration::from_secs(300));
    assert_eq!(settings.crash_exit_delay, Duration::from_secs(30));
    assert_eq!(settings.auth_failure_policy, AuthFailurePolicy::RequireRescan);
    assert_eq!(settings.session_dir, PathBuf::from("./session"));
}

#[test]
fn file_values_override_defaults() {
    let raw = r#"
        bind_addr = "127.0.0.1:8080"
        max_reconnect_attempts = 3
        backoff_ms = [1000, 2000]
        auth_failure_policy = "reconnect"
        default_country_code = "62"
    "#;
    let mut settings = Settings::default();
    apply_file(&mut settings, &parse_file(raw).expect("toml"));

    assert_eq!(settings.bind_addr, "127.0.0.1:8080");
    assert_eq!(settings.max_reconnect_attempts, 3);
    assert_eq!(
        settings.backoff,
        BackoffTable::from_millis(&[1000, 2000]).expect("table")
    );
    assert_eq!(settings.auth_failure_policy, AuthFailurePolicy::Reconnect);
    assert_eq!(settings.phone_normalizer().normalize("8123456789"), "628123456789");
}

#[test]
fn env_overrides_file_and_port_sets_bind() {
    let mut settings = Settings::default();
    apply_file(
        &mut settings,
        &parse_file("client_id = \"from-file\"").expect("toml"),
    );
    apply_env(
        &mut settings,
        env(&[
            ("PORT", "7000"),
            ("GATEWAY__CLIENT_ID", "from-env"),
            ("GATEWAY__BACKOFF_MS", "100, 200,400"),
            ("GATEWAY__KEEPALIVE_INTERVAL_SECS", "60"),
        ]),
    );

    assert_eq!(settings.bind_addr, "0.0.0.0:7000");
    assert_eq!(settings.client_id, "from-env");
    assert_eq!(settings.backoff.delay_for(3), Duration::from_millis(400));
    assert_eq!(settings.keepalive_interval, Duration::from_secs(60));
}

#[test]
fn invalid_values_keep_previous_settings() {
    let mut settings = Settings::default();
    apply_env(
        &mut settings,
        env(&[
            ("PORT", "not-a-port"),
            ("GATEWAY__MAX_RECONNECT_ATTEMPTS", "many"),
            ("GATEWAY__BACKOFF_MS", "5000,100"),
            ("GATEWAY__INITIALIZE_TIMEOUT_SECS", "0"),
            ("GATEWAY__AUTH_FAILURE_POLICY", "sometimes"),
        ]),
    );

    let defaults = Settings::default();
    assert_eq!(settings.bind_addr, defaults.bind_addr);
    assert_eq!(settings.max_reconnect_attempts, defaults.max_reconnect_attempts);
    assert_eq!(settings.backoff, defaults.backoff);
    assert_eq!(settings.initialize_timeout, defaults.initialize_timeout);
    assert_eq!(settings.auth_failure_policy, defaults.auth_failure_policy);
}

#[test]
fn empty_country_code_disables_prefixing() {
    let mut settings = Settings::default();
    apply_env(&mut settings, env(&[("GATEWAY__DEFAULT_COUNTRY_CODE", "")]));
    assert_eq!(settings.phone_normalizer().normalize("(555) 123-4567"), "5551234567");
}

#[test]
fn derived_configs_carry_settings() {
    let mut settings = Settings::default();
    settings.keepalive_interval = Duration::from_secs(10);
    settings.session_dir = PathBuf::from("/var/lib/gateway");

    let controller = settings.controller_config();
    assert_eq!(controller.probe_timeout, Duration::from_secs(10));
    assert_eq!(controller.store.data_dir, PathBuf::from("/var/lib/gateway"));

    let bridge = settings.bridge_config().expect("bridge config");
    assert_eq!(bridge.url.scheme(), "ws");
    assert_eq!(bridge.store.client_id, "bot1");

    settings.bridge_url = "not a url".into();
    assert!(settings.bridge_config().is_err());
}
