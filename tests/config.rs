// ABOUTME: Integration tests for configuration parsing and validation.
// ABOUTME: Tests YAML parsing, env var interpolation, destination merging and discovery.

use jailwarden::config::*;
use jailwarden::error::Error;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Duration;

const MINIMAL: &str = r#"
app: shop
server: jails.example.com
release:
  archive: dist/shop.tar.gz
  start: bin/server
"#;

mod parsing {
    use super::*;

    #[test]
    fn parse_minimal_config_fills_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();

        assert_eq!(config.app.as_str(), "shop");
        assert_eq!(config.server.host, "jails.example.com");
        assert_eq!(config.server.port, 22);
        assert_eq!(config.server.user(), DEFAULT_SSH_USER);
        assert_eq!(config.port, 4000);
        assert_eq!(config.jail.root, "/usr/local/jails");
        assert_eq!(config.jail.network.blue, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(config.jail.network.green, Ipv4Addr::new(10, 0, 0, 3));
        assert_eq!(config.healthcheck, HealthcheckConfig::default());
        assert_eq!(config.proxy.reload, "service caddy reload");
        assert!(config.database.is_none());
        assert!(config.destinations.is_empty());
    }

    #[test]
    fn parse_full_config() {
        let yaml = r#"
app: shop
server:
  host: jails.example.com
  port: 2222
  user: deploy
  trust_first_connection: false
port: 8080
release:
  archive: shop.tar.gz
  build: make release
  start: bin/server --port 8080
jail:
  root: /jails/
  release: 14.2-RELEASE
  interface: lo2
  network:
    blue: 192.168.50.2
    green: 192.168.50.3
    prefix_len: 28
healthcheck:
  path: /up
  attempts: 4
  interval: 500ms
  timeout: 3s
proxy:
  domain: shop.example.com
env:
  RAILS_ENV: production
  API_TOKEN:
    env: SHOP_API_TOKEN
database:
  migrate: bin/migrate
timeouts:
  command: 45s
  long: 20m
"#;
        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(config.server.port, 2222);
        assert_eq!(config.server.user(), "deploy");
        assert!(!config.server.trust_first_connection);
        assert_eq!(config.port, 8080);
        assert_eq!(config.release.build.as_deref(), Some("make release"));
        assert_eq!(config.jail.layout().root, "/jails");
        assert_eq!(config.jail.network.prefix_len, 28);
        assert_eq!(config.healthcheck.attempts, 4);
        assert_eq!(config.healthcheck.interval, Duration::from_millis(500));
        assert_eq!(config.healthcheck.timeout, Duration::from_secs(3));
        assert_eq!(config.proxy.domain.as_deref(), Some("shop.example.com"));
        assert_eq!(
            config.env.get("RAILS_ENV"),
            Some(&EnvValue::Literal("production".to_string()))
        );
        assert_eq!(
            config.env.get("API_TOKEN"),
            Some(&EnvValue::FromEnv {
                var: "SHOP_API_TOKEN".to_string(),
                default: None,
            })
        );
        let db = config.database.unwrap();
        assert_eq!(db.address, Ipv4Addr::new(10, 0, 0, 10));
        assert_eq!(db.migrate.as_deref(), Some("bin/migrate"));
        assert_eq!(config.timeouts.command, Duration::from_secs(45));
        assert_eq!(config.timeouts.long, Duration::from_secs(20 * 60));
    }

    #[test]
    fn short_form_server_carries_user_and_port() {
        let yaml = MINIMAL.replace("jails.example.com", "admin@jails.example.com:2200");
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.server.user(), "admin");
        assert_eq!(config.server.port, 2200);
    }

    #[test]
    fn base_url_joins_mirror_and_release() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(
            config.jail.base_url(),
            "https://download.freebsd.org/releases/amd64/14.1-RELEASE/base.txz"
        );
    }

    #[test]
    fn missing_app_returns_error() {
        let yaml = r#"
server: jails.example.com
release:
  archive: shop.tar.gz
  start: bin/server
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("app"));
    }

    #[test]
    fn invalid_app_name_returns_error() {
        let yaml = MINIMAL.replace("app: shop", "app: Shop_Front");
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("lowercase"));
    }

    #[test]
    fn empty_server_returns_error() {
        let yaml = MINIMAL.replace("server: jails.example.com", "server: \"\"");
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }
}

mod validation {
    use super::*;

    fn invalid(yaml: &str) -> String {
        match Config::from_yaml(yaml).unwrap_err() {
            Error::InvalidConfig(msg) => msg,
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
    }

    #[test]
    fn slots_must_not_share_an_address() {
        let yaml = format!(
            "{MINIMAL}jail:\n  network:\n    blue: 10.0.0.5\n    green: 10.0.0.5\n"
        );
        assert!(invalid(&yaml).contains("distinct"));
    }

    #[test]
    fn database_cannot_take_a_slot_address() {
        let yaml = format!("{MINIMAL}database:\n  address: 10.0.0.3\n");
        assert!(invalid(&yaml).contains("collides"));
    }

    #[test]
    fn healthcheck_needs_at_least_one_attempt() {
        let yaml = format!("{MINIMAL}healthcheck:\n  attempts: 0\n");
        assert!(invalid(&yaml).contains("attempts"));
    }

    #[test]
    fn env_names_must_be_shell_identifiers() {
        let yaml = format!("{MINIMAL}env:\n  API-KEY: abc\n");
        assert!(invalid(&yaml).contains("API-KEY"));
    }

    #[test]
    fn start_command_cannot_be_blank() {
        let yaml = MINIMAL.replace("start: bin/server", "start: \"  \"");
        assert!(invalid(&yaml).contains("release.start"));
    }
}

mod env_values {
    use super::*;

    #[test]
    fn literal_and_interpolated_values_resolve() {
        let mut env_map = BTreeMap::new();
        env_map.insert(
            "KEY".to_string(),
            EnvValue::Literal("literal".to_string()),
        );
        env_map.insert(
            "FROM_ENV".to_string(),
            EnvValue::FromEnv {
                var: "JAILWARDEN_TEST_VAR".to_string(),
                default: None,
            },
        );
        env_map.insert(
            "WITH_DEFAULT".to_string(),
            EnvValue::FromEnv {
                var: "JAILWARDEN_MISSING_VAR".to_string(),
                default: Some("fallback".to_string()),
            },
        );

        temp_env::with_vars(
            [
                ("JAILWARDEN_TEST_VAR", Some("from_environment")),
                ("JAILWARDEN_MISSING_VAR", None),
            ],
            || {
                let resolved = resolve_env_map(&env_map).unwrap();
                assert_eq!(resolved["KEY"], "literal");
                assert_eq!(resolved["FROM_ENV"], "from_environment");
                assert_eq!(resolved["WITH_DEFAULT"], "fallback");
            },
        );
    }

    #[test]
    fn missing_variable_without_default_is_an_error() {
        let value = EnvValue::FromEnv {
            var: "JAILWARDEN_UNSET_VAR".to_string(),
            default: None,
        };

        temp_env::with_var_unset("JAILWARDEN_UNSET_VAR", || {
            let err = value.resolve().unwrap_err();
            assert!(matches!(err, Error::MissingEnvVar(ref var) if var == "JAILWARDEN_UNSET_VAR"));
        });
    }
}

mod destinations {
    use super::*;

    const WITH_STAGING: &str = r#"
app: shop
server: jails.example.com
release:
  archive: shop.tar.gz
  start: bin/server
env:
  SHARED: base
  BASE_ONLY: value
destinations:
  staging:
    server: deploy@staging.example.com
    port: 5000
    env:
      SHARED: overridden
      STAGING_ONLY: staging_value
    healthcheck:
      path: /ready
"#;

    #[test]
    fn destination_overrides_server_and_port() {
        let config = Config::from_yaml(WITH_STAGING).unwrap();
        let merged = config.for_destination("staging").unwrap();

        assert_eq!(merged.server.host, "staging.example.com");
        assert_eq!(merged.server.user(), "deploy");
        assert_eq!(merged.port, 5000);
        assert_eq!(merged.healthcheck.path, "/ready");
        assert_eq!(merged.app, config.app);
    }

    #[test]
    fn destination_merges_env() {
        let config = Config::from_yaml(WITH_STAGING).unwrap();
        let merged = config.for_destination("staging").unwrap();

        assert_eq!(
            merged.env.get("SHARED"),
            Some(&EnvValue::Literal("overridden".to_string()))
        );
        assert_eq!(
            merged.env.get("BASE_ONLY"),
            Some(&EnvValue::Literal("value".to_string()))
        );
        assert_eq!(
            merged.env.get("STAGING_ONLY"),
            Some(&EnvValue::Literal("staging_value".to_string()))
        );
    }

    #[test]
    fn unknown_destination_returns_error() {
        let config = Config::from_yaml(WITH_STAGING).unwrap();
        let err = config.for_destination("production").unwrap_err();
        assert!(matches!(err, Error::UnknownDestination(ref name) if name == "production"));
    }

    #[test]
    fn merged_config_is_validated() {
        let yaml = format!("{MINIMAL}destinations:\n  broken:\n    healthcheck:\n      attempts: 0\n");
        let config = Config::from_yaml(&yaml).unwrap();
        assert!(matches!(
            config.for_destination("broken"),
            Err(Error::InvalidConfig(_))
        ));
    }
}

mod discovery {
    use super::*;
    use std::fs;

    #[test]
    fn discover_finds_primary_file_and_anchors_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILENAME), MINIMAL).unwrap();

        let config = Config::discover(dir.path()).unwrap();

        assert_eq!(config.release.archive, dir.path().join("dist/shop.tar.gz"));
        assert_eq!(config.secrets, dir.path().join(DEFAULT_SECRETS_PATH));
    }

    #[test]
    fn discover_falls_back_to_dot_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".jailwarden")).unwrap();
        fs::write(dir.path().join(CONFIG_FILENAME_DIR), MINIMAL).unwrap();

        let config = Config::discover(dir.path()).unwrap();

        assert_eq!(config.release.archive, dir.path().join("dist/shop.tar.gz"));
        assert_eq!(config.secrets, dir.path().join(".jailwarden/secrets.env"));
    }

    #[test]
    fn project_root_skips_the_dot_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            project_root(&dir.path().join(CONFIG_FILENAME_DIR)),
            dir.path()
        );
        assert_eq!(project_root(&dir.path().join(CONFIG_FILENAME)), dir.path());
        assert_eq!(
            project_root(std::path::Path::new(CONFIG_FILENAME_DIR)),
            std::path::Path::new(".")
        );
    }

    #[test]
    fn locate_prefers_the_top_level_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".jailwarden")).unwrap();
        fs::write(dir.path().join(CONFIG_FILENAME_DIR), MINIMAL).unwrap();
        fs::write(dir.path().join(CONFIG_FILENAME), MINIMAL).unwrap();

        assert_eq!(
            Config::locate(dir.path()).unwrap(),
            dir.path().join(CONFIG_FILENAME)
        );
    }

    #[test]
    fn absolute_paths_are_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = MINIMAL.replace("dist/shop.tar.gz", "/srv/builds/shop.tar.gz");
        fs::write(dir.path().join(CONFIG_FILENAME), yaml).unwrap();

        let config = Config::discover(dir.path()).unwrap();

        assert_eq!(
            config.release.archive,
            std::path::PathBuf::from("/srv/builds/shop.tar.gz")
        );
    }

    #[test]
    fn discover_without_config_reports_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::discover(dir.path()).unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound(ref path) if path == dir.path()));
    }
}

mod init {
    use super::*;

    #[test]
    fn init_writes_a_loadable_config() {
        let dir = tempfile::tempdir().unwrap();

        let path = init_config(dir.path(), Some("storefront"), Some("ops@jails.test:2022"), false)
            .unwrap();

        assert_eq!(path, dir.path().join(CONFIG_FILENAME));
        let config = Config::discover(dir.path()).unwrap();
        assert_eq!(config.app.as_str(), "storefront");
        assert_eq!(config.server.host, "jails.test");
        assert_eq!(config.server.user(), "ops");
        assert_eq!(config.server.port, 2022);
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        init_config(dir.path(), None, None, false).unwrap();

        let err = init_config(dir.path(), None, None, false).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));

        init_config(dir.path(), Some("other"), None, true).unwrap();
        let config = Config::discover(dir.path()).unwrap();
        assert_eq!(config.app.as_str(), "other");
    }

    #[test]
    fn init_rejects_invalid_app_name() {
        let dir = tempfile::tempdir().unwrap();
        let err = init_config(dir.path(), Some("-bad"), None, false).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(!dir.path().join(CONFIG_FILENAME).exists());
    }
}
