use meshdns_domain::{Config, ConfigError};
use std::io::Write;
use std::path::Path;

#[test]
fn test_load_without_path_uses_defaults() {
    let config = Config::load(None).unwrap();
    assert_eq!(config.mesh.num_queries_per_thread, 1024);
    assert_eq!(config.infra.numhosts, 10_000);
}

#[test]
fn test_load_reads_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[cache]
rrset_cache_size = 1048576
rrset_cache_slabs = 8

[infra]
host_ttl = 60

[logging]
level = "debug"
format = "json"
"#
    )
    .unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.cache.rrset_cache_size, 1_048_576);
    assert_eq!(config.cache.rrset_cache_slabs, 8);
    assert_eq!(config.infra.host_ttl, 60);
    assert!(config.logging.is_json());
}

#[test]
fn test_load_missing_file_reports_path() {
    let err = Config::load(Some(Path::new("/nonexistent/meshdns.toml"))).unwrap_err();
    match err {
        ConfigError::Io { path, .. } => assert!(path.contains("meshdns.toml")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_load_rejects_invalid_values() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[mesh]\nmax_activation = 0").unwrap();
    assert!(matches!(
        Config::load(Some(file.path())),
        Err(ConfigError::Validation(_))
    ));
}
