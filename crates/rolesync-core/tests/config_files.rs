//! Loading configuration and topology from disk.

use std::fs;

use rolesync_core::{SyncConfig, SyncError, Topology, TopologyReader};

#[test]
fn missing_config_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = SyncConfig::load(&dir.path().join("rolesync.toml")).unwrap();
    assert_eq!(config, SyncConfig::default());
}

#[test]
fn config_file_is_parsed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rolesync.toml");
    fs::write(
        &path,
        "default_api_port = 4510\nstate_dir = \"/tmp/rolesync-state\"\n",
    )
    .unwrap();

    let config = SyncConfig::load(&path).unwrap();
    assert_eq!(config.default_api_port, 4510);
    assert_eq!(config.state_dir().to_str(), Some("/tmp/rolesync-state"));
}

#[test]
fn malformed_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rolesync.toml");
    fs::write(&path, "default_api_port = \"high\"").unwrap();

    assert!(matches!(
        SyncConfig::load(&path),
        Err(SyncError::Config(_))
    ));
}

#[test]
fn topology_loads_by_extension() {
    let dir = tempfile::tempdir().unwrap();

    let json = dir.path().join("topology.json");
    fs::write(
        &json,
        r#"{ "agents": [
            { "name": "client-01", "role": "Client", "ipAddress": "10.0.0.1" },
            { "name": "server-01", "role": "Server", "ipAddress": "10.0.0.2", "port": 4501 }
        ] }"#,
    )
    .unwrap();

    let toml = dir.path().join("topology.toml");
    fs::write(
        &toml,
        "[[agents]]\nname = \"server-01\"\nrole = \"Server\"\nip_address = \"10.0.0.2\"\n",
    )
    .unwrap();

    let from_json = Topology::load(&json).unwrap();
    assert_eq!(from_json.agents_for_role("server")[0].port, Some(4501));

    let from_toml = Topology::load(&toml).unwrap();
    assert_eq!(from_toml.agents().len(), 1);
}

#[test]
fn unreadable_topology_is_a_topology_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Topology::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, SyncError::Topology(_)));
}
