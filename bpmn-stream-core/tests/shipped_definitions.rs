use bpmn_stream_core::config::EngineConfig;
use bpmn_stream_core::model::yaml::load_process_dir;
use std::path::PathBuf;

fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("workspace root")
        .to_path_buf()
}

#[test]
fn test_shipped_process_definitions_are_valid() {
    let processes = load_process_dir(workspace_root().join("processes")).unwrap();
    let mut ids: Vec<_> = processes.iter().map(|p| p.bpmn_process_id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["heartbeat", "order"]);
}

#[test]
fn test_shipped_engine_config_loads() {
    let config = EngineConfig::load(workspace_root().join("config/engine.yaml")).unwrap();
    assert_eq!(config.partition_count, 2);
    assert_eq!(config.processes_dir, "processes");
}
