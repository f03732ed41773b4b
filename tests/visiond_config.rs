use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::NamedTempFile;

use vision_pipeline::{
    ConfigurationError, Crop, MemoryReporter, ProcessorRegistry, ProcessorSelection, VisionConfig,
};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "VISION_CONFIG",
        "VISION_WORKERS",
        "VISION_RING_CAPACITY",
        "VISION_SHUTDOWN_GRACE_MS",
        "VISION_CAMERA_SOURCE",
    ] {
        std::env::remove_var(key);
    }
}

fn config_file(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_toml_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".toml",
        r#"
        [pipeline]
        workers = 3
        ring_capacity = 16

        [[cameras]]
        name = "front"
        source = "stub://front?noise=4"
        width = 320
        height = 240
        horizontal_fov = 70.0
        frame_interval_ms = 50
        processors = ["cargo"]
        crop = { x = 10, y = 20, width = 300, height = 200 }

        [[cameras]]
        name = "rear"
        width = 160
        height = 120

        [[processors]]
        name = "cargo"
        type = "color_blob"
        params = { hsv_min = [50, 100, 100], hsv_max = [70, 255, 255], target_width = 0.5, target_height = 0.25 }

        [[processors]]
        name = "moves"
        type = "motion"
        "#,
    );

    std::env::set_var("VISION_CONFIG", file.path());
    std::env::set_var("VISION_RING_CAPACITY", "4");
    std::env::set_var("VISION_CAMERA_SOURCE", "stub://front?target=30x15");

    let cfg = VisionConfig::load().expect("load config");
    clear_env();

    assert_eq!(cfg.pipeline.workers, 3);
    assert_eq!(cfg.pipeline.ring_capacity, 4);
    assert_eq!(cfg.cameras.len(), 2);

    let front = &cfg.cameras[0];
    assert_eq!(front.source, "stub://front?target=30x15");
    assert_eq!(front.settings.width, 320);
    assert_eq!(front.settings.horizontal_fov, 70.0);
    assert_eq!(front.settings.frame_interval, Duration::from_millis(50));
    assert_eq!(
        front.settings.crop,
        Some(Crop {
            x: 10,
            y: 20,
            width: 300,
            height: 200
        })
    );
    assert_eq!(
        front.processors,
        ProcessorSelection::Named(vec!["cargo".to_string()])
    );

    let rear = &cfg.cameras[1];
    assert_eq!(rear.source, "stub://rear");
    assert_eq!(rear.processors, ProcessorSelection::All);

    let names: Vec<&str> = cfg.processors.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["cargo", "moves"]);

    let group = cfg
        .pipeline_builder(
            &ProcessorRegistry::with_builtin(),
            Arc::new(MemoryReporter::new()),
        )
        .expect("open sources")
        .build()
        .expect("build pipeline");
    assert_eq!(group.cameras(), vec!["front", "rear"]);
}

#[test]
fn json_config_is_accepted_from_an_explicit_path() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".json",
        r#"{
            "pipeline": { "shutdown_grace_ms": 750 },
            "cameras": [{ "name": "dock", "reopen_after": 3, "backoff_base_ms": 50 }]
        }"#,
    );

    let cfg = VisionConfig::from_path(file.path()).expect("load config");
    assert_eq!(cfg.pipeline.shutdown_grace, Duration::from_millis(750));
    assert_eq!(cfg.cameras[0].settings.name, "dock");
    assert_eq!(cfg.cameras[0].settings.reopen_after, 3);
    assert_eq!(cfg.cameras[0].settings.backoff_base, Duration::from_millis(50));
    // Processors fall back to the built-in colour-blob default.
    assert_eq!(cfg.processors.len(), 1);
    assert_eq!(cfg.processors[0].kind, "color_blob");
}

#[test]
fn invalid_env_override_is_a_configuration_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("VISION_WORKERS", "many");
    let err = VisionConfig::load().unwrap_err();
    clear_env();

    assert!(matches!(
        err,
        ConfigurationError::Invalid { ref field, .. } if field == "VISION_WORKERS"
    ));
}

#[test]
fn unknown_fields_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".toml",
        r#"
        [[cameras]]
        name = "front"
        exposure = 12
        "#,
    );
    let err = VisionConfig::from_path(file.path()).unwrap_err();
    assert!(matches!(err, ConfigurationError::Parse { .. }), "{err}");
}

#[test]
fn missing_file_is_unreadable() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().expect("temp dir");
    let err = VisionConfig::from_path(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigurationError::Unreadable { .. }));
}

#[test]
fn bad_processor_params_fail_when_building() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".json",
        r#"{
            "processors": [{ "name": "cargo", "type": "color_blob", "params": { "hsv_min": [0, 0, 0] } }]
        }"#,
    );
    let cfg = VisionConfig::from_path(file.path()).expect("load config");
    let err = cfg
        .pipeline_builder(
            &ProcessorRegistry::with_builtin(),
            Arc::new(MemoryReporter::new()),
        )
        .err()
        .expect("params rejected");
    assert!(matches!(
        err,
        ConfigurationError::Invalid { ref field, .. } if field == "processors.cargo.params"
    ));
}
