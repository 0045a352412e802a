use std::sync::Mutex;

use tempfile::NamedTempFile;

use engine_eval::{ConfidenceAggregation, EvalConfig, EvalError};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "ENGINE_EVAL_CONFIG",
        "ENGINE_EVAL_NB_CONSECUTIVE_FRAMES",
        "ENGINE_EVAL_CONF_THRESH",
        "ENGINE_EVAL_MAX_BBOX_SIZE",
        "ENGINE_EVAL_MODEL_PATH",
        "ENGINE_EVAL_AGGREGATION",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "nb_consecutive_frames": 3,
        "conf_thresh": 0.35,
        "max_bbox_size": 0.2,
        "model_path": "models/smoke.onnx",
        "aggregation": "mean",
        "checkpoint": { "interval": 20 }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("ENGINE_EVAL_CONFIG", file.path());
    std::env::set_var("ENGINE_EVAL_CONF_THRESH", "0.6");
    std::env::set_var("ENGINE_EVAL_AGGREGATION", "last");

    let cfg = EvalConfig::load().expect("load config");

    assert_eq!(cfg.nb_consecutive_frames, 3);
    assert_eq!(cfg.conf_thresh, 0.6);
    assert_eq!(cfg.max_bbox_size, 0.2);
    assert_eq!(
        cfg.model_path.as_deref(),
        Some(std::path::Path::new("models/smoke.onnx"))
    );
    assert_eq!(cfg.aggregation, ConfidenceAggregation::Last);
    assert_eq!(cfg.checkpoint_interval, 20);

    clear_env();
}

#[test]
fn defaults_apply_without_a_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = EvalConfig::load().expect("load config");
    assert_eq!(cfg, EvalConfig::default());
}

#[test]
fn invalid_env_values_are_configuration_errors() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("ENGINE_EVAL_NB_CONSECUTIVE_FRAMES", "0");
    let err = EvalConfig::load().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EvalError>(),
        Some(EvalError::Configuration(_))
    ));

    std::env::set_var("ENGINE_EVAL_NB_CONSECUTIVE_FRAMES", "two");
    assert!(EvalConfig::load().is_err());

    clear_env();
    std::env::set_var("ENGINE_EVAL_CONF_THRESH", "1.2");
    assert!(EvalConfig::load().is_err());

    clear_env();
}
