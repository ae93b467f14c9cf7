//! Lowering policy applied by the saver

use kiln_bytecode::{get_root, Module};
use kiln_engine::{
    load_minimal_module, load_module_from_bytes, save_module, save_module_to_bytes,
    save_module_with_options, CompilationOptions, ExtraFiles, KilnConfig, ProgramModule,
    SerializeError, Value,
};
use std::collections::BTreeSet;

const NOISY: &str = "class Noisy {
    def forward(self, x) {
        ops.print(x);
        return x * 2;
    }
}";

const QUIET: &str = "class Quiet {
    def forward(self, x) {
        let y = x * 2;
        return ops.relu(y - 3);
    }
}";

fn quiet() -> ProgramModule {
    ProgramModule::from_source(QUIET, vec![]).unwrap()
}

#[test]
fn test_full_runtime_operator_rejected_by_default() {
    let module = ProgramModule::from_source(NOISY, vec![]).unwrap();
    // Runs fine in the full runtime
    assert_eq!(module.call("forward", &[Value::Int(2)]).unwrap(), Value::Int(4));

    let err = save_module_to_bytes(&module, &ExtraFiles::new()).unwrap_err();
    match err {
        SerializeError::UnsupportedOperator { operator, method } => {
            assert_eq!(operator, "print");
            assert_eq!(method, "forward");
        }
        other => panic!("expected unsupported operator, got {other:?}"),
    }
}

#[test]
fn test_failed_save_leaves_no_file() {
    let module = ProgramModule::from_source(NOISY, vec![]).unwrap();
    let dir = tempfile::tempdir().unwrap();

    let fresh = dir.path().join("noisy.kmb");
    assert!(save_module(&module, &fresh, &ExtraFiles::new()).is_err());
    assert!(!fresh.exists());

    let existing = dir.path().join("existing.kmb");
    std::fs::write(&existing, b"keep me").unwrap();
    assert!(save_module(&module, &existing, &ExtraFiles::new()).is_err());
    assert_eq!(std::fs::read(&existing).unwrap(), b"keep me");
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn test_full_runtime_operator_allowed_when_requested() {
    let module = ProgramModule::from_source(NOISY, vec![]).unwrap();
    let options = CompilationOptions {
        allow_jit_only_ops: true,
        ..CompilationOptions::default()
    };
    let bytes = save_module_with_options(&module, &ExtraFiles::new(), &options).unwrap();
    let loaded = load_module_from_bytes(bytes, &mut ExtraFiles::new(), None).unwrap();
    assert_eq!(loaded.call("forward", &[Value::Int(3)]).unwrap(), Value::Int(6));
}

#[test]
fn test_allowlist_restricts_operators() {
    let module = quiet();
    let relu_only = CompilationOptions {
        operator_allowlist: Some(BTreeSet::from(["relu".to_string()])),
        ..CompilationOptions::default()
    };
    assert!(save_module_with_options(&module, &ExtraFiles::new(), &relu_only).is_ok());

    let empty = CompilationOptions {
        operator_allowlist: Some(BTreeSet::new()),
        ..CompilationOptions::default()
    };
    assert!(matches!(
        save_module_with_options(&module, &ExtraFiles::new(), &empty),
        Err(SerializeError::UnsupportedOperator { .. })
    ));
}

#[test]
fn test_promoted_ops_toggle_changes_operator_table() {
    let module = quiet();
    let promoted = save_module_to_bytes(&module, &ExtraFiles::new()).unwrap();
    let called = save_module_with_options(
        &module,
        &ExtraFiles::new(),
        &CompilationOptions {
            emit_promoted_ops: false,
            ..CompilationOptions::default()
        },
    )
    .unwrap();

    let operators = |bytes: &[u8]| -> Vec<String> {
        let decoded = Module::decode(bytes).unwrap();
        decoded.functions[0]
            .operators
            .iter()
            .map(|op| op.name.clone())
            .collect()
    };
    assert_eq!(operators(&promoted), vec!["relu"]);
    let mut names = operators(&called);
    names.sort();
    assert_eq!(names, vec!["mul", "relu", "sub"]);

    // Both forms compute the same thing
    for bytes in [promoted, called] {
        let mut minimal = load_minimal_module(&bytes).unwrap();
        assert_eq!(minimal.call("forward", vec![Value::Int(5)]).unwrap(), Value::Int(7));
        assert_eq!(minimal.call("forward", vec![Value::Int(1)]).unwrap(), Value::Int(0));
    }
}

#[test]
fn test_debug_info_retained_on_request() {
    let module = quiet();
    let plain = save_module_to_bytes(&module, &ExtraFiles::new()).unwrap();
    assert!(Module::decode(&plain).unwrap().debug_info.is_none());

    let options = CompilationOptions {
        retain_debug_info: true,
        ..CompilationOptions::default()
    };
    let with_debug = save_module_with_options(&module, &ExtraFiles::new(), &options).unwrap();
    let minimal = load_minimal_module(&with_debug).unwrap();
    assert!(minimal.debug_info.is_some());
    assert!(minimal.location(0, 0).is_some());

    // Line tables don't change behavior
    let loaded = load_module_from_bytes(with_debug, &mut ExtraFiles::new(), None).unwrap();
    assert_eq!(loaded.call("forward", &[Value::Int(4)]).unwrap(), Value::Int(5));
}

#[test]
fn test_options_from_config_file() {
    let config = KilnConfig::parse(
        r#"
[compile]
emit_promoted_ops = false
allow_jit_only_ops = true

[load]
max_bytecode_version = 5
"#,
    )
    .unwrap();
    assert_eq!(config.load.max_bytecode_version, Some(5));

    let module = ProgramModule::from_source(NOISY, vec![]).unwrap();
    let bytes = save_module_with_options(&module, &ExtraFiles::new(), &config.compile).unwrap();
    let root = get_root(&bytes).unwrap();
    assert!(root.has_sources());
    let names: Vec<_> = root.decode().unwrap().functions[0]
        .operators
        .iter()
        .map(|op| op.name.clone())
        .collect();
    assert!(names.contains(&"print".to_string()));
    assert!(names.contains(&"mul".to_string()));
}
