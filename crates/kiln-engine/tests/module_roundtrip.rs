//! Save/load round trips through bytes, files, streams and sinks

use kiln_engine::{
    load_minimal_module, load_module, load_module_from_bytes, load_module_from_reader,
    read_extra_files, save_module, save_module_to_bytes, save_module_to_sink, Device,
    ExtraFiles, ProgramModule, SerializeError, Tensor, Value, WriteSink,
};
use std::io;

const NET: &str = "class Net {
    attr weight;
    def forward(self, x) {
        return x + CONSTANTS.c0;
    }
    def scale(self, factor) {
        let out = self.weight * factor;
        if ops.sum(out) > 10.0 { return out; }
        return ops.relu(out);
    }
    def count(self, n) {
        let total = 0;
        let i = 0;
        while i < n and total < 100 {
            total = total + i;
            i = i + 1;
        }
        return total;
    }
}";

fn net() -> ProgramModule {
    let module = ProgramModule::from_source(NET, vec![Value::Int(1)]).unwrap();
    module
        .set_attr("weight", Value::from(Tensor::from_vec(vec![1.0, -2.0, 3.0])))
        .unwrap();
    module
}

fn meta() -> ExtraFiles {
    let mut extra = ExtraFiles::new();
    extra.insert("meta.txt".to_string(), b"v1".to_vec());
    extra
}

// ============================================================================
// Basic round trip
// ============================================================================

#[test]
fn test_forward_survives_round_trip() {
    let bytes = save_module_to_bytes(&net(), &meta()).unwrap();

    let mut extra = ExtraFiles::new();
    let loaded = load_module_from_bytes(bytes, &mut extra, None).unwrap();
    assert_eq!(loaded.call("forward", &[Value::Int(5)]).unwrap(), Value::Int(6));
    assert_eq!(extra.get("meta.txt").map(Vec::as_slice), Some(&b"v1"[..]));
}

#[test]
fn test_loaded_module_behaves_like_original() {
    let original = net();
    let bytes = save_module_to_bytes(&original, &ExtraFiles::new()).unwrap();
    let loaded = load_module_from_bytes(bytes, &mut ExtraFiles::new(), None).unwrap();

    assert_eq!(loaded.method_names(), original.method_names());
    assert_eq!(loaded.constants(), original.constants());
    assert_eq!(loaded.attr("weight"), original.attr("weight"));

    for (method, args) in [
        ("forward", vec![Value::Int(-3)]),
        ("forward", vec![Value::Float(0.5)]),
        ("scale", vec![Value::Float(2.0)]),
        ("scale", vec![Value::Int(10)]),
        ("count", vec![Value::Int(5)]),
        ("count", vec![Value::Int(50)]),
    ] {
        assert_eq!(
            loaded.call(method, &args).unwrap(),
            original.call(method, &args).unwrap(),
            "{method}({args:?})"
        );
    }
}

#[test]
fn test_resave_is_stable() {
    let first = save_module_to_bytes(&net(), &meta()).unwrap();
    let loaded = load_module_from_bytes(first.clone(), &mut ExtraFiles::new(), None).unwrap();
    let second = save_module_to_bytes(&loaded, &meta()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_embedded_source_is_kept() {
    let bytes = save_module_to_bytes(&net(), &ExtraFiles::new()).unwrap();
    let loaded = load_module_from_bytes(bytes, &mut ExtraFiles::new(), None).unwrap();
    let source = loaded.embedded_source("code/Net.kl").unwrap();
    assert!(source.starts_with("class Net {"));
    assert!(source.contains("def forward(self, x)"));
    // The embedded source compiles on its own
    let rebuilt = ProgramModule::from_source(source, vec![Value::Int(1)]).unwrap();
    assert_eq!(rebuilt.call("forward", &[Value::Int(1)]).unwrap(), Value::Int(2));
}

// ============================================================================
// Auxiliary files
// ============================================================================

#[test]
fn test_extra_files_are_byte_exact() {
    let mut extra = ExtraFiles::new();
    extra.insert("empty".to_string(), Vec::new());
    extra.insert("binary.bin".to_string(), (0..=255u8).collect());
    extra.insert("nested/path/config.json".to_string(), br#"{"k": 1}"#.to_vec());

    let bytes = save_module_to_bytes(&net(), &extra).unwrap();
    assert_eq!(read_extra_files(&bytes).unwrap(), extra);

    let mut loaded_extra = ExtraFiles::new();
    let loaded = load_module_from_bytes(bytes, &mut loaded_extra, None).unwrap();
    assert_eq!(loaded_extra, extra);
    assert_eq!(loaded.extra_files(), Some(extra));
}

#[test]
fn test_loading_merges_into_existing_map() {
    let bytes = save_module_to_bytes(&net(), &meta()).unwrap();
    let mut extra = ExtraFiles::new();
    extra.insert("caller.txt".to_string(), b"kept".to_vec());
    extra.insert("meta.txt".to_string(), b"stale".to_vec());

    load_module_from_bytes(bytes, &mut extra, None).unwrap();
    assert_eq!(extra.len(), 2);
    assert_eq!(extra["caller.txt"], b"kept");
    assert_eq!(extra["meta.txt"], b"v1");
}

// ============================================================================
// Outputs
// ============================================================================

#[test]
fn test_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("net.kmb");
    save_module(&net(), &path, &meta()).unwrap();

    let mut extra = ExtraFiles::new();
    let loaded = load_module(&path, &mut extra, None).unwrap();
    assert_eq!(loaded.call("forward", &[Value::Int(5)]).unwrap(), Value::Int(6));
    assert_eq!(extra, meta());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn test_save_overwrites_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("net.kmb");
    std::fs::write(&path, b"previous contents").unwrap();
    save_module(&net(), &path, &meta()).unwrap();
    assert_eq!(
        std::fs::read(&path).unwrap(),
        save_module_to_bytes(&net(), &meta()).unwrap()
    );
}

#[test]
fn test_load_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = load_module(&dir.path().join("absent.kmb"), &mut ExtraFiles::new(), None);
    assert!(matches!(result, Err(SerializeError::Io(_))));
}

#[test]
fn test_sink_receives_same_bytes() {
    let expected = save_module_to_bytes(&net(), &meta()).unwrap();

    let mut out = Vec::new();
    let written = save_module_to_sink(&net(), &meta(), &mut WriteSink(&mut out)).unwrap();
    assert_eq!(written, expected.len());
    assert_eq!(out, expected);
}

#[test]
fn test_sink_accepting_small_chunks() {
    let expected = save_module_to_bytes(&net(), &meta()).unwrap();

    let mut out = Vec::new();
    let mut calls = 0;
    let mut sink = |chunk: &[u8]| -> io::Result<usize> {
        calls += 1;
        let n = chunk.len().min(7);
        out.extend_from_slice(&chunk[..n]);
        Ok(n)
    };
    let written = save_module_to_sink(&net(), &meta(), &mut sink).unwrap();
    assert_eq!(written, expected.len());
    assert_eq!(calls, expected.len().div_ceil(7));
    assert_eq!(out, expected);
}

#[test]
fn test_sink_accepting_nothing_fails() {
    let mut sink = |_: &[u8]| -> io::Result<usize> { Ok(0) };
    let err = save_module_to_sink(&net(), &meta(), &mut sink).unwrap_err();
    match err {
        SerializeError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::WriteZero),
        other => panic!("expected write error, got {other:?}"),
    }
}

#[test]
fn test_load_from_reader() {
    let bytes = save_module_to_bytes(&net(), &meta()).unwrap();
    let mut extra = ExtraFiles::new();
    let loaded = load_module_from_reader(io::Cursor::new(bytes), &mut extra, None).unwrap();
    assert_eq!(loaded.call("forward", &[Value::Int(0)]).unwrap(), Value::Int(1));
    assert_eq!(extra, meta());
}

#[test]
fn test_minimal_module_runs_without_source() {
    let bytes = save_module_to_bytes(&net(), &ExtraFiles::new()).unwrap();
    let mut minimal = load_minimal_module(&bytes).unwrap();
    assert_eq!(minimal.class_name, "Net");
    assert_eq!(minimal.attributes, vec!["weight".to_string()]);
    assert_eq!(
        minimal.call("forward", vec![Value::Int(41)]).unwrap(),
        Value::Int(42)
    );
    assert_eq!(
        minimal.call("count", vec![Value::Int(4)]).unwrap(),
        Value::Int(6)
    );
}

// ============================================================================
// Buffer ownership
// ============================================================================

#[test]
fn test_buffer_lives_as_long_as_module() {
    let bytes = save_module_to_bytes(&net(), &ExtraFiles::new()).unwrap();
    let size = bytes.len();
    let loaded = load_module_from_bytes(bytes, &mut ExtraFiles::new(), None).unwrap();

    let backing = loaded.backing_buffer().unwrap();
    assert_eq!(backing.len(), size);
    let weak = backing.downgrade();
    assert!(weak.is_alive());

    drop(loaded);
    assert!(!weak.is_alive());
}

#[test]
fn test_source_built_module_has_no_buffer() {
    let module = net();
    assert!(module.backing_buffer().is_none());
    assert!(module.extra_files().is_none());
}

// ============================================================================
// Device placement
// ============================================================================

#[test]
fn test_load_onto_device() {
    let original = ProgramModule::from_source(
        NET,
        vec![Value::from(Tensor::from_vec(vec![0.5, 0.5, 0.5]))],
    )
    .unwrap();
    original
        .set_attr("weight", Value::from(Tensor::from_vec(vec![1.0, 2.0, 3.0])))
        .unwrap();
    let bytes = save_module_to_bytes(&original, &ExtraFiles::new()).unwrap();

    let on_gpu = load_module_from_bytes(bytes.clone(), &mut ExtraFiles::new(), Some(Device::Cuda(0)))
        .unwrap();
    let weight = on_gpu.attr("weight").unwrap();
    assert_eq!(weight.as_tensor().unwrap().device, Device::Cuda(0));
    assert_eq!(weight.as_tensor().unwrap().data, vec![1.0, 2.0, 3.0]);
    let constant = &on_gpu.constants()[0];
    assert_eq!(constant.as_tensor().unwrap().device, Device::Cuda(0));

    let scaled = on_gpu.call("scale", &[Value::Float(2.0)]).unwrap();
    assert_eq!(scaled.as_tensor().unwrap().device, Device::Cuda(0));
    assert_eq!(scaled.as_tensor().unwrap().data, vec![2.0, 4.0, 6.0]);
}

#[test]
fn test_load_without_device_keeps_placement() {
    let original = net();
    original
        .set_attr(
            "weight",
            Value::from(Tensor::from_vec(vec![1.0]).to_device(Device::Mps)),
        )
        .unwrap();
    let bytes = save_module_to_bytes(&original, &ExtraFiles::new()).unwrap();
    let loaded = load_module_from_bytes(bytes, &mut ExtraFiles::new(), None).unwrap();
    let weight = loaded.attr("weight").unwrap();
    assert_eq!(weight.as_tensor().unwrap().device, Device::Mps);
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_loads() {
    let bytes = save_module_to_bytes(&net(), &meta()).unwrap();

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let bytes = bytes.clone();
                scope.spawn(move || {
                    let mut extra = ExtraFiles::new();
                    let loaded = load_module_from_bytes(bytes, &mut extra, None).unwrap();
                    assert_eq!(extra, meta());
                    loaded.call("forward", &[Value::Int(i)]).unwrap()
                })
            })
            .collect();
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().unwrap(), Value::Int(i as i64 + 1));
        }
    });

    assert_eq!(kiln_engine::registration_count(), 1);
    assert_eq!(kiln_engine::codec_registration_count(), 1);
}

#[test]
fn test_shared_module_across_threads() {
    let bytes = save_module_to_bytes(&net(), &ExtraFiles::new()).unwrap();
    let loaded = load_module_from_bytes(bytes, &mut ExtraFiles::new(), None).unwrap();

    std::thread::scope(|scope| {
        for i in 0..4 {
            let loaded = &loaded;
            scope.spawn(move || {
                assert_eq!(
                    loaded.call("forward", &[Value::Int(i)]).unwrap(),
                    Value::Int(i + 1)
                );
            });
        }
    });
}

#[test]
fn test_concurrent_saves_to_one_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("net.kmb");
    let barrier = std::sync::Barrier::new(8);

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (path, barrier) = (&path, &barrier);
                scope.spawn(move || {
                    let module = net();
                    barrier.wait();
                    for _ in 0..5 {
                        save_module(&module, path, &meta())?;
                    }
                    Ok::<_, SerializeError>(())
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
    });

    let mut extra = ExtraFiles::new();
    let loaded = load_module(&path, &mut extra, None).unwrap();
    assert_eq!(loaded.call("forward", &[Value::Int(5)]).unwrap(), Value::Int(6));
    assert_eq!(extra, meta());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}
