use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use stratum_core::{ControlData, CoreError, Image, ImageStore};
use stratum_runtime::mock::{EngineCall, MockEngine, MockTransport, TransportCall};
use stratum_runtime::{ConfigArg, ConfigField, CopyOptions, Locator, RuntimeError, ToolConfig};
use stratum_store::{verify_chain, ImageConfig, ImageManifest, OciLayout};

fn config_args(call: &EngineCall) -> &[ConfigArg] {
    match call {
        EngineCall::Config { args, .. } => args,
        other => panic!("expected config call, got {other:?}"),
    }
}

fn staged_leftovers(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with(".temp_layer"))
        .collect()
}

#[test]
fn duplicate_issues_one_oci_copy() {
    let engine = MockEngine::new();
    let transport = MockTransport::new();
    let store = ImageStore::new(&engine, &transport);

    let image = Image::new("a:b", "/c");
    let copy = store.duplicate(&image, "d:e", Path::new("/f")).unwrap();

    assert_eq!(copy, Image::new("d:e", "/f"));
    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    match &calls[0] {
        TransportCall::Copy {
            source,
            destination,
            options,
        } => {
            assert_eq!(source.to_string(), "oci:/c/a:b");
            assert_eq!(destination.to_string(), "oci:/f/d:e");
            assert_eq!(*options, CopyOptions::default());
        }
        other => panic!("unexpected call {other:?}"),
    }
    assert!(engine.calls().is_empty());
}

#[test]
fn acquire_creates_dir_and_overrides_platform() {
    let dir = tempfile::tempdir().unwrap();
    let image_dir = dir.path().join("images");
    let engine = MockEngine::new();
    let transport = MockTransport::new();
    let store = ImageStore::new(&engine, &transport);

    let (image, source) = store
        .acquire("ubuntu:22.04", &image_dir, "arm64", Some("v8"))
        .unwrap();

    assert!(image_dir.is_dir());
    assert_eq!(image, Image::new("ubuntu:22.04", &image_dir));
    assert_eq!(source.to_string(), "docker://ubuntu:22.04");
    assert_eq!(
        transport.calls(),
        vec![TransportCall::Copy {
            source: Locator::Registry("ubuntu:22.04".to_owned()),
            destination: Locator::Oci(image_dir.join("ubuntu:22.04")),
            options: CopyOptions::platform("arm64", Some("v8".to_owned())),
        }]
    );
}

#[test]
fn acquire_failure_is_transfer_error() {
    let dir = tempfile::tempdir().unwrap();
    let engine = MockEngine::new();
    let transport = MockTransport::new().failing_copies();
    let store = ImageStore::new(&engine, &transport);

    let err = store
        .acquire("missing:1", dir.path(), "amd64", None)
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Runtime(RuntimeError::Transfer { .. })
    ));
}

#[test]
fn create_new_without_variant() {
    let dir = tempfile::tempdir().unwrap();
    let engine = MockEngine::new();
    let transport = MockTransport::new();
    let store = ImageStore::new(&engine, &transport);

    let (image, source) = store
        .create_new("bare:latest", dir.path(), "amd64", None)
        .unwrap();

    assert_eq!(image.image_path(), dir.path().join("bare:latest"));
    assert_eq!(
        source.to_string(),
        format!("oci:{}", dir.path().join("bare:latest").display())
    );
    assert_eq!(
        engine.calls(),
        vec![
            EngineCall::InitLayout(dir.path().join("bare")),
            EngineCall::NewImage(dir.path().join("bare:latest")),
            EngineCall::Config {
                image: dir.path().join("bare:latest"),
                args: vec![
                    ConfigArg::Architecture("amd64".to_owned()),
                    ConfigArg::NoHistory
                ],
            },
        ]
    );
}

#[test]
fn create_new_with_variant_rewrites_chain() {
    let dir = tempfile::tempdir().unwrap();
    let engine = MockEngine::materializing();
    let transport = MockTransport::new();
    let store = ImageStore::new(&engine, &transport);

    let (image, _) = store
        .create_new("bare:latest", dir.path(), "arm64", Some("v8"))
        .unwrap();

    let layout = image.layout();
    let report = verify_chain(&layout).unwrap();
    assert!(report.is_ok(), "{:?}", report.failed);

    let index = layout.read_index().unwrap();
    let manifest: ImageManifest = layout.read_blob_json(&index.manifests[0].digest).unwrap();
    let config: ImageConfig = layout.read_blob_json(&manifest.config.digest).unwrap();
    assert_eq!(config.architecture(), Some("arm64"));
    assert_eq!(config.variant(), Some("v8"));
}

#[test]
fn create_new_engine_failure_stops_early() {
    let dir = tempfile::tempdir().unwrap();
    let engine = MockEngine::new().failing_on("new");
    let transport = MockTransport::new();
    let store = ImageStore::new(&engine, &transport);

    let err = store
        .create_new("bare:latest", dir.path(), "amd64", None)
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Runtime(RuntimeError::EngineInvocation { .. })
    ));
    assert_eq!(engine.calls().len(), 2);
}

#[test]
fn unpack_removes_stale_bundle() {
    let dir = tempfile::tempdir().unwrap();
    let bundle_dir = dir.path().join("bundles");
    let stale = bundle_dir.join("a-b");
    fs::create_dir_all(stale.join("rootfs")).unwrap();
    fs::write(stale.join("rootfs").join("stale.txt"), "old").unwrap();

    let engine = MockEngine::new();
    let transport = MockTransport::new();
    let store = ImageStore::new(&engine, &transport);
    let rootfs = store
        .unpack(&Image::new("a:b", "/c"), &bundle_dir)
        .unwrap();

    assert_eq!(rootfs, bundle_dir.join("a-b").join("rootfs"));
    assert!(!rootfs.join("stale.txt").exists());
    assert_eq!(
        engine.calls(),
        vec![EngineCall::Unpack {
            image: PathBuf::from("/c/a:b"),
            bundle: bundle_dir.join("a-b"),
        }]
    );
}

#[test]
fn add_layer_stages_tar_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let layer_root = dir.path().join("prime");
    fs::create_dir_all(layer_root.join("usr/bin")).unwrap();
    fs::write(layer_root.join("usr/bin/app"), "#!/bin/sh\n").unwrap();
    let image_dir = dir.path().join("images");
    fs::create_dir_all(&image_dir).unwrap();

    let engine = MockEngine::new();
    let transport = MockTransport::new();
    let store = ImageStore::new(&engine, &transport);
    let (tagged, stats) = store
        .add_layer(&Image::new("a:b", &image_dir), "tag", &layer_root)
        .unwrap();

    assert_eq!(tagged, Image::new("a:tag", &image_dir));
    assert_eq!(stats.files, 1);
    match &engine.calls()[0] {
        EngineCall::AddLayer {
            image,
            layer,
            tag,
            entries,
            ..
        } => {
            assert_eq!(image, &image_dir.join("a:b"));
            assert_eq!(
                layer,
                &image_dir.join(format!(".temp_layer.{}.tar", std::process::id()))
            );
            assert_eq!(tag.as_deref(), Some("tag"));
            assert!(entries.iter().any(|e| e == "usr/bin/app"));
        }
        other => panic!("unexpected call {other:?}"),
    }
    assert!(staged_leftovers(&image_dir).is_empty());
}

#[test]
fn add_layer_cleans_up_on_failure() {
    let dir = tempfile::tempdir().unwrap();
    let layer_root = dir.path().join("prime");
    fs::create_dir_all(&layer_root).unwrap();
    fs::write(layer_root.join("f"), "x").unwrap();

    let engine = MockEngine::new().failing_on("add-layer");
    let transport = MockTransport::new();
    let store = ImageStore::new(&engine, &transport);
    let err = store
        .add_layer(&Image::new("a:b", dir.path()), "tag", &layer_root)
        .unwrap_err();

    assert!(matches!(
        err,
        CoreError::Runtime(RuntimeError::EngineInvocation { .. })
    ));
    assert!(staged_leftovers(dir.path()).is_empty());
}

#[test]
fn add_layer_missing_root_fails_without_engine_call() {
    let dir = tempfile::tempdir().unwrap();
    let engine = MockEngine::new();
    let transport = MockTransport::new();
    let store = ImageStore::new(&engine, &transport);

    let err = store
        .add_layer(
            &Image::new("a:b", dir.path()),
            "tag",
            &dir.path().join("no-such-prime-dir"),
        )
        .unwrap_err();

    assert!(matches!(err, CoreError::Store(_)), "got {err}");
    assert!(engine.calls().is_empty());
    assert!(staged_leftovers(dir.path()).is_empty());
}

#[test]
fn set_entrypoint_and_cmd_clear_first() {
    let engine = MockEngine::new();
    let transport = MockTransport::new();
    let store = ImageStore::new(&engine, &transport);
    let image = Image::new("a:b", "/c");

    store
        .set_entrypoint(&image, &["arg1".to_owned(), "arg2".to_owned()])
        .unwrap();
    store.set_cmd(&image, &[]).unwrap();

    let calls = engine.calls();
    assert_eq!(
        config_args(&calls[0]),
        &[
            ConfigArg::Clear(ConfigField::Entrypoint),
            ConfigArg::Entrypoint("arg1".to_owned()),
            ConfigArg::Entrypoint("arg2".to_owned()),
        ]
    );
    assert_eq!(config_args(&calls[1]), &[ConfigArg::Clear(ConfigField::Cmd)]);
}

#[test]
fn set_annotations_updates_labels_then_manifest() {
    let engine = MockEngine::new();
    let transport = MockTransport::new();
    let store = ImageStore::new(&engine, &transport);
    let annotations = vec![
        ("NAME1".to_owned(), "VALUE1".to_owned()),
        ("NAME2".to_owned(), "VALUE2".to_owned()),
    ];
    store
        .set_annotations(&Image::new("a:b", "/c"), &annotations)
        .unwrap();

    let calls = engine.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(
        config_args(&calls[0]),
        &[
            ConfigArg::Clear(ConfigField::Labels),
            ConfigArg::Label("NAME1=VALUE1".to_owned()),
            ConfigArg::Label("NAME2=VALUE2".to_owned()),
        ]
    );
    assert_eq!(
        config_args(&calls[1]),
        &[
            ConfigArg::Clear(ConfigField::Annotations),
            ConfigArg::Annotation("NAME1=VALUE1".to_owned()),
            ConfigArg::Annotation("NAME2=VALUE2".to_owned()),
        ]
    );
}

#[test]
fn repeated_field_replacement_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let engine = MockEngine::materializing();
    let transport = MockTransport::new();
    let store = ImageStore::new(&engine, &transport);
    let (image, _) = store
        .create_new("bare:latest", dir.path(), "amd64", None)
        .unwrap();

    let apply = || {
        store
            .set_entrypoint(&image, &["/bin/app".to_owned()])
            .unwrap();
        store.set_cmd(&image, &["serve".to_owned()]).unwrap();
        store
            .set_env(&image, &[("A".to_owned(), "1".to_owned())])
            .unwrap();
        store
            .set_annotations(&image, &[("k".to_owned(), "v".to_owned())])
            .unwrap();
        fs::read(image.layout().index_path()).unwrap()
    };
    let first = apply();
    let second = apply();
    assert_eq!(first, second);

    let layout = image.layout();
    let index = layout.read_index().unwrap();
    let manifest: ImageManifest = layout.read_blob_json(&index.manifests[0].digest).unwrap();
    let config: ImageConfig = layout.read_blob_json(&manifest.config.digest).unwrap();
    let runtime = config.get("config").unwrap();
    assert_eq!(runtime["Entrypoint"], serde_json::json!(["/bin/app"]));
    assert_eq!(runtime["Env"], serde_json::json!(["A=1"]));
    assert_eq!(runtime["Labels"]["k"], "v");
}

#[test]
fn control_data_is_added_as_untagged_layer() {
    let dir = tempfile::tempdir().unwrap();
    let engine = MockEngine::new();
    let transport = MockTransport::new();
    let store = ImageStore::new(&engine, &transport);
    let metadata = ControlData {
        created: "2024-03-01T12:30:00+00:00".to_owned(),
        name: "rock-name".to_owned(),
        version: "1".to_owned(),
    };

    store
        .set_control_data(&Image::new("a:b", dir.path()), &metadata)
        .unwrap();

    let calls = engine.calls();
    let EngineCall::AddLayer {
        image,
        layer,
        tag,
        entries,
        data,
    } = &calls[0]
    else {
        panic!("expected add-layer call");
    };
    assert_eq!(image, &dir.path().join("a:b"));
    assert_eq!(
        layer,
        &dir.path()
            .join(format!(".temp_layer.control_data.{}.tar", std::process::id()))
    );
    assert!(tag.is_none());
    assert!(entries.iter().any(|e| e == ".rock/metadata.yaml"));

    let mut ar = tar::Archive::new(data.as_slice());
    let mut content = String::new();
    for entry in ar.entries().unwrap() {
        let mut entry = entry.unwrap();
        if entry.path().unwrap() == Path::new(".rock/metadata.yaml") {
            entry.read_to_string(&mut content).unwrap();
        }
    }
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("created: "));
    assert_eq!(lines[1], "name: rock-name");
    assert!(lines[2].starts_with("version: "));
    assert_eq!(serde_yaml::from_str::<ControlData>(&content).unwrap(), metadata);

    assert!(staged_leftovers(dir.path()).is_empty());
}

#[test]
fn control_data_cleans_up_on_failure() {
    let dir = tempfile::tempdir().unwrap();
    let engine = MockEngine::new().failing_on("add-layer");
    let transport = MockTransport::new();
    let store = ImageStore::new(&engine, &transport);
    let metadata = ControlData {
        created: "2024-03-01T12:30:00+00:00".to_owned(),
        name: "rock-name".to_owned(),
        version: "1".to_owned(),
    };

    let err = store
        .set_control_data(&Image::new("a:b", dir.path()), &metadata)
        .unwrap_err();

    assert!(matches!(
        err,
        CoreError::Runtime(RuntimeError::EngineInvocation { .. })
    ));
    assert_eq!(engine.calls().len(), 1);
    assert!(staged_leftovers(dir.path()).is_empty());
}

#[test]
fn archive_export_forces_entrypoint_then_copies() {
    let engine = MockEngine::new();
    let transport = MockTransport::new();
    let store = ImageStore::new(&engine, &transport);

    store
        .export_to_archive(&Image::new("a:b", "/c"), "tag", Path::new("out.tar"))
        .unwrap();

    assert_eq!(
        engine.calls(),
        vec![EngineCall::Config {
            image: PathBuf::from("/c/a:tag"),
            args: vec![
                ConfigArg::Clear(ConfigField::Entrypoint),
                ConfigArg::Entrypoint("/bin/pebble".to_owned()),
                ConfigArg::Clear(ConfigField::Cmd),
                ConfigArg::Cmd("help".to_owned()),
            ],
        }]
    );
    match &transport.calls()[0] {
        TransportCall::Copy {
            source,
            destination,
            ..
        } => {
            assert_eq!(source.to_string(), "oci:/c/a:tag");
            assert_eq!(destination.to_string(), "oci-archive:out.tar:tag");
        }
        other => panic!("unexpected call {other:?}"),
    }
}

#[test]
fn archive_export_without_configured_entrypoint_keeps_image_config() {
    let engine = MockEngine::new();
    let transport = MockTransport::new();
    let config = ToolConfig {
        archive_entrypoint: Vec::new(),
        archive_cmd: Vec::new(),
        ..ToolConfig::default()
    };
    let store = ImageStore::from_config(&engine, &transport, &config);

    store
        .export_to_archive(&Image::new("a:b", "/c"), "tag", Path::new("out.tar"))
        .unwrap();
    assert!(engine.calls().is_empty());
    assert_eq!(transport.calls().len(), 1);
}

#[test]
fn digest_decodes_hex_after_last_colon() {
    let engine = MockEngine::new();
    let transport = MockTransport::new().with_inspect_output("sha512:00ff7f\n");
    let store = ImageStore::new(&engine, &transport);

    let locator = Locator::Registry("a:b".to_owned());
    assert_eq!(store.digest(&locator).unwrap(), vec![0x00, 0xff, 0x7f]);
    assert_eq!(transport.calls(), vec![TransportCall::Inspect(locator)]);
}

#[test]
fn digest_rejects_garbage() {
    let engine = MockEngine::new();
    let transport = MockTransport::new().with_inspect_output("sha256:not-hex");
    let store = ImageStore::new(&engine, &transport);
    assert!(matches!(
        store.digest(&Locator::Registry("a:b".to_owned())),
        Err(CoreError::InvalidDigest(_))
    ));
}

#[test]
fn layout_of_image_matches_engine_layout_dir() {
    let image = Image::new("bare:latest", "/w/images");
    let (layout, reference) = OciLayout::from_image_path(&image.image_path()).unwrap();
    assert_eq!(layout.root(), image.layout().root());
    assert_eq!(reference.tag, image.tag());
}
