use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::TempDir;
use walkdir::WalkDir;

use spindebug_core::{ArtifactRef, DebugConfig};
use spindebug_oci::manifest::{
    Descriptor, ImageConfig, ImageManifest, DOCKER_CONFIG, DOCKER_LAYER_GZIP, DOCKER_MANIFEST,
    OCI_CONFIG, OCI_LAYER_GZIP, OCI_LAYER_TAR, OCI_MANIFEST,
};
use spindebug_oci::{
    build_debug_image, fetch, resolve, ArtifactStore, BuildError, Digest, MemoryStore,
    RawManifest,
};

const SPIN_TOML: &str = "spin_manifest_version = 2\n\n[application]\nname = \"hello\"\n\n[[trigger.http]]\ncomponent = \"web\"\nroute = \"/\"\n\n[component.web]\nsource = \"app/web.wasm\"\n";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn tar_of(files: &[(&str, &[u8])], dirs: &[&str]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for dir in dirs {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_mode(0o755);
        header.set_size(0);
        builder.append_data(&mut header, dir, &[][..]).unwrap();
    }
    for (path, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(data.len() as u64);
        builder.append_data(&mut header, path, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

/// Push a two-layer image (gzip + plain tar) and return its reference.
fn seed_image(store: &MemoryStore, reference: &str, docker: bool, with_manifest: bool) -> ArtifactRef {
    let reference = ArtifactRef::parse(reference).unwrap();

    let mut first_files: Vec<(&str, &[u8])> = vec![("app/web.wasm", &b"\0asm\x01\0\0\0"[..])];
    if with_manifest {
        first_files.push(("spin.toml", SPIN_TOML.as_bytes()));
    }
    let first_tar = tar_of(&first_files, &["app"]);
    let first_blob = gzip(&first_tar);
    let second_tar = tar_of(&[("assets/index.html", &b"<h1>hi</h1>"[..])], &["assets"]);

    let (layer_gzip, layer_tar, config_type, manifest_type) = if docker {
        (DOCKER_LAYER_GZIP, DOCKER_LAYER_GZIP, DOCKER_CONFIG, DOCKER_MANIFEST)
    } else {
        (OCI_LAYER_GZIP, OCI_LAYER_TAR, OCI_CONFIG, OCI_MANIFEST)
    };
    // Docker v2 has no plain-tar type; compress the second layer there too.
    let second_blob = if docker { gzip(&second_tar) } else { second_tar.clone() };

    let config = serde_json::json!({
        "architecture": "wasm",
        "os": "wasip1",
        "rootfs": {
            "type": "layers",
            "diff_ids": [Digest::of(&first_tar), Digest::of(&second_tar)]
        },
        "history": [{"created_by": "spin registry push"}]
    });
    let config_bytes = serde_json::to_vec(&config).unwrap();

    for blob in [&first_blob, &second_blob, &config_bytes] {
        store.put_blob(&reference, &Digest::of(blob), blob).unwrap();
    }

    let manifest = ImageManifest {
        schema_version: 2,
        media_type: Some(manifest_type.to_string()),
        config: Descriptor::new(config_type, Digest::of(&config_bytes), config_bytes.len() as u64),
        layers: vec![
            Descriptor::new(layer_gzip, Digest::of(&first_blob), first_blob.len() as u64),
            Descriptor::new(layer_tar, Digest::of(&second_blob), second_blob.len() as u64),
        ],
        annotations: BTreeMap::new(),
        extra: Default::default(),
    };
    let raw = RawManifest {
        media_type: manifest_type.to_string(),
        body: serde_json::to_vec(&manifest).unwrap(),
    };
    store.put_manifest(&reference, &raw).unwrap();
    reference
}

fn debug_config() -> DebugConfig {
    DebugConfig {
        debug_repository: "registry.test/hello-debug".to_string(),
        debug_tag: "1h".to_string(),
        author: "dev@example.com".to_string(),
        ..DebugConfig::default()
    }
}

fn tree(root: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|entry| {
            let entry = entry.unwrap();
            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            let contents = entry
                .file_type()
                .is_file()
                .then(|| std::fs::read(entry.path()).unwrap());
            (rel, contents)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Round trip
// ---------------------------------------------------------------------------

#[test]
fn debug_image_differs_from_original_only_in_spin_toml() {
    let store = MemoryStore::new();
    let original = seed_image(&store, "registry.test/hello:v1", false, true);

    let built = build_debug_image(&store, &original, "web", &debug_config()).unwrap();
    assert!(built.rewritten);
    assert_eq!(built.original, original);
    assert_eq!(built.debug.registry(), "registry.test");
    assert!(built.debug.repository().starts_with("hello-debug-"));
    assert_eq!(built.debug.tag(), Some("1h"));

    let before = TempDir::new().expect("tempdir");
    let after = TempDir::new().expect("tempdir");
    fetch(&store, &original, before.path()).unwrap();
    let report = fetch(&store, &built.debug, after.path()).unwrap();
    assert_eq!(report.layers, 3);
    assert_eq!(report.manifest_digest, built.digest);

    let mut before_tree = tree(before.path());
    let mut after_tree = tree(after.path());
    let expected = spindebug_manifest::rewrite(SPIN_TOML, "web");
    assert_eq!(
        after_tree.remove("spin.toml").flatten().as_deref(),
        Some(expected.as_bytes())
    );
    assert!(before_tree.remove("spin.toml").is_some());
    assert_eq!(before_tree, after_tree);
}

#[test]
fn debug_image_config_records_layer_and_history() {
    let store = MemoryStore::new();
    let original = seed_image(&store, "registry.test/hello:v1", false, true);
    let built = build_debug_image(&store, &original, "web", &debug_config()).unwrap();

    let base = resolve(&store, &original).unwrap();
    let debug = resolve(&store, &built.debug).unwrap();
    assert_eq!(debug.media_type, OCI_MANIFEST);
    assert_eq!(&debug.manifest.layers[..2], &base.manifest.layers[..]);
    assert_eq!(debug.manifest.layers[2].media_type, OCI_LAYER_GZIP);

    let config_bytes = store
        .get_blob(&built.debug, &debug.manifest.config.digest)
        .unwrap();
    let config: ImageConfig = serde_json::from_slice(&config_bytes).unwrap();
    assert_eq!(config.rootfs.diff_ids.len(), 3);
    assert_eq!(config.extra["architecture"], "wasm");
    let last = config.history.last().unwrap();
    assert_eq!(last.author.as_deref(), Some("dev@example.com"));
    assert_eq!(last.created_by.as_deref(), Some("add updated spin.toml"));
    assert!(last.created.as_deref().is_some_and(|c| c.ends_with('Z')));

    // Both base layers plus the new layer and config live in the debug repo.
    assert_eq!(store.blob_count(&built.debug), 4);
}

#[test]
fn docker_manifests_get_docker_layer_type() {
    let store = MemoryStore::new();
    let original = seed_image(&store, "registry.test/hello:docker", true, true);
    let built = build_debug_image(&store, &original, "web", &debug_config()).unwrap();

    let debug = resolve(&store, &built.debug).unwrap();
    assert_eq!(debug.media_type, DOCKER_MANIFEST);
    assert_eq!(debug.manifest.layers[2].media_type, DOCKER_LAYER_GZIP);
}

#[test]
fn unknown_component_still_publishes_unchanged_manifest() {
    let store = MemoryStore::new();
    let original = seed_image(&store, "registry.test/hello:v1", false, true);
    let built = build_debug_image(&store, &original, "missing", &debug_config()).unwrap();
    assert!(!built.rewritten);

    let dir = TempDir::new().expect("tempdir");
    fetch(&store, &built.debug, dir.path()).unwrap();
    assert_eq!(
        std::fs::read_to_string(dir.path().join("spin.toml")).unwrap(),
        SPIN_TOML
    );
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[test]
fn artifact_without_spin_toml_is_config_not_found() {
    let store = MemoryStore::new();
    let original = seed_image(&store, "registry.test/hello:bare", false, false);
    let err = build_debug_image(&store, &original, "web", &debug_config()).unwrap_err();
    match err {
        BuildError::ConfigNotFound { reference, path } => {
            assert_eq!(reference, original);
            assert_eq!(path, "spin.toml");
        }
        other => panic!("expected ConfigNotFound, got {other}"),
    }
}

#[test]
fn unknown_reference_fails_at_resolve() {
    let store = MemoryStore::new();
    let original = ArtifactRef::parse("registry.test/nothing:v1").unwrap();
    let err = build_debug_image(&store, &original, "web", &debug_config()).unwrap_err();
    assert!(matches!(err, BuildError::Resolve { .. }));
}

#[test]
fn pinned_digest_mismatch_is_rejected() {
    let store = MemoryStore::new();
    let original = seed_image(&store, "registry.test/hello:v1", false, true);
    let resolved = resolve(&store, &original).unwrap();

    // Store the manifest under a digest key that does not match its bytes.
    let wrong = Digest::of(b"not the manifest");
    let raw = store.get_manifest(&original).unwrap();
    store
        .put_manifest(&original.with_digest(wrong.as_str()), &raw)
        .unwrap();
    let err = resolve(&store, &original.with_digest(wrong.as_str())).unwrap_err();
    assert!(matches!(err, spindebug_oci::OciError::DigestMismatch { .. }));

    // The honest digest still resolves.
    assert!(resolve(&store, &original.with_digest(resolved.digest.as_str())).is_ok());
}
