use rstest::rstest;
use spindebug_core::{ArtifactRef, ReferenceError};

// ---------------------------------------------------------------------------
// Canonical rendering
// ---------------------------------------------------------------------------

#[rstest]
#[case("ghcr.io/spinkube/containerd-shim-spin/examples/spin-rust-hello:v0.13.0", "ghcr.io", "spinkube/containerd-shim-spin/examples/spin-rust-hello", Some("v0.13.0"))]
#[case("ttl.sh/spin-debug-1721062385:24h", "ttl.sh", "spin-debug-1721062385", Some("24h"))]
#[case("127.0.0.1:5000/apps/hello", "127.0.0.1:5000", "apps/hello", Some("latest"))]
#[case("busybox:1.36", "index.docker.io", "library/busybox", Some("1.36"))]
fn parses_registry_repository_and_tag(
    #[case] input: &str,
    #[case] registry: &str,
    #[case] repository: &str,
    #[case] tag: Option<&str>,
) {
    let r = ArtifactRef::parse(input).expect("parse");
    assert_eq!(r.registry(), registry);
    assert_eq!(r.repository(), repository);
    assert_eq!(r.tag(), tag);
}

#[rstest]
#[case("ghcr.io/spinkube/hello:v1")]
#[case("localhost:5000/hello:dev")]
#[case("ttl.sh/hello:1h@sha256:0000000000000000000000000000000000000000000000000000000000000000")]
fn canonical_form_reparses_identically(#[case] input: &str) {
    let first = ArtifactRef::parse(input).expect("parse");
    let second: ArtifactRef = first.to_string().parse().expect("reparse");
    assert_eq!(first, second);
}

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

#[rstest]
#[case("")]
#[case("ghcr.io/")]
#[case("ghcr.io/app:")]
#[case("ghcr.io/app@md5:abcd")]
fn malformed_references_fail(#[case] input: &str) {
    let err = ArtifactRef::parse(input).unwrap_err();
    assert!(
        matches!(
            err,
            ReferenceError::Empty
                | ReferenceError::InvalidRepository { .. }
                | ReferenceError::InvalidTag { .. }
                | ReferenceError::InvalidDigest { .. }
        ),
        "unexpected error: {err:?}"
    );
}

#[test]
fn serde_uses_string_form() {
    let r = ArtifactRef::parse("ghcr.io/spinkube/hello:v1").unwrap();
    let yaml = serde_yaml::to_string(&r).unwrap();
    assert_eq!(yaml.trim(), "ghcr.io/spinkube/hello:v1");
    let back: ArtifactRef = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(back, r);
}
