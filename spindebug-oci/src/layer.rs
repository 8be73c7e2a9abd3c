//! Layer blobs: extraction onto a directory and single-file synthesis.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{EntryType, Header};

use crate::digest::Digest;
use crate::error::{io_err, OciError};

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Mode of every synthesized file.
pub const SYNTHESIZED_FILE_MODE: u32 = 0o644;

// ---------------------------------------------------------------------------
// Synthesis
// ---------------------------------------------------------------------------

/// A gzip-compressed layer ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerBlob {
    pub compressed: Vec<u8>,
    /// Digest of the compressed bytes (the blob address).
    pub digest: Digest,
    /// Digest of the uncompressed tar (the config `diff_id`).
    pub diff_id: Digest,
}

impl LayerBlob {
    /// Compress a tar stream and compute both digests.
    pub fn from_tar(tar: &[u8]) -> Result<Self, OciError> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(tar)
            .map_err(|e| io_err("<layer gzip>", e))?;
        let compressed = encoder.finish().map_err(|e| io_err("<layer gzip>", e))?;
        Ok(Self {
            digest: Digest::of(&compressed),
            diff_id: Digest::of(tar),
            compressed,
        })
    }
}

/// A tar holding exactly one regular file at `at_path`.
///
/// Header fields are fixed (mode 0644, uid/gid 0, mtime 0) so identical
/// contents always produce an identical layer.
pub fn single_file_tar(at_path: &str, contents: &[u8]) -> Result<Vec<u8>, OciError> {
    let relative = sanitize(Path::new(at_path))?;
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_mode(SYNTHESIZED_FILE_MODE);
    header.set_size(contents.len() as u64);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    builder
        .append_data(&mut header, &relative, contents)
        .map_err(|e| io_err(&relative, e))?;
    builder.into_inner().map_err(|e| io_err(&relative, e))
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Counts from extracting one layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub files: usize,
    pub directories: usize,
    pub whiteouts: usize,
}

impl std::ops::AddAssign for ExtractStats {
    fn add_assign(&mut self, rhs: Self) {
        self.files += rhs.files;
        self.directories += rhs.directories;
        self.whiteouts += rhs.whiteouts;
    }
}

/// Whether a layer media type carries a tar stream this crate can unpack.
pub fn is_tar_layer(media_type: &str) -> bool {
    (media_type.contains(".tar") || media_type.contains("rootfs.diff"))
        && !media_type.ends_with("zstd")
}

/// Extract a layer blob over `dest`, later writes replacing earlier files.
pub fn extract(blob: &[u8], media_type: &str, dest: &Path) -> Result<ExtractStats, OciError> {
    if !is_tar_layer(media_type) {
        return Err(OciError::UnsupportedLayer(media_type.to_string()));
    }
    if media_type.ends_with("gzip") || blob.starts_with(&GZIP_MAGIC) {
        unpack(GzDecoder::new(blob), dest)
    } else {
        unpack(blob, dest)
    }
}

fn unpack<R: Read>(reader: R, dest: &Path) -> Result<ExtractStats, OciError> {
    let mut archive = tar::Archive::new(reader);
    let mut stats = ExtractStats::default();
    let entries = archive.entries().map_err(|e| io_err(dest, e))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| io_err(dest, e))?;
        let kind = entry.header().entry_type();
        let raw_path = entry.path().map_err(|e| io_err(dest, e))?.into_owned();
        let relative = sanitize(&raw_path)?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(&relative);

        match kind {
            EntryType::Directory => {
                fs::create_dir_all(&target).map_err(|e| io_err(&target, e))?;
                stats.directories += 1;
            }
            EntryType::Regular | EntryType::Continuous => {
                if apply_whiteout(&target)? {
                    stats.whiteouts += 1;
                    continue;
                }
                let mode = entry.header().mode().unwrap_or(SYNTHESIZED_FILE_MODE);
                write_file(&mut entry, &target, mode)?;
                stats.files += 1;
            }
            EntryType::XGlobalHeader => continue,
            other => {
                return Err(OciError::UnsupportedEntryKind {
                    path: raw_path.display().to_string(),
                    kind: format!("{other:?}"),
                });
            }
        }
    }
    Ok(stats)
}

/// Handle `.wh.<name>` and `.wh..wh..opq` markers; returns true if `target` was one.
fn apply_whiteout(target: &Path) -> Result<bool, OciError> {
    let Some(name) = target.file_name().and_then(|n| n.to_str()) else {
        return Ok(false);
    };
    let Some(parent) = target.parent() else {
        return Ok(false);
    };

    if name == OPAQUE_WHITEOUT {
        if parent.is_dir() {
            for child in fs::read_dir(parent).map_err(|e| io_err(parent, e))? {
                let child = child.map_err(|e| io_err(parent, e))?.path();
                remove_path(&child)?;
            }
        }
        return Ok(true);
    }
    if let Some(hidden) = name.strip_prefix(WHITEOUT_PREFIX) {
        remove_path(&parent.join(hidden))?;
        return Ok(true);
    }
    Ok(false)
}

fn remove_path(path: &Path) -> Result<(), OciError> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    };
    result.map_err(|e| io_err(path, e))
}

fn write_file<R: Read>(reader: &mut R, target: &Path, mode: u32) -> Result<(), OciError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    // An earlier layer may have left a read-only file or a directory here.
    remove_path(target)?;
    let mut file = fs::File::create(target).map_err(|e| io_err(target, e))?;
    io::copy(reader, &mut file).map_err(|e| io_err(target, e))?;
    set_file_mode(target, mode)
}

/// Normalise an archive path, rejecting anything that escapes the root.
fn sanitize(path: &Path) -> Result<PathBuf, OciError> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                // Leading '/' is common in hand-built layers; anything else escapes.
                if matches!(component, Component::RootDir) && clean.as_os_str().is_empty() {
                    continue;
                }
                return Err(OciError::UnsafeEntryPath(path.display().to_string()));
            }
        }
    }
    Ok(clean)
}

#[cfg(unix)]
fn set_file_mode(path: &Path, mode: u32) -> Result<(), OciError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path, _mode: u32) -> Result<(), OciError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tar_with(entries: &[(&str, EntryType, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, kind, data) in entries {
            let mut header = Header::new_gnu();
            header.set_entry_type(*kind);
            header.set_mode(if *kind == EntryType::Directory { 0o755 } else { 0o600 });
            header.set_size(data.len() as u64);
            if *kind == EntryType::Symlink {
                header.set_link_name("spin.toml").unwrap();
            }
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn single_file_layer_is_deterministic() {
        let a = LayerBlob::from_tar(&single_file_tar("spin.toml", b"x = 1\n").unwrap()).unwrap();
        let b = LayerBlob::from_tar(&single_file_tar("/spin.toml", b"x = 1\n").unwrap()).unwrap();
        assert_eq!(a.diff_id, b.diff_id);
        assert_ne!(a.digest, a.diff_id);
    }

    #[test]
    fn single_file_layer_extracts_with_fixed_mode() {
        let dest = TempDir::new().expect("tempdir");
        let layer = LayerBlob::from_tar(&single_file_tar("spin.toml", b"x = 1\n").unwrap()).unwrap();
        let stats = extract(&layer.compressed, crate::manifest::OCI_LAYER_GZIP, dest.path()).unwrap();
        assert_eq!(stats.files, 1);
        assert_eq!(stats.directories, 0);
        let written = dest.path().join("spin.toml");
        assert_eq!(fs::read(&written).unwrap(), b"x = 1\n");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&written).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o644);
        }
    }

    #[test]
    fn uncompressed_tar_layers_extract() {
        let dest = TempDir::new().expect("tempdir");
        let tar = tar_with(&[
            ("app", EntryType::Directory, &b""[..]),
            ("app/main.wasm", EntryType::Regular, &b"\0asm"[..]),
        ]);
        let stats = extract(&tar, crate::manifest::OCI_LAYER_TAR, dest.path()).unwrap();
        assert_eq!(stats.directories, 1);
        assert_eq!(fs::read(dest.path().join("app/main.wasm")).unwrap(), b"\0asm");
    }

    #[test]
    fn later_layer_overwrites_read_only_file() {
        let dest = TempDir::new().expect("tempdir");
        let first = tar_with(&[("spin.toml", EntryType::Regular, &b"old"[..])]);
        extract(&first, crate::manifest::OCI_LAYER_TAR, dest.path()).unwrap();
        #[cfg(unix)]
        set_file_mode(&dest.path().join("spin.toml"), 0o444).unwrap();

        let second = tar_with(&[("spin.toml", EntryType::Regular, &b"new"[..])]);
        extract(&second, crate::manifest::OCI_LAYER_TAR, dest.path()).unwrap();
        assert_eq!(fs::read(dest.path().join("spin.toml")).unwrap(), b"new");
    }

    #[test]
    fn symlinks_are_unsupported() {
        let dest = TempDir::new().expect("tempdir");
        let tar = tar_with(&[("link.toml", EntryType::Symlink, &b""[..])]);
        let err = extract(&tar, crate::manifest::OCI_LAYER_TAR, dest.path()).unwrap_err();
        assert!(matches!(err, OciError::UnsupportedEntryKind { .. }));
    }

    #[test]
    fn whiteouts_remove_earlier_paths() {
        let dest = TempDir::new().expect("tempdir");
        let base = tar_with(&[
            ("keep.txt", EntryType::Regular, &b"k"[..]),
            ("gone.txt", EntryType::Regular, &b"g"[..]),
            ("assets/a.css", EntryType::Regular, &b"a"[..]),
        ]);
        extract(&base, crate::manifest::OCI_LAYER_TAR, dest.path()).unwrap();

        let upper = tar_with(&[
            (".wh.gone.txt", EntryType::Regular, &b""[..]),
            ("assets/.wh..wh..opq", EntryType::Regular, &b""[..]),
        ]);
        let stats = extract(&upper, crate::manifest::OCI_LAYER_TAR, dest.path()).unwrap();
        assert_eq!(stats.whiteouts, 2);
        assert!(dest.path().join("keep.txt").exists());
        assert!(!dest.path().join("gone.txt").exists());
        assert!(dest.path().join("assets").is_dir());
        assert!(!dest.path().join("assets/a.css").exists());
    }

    #[test]
    fn parent_dir_paths_are_rejected() {
        assert!(matches!(
            sanitize(Path::new("../etc/passwd")),
            Err(OciError::UnsafeEntryPath(_))
        ));
        assert!(matches!(
            sanitize(Path::new("a/../../b")),
            Err(OciError::UnsafeEntryPath(_))
        ));
        assert_eq!(sanitize(Path::new("./a/b")).unwrap(), PathBuf::from("a/b"));
    }

    #[test]
    fn wasm_layers_are_not_tar() {
        let dest = TempDir::new().expect("tempdir");
        let err = extract(b"\0asm", "application/vnd.wasm.content.layer.v1+wasm", dest.path())
            .unwrap_err();
        assert!(matches!(err, OciError::UnsupportedLayer(_)));
    }

    #[test]
    fn zstd_layers_are_rejected() {
        assert!(is_tar_layer(crate::manifest::DOCKER_LAYER_GZIP));
        assert!(!is_tar_layer("application/vnd.oci.image.layer.v1.tar+zstd"));
    }
}
