//! Archive detection, extraction and compression.
//!
//! The pipeline deals with three containers: ZIP payloads uploaded by users,
//! 7z AIPs produced by the archival processing service, and TAR(.GZ) AIPs
//! when the service is configured for tar output. Detection is by magic
//! bytes, never by file extension. Every extraction path enforces that
//! entries stay inside the destination directory.

mod error;

pub use error::ArchiveError;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use tokio_util::sync::CancellationToken;

/// Container formats the codec understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    SevenZ,
    Tar,
    TarGz,
    Unknown,
}

const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
const SEVENZ_MAGIC: [u8; 6] = [0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];
const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
const TAR_MAGIC_OFFSET: u64 = 257;

/// Detects the archive format of `path` by reading its signature.
///
/// Returns `ArchiveFormat::Unknown` for readable files that match no known
/// signature; I/O failures are surfaced as errors.
pub fn detect(path: &Path) -> Result<ArchiveFormat, ArchiveError> {
    let mut file = File::open(path)?;

    let mut header = [0u8; 6];
    let n = file.read(&mut header)?;

    if n >= 4 && header[..4] == ZIP_MAGIC {
        return Ok(ArchiveFormat::Zip);
    }
    if n >= 6 && header == SEVENZ_MAGIC {
        return Ok(ArchiveFormat::SevenZ);
    }
    if n >= 2 && header[..2] == GZIP_MAGIC {
        return Ok(ArchiveFormat::TarGz);
    }

    // POSIX tar carries "ustar" at offset 257.
    if file.seek(SeekFrom::Start(TAR_MAGIC_OFFSET)).is_ok() {
        let mut magic = [0u8; 5];
        if file.read(&mut magic)? == 5 && &magic == b"ustar" {
            return Ok(ArchiveFormat::Tar);
        }
    }

    Ok(ArchiveFormat::Unknown)
}

/// Extracts the archive at `src` into `dest`, dispatching on the detected
/// format, and returns the path the package root is expected at
/// (`dest/<src stem>`).
///
/// Runs on the blocking pool; the token is checked between entries.
pub async fn extract(
    token: &CancellationToken,
    src: &Path,
    dest: &Path,
) -> Result<PathBuf, ArchiveError> {
    let token = token.clone();
    let src = src.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || extract_blocking(&token, &src, &dest))
        .await
        .map_err(|e| ArchiveError::Io(std::io::Error::other(e)))?
}

/// Compresses the contents of `src_dir` into a ZIP archive at `dest_zip`.
///
/// Relative paths are preserved, directories get a trailing `/` entry and
/// files are deflated. Runs on the blocking pool; the token is checked
/// between entries.
pub async fn compress_zip(
    token: &CancellationToken,
    src_dir: &Path,
    dest_zip: &Path,
) -> Result<(), ArchiveError> {
    let token = token.clone();
    let src_dir = src_dir.to_path_buf();
    let dest_zip = dest_zip.to_path_buf();
    tokio::task::spawn_blocking(move || compress_zip_blocking(&token, &src_dir, &dest_zip))
        .await
        .map_err(|e| ArchiveError::Io(std::io::Error::other(e)))?
}

/// Strips the last extension from the file name, mirroring how package roots
/// are derived from payload names (`pkg.zip` -> `pkg`, `x-u1.7z` -> `x-u1`).
pub fn package_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn extract_blocking(
    token: &CancellationToken,
    src: &Path,
    dest: &Path,
) -> Result<PathBuf, ArchiveError> {
    std::fs::create_dir_all(dest)?;
    match detect(src)? {
        ArchiveFormat::Zip => extract_zip(token, src, dest)?,
        ArchiveFormat::SevenZ => extract_7z(token, src, dest)?,
        ArchiveFormat::Tar | ArchiveFormat::TarGz => extract_tar(token, src, dest)?,
        ArchiveFormat::Unknown => {
            return Err(ArchiveError::Unsupported {
                path: src.to_path_buf(),
            })
        }
    }
    Ok(dest.join(package_stem(src)))
}

/// Joins an entry name onto `dest` after lexically resolving it, refusing
/// anything that would land outside `dest`.
fn secured_join(dest: &Path, entry: &str) -> Result<PathBuf, ArchiveError> {
    let mut rel = PathBuf::new();
    for component in Path::new(entry).components() {
        match component {
            Component::Normal(c) => rel.push(c),
            Component::CurDir => {}
            Component::ParentDir => {
                if !rel.pop() {
                    return Err(ArchiveError::PathTraversal {
                        entry: entry.to_string(),
                    });
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ArchiveError::PathTraversal {
                    entry: entry.to_string(),
                })
            }
        }
    }
    Ok(dest.join(rel))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

fn extract_zip(token: &CancellationToken, src: &Path, dest: &Path) -> Result<(), ArchiveError> {
    let file = File::open(src)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| ArchiveError::malformed(src, e))?;

    for index in 0..archive.len() {
        if token.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }
        let mut entry = archive
            .by_index(index)
            .map_err(|e| ArchiveError::malformed(src, e))?;
        let out_path = secured_join(dest, entry.name())?;

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            if let Some(mode) = entry.unix_mode() {
                set_mode(&out_path, mode)?;
            }
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out)?;
        if let Some(mode) = entry.unix_mode() {
            set_mode(&out_path, mode)?;
        }
    }
    Ok(())
}

fn extract_7z(token: &CancellationToken, src: &Path, dest: &Path) -> Result<(), ArchiveError> {
    let mut reader = sevenz_rust::SevenZReader::open(src, sevenz_rust::Password::empty())
        .map_err(|e| ArchiveError::malformed(src, e))?;

    // Failures raised inside the entry closure are stashed here so they
    // survive the foreign error type of `for_each_entries`.
    let mut failure: Option<ArchiveError> = None;
    let walked = reader.for_each_entries(|entry, entry_reader| {
        if token.is_cancelled() {
            failure = Some(ArchiveError::Cancelled);
            return Ok(false);
        }
        let out_path = match secured_join(dest, entry.name()) {
            Ok(p) => p,
            Err(e) => {
                failure = Some(e);
                return Ok(false);
            }
        };
        let written: std::io::Result<()> = (|| {
            if entry.is_directory() {
                std::fs::create_dir_all(&out_path)?;
                return Ok(());
            }
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&out_path)?;
            std::io::copy(entry_reader, &mut out)?;
            Ok(())
        })();
        if let Err(e) = written {
            failure = Some(ArchiveError::Io(e));
            return Ok(false);
        }
        Ok(true)
    });

    if let Some(e) = failure {
        return Err(e);
    }
    walked.map_err(|e| ArchiveError::malformed(src, e))?;
    Ok(())
}

fn extract_tar(token: &CancellationToken, src: &Path, dest: &Path) -> Result<(), ArchiveError> {
    let file = File::open(src)?;
    let reader: Box<dyn Read> = match detect(src)? {
        ArchiveFormat::TarGz => Box::new(flate2::read::GzDecoder::new(file)),
        _ => Box::new(file),
    };
    let mut archive = tar::Archive::new(reader);

    for entry in archive.entries()? {
        if token.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }
        let mut entry = entry.map_err(|e| ArchiveError::malformed(src, e))?;
        let name = entry.path()?.to_string_lossy().into_owned();
        let out_path = secured_join(dest, &name)?;

        if entry.header().entry_type().is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // unpack writes the file with its recorded mode.
        entry.unpack(&out_path)?;
    }
    Ok(())
}

fn compress_zip_blocking(
    token: &CancellationToken,
    src_dir: &Path,
    dest_zip: &Path,
) -> Result<(), ArchiveError> {
    use zip::write::FileOptions;

    let out = File::create(dest_zip)?;
    let mut writer = zip::ZipWriter::new(out);

    for entry in walkdir::WalkDir::new(src_dir) {
        if token.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }
        let entry = entry.map_err(|e| ArchiveError::Io(std::io::Error::other(e)))?;
        let rel = entry
            .path()
            .strip_prefix(src_dir)
            .map_err(|e| ArchiveError::Io(std::io::Error::other(e)))?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let name = rel.to_string_lossy().into_owned();

        let metadata = entry.metadata().map_err(|e| ArchiveError::Io(std::io::Error::other(e)))?;
        let mut options: FileOptions = FileOptions::default();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            options = options.unix_permissions(metadata.permissions().mode());
        }

        if entry.file_type().is_dir() {
            writer
                .add_directory(format!("{name}/"), options)
                .map_err(|e| ArchiveError::malformed(dest_zip, e))?;
        } else {
            writer
                .start_file(&name, options.compression_method(zip::CompressionMethod::Deflated))
                .map_err(|e| ArchiveError::malformed(dest_zip, e))?;
            let mut file = File::open(entry.path())?;
            std::io::copy(&mut file, &mut writer)?;
        }
    }

    writer
        .finish()
        .map_err(|e| ArchiveError::malformed(dest_zip, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(path: &Path, contents: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn detect_by_magic_bytes() {
        let dir = tempfile::tempdir().unwrap();

        let zip = dir.path().join("a.bin");
        write_file(&zip, &[0x50, 0x4B, 0x03, 0x04, 0x00, 0x00]);
        assert_eq!(detect(&zip).unwrap(), ArchiveFormat::Zip);

        let sevenz = dir.path().join("b.bin");
        write_file(&sevenz, &[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C]);
        assert_eq!(detect(&sevenz).unwrap(), ArchiveFormat::SevenZ);

        let gz = dir.path().join("c.bin");
        write_file(&gz, &[0x1F, 0x8B, 0x08]);
        assert_eq!(detect(&gz).unwrap(), ArchiveFormat::TarGz);

        let tar = dir.path().join("d.bin");
        let mut contents = vec![0u8; 262];
        contents[257..262].copy_from_slice(b"ustar");
        write_file(&tar, &contents);
        assert_eq!(detect(&tar).unwrap(), ArchiveFormat::Tar);

        let other = dir.path().join("e.bin");
        write_file(&other, b"plain text");
        assert_eq!(detect(&other).unwrap(), ArchiveFormat::Unknown);
    }

    #[tokio::test]
    async fn zip_round_trip_preserves_tree() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("pkg");
        write_file(&src.join("a.txt"), b"hi");
        write_file(&src.join("sub/b.bin"), &[0u8, 1, 2, 3]);
        std::fs::create_dir_all(src.join("empty")).unwrap();
        #[cfg(unix)]
        set_mode(&src.join("a.txt"), 0o755).unwrap();

        let token = CancellationToken::new();
        let zip_path = dir.path().join("pkg.zip");
        compress_zip(&token, &src, &zip_path).await.unwrap();

        let dest = dir.path().join("out");
        let root = extract(&token, &zip_path, &dest).await.unwrap();
        assert_eq!(root, dest.join("pkg"));

        assert_eq!(std::fs::read(dest.join("a.txt")).unwrap(), b"hi");
        assert_eq!(std::fs::read(dest.join("sub/b.bin")).unwrap(), [0, 1, 2, 3]);
        assert!(dest.join("empty").is_dir());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dest.join("a.txt")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[tokio::test]
    async fn zip_slip_entry_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("evil.zip");
        {
            let file = File::create(&zip_path).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            writer
                .start_file("../evil", zip::write::FileOptions::default())
                .unwrap();
            writer.write_all(b"gotcha").unwrap();
            writer.finish().unwrap();
        }

        let dest = dir.path().join("out");
        let token = CancellationToken::new();
        let err = extract(&token, &zip_path, &dest).await.unwrap_err();
        assert!(matches!(err, ArchiveError::PathTraversal { .. }), "got {err:?}");
        assert!(!dir.path().join("evil").exists());
    }

    #[tokio::test]
    async fn tar_gz_extracts() {
        let dir = tempfile::tempdir().unwrap();
        let tar_path = dir.path().join("pkg.tar.gz");
        {
            let file = File::create(&tar_path).unwrap();
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(encoder);
            let payload = b"tar contents";
            let mut header = tar::Header::new_gnu();
            header.set_size(payload.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, "pkg/f.txt", &payload[..]).unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let dest = dir.path().join("out");
        let token = CancellationToken::new();
        extract(&token, &tar_path, &dest).await.unwrap();
        assert_eq!(std::fs::read(dest.join("pkg/f.txt")).unwrap(), b"tar contents");
    }

    #[tokio::test]
    async fn tar_traversal_entry_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tar_path = dir.path().join("evil.tar");
        {
            let file = File::create(&tar_path).unwrap();
            let mut builder = tar::Builder::new(file);
            let payload = b"x";
            let mut header = tar::Header::new_gnu();
            header.set_size(payload.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            let name = b"ok/../../evil";
            header.as_gnu_mut().unwrap().name[..name.len()].copy_from_slice(name);
            header.set_cksum();
            builder.append(&header, &payload[..]).unwrap();
            builder.finish().unwrap();
        }

        let dest = dir.path().join("out");
        let token = CancellationToken::new();
        let err = extract(&token, &tar_path, &dest).await.unwrap_err();
        assert!(matches!(err, ArchiveError::PathTraversal { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn unknown_format_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("notes.txt");
        write_file(&src, b"not an archive");

        let token = CancellationToken::new();
        let err = extract(&token, &src, &dir.path().join("out")).await.unwrap_err();
        assert!(matches!(err, ArchiveError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn cancelled_token_aborts_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("pkg");
        write_file(&src.join("a.txt"), b"hi");
        let zip_path = dir.path().join("pkg.zip");
        let token = CancellationToken::new();
        compress_zip(&token, &src, &zip_path).await.unwrap();

        token.cancel();
        let err = extract(&token, &zip_path, &dir.path().join("out")).await.unwrap_err();
        assert!(matches!(err, ArchiveError::Cancelled));
    }

    #[test]
    fn package_stem_strips_one_extension() {
        assert_eq!(package_stem(Path::new("/tmp/pkg.zip")), "pkg");
        assert_eq!(package_stem(Path::new("/tmp/pkg-u1.7z")), "pkg-u1");
        assert_eq!(package_stem(Path::new("/tmp/pkg.tar.gz")), "pkg.tar");
        assert_eq!(package_stem(Path::new("/tmp/plain")), "plain");
    }
}
