//! Kernel release download: manifest → asset → archive → installed binary.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use boxpilot_core::{paths, HostTarget};

use crate::error::{io_err, ReleaseError};

/// GitHub "latest release" payload, reduced to what installation needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseManifest {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

/// A downloadable asset from a GitHub release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

impl ReleaseManifest {
    /// First asset whose name ends with `suffix` (e.g. `linux-amd64.zip`).
    pub fn select_asset(&self, suffix: &str) -> Option<&ReleaseAsset> {
        self.assets.iter().find(|asset| asset.name.ends_with(suffix))
    }
}

/// Where a release ended up.
#[derive(Debug, Clone, Serialize)]
pub struct InstalledKernel {
    pub tag: String,
    pub asset: String,
    pub path: PathBuf,
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Extracts a downloaded archive into a directory.
pub trait Unpacker: Send + Sync {
    fn unpack(&self, archive: &Path, dest: &Path) -> Result<(), ReleaseError>;
}

/// In-process zip extraction. Entries that would escape `dest` are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipUnpacker;

impl Unpacker for ZipUnpacker {
    fn unpack(&self, archive: &Path, dest: &Path) -> Result<(), ReleaseError> {
        let unpack_err = |e: zip::result::ZipError| ReleaseError::Unpack {
            archive: archive.to_path_buf(),
            detail: e.to_string(),
        };

        std::fs::create_dir_all(dest).map_err(|e| io_err(dest, e))?;
        let file = std::fs::File::open(archive).map_err(|e| io_err(archive, e))?;
        let mut zip = zip::ZipArchive::new(file).map_err(unpack_err)?;
        debug!(entries = zip.len(), archive = %archive.display(), "extracting release");
        zip.extract(dest).map_err(unpack_err)
    }
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

pub async fn fetch_manifest(
    http: &reqwest::Client,
    url: &str,
) -> Result<ReleaseManifest, ReleaseError> {
    let http_err = |source| ReleaseError::Http {
        url: url.to_string(),
        source,
    };

    debug!(url, "fetching release manifest");
    let mut request = http
        .get(url)
        .header("Accept", "application/vnd.github+json");
    // Higher rate limits when a token is available.
    if let Ok(token) = std::env::var("GITHUB_TOKEN") {
        request = request.bearer_auth(token);
    }

    let response = request.send().await.map_err(http_err)?;
    let status = response.status();
    if !status.is_success() {
        return Err(ReleaseError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    let body = response.bytes().await.map_err(http_err)?;
    serde_json::from_slice(&body).map_err(|source| ReleaseError::Manifest {
        url: url.to_string(),
        source,
    })
}

/// Stream `url` into `dest`. Returns the number of bytes written.
pub async fn download(
    http: &reqwest::Client,
    url: &str,
    dest: &Path,
) -> Result<u64, ReleaseError> {
    let http_err = |source| ReleaseError::Http {
        url: url.to_string(),
        source,
    };

    let response = http.get(url).send().await.map_err(http_err)?;
    let status = response.status();
    if !status.is_success() {
        return Err(ReleaseError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| io_err(dest, e))?;
    let mut body = Box::pin(response.bytes_stream());
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(http_err)?;
        file.write_all(&chunk).await.map_err(|e| io_err(dest, e))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| io_err(dest, e))?;
    Ok(written)
}

// ---------------------------------------------------------------------------
// Install
// ---------------------------------------------------------------------------

/// Depth-first search for a file called `binary` under `dir`.
pub fn find_binary(dir: &Path, binary: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut subdirs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            subdirs.push(path);
        } else if path.file_name().and_then(|n| n.to_str()) == Some(binary) {
            return Some(path);
        }
    }
    subdirs.sort();
    subdirs.into_iter().find_map(|sub| find_binary(&sub, binary))
}

/// Copy `source` to `dest` through a temporary file and mark it executable.
pub fn install_binary(source: &Path, dest: &Path) -> Result<(), ReleaseError> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let tmp = dest.with_extension("tmp");
    std::fs::copy(source, &tmp).map_err(|e| io_err(&tmp, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o755))
            .map_err(|e| io_err(&tmp, e))?;
    }

    if let Err(e) = std::fs::rename(&tmp, dest) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(dest, e));
    }
    Ok(())
}

/// Fetch the manifest at `api`, download the asset for `target`, extract it
/// and install the kernel binary under `home`.
pub async fn install_latest(
    http: &reqwest::Client,
    api: &str,
    target: &HostTarget,
    home: &Path,
    unpacker: Arc<dyn Unpacker>,
) -> Result<InstalledKernel, ReleaseError> {
    let manifest = fetch_manifest(http, api).await?;
    let suffix = target.asset_suffix();
    let asset = manifest
        .select_asset(&suffix)
        .ok_or_else(|| ReleaseError::NoAsset {
            tag: manifest.tag_name.clone(),
            suffix: suffix.clone(),
        })?;

    let downloads = paths::downloads_dir(home);
    std::fs::create_dir_all(&downloads).map_err(|e| io_err(&downloads, e))?;
    let archive = downloads.join(&asset.name);
    info!(tag = %manifest.tag_name, asset = %asset.name, "downloading kernel release");
    let bytes = download(http, &asset.browser_download_url, &archive).await?;
    debug!(bytes, archive = %archive.display(), "release archive downloaded");

    let extracted = downloads.join("extracted");
    if extracted.exists() {
        std::fs::remove_dir_all(&extracted).map_err(|e| io_err(&extracted, e))?;
    }
    {
        let (from, into) = (archive.clone(), extracted.clone());
        tokio::task::spawn_blocking(move || unpacker.unpack(&from, &into))
            .await
            .map_err(|e| ReleaseError::Unpack {
                archive: archive.clone(),
                detail: e.to_string(),
            })??;
    }

    let binary = find_binary(&extracted, paths::KERNEL_BINARY).ok_or_else(|| {
        ReleaseError::BinaryMissing {
            binary: paths::KERNEL_BINARY.to_string(),
            dir: extracted.clone(),
        }
    })?;
    let dest = paths::kernel_binary(home);
    install_binary(&binary, &dest)?;
    info!(tag = %manifest.tag_name, path = %dest.display(), "kernel installed");

    if let Err(err) = std::fs::remove_dir_all(&downloads) {
        warn!(error = %err, dir = %downloads.display(), "failed to clean up downloads");
    }

    Ok(InstalledKernel {
        tag: manifest.tag_name.clone(),
        asset: asset.name.clone(),
        path: dest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manifest() -> ReleaseManifest {
        serde_json::from_str(
            r#"{
                "tag_name": "v1.9.3",
                "assets": [
                    {"name": "sing-box-1.9.3-linux-amd64.tar.gz", "browser_download_url": "https://x/a"},
                    {"name": "sing-box-1.9.3-linux-amd64.zip", "browser_download_url": "https://x/b"},
                    {"name": "sing-box-1.9.3-darwin-arm64.zip", "browser_download_url": "https://x/c"}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn asset_is_selected_by_platform_suffix() {
        let manifest = manifest();
        let linux = HostTarget::from_rust("linux", "x86_64");
        let mac = HostTarget::from_rust("macos", "aarch64");

        assert_eq!(
            manifest.select_asset(&linux.asset_suffix()).map(|a| a.browser_download_url.as_str()),
            Some("https://x/b")
        );
        assert_eq!(
            manifest.select_asset(&mac.asset_suffix()).map(|a| a.name.as_str()),
            Some("sing-box-1.9.3-darwin-arm64.zip")
        );
        assert!(manifest.select_asset("windows-386.zip").is_none());
    }

    #[test]
    fn binary_is_found_inside_release_folder() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("sing-box-1.9.3-linux-amd64");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("LICENSE"), b"").unwrap();
        std::fs::write(nested.join(paths::KERNEL_BINARY), b"#!/bin/sh\n").unwrap();

        assert_eq!(
            find_binary(dir.path(), paths::KERNEL_BINARY),
            Some(nested.join(paths::KERNEL_BINARY))
        );
        assert!(find_binary(dir.path(), "missing").is_none());
    }

    fn release_zip(path: &Path) {
        use std::io::Write;

        let mut zip = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
        let options = zip::write::SimpleFileOptions::default();
        zip.add_directory("sing-box-1.9.3-linux-amd64/", options).unwrap();
        zip.start_file("sing-box-1.9.3-linux-amd64/LICENSE", options).unwrap();
        zip.write_all(b"GPL").unwrap();
        zip.start_file("sing-box-1.9.3-linux-amd64/sing-box", options).unwrap();
        zip.write_all(b"#!/bin/sh\necho sing-box\n").unwrap();
        zip.finish().unwrap();
    }

    #[test]
    fn zip_release_is_extracted_in_process() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("sing-box-1.9.3-linux-amd64.zip");
        release_zip(&archive);
        let dest = dir.path().join("extracted");

        ZipUnpacker.unpack(&archive, &dest).unwrap();

        let binary = find_binary(&dest, paths::KERNEL_BINARY).expect("binary extracted");
        assert_eq!(binary, dest.join("sing-box-1.9.3-linux-amd64").join("sing-box"));
        assert_eq!(std::fs::read(&binary).unwrap(), b"#!/bin/sh\necho sing-box\n");
    }

    #[test]
    fn corrupt_archive_is_an_unpack_error() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("broken.zip");
        std::fs::write(&archive, b"definitely not a zip").unwrap();

        let err = ZipUnpacker
            .unpack(&archive, &dir.path().join("out"))
            .unwrap_err();
        assert!(matches!(err, ReleaseError::Unpack { .. }), "got: {err}");
    }

    #[cfg(unix)]
    #[test]
    fn installed_binary_is_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let source = dir.path().join("sing-box");
        std::fs::write(&source, b"#!/bin/sh\n").unwrap();
        let dest = dir.path().join("kernel").join("sing-box");

        install_binary(&source, &dest).unwrap();
        let mode = std::fs::metadata(&dest).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
