//! Finding a Chrome binary for the crawl, installing Chrome for Testing if needed.
//!
//! Lookup order: the `CHROME` environment variable, well-known commands on
//! `PATH`, well-known install paths, then a previous download under the cache
//! directory (`~/.doctor-directory/chromium/<version>/`). When all of those
//! come up empty the current stable Chrome for Testing build is downloaded.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{DirectoryError, Result};

const VERSIONS_URL: &str =
    "https://googlechromelabs.github.io/chrome-for-testing/last-known-good-versions-with-downloads.json";

#[cfg(target_os = "macos")]
const KNOWN_PATHS: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];

#[cfg(not(target_os = "macos"))]
const KNOWN_PATHS: &[&str] = &[
    "/opt/google/chrome/chrome",
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
];

const KNOWN_COMMANDS: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
];

#[derive(Debug, Deserialize)]
struct KnownGoodVersions {
    channels: Channels,
}

#[derive(Debug, Deserialize)]
struct Channels {
    #[serde(rename = "Stable")]
    stable: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    version: String,
    downloads: Downloads,
}

#[derive(Debug, Deserialize)]
struct Downloads {
    #[serde(default)]
    chrome: Vec<Download>,
}

#[derive(Debug, Deserialize)]
struct Download {
    platform: String,
    url: String,
}

/// Resolves a usable Chrome executable.
#[derive(Debug, Clone)]
pub struct ChromeLocator {
    cache_dir: PathBuf,
}

impl ChromeLocator {
    /// Locator caching downloads under `~/.doctor-directory/chromium`.
    pub fn new() -> Result<Self> {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .ok_or_else(|| DirectoryError::Browser("Cannot determine home directory".to_string()))?;
        Ok(Self::with_cache_dir(home.join(".doctor-directory").join("chromium")))
    }

    /// Locator caching downloads under `dir`.
    pub fn with_cache_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: dir.into(),
        }
    }

    /// Directory holding downloaded Chrome versions.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns a Chrome executable, downloading one as a last resort.
    pub async fn ensure(&self) -> Result<PathBuf> {
        if let Some(path) = detect_system_chrome() {
            info!("Using system Chrome: {}", path.display());
            return Ok(path);
        }
        if let Some(path) = self.cached()? {
            info!("Using cached Chrome: {}", path.display());
            return Ok(path);
        }
        info!("No Chrome installation found, downloading Chrome for Testing");
        self.install().await
    }

    /// The newest previously downloaded Chrome, if any.
    pub fn cached(&self) -> Result<Option<PathBuf>> {
        if !self.cache_dir.is_dir() {
            return Ok(None);
        }
        let platform = platform_id()?;

        let mut versions: Vec<PathBuf> = fs::read_dir(&self.cache_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_dir())
            .collect();
        versions.sort_by_key(|dir| std::cmp::Reverse(version_key(dir)));

        Ok(versions
            .into_iter()
            .map(|dir| dir.join(executable_in_archive(platform)))
            .find(|exe| exe.exists()))
    }

    /// Downloads the stable Chrome for Testing build into the cache.
    pub async fn install(&self) -> Result<PathBuf> {
        let platform = platform_id()?;
        let client = reqwest::Client::new();

        let versions: KnownGoodVersions = client
            .get(VERSIONS_URL)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let stable = versions.channels.stable;
        let url = stable
            .downloads
            .chrome
            .iter()
            .find(|d| d.platform == platform)
            .map(|d| d.url.clone())
            .ok_or_else(|| {
                DirectoryError::Browser(format!("No Chrome download for platform '{}'", platform))
            })?;

        info!("Downloading Chrome for Testing {} ({})", stable.version, platform);
        let archive = client.get(&url).send().await?.error_for_status()?.bytes().await?;
        debug!("Downloaded {} bytes", archive.len());

        let version_dir = self.cache_dir.join(&stable.version);
        fs::create_dir_all(&version_dir)?;
        unpack(&archive, &version_dir)?;

        let exe = version_dir.join(executable_in_archive(platform));
        if !exe.exists() {
            warn!("Archive unpacked but {} is missing", exe.display());
            return Err(DirectoryError::Browser(format!(
                "Chrome executable not found at {}",
                exe.display()
            )));
        }
        make_executable(&exe)?;

        info!("Chrome installed at {}", exe.display());
        Ok(exe)
    }
}

/// Looks for an installed Chrome or Chromium.
pub fn detect_system_chrome() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("CHROME").map(PathBuf::from) {
        if path.exists() {
            debug!("Chrome from CHROME: {}", path.display());
            return Some(path);
        }
    }

    KNOWN_COMMANDS
        .iter()
        .find_map(|cmd| which::which(cmd).ok())
        .or_else(|| {
            KNOWN_PATHS
                .iter()
                .map(PathBuf::from)
                .find(|path| path.exists())
        })
}

fn platform_id() -> Result<&'static str> {
    if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
        Ok("mac-arm64")
    } else if cfg!(all(target_os = "macos", target_arch = "x86_64")) {
        Ok("mac-x64")
    } else if cfg!(all(target_os = "linux", target_arch = "x86_64")) {
        Ok("linux64")
    } else {
        Err(DirectoryError::Browser(
            "Automatic Chrome download is not available on this platform".to_string(),
        ))
    }
}

fn executable_in_archive(platform: &str) -> String {
    if platform.starts_with("mac") {
        format!(
            "chrome-{}/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing",
            platform
        )
    } else {
        format!("chrome-{}/chrome", platform)
    }
}

fn unpack(archive: &[u8], target: &Path) -> Result<()> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))
        .map_err(|e| DirectoryError::Browser(format!("Invalid zip archive: {}", e)))?;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| DirectoryError::Browser(format!("Bad zip entry {}: {}", i, e)))?;
        let out = target.join(entry.mangled_name());

        if entry.is_dir() {
            fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&out)?;
        std::io::copy(&mut entry, &mut file)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                if let Err(e) = fs::set_permissions(&out, fs::Permissions::from_mode(mode)) {
                    warn!("Failed to set permissions on {}: {}", out.display(), e);
                }
            }
        }
    }
    Ok(())
}

/// Numeric components of a cached version directory name, so `130.0.2`
/// sorts above `99.0.1`. Non-numeric components count as zero.
fn version_key(dir: &Path) -> Vec<u32> {
    dir.file_name()
        .map(|name| {
            name.to_string_lossy()
                .split('.')
                .map(|part| part.parse().unwrap_or(0))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_bytes(entries: &[(&str, Option<&[u8]>)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in entries {
            match content {
                Some(bytes) => {
                    writer.start_file(*name, options).unwrap();
                    writer.write_all(bytes).unwrap();
                }
                None => writer.add_directory(*name, options).unwrap(),
            }
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_executable_in_archive() {
        assert_eq!(executable_in_archive("linux64"), "chrome-linux64/chrome");
        assert!(executable_in_archive("mac-arm64").ends_with("Google Chrome for Testing"));
    }

    #[test]
    fn test_cached_without_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let locator = ChromeLocator::with_cache_dir(dir.path().join("missing"));
        assert!(locator.cached().unwrap().is_none());
    }

    #[test]
    fn test_cached_picks_newest_version_with_executable() {
        let Ok(platform) = platform_id() else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let locator = ChromeLocator::with_cache_dir(dir.path());

        for version in ["129.0.1", "130.0.2"] {
            let exe = dir.path().join(version).join(executable_in_archive(platform));
            fs::create_dir_all(exe.parent().unwrap()).unwrap();
            fs::write(&exe, b"").unwrap();
        }
        fs::create_dir_all(dir.path().join("131.0.0")).unwrap();

        let found = locator.cached().unwrap().unwrap();
        assert!(found.starts_with(dir.path().join("130.0.2")));
    }

    #[test]
    fn test_version_key_orders_numerically() {
        assert_eq!(version_key(Path::new("/cache/130.0.6723.58")), vec![130, 0, 6723, 58]);
        assert!(version_key(Path::new("130.0.2")) > version_key(Path::new("99.0.1")));
        assert!(version_key(Path::new("131.0.10")) > version_key(Path::new("131.0.9")));
    }

    #[test]
    fn test_cached_prefers_three_digit_major_over_two() {
        let Ok(platform) = platform_id() else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let locator = ChromeLocator::with_cache_dir(dir.path());

        for version in ["99.0.1", "130.0.2"] {
            let exe = dir.path().join(version).join(executable_in_archive(platform));
            fs::create_dir_all(exe.parent().unwrap()).unwrap();
            fs::write(&exe, b"").unwrap();
        }

        let found = locator.cached().unwrap().unwrap();
        assert!(found.starts_with(dir.path().join("130.0.2")));
    }

    #[cfg(unix)]
    #[test]
    fn test_unpack_keeps_unix_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default().unix_permissions(0o755);
        writer.start_file("chrome-linux64/chrome", options).unwrap();
        writer.write_all(b"binary").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        unpack(&bytes, dir.path()).unwrap();
        let mode = fs::metadata(dir.path().join("chrome-linux64/chrome"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_unpack_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = zip_bytes(&[
            ("chrome-linux64/", None),
            ("chrome-linux64/chrome", Some(b"binary".as_slice())),
            ("chrome-linux64/locales/en.pak", Some(b"pak".as_slice())),
        ]);
        unpack(&bytes, dir.path()).unwrap();
        assert_eq!(
            fs::read(dir.path().join("chrome-linux64/chrome")).unwrap(),
            b"binary"
        );
        assert!(dir.path().join("chrome-linux64/locales/en.pak").exists());
    }

    #[test]
    fn test_unpack_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let err = unpack(b"not a zip", dir.path()).unwrap_err();
        assert!(err.to_string().contains("zip"));
    }

    #[test]
    fn test_versions_payload_parses() {
        let json = r#"{
            "timestamp": "2026-01-01T00:00:00Z",
            "channels": {
                "Stable": {
                    "channel": "Stable",
                    "version": "131.0.6778.85",
                    "downloads": {
                        "chrome": [
                            { "platform": "linux64", "url": "https://example.com/linux64.zip" },
                            { "platform": "mac-arm64", "url": "https://example.com/mac.zip" }
                        ]
                    }
                }
            }
        }"#;
        let versions: KnownGoodVersions = serde_json::from_str(json).unwrap();
        assert_eq!(versions.channels.stable.version, "131.0.6778.85");
        assert_eq!(versions.channels.stable.downloads.chrome.len(), 2);
        assert_eq!(versions.channels.stable.downloads.chrome[0].platform, "linux64");
    }

    #[test]
    fn test_detect_system_chrome_returns_existing_path() {
        if let Some(path) = detect_system_chrome() {
            assert!(path.exists());
        }
    }

    #[tokio::test]
    #[ignore] // Downloads Chrome for Testing
    async fn test_install_downloads_chrome() {
        let dir = tempfile::tempdir().unwrap();
        let locator = ChromeLocator::with_cache_dir(dir.path());
        let exe = locator.install().await.unwrap();
        assert!(exe.exists());
        assert_eq!(locator.cached().unwrap(), Some(exe));
    }
}
