//! Image loading for vision-capable models.
//!
//! Accepts local file paths and http(s) URLs. Every input is treated as
//! hostile: file paths are checked against traversal and sensitive
//! directories, URLs go through an SSRF guard (scheme/hostname screening,
//! private-IP checks on every resolved address, DNS pinning per hop, manual
//! redirect validation), and downloads are streamed against hard size caps.

use std::net::{IpAddr, SocketAddr};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use thiserror::Error;
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_REDIRECTS: usize = 5;

/// Per-image cap, in megabytes.
pub const DEFAULT_MAX_IMAGE_MB: u64 = 20;
/// Cap on the combined size of all images in one request, in megabytes.
pub const DEFAULT_MAX_TOTAL_MB: u64 = 200;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("unsupported image format for '{0}'; supported: JPEG, PNG, GIF, WebP")]
    UnsupportedFormat(String),

    #[error("{0}")]
    Blocked(String),

    #[error("image '{path}' ({actual_mb:.1}MB) exceeds the {limit_mb}MB per-image limit")]
    TooLarge {
        path: String,
        actual_mb: f64,
        limit_mb: u64,
    },

    #[error("total image size ({total_mb:.1}MB) exceeds the {limit_mb}MB limit after loading '{path}'")]
    TotalTooLarge {
        path: String,
        total_mb: f64,
        limit_mb: u64,
    },

    #[error("failed to load image '{path}': {reason}")]
    Load { path: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    File,
    Url,
}

/// A loaded image ready for API submission.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub source: ImageSource,
    pub origin: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageLimits {
    pub max_image_bytes: u64,
    pub max_total_bytes: u64,
}

impl Default for ImageLimits {
    fn default() -> Self {
        Self {
            max_image_bytes: DEFAULT_MAX_IMAGE_MB * 1024 * 1024,
            max_total_bytes: DEFAULT_MAX_TOTAL_MB * 1024 * 1024,
        }
    }
}

/// Load images sequentially, checking the running total after each one so
/// memory is bounded during loading, not only at the end.
pub async fn load_images(
    paths: &[String],
    limits: ImageLimits,
) -> Result<Vec<LoadedImage>, ImageError> {
    let mut images = Vec::with_capacity(paths.len());
    let mut running_total: u64 = 0;

    for path in paths {
        let image = if is_url(path) {
            load_from_url(path, limits.max_image_bytes).await?
        } else {
            load_from_file(path, limits.max_image_bytes).await?
        };

        running_total += image.data.len() as u64;
        if running_total > limits.max_total_bytes {
            return Err(ImageError::TotalTooLarge {
                path: path.clone(),
                total_mb: running_total as f64 / (1024.0 * 1024.0),
                limit_mb: limits.max_total_bytes / (1024 * 1024),
            });
        }
        images.push(image);
    }

    debug!(count = images.len(), bytes = running_total, "images loaded");
    Ok(images)
}

fn is_url(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

// ── MIME detection ───────────────────────────────────────────────────────────

const MAGIC_BYTES: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
];

const EXTENSION_MIME: &[(&str, &str)] = &[
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
    (".png", "image/png"),
    (".gif", "image/gif"),
    (".webp", "image/webp"),
];

/// Detect MIME type from magic bytes, falling back to the file extension.
pub fn detect_mime_type(data: &[u8], name: &str) -> Result<String, ImageError> {
    for (magic, mime) in MAGIC_BYTES {
        if data.starts_with(magic) {
            return Ok(mime.to_string());
        }
    }
    // WebP: RIFF....WEBP
    if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return Ok("image/webp".to_string());
    }
    let lower = name.to_lowercase();
    for (ext, mime) in EXTENSION_MIME {
        if lower.ends_with(ext) {
            return Ok(mime.to_string());
        }
    }
    Err(ImageError::UnsupportedFormat(name.to_string()))
}

// ── Local files ──────────────────────────────────────────────────────────────

/// Absolute directory prefixes that must never be read.
const SENSITIVE_PREFIXES: &[&str] = &[
    "/etc", "/proc", "/sys", "/dev", "/boot", "/root", "/sbin",
    "/var/log", "/var/run", "/var/lib", "/private/etc", "/System",
];

/// Hidden directories under $HOME that hold credentials.
const SENSITIVE_HOME_DIRS: &[&str] = &[
    ".ssh", ".aws", ".gnupg", ".kube", ".docker", ".azure", ".config",
    ".credentials", ".secrets", ".netrc", ".npmrc", ".pypirc",
];

fn validate_file_path(path: &str) -> Result<PathBuf, ImageError> {
    // Traversal is rejected before any resolution happens.
    if Path::new(path)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(ImageError::Blocked(format!(
            "path traversal detected in '{path}': '..' segments are not allowed"
        )));
    }

    // Canonicalize follows symlinks, which is what we want: a symlink into a
    // sensitive directory must be caught here.
    let resolved = std::fs::canonicalize(path).map_err(|e| ImageError::Load {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    let resolved_str = resolved.to_string_lossy();

    for prefix in SENSITIVE_PREFIXES {
        if resolved_str == *prefix || resolved_str.starts_with(&format!("{prefix}/")) {
            return Err(ImageError::Blocked(format!(
                "access to '{prefix}' is blocked"
            )));
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        for dir in SENSITIVE_HOME_DIRS {
            let guarded = format!("{home}/{dir}");
            if resolved_str == guarded || resolved_str.starts_with(&format!("{guarded}/")) {
                return Err(ImageError::Blocked(format!(
                    "access to '~/{dir}' is blocked"
                )));
            }
        }
    }

    Ok(resolved)
}

async fn load_from_file(path: &str, max_bytes: u64) -> Result<LoadedImage, ImageError> {
    let resolved = validate_file_path(path)?;

    let meta = tokio::fs::metadata(&resolved)
        .await
        .map_err(|e| ImageError::Load {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
    if meta.len() > max_bytes {
        return Err(ImageError::TooLarge {
            path: path.to_string(),
            actual_mb: meta.len() as f64 / (1024.0 * 1024.0),
            limit_mb: max_bytes / (1024 * 1024),
        });
    }

    let data = tokio::fs::read(&resolved)
        .await
        .map_err(|e| ImageError::Load {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
    let mime_type = detect_mime_type(&data, path)?;

    Ok(LoadedImage {
        data,
        mime_type,
        source: ImageSource::File,
        origin: path.to_string(),
    })
}

// ── URLs ─────────────────────────────────────────────────────────────────────

const BLOCKED_HOSTNAMES: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "metadata",
    "metadata.google.internal",
    "metadata.google.com",
    "kubernetes.default",
    "kubernetes.default.svc",
    "kubernetes.default.svc.cluster.local",
    "host.docker.internal",
    "gateway.docker.internal",
];

const BLOCKED_SUFFIXES: &[&str] = &[".internal", ".local", ".localhost", ".localdomain"];

/// Private/internal ranges the stdlib helpers don't cover.
fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.is_multicast()
                // Carrier-grade NAT 100.64.0.0/10
                || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
                // Benchmarking 198.18.0.0/15
                || (octets[0] == 198 && (octets[1] & 0xfe) == 18)
                // Reserved 240.0.0.0/4
                || octets[0] >= 240
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_private_ip(IpAddr::V4(mapped));
            }
            let segments = v6.segments();
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_multicast()
                // Unique local fc00::/7
                || (segments[0] & 0xfe00) == 0xfc00
                // Link-local fe80::/10
                || (segments[0] & 0xffc0) == 0xfe80
                // Documentation 2001:db8::/32
                || (segments[0] == 0x2001 && segments[1] == 0xdb8)
        }
    }
}

fn validate_url(raw: &str) -> Result<reqwest::Url, ImageError> {
    let url = reqwest::Url::parse(raw)
        .map_err(|e| ImageError::Blocked(format!("malformed URL '{raw}': {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ImageError::Blocked(format!(
                "URL scheme '{other}' is not allowed; only http/https"
            )))
        }
    }

    let host = url
        .host_str()
        .ok_or_else(|| ImageError::Blocked(format!("no hostname in URL '{raw}'")))?
        .to_lowercase();
    let host = host.trim_matches(|c| c == '[' || c == ']');
    let host = host.split('%').next().unwrap_or(host);

    if BLOCKED_HOSTNAMES.contains(&host) {
        return Err(ImageError::Blocked(format!(
            "URLs to internal hosts are not allowed: {raw}"
        )));
    }
    for suffix in BLOCKED_SUFFIXES {
        if host.ends_with(suffix) {
            return Err(ImageError::Blocked(format!(
                "URLs to internal hostnames are not allowed: {raw}"
            )));
        }
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_private_ip(ip) {
            return Err(ImageError::Blocked(format!(
                "URLs to private or internal addresses are not allowed: {raw}"
            )));
        }
    }

    Ok(url)
}

/// Resolve the host and reject any address in a private range. The returned
/// addresses are pinned into the HTTP client, so the connection goes to what
/// was validated rather than whatever DNS says a moment later.
async fn resolve_and_screen(host: &str, port: u16) -> Result<Vec<SocketAddr>, ImageError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        // Already screened by validate_url; just pin it.
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| ImageError::Load {
            path: host.to_string(),
            reason: format!("DNS resolution failed: {e}"),
        })?
        .collect();
    if addrs.is_empty() {
        return Err(ImageError::Load {
            path: host.to_string(),
            reason: "no addresses resolved".to_string(),
        });
    }
    for addr in &addrs {
        if is_private_ip(addr.ip()) {
            return Err(ImageError::Blocked(format!(
                "'{host}' resolves to a private or internal address ({})",
                addr.ip()
            )));
        }
    }
    Ok(addrs)
}

async fn load_from_url(raw: &str, max_bytes: u64) -> Result<LoadedImage, ImageError> {
    let mut current = validate_url(raw)?;

    for _hop in 0..=MAX_REDIRECTS {
        let host = current
            .host_str()
            .ok_or_else(|| ImageError::Blocked(format!("no hostname in URL '{current}'")))?
            .to_string();
        let port = current.port_or_known_default().unwrap_or(443);
        let pinned = resolve_and_screen(&host, port).await?;

        // One client per hop: redirects are never followed automatically,
        // and each hop's hostname is pinned to its screened addresses.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(FETCH_TIMEOUT)
            .resolve_to_addrs(&host, &pinned)
            .build()
            .map_err(|e| ImageError::Load {
                path: raw.to_string(),
                reason: e.to_string(),
            })?;

        let response = client
            .get(current.clone())
            .send()
            .await
            .map_err(|e| ImageError::Load {
                path: raw.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.is_redirection() {
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|l| l.to_str().ok())
                .ok_or_else(|| ImageError::Load {
                    path: raw.to_string(),
                    reason: "redirect without Location header".to_string(),
                })?;
            // join() handles relative targets; the absolute result is then
            // screened exactly like the original URL.
            let next = current.join(location).map_err(|e| ImageError::Load {
                path: raw.to_string(),
                reason: format!("bad redirect target: {e}"),
            })?;
            debug!(from = %current, to = %next, "following image redirect");
            current = validate_url(next.as_str())?;
            continue;
        }

        if !status.is_success() {
            return Err(ImageError::Load {
                path: raw.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        // Content-Length is advisory; the stream is re-checked as it arrives.
        if let Some(declared) = response.content_length() {
            if declared > max_bytes {
                return Err(ImageError::TooLarge {
                    path: raw.to_string(),
                    actual_mb: declared as f64 / (1024.0 * 1024.0),
                    limit_mb: max_bytes / (1024 * 1024),
                });
            }
        }

        let mut data: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ImageError::Load {
                path: raw.to_string(),
                reason: e.to_string(),
            })?;
            if data.len() as u64 + chunk.len() as u64 > max_bytes {
                return Err(ImageError::TooLarge {
                    path: raw.to_string(),
                    actual_mb: (data.len() + chunk.len()) as f64 / (1024.0 * 1024.0),
                    limit_mb: max_bytes / (1024 * 1024),
                });
            }
            data.extend_from_slice(&chunk);
        }

        let file_name = current
            .path_segments()
            .and_then(|mut s| s.next_back())
            .filter(|n| !n.is_empty())
            .unwrap_or("image.bin");
        let mime_type = detect_mime_type(&data, file_name)?;

        return Ok(LoadedImage {
            data,
            mime_type,
            source: ImageSource::Url,
            origin: raw.to_string(),
        });
    }

    warn!(url = %raw, "image fetch exceeded redirect budget");
    Err(ImageError::Load {
        path: raw.to_string(),
        reason: format!("more than {MAX_REDIRECTS} redirects"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_png_jpeg_gif_webp() {
        assert_eq!(
            detect_mime_type(b"\x89PNG\r\n\x1a\n____", "x").unwrap(),
            "image/png"
        );
        assert_eq!(
            detect_mime_type(b"\xff\xd8\xff\xe0rest", "x").unwrap(),
            "image/jpeg"
        );
        assert_eq!(detect_mime_type(b"GIF89a......", "x").unwrap(), "image/gif");
        assert_eq!(
            detect_mime_type(b"RIFF\x00\x00\x00\x00WEBPVP8 ", "x").unwrap(),
            "image/webp"
        );
    }

    #[test]
    fn falls_back_to_extension_then_fails() {
        assert_eq!(
            detect_mime_type(b"not magic", "photo.JPG").unwrap(),
            "image/jpeg"
        );
        assert!(matches!(
            detect_mime_type(b"not magic", "document.pdf"),
            Err(ImageError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn rejects_traversal_and_sensitive_paths() {
        assert!(matches!(
            validate_file_path("../../../etc/passwd"),
            Err(ImageError::Blocked(_))
        ));
        // /proc exists on the test hosts this runs on.
        if Path::new("/proc/version").exists() {
            assert!(matches!(
                validate_file_path("/proc/version"),
                Err(ImageError::Blocked(_))
            ));
        }
    }

    #[test]
    fn url_screening_blocks_bad_schemes_and_hosts() {
        assert!(validate_url("ftp://example.com/a.png").is_err());
        assert!(validate_url("http://localhost/a.png").is_err());
        assert!(validate_url("http://127.0.0.1/a.png").is_err());
        assert!(validate_url("http://169.254.169.254/latest/meta-data").is_err());
        assert!(validate_url("http://10.1.2.3/a.png").is_err());
        assert!(validate_url("http://svc.cluster.internal/a.png").is_err());
        assert!(validate_url("https://example.com/a.png").is_ok());
    }

    #[test]
    fn private_ip_ranges_are_recognized() {
        for ip in [
            "127.0.0.1",
            "10.0.0.1",
            "172.16.5.5",
            "192.168.1.1",
            "169.254.169.254",
            "100.64.0.1",
            "198.18.0.1",
            "240.0.0.1",
            "::1",
            "fe80::1",
            "fc00::1",
            "::ffff:127.0.0.1",
        ] {
            assert!(is_private_ip(ip.parse().unwrap()), "{ip} should be private");
        }
        for ip in ["8.8.8.8", "1.1.1.1", "2606:4700::1111"] {
            assert!(!is_private_ip(ip.parse().unwrap()), "{ip} should be public");
        }
    }

    #[tokio::test]
    async fn file_loading_respects_per_image_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.png");
        let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
        data.extend(vec![0u8; 4096]);
        std::fs::write(&path, &data).unwrap();

        let err = load_from_file(path.to_str().unwrap(), 1024).await.unwrap_err();
        assert!(matches!(err, ImageError::TooLarge { .. }));
    }

    #[tokio::test]
    async fn load_images_enforces_running_total() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for i in 0..3 {
            let path = dir.path().join(format!("img{i}.png"));
            let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
            data.extend(vec![0u8; 1000]);
            std::fs::write(&path, &data).unwrap();
            paths.push(path.to_string_lossy().into_owned());
        }

        let limits = ImageLimits {
            max_image_bytes: 10_000,
            max_total_bytes: 2_500,
        };
        let err = load_images(&paths, limits).await.unwrap_err();
        assert!(matches!(err, ImageError::TotalTooLarge { .. }));

        // Under the cap everything loads with the right MIME type.
        let roomy = ImageLimits {
            max_image_bytes: 10_000,
            max_total_bytes: 100_000,
        };
        let images = load_images(&paths, roomy).await.unwrap();
        assert_eq!(images.len(), 3);
        assert!(images.iter().all(|i| i.mime_type == "image/png"));
        assert!(images.iter().all(|i| i.source == ImageSource::File));
    }

    #[tokio::test]
    async fn missing_file_is_a_load_error() {
        let err = load_from_file("/tmp/definitely-missing-98765.png", 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::Load { .. }));
    }
}
