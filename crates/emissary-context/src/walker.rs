//! Candidate-file discovery.
//!
//! Walks the requested paths with gitignore semantics, skips binaries, and
//! reports sizes. Missing or unreadable entries are warned about and skipped,
//! never fatal.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use tracing::warn;

/// Bytes sniffed from the head of a file for binary detection.
const SNIFF_BYTES: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub size: u64,
}

/// Expand `paths` (files or directories) into a deduplicated, path-sorted
/// candidate list.
pub fn gather_files(paths: &[PathBuf]) -> Vec<CandidateFile> {
    let mut out: Vec<CandidateFile> = Vec::new();

    for path in paths {
        if !path.exists() {
            warn!(path = %path.display(), "context path missing, skipping");
            continue;
        }
        if path.is_file() {
            if let Some(candidate) = candidate(path) {
                out.push(candidate);
            }
            continue;
        }

        let walk = WalkBuilder::new(path)
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .build();
        for entry in walk {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "walk error, skipping entry");
                    continue;
                }
            };
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                if let Some(c) = candidate(entry.path()) {
                    out.push(c);
                }
            }
        }
    }

    out.sort_by(|a, b| a.path.cmp(&b.path));
    out.dedup_by(|a, b| a.path == b.path);
    out
}

fn candidate(path: &Path) -> Option<CandidateFile> {
    let meta = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot stat file, skipping");
            return None;
        }
    };
    if is_binary(path) {
        return None;
    }
    Some(CandidateFile {
        path: path.to_path_buf(),
        size: meta.len(),
    })
}

/// NUL-byte sniff over the head of the file.
fn is_binary(path: &Path) -> bool {
    use std::io::Read;

    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot open file, skipping");
            return true;
        }
    };
    let mut buf = [0u8; SNIFF_BYTES];
    let n = match file.read(&mut buf) {
        Ok(n) => n,
        Err(_) => return true,
    };
    buf[..n].contains(&0)
}
