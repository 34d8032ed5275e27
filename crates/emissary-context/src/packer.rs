//! Context packer.
//!
//! Turns (task text, output format, paths, priority paths, session, token
//! budget) into a prompt plus an overflow set, keeping previously-inlined
//! files inline across turns of the same session so provider prompt caches
//! stay warm.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use emissary_cache::StableListCache;
use emissary_core::blocking::run_blocking;

use crate::error::{PackError, Result};
use crate::prompt;
use crate::walker::{gather_files, CandidateFile};

/// Rough token estimate: 4 bytes per token.
fn estimate_tokens(bytes: u64) -> usize {
    (bytes as usize).div_ceil(4)
}

pub struct PackRequest {
    pub instructions: String,
    pub output_format: String,
    pub context: Vec<PathBuf>,
    pub priority_context: Vec<PathBuf>,
    pub session_id: String,
    pub context_window: usize,
}

#[derive(Debug)]
pub struct PackedContext {
    pub prompt: String,
    pub inline_files: Vec<PathBuf>,
    pub overflow_files: Vec<PathBuf>,
    /// Overflow files whose fingerprint changed since their last upload
    /// (includes never-uploaded files). Only these need a new upload.
    pub changed_overflow: Vec<PathBuf>,
}

pub struct ContextPacker {
    cache: Arc<StableListCache>,
    inline_budget_ratio: f64,
}

impl ContextPacker {
    pub fn new(cache: Arc<StableListCache>, inline_budget_ratio: f64) -> Self {
        Self {
            cache,
            inline_budget_ratio,
        }
    }

    pub async fn pack(&self, req: PackRequest) -> Result<PackedContext> {
        let context_paths = req.context.clone();
        let priority_paths = req.priority_context.clone();

        let (candidates, priority_files) = run_blocking(move || {
            (gather_files(&context_paths), gather_files(&priority_paths))
        })
        .await;

        let mut all: Vec<CandidateFile> = candidates;
        for pf in &priority_files {
            if !all.iter().any(|c| c.path == pf.path) {
                all.push(pf.clone());
            }
        }
        all.sort_by(|a, b| a.path.cmp(&b.path));

        let budget = (req.context_window as f64 * self.inline_budget_ratio) as usize;
        let forced: HashSet<PathBuf> = priority_files.iter().map(|f| f.path.clone()).collect();

        // Priority files are inlined unconditionally; if they alone exceed
        // the budget the request fails before any vector store is touched.
        let forced_tokens: usize = priority_files.iter().map(|f| estimate_tokens(f.size)).sum();
        if forced_tokens > budget {
            return Err(PackError::BudgetExceeded {
                needed: forced_tokens,
                budget,
            });
        }
        let mut remaining_budget = budget - forced_tokens;

        // Files inlined in a prior turn stay inline while their fingerprint
        // matches and they still fit.
        let stable = self
            .cache
            .get_stable_list(&req.session_id)
            .await?
            .unwrap_or_default();
        let stable_set: HashSet<&PathBuf> = stable.iter().collect();

        let mut sticky: HashSet<PathBuf> = HashSet::new();
        for file in &all {
            if forced.contains(&file.path) || !stable_set.contains(&file.path) {
                continue;
            }
            let changed = self
                .cache
                .file_changed_since_last_send(&req.session_id, &file.path)
                .await?;
            if changed {
                continue;
            }
            let tokens = estimate_tokens(file.size);
            if tokens <= remaining_budget {
                remaining_budget -= tokens;
                sticky.insert(file.path.clone());
            }
        }

        // Greedy pass over the rest, deterministic by path order.
        let mut inline: HashSet<PathBuf> = forced.clone();
        inline.extend(sticky.iter().cloned());
        let mut overflow: Vec<CandidateFile> = Vec::new();
        for file in &all {
            if inline.contains(&file.path) {
                continue;
            }
            let tokens = estimate_tokens(file.size);
            if tokens <= remaining_budget {
                remaining_budget -= tokens;
                inline.insert(file.path.clone());
            } else {
                overflow.push(file.clone());
            }
        }

        // Inline order: prior stable-list order first (cache-prefix
        // stability), then newly inlined files in path order.
        let mut inline_ordered: Vec<PathBuf> = stable
            .iter()
            .filter(|p| inline.contains(*p))
            .cloned()
            .collect();
        for file in &all {
            if inline.contains(&file.path) && !inline_ordered.contains(&file.path) {
                inline_ordered.push(file.path.clone());
            }
        }

        // Only fingerprint-changed overflow files need a fresh upload.
        let mut changed_overflow = Vec::new();
        for file in &overflow {
            if self
                .cache
                .file_changed_since_last_send(&req.session_id, &file.path)
                .await?
            {
                changed_overflow.push(file.path.clone());
            }
        }

        self.cache
            .save_stable_list(&req.session_id, &inline_ordered)
            .await?;

        let mut fingerprints = Vec::new();
        for path in inline_ordered.iter().chain(changed_overflow.iter()) {
            if let Some((size, mtime_ns)) = emissary_cache::stable_list::current_fingerprint(path)
            {
                fingerprints.push((path.clone(), size, mtime_ns));
            }
        }
        self.cache
            .batch_update_sent_files(&req.session_id, &fingerprints)
            .await?;

        // Read inline contents; unreadable files degrade to overflow-free
        // omission with a warning.
        let to_read = inline_ordered.clone();
        let contents: Vec<(PathBuf, Option<String>)> = run_blocking(move || {
            to_read
                .into_iter()
                .map(|p| {
                    let body = std::fs::read_to_string(&p)
                        .map_err(|e| {
                            warn!(path = %p.display(), error = %e, "cannot read inline file, skipping");
                            e
                        })
                        .ok();
                    (p, body)
                })
                .collect()
        })
        .await;
        let inline_contents: Vec<(PathBuf, String)> = contents
            .into_iter()
            .filter_map(|(p, body)| body.map(|b| (p, b)))
            .collect();

        let overflow_paths: Vec<PathBuf> = overflow.iter().map(|f| f.path.clone()).collect();
        let prompt = prompt::assemble(
            &req.instructions,
            &req.output_format,
            &inline_contents,
            &overflow_paths,
        );

        debug!(
            session = %req.session_id,
            inline = inline_ordered.len(),
            overflow = overflow_paths.len(),
            changed = changed_overflow.len(),
            budget,
            "context packed"
        );

        Ok(PackedContext {
            prompt,
            inline_files: inline_ordered,
            overflow_files: overflow_paths,
            changed_overflow,
        })
    }
}
