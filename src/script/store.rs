//! Script store
//!
//! Loads automation scripts from a scripts directory (JSON files, searched
//! recursively, matched by `id`) and serves a small set of built-in scripts
//! compiled into the crate. Loaded scripts are cached with a short TTL so a
//! running server picks up on-disk edits without a restart.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use once_cell::sync::Lazy;
use thiserror::Error;
use tracing::{debug, warn};

use super::model::{ActionKind, Script, Step};

/// Script store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("script not found: {0}")]
    NotFound(String),

    #[error("malformed script {0}: {1}")]
    Malformed(String, String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Summary of an available script (for listing surfaces).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptSummary {
    pub id: String,
    pub platform: String,
    pub description: String,
    pub steps: usize,
    pub builtin: bool,
}

fn summary(script: &Script, builtin: bool) -> ScriptSummary {
    ScriptSummary {
        id: script.id.clone(),
        platform: script.platform.clone(),
        description: script.description.clone(),
        steps: script.steps.len(),
        builtin,
    }
}

fn builtin_step(
    index: u32,
    action: ActionKind,
    locator: Option<&str>,
    input: Option<&str>,
    desc: &str,
) -> Step {
    Step {
        index,
        action,
        locator: locator.map(|s| s.to_string()),
        input: input.map(|s| s.to_string()),
        desc: desc.to_string(),
    }
}

/// Scripts shipped with the crate, usable without any scripts directory.
static BUILTIN_SCRIPTS: Lazy<Vec<Arc<Script>>> = Lazy::new(|| {
    vec![
        Arc::new(Script {
            id: "instagram_postvideo".into(),
            platform: "instagram".into(),
            description: "Post a video to Instagram with a caption".into(),
            steps: vec![
                builtin_step(
                    1,
                    ActionKind::OpenUrl,
                    None,
                    Some("https://www.instagram.com/"),
                    "Open Instagram",
                ),
                builtin_step(
                    2,
                    ActionKind::Click,
                    Some("css:svg[aria-label='New post']"),
                    None,
                    "Open the composer",
                ),
                builtin_step(
                    3,
                    ActionKind::UploadFile,
                    Some("css:input[type='file']"),
                    Some("{video_path}"),
                    "Select the video file",
                ),
                builtin_step(4, ActionKind::Wait, None, Some("5"), "Let the upload settle"),
                builtin_step(
                    5,
                    ActionKind::Click,
                    Some("Next"),
                    None,
                    "Advance past editing",
                ),
                builtin_step(
                    6,
                    ActionKind::EnterText,
                    Some("css:div[aria-label='Write a caption...']"),
                    Some("{caption}"),
                    "Write the caption",
                ),
                builtin_step(7, ActionKind::Click, Some("Share"), None, "Share the post"),
                builtin_step(8, ActionKind::Wait, None, Some("8"), "Wait for publishing"),
            ],
        }),
        Arc::new(Script {
            id: "gmail_login".into(),
            platform: "gmail".into(),
            description: "Sign in to a Gmail account".into(),
            steps: vec![
                builtin_step(
                    1,
                    ActionKind::OpenUrl,
                    None,
                    Some("https://accounts.google.com/signin"),
                    "Open the sign-in page",
                ),
                builtin_step(
                    2,
                    ActionKind::EnterText,
                    Some("css:input[type='email']"),
                    Some("{email}"),
                    "Enter the email address",
                ),
                builtin_step(3, ActionKind::Click, Some("Next"), None, "Confirm the email"),
                builtin_step(4, ActionKind::Wait, None, Some("2"), "Wait for the password form"),
                builtin_step(
                    5,
                    ActionKind::EnterText,
                    Some("css:input[type='password']"),
                    Some("{password}"),
                    "Enter the password",
                ),
                builtin_step(6, ActionKind::Click, Some("Next"), None, "Sign in"),
            ],
        }),
    ]
});

/// Loads and caches automation scripts.
pub struct ScriptStore {
    scripts_dir: PathBuf,
    cache: Cache<String, Arc<Script>>,
}

impl ScriptStore {
    /// Create a store rooted at `scripts_dir` with the given cache TTL.
    pub fn new(scripts_dir: impl Into<PathBuf>, cache_ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(256)
            .time_to_live(cache_ttl)
            .build();
        Self {
            scripts_dir: scripts_dir.into(),
            cache,
        }
    }

    /// Load a script by id. Disk scripts shadow built-ins with the same id.
    pub async fn load(&self, id: &str) -> Result<Arc<Script>, StoreError> {
        if let Some(script) = self.cache.get(id).await {
            return Ok(script);
        }

        let script = self.load_uncached(id)?;
        self.cache.insert(id.to_string(), script.clone()).await;
        Ok(script)
    }

    fn load_uncached(&self, id: &str) -> Result<Arc<Script>, StoreError> {
        for path in self.script_files() {
            let Some(script) = read_script_file(&path) else {
                continue;
            };
            if script.id == id {
                script
                    .validate()
                    .map_err(|e| StoreError::Malformed(id.to_string(), e.to_string()))?;
                debug!("Loaded script {} from {}", id, path.display());
                return Ok(Arc::new(script));
            }
        }

        if let Some(script) = BUILTIN_SCRIPTS.iter().find(|s| s.id == id) {
            debug!("Loaded built-in script {}", id);
            return Ok(script.clone());
        }

        Err(StoreError::NotFound(id.to_string()))
    }

    /// List every available script: disk scripts first, then built-ins that are
    /// not shadowed by a disk script with the same id.
    pub fn list(&self) -> Vec<ScriptSummary> {
        let mut summaries: Vec<ScriptSummary> = Vec::new();

        for path in self.script_files() {
            if let Some(script) = read_script_file(&path) {
                if script.validate().is_ok() && !summaries.iter().any(|s| s.id == script.id) {
                    summaries.push(summary(&script, false));
                }
            }
        }

        for script in BUILTIN_SCRIPTS.iter() {
            if !summaries.iter().any(|s| s.id == script.id) {
                summaries.push(summary(script, true));
            }
        }

        summaries
    }

    /// Collect all `.json` files under the scripts directory, recursively.
    fn script_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        collect_json_files(&self.scripts_dir, &mut files);
        files.sort();
        files
    }
}

fn collect_json_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_json_files(&path, out);
        } else if path.extension().is_some_and(|ext| ext == "json") {
            out.push(path);
        }
    }
}

/// Parse one script file. Unreadable or unparsable files are skipped with a
/// warning so a single bad file cannot break the whole store.
fn read_script_file(path: &Path) -> Option<Script> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read script file {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_str::<Script>(&content) {
        Ok(script) => Some(script),
        Err(e) => {
            warn!("Skipping unparsable script file {}: {}", path.display(), e);
            None
        }
    }
}
