//! Script data model
//!
//! A script is an immutable, ordered list of typed steps with `{name}`
//! placeholders in locator/input templates. Scripts are authored as JSON and
//! loaded through the [`ScriptStore`](super::ScriptStore); the engine only ever
//! sees structurally valid scripts.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Parameters bound at batch submission, substituted into step templates.
pub type BoundParams = HashMap<String, String>;

/// The closed set of step actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    OpenUrl,
    Click,
    EnterText,
    Wait,
    Scroll,
    UploadFile,
}

impl ActionKind {
    /// Action name as written in script files.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::OpenUrl => "open_url",
            ActionKind::Click => "click",
            ActionKind::EnterText => "enter_text",
            ActionKind::Wait => "wait",
            ActionKind::Scroll => "scroll",
            ActionKind::UploadFile => "upload_file",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of an automation script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// 1-based position, strictly ascending within a script.
    pub index: u32,
    pub action: ActionKind,
    /// Element locator template (e.g. `css:input[name='q']`).
    #[serde(default)]
    pub locator: Option<String>,
    /// Input template (URL, text, seconds, pixels or file path depending on action).
    #[serde(default)]
    pub input: Option<String>,
    /// Human-readable description shown in progress events.
    #[serde(default)]
    pub desc: String,
}

/// An automation script. Immutable once loaded; identity is `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub id: String,
    /// Platform tag (e.g. "instagram", "gmail").
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<Step>,
}

/// Structural validation errors for scripts.
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("script has no steps")]
    Empty,

    #[error("step indices must be unique and strictly ascending (index {0} follows {1})")]
    IndexOrder(u32, u32),

    #[error("step {0}: {1} requires a locator")]
    MissingLocator(u32, &'static str),

    #[error("step {0}: {1} requires an input")]
    MissingInput(u32, &'static str),
}

impl Script {
    /// Check structural well-formedness: non-empty, strictly ascending step
    /// indices, and required locator/input fields per action kind.
    pub fn validate(&self) -> Result<(), ScriptError> {
        if self.steps.is_empty() {
            return Err(ScriptError::Empty);
        }

        let mut previous: Option<u32> = None;
        for step in &self.steps {
            if let Some(prev) = previous {
                if step.index <= prev {
                    return Err(ScriptError::IndexOrder(step.index, prev));
                }
            }
            previous = Some(step.index);

            let name = step.action.as_str();
            match step.action {
                ActionKind::OpenUrl => {
                    if step.input.is_none() {
                        return Err(ScriptError::MissingInput(step.index, name));
                    }
                }
                ActionKind::Click => {
                    if step.locator.is_none() {
                        return Err(ScriptError::MissingLocator(step.index, name));
                    }
                }
                ActionKind::EnterText => {
                    if step.locator.is_none() {
                        return Err(ScriptError::MissingLocator(step.index, name));
                    }
                    if step.input.is_none() {
                        return Err(ScriptError::MissingInput(step.index, name));
                    }
                }
                ActionKind::UploadFile => {
                    if step.input.is_none() {
                        return Err(ScriptError::MissingInput(step.index, name));
                    }
                }
                // Wait and scroll fall back to defaults when input is absent.
                ActionKind::Wait | ActionKind::Scroll => {}
            }
        }

        Ok(())
    }

    /// Collect every `{name}` placeholder referenced by any step template.
    pub fn placeholders(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for step in &self.steps {
            if let Some(ref locator) = step.locator {
                collect_placeholders(locator, &mut names);
            }
            if let Some(ref input) = step.input {
                collect_placeholders(input, &mut names);
            }
        }
        names
    }
}

/// Scan a template for `{name}` placeholders (ASCII alphanumeric + underscore).
/// Braces that do not form a well-shaped placeholder are treated as literals.
pub fn collect_placeholders(template: &str, out: &mut BTreeSet<String>) {
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                if !name.is_empty()
                    && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    out.insert(name.to_string());
                }
                rest = &after[close + 1..];
            }
            None => break,
        }
    }
}
