//! Step interpreter
//!
//! Executes one script step against a live driver handle: resolves `{name}`
//! placeholders against the bound parameters, applies the step's semantics and
//! classifies the result. The interpreter defines what each action *means*
//! (`wait` suspends the session, `open_url` navigates the primary context); the
//! driver supplies only the mechanical execution. No retries happen here.

use std::time::Duration;

use tracing::debug;
use url::Url;

use super::batch::FailureReason;
use crate::driver::{DriverHandle, PrimitiveStatus};
use crate::script::{ActionKind, BoundParams, Step};

/// Seconds slept when a `wait` step has no usable duration.
const DEFAULT_WAIT_SECS: f64 = 2.0;
/// Pixels scrolled when a `scroll` step has no usable distance.
const DEFAULT_SCROLL_PX: i64 = 500;

/// Classification of one executed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Ok,
    OkWithWarning(String),
    Fatal {
        reason: FailureReason,
        message: String,
    },
}

/// Substitute every `{name}` placeholder in `template` from `params`.
///
/// Returns the name of the first placeholder without a bound value. Braces
/// that do not form a well-shaped placeholder are kept literally.
pub fn resolve_template(template: &str, params: &BoundParams) -> Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                if !name.is_empty()
                    && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    match params.get(name) {
                        Some(value) => out.push_str(value),
                        None => return Err(name.to_string()),
                    }
                } else {
                    out.push('{');
                    out.push_str(name);
                    out.push('}');
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    Ok(out)
}

fn resolve_optional(
    template: Option<&str>,
    params: &BoundParams,
) -> Result<Option<String>, String> {
    match template {
        Some(t) => resolve_template(t, params).map(Some),
        None => Ok(None),
    }
}

fn unresolved(name: String) -> StepOutcome {
    StepOutcome::Fatal {
        reason: FailureReason::UnresolvedParameter,
        message: format!("placeholder {{{name}}} has no bound value"),
    }
}

/// Execute one step. Placeholder resolution happens before any driver call;
/// `wait` never reaches the driver at all.
pub async fn execute_step(
    handle: &mut dyn DriverHandle,
    step: &Step,
    params: &BoundParams,
) -> StepOutcome {
    let locator = match resolve_optional(step.locator.as_deref(), params) {
        Ok(l) => l,
        Err(name) => return unresolved(name),
    };
    let input = match resolve_optional(step.input.as_deref(), params) {
        Ok(i) => i,
        Err(name) => return unresolved(name),
    };

    debug!("Executing step {} ({}): {}", step.index, step.action, step.desc);

    match step.action {
        ActionKind::Wait => run_wait(input.as_deref()).await,
        ActionKind::OpenUrl => {
            let Some(ref url) = input else {
                return StepOutcome::Fatal {
                    reason: FailureReason::InvalidInput,
                    message: "open_url step has no input".into(),
                };
            };
            if let Err(e) = Url::parse(url) {
                return StepOutcome::Fatal {
                    reason: FailureReason::InvalidInput,
                    message: format!("invalid url '{url}': {e}"),
                };
            }
            drive(handle, step, locator.as_deref(), input.as_deref()).await
        }
        ActionKind::Scroll => {
            let input = input.unwrap_or_else(|| DEFAULT_SCROLL_PX.to_string());
            // Scroll is defined to never fail a session on its own account:
            // a driver fault is demoted to a warning.
            match handle
                .run_primitive(ActionKind::Scroll, locator.as_deref(), Some(input.as_str()))
                .await
            {
                Ok(PrimitiveStatus::Ok) => StepOutcome::Ok,
                Ok(PrimitiveStatus::Warning(msg)) => StepOutcome::OkWithWarning(msg),
                Err(e) => StepOutcome::OkWithWarning(format!("scroll did not complete: {e}")),
            }
        }
        ActionKind::Click | ActionKind::EnterText | ActionKind::UploadFile => {
            drive(handle, step, locator.as_deref(), input.as_deref()).await
        }
    }
}

/// Suspend the session for the step's duration. Cannot fail; an unparsable
/// duration falls back to the default and is surfaced as a warning.
async fn run_wait(input: Option<&str>) -> StepOutcome {
    let (secs, warning) = match input {
        None | Some("") => (DEFAULT_WAIT_SECS, None),
        Some(raw) => match raw.trim().parse::<f64>() {
            Ok(secs) if secs.is_finite() && secs >= 0.0 => (secs, None),
            _ => (
                DEFAULT_WAIT_SECS,
                Some(format!(
                    "unparsable wait duration '{raw}', waited {DEFAULT_WAIT_SECS}s"
                )),
            ),
        },
    };

    if secs > 0.0 {
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
    }

    match warning {
        Some(msg) => StepOutcome::OkWithWarning(msg),
        None => StepOutcome::Ok,
    }
}

/// Dispatch a primitive to the driver, propagating faults as fatal outcomes.
async fn drive(
    handle: &mut dyn DriverHandle,
    step: &Step,
    locator: Option<&str>,
    input: Option<&str>,
) -> StepOutcome {
    match handle.run_primitive(step.action, locator, input).await {
        Ok(PrimitiveStatus::Ok) => StepOutcome::Ok,
        Ok(PrimitiveStatus::Warning(msg)) => StepOutcome::OkWithWarning(msg),
        Err(e) => StepOutcome::Fatal {
            reason: FailureReason::StepFault,
            message: format!("step {} ({}) failed: {}", step.index, step.action, e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverError;
    use async_trait::async_trait;

    /// Records every primitive it receives; optionally faults on one action.
    struct FakeHandle {
        calls: Vec<(ActionKind, Option<String>, Option<String>)>,
        fail_on: Option<ActionKind>,
    }

    impl FakeHandle {
        fn new() -> Self {
            Self {
                calls: Vec::new(),
                fail_on: None,
            }
        }

        fn failing_on(action: ActionKind) -> Self {
            Self {
                calls: Vec::new(),
                fail_on: Some(action),
            }
        }
    }

    #[async_trait]
    impl DriverHandle for FakeHandle {
        async fn run_primitive(
            &mut self,
            action: ActionKind,
            locator: Option<&str>,
            input: Option<&str>,
        ) -> Result<PrimitiveStatus, DriverError> {
            self.calls.push((
                action,
                locator.map(|s| s.to_string()),
                input.map(|s| s.to_string()),
            ));
            if self.fail_on == Some(action) {
                return Err(DriverError::ElementNotFound("nope".into()));
            }
            Ok(PrimitiveStatus::Ok)
        }

        async fn close(&mut self) -> Result<(), DriverError> {
            Ok(())
        }
    }

    fn step(action: ActionKind, locator: Option<&str>, input: Option<&str>) -> Step {
        Step {
            index: 1,
            action,
            locator: locator.map(|s| s.to_string()),
            input: input.map(|s| s.to_string()),
            desc: String::new(),
        }
    }

    fn params(pairs: &[(&str, &str)]) -> BoundParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_resolve_template_substitutes_placeholders() {
        let params = params(&[("caption", "hi")]);
        assert_eq!(resolve_template("{caption}", &params).unwrap(), "hi");
        assert_eq!(
            resolve_template("say: {caption}!", &params).unwrap(),
            "say: hi!"
        );
    }

    #[test]
    fn test_resolve_template_reports_missing_placeholder() {
        let params = params(&[]);
        assert_eq!(
            resolve_template("{missing}", &params).unwrap_err(),
            "missing"
        );
    }

    #[test]
    fn test_resolve_template_keeps_malformed_braces() {
        let params = params(&[]);
        assert_eq!(
            resolve_template("a {not a name} b", &params).unwrap(),
            "a {not a name} b"
        );
    }

    #[tokio::test]
    async fn test_unresolved_parameter_is_fatal_before_any_driver_call() {
        let mut handle = FakeHandle::new();
        let step = step(ActionKind::EnterText, Some("css:#caption"), Some("{missing}"));

        let outcome = execute_step(&mut handle, &step, &params(&[])).await;

        assert!(matches!(
            outcome,
            StepOutcome::Fatal {
                reason: FailureReason::UnresolvedParameter,
                ..
            }
        ));
        assert!(handle.calls.is_empty());
    }

    #[tokio::test]
    async fn test_enter_text_passes_resolved_input() {
        let mut handle = FakeHandle::new();
        let step = step(ActionKind::EnterText, Some("css:#caption"), Some("{caption}"));

        let outcome = execute_step(&mut handle, &step, &params(&[("caption", "hi")])).await;

        assert_eq!(outcome, StepOutcome::Ok);
        assert_eq!(handle.calls.len(), 1);
        assert_eq!(handle.calls[0].2.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn test_driver_fault_on_click_is_fatal() {
        let mut handle = FakeHandle::failing_on(ActionKind::Click);
        let step = step(ActionKind::Click, Some("css:#go"), None);

        let outcome = execute_step(&mut handle, &step, &params(&[])).await;

        assert!(matches!(
            outcome,
            StepOutcome::Fatal {
                reason: FailureReason::StepFault,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_driver_fault_on_scroll_is_only_a_warning() {
        let mut handle = FakeHandle::failing_on(ActionKind::Scroll);
        let step = step(ActionKind::Scroll, None, Some("800"));

        let outcome = execute_step(&mut handle, &step, &params(&[])).await;

        assert!(matches!(outcome, StepOutcome::OkWithWarning(_)));
    }

    #[tokio::test]
    async fn test_invalid_url_fails_before_the_driver() {
        let mut handle = FakeHandle::new();
        let step = step(ActionKind::OpenUrl, None, Some("not a url"));

        let outcome = execute_step(&mut handle, &step, &params(&[])).await;

        assert!(matches!(
            outcome,
            StepOutcome::Fatal {
                reason: FailureReason::InvalidInput,
                ..
            }
        ));
        assert!(handle.calls.is_empty());
    }

    #[tokio::test]
    async fn test_wait_never_calls_the_driver() {
        let mut handle = FakeHandle::new();
        let step = step(ActionKind::Wait, None, Some("0"));

        let outcome = execute_step(&mut handle, &step, &params(&[])).await;

        assert_eq!(outcome, StepOutcome::Ok);
        assert!(handle.calls.is_empty());
    }

    #[tokio::test]
    async fn test_unparsable_wait_warns_instead_of_failing() {
        let mut handle = FakeHandle::new();
        let step = step(ActionKind::Wait, None, Some("-3"));

        // Keep the fallback sleep short by overriding via a parse failure path:
        // "-3" is rejected (negative) and falls back to the default wait.
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            execute_step(&mut handle, &step, &params(&[])),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, StepOutcome::OkWithWarning(_)));
    }
}
