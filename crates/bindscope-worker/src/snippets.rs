//! Snippet dispatch.
//!
//! Every snippet produces exactly one outcome. Errors and panics inside a
//! snippet become a `Failure` outcome; only the `Exit` diagnostic ends the
//! process without one.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread;
use std::time::Duration;

use anyhow::{Context, bail};
use bindscope_core::ipc::protocol::{
    ECHO_SNIPPET, EXIT_SNIPPET, MODULE_CONTEXT_SNIPPET, MODULE_SNIPPET, PANIC_SNIPPET, SLEEP_SNIPPET,
};
use bindscope_core::ipc::{
    ContextQuery, ContextSnippetResult, ModuleQuery, ModuleSnippetResult, SnippetOutcome,
    SnippetPayload,
};
use bindscope_core::problem::CodeProblem;

use crate::classpath::Classpath;
use crate::injector::Injector;

/// What the main loop does after a snippet.
#[derive(Debug)]
pub enum Action {
    Reply(SnippetOutcome),
    Exit(i32),
}

pub fn run(classpath: &Classpath, snippet: &str, arguments: &[String]) -> Action {
    tracing::debug!("Running {} with {} argument(s)", snippet, arguments.len());
    match catch_unwind(AssertUnwindSafe(|| dispatch(classpath, snippet, arguments))) {
        Ok(Ok(action)) => action,
        Ok(Err(e)) => failure(format!("{}: {:#}", snippet, e)),
        Err(panic) => failure(format!("{} panicked: {}", snippet, panic_message(panic.as_ref()))),
    }
}

fn failure(message: String) -> Action {
    Action::Reply(SnippetOutcome::Failure(vec![CodeProblem::generic(message)]))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

fn success(payload: SnippetPayload) -> anyhow::Result<Action> {
    Ok(Action::Reply(SnippetOutcome::Success(payload)))
}

fn dispatch(classpath: &Classpath, snippet: &str, arguments: &[String]) -> anyhow::Result<Action> {
    match snippet {
        MODULE_CONTEXT_SNIPPET => {
            let query = ContextQuery::from_arguments(arguments)?;
            success(SnippetPayload::ModuleContext(resolve_context(classpath, &query)))
        }
        MODULE_SNIPPET => {
            let query = ModuleQuery::from_arguments(arguments)?;
            success(SnippetPayload::Module(validate_module(classpath, &query)))
        }
        ECHO_SNIPPET => success(SnippetPayload::Text(arguments.to_vec())),
        SLEEP_SNIPPET => {
            let millis: u64 = arguments
                .first()
                .context("missing duration")?
                .parse()
                .context("duration is not a number")?;
            thread::sleep(Duration::from_millis(millis));
            success(SnippetPayload::Text(arguments[1..].to_vec()))
        }
        EXIT_SNIPPET => {
            let code = match arguments.first() {
                Some(code) => code.parse().context("exit code is not a number")?,
                None => 1,
            };
            Ok(Action::Exit(code))
        }
        PANIC_SNIPPET => {
            let message = arguments.first().map_or("requested panic", String::as_str);
            panic!("{}", message)
        }
        other => bail!("unknown snippet {}", other),
    }
}

/// Report bindings for a module context. An empty key list reports every
/// declared binding.
pub fn resolve_context(classpath: &Classpath, query: &ContextQuery) -> ContextSnippetResult {
    match Injector::create(classpath, &query.modules) {
        Ok(injector) => {
            let bindings = if query.keys.is_empty() {
                injector.keys().map(|key| injector.locate(key)).collect()
            } else {
                query.keys.iter().map(|key| injector.locate(key)).collect()
            };
            ContextSnippetResult {
                name: query.name.clone(),
                bindings,
                problems: Vec::new(),
            }
        }
        Err(problems) => ContextSnippetResult {
            name: query.name.clone(),
            bindings: Vec::new(),
            problems,
        },
    }
}

pub fn validate_module(classpath: &Classpath, query: &ModuleQuery) -> ModuleSnippetResult {
    let problems = Injector::create(classpath, std::slice::from_ref(&query.module))
        .err()
        .unwrap_or_default();
    ModuleSnippetResult {
        name: query.module.name.clone(),
        problems,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindscope_core::ipc::ModuleSpec;
    use bindscope_core::model::BindingKey;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, Classpath) {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("WorkingModule.module.json"),
            r#"{"bindings": [
                {"key": "Service", "annotation": "blue", "to": "BlueService"},
                {"key": "Clock"}
            ]}"#,
        )
        .unwrap();
        let classpath = Classpath::new(vec![dir.path().to_path_buf()]);
        (dir, classpath)
    }

    fn reply(action: Action) -> SnippetOutcome {
        match action {
            Action::Reply(outcome) => outcome,
            Action::Exit(code) => panic!("unexpected exit {}", code),
        }
    }

    #[test]
    fn test_all_bindings_without_keys() {
        let (_dir, classpath) = fixture();
        let query = ContextQuery {
            name: "ctx".to_string(),
            modules: vec![ModuleSpec::new("WorkingModule")],
            keys: vec![],
        };
        let result = resolve_context(&classpath, &query);
        let keys: Vec<String> = result.bindings.iter().map(|b| b.key().to_string()).collect();
        assert_eq!(keys.len(), 2);
        assert!(result.problems.is_empty());
    }

    #[test]
    fn test_requested_keys_only() {
        let (_dir, classpath) = fixture();
        let query = ContextQuery {
            name: "ctx".to_string(),
            modules: vec![ModuleSpec::new("WorkingModule")],
            keys: vec![BindingKey::new("Service", Some("blue")), BindingKey::plain("Missing")],
        };
        let result = resolve_context(&classpath, &query);
        assert_eq!(result.bindings.len(), 2);
        assert_eq!(result.bindings[0].bind_to(), Some("BlueService"));
        assert!(!result.bindings[1].is_bound());
    }

    #[test]
    fn test_unknown_snippet_fails() {
        let (_dir, classpath) = fixture();
        match reply(run(&classpath, "com.example.Nope", &[])) {
            SnippetOutcome::Failure(problems) => assert!(problems[0].message.contains("unknown snippet")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_panic_becomes_failure() {
        let (_dir, classpath) = fixture();
        match reply(run(&classpath, PANIC_SNIPPET, &["kaboom".to_string()])) {
            SnippetOutcome::Failure(problems) => assert!(problems[0].message.contains("kaboom")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_arguments_fail() {
        let (_dir, classpath) = fixture();
        let outcome = reply(run(&classpath, MODULE_CONTEXT_SNIPPET, &["ctx".to_string()]));
        assert!(matches!(outcome, SnippetOutcome::Failure(_)));
    }

    #[test]
    fn test_exit_code() {
        let (_dir, classpath) = fixture();
        assert!(matches!(
            run(&classpath, EXIT_SNIPPET, &["3".to_string()]),
            Action::Exit(3)
        ));
    }
}
