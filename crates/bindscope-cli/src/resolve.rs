//! Resolve and locate commands.
//!
//! Both refresh the project from source and resolve every dirty context
//! in a single worker before printing.

use std::time::Instant;

use bindscope_core::{AppContext, BindingKey, Error};

use crate::colors;
use crate::output::{print_context, print_location, print_problems, status_label};

/// Resolve the project and print the bindings of every context, or only
/// of `context`.
pub fn execute(
    app: &AppContext,
    project: &str,
    context: Option<&str>,
    keys: &[String],
) -> anyhow::Result<()> {
    let start = Instant::now();
    let manager = app.open(project)?;
    for key in keys {
        manager.add_interesting_key(BindingKey::parse(key));
    }

    println!(
        "{}Resolving{} {}",
        colors::CYAN,
        colors::RESET,
        manager.project().name()
    );
    let report = manager.update(true, true)?;

    let contexts = match context {
        Some(name) => vec![
            manager
                .module_context(name)
                .ok_or_else(|| Error::ContextNotFound(name.to_string()))?,
        ],
        None => manager.module_contexts(),
    };

    if contexts.is_empty() {
        println!("\n{}No module contexts found.{}", colors::YELLOW, colors::RESET);
        return Ok(());
    }

    for context in &contexts {
        println!();
        print_context(context);
        if let Some(outcome) = report.context(context.name()) {
            println!("  {}", status_label(&outcome.status));
        }
        print_problems("  ", context.problems());
        for location in context.bindings() {
            print_location("  ", location);
        }
    }

    let failed = report.failed();
    println!(
        "\n{}Completed{} {} in {:.2}s",
        colors::GREEN,
        colors::RESET,
        report.summary(),
        start.elapsed().as_secs_f64()
    );
    if failed > 0 {
        anyhow::bail!("{} context(s) failed to resolve", failed);
    }
    Ok(())
}

/// Print where `key` is bound in `context`.
pub fn locate(app: &AppContext, project: &str, context: &str, key: &str) -> anyhow::Result<()> {
    let manager = app.open(project)?;
    let key = BindingKey::parse(key);
    // Asking for the key explicitly makes an unbound key come back as "no binding".
    manager.add_interesting_key(key.clone());
    manager.update(true, true)?;

    let representation = manager
        .module_context(context)
        .ok_or_else(|| Error::ContextNotFound(context.to_string()))?;
    if !representation.problems().is_empty() {
        print_problems("", representation.problems());
        anyhow::bail!("context {} failed to resolve", context);
    }

    match manager.find_location(context, &key.key, key.annotation.as_deref())? {
        Some(location) => print_location("", &location),
        None => println!("{} -> <not resolved>", key),
    }
    Ok(())
}
