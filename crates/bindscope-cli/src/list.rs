//! Modules and contexts listings.

use bindscope_core::{AppContext, Validity};

use crate::colors;
use crate::output::{print_context, print_problems};

/// List discovered modules. With `validate`, modules of unknown validity
/// are instantiated in a worker first.
pub fn modules(app: &AppContext, project: &str, validate: bool) -> anyhow::Result<()> {
    let manager = app.open(project)?;
    manager.update(true, validate)?;

    let modules = manager.modules();
    if modules.is_empty() {
        println!("{}No modules found.{}", colors::YELLOW, colors::RESET);
        println!("Modules are *.module.json descriptors under the project's source roots");
        return Ok(());
    }

    for module in &modules {
        let validity = match module.validity() {
            Validity::Valid => format!("{}valid{}", colors::GREEN, colors::RESET),
            Validity::Broken => format!("{}broken{}", colors::RED, colors::RESET),
            Validity::Unknown => format!("{}unknown{}", colors::DIM, colors::RESET),
        };
        let arguments = if module.arguments().is_empty() {
            String::new()
        } else {
            format!("({})", module.arguments().join(", "))
        };
        println!("{}{} [{}]", module.name(), arguments, validity);
        if !module.is_locatable() {
            println!("  {}no longer found in source{}", colors::YELLOW, colors::RESET);
        }
        print_problems("  ", module.problems());
    }

    if validate && modules.iter().any(|m| m.validity() == Validity::Broken) {
        anyhow::bail!("some modules failed to instantiate");
    }
    Ok(())
}

/// List contexts with their members, without resolving them.
pub fn contexts(app: &AppContext, project: &str) -> anyhow::Result<()> {
    let manager = app.open(project)?;
    manager.update(true, false)?;

    let contexts = manager.module_contexts();
    if contexts.is_empty() {
        println!("{}No module contexts found.{}", colors::YELLOW, colors::RESET);
        println!("Define one in a *.context.json file or enable infer_default_contexts");
        return Ok(());
    }

    for context in &contexts {
        print_context(context);
        for member in context.members() {
            if member.arguments.is_empty() {
                println!("  {}", member.name);
            } else {
                println!("  {}({})", member.name, member.arguments.join(", "));
            }
        }
    }
    Ok(())
}
