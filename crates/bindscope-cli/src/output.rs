//! Shared printing helpers.

use bindscope_core::manager::ContextStatus;
use bindscope_core::{BindingCodeLocation, CodeProblem, ModuleContextRepresentation};

use crate::colors;

pub fn print_problems(indent: &str, problems: &[CodeProblem]) {
    for problem in problems {
        let text = problem.to_string();
        let mut lines = text.lines();
        if let Some(first) = lines.next() {
            println!("{}{}✗{} {}", indent, colors::RED, colors::RESET, first);
        }
        for line in lines {
            println!("{}  {}{}{}", indent, colors::DIM, line, colors::RESET);
        }
        for frame in &problem.stack_trace {
            println!("{}    {}at {}{}", indent, colors::DIM, frame.location, colors::RESET);
        }
    }
}

pub fn print_location(indent: &str, location: &BindingCodeLocation) {
    match location.bind_to() {
        Some(_) => println!("{}{}", indent, location),
        None => println!(
            "{}{}{}{}",
            indent,
            colors::DIM,
            location,
            colors::RESET
        ),
    }
    print_problems(&format!("{}  ", indent), location.problems());
}

pub fn print_context(context: &ModuleContextRepresentation) {
    let state = if context.is_dirty() {
        format!("{}dirty{}", colors::YELLOW, colors::RESET)
    } else {
        format!("{}fresh{}", colors::GREEN, colors::RESET)
    };
    println!("{}{}{} [{}]", colors::BOLD, context.name(), colors::RESET, state);
}

pub fn status_label(status: &ContextStatus) -> String {
    let color = match status {
        ContextStatus::Resolved => colors::GREEN,
        ContextStatus::Failed(_) => colors::RED,
        ContextStatus::Cancelled | ContextStatus::Stale => colors::YELLOW,
    };
    format!("{}{}{}", color, status, colors::RESET)
}
