//! Init command: write a project configuration.

use std::path::{Path, PathBuf};

use bindscope_core::{ProjectConfig, ProjectDirs};

use crate::colors;

pub fn execute(project: &str, classpath: &[String], force: bool) -> anyhow::Result<()> {
    let root = Path::new(project);
    if !root.is_dir() {
        anyhow::bail!("project root not found: {}", project);
    }

    let dirs = ProjectDirs::locate(root);
    if dirs.config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            dirs.config_path.display()
        );
    }

    let mut config = ProjectConfig::default();
    if !classpath.is_empty() {
        config.classpath = classpath.iter().map(PathBuf::from).collect();
    }
    config.save(root)?;

    println!(
        "{}Created{} {}",
        colors::GREEN,
        colors::RESET,
        dirs.config_path.display()
    );
    for entry in &config.classpath {
        if !root.join(entry).is_dir() {
            println!(
                "  {}warning:{} classpath entry {} does not exist yet",
                colors::YELLOW,
                colors::RESET,
                entry.display()
            );
        }
    }
    Ok(())
}
