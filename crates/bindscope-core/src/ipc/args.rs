//! Positional argument layouts for the resolution snippets.
//!
//! Snippet arguments are plain strings. Both sides agree on these layouts:
//!
//! ```text
//! ModuleSnippet:        <module> <argc> <arg>*
//! ModuleContextSnippet: <context> <module count> (<module> <argc> <arg>*)* <key count> (<key> <annotation|"">)*
//! ```

use crate::error::{Error, Result};
use crate::model::BindingKey;

/// A module together with its constructor argument literals.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleSpec {
    pub name: String,
    pub arguments: Vec<String>,
}

impl ModuleSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Vec::new(),
        }
    }

    pub fn with_arguments(name: impl Into<String>, arguments: Vec<String>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    fn write(&self, out: &mut Vec<String>) {
        out.push(self.name.clone());
        out.push(self.arguments.len().to_string());
        out.extend(self.arguments.iter().cloned());
    }

    fn read(reader: &mut ArgReader<'_>) -> Result<Self> {
        let name = reader.next("module name")?.to_string();
        let argc = reader.next_count("module argument count")?;
        let mut arguments = Vec::with_capacity(argc);
        for _ in 0..argc {
            arguments.push(reader.next("module argument")?.to_string());
        }
        Ok(Self { name, arguments })
    }
}

/// Arguments of `ModuleSnippet`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleQuery {
    pub module: ModuleSpec,
}

impl ModuleQuery {
    pub fn to_arguments(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.module.write(&mut out);
        out
    }

    pub fn from_arguments(args: &[String]) -> Result<Self> {
        let mut reader = ArgReader::new(args);
        let module = ModuleSpec::read(&mut reader)?;
        reader.finish()?;
        Ok(Self { module })
    }
}

/// Arguments of `ModuleContextSnippet`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextQuery {
    pub name: String,
    pub modules: Vec<ModuleSpec>,
    /// Keys to report. Empty means every declared binding.
    pub keys: Vec<BindingKey>,
}

impl ContextQuery {
    pub fn to_arguments(&self) -> Vec<String> {
        let mut out = vec![self.name.clone(), self.modules.len().to_string()];
        for module in &self.modules {
            module.write(&mut out);
        }
        out.push(self.keys.len().to_string());
        for key in &self.keys {
            out.push(key.key.clone());
            out.push(key.annotation.clone().unwrap_or_default());
        }
        out
    }

    pub fn from_arguments(args: &[String]) -> Result<Self> {
        let mut reader = ArgReader::new(args);
        let name = reader.next("context name")?.to_string();

        let module_count = reader.next_count("module count")?;
        let mut modules = Vec::with_capacity(module_count);
        for _ in 0..module_count {
            modules.push(ModuleSpec::read(&mut reader)?);
        }

        let key_count = reader.next_count("key count")?;
        let mut keys = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            let key = reader.next("key")?;
            let annotation = reader.next("annotation")?;
            keys.push(BindingKey::new(
                key,
                (!annotation.is_empty()).then_some(annotation),
            ));
        }

        reader.finish()?;
        Ok(Self { name, modules, keys })
    }
}

/// Cursor over positional arguments.
pub struct ArgReader<'a> {
    args: &'a [String],
    pos: usize,
}

impl<'a> ArgReader<'a> {
    pub fn new(args: &'a [String]) -> Self {
        Self { args, pos: 0 }
    }

    pub fn next(&mut self, what: &str) -> Result<&'a str> {
        let arg = self.args.get(self.pos).ok_or_else(|| {
            Error::InvalidArguments(format!("missing {} at position {}", what, self.pos))
        })?;
        self.pos += 1;
        Ok(arg)
    }

    pub fn next_count(&mut self, what: &str) -> Result<usize> {
        let pos = self.pos;
        let raw = self.next(what)?;
        let count: usize = raw.parse().map_err(|_| {
            Error::InvalidArguments(format!("{} at position {} is not a number: {:?}", what, pos, raw))
        })?;
        // Every counted item needs at least one argument.
        if count > self.remaining() {
            return Err(Error::InvalidArguments(format!(
                "{} {} exceeds the {} remaining arguments",
                what,
                count,
                self.remaining()
            )));
        }
        Ok(count)
    }

    pub fn remaining(&self) -> usize {
        self.args.len() - self.pos
    }

    pub fn finish(&self) -> Result<()> {
        if self.remaining() > 0 {
            return Err(Error::InvalidArguments(format!(
                "{} unexpected trailing arguments",
                self.remaining()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_context_query_layout() {
        let query = ContextQuery {
            name: "Working Module Context".to_string(),
            modules: vec![
                ModuleSpec::new("WorkingModule"),
                ModuleSpec::with_arguments("ConfiguredModule", vec!["8080".to_string()]),
            ],
            keys: vec![BindingKey::new("Service", Some("blue")), BindingKey::plain("Other")],
        };

        let args = query.to_arguments();
        assert_eq!(
            args,
            strings(&[
                "Working Module Context",
                "2",
                "WorkingModule",
                "0",
                "ConfiguredModule",
                "1",
                "8080",
                "2",
                "Service",
                "blue",
                "Other",
                "",
            ])
        );
        assert_eq!(ContextQuery::from_arguments(&args).unwrap(), query);
    }

    #[test]
    fn test_empty_context_query() {
        let args = strings(&["Empty", "0", "0"]);
        let query = ContextQuery::from_arguments(&args).unwrap();
        assert!(query.modules.is_empty());
        assert!(query.keys.is_empty());
    }

    #[test]
    fn test_missing_argument() {
        let err = ContextQuery::from_arguments(&strings(&["ctx", "1", "Module"])).unwrap_err();
        assert!(matches!(err, Error::InvalidArguments(_)));
    }

    #[test]
    fn test_bad_count() {
        let err = ModuleQuery::from_arguments(&strings(&["Module", "many"])).unwrap_err();
        assert!(err.to_string().contains("not a number"));
    }

    #[test]
    fn test_huge_count_rejected_before_reading() {
        let err = ContextQuery::from_arguments(&strings(&["ctx", &usize::MAX.to_string(), "Module"]))
            .unwrap_err();
        assert!(err.to_string().contains("exceeds the 1 remaining"));

        let err = ModuleQuery::from_arguments(&strings(&["Module", "4294967296"])).unwrap_err();
        assert!(err.to_string().contains("exceeds the 0 remaining"));
    }

    #[test]
    fn test_trailing_arguments_rejected() {
        let err = ModuleQuery::from_arguments(&strings(&["Module", "0", "extra"])).unwrap_err();
        assert!(err.to_string().contains("trailing"));
    }
}
