//! Named-key settings store used by the administrative commands.
//!
//! The file is TOML; tables are flattened so that
//!
//! ```toml
//! [admin]
//! name = "Gateway admin"
//! ```
//!
//! is looked up as `admin/name`.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};

pub trait Settings: Send + Sync + std::fmt::Debug {
    fn get(&self, key: &str) -> Option<String>;

    fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }
}

/// Flattened view of a TOML document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TomlSettings {
    values: BTreeMap<String, String>,
}

impl TomlSettings {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn parse(content: &str) -> Result<Self> {
        let table: toml::Table = content.parse().context("invalid settings file")?;
        let mut values = BTreeMap::new();
        flatten("", &table, &mut values);
        Ok(Self { values })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn flatten(prefix: &str, table: &toml::Table, out: &mut BTreeMap<String, String>) {
    for (key, value) in table {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}/{key}")
        };
        match value {
            toml::Value::Table(inner) => flatten(&name, inner, out),
            toml::Value::String(s) => {
                out.insert(name, s.clone());
            }
            other => {
                out.insert(name, other.to_string());
            }
        }
    }
}

impl Settings for TomlSettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn nested_tables_flatten_to_slash_keys() {
        let settings = TomlSettings::parse(
            r#"
            top = "level"
            [admin]
            name = "Gateway admin"
            port = 6667
            [admin.extra]
            flag = true
            "#,
        )
        .unwrap();
        assert_eq!(settings.get("top").as_deref(), Some("level"));
        assert_eq!(settings.get("admin/name").as_deref(), Some("Gateway admin"));
        assert_eq!(settings.get("admin/port").as_deref(), Some("6667"));
        assert_eq!(settings.get("admin/extra/flag").as_deref(), Some("true"));
        assert_eq!(settings.get_or("admin/email", "none"), "none");
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[admin]\nemail = \"root@localhost\"").unwrap();
        let settings = TomlSettings::load(file.path()).unwrap();
        assert_eq!(settings.len(), 1);
        assert_eq!(settings.get_or("admin/email", ""), "root@localhost");
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(TomlSettings::parse("this is = = not toml").is_err());
        assert!(TomlSettings::load(Path::new("/nonexistent/settings.toml")).is_err());
    }
}
