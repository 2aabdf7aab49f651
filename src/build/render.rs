//! Placeholder substitution for option templates.
//!
//! Templates are JSON objects whose string values may contain `{TOKEN}`
//! placeholders. Rendering is pure: the template is never modified and the
//! same template and job always yield the same document.

use camino::Utf8Path;
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use serde_json::{Map, Value};

use super::BuildError;
use super::config::BuildJob;

/// Template for the compiler options document.
pub const BUILD_TEMPLATE: &str = "build.bff";

/// Template for the macro overrides document.
pub const MACROS_TEMPLATE: &str = "macros.json";

/// Placeholders understood by [`ConfigRenderer`], in substitution order.
pub const PLACEHOLDERS: [&str; 6] = [
    "{BUILD_PATH}",
    "{YOYO_ID}",
    "{RUNTIME_VERSION}",
    "{PROJECT_NAME}",
    "{USERNAME}",
    "{CONFIG}",
];

/// Ordered mapping of option keys to values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateDocument {
    entries: Map<String, Value>,
}

impl TemplateDocument {
    /// Parses a template from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Template`] when the text is not a JSON object.
    pub fn parse(name: &str, text: &str) -> Result<Self, BuildError> {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(entries)) => Ok(Self { entries }),
            Ok(_) => Err(template_error(name, "expected a JSON object")),
            Err(err) => Err(template_error(name, &err.to_string())),
        }
    }

    /// Reads and parses the template `name` from `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Template`] when the file cannot be read or
    /// parsed.
    pub fn load(dir: &Utf8Path, name: &str) -> Result<Self, BuildError> {
        let text = crate::fs::read_to_string(&dir.join(name))
            .map_err(|err| template_error(name, &format!("{dir}: {err}")))?;
        Self::parse(name, &text)
    }

    /// Looks up the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Iterates over entries in document order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    /// Serialises the document as JSON indented by four spaces.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Template`] when serialisation fails.
    pub fn to_pretty_json(&self, name: &str) -> Result<String, BuildError> {
        let mut buffer = Vec::new();
        let mut serializer =
            Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(b"    "));
        self.entries
            .serialize(&mut serializer)
            .map_err(|err| template_error(name, &err.to_string()))?;
        String::from_utf8(buffer).map_err(|err| template_error(name, &err.to_string()))
    }
}

impl FromIterator<(String, Value)> for TemplateDocument {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

fn template_error(name: &str, message: &str) -> BuildError {
    BuildError::Template {
        name: name.to_owned(),
        message: message.to_owned(),
    }
}

/// Templates rendered during option staging.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Templates {
    /// Compiler options template.
    pub build: TemplateDocument,
    /// Macro overrides template.
    pub macros: TemplateDocument,
}

impl Templates {
    /// Loads both templates from `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Template`] when either template is missing or
    /// malformed.
    pub fn load(dir: &Utf8Path) -> Result<Self, BuildError> {
        Ok(Self {
            build: TemplateDocument::load(dir, BUILD_TEMPLATE)?,
            macros: TemplateDocument::load(dir, MACROS_TEMPLATE)?,
        })
    }
}

/// Substitutes build values for placeholders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigRenderer {
    values: [(&'static str, String); 6],
}

impl ConfigRenderer {
    /// Builds a renderer from explicit placeholder values.
    #[must_use]
    pub fn new(
        build_path: impl Into<String>,
        yoyo_id: impl Into<String>,
        runtime_version: impl Into<String>,
        project_name: impl Into<String>,
        username: impl Into<String>,
        configuration: impl Into<String>,
    ) -> Self {
        let [build, yoyo, runtime, project, user, config] = PLACEHOLDERS;
        Self {
            values: [
                (build, build_path.into()),
                (yoyo, yoyo_id.into()),
                (runtime, runtime_version.into()),
                (project, project_name.into()),
                (user, username.into()),
                (config, configuration.into()),
            ],
        }
    }

    /// Builds a renderer from a job's values.
    #[must_use]
    pub fn for_job(job: &BuildJob) -> Self {
        Self::new(
            job.output_folder.as_str(),
            job.yoyo_id.as_str(),
            job.runtime_version.as_str(),
            job.project_name.as_str(),
            job.git.username.as_str(),
            job.configuration.as_str(),
        )
    }

    /// Replaces every known placeholder in `value`. Substitutions run in a
    /// fixed order, each over the output of the previous one; unknown
    /// placeholders are left as they are.
    #[must_use]
    pub fn render_value(&self, value: &str) -> String {
        self.values
            .iter()
            .fold(value.to_owned(), |acc, (token, replacement)| {
                acc.replace(*token, replacement)
            })
    }

    /// Produces a resolved copy of `template`. Only top-level string values
    /// are substituted; other values are copied unchanged.
    #[must_use]
    pub fn render(&self, template: &TemplateDocument) -> TemplateDocument {
        template
            .iter()
            .map(|(key, value)| {
                let resolved = match value {
                    Value::String(text) => Value::String(self.render_value(text)),
                    other => other.clone(),
                };
                (key.clone(), resolved)
            })
            .collect()
    }
}
