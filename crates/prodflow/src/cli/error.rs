//! Operator-facing errors.
//!
//! Every error carries what went wrong, optionally what was being done, and
//! concrete next steps.

use prodflow::ProdError;
use prodflow_catalog::LockError;
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// An error with helpful context and suggestions
#[derive(Debug, Serialize)]
pub struct HelpfulError {
    pub message: String,
    pub context: Option<String>,
    pub suggestions: Vec<String>,
}

impl HelpfulError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_suggestions(
        mut self,
        suggestions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.suggestions.extend(suggestions.into_iter().map(Into::into));
        self
    }

    pub fn file_not_found(path: &Path) -> Self {
        Self::new(format!("File not found: {}", path.display()))
            .with_context("The specified file does not exist")
            .with_suggestion(format!("TRY: Check if the file exists: ls -la {}", path.display()))
    }

    /// Map a library error to a message with next steps.
    pub fn from_prod(err: ProdError, doing: &str) -> Self {
        let base = Self::new(err.to_string()).with_context(doing.to_string());
        match &err {
            ProdError::UnknownDatasetType(_) => base.with_suggestion(
                "TRY: prodflow topology   # list the dataset types this installation knows",
            ),
            ProdError::InvalidRunSelection(_) | ProdError::RunNumberOverflow(_) => base
                .with_suggestions([
                    "TRY: Give one run, two runs for an inclusive range, or three or more runs",
                    "TRY: --runlist <file> reads every integer in the file as a run",
                ]),
            ProdError::CatalogUnavailable(_) => base.with_suggestions([
                "TRY: prodflow config   # check catalog_path",
                "TRY: Retry later; nothing was resolved or written",
            ]),
            ProdError::CatalogQuery(_) => base.with_suggestions([
                "TRY: Raise query_timeout_secs in config.toml if the catalog is slow",
                "TRY: Narrow the run selection",
            ]),
            ProdError::InvalidRule(_) | ProdError::Config(_) => {
                base.with_suggestion("TRY: Check the rule file against the documented fields")
            }
            ProdError::CyclicTopology(_) => {
                base.with_suggestion("TRY: Check topology_file for entries that feed each other")
            }
            ProdError::Lock(LockError::Locked { path, .. }) => base.with_suggestions([
                "TRY: Wait for the other operation to finish".to_string(),
                format!("TRY: Remove the lock if it is stale: rm {}", path.display()),
            ]),
            ProdError::Io { path, .. } => base.with_suggestion(format!(
                "TRY: Check permissions: ls -la {}",
                path.display()
            )),
            _ => base,
        }
    }
}

impl fmt::Display for HelpfulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.message)?;

        if let Some(ctx) = &self.context {
            writeln!(f, "CONTEXT: {}", ctx)?;
        }

        if !self.suggestions.is_empty() {
            writeln!(f)?;
            for suggestion in &self.suggestions {
                writeln!(f, "  {}", suggestion)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for HelpfulError {}

/// Print an error as a JSON object on stdout.
pub fn print_json_error(err: &anyhow::Error) {
    let value = match err.downcast_ref::<HelpfulError>() {
        Some(helpful) => serde_json::json!({ "error": helpful }),
        None => serde_json::json!({ "error": { "message": format!("{:#}", err) } }),
    };
    println!("{}", value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use prodflow_catalog::CatalogError;

    #[test]
    fn display_lists_suggestions() {
        let err = HelpfulError::new("Something failed")
            .with_context("while testing")
            .with_suggestion("TRY: again");
        let text = err.to_string();
        assert!(text.contains("ERROR: Something failed"));
        assert!(text.contains("CONTEXT: while testing"));
        assert!(text.contains("  TRY: again"));
    }

    #[test]
    fn unavailable_catalog_points_at_config() {
        let err = HelpfulError::from_prod(
            ProdError::CatalogUnavailable(CatalogError::unavailable("no route")),
            "resolving DST_CALO",
        );
        assert!(err.message.contains("no route"));
        assert!(err.suggestions.iter().any(|s| s.contains("prodflow config")));
    }
}
