//! Operation catalog loaded from the bundled document.

use anyhow::{Context, Result};
use cliforge_core::traits::OperationCatalog;
use cliforge_core::types::OperationSpec;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    operations: Vec<OperationSpec>,
}

pub struct StaticCatalog {
    operations: Vec<OperationSpec>,
}

impl StaticCatalog {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let file: CatalogFile =
            serde_yaml::from_str(raw).context("failed to parse operation catalog")?;
        Ok(Self {
            operations: file.operations,
        })
    }

    pub fn empty() -> Self {
        Self {
            operations: Vec::new(),
        }
    }
}

impl OperationCatalog for StaticCatalog {
    fn operations(&self) -> &[OperationSpec] {
        &self.operations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_catalog_parses() {
        let catalog = StaticCatalog::from_yaml(include_str!("../assets/operations.yaml")).unwrap();
        assert_eq!(catalog.operations().len(), 3);
        let deploy = catalog.find("deployProject").unwrap();
        assert!(deploy.workflow.is_some());
        assert!(deploy.watch.is_some());
        assert_eq!(deploy.cli_command.as_deref(), Some("projects-deploy"));
    }
}
