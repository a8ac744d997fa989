//! Driver that prints the operation instead of running it.

use std::io::Write;

use anyhow::Context;

use super::{DiagnosticBuffer, Driver, Operation};
use crate::context::BindMount;

pub const DRIVER_NAME: &str = "debug";

#[derive(Debug, Clone)]
pub struct DebugDriver {
    mount: Option<BindMount>,
    diagnostics: DiagnosticBuffer,
}

impl DebugDriver {
    pub fn new(mount: Option<BindMount>, diagnostics: DiagnosticBuffer) -> Self {
        Self { mount, diagnostics }
    }
}

impl Driver for DebugDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn handles(&self, _image_type: &str) -> bool {
        true
    }

    fn run(&self, operation: &Operation, out: &mut dyn Write) -> anyhow::Result<()> {
        if let Some(mount) = &self.mount {
            let mut diagnostics = self.diagnostics.clone();
            writeln!(
                diagnostics,
                "bind mount {} -> {}",
                mount.source.display(),
                mount.target.display()
            )?;
        }
        let rendered =
            serde_json::to_string_pretty(operation).context("Failed to render operation")?;
        writeln!(out, "{rendered}").context("Failed to write operation")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::Bundle;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    #[test]
    fn test_prints_operation_as_json() {
        let bundle = Bundle::from_json(
            r#"{"name":"shop","version":"1.0.0","invocationImages":[{"image":"example/shop:1"}]}"#,
        )
        .unwrap();
        let operation = Operation {
            installation: "shop".into(),
            action: "upgrade".into(),
            revision: "abc".into(),
            image: bundle.invocation_images[0].clone(),
            bundle,
            parameters: BTreeMap::new(),
            environment: BTreeMap::new(),
            files: BTreeMap::new(),
        };
        let diagnostics = DiagnosticBuffer::new();
        let driver = DebugDriver::new(
            Some(BindMount {
                source: PathBuf::from("/var/run/docker.sock"),
                target: PathBuf::from("/var/run/docker.sock"),
            }),
            diagnostics.clone(),
        );

        let mut out = Vec::new();
        driver.run(&operation, &mut out).unwrap();

        let printed: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(printed["installation"], "shop");
        assert_eq!(printed["action"], "upgrade");
        assert!(diagnostics.contents().contains("bind mount"));
    }
}
