//! Stage entry points implemented in Python and reached through the bridge.

use super::bridge::ensure_bridge_deployed;
use super::subprocess::run_bridge;
use super::{Binding, CallError, StageEntry, StageSet};
use crate::config::BridgeConfig;
use crate::{Result, SfmError};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A Python function (`module.function`) called in a fresh interpreter.
#[derive(Debug, Clone)]
pub struct PythonStage {
    python: PathBuf,
    script: PathBuf,
    module: String,
    function: String,
}

impl PythonStage {
    /// `script` must be a deployed bridge (see [`hloc_stage_set`]).
    pub fn new(python: impl Into<PathBuf>, script: impl Into<PathBuf>, module: &str) -> Self {
        Self {
            python: python.into(),
            script: script.into(),
            module: module.to_string(),
            function: BridgeConfig::ENTRY_FUNCTION.to_string(),
        }
    }

    fn qualified_name(&self) -> String {
        format!("{}.{}", self.module, self.function)
    }

    /// JSON payload for the `call` sub-command.
    fn call_payload(binding: &Binding) -> Result<String> {
        let keyword: Map<String, Value> = binding
            .keyword
            .iter()
            .map(|(k, v)| -> Result<(String, Value)> { Ok((k.clone(), serde_json::to_value(v)?)) })
            .collect::<Result<_>>()?;
        let payload = json!({
            "positional": binding.positional,
            "keyword": keyword,
        });
        Ok(payload.to_string())
    }
}

#[async_trait]
impl StageEntry for PythonStage {
    fn describe(&self) -> String {
        self.qualified_name()
    }

    async fn parameters(&self) -> Result<Option<Vec<String>>> {
        let label = format!("{} signature", self.qualified_name());
        let output = run_bridge(
            &self.python,
            &self.script,
            &["signature", "--module", &self.module, "--function", &self.function],
            None,
            &label,
        )
        .await?;

        if !output.status.success() {
            return Err(SfmError::Bridge {
                message: format!("{}: {}", label, output.failure_message()),
            });
        }
        match output.reply("signature") {
            Some(reply) => Ok(reply.params.clone()),
            None => Err(SfmError::Bridge {
                message: format!("{}: no signature reply", label),
            }),
        }
    }

    async fn preset(&self, key: &str) -> Result<Option<Value>> {
        let label = format!("{} preset {}", self.module, key);
        let output = run_bridge(
            &self.python,
            &self.script,
            &["preset", "--module", &self.module, "--key", key],
            None,
            &label,
        )
        .await?;

        if !output.status.success() {
            return Err(SfmError::Bridge {
                message: format!("{}: {}", label, output.failure_message()),
            });
        }
        Ok(output
            .reply("preset")
            .and_then(|r| r.conf.clone())
            .filter(|c| !c.is_null()))
    }

    async fn call(&self, binding: &Binding) -> std::result::Result<(), CallError> {
        let payload = Self::call_payload(binding).map_err(|e| CallError::Failed(e.to_string()))?;
        let label = self.qualified_name();
        let output = run_bridge(
            &self.python,
            &self.script,
            &["call", "--module", &self.module, "--function", &self.function],
            Some(payload),
            &label,
        )
        .await
        .map_err(|e| CallError::Failed(e.to_string()))?;

        if output.status.success() {
            return Ok(());
        }
        if output.status.code() == Some(BridgeConfig::ARGUMENT_MISMATCH_EXIT)
            || output.reply("argument_mismatch").is_some()
        {
            return Err(CallError::ArgumentMismatch(output.failure_message()));
        }
        Err(CallError::Failed(format!(
            "{}: {}",
            label,
            output.failure_message()
        )))
    }
}

/// Deploy the bridge into `bridge_dir` and build the four hloc stages.
pub fn hloc_stage_set(python: &Path, bridge_dir: &Path) -> Result<StageSet> {
    let script = ensure_bridge_deployed(bridge_dir)?;
    let stage = |module: &str| -> Arc<dyn StageEntry> {
        Arc::new(PythonStage::new(python, &script, module))
    };

    Ok(StageSet {
        pairing: stage(BridgeConfig::PAIRING_MODULE),
        extraction: stage(BridgeConfig::EXTRACTION_MODULE),
        matching: stage(BridgeConfig::MATCHING_MODULE),
        reconstruction: stage(BridgeConfig::RECONSTRUCTION_MODULE),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::ArgValue;
    use tempfile::TempDir;

    #[test]
    fn test_call_payload_shape() {
        let binding = Binding::positional("mixed", vec![ArgValue::Conf(json!({"output": "m"}))])
            .with_keyword("features", ArgValue::Text("feats-superpoint".into()));
        let payload: Value =
            serde_json::from_str(&PythonStage::call_payload(&binding).unwrap()).unwrap();

        assert_eq!(payload["positional"][0]["type"], "conf");
        assert_eq!(payload["positional"][0]["value"]["output"], "m");
        assert_eq!(payload["keyword"]["features"]["type"], "text");
        assert_eq!(payload["keyword"]["features"]["value"], "feats-superpoint");
    }

    #[test]
    fn test_hloc_stage_set_names() {
        let temp = TempDir::new().unwrap();
        let set = hloc_stage_set(Path::new("python3"), temp.path()).unwrap();
        assert_eq!(set.pairing.describe(), "hloc.pairs_from_exhaustive.main");
        assert_eq!(set.reconstruction.describe(), "hloc.reconstruction.main");
        assert!(temp.path().join("stage_bridge.py").exists());
    }

    #[tokio::test]
    async fn test_missing_interpreter_fails_call() {
        let stage = PythonStage::new("/nonexistent/python", "/nonexistent/bridge.py", "hloc.x");
        let err = stage
            .call(&Binding::positional("p", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Failed(_)));
    }
}
