//! External pipeline stages and the adaptive invoker that calls them.
//!
//! A stage is an opaque entry point whose parameter names are not known
//! ahead of time. Each stage is described by an ordered list of typed
//! [`Binding`]s; the [`invoker`] picks the one matching the declared
//! signature and falls back through the rest on argument mismatches.

pub mod bindings;
mod bridge;
pub mod func;
pub mod invoker;
pub mod python;
mod subprocess;

pub use bindings::{
    extraction_bindings, matching_bindings, pairing_bindings, reconstruction_bindings,
};
pub use func::{BoundArgs, FnStage};
pub use invoker::{invoke_stage, Invocation};
pub use python::PythonStage;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The four stages of the pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Pairing,
    Extraction,
    Matching,
    Reconstruction,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [
        StageKind::Pairing,
        StageKind::Extraction,
        StageKind::Matching,
        StageKind::Reconstruction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Pairing => "pairing",
            StageKind::Extraction => "extraction",
            StageKind::Matching => "matching",
            StageKind::Reconstruction => "reconstruction",
        }
    }

    /// 1-based position in the pipeline.
    pub fn step(&self) -> usize {
        match self {
            StageKind::Pairing => 1,
            StageKind::Extraction => 2,
            StageKind::Matching => 3,
            StageKind::Reconstruction => 4,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete argument value handed to a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ArgValue {
    Path(PathBuf),
    Text(String),
    /// Stage configuration object.
    Conf(Value),
}

impl ArgValue {
    pub fn path(p: impl AsRef<Path>) -> Self {
        ArgValue::Path(p.as_ref().to_path_buf())
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            ArgValue::Path(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ArgValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_conf(&self) -> Option<&Value> {
        match self {
            ArgValue::Conf(v) => Some(v),
            _ => None,
        }
    }
}

/// Prefix of a declared `*args` parameter.
pub const VAR_POSITIONAL_PREFIX: &str = "*";
/// Prefix of a declared `**kwargs` parameter.
pub const VAR_KEYWORD_PREFIX: &str = "**";

/// Selects a positional binding by looking at the name of one declared
/// parameter, e.g. "the first parameter mentions `list`".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamHint {
    pub index: usize,
    pub contains: &'static str,
}

/// One way of calling a stage: positional values followed by keyword values.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub label: &'static str,
    pub positional: Vec<ArgValue>,
    pub keyword: Vec<(String, ArgValue)>,
    /// Only meaningful for purely positional bindings.
    pub hint: Option<ParamHint>,
}

impl Binding {
    pub fn keyword(label: &'static str, args: Vec<(&str, ArgValue)>) -> Self {
        Self {
            label,
            positional: Vec::new(),
            keyword: args.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            hint: None,
        }
    }

    pub fn positional(label: &'static str, args: Vec<ArgValue>) -> Self {
        Self {
            label,
            positional: args,
            keyword: Vec::new(),
            hint: None,
        }
    }

    pub fn with_keyword(mut self, name: &str, value: ArgValue) -> Self {
        self.keyword.push((name.to_string(), value));
        self
    }

    pub fn with_hint(mut self, index: usize, contains: &'static str) -> Self {
        self.hint = Some(ParamHint { index, contains });
        self
    }

    /// True when the binding names at least one parameter.
    pub fn is_keyword(&self) -> bool {
        !self.keyword.is_empty()
    }

    pub fn keyword_names(&self) -> impl Iterator<Item = &str> {
        self.keyword.iter().map(|(k, _)| k.as_str())
    }

    /// Static compatibility against a declared parameter list: every keyword
    /// is declared (or absorbed by `**kwargs`), none collides with a
    /// positional slot, and the positionals fit (or `*args` takes the rest).
    ///
    /// Variadic parameters are spelled `*name` and `**name`.
    pub fn fits(&self, params: &[String]) -> bool {
        let named: Vec<&str> = params
            .iter()
            .map(String::as_str)
            .filter(|p| !p.starts_with(VAR_POSITIONAL_PREFIX))
            .collect();
        let var_keyword = params.iter().any(|p| p.starts_with(VAR_KEYWORD_PREFIX));
        let var_positional = params
            .iter()
            .any(|p| p.starts_with(VAR_POSITIONAL_PREFIX) && !p.starts_with(VAR_KEYWORD_PREFIX));

        if self.positional.len() > named.len() && !var_positional {
            return false;
        }
        let positional_slots = &named[..self.positional.len().min(named.len())];
        self.keyword_names()
            .all(|name| !positional_slots.contains(&name) && (var_keyword || named.contains(&name)))
    }

    /// Whether this positional binding's hint matches the declared parameters.
    pub fn hint_matches(&self, params: &[String]) -> bool {
        match self.hint {
            Some(hint) => params
                .get(hint.index)
                .map(|p| p.contains(hint.contains))
                .unwrap_or(false),
            None => false,
        }
    }
}

/// Failure of a single call attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The arguments did not bind to the entry point's parameters.
    ArgumentMismatch(String),
    /// The stage ran and failed.
    Failed(String),
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::ArgumentMismatch(m) => write!(f, "argument mismatch: {}", m),
            CallError::Failed(m) => f.write_str(m),
        }
    }
}

/// A callable stage entry point.
#[async_trait]
pub trait StageEntry: Send + Sync {
    /// Human-readable name used in logs.
    fn describe(&self) -> String;

    /// Declared parameter names in order, or `None` when the entry point
    /// cannot be introspected. Variadic parameters carry their `*`/`**`
    /// prefix.
    async fn parameters(&self) -> crate::Result<Option<Vec<String>>>;

    /// Look up a named configuration preset shipped with the stage.
    async fn preset(&self, _key: &str) -> crate::Result<Option<Value>> {
        Ok(None)
    }

    /// Invoke the entry point with one binding.
    async fn call(&self, binding: &Binding) -> Result<(), CallError>;
}

/// The four entry points a pipeline run needs.
#[derive(Clone)]
pub struct StageSet {
    pub pairing: Arc<dyn StageEntry>,
    pub extraction: Arc<dyn StageEntry>,
    pub matching: Arc<dyn StageEntry>,
    pub reconstruction: Arc<dyn StageEntry>,
}

impl StageSet {
    pub fn get(&self, kind: StageKind) -> &Arc<dyn StageEntry> {
        match kind {
            StageKind::Pairing => &self.pairing,
            StageKind::Extraction => &self.extraction,
            StageKind::Matching => &self.matching,
            StageKind::Reconstruction => &self.reconstruction,
        }
    }
}

impl fmt::Debug for StageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageSet")
            .field("pairing", &self.pairing.describe())
            .field("extraction", &self.extraction.describe())
            .field("matching", &self.matching.describe())
            .field("reconstruction", &self.reconstruction.describe())
            .finish()
    }
}
