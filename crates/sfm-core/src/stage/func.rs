//! In-process stage entry points.
//!
//! `FnStage` wraps a Rust closure behind a declared parameter list and binds
//! incoming arguments the way a Python call would, so the invoker's fallback
//! logic behaves the same against native stages as against the bridge.

use super::{ArgValue, Binding, CallError, StageEntry, VAR_KEYWORD_PREFIX, VAR_POSITIONAL_PREFIX};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

type StageBody = dyn Fn(&BoundArgs) -> Result<(), CallError> + Send + Sync;

#[derive(Debug, Clone)]
struct Param {
    name: String,
    required: bool,
}

/// Arguments after binding, keyed by declared parameter name.
#[derive(Debug, Clone, Default)]
pub struct BoundArgs {
    values: HashMap<String, ArgValue>,
    extra_positional: Vec<ArgValue>,
}

impl BoundArgs {
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.get(name)
    }

    pub fn path(&self, name: &str) -> Option<&Path> {
        self.get(name).and_then(ArgValue::as_path)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ArgValue::as_text)
    }

    pub fn conf(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(ArgValue::as_conf)
    }

    /// Positional values collected by a `*args` parameter.
    pub fn extra_positional(&self) -> &[ArgValue] {
        &self.extra_positional
    }

    /// A path argument that must be present; a missing one fails the stage.
    pub fn require_path(&self, name: &str) -> Result<&Path, CallError> {
        self.path(name)
            .ok_or_else(|| CallError::Failed(format!("argument '{}' is not a path", name)))
    }
}

/// A stage implemented by a closure.
pub struct FnStage {
    name: String,
    params: Vec<Param>,
    var_positional: Option<String>,
    var_keyword: Option<String>,
    introspectable: bool,
    presets: HashMap<String, Value>,
    attempts: Mutex<Vec<String>>,
    body: Box<StageBody>,
}

impl FnStage {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&BoundArgs) -> Result<(), CallError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            params: Vec::new(),
            var_positional: None,
            var_keyword: None,
            introspectable: true,
            presets: HashMap::new(),
            attempts: Mutex::new(Vec::new()),
            body: Box::new(body),
        }
    }

    /// Declare a required parameter.
    pub fn param(mut self, name: &str) -> Self {
        self.params.push(Param {
            name: name.to_string(),
            required: true,
        });
        self
    }

    /// Declare a parameter with a default value.
    pub fn optional(mut self, name: &str) -> Self {
        self.params.push(Param {
            name: name.to_string(),
            required: false,
        });
        self
    }

    /// Accept any number of extra positional arguments (`*name`).
    pub fn var_positional(mut self, name: &str) -> Self {
        self.var_positional = Some(name.to_string());
        self
    }

    /// Accept any keyword argument (`**name`).
    pub fn var_keyword(mut self, name: &str) -> Self {
        self.var_keyword = Some(name.to_string());
        self
    }

    /// Hide the parameter list from `parameters()`.
    pub fn opaque(mut self) -> Self {
        self.introspectable = false;
        self
    }

    pub fn with_preset(mut self, key: &str, conf: Value) -> Self {
        self.presets.insert(key.to_string(), conf);
        self
    }

    /// Labels of every binding this stage was called with, in order.
    pub fn attempted(&self) -> Vec<String> {
        self.attempts
            .lock()
            .map(|a| a.clone())
            .unwrap_or_default()
    }

    /// Bind positional then keyword arguments onto the declared parameters.
    pub fn bind(&self, binding: &Binding) -> Result<BoundArgs, CallError> {
        let mismatch = |m: String| CallError::ArgumentMismatch(format!("{}() {}", self.name, m));

        if binding.positional.len() > self.params.len() && self.var_positional.is_none() {
            return Err(mismatch(format!(
                "takes {} positional arguments but {} were given",
                self.params.len(),
                binding.positional.len()
            )));
        }

        let mut values = HashMap::new();
        for (param, value) in self.params.iter().zip(&binding.positional) {
            values.insert(param.name.clone(), value.clone());
        }
        let extra_positional = binding
            .positional
            .iter()
            .skip(self.params.len())
            .cloned()
            .collect();

        for (name, value) in &binding.keyword {
            if self.var_keyword.is_none() && !self.params.iter().any(|p| &p.name == name) {
                return Err(mismatch(format!(
                    "got an unexpected keyword argument '{}'",
                    name
                )));
            }
            if values.insert(name.clone(), value.clone()).is_some() {
                return Err(mismatch(format!("got multiple values for argument '{}'", name)));
            }
        }

        if let Some(missing) = self
            .params
            .iter()
            .find(|p| p.required && !values.contains_key(&p.name))
        {
            return Err(mismatch(format!(
                "missing required argument: '{}'",
                missing.name
            )));
        }

        Ok(BoundArgs {
            values,
            extra_positional,
        })
    }
}

#[async_trait]
impl StageEntry for FnStage {
    fn describe(&self) -> String {
        self.name.clone()
    }

    async fn parameters(&self) -> crate::Result<Option<Vec<String>>> {
        if !self.introspectable {
            return Ok(None);
        }
        let mut names: Vec<String> = self.params.iter().map(|p| p.name.clone()).collect();
        if let Some(name) = &self.var_positional {
            names.push(format!("{}{}", VAR_POSITIONAL_PREFIX, name));
        }
        if let Some(name) = &self.var_keyword {
            names.push(format!("{}{}", VAR_KEYWORD_PREFIX, name));
        }
        Ok(Some(names))
    }

    async fn preset(&self, key: &str) -> crate::Result<Option<Value>> {
        Ok(self.presets.get(key).cloned())
    }

    async fn call(&self, binding: &Binding) -> Result<(), CallError> {
        if let Ok(mut attempts) = self.attempts.lock() {
            attempts.push(binding.label.to_string());
        }
        let args = self.bind(binding)?;
        (self.body)(&args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage() -> FnStage {
        FnStage::new("pairs", |_| Ok(()))
            .param("image_dir")
            .param("output")
            .optional("image_list")
    }

    #[test]
    fn test_bind_positional_and_keyword() {
        let b = Binding::positional("p", vec![ArgValue::path("/imgs")])
            .with_keyword("output", ArgValue::path("/out.txt"));
        let args = stage().bind(&b).unwrap();
        assert_eq!(args.path("image_dir"), Some(Path::new("/imgs")));
        assert_eq!(args.path("output"), Some(Path::new("/out.txt")));
        assert!(args.get("image_list").is_none());
    }

    #[test]
    fn test_bind_rejects_unknown_keyword() {
        let b = Binding::keyword("k", vec![("pairs", ArgValue::path("/p"))]);
        let err = stage().bind(&b).unwrap_err();
        assert!(matches!(err, CallError::ArgumentMismatch(m) if m.contains("'pairs'")));
    }

    #[test]
    fn test_bind_rejects_too_many_positionals() {
        let b = Binding::positional("p", vec![ArgValue::Text("v1".into()); 4]);
        assert!(matches!(stage().bind(&b), Err(CallError::ArgumentMismatch(_))));
    }

    #[test]
    fn test_bind_rejects_duplicates_and_missing() {
        let dup = Binding::positional("p", vec![ArgValue::Text("v1".into())])
            .with_keyword("image_dir", ArgValue::Text("v2".into()));
        assert!(matches!(stage().bind(&dup), Err(CallError::ArgumentMismatch(m)) if m.contains("multiple")));

        let missing = Binding::keyword("k", vec![("image_dir", ArgValue::Text("v1".into()))]);
        assert!(matches!(stage().bind(&missing), Err(CallError::ArgumentMismatch(m)) if m.contains("'output'")));
    }

    #[tokio::test]
    async fn test_opaque_hides_signature() {
        let s = stage().opaque();
        assert_eq!(s.parameters().await.unwrap(), None);
        assert_eq!(
            stage().parameters().await.unwrap(),
            Some(vec!["image_dir".into(), "output".into(), "image_list".into()])
        );
    }

    #[tokio::test]
    async fn test_variadic_parameters() {
        let s = FnStage::new("wrapper", |_| Ok(()))
            .param("conf")
            .var_positional("args")
            .var_keyword("kwargs");
        assert_eq!(
            s.parameters().await.unwrap(),
            Some(vec!["conf".into(), "*args".into(), "**kwargs".into()])
        );

        let b = Binding::positional("p", vec![ArgValue::Text("c".into()), ArgValue::path("/x")])
            .with_keyword("anything", ArgValue::path("/y"));
        let args = s.bind(&b).unwrap();
        assert_eq!(args.text("conf"), Some("c"));
        assert_eq!(args.extra_positional(), &[ArgValue::path("/x")]);
        assert_eq!(args.path("anything"), Some(Path::new("/y")));
    }

    #[tokio::test]
    async fn test_call_records_attempts() {
        let s = stage();
        let b = Binding::keyword("nope", vec![("bogus", ArgValue::Text("v0".into()))]);
        assert!(s.call(&b).await.is_err());
        assert_eq!(s.attempted(), vec!["nope".to_string()]);
    }
}
