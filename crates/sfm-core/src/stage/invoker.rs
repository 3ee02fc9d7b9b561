//! Adaptive stage invocation.
//!
//! Given the declared parameter names of an entry point, the first keyword
//! binding that fits is called first. When no keyword binding fits, a
//! positional binding is chosen (a hinted one if its hint matches, otherwise
//! the unhinted default). An argument mismatch moves on to every remaining
//! binding in list order, fitting or not. Each binding is attempted at most
//! once and the chain ends with `InterfaceMismatch`.
//!
//! Without a declared signature every binding is attempted in list order.

use super::{Binding, CallError, StageEntry, StageKind};
use crate::{Result, SfmError};
use tracing::{debug, info};

/// Record of a successful invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Label of the binding that succeeded.
    pub binding: String,
    /// Labels of every binding attempted, in order, including the winner.
    pub attempted: Vec<String>,
    pub signature_known: bool,
}

/// Order in which `bindings` will be attempted against `params`.
pub fn plan_attempts(bindings: &[Binding], params: Option<&[String]>) -> Vec<usize> {
    let Some(params) = params else {
        return (0..bindings.len()).collect();
    };

    let selected = bindings
        .iter()
        .position(|b| b.is_keyword() && b.fits(params))
        .or_else(|| positional_default(bindings, params));

    let mut order: Vec<usize> = selected.into_iter().collect();
    order.extend((0..bindings.len()).filter(|i| Some(*i) != selected));
    order
}

fn positional_default(bindings: &[Binding], params: &[String]) -> Option<usize> {
    let positional = || bindings.iter().enumerate().filter(|(_, b)| !b.is_keyword());

    positional()
        .find(|(_, b)| b.hint_matches(params))
        .or_else(|| positional().find(|(_, b)| b.hint.is_none()))
        .or_else(|| positional().next())
        .map(|(i, _)| i)
}

/// Call `entry` with the first binding it accepts.
///
/// Non-mismatch failures are returned immediately as `StageFailed`.
pub async fn invoke_stage(
    stage: StageKind,
    entry: &dyn StageEntry,
    bindings: &[Binding],
) -> Result<Invocation> {
    if bindings.is_empty() {
        return Err(SfmError::Config {
            message: format!("no candidate bindings for the {} stage", stage),
        });
    }

    let params = entry.parameters().await?;
    match &params {
        Some(p) => debug!("{} ({}) declares parameters: {:?}", stage, entry.describe(), p),
        None => debug!("{} ({}) signature not introspectable", stage, entry.describe()),
    }

    let order = plan_attempts(bindings, params.as_deref());
    let mut attempted = Vec::with_capacity(order.len());
    let mut last_mismatch = String::new();

    for index in order {
        let binding = &bindings[index];
        attempted.push(binding.label.to_string());
        debug!("{}: trying binding {}", stage, binding.label);

        match entry.call(binding).await {
            Ok(()) => {
                if attempted.len() > 1 {
                    info!(
                        "{} stage accepted binding {} after {} attempts",
                        stage,
                        binding.label,
                        attempted.len()
                    );
                }
                return Ok(Invocation {
                    binding: binding.label.to_string(),
                    attempted,
                    signature_known: params.is_some(),
                });
            }
            Err(CallError::ArgumentMismatch(message)) => {
                debug!("{}: binding {} rejected: {}", stage, binding.label, message);
                last_mismatch = message;
            }
            Err(CallError::Failed(message)) => {
                return Err(SfmError::StageFailed { stage, message });
            }
        }
    }

    Err(SfmError::InterfaceMismatch {
        stage,
        attempted,
        message: last_mismatch,
    })
}
