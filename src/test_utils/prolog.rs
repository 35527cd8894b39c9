//! Canned prolog execution for tests.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use crate::core::VelocityError;
use crate::resolver::PrologRunner;

/// Returns configured assignments per image and records every call.
///
/// Images without configured output produce no assignments.
#[derive(Debug, Default)]
pub struct ScriptedPrologRunner {
    outputs: BTreeMap<String, Result<BTreeMap<String, String>, String>>,
    calls: Mutex<Vec<(String, BTreeMap<String, String>)>>,
}

impl ScriptedPrologRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the prolog of `image` print `pairs`.
    #[must_use]
    pub fn with_output(mut self, image: &str, pairs: &[(&str, &str)]) -> Self {
        let values = pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        self.outputs.insert(image.to_string(), Ok(values));
        self
    }

    /// Make the prolog of `image` fail with `reason`.
    #[must_use]
    pub fn with_failure(mut self, image: &str, reason: &str) -> Self {
        self.outputs.insert(image.to_string(), Err(reason.to_string()));
        self
    }

    /// Images whose prolog ran, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.iter().map(|(image, _)| image.clone()).collect()).unwrap_or_default()
    }

    /// Environment the prolog of `image` last ran with.
    #[must_use]
    pub fn env_of(&self, image: &str) -> Option<BTreeMap<String, String>> {
        let calls = self.calls.lock().ok()?;
        calls.iter().rev().find(|(i, _)| i == image).map(|(_, env)| env.clone())
    }
}

impl PrologRunner for ScriptedPrologRunner {
    fn run(
        &self,
        image: &str,
        _script: &str,
        env: &BTreeMap<String, String>,
        _workdir: Option<&Path>,
    ) -> Result<BTreeMap<String, String>, VelocityError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((image.to_string(), env.clone()));
        }
        match self.outputs.get(image) {
            Some(Ok(values)) => Ok(values.clone()),
            Some(Err(reason)) => Err(VelocityError::PrologExecution {
                image: image.to_string(),
                reason: reason.clone(),
            }),
            None => Ok(BTreeMap::new()),
        }
    }
}
