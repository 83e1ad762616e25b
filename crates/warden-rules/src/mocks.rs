//! Test doubles for the classifier.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::classifier::{Classifier, Verdict};
use crate::error::{ClassifierError, ClassifierResult};

/// Flags text containing any configured term and counts calls.
#[derive(Debug, Default)]
pub struct ScriptedClassifier {
    terms: Vec<String>,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl ScriptedClassifier {
    pub fn flagging<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            terms: terms.into_iter().map(|t| t.into().to_lowercase()).collect(),
            ..Self::default()
        }
    }

    /// Every call fails with `Unavailable`.
    pub fn failing() -> Self {
        let classifier = Self::default();
        classifier.failing.store(true, Ordering::SeqCst);
        classifier
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, text: &str) -> ClassifierResult<Verdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ClassifierError::Unavailable("scripted failure".to_string()));
        }
        let text = text.to_lowercase();
        let hits: Vec<String> = self
            .terms
            .iter()
            .filter(|term| text.contains(term.as_str()))
            .cloned()
            .collect();
        if hits.is_empty() {
            Ok(Verdict::clean())
        } else {
            Ok(Verdict::flagged(hits))
        }
    }
}
