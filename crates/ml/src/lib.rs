mod fallback;

use std::sync::Arc;

use civic_core::{classify_intent, Intent};
use civic_retrieval::EmbeddingModel;

pub use fallback::{HashEmbeddingModel, DEFAULT_EMBEDDING_DIMS};

#[derive(Debug, Clone, PartialEq)]
pub struct IntentPrediction {
    pub intent: Intent,
    pub confidence: f32,
    pub model: &'static str,
}

/// Any classifier must keep the `(intent, confidence)` contract: one of the
/// four intents plus a confidence in `[0, 1]`.
pub trait IntentClassifier: Send + Sync {
    fn predict(&self, text: &str) -> IntentPrediction;
}

#[derive(Debug, Default)]
pub struct RuleIntentClassifier;

impl IntentClassifier for RuleIntentClassifier {
    fn predict(&self, text: &str) -> IntentPrediction {
        let (intent, confidence) = classify_intent(text);
        IntentPrediction {
            intent,
            confidence,
            model: "keyword-rules",
        }
    }
}

#[derive(Clone)]
pub struct CivicMlStack {
    pub embedder: Arc<dyn EmbeddingModel>,
    pub classifier: Arc<dyn IntentClassifier>,
}

impl CivicMlStack {
    pub fn load_default() -> Self {
        Self {
            embedder: Arc::new(HashEmbeddingModel::default()),
            classifier: Arc::new(RuleIntentClassifier),
        }
    }
}
