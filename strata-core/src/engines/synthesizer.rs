//! Query-time knowledge synthesis over L4: metadata-first retrieval,
//! similarity thresholding, conflict surfacing, LLM synthesis, and a small
//! bounded cache.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::llm::{GenerateOptions, LlmClient};
use crate::models::{KnowledgeDocument, KnowledgeQuery, KnowledgeType};
use crate::storage::filter::join_clauses;
use crate::tiers::{KnowledgeHit, SemanticMemoryTier};

/// Synthesizer configuration.
#[derive(Debug, Clone)]
pub struct SynthesizerConfig {
    /// Relevance floor applied to scored candidates
    pub similarity_threshold: f64,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub max_results: usize,
    /// Metadata tag marking a document as conflicting
    pub conflict_tag: String,
    /// Annotate conflicts in the synthesis prompt
    pub explain_conflicts: bool,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            cache_ttl: Duration::from_secs(3600),
            cache_capacity: 100,
            max_results: 5,
            conflict_tag: "CONFLICT_DETECTED".to_string(),
            explain_conflicts: true,
        }
    }
}

/// A detected conflict among retrieved documents.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "conflict_type")]
pub enum Conflict {
    /// Document explicitly tagged as conflicting
    Tagged { doc_id: String, title: String },
    /// Two recommendation documents with opposing polarity
    ContradictoryRecommendations {
        doc_ids: [String; 2],
        titles: [String; 2],
    },
}

/// Result of one synthesis call.
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisResult {
    pub status: String,
    pub synthesized_text: String,
    /// `cache`, `synthesis`, or `fallback`
    pub source: String,
    pub candidates: usize,
    pub has_conflicts: bool,
    pub conflicts: Vec<Conflict>,
    pub elapsed_ms: u128,
    pub cache_key: String,
}

struct CacheEntry {
    text: String,
    inserted_at: Instant,
}

/// Synthesizes query-specific answers from L4 knowledge documents.
pub struct KnowledgeSynthesizer {
    l4: Arc<SemanticMemoryTier>,
    llm: Arc<LlmClient>,
    cache: Mutex<LruCache<u64, CacheEntry>>,
    config: SynthesizerConfig,
}

impl KnowledgeSynthesizer {
    /// # Panics
    ///
    /// Never panics; the capacity is forced non-zero.
    #[must_use]
    #[allow(clippy::missing_panics_doc)]
    pub fn new(l4: Arc<SemanticMemoryTier>, llm: Arc<LlmClient>, config: SynthesizerConfig) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            l4,
            llm,
            cache: Mutex::new(LruCache::new(capacity)),
            config,
        }
    }

    /// Answer a query from L4 knowledge.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when retrieval fails; LLM failures fall
    /// back to concatenated document content instead of erroring.
    pub async fn synthesize(
        &self,
        query: &str,
        metadata_filters: &BTreeMap<String, Value>,
        max_results: Option<usize>,
    ) -> Result<SynthesisResult> {
        let started = Instant::now();
        let max_results = max_results.unwrap_or(self.config.max_results);
        let cache_key = self.cache_key(query, metadata_filters);
        let cache_key_hex = format!("{cache_key:016x}");

        if let Some(text) = self.cached(cache_key) {
            debug!("Synthesis cache hit for {cache_key_hex}");
            return Ok(SynthesisResult {
                status: "success".to_string(),
                synthesized_text: text,
                source: "cache".to_string(),
                candidates: 0,
                has_conflicts: false,
                conflicts: Vec::new(),
                elapsed_ms: started.elapsed().as_millis(),
                cache_key: cache_key_hex,
            });
        }

        // Metadata-first: over-fetch, then score and threshold
        let filter = build_metadata_filter(metadata_filters);
        let retrieval_query = KnowledgeQuery {
            search_text: Some(query.to_string()),
            limit: 2 * max_results,
            ..KnowledgeQuery::default()
        };
        let hits = self.l4.search(&retrieval_query, filter.as_deref()).await?;

        let scored = score_candidates(hits);
        let mut relevant: Vec<(KnowledgeDocument, f64)> = scored
            .into_iter()
            .filter(|(_, score)| *score >= self.config.similarity_threshold)
            .collect();
        relevant.truncate(max_results);

        if relevant.is_empty() {
            info!(
                "No documents above similarity threshold {} for query",
                self.config.similarity_threshold
            );
            return Ok(SynthesisResult {
                status: "no_results".to_string(),
                synthesized_text: "No relevant knowledge found for this query.".to_string(),
                source: "synthesis".to_string(),
                candidates: 0,
                has_conflicts: false,
                conflicts: Vec::new(),
                elapsed_ms: started.elapsed().as_millis(),
                cache_key: cache_key_hex,
            });
        }

        let documents: Vec<KnowledgeDocument> =
            relevant.into_iter().map(|(doc, _)| doc).collect();
        let conflicts = self.detect_conflicts(&documents);

        let (text, source) = match self.synthesize_with_llm(query, &documents, &conflicts).await
        {
            Ok(text) => (text, "synthesis"),
            Err(e) => {
                warn!("LLM synthesis failed: {e}; returning concatenated fallback");
                (fallback_text(&documents), "fallback")
            }
        };

        self.cache.lock().put(
            cache_key,
            CacheEntry {
                text: text.clone(),
                inserted_at: Instant::now(),
            },
        );

        Ok(SynthesisResult {
            status: "success".to_string(),
            synthesized_text: text,
            source: source.to_string(),
            candidates: documents.len(),
            has_conflicts: !conflicts.is_empty(),
            conflicts,
            elapsed_ms: started.elapsed().as_millis(),
            cache_key: cache_key_hex,
        })
    }

    /// Drop all cached results.
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// Number of live (unexpired) cache entries.
    #[must_use]
    pub fn cache_len(&self) -> usize {
        let cache = self.cache.lock();
        cache
            .iter()
            .filter(|(_, entry)| entry.inserted_at.elapsed() <= self.config.cache_ttl)
            .count()
    }

    fn cache_key(&self, query: &str, metadata_filters: &BTreeMap<String, Value>) -> u64 {
        let mut hasher = DefaultHasher::new();
        query.hash(&mut hasher);
        for (key, value) in metadata_filters {
            key.hash(&mut hasher);
            value.to_string().hash(&mut hasher);
        }
        hasher.finish()
    }

    fn cached(&self, key: u64) -> Option<String> {
        let mut cache = self.cache.lock();
        match cache.get(&key) {
            Some(entry) if entry.inserted_at.elapsed() <= self.config.cache_ttl => {
                Some(entry.text.clone())
            }
            Some(_) => {
                cache.pop(&key);
                None
            }
            None => None,
        }
    }

    /// Surface tagged conflicts and opposing-polarity recommendation pairs.
    fn detect_conflicts(&self, documents: &[KnowledgeDocument]) -> Vec<Conflict> {
        let mut conflicts = Vec::new();

        for doc in documents {
            if doc
                .metadata
                .get("conflict_tag")
                .and_then(Value::as_str)
                .is_some_and(|tag| tag == self.config.conflict_tag)
            {
                conflicts.push(Conflict::Tagged {
                    doc_id: doc.knowledge_id.clone(),
                    title: doc.title.clone(),
                });
            }
        }

        let recommendations: Vec<&KnowledgeDocument> = documents
            .iter()
            .filter(|doc| doc.knowledge_type == KnowledgeType::Recommendation)
            .collect();
        for (i, first) in recommendations.iter().enumerate() {
            for second in &recommendations[i + 1..] {
                if are_contradictory(&first.content, &second.content) {
                    conflicts.push(Conflict::ContradictoryRecommendations {
                        doc_ids: [first.knowledge_id.clone(), second.knowledge_id.clone()],
                        titles: [first.title.clone(), second.title.clone()],
                    });
                }
            }
        }

        conflicts
    }

    async fn synthesize_with_llm(
        &self,
        query: &str,
        documents: &[KnowledgeDocument],
        conflicts: &[Conflict],
    ) -> Result<String> {
        let doc_context: String = documents
            .iter()
            .enumerate()
            .map(|(i, doc)| {
                let head: String = doc.content.chars().take(500).collect();
                format!(
                    "Document {}: {}\nType: {}\nContent: {head}\n\n",
                    i + 1,
                    doc.title,
                    doc.knowledge_type
                )
            })
            .collect();

        let mut conflict_note = String::new();
        if !conflicts.is_empty() && self.config.explain_conflicts {
            conflict_note.push_str("\n\nIMPORTANT: Conflicting information detected:\n");
            for conflict in conflicts {
                match conflict {
                    Conflict::Tagged { doc_id, .. } => {
                        conflict_note.push_str(&format!(
                            "- Document {doc_id} is marked as conflicting\n"
                        ));
                    }
                    Conflict::ContradictoryRecommendations { doc_ids, .. } => {
                        conflict_note.push_str(&format!(
                            "- Documents {} and {} contain contradictory recommendations\n",
                            doc_ids[0], doc_ids[1]
                        ));
                    }
                }
            }
            conflict_note.push_str("Please acknowledge these conflicts in your response.\n");
        }

        let prompt = format!(
            "You are a knowledge synthesis assistant. Your task is to synthesize relevant \
             knowledge documents to answer the user's query.\n\nUser Query: {query}\n\n\
             Available Knowledge:\n{doc_context}{conflict_note}\n\
             Instructions:\n\
             1. Synthesize the most relevant information from the documents above\n\
             2. Focus specifically on the user's query\n\
             3. If there are conflicts, present both perspectives transparently\n\
             4. Keep the response concise but comprehensive (3-5 sentences)\n\
             5. Cite document numbers when making specific claims\n\n\
             Synthesized Response:"
        );

        let options = GenerateOptions::default()
            .with_temperature(0.4)
            .with_max_output_tokens(512);
        let response = self.llm.generate(&prompt, &options).await?;
        Ok(response.text.trim().to_string())
    }
}

/// Build the filter expression from named metadata filters.
fn build_metadata_filter(filters: &BTreeMap<String, Value>) -> Option<String> {
    if filters.is_empty() {
        return None;
    }
    let clauses: Vec<String> = filters
        .iter()
        .map(|(field, value)| match value {
            Value::String(s) => format!("{field}:='{s}'"),
            Value::Array(items) => {
                let rendered: Vec<String> = items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect();
                format!("{field}:=[{}]", rendered.join(","))
            }
            other => format!("{field}:={other}"),
        })
        .collect();
    Some(join_clauses(&clauses))
}

/// Keep backend relevance scores; substitute the synthetic positional score
/// `max(0.6, 1.0 − 0.05 i)` when the backend reported none.
fn score_candidates(hits: Vec<KnowledgeHit>) -> Vec<(KnowledgeDocument, f64)> {
    hits.into_iter()
        .enumerate()
        .map(|(i, hit)| {
            let score = if hit.search_score > 0.0 {
                f64::from(hit.search_score)
            } else {
                (1.0 - 0.05 * i as f64).max(0.6)
            };
            (hit.document, score)
        })
        .collect()
}

const NEGATIVE_WORDS: [&str; 6] = ["not", "don't", "avoid", "never", "shouldn't", "cannot"];
const POSITIVE_WORDS: [&str; 6] = ["should", "must", "recommend", "always", "can", "enable"];

/// Lexical opposing-polarity heuristic over two texts.
fn are_contradictory(first: &str, second: &str) -> bool {
    let first = first.to_lowercase();
    let second = second.to_lowercase();

    let has_negative = |text: &str| NEGATIVE_WORDS.iter().any(|w| text.contains(w));
    let has_positive = |text: &str| POSITIVE_WORDS.iter().any(|w| text.contains(w));

    (has_negative(&first) && has_positive(&second))
        || (has_positive(&first) && has_negative(&second))
}

fn fallback_text(documents: &[KnowledgeDocument]) -> String {
    let mut text = String::from("Relevant knowledge (LLM unavailable):\n\n");
    for (i, doc) in documents.iter().enumerate() {
        let head: String = doc.content.chars().take(200).collect();
        text.push_str(&format!("{}. {}: {head}\n\n", i + 1, doc.title));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::testing::QueueProvider;
    use crate::metrics::MetricsCollector;
    use crate::storage::memory::InMemoryFullTextStore;
    use crate::tiers::SemanticConfig;

    struct Fixture {
        synthesizer: KnowledgeSynthesizer,
        l4: Arc<SemanticMemoryTier>,
        provider: Arc<QueueProvider>,
    }

    async fn fixture() -> Fixture {
        let l4 = Arc::new(SemanticMemoryTier::new(
            Arc::new(InMemoryFullTextStore::new()),
            Arc::new(MetricsCollector::default()),
            SemanticConfig::default(),
        ));
        l4.initialize().await.unwrap();

        let provider = Arc::new(QueueProvider::new("mock", 8));
        let client = LlmClient::new();
        client.register_provider(Arc::clone(&provider) as _, None);

        let synthesizer = KnowledgeSynthesizer::new(
            Arc::clone(&l4),
            Arc::new(client),
            SynthesizerConfig::default(),
        );
        Fixture {
            synthesizer,
            l4,
            provider,
        }
    }

    async fn seed(l4: &SemanticMemoryTier, id: &str, knowledge_type: KnowledgeType, content: &str) {
        let doc = KnowledgeDocument::new(
            id,
            format!("Doc {id}"),
            content,
            knowledge_type,
            vec!["ep-1".to_string()],
        );
        l4.store(&doc).await.unwrap();
    }

    #[tokio::test]
    async fn synthesizes_and_caches() {
        let f = fixture().await;
        seed(
            &f.l4,
            "k1",
            KnowledgeType::Insight,
            "Rail freight is preferred on the Rotterdam corridor",
        )
        .await;
        f.provider.push_text("Rail is the preferred mode (Document 1).");

        let filters = BTreeMap::new();
        let first = f
            .synthesizer
            .synthesize("rail freight preferred rotterdam corridor", &filters, None)
            .await
            .unwrap();
        assert_eq!(first.status, "success");
        assert_eq!(first.source, "synthesis");
        assert_eq!(first.candidates, 1);

        // Second call hits the cache; no scripted response needed
        let second = f
            .synthesizer
            .synthesize("rail freight preferred rotterdam corridor", &filters, None)
            .await
            .unwrap();
        assert_eq!(second.source, "cache");
        assert_eq!(second.synthesized_text, first.synthesized_text);
        assert_eq!(f.synthesizer.cache_len(), 1);
    }

    #[tokio::test]
    async fn llm_failure_returns_concatenated_fallback() {
        let f = fixture().await;
        seed(
            &f.l4,
            "k1",
            KnowledgeType::Summary,
            "Customs delays recur at the eastern border",
        )
        .await;
        f.provider.push_error("model down");

        let result = f
            .synthesizer
            .synthesize("customs delays recur eastern border", &BTreeMap::new(), None)
            .await
            .unwrap();
        assert_eq!(result.source, "fallback");
        assert!(result.synthesized_text.contains("LLM unavailable"));
        assert!(result.synthesized_text.contains("Doc k1"));
    }

    #[tokio::test]
    async fn opposing_recommendations_surface_conflicts() {
        let f = fixture().await;
        seed(
            &f.l4,
            "k1",
            KnowledgeType::Recommendation,
            "You should always enable pre-clearance for this customer lane",
        )
        .await;
        seed(
            &f.l4,
            "k2",
            KnowledgeType::Recommendation,
            "Avoid pre-clearance for this customer lane, don't enable it",
        )
        .await;
        f.provider
            .push_text("There are conflicting recommendations (Documents 1 and 2).");

        let result = f
            .synthesizer
            .synthesize("enable pre-clearance customer lane", &BTreeMap::new(), None)
            .await
            .unwrap();
        assert!(result.has_conflicts);
        assert!(!result.conflicts.is_empty());
        assert!(matches!(
            result.conflicts[0],
            Conflict::ContradictoryRecommendations { .. }
        ));
    }

    #[tokio::test]
    async fn tagged_documents_are_reported() {
        let f = fixture().await;
        let mut doc = KnowledgeDocument::new(
            "k1",
            "Contested rule",
            "Gate cutoff is six hours before departure",
            KnowledgeType::Rule,
            vec!["ep-1".to_string()],
        );
        doc.metadata
            .insert("conflict_tag".to_string(), serde_json::json!("CONFLICT_DETECTED"));
        f.l4.store(&doc).await.unwrap();
        f.provider.push_text("The cutoff rule is contested (Document 1).");

        let result = f
            .synthesizer
            .synthesize("gate cutoff hours before departure", &BTreeMap::new(), None)
            .await
            .unwrap();
        assert!(result.has_conflicts);
        assert!(matches!(result.conflicts[0], Conflict::Tagged { .. }));
    }

    #[tokio::test]
    async fn no_matches_reports_no_results() {
        let f = fixture().await;
        let result = f
            .synthesizer
            .synthesize("completely unrelated topic", &BTreeMap::new(), None)
            .await
            .unwrap();
        assert_eq!(result.status, "no_results");
        assert_eq!(result.candidates, 0);
    }

    #[test]
    fn metadata_filter_rendering() {
        let mut filters = BTreeMap::new();
        filters.insert("knowledge_type".to_string(), serde_json::json!("rule"));
        filters.insert("episode_count".to_string(), serde_json::json!(3));
        filters.insert("tags".to_string(), serde_json::json!(["rail", "ocean"]));

        let rendered = build_metadata_filter(&filters).unwrap();
        assert!(rendered.contains("knowledge_type:='rule'"));
        assert!(rendered.contains("episode_count:=3"));
        assert!(rendered.contains("tags:=[rail,ocean]"));
    }

    #[test]
    fn synthetic_scores_are_positional_with_floor() {
        let docs: Vec<KnowledgeHit> = (0..12)
            .map(|i| KnowledgeHit {
                document: KnowledgeDocument::new(
                    format!("k{i}"),
                    "t",
                    "c",
                    KnowledgeType::Insight,
                    vec!["ep".to_string()],
                ),
                search_score: 0.0,
            })
            .collect();
        let scored = score_candidates(docs);
        assert!((scored[0].1 - 1.0).abs() < 1e-9);
        assert!((scored[4].1 - 0.8).abs() < 1e-9);
        assert!((scored[11].1 - 0.6).abs() < 1e-9);
    }
}
