//! BM25Okapi keyword index used by the hybrid retrieval pipeline.
//!
//! Built fresh from a batch of documents on every call that needs it; there
//! is no incremental update path, matching the "rebuild, don't mutate"
//! decision for a corpus of this scale.

use std::collections::HashMap;

const K1: f64 = 1.5;
const B: f64 = 0.75;

/// One document to index: an id paired with its full searchable text.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub text: String,
}

/// A scored hit before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawHit {
    pub id: String,
    pub score: f64,
}

struct IndexedDoc {
    id: String,
    term_freq: HashMap<String, usize>,
    len: usize,
}

/// A lowercase-Unicode-word tokenizer: no stemming, no stopword removal.
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words().into_iter().map(|w| w.to_lowercase()).collect()
}

trait UnicodeWords {
    fn unicode_words(&self) -> Vec<&str>;
}

impl UnicodeWords for str {
    fn unicode_words(&self) -> Vec<&str> {
        let mut words = Vec::new();
        let mut start = None;
        for (i, c) in self.char_indices() {
            if c.is_alphanumeric() {
                if start.is_none() {
                    start = Some(i);
                }
            } else if let Some(s) = start.take() {
                words.push(&self[s..i]);
            }
        }
        if let Some(s) = start {
            words.push(&self[s..]);
        }
        words
    }
}

/// A BM25Okapi index built once from a fixed document batch.
pub struct Bm25Index {
    docs: Vec<IndexedDoc>,
    doc_freq: HashMap<String, usize>,
    avg_len: f64,
}

impl Bm25Index {
    pub fn build(documents: &[Document]) -> Self {
        let mut docs = Vec::with_capacity(documents.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut total_len = 0usize;

        for document in documents {
            let tokens = tokenize(&document.text);
            total_len += tokens.len();
            let mut term_freq = HashMap::new();
            for token in &tokens {
                *term_freq.entry(token.clone()).or_insert(0) += 1;
            }
            for term in term_freq.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            docs.push(IndexedDoc {
                id: document.id.clone(),
                len: tokens.len(),
                term_freq,
            });
        }

        let avg_len = if docs.is_empty() {
            0.0
        } else {
            total_len as f64 / docs.len() as f64
        };

        Self { docs, doc_freq, avg_len }
    }

    fn idf(&self, term: &str) -> f64 {
        let n = self.docs.len() as f64;
        let df = *self.doc_freq.get(term).unwrap_or(&0) as f64;
        // The +0.5/+1 smoothed Robertson-Sparck-Jones IDF used by BM25Okapi.
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Scores every document against `query`, min-max normalizes the raw
    /// BM25 scores into [0,1], and returns them sorted descending.
    pub fn search(&self, query: &str) -> Vec<RawHit> {
        if self.docs.is_empty() {
            return Vec::new();
        }
        let terms = tokenize(query);
        if terms.is_empty() {
            return Vec::new();
        }

        let mut raw: Vec<RawHit> = self
            .docs
            .iter()
            .map(|doc| RawHit {
                id: doc.id.clone(),
                score: self.score_doc(doc, &terms),
            })
            .collect();

        normalize_min_max(&mut raw);
        raw.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        raw
    }

    fn score_doc(&self, doc: &IndexedDoc, terms: &[String]) -> f64 {
        let mut score = 0.0;
        for term in terms {
            let Some(&tf) = doc.term_freq.get(term) else {
                continue;
            };
            let tf = tf as f64;
            let idf = self.idf(term);
            let norm_len = if self.avg_len > 0.0 { doc.len as f64 / self.avg_len } else { 0.0 };
            let numerator = tf * (K1 + 1.0);
            let denominator = tf + K1 * (1.0 - B + B * norm_len);
            score += idf * (numerator / denominator);
        }
        score
    }
}

fn normalize_min_max(hits: &mut [RawHit]) {
    if hits.is_empty() {
        return;
    }
    let min = hits.iter().map(|h| h.score).fold(f64::INFINITY, f64::min);
    let max = hits.iter().map(|h| h.score).fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    for hit in hits.iter_mut() {
        hit.score = if range > 0.0 { (hit.score - min) / range } else { 0.0 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, text: &str) -> Document {
        Document { id: id.to_string(), text: text.to_string() }
    }

    #[test]
    fn tokenizer_lowercases_and_splits_on_non_alnum() {
        let tokens = tokenize("Retry-Budget: exhausted!");
        assert_eq!(tokens, vec!["retry", "budget", "exhausted"]);
    }

    #[test]
    fn exact_term_match_outranks_unrelated_document() {
        let index = Bm25Index::build(&[
            doc("a", "retry budget exhausted after three attempts"),
            doc("b", "unrelated migration of the billing schema"),
        ]);
        let hits = index.search("retry budget");
        assert_eq!(hits[0].id, "a");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn scores_are_normalized_into_unit_range() {
        let index = Bm25Index::build(&[
            doc("a", "circuit breaker pattern for retries"),
            doc("b", "circuit breaker circuit breaker circuit breaker"),
            doc("c", "totally unrelated text about sandwiches"),
        ]);
        let hits = index.search("circuit breaker");
        assert!(hits.iter().all(|h| h.score >= 0.0 && h.score <= 1.0));
        assert_eq!(hits.iter().map(|h| h.score).fold(0.0_f64, f64::max), 1.0);
    }

    #[test]
    fn empty_corpus_returns_no_hits() {
        let index = Bm25Index::build(&[]);
        assert!(index.search("anything").is_empty());
    }
}
