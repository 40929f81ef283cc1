//! Language-aware tokenizer and BM25 lexical scorer.
//!
//! Tokenization: ASCII alphanumeric runs become lowercased words; CJK runs
//! become overlapping character bigrams (a single isolated CJK character
//! stands alone). Everything else separates tokens.

use std::collections::HashMap;

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{F900}'..='\u{FAFF}'
    )
}

/// Splits text into BM25 terms.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut cjk_run: Vec<char> = Vec::new();

    let flush_word = |word: &mut String, tokens: &mut Vec<String>| {
        if !word.is_empty() {
            tokens.push(word.to_lowercase());
            word.clear();
        }
    };
    let flush_cjk = |run: &mut Vec<char>, tokens: &mut Vec<String>| {
        match run.len() {
            0 => {}
            1 => tokens.push(run[0].to_string()),
            _ => {
                for pair in run.windows(2) {
                    tokens.push(pair.iter().collect());
                }
            }
        }
        run.clear();
    };

    for c in text.chars() {
        if is_cjk(c) {
            flush_word(&mut word, &mut tokens);
            cjk_run.push(c);
        } else if c.is_ascii_alphanumeric() {
            flush_cjk(&mut cjk_run, &mut tokens);
            word.push(c);
        } else {
            flush_word(&mut word, &mut tokens);
            flush_cjk(&mut cjk_run, &mut tokens);
        }
    }
    flush_word(&mut word, &mut tokens);
    flush_cjk(&mut cjk_run, &mut tokens);
    tokens
}

const K1: f64 = 1.5;
const B: f64 = 0.75;

/// BM25 index over a fixed corpus of documents.
pub struct Bm25 {
    docs: Vec<Vec<String>>,
    term_doc_freq: HashMap<String, usize>,
    avg_len: f64,
}

impl Bm25 {
    pub fn new(corpus: &[&str]) -> Self {
        let docs: Vec<Vec<String>> = corpus.iter().map(|d| tokenize(d)).collect();
        let mut term_doc_freq: HashMap<String, usize> = HashMap::new();
        for doc in &docs {
            let mut seen: Vec<&String> = Vec::new();
            for term in doc {
                if !seen.contains(&term) {
                    *term_doc_freq.entry(term.clone()).or_default() += 1;
                    seen.push(term);
                }
            }
        }
        let avg_len = if docs.is_empty() {
            0.0
        } else {
            docs.iter().map(Vec::len).sum::<usize>() as f64 / docs.len() as f64
        };
        Self {
            docs,
            term_doc_freq,
            avg_len,
        }
    }

    fn idf(&self, term: &str) -> f64 {
        let n = self.docs.len() as f64;
        let df = self.term_doc_freq.get(term).copied().unwrap_or(0) as f64;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// BM25 score of `query` against document `index`.
    pub fn score(&self, query: &str, index: usize) -> f64 {
        let Some(doc) = self.docs.get(index) else {
            return 0.0;
        };
        let doc_len = doc.len() as f64;
        let mut score = 0.0;
        for term in tokenize(query) {
            let tf = doc.iter().filter(|t| **t == term).count() as f64;
            if tf == 0.0 {
                continue;
            }
            let idf = self.idf(&term);
            let norm = tf * (K1 + 1.0) / (tf + K1 * (1.0 - B + B * doc_len / self.avg_len));
            score += idf * norm;
        }
        score
    }

    /// Indexes of the `n` best-scoring documents (score > 0), descending;
    /// ties break on the lower index.
    pub fn top_n(&self, query: &str, n: usize) -> Vec<(usize, f64)> {
        let mut scored: Vec<(usize, f64)> = (0..self.docs.len())
            .map(|i| (i, self.score(query, i)))
            .filter(|(_, s)| *s > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(n);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: ASCII words lowercase, CJK runs become bigrams, mixed
    /// text splits at boundaries.
    #[test]
    fn tokenizer_handles_mixed_scripts() {
        assert_eq!(tokenize("Graph Executor"), vec!["graph", "executor"]);
        assert_eq!(tokenize("知识库"), vec!["知识", "识库"]);
        assert_eq!(tokenize("查"), vec!["查"]);
        assert_eq!(
            tokenize("RRF融合k=60"),
            vec!["rrf", "融合", "k", "60"]
        );
        assert!(tokenize("  …—— ").is_empty());
    }

    /// **Scenario**: a document containing the query terms outranks one
    /// that does not; absent terms score zero.
    #[test]
    fn bm25_ranks_matching_docs() {
        let corpus = [
            "the graph executor streams tokens",
            "cooking recipes for dinner",
            "executor pools and graph scheduling in the graph runtime",
        ];
        let bm25 = Bm25::new(&corpus);
        assert!(bm25.score("graph executor", 0) > 0.0);
        assert_eq!(bm25.score("graph executor", 1), 0.0);

        let top = bm25.top_n("graph executor", 3);
        assert_eq!(top.len(), 2);
        assert!(top.iter().all(|(i, _)| *i != 1));
    }

    /// **Scenario**: rarer terms weigh more than common ones (idf).
    #[test]
    fn bm25_idf_prefers_rare_terms() {
        let corpus = [
            "alpha beta",
            "alpha gamma",
            "alpha delta",
        ];
        let bm25 = Bm25::new(&corpus);
        // "gamma" appears once, "alpha" everywhere.
        assert!(bm25.score("gamma", 1) > bm25.score("alpha", 1));
    }

    /// **Scenario**: CJK queries match via bigrams.
    #[test]
    fn bm25_matches_cjk_bigrams() {
        let corpus = ["内部知识库的资料", "完全无关的内容"];
        let bm25 = Bm25::new(&corpus);
        let top = bm25.top_n("知识库", 2);
        assert_eq!(top.first().map(|(i, _)| *i), Some(0));
    }

    /// **Scenario**: an empty corpus scores nothing and panics nowhere.
    #[test]
    fn bm25_empty_corpus() {
        let bm25 = Bm25::new(&[]);
        assert!(bm25.top_n("anything", 5).is_empty());
        assert_eq!(bm25.score("anything", 0), 0.0);
    }
}
