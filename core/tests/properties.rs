use proptest::collection::{hash_map, vec};
use proptest::prelude::*;
use shop_core::index::{InvertedIndex, Weight};
use shop_core::ngram::NGramIndex;
use shop_core::ranker::bm25;
use shop_core::tokenizer::{normalize, Analyzer};
use std::collections::HashMap;

/// Catalog-like text: both scripts, digits, punctuation, composed and decomposed accents,
/// ligatures and fullwidth letters.
const TEXT: &str = "[a-zA-Z0-9а-яА-ЯёЁéÉßİﬁＡ-Ｚ \\-.,!/'&()\u{301}]{0,48}";

type Doc = HashMap<String, Weight>;

fn docs() -> impl Strategy<Value = Vec<Doc>> {
    vec(hash_map("[a-e]{1,4}", 0.1f32..5.0, 1..6), 1..8)
}

fn index_all(docs: &[Doc]) -> (InvertedIndex, NGramIndex) {
    let mut index = InvertedIndex::new();
    let mut grams = NGramIndex::new(3);
    for (i, doc) in docs.iter().enumerate() {
        let length = doc.len() as u32;
        for token in index.index(&format!("d{i}"), doc, length).added {
            grams.index_token(&token);
        }
    }
    (index, grams)
}

proptest! {
    #[test]
    fn normalized_text_tokenizes_the_same_twice(text in TEXT) {
        let analyzer = Analyzer::default();
        let once = normalize(&text);
        prop_assert_eq!(normalize(&once), once.clone());
        prop_assert_eq!(analyzer.tokenize(&once), analyzer.tokenize(&normalize(&once)));
    }

    #[test]
    fn removing_a_document_leaves_no_trace(docs in docs()) {
        let (mut index, mut grams) = index_all(&docs);
        for token in index.remove("d0").retired {
            grams.remove_token(&token);
        }
        prop_assert!(!index.contains_doc("d0"));
        prop_assert!(index.entries().all(|(_, postings)| !postings.contains_key("d0")));

        // same state as never having indexed d0 at all
        let mut rest = docs.clone();
        rest[0] = Doc::new();
        let (expected_index, expected_grams) = index_all(&rest);
        prop_assert_eq!(index, expected_index);
        prop_assert_eq!(grams, expected_grams);
    }

    #[test]
    fn reindexing_identical_content_changes_nothing(docs in docs()) {
        let (once, _) = index_all(&docs);
        let (mut twice, _) = index_all(&docs);
        for (i, doc) in docs.iter().enumerate() {
            let delta = twice.index(&format!("d{i}"), doc, doc.len() as u32);
            prop_assert!(delta.added.is_empty() && delta.retired.is_empty());
        }
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn bm25_never_drops_as_term_frequency_grows(
        tf in 0.0f32..50.0,
        extra in 0.0f32..50.0,
        idf in 0.01f32..10.0,
        doc_len in 1.0f32..500.0,
        avg_len in 1.0f32..500.0,
        k1 in 0.1f32..3.0,
        b in 0.0f32..1.0,
    ) {
        let lower = bm25(tf, idf, doc_len, avg_len, k1, b);
        let higher = bm25(tf + extra, idf, doc_len, avg_len, k1, b);
        prop_assert!(lower <= higher + higher.abs().max(1.0) * 1e-5, "{lower} > {higher}");
    }
}
