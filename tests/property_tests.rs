use chrono::{TimeZone, Utc};
use kbcanon::config::ScoringConfig;
use kbcanon::duplicates::{FingerprintedDoc, Grouper, MinHashJaccard, SimilarityMetric, Thresholds};
use kbcanon::fingerprint::{normalize_text, Fingerprinter};
use kbcanon::scoring::{score_document, Rubric};
use kbcanon::source::Document;
use proptest::prelude::*;

fn words() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z]{1,6}", 0..60)
}

fn fingerprinted(texts: &[String]) -> Vec<FingerprintedDoc> {
    let fingerprinter = Fingerprinter::new(3, 64);
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| {
            FingerprintedDoc::new(
                format!("kb/doc-{i:02}.md"),
                format!("topic-{}", i % 3),
                fingerprinter.fingerprint_text(text),
            )
        })
        .collect()
}

proptest! {
    #[test]
    fn test_normalize_idempotent(text in "[ -~\n\téüßÅ]{0,200}") {
        let once = normalize_text(&text);
        prop_assert_eq!(normalize_text(&once), once);
    }

    #[test]
    fn test_normalize_ignores_case_and_spacing(tokens in words()) {
        let plain = tokens.join(" ");
        let noisy = tokens
            .iter()
            .map(|t| t.to_uppercase())
            .collect::<Vec<_>>()
            .join("  \n\t ");
        prop_assert_eq!(normalize_text(&plain), normalize_text(&noisy));
    }

    #[test]
    fn test_fingerprint_determinism(text in "\\PC*") {
        let fingerprinter = Fingerprinter::new(5, 128);
        prop_assert_eq!(
            fingerprinter.fingerprint_text(&text),
            fingerprinter.fingerprint_text(&text)
        );
    }

    #[test]
    fn test_jaccard_symmetric_and_bounded(a in words(), b in words()) {
        let fingerprinter = Fingerprinter::new(3, 64);
        let fa = fingerprinter.fingerprint_text(&a.join(" "));
        let fb = fingerprinter.fingerprint_text(&b.join(" "));

        let ab = MinHashJaccard.similarity(&fa, &fb);
        let ba = MinHashJaccard.similarity(&fb, &fa);
        prop_assert_eq!(ab, ba);
        prop_assert!((0.0..=1.0).contains(&ab));
        prop_assert_eq!(MinHashJaccard.similarity(&fa, &fa), 1.0);
    }

    #[test]
    fn test_grouping_partitions_corpus(texts in prop::collection::vec("[a-c ]{0,40}", 0..25)) {
        let docs = fingerprinted(&texts);
        let (groups, stats) = Grouper::new(Thresholds::default()).group(&docs, &MinHashJaccard);

        let mut seen: Vec<_> = groups.iter().flat_map(|g| g.members.iter().cloned()).collect();
        seen.sort();
        let mut expected: Vec<_> = docs.iter().map(|d| d.id.clone()).collect();
        expected.sort();
        prop_assert_eq!(seen, expected);
        prop_assert_eq!(stats.groups, groups.len());
    }

    #[test]
    fn test_grouping_order_independent(
        (texts, order) in prop::collection::vec("[a-c ]{0,40}", 1..20)
            .prop_flat_map(|texts| {
                let n = texts.len();
                (Just(texts), Just((0..n).collect::<Vec<_>>()).prop_shuffle())
            })
    ) {
        let docs = fingerprinted(&texts);
        let shuffled: Vec<FingerprintedDoc> = order.iter().map(|&i| docs[i].clone()).collect();
        let grouper = Grouper::new(Thresholds::default());

        let (forward, _) = grouper.group(&docs, &MinHashJaccard);
        let (permuted, _) = grouper.group(&shuffled, &MinHashJaccard);
        let ids = |groups: &[kbcanon::duplicates::DuplicateGroup]| {
            groups.iter().map(|g| g.members.clone()).collect::<Vec<_>>()
        };
        prop_assert_eq!(ids(&forward), ids(&permuted));
    }

    #[test]
    fn test_score_within_range(body in "\\PC{0,400}", collection in "(action|research|vendor)") {
        let rubric = Rubric::from_config(&ScoringConfig::default()).unwrap();
        let doc = Document::new(
            format!("{collection}/doc.md"),
            collection.clone(),
            "topic",
            body,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        );
        let score = score_document(&doc, &rubric);
        prop_assert!((0.0..=100.0).contains(&score.composite));
    }
}
