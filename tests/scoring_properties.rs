// tests/scoring_properties.rs
//
// Behavioural laws of the classifier over the built-in tables, plus the
// hand-checked scenarios. Random stores come from a seeded StdRng so failures
// reproduce.

use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Arc;

use travel_purpose::explain::TOLERANCE;
use travel_purpose::normalize::normalize_tag;
use travel_purpose::ontology::MainCategory;
use travel_purpose::prediction::Origin;
use travel_purpose::tags::{EvidenceType, Source, TagRecord, TagStore};
use travel_purpose::Classifier;

// Exact ontology keywords (no fuzzy hits), plus one that resolves to nothing.
const POOL: &[&str] = &[
    "museum",
    "historic center",
    "beach",
    "casino",
    "ski resort",
    "business",
    "old town",
    "street food",
    "trade fair",
    "marina",
    "luxury",
    "xyzzy_unknown_tag",
];

// Keywords with exactly one mapping, and its main category.
const SINGLE: &[(&str, MainCategory)] = &[
    ("museum", MainCategory::CultureHeritage),
    ("ski resort", MainCategory::WinterSnow),
    ("beach", MainCategory::BeachResort),
    ("casino", MainCategory::NightlifeEntertainment),
];

// A keyword shared by two main categories at the same boost.
const SHARED: (&str, [MainCategory; 2]) = (
    "historic center",
    [MainCategory::CultureHeritage, MainCategory::Leisure],
);

fn classifier() -> Classifier {
    Classifier::builtin().expect("built-in tables must load")
}

fn record(tag: &str, source: Source, ev: EvidenceType) -> TagRecord {
    TagRecord::new(tag, source, ev)
}

fn random_record(rng: &mut StdRng, tag: &str) -> TagRecord {
    let source = Source::ALL[rng.random_range(0..Source::ALL.len())];
    let ev = EvidenceType::ALL[rng.random_range(0..EvidenceType::ALL.len())];
    record(tag, source, ev)
}

fn random_store(rng: &mut StdRng, max_len: usize) -> TagStore {
    let n = rng.random_range(0..=max_len);
    (0..n)
        .map(|_| {
            let tag = POOL[rng.random_range(0..POOL.len())];
            random_record(rng, tag)
        })
        .collect()
}

/* ----------------------------
Laws
---------------------------- */

#[test]
fn classification_is_deterministic() {
    let c = classifier();
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..50 {
        let store = random_store(&mut rng, 12);
        let a = serde_json::to_string(&c.classify(&store)).unwrap();
        let b = serde_json::to_string(&c.classify(&store)).unwrap();
        assert_eq!(a, b, "repeated classification must be byte-identical");
    }
}

#[test]
fn corroborating_tag_never_lowers_its_category() {
    let c = classifier();
    let mut rng = StdRng::seed_from_u64(11);
    for round in 0..200 {
        let (kw, main) = SINGLE[rng.random_range(0..SINGLE.len())];
        let mut store = random_store(&mut rng, 10);
        store.push(random_record(&mut rng, kw));

        let before = c.classify(&store).main_score(main).unwrap();
        store.push(random_record(&mut rng, kw));
        let after = c.classify(&store).main_score(main).unwrap();

        assert!(
            after + 1e-6 >= before,
            "round {round}: {main} dropped from {before} to {after} after adding `{kw}`"
        );
    }
}

#[test]
fn shared_keyword_never_lowers_either_category() {
    let c = classifier();
    let (kw, mains) = SHARED;
    assert_eq!(c.ontology().resolve(kw).len(), 2);
    let mut rng = StdRng::seed_from_u64(13);
    for round in 0..200 {
        let mut store = random_store(&mut rng, 10);
        store.push(random_record(&mut rng, kw));
        if rng.random_bool(0.5) {
            store.push(random_record(&mut rng, "city break"));
        }

        let before = c.classify(&store);
        store.push(random_record(&mut rng, kw));
        let after = c.classify(&store);

        for main in mains {
            let (b, a) = (before.main_score(main).unwrap(), after.main_score(main).unwrap());
            assert!(
                a + 1e-6 >= b,
                "round {round}: {main} dropped from {b} to {a} after adding `{kw}`"
            );
        }
    }
}

#[test]
fn selected_labels_clear_their_thresholds() {
    let c = classifier();
    let params = c.params().clone();
    let mut rng = StdRng::seed_from_u64(23);
    for _ in 0..200 {
        let p = c.classify(&random_store(&mut rng, 15));
        for m in &p.main {
            let s = p.main_score(*m).unwrap();
            assert!(s > params.main_threshold, "{m} selected at {s}");
        }
        for label in &p.sub {
            let s = p
                .sub_scores
                .iter()
                .find(|x| &x.label == label)
                .map(|x| x.score)
                .unwrap();
            assert!(s > params.sub_threshold, "{label} selected at {s}");
        }
        assert!(p.main.len() <= params.max_main_labels);
        assert!(p.sub.len() <= params.max_sub_labels);
    }
}

#[test]
fn confidence_is_bounded_and_breakdown_adds_up() {
    let c = classifier();
    let mut rng = StdRng::seed_from_u64(31);
    for _ in 0..200 {
        let p = c.classify(&random_store(&mut rng, 20));
        assert!((0.0..=1.0).contains(&p.confidence), "confidence {}", p.confidence);
        assert!((0.0..=1.0).contains(&p.ambiguity_score));
        if let Some(b) = p.confidence_breakdown {
            assert!(
                (b.component_sum() - p.confidence).abs() <= TOLERANCE,
                "breakdown {} vs confidence {}",
                b.component_sum(),
                p.confidence
            );
        }
    }
}

#[test]
fn normalization_is_idempotent() {
    const ALPHABET: &[char] = &[
        'a', 'Z', '0', '9', ' ', '\t', '-', '_', '/', '&', ';', '#', 'é', 'Ü', 'ñ', 'ß', 'Д', 'я',
        '東', 'ﬁ', '’', '.', '!',
    ];
    const FRAGMENTS: &[&str] = &["&amp;", "&lt;", "&#39;", "&nbsp;", "Ski-in/Ski-out"];

    let mut rng = StdRng::seed_from_u64(5);
    for _ in 0..500 {
        let mut s = String::new();
        for _ in 0..rng.random_range(0..24) {
            if rng.random_range(0..6) == 0 {
                s.push_str(FRAGMENTS[rng.random_range(0..FRAGMENTS.len())]);
            } else {
                s.push(ALPHABET[rng.random_range(0..ALPHABET.len())]);
            }
        }
        let once = normalize_tag(&s);
        assert_eq!(normalize_tag(&once), once, "input {s:?}");
    }
}

/* ----------------------------
Scenarios
---------------------------- */

#[test]
fn heritage_tags_select_culture() {
    let c = classifier();
    let store: TagStore = vec![
        record("historic center", Source::Wikidata, EvidenceType::StructuredData),
        record("museum", Source::Booking, EvidenceType::MetaTag),
    ]
    .into_iter()
    .collect();
    let p = c.classify(&store);

    assert!(p.main.contains(&MainCategory::CultureHeritage));
    assert_eq!(p.top(), Some(MainCategory::CultureHeritage));
    assert!(p.confidence > 0.15, "confidence {}", p.confidence);
    assert!(p.sub.iter().any(|s| s == "Old_Town"));
    assert!(p.sub.iter().any(|s| s == "Museums"));
}

#[test]
fn empty_store_is_empty_result() {
    let p = classifier().classify(&TagStore::new());
    assert!(p.main.is_empty());
    assert!(p.sub.is_empty());
    assert_eq!(p.confidence, 0.0);
    assert_eq!(p.origin, Origin::Empty);
}

#[test]
fn unknown_tag_is_empty_result() {
    let store: TagStore = std::iter::once(record(
        "xyzzy_unknown_tag",
        Source::Booking,
        EvidenceType::MetaTag,
    ))
    .collect();
    let p = classifier().classify(&store);
    assert!(p.main.is_empty());
    assert!(p.sub.is_empty());
    assert_eq!(p.confidence, 0.0);
}

#[test]
fn split_evidence_selects_both_and_is_penalized() {
    let store: TagStore = vec![
        record("beach", Source::Booking, EvidenceType::MetaTag),
        record("casino", Source::Booking, EvidenceType::MetaTag),
    ]
    .into_iter()
    .collect();
    let p = classifier().classify(&store);

    assert!(p.main.contains(&MainCategory::BeachResort));
    assert!(p.main.contains(&MainCategory::NightlifeEntertainment));
    let beach = p.main_score(MainCategory::BeachResort).unwrap();
    let casino = p.main_score(MainCategory::NightlifeEntertainment).unwrap();
    assert!((beach - 0.5).abs() < 1e-4 && (casino - 0.5).abs() < 1e-4);

    let b = p.confidence_breakdown.expect("explain is on by default");
    assert!(b.ambiguity_penalty() > 0.0);
    assert!(p.ambiguity_score > 0.99);
}

#[test]
fn concurrent_classification_matches() {
    let c = Arc::new(classifier());
    let store: Arc<TagStore> = Arc::new(
        vec![
            record("historic center", Source::Wikidata, EvidenceType::StructuredData),
            record("museum", Source::Booking, EvidenceType::MetaTag),
            record("beach", Source::Agoda, EvidenceType::Heading),
            record("trade fair", Source::Wikipedia, EvidenceType::Curated),
        ]
        .into_iter()
        .collect(),
    );

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let c = Arc::clone(&c);
            let store = Arc::clone(&store);
            std::thread::spawn(move || serde_json::to_string(&c.classify(&store)).unwrap())
        })
        .collect();
    let outputs: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(outputs.windows(2).all(|w| w[0] == w[1]));
}
