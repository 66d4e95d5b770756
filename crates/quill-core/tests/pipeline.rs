//! End-to-end pipeline tests: train, persist, load, parse.

use proptest::prelude::*;

use quill_core::pipeline::validate_requirements;
use quill_core::training_data::load_data_from_str;
use quill_core::{ComponentRegistry, Model, Pipeline};
use quill_types::config::ModelConfig;
use quill_types::QuillError;

const MD: &str = "\
## intent:greet
- hello there
- hi friend
- good morning

## intent:restaurant_search
- find me a restaurant in [berlin](location)
- any food places in [NYC](location:new york)
- i am looking for food in [berlin](location)

## synonym:new york
- big apple
";

fn train(template: &str) -> Model {
    let data = load_data_from_str(MD, "test.md").unwrap();
    let config = ModelConfig::from_template(template).unwrap();
    Pipeline::build(&config, &ComponentRegistry::with_builtins())
        .unwrap()
        .train(&data)
        .unwrap()
}

#[test]
fn trained_model_predicts_training_labels() {
    let model = train("bag_of_words");
    for (text, intent) in [
        ("hello there", "greet"),
        ("find me a restaurant in berlin", "restaurant_search"),
    ] {
        let result = model.parse(text, None).unwrap();
        assert_eq!(result.intent.name, intent, "for {text:?}");
        assert!(result.intent.confidence > 0.5);
        assert_eq!(result.intent_ranking[0].name, intent);
    }
}

#[test]
fn entities_pipeline_extracts_and_normalises() {
    let model = train("bag_of_words_entities");
    let result = model.parse("food in nyc or Berlin", None).unwrap();
    let values: Vec<&str> = result.entities.iter().map(|e| e.value.as_str()).collect();
    assert_eq!(values, vec!["new york", "Berlin"]);
    assert_eq!(result.entities[0].processors, vec!["ner_synonyms"]);
}

#[test]
fn persisted_model_reproduces_output() {
    let registry = ComponentRegistry::with_builtins();
    let data = load_data_from_str(MD, "test.md").unwrap();
    let model = train("bag_of_words_entities");
    let dir = tempfile::tempdir().unwrap();
    let model_dir = model.persist(dir.path(), "p1", None, Some(&data)).unwrap();

    let name = model_dir.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("model_"));
    assert!(model_dir.join("naive_bayes_classifier.json").is_file());
    assert!(model_dir.join("training_data.json").is_file());

    let loaded = Model::load(&model_dir, &registry).unwrap();
    let order: Vec<&str> = loaded.stages().iter().map(|s| s.class()).collect();
    let original: Vec<&str> = model.stages().iter().map(|s| s.class()).collect();
    assert_eq!(order, original);
    assert_eq!(loaded.context(), model.context());

    for text in ["hello there", "any restaurants in the big apple", "qwerty", "food in NYC"] {
        assert_eq!(loaded.parse(text, None).unwrap(), model.parse(text, None).unwrap());
    }

    let stored = quill_core::training_data::load_data(&model_dir.join("training_data.json")).unwrap();
    assert_eq!(stored, data);
}

#[test]
fn unknown_class_in_metadata_fails_load() {
    let model = train("keyword");
    let dir = tempfile::tempdir().unwrap();
    let model_dir = model.persist(dir.path(), "p1", Some("m"), None).unwrap();
    let err = Model::load(&model_dir, &ComponentRegistry::new()).unwrap_err();
    assert!(matches!(err, QuillError::UnknownComponent { .. }));
}

// ── dependency ordering property ────────────────────────────────────────

const KEYS: &[&str] = &["tokens", "text_features", "intent", "entities"];

#[derive(Debug, Clone)]
struct Spec {
    name: String,
    requires: Vec<&'static str>,
    provides: Vec<&'static str>,
}

fn spec() -> impl Strategy<Value = Spec> {
    (
        "[a-z]{3,8}",
        proptest::sample::subsequence(KEYS.to_vec(), 0..=2),
        proptest::sample::subsequence(KEYS.to_vec(), 0..=2),
    )
        .prop_map(|(name, requires, provides)| Spec {
            name,
            requires,
            provides,
        })
}

fn validate(specs: &[Spec]) -> bool {
    validate_requirements(specs.iter().map(|s| {
        (
            s.name.as_str(),
            s.requires.iter().copied(),
            s.provides.iter().copied(),
        )
    }))
    .is_ok()
}

fn oracle(specs: &[Spec]) -> bool {
    specs.iter().enumerate().all(|(i, s)| {
        s.requires
            .iter()
            .all(|r| specs[..i].iter().any(|earlier| earlier.provides.contains(r)))
    })
}

fn independent(a: &Spec, b: &Spec) -> bool {
    !a.requires.iter().any(|r| b.provides.contains(r)) && !b.requires.iter().any(|r| a.provides.contains(r))
}

proptest! {
    #[test]
    fn validation_matches_cumulative_provides(specs in proptest::collection::vec(spec(), 0..6)) {
        prop_assert_eq!(validate(&specs), oracle(&specs));
    }

    #[test]
    fn swapping_independent_neighbours_keeps_outcome(
        specs in proptest::collection::vec(spec(), 2..6),
        at in 0usize..5,
    ) {
        let i = at % (specs.len() - 1);
        prop_assume!(independent(&specs[i], &specs[i + 1]));
        let mut swapped = specs.clone();
        swapped.swap(i, i + 1);
        prop_assert_eq!(validate(&specs), validate(&swapped));
    }
}
