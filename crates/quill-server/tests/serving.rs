//! Serving behaviour: lazy loading, locking, training isolation, evaluation.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;

use quill_core::training_data::load_data_from_str;
use quill_core::{Component, ComponentFactory, ComponentRegistry, Context, ContextUpdate, Pipeline};
use quill_server::project::FALLBACK_MODEL_NAME;
use quill_server::{DataRouter, InProcessExecutor, Project, ProjectStatus};
use quill_types::config::{ComponentConfig, ModelConfig, PipelineSpec, ServerConfig};
use quill_types::message::Message;
use quill_types::training::TrainingData;
use quill_types::{QuillError, Result};

const TRAIN_MD: &str = "\
## intent:greet
- hello there
- hi friend
- good morning to you

## intent:goodbye
- bye bye
- see you later
- goodbye my friend
";

const HELD_OUT_MD: &str = "\
## intent:greet
- hello
- hi there
- good morning
- hello friend
- hi

## intent:goodbye
- bye
- see you
- goodbye
- bye friend
- see you later
";

// ── Test double ─────────────────────────────────────────────────────────

#[derive(Default)]
struct Counters {
    loads: AtomicUsize,
    processed: AtomicBool,
}

#[derive(Clone, Default)]
struct SpyFactory {
    counters: Arc<Counters>,
    load_delay: Duration,
    process_delay: Duration,
    train_delay: Duration,
    explode_in_training: bool,
}

struct Spy {
    config: ComponentConfig,
    factory: SpyFactory,
}

impl Component for Spy {
    fn config(&self) -> &ComponentConfig {
        &self.config
    }

    fn train(&mut self, _data: &mut TrainingData, _config: &ModelConfig, _context: &Context) -> Result<Option<ContextUpdate>> {
        std::thread::sleep(self.factory.train_delay);
        if self.factory.explode_in_training {
            panic!("spy exploded during training");
        }
        Ok(None)
    }

    fn process(&self, _message: &mut Message, _context: &Context) -> Result<()> {
        std::thread::sleep(self.factory.process_delay);
        self.factory.counters.processed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl ComponentFactory for SpyFactory {
    fn name(&self) -> &str {
        "spy"
    }

    fn create(&self, config: ComponentConfig, _model_config: &ModelConfig) -> Result<Box<dyn Component>> {
        Ok(Box::new(Spy {
            config,
            factory: self.clone(),
        }))
    }

    fn load(&self, _model_dir: &Path, config: ComponentConfig, _context: &Context) -> Result<Box<dyn Component>> {
        std::thread::sleep(self.load_delay);
        self.counters.loads.fetch_add(1, Ordering::SeqCst);
        self.create(config, &ModelConfig::default())
    }
}

fn registry_with(spy: &SpyFactory) -> Arc<ComponentRegistry> {
    let mut registry = ComponentRegistry::with_builtins();
    registry.register(Arc::new(spy.clone()));
    Arc::new(registry)
}

fn spy_pipeline() -> ModelConfig {
    ModelConfig {
        pipeline: PipelineSpec::Components(vec![
            ComponentConfig::named("intent_classifier_keyword"),
            ComponentConfig::named("spy"),
        ]),
        ..ModelConfig::default()
    }
}

fn persist_spy_model(registry: &ComponentRegistry, root: &Path, name: &str) {
    Pipeline::build(&spy_pipeline(), registry)
        .unwrap()
        .train(&TrainingData::default())
        .unwrap()
        .persist(root, "p1", Some(name), None)
        .unwrap();
}

async fn router_with(root: &Path, registry: Arc<ComponentRegistry>, config: ServerConfig) -> DataRouter {
    let config = ServerConfig {
        path: root.to_string_lossy().to_string(),
        ..config
    };
    let executor = Arc::new(InProcessExecutor::new(Arc::clone(&registry)));
    DataRouter::new(config, registry, executor).await.unwrap()
}

// ── Project locking ─────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_parses_share_one_load() {
    let root = tempfile::tempdir().unwrap();
    let spy = SpyFactory {
        load_delay: Duration::from_millis(100),
        ..SpyFactory::default()
    };
    let registry = registry_with(&spy);
    persist_spy_model(&registry, root.path(), "model_20240101-000000");

    let project = Arc::new(Project::open("p1", root.path(), registry, None).await);
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let project = Arc::clone(&project);
            tokio::spawn(async move { project.parse("hello", None, Some("model_20240101-000000")).await })
        })
        .collect();
    for task in tasks {
        let (result, model) = task.await.unwrap().unwrap();
        assert_eq!(model, "model_20240101-000000");
        assert_eq!(result.intent.name, "greet");
    }
    assert_eq!(spy.counters.loads.load(Ordering::SeqCst), 1);

    project.load_model().await.unwrap();
    assert_eq!(spy.counters.loads.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unload_waits_for_in_flight_parse() {
    let root = tempfile::tempdir().unwrap();
    let spy = SpyFactory {
        process_delay: Duration::from_millis(300),
        ..SpyFactory::default()
    };
    let registry = registry_with(&spy);
    persist_spy_model(&registry, root.path(), "model_20240101-000000");
    let project = Arc::new(Project::open("p1", root.path(), registry, None).await);
    project.load_model().await.unwrap();

    let parse = {
        let project = Arc::clone(&project);
        tokio::spawn(async move { project.parse("hello", None, None).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    project.unload("model_20240101-000000").await.unwrap();
    assert!(
        spy.counters.processed.load(Ordering::SeqCst),
        "unload finished before the in-flight parse"
    );
    parse.await.unwrap().unwrap();
}

#[tokio::test]
async fn latest_trained_model_wins_over_older_ones() {
    let root = tempfile::tempdir().unwrap();
    let spy = SpyFactory::default();
    let registry = registry_with(&spy);
    persist_spy_model(&registry, root.path(), "model_20240101-000000");
    persist_spy_model(&registry, root.path(), "model_20250101-000000");
    let project = Project::open("p1", root.path(), registry, None).await;
    assert_eq!(project.load_model().await.unwrap(), "model_20250101-000000");
    assert!(!project.as_info().await.available_models.contains(&FALLBACK_MODEL_NAME.to_string()));
}

#[tokio::test]
async fn model_saved_after_startup_is_found_by_rescan() {
    let root = tempfile::tempdir().unwrap();
    let spy = SpyFactory::default();
    let registry = registry_with(&spy);
    let project = Project::open("p1", root.path(), Arc::clone(&registry), None).await;
    persist_spy_model(&registry, root.path(), "model_20240101-000000");
    let (_, model) = project.parse("hi", None, Some("model_20240101-000000")).await.unwrap();
    assert_eq!(model, "model_20240101-000000");
}

// ── Router ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn default_project_falls_back_to_keywords() {
    let root = tempfile::tempdir().unwrap();
    let router = router_with(root.path(), Arc::new(ComponentRegistry::with_builtins()), ServerConfig::default()).await;

    let js = router.parse_json(&json!({"q": "hello"})).await.unwrap();
    assert_eq!(js["intent"]["name"], "greet");
    assert_eq!(js["intent"]["confidence"], 1.0);

    let js = router.parse_json(&json!({"q": "xyz-no-match"})).await.unwrap();
    assert_eq!(js["intent"]["name"], "");
    assert_eq!(js["intent"]["confidence"], 0.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn trained_model_serves_its_labels() {
    let root = tempfile::tempdir().unwrap();
    let router = router_with(root.path(), Arc::new(ComponentRegistry::with_builtins()), ServerConfig::default()).await;
    let data = load_data_from_str(TRAIN_MD, "train.md").unwrap();

    let handle = router
        .start_train_process(&data, "p1", ModelConfig::from_template("bag_of_words").unwrap(), None)
        .await
        .unwrap();
    assert_eq!(handle.project(), "p1");
    let model = handle.wait().await.unwrap();
    assert!(model.starts_with("model_"));

    let status = router.status().await;
    let p1 = &status.available_projects["p1"];
    assert_eq!(p1.status, ProjectStatus::Ready);
    assert_eq!(p1.available_models, vec![model.clone()]);

    let js = router.parse_json(&json!({"q": "see you later", "project": "p1"})).await.unwrap();
    assert_eq!(js["intent"]["name"], "goodbye");
    assert_eq!(js["intent_ranking"][0]["name"], "goodbye");

    let js = router
        .parse_json(&json!({"q": "hello there", "project": "p1", "model": model}))
        .await
        .unwrap();
    assert_eq!(js["intent"]["name"], "greet");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn training_panic_resets_project_to_idle() {
    let root = tempfile::tempdir().unwrap();
    let spy = SpyFactory {
        explode_in_training: true,
        ..SpyFactory::default()
    };
    let router = router_with(root.path(), registry_with(&spy), ServerConfig::default()).await;
    let data = load_data_from_str(TRAIN_MD, "train.md").unwrap();

    let err = router
        .start_train_process(&data, "p1", spy_pipeline(), None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap_err();
    match err {
        QuillError::Training { project, message } => {
            assert_eq!(project, "p1");
            assert!(message.contains("spy exploded"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(router.status().await.available_projects["p1"].status, ProjectStatus::Ready);

    let model = router
        .start_train_process(&data, "p1", ModelConfig::from_template("keyword").unwrap(), None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert!(model.starts_with("model_"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_training_request_conflicts() {
    let root = tempfile::tempdir().unwrap();
    let spy = SpyFactory {
        train_delay: Duration::from_millis(300),
        ..SpyFactory::default()
    };
    let router = router_with(root.path(), registry_with(&spy), ServerConfig::default()).await;
    let data = load_data_from_str(TRAIN_MD, "train.md").unwrap();

    let first = router
        .start_train_process(&data, "p1", spy_pipeline(), None)
        .await
        .unwrap();
    assert_eq!(router.status().await.available_projects["p1"].status, ProjectStatus::Training);
    let err = router
        .start_train_process(&data, "p1", spy_pipeline(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, QuillError::AlreadyTraining { ref project } if project == "p1"));

    first.wait().await.unwrap();
    assert_eq!(router.status().await.available_projects["p1"].status, ProjectStatus::Ready);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn evaluation_reports_every_example() {
    let root = tempfile::tempdir().unwrap();
    let router = router_with(root.path(), Arc::new(ComponentRegistry::with_builtins()), ServerConfig::default()).await;
    let data = load_data_from_str(TRAIN_MD, "train.md").unwrap();
    router
        .start_train_process(&data, "p1", ModelConfig::from_template("bag_of_words").unwrap(), None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    let held_out = load_data_from_str(HELD_OUT_MD, "test.md").unwrap();
    let result = router.evaluate(&held_out, Some("p1"), None).await.unwrap();
    let eval = &result.intent_evaluation;
    assert_eq!(eval.predictions.len(), 10);
    assert!((0.0..=1.0).contains(&eval.accuracy));
    for p in &eval.predictions {
        assert!(!p.text.is_empty());
        assert!(p.intent == "greet" || p.intent == "goodbye");
        assert!((0.0..=1.0).contains(&p.confidence));
    }
    assert_eq!(router.status().await.available_projects["p1"].status, ProjectStatus::Ready);
}

#[tokio::test]
async fn parses_are_logged_when_enabled() {
    let root = tempfile::tempdir().unwrap();
    let logs = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        response_log: Some(logs.path().to_string_lossy().to_string()),
        ..ServerConfig::default()
    };
    let router = router_with(root.path(), Arc::new(ComponentRegistry::with_builtins()), config).await;
    router.parse_json(&json!({"q": "hello"})).await.unwrap();
    router.parse_json(&json!({"text": "bye"})).await.unwrap();

    let file = std::fs::read_dir(logs.path()).unwrap().next().unwrap().unwrap().path();
    let lines: Vec<serde_json::Value> = std::fs::read_to_string(file)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["project"], "default");
    assert_eq!(lines[0]["model"], FALLBACK_MODEL_NAME);
    assert_eq!(lines[1]["user_input"]["intent"]["name"], "goodbye");
}

#[tokio::test]
async fn emulated_responses_use_third_party_shape() {
    let root = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        emulate: Some("luis".into()),
        ..ServerConfig::default()
    };
    let router = router_with(root.path(), Arc::new(ComponentRegistry::with_builtins()), config).await;
    let js = router.parse_json(&json!({"q": "hey"})).await.unwrap();
    assert_eq!(js["query"], "hey");
    assert_eq!(js["topScoringIntent"]["intent"], "greet");
}

#[tokio::test]
async fn models_in_remote_storage_are_served() {
    let root = tempfile::tempdir().unwrap();
    let remote = tempfile::tempdir().unwrap();
    let registry = Arc::new(ComponentRegistry::with_builtins());
    let data = load_data_from_str(TRAIN_MD, "train.md").unwrap();
    let (_, _) = quill_core::train::do_train(
        &ModelConfig::from_template("bag_of_words").unwrap(),
        &data,
        &registry,
        Some(remote.path()),
        "shared",
        Some("model_20240101-000000"),
    )
    .unwrap();

    let config = ServerConfig {
        storage: Some(format!("dir:{}", remote.path().display())),
        ..ServerConfig::default()
    };
    let router = router_with(root.path(), registry, config).await;
    let js = router
        .parse_json(&json!({"q": "bye bye", "project": "shared"}))
        .await
        .unwrap();
    assert_eq!(js["intent"]["name"], "goodbye");
    assert!(root.path().join("shared/model_20240101-000000/metadata.json").is_file());
}
