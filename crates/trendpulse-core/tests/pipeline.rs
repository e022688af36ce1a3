mod common;

use std::sync::Arc;

use common::*;
use trendpulse_core::{
    AgentSettings, CsvRowStore, InMemoryRowStore, Pipeline, RewriteOutcome, RowStore, RunLog,
    RunLogStats, StyleRewriter, Supervisor, Topic,
};

fn topic_in(dir: &std::path::Path, name: &str) -> Topic {
    let path = dir.join(format!("1-{name}"));
    std::fs::create_dir_all(&path).expect("topic dir");
    Topic {
        source_path: Some(path),
        ..Topic::new(name)
    }
}

#[tokio::test]
async fn research_all_skips_failed_topics_and_logs_every_run() {
    let temp = tempfile::tempdir().expect("temp dir");
    let (_, model) = ScriptedModel::new()
        .decide(search_response("launch date"))
        .decide(answer_response("It launched on time"))
        .decide("no structured answer today")
        .into_dyn();
    let (_, search) = ScriptedSearch::new(2).into_dyn();
    let store: Arc<dyn RowStore> = Arc::new(CsvRowStore::new(temp.path().join("topics.csv")));

    let good = topic_in(temp.path(), "rocket-launch");
    let bad = topic_in(temp.path(), "mystery");
    store.upsert_topic(&good).expect("seed");
    store.upsert_topic(&bad).expect("seed");

    let log_dir = temp.path().join("logs");
    let pipeline = Pipeline::new(
        agent(model.clone(), search, store.clone(), AgentSettings::default()),
        StyleRewriter::new(model, Supervisor::default(), 2),
        store.clone(),
    )
    .with_run_log(RunLog::new(&log_dir, 0));

    let topics = pipeline.stored_topics().expect("topics");
    assert_eq!(topics.len(), 2);

    let outcomes = pipeline.research_all(&topics).await;

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].is_done());
    assert!(!outcomes[1].is_done());

    let rows = store.rows().expect("rows");
    assert_eq!(rows[0].narrative, "Simple safe answer");
    assert!(rows[1].narrative.is_empty());

    let trace_file = good
        .source_path
        .as_ref()
        .expect("dir")
        .join(format!("{}.trace.json", outcomes[0].run_id));
    assert!(trace_file.exists());

    let stats = RunLogStats::analyze(RunLog::new(&log_dir, 0).current_path()).expect("stats");
    assert_eq!(stats.total_runs, 2);
    assert_eq!(stats.done, 1);
    assert_eq!(stats.failed_topics, vec!["mystery".to_string()]);
    assert!((stats.average_links() - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn rewrite_all_stores_accepted_scripts_and_skips_unresearched_rows() {
    let (model, dyn_model) = ScriptedModel::new()
        .decide(answer_response("Known facts"))
        .rewrite("Host : Big news today!\nGuest : Tell me more.")
        .into_dyn();
    let (_, search) = ScriptedSearch::new(1).into_dyn();
    let store: Arc<dyn RowStore> = Arc::new(InMemoryRowStore::new());
    store.upsert_topic(&Topic::new("pending")).expect("seed");

    let pipeline = Pipeline::new(
        agent(dyn_model.clone(), search, store.clone(), AgentSettings::default()),
        StyleRewriter::new(dyn_model, Supervisor::default(), 2),
        store.clone(),
    );
    let outcomes = pipeline.research_all(&[Topic::new("researched")]).await;
    assert!(outcomes[0].is_done());

    let report = pipeline
        .rewrite_all("Two podcast hosts chatting.", "English")
        .await
        .expect("rewrite");

    assert_eq!(report.accepted, vec!["researched".to_string()]);
    assert_eq!(report.skipped, 1);
    assert!(report.rejected.is_empty());

    let row = store.get("researched").expect("get").expect("row");
    assert_eq!(row.result, "Host : Big news today!\nGuest : Tell me more.");
    assert_eq!(row.narrative, "Simple safe answer");

    let prompt = &model.prompts(PromptKind::Rewrite)[0];
    assert!(prompt.starts_with("## Requirements:\nTwo podcast hosts chatting."));
    assert!(prompt.contains("Simple safe answer"));
}

#[tokio::test]
async fn rejected_rewrite_is_annotated_and_retried() {
    let (model, dyn_model) = ScriptedModel::new()
        .rewrite("Host : this is all made up")
        .rewrite("Host : A grounded recap.")
        .into_dyn();
    let rewriter = StyleRewriter::new(dyn_model, Supervisor::default(), 2);

    let outcome = rewriter
        .rewrite("The narrative.", "Calm news anchor.", "English")
        .await;

    match outcome {
        RewriteOutcome::Accepted(script) => {
            assert_eq!(script.lines.len(), 1);
            assert_eq!(script.lines[0].line, "A grounded recap.");
        }
        other => panic!("expected acceptance, got {other:?}"),
    }
    let prompts = model.prompts(PromptKind::Rewrite);
    assert_eq!(prompts.len(), 2);
    assert!(!prompts[0].contains("rejected by the supervisor"));
    assert!(prompts[1].contains("The narrative.\n\nNote: the previous answer attempt was rejected"));
}

#[tokio::test]
async fn rewrite_gives_up_after_max_attempts() {
    let (_, dyn_model) = ScriptedModel::new()
        .rewrite("coffee break first")
        .rewrite("still on a coffee break")
        .into_dyn();
    let rewriter = StyleRewriter::new(dyn_model, Supervisor::default(), 2);

    let outcome = rewriter.rewrite("Narrative", "Any style", "English").await;

    assert_eq!(
        outcome,
        RewriteOutcome::Rejected {
            reason: "answer contains nonsense marker `coffee break`".to_string(),
            attempts: 2,
        }
    );
}

#[tokio::test]
async fn rewrite_topic_requires_a_narrative() {
    let (_, dyn_model) = ScriptedModel::new().into_dyn();
    let (_, search) = ScriptedSearch::new(1).into_dyn();
    let store: Arc<dyn RowStore> = Arc::new(InMemoryRowStore::new());
    store.upsert_topic(&Topic::new("fresh")).expect("seed");
    let pipeline = Pipeline::new(
        agent(dyn_model.clone(), search, store.clone(), AgentSettings::default()),
        StyleRewriter::new(dyn_model, Supervisor::default(), 1),
        store,
    );

    let err = pipeline
        .rewrite_topic("fresh", "style", "English")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no narrative"));
    assert!(pipeline.rewrite_topic("absent", "style", "English").await.is_err());
}

#[tokio::test]
async fn topics_in_dir_follows_folder_index_and_reuses_stored_metrics() {
    let temp = tempfile::tempdir().expect("temp dir");
    for folder in ["2-beta", "10-gamma", "1-alpha"] {
        std::fs::create_dir_all(temp.path().join(folder)).expect("topic dir");
    }
    std::fs::write(temp.path().join("notes.txt"), "not a topic").expect("file");

    let (_, model) = ScriptedModel::new().into_dyn();
    let (_, search) = ScriptedSearch::new(1).into_dyn();
    let store: Arc<dyn RowStore> = Arc::new(InMemoryRowStore::new());
    store
        .upsert_topic(&Topic {
            search_volume: "50K+".into(),
            ..Topic::new("alpha")
        })
        .expect("seed");
    let pipeline = Pipeline::new(
        agent(model.clone(), search, store.clone(), AgentSettings::default()),
        StyleRewriter::new(model, Supervisor::default(), 1),
        store,
    );

    let topics = pipeline.topics_in_dir(temp.path()).expect("topics");

    let names: Vec<&str> = topics.iter().map(|topic| topic.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "beta", "gamma"]);
    assert_eq!(topics[0].search_volume, "50K+");
    assert_eq!(topics[0].source_path, Some(temp.path().join("1-alpha")));
    assert!(topics[1].search_volume.is_empty());
}
