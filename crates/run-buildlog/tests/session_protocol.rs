use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use run_buildlog::{BuildLogError, BuildLogMessage, BuildSession, ConnectionError, InMemoryConnector, ProgressBody,
                   ScriptItem, SessionOptions, SessionOutcome, SessionState, SubscribeRequest};
use run_core::{ArtifactDownload, ArtifactId, SetupEventKind, SetupStep};
use run_pipeline::event_channel;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn started(id: ArtifactId, cache_hit: bool) -> ScriptItem {
    BuildLogMessage::ArtifactStarted { artifact_id: id, cache_hit }.into()
}

fn succeeded(id: ArtifactId, uri: &str) -> ScriptItem {
    BuildLogMessage::ArtifactSucceeded { artifact_id: id,
                                         artifact_uri: uri.to_string(),
                                         artifact_checksum: format!("sum-{id}"),
                                         log_uri: format!("https://logs/{id}"),
                                         cache_hit: false }.into()
}

fn failed(id: ArtifactId, msg: &str) -> ScriptItem {
    BuildLogMessage::ArtifactFailed { artifact_id: id, error_message: msg.to_string(), log_uri: String::new() }.into()
}

fn progress(id: ArtifactId, msg: &str) -> ScriptItem {
    BuildLogMessage::ArtifactProgress { artifact_id: id,
                                        timestamp: "2024-01-01T00:00:00Z".into(),
                                        source: "builder".into(),
                                        pipe_name: "stdout".into(),
                                        body: ProgressBody { facility: "INFO".into(), msg: msg.to_string() } }.into()
}

struct Run {
    result: Result<SessionOutcome, BuildLogError>,
    downloads: Vec<ArtifactDownload>,
    events: Vec<SetupEventKind>,
}

fn monitored(ids: &[ArtifactId]) -> IndexMap<ArtifactId, String> {
    ids.iter().enumerate().map(|(i, id)| (*id, format!("pkg{i}"))).collect()
}

async fn run_session(connector: InMemoryConnector, opts: SessionOptions) -> Run {
    let (producer, mut stream) = event_channel(512);
    let (session, mut dl) = BuildSession::open(Arc::new(connector), opts, producer.clone(), CancellationToken::new())
        .await
        .expect("session opens");
    drop(producer);
    let collect = async {
        let mut out = Vec::new();
        while let Some(d) = dl.next().await {
            out.push(d);
        }
        out
    };
    let (downloads, result) = tokio::join!(collect, session.wait());
    let mut events = Vec::new();
    while let Some(ev) = stream.recv().await {
        events.push(ev.kind);
    }
    Run { result, downloads, events }
}

fn count(events: &[SetupEventKind], pred: impl Fn(&SetupEventKind) -> bool) -> usize {
    events.iter().filter(|e| pred(e)).count()
}

#[tokio::test]
async fn cache_hit_suppresses_start_and_download() {
    let (a, b) = (ArtifactId::new_v4(), ArtifactId::new_v4());
    let connector = InMemoryConnector::new(vec![BuildLogMessage::BuildStarted.into(),
                                                started(a, false),
                                                started(b, true),
                                                succeeded(a, "https://dl/a"),
                                                succeeded(b, ""),
                                                BuildLogMessage::BuildSucceeded.into()]);
    let build_id = Uuid::new_v4();
    let run = run_session(connector.clone(), SessionOptions::new(build_id, monitored(&[a, b]))).await;

    let outcome = run.result.expect("build succeeds");
    assert_eq!(outcome.state, SessionState::Succeeded);
    assert!(outcome.ended_early);
    assert_eq!(outcome.built, vec![a]);
    assert_eq!(outcome.cache_hits_without_uri, vec![b]);
    assert_eq!(run.downloads.iter().map(|d| d.artifact_id).collect::<Vec<_>>(), vec![a]);
    assert_eq!(run.downloads[0].uri, "https://dl/a");

    assert_eq!(count(&run.events, |e| matches!(e, SetupEventKind::BuildStarted { total: 2 })), 1);
    assert_eq!(count(&run.events,
                     |e| matches!(e, SetupEventKind::ArtifactStarted { step: SetupStep::Build, artifact_id, .. } if *artifact_id == a)),
               1);
    assert_eq!(count(&run.events, |e| matches!(e, SetupEventKind::ArtifactStarted { .. })), 1);
    assert_eq!(count(&run.events, |e| matches!(e, SetupEventKind::ArtifactCompleted { .. })), 2);
    assert!(run.events.contains(&SetupEventKind::ArtifactCompleted { step: SetupStep::Build,
                                                                    artifact_id: b,
                                                                    log_uri: Some(format!("https://logs/{b}")),
                                                                    cached: true }));
    assert_eq!(run.events.last(), Some(&SetupEventKind::BuildFinished { failed: false }));
    assert_eq!(connector.requests().first(), Some(&SubscribeRequest::Build { recipe_id: build_id }));
}

#[tokio::test]
async fn build_failed_wraps_last_artifact_error() {
    let a = ArtifactId::new_v4();
    let connector = InMemoryConnector::new(vec![started(a, false),
                                                failed(a, "boom"),
                                                BuildLogMessage::BuildFailed { error_message: "oh no".into() }.into()]);
    let run = run_session(connector, SessionOptions::new(Uuid::new_v4(), monitored(&[a]))).await;

    let err = run.result.unwrap_err();
    let text = err.to_string();
    assert!(text.contains("boom") && text.contains("oh no"), "{text}");
    assert!(err.is_build_failure());
    match err {
        BuildLogError::BuildFailed { failures, .. } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].artifact_id, a);
            assert_eq!(failures[0].message, "boom");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(run.downloads.is_empty());
    assert_eq!(count(&run.events, |e| matches!(e, SetupEventKind::ArtifactFailed { .. })), 1);
    assert_eq!(run.events.last(), Some(&SetupEventKind::BuildFinished { failed: true }));
}

#[tokio::test]
async fn partial_failure_does_not_stop_other_artifacts() {
    let (a, b) = (ArtifactId::new_v4(), ArtifactId::new_v4());
    let connector = InMemoryConnector::new(vec![started(a, false),
                                                started(b, false),
                                                failed(a, "boom"),
                                                progress(a, "late line"),
                                                progress(b, "compiling b"),
                                                succeeded(b, "https://dl/b"),
                                                BuildLogMessage::BuildFailed { error_message: "1 failed".into() }.into()]);
    let run = run_session(connector, SessionOptions::new(Uuid::new_v4(), monitored(&[a, b]))).await;

    assert!(run.result.unwrap_err().is_build_failure());
    // b sigue siendo descargable aunque a haya fallado
    assert_eq!(run.downloads.iter().map(|d| d.artifact_id).collect::<Vec<_>>(), vec![b]);
    let logs: Vec<_> = run.events
                          .iter()
                          .filter_map(|e| match e {
                              SetupEventKind::ArtifactBuildLog { artifact_id, message, .. } => Some((*artifact_id, message.clone())),
                              _ => None,
                          })
                          .collect();
    assert_eq!(logs, vec![(b, "compiling b".to_string())]);
}

#[tokio::test]
async fn repeated_messages_are_ignored() {
    let (a, b) = (ArtifactId::new_v4(), ArtifactId::new_v4());
    let connector = InMemoryConnector::new(vec![BuildLogMessage::BuildStarted.into(),
                                                BuildLogMessage::BuildStarted.into(),
                                                started(a, false),
                                                started(a, false),
                                                succeeded(a, "https://dl/a"),
                                                succeeded(a, "https://dl/a"),
                                                started(b, false),
                                                succeeded(b, "https://dl/b")]);
    let run = run_session(connector, SessionOptions::new(Uuid::new_v4(), monitored(&[a, b]))).await;

    assert!(run.result.is_ok());
    assert_eq!(run.downloads.len(), 2);
    assert_eq!(count(&run.events, |e| matches!(e, SetupEventKind::ArtifactStarted { .. })), 2);
    assert_eq!(count(&run.events, |e| matches!(e, SetupEventKind::ArtifactCompleted { .. })), 2);
}

#[tokio::test]
async fn unknown_unmonitored_and_build_id_messages_are_ignored() {
    let a = ArtifactId::new_v4();
    let build_id = Uuid::new_v4();
    let stranger = ArtifactId::new_v4();
    let connector = InMemoryConnector::new(vec![ScriptItem::Raw(r#"{"type": "artifact_teleported"}"#.into()),
                                                started(stranger, false),
                                                started(ArtifactId(build_id), false),
                                                succeeded(stranger, "https://dl/x"),
                                                BuildLogMessage::Heartbeat.into(),
                                                succeeded(a, "https://dl/a")]);
    let run = run_session(connector, SessionOptions::new(build_id, monitored(&[a]))).await;

    assert!(run.result.is_ok());
    assert_eq!(run.downloads.len(), 1);
    assert_eq!(count(&run.events, |e| matches!(e, SetupEventKind::ArtifactStarted { .. })), 0);
    assert_eq!(count(&run.events, |e| matches!(e, SetupEventKind::Heartbeat { .. })), 1);
}

#[tokio::test]
async fn read_error_is_distinct_from_build_failure() {
    let a = ArtifactId::new_v4();
    let connector = InMemoryConnector::new(vec![started(a, false),
                                                ScriptItem::Error(ConnectionError::Io("connection reset".into()))]);
    let run = run_session(connector, SessionOptions::new(Uuid::new_v4(), monitored(&[a]))).await;

    let err = run.result.unwrap_err();
    assert_eq!(err, BuildLogError::Connection(ConnectionError::Io("connection reset".into())));
    assert!(!err.is_build_failure());
}

#[tokio::test]
async fn malformed_messages_are_protocol_fatal() {
    let a = ArtifactId::new_v4();
    let garbage = InMemoryConnector::new(vec![ScriptItem::Raw("{not json".into())]);
    let run = run_session(garbage, SessionOptions::new(Uuid::new_v4(), monitored(&[a]))).await;
    assert!(matches!(run.result, Err(BuildLogError::Malformed(_))));

    let no_uri = InMemoryConnector::new(vec![started(a, false), succeeded(a, "")]);
    let run = run_session(no_uri, SessionOptions::new(Uuid::new_v4(), monitored(&[a]))).await;
    assert!(matches!(run.result, Err(BuildLogError::Malformed(_))));
    assert!(run.downloads.is_empty());
}

#[tokio::test]
async fn close_cancels_a_stalled_session() {
    let a = ArtifactId::new_v4();
    let connector = InMemoryConnector::new(vec![BuildLogMessage::BuildStarted.into()]);
    let (producer, _stream) = event_channel(16);
    let (session, _dl) = BuildSession::open(Arc::new(connector.clone()),
                                            SessionOptions::new(Uuid::new_v4(), monitored(&[a])),
                                            producer,
                                            CancellationToken::new()).await
                                                                     .unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), session.close(Duration::from_secs(1))).await
                                                                                                     .expect("close is bounded");
    assert_eq!(result, Err(BuildLogError::Cancelled));
    assert_eq!(connector.closes(), 1);
}

#[tokio::test]
async fn verbose_mode_subscribes_per_artifact() {
    let a = ArtifactId::new_v4();
    let connector = InMemoryConnector::new(vec![started(a, true),
                                                ScriptItem::Pause(Duration::from_millis(300)),
                                                succeeded(a, "https://dl/a")])
        .with_artifact_script(a, vec![progress(a, "line 1"), progress(a, "line 2")]);
    let mut opts = SessionOptions::new(Uuid::new_v4(), monitored(&[a]));
    opts.verbose = true;
    let run = run_session(connector.clone(), opts).await;

    let outcome = run.result.expect("session ok");
    // cache-hit: sin evento de inicio, pero con logs finos
    assert_eq!(count(&run.events, |e| matches!(e, SetupEventKind::ArtifactStarted { .. })), 0);
    assert_eq!(count(&run.events, |e| matches!(e, SetupEventKind::ArtifactBuildLog { .. })), 2);
    assert_eq!(outcome.cache_hits.len(), 1);
    assert!(connector.requests().contains(&SubscribeRequest::Artifact { artifact_id: a }));
    assert_eq!(connector.connects(), 2);
    // ambas conexiones se cerraron
    assert_eq!(connector.closes(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn build_completion_precedes_every_download_hand_off() {
    let ids: Vec<ArtifactId> = (0..200).map(|_| ArtifactId::new_v4()).collect();
    for _ in 0..10 {
        let mut script: Vec<ScriptItem> = ids.iter().map(|id| started(*id, false)).collect();
        script.extend(ids.iter().map(|id| succeeded(*id, &format!("https://dl/{id}"))));
        let connector = Arc::new(InMemoryConnector::new(script));
        let (producer, mut stream) = event_channel(4096);
        let (session, mut dl) = BuildSession::open(connector,
                                                   SessionOptions::new(Uuid::new_v4(), monitored(&ids)),
                                                   producer.clone(),
                                                   CancellationToken::new())
            .await
            .expect("session opens");
        let drainer = producer.clone();
        drop(producer);
        let drain = async move {
            while let Some(d) = dl.next().await {
                let kind = SetupEventKind::ArtifactStarted { step: SetupStep::Download,
                                                             artifact_id: d.artifact_id,
                                                             total: None };
                drainer.emit(kind).await.expect("stream open");
            }
            drop(drainer);
        };
        let ((), result) = tokio::join!(drain, session.wait());
        assert!(result.expect("build succeeds").ended_early);

        let mut completed = std::collections::HashSet::new();
        let mut downloads = 0;
        while let Some(ev) = stream.recv().await {
            match ev.kind {
                SetupEventKind::ArtifactCompleted { step: SetupStep::Build, artifact_id, .. } => {
                    completed.insert(artifact_id);
                }
                SetupEventKind::ArtifactStarted { step: SetupStep::Download, artifact_id, .. } => {
                    assert!(completed.contains(&artifact_id), "download of {artifact_id} started before its build completed");
                    downloads += 1;
                }
                _ => {}
            }
        }
        assert_eq!(downloads, ids.len());
    }
}
