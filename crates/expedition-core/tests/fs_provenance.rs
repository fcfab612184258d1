//! Runs recorded through the filesystem sink, audited, and tampered with.

use std::path::Path;
use std::sync::Arc;

use expedition_core::fakes::{ScriptedExecutor, ScriptedExtractor, ScriptedGenerator};
use expedition_core::provenance::ProvenanceSink;
use expedition_core::{
    audit_log, AuditFinding, CommandSpec, CycleMetrics, ExpeditionConfig, ExpeditionOrchestrator,
    FinalizationReport, FsProvenanceSink, LoopStages, ProvenanceRecorder, QualityThresholds,
    RunOutcome, ScopingStages, StageCommands, StageKind, StageTimeouts, StorageError,
};
use tokio_util::sync::CancellationToken;

fn config(root: &Path) -> ExpeditionConfig {
    let mut config = ExpeditionConfig::for_domain("payments");
    config.sources = vec!["wiki/payments.md".to_string()];
    config.output_dir = root.join("out");
    config.provenance_dir = root.join("provenance");
    config.thresholds = QualityThresholds::default().with_cycles(1, 3);
    config.timeouts = StageTimeouts::unbounded();
    config
}

fn scripted(config: ExpeditionConfig, sink: Arc<FsProvenanceSink>) -> ExpeditionOrchestrator {
    let scoping = ScopingStages::from_config(&config);
    ExpeditionOrchestrator::new(
        config,
        scoping,
        LoopStages {
            extractor: Arc::new(ScriptedExtractor::healthy()),
            generator: Arc::new(ScriptedGenerator::healthy()),
            executor: Arc::new(ScriptedExecutor::sequence(vec![
                CycleMetrics::new(0.90, 0.90, 0.80),
                CycleMetrics::new(0.99, 0.97, 0.95),
            ])),
        },
        ProvenanceRecorder::new(sink),
    )
    .unwrap()
}

#[tokio::test]
async fn test_recorded_log_reads_back_and_audits_clean() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let sink = Arc::new(FsProvenanceSink::new(&cfg.provenance_dir).unwrap());
    let orchestrator = scripted(cfg, sink.clone());

    let report = orchestrator.run(CancellationToken::new()).await.unwrap();
    assert_eq!(report.outcome(), RunOutcome::Success);

    let stored = sink.read_log(&report.log.run_id).await.unwrap();
    assert_eq!(stored, report.log);
    assert!(audit_log(&stored, None).is_consistent());

    let runs = sink.list_runs(Some("payments")).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].digest, report.digest);
    assert_eq!(runs[0].cycles, 2);
}

#[tokio::test]
async fn test_tampered_log_is_detected_on_read() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let sink = Arc::new(FsProvenanceSink::new(&cfg.provenance_dir).unwrap());
    let report = scripted(cfg, sink.clone())
        .run(CancellationToken::new())
        .await
        .unwrap();

    let path = sink.run_dir(&report.log.run_id).join("expedition.json");
    let edited = std::fs::read_to_string(&path)
        .unwrap()
        .replacen("0.9", "0.99", 1);
    std::fs::write(&path, edited).unwrap();

    let err = sink.read_log(&report.log.run_id).await.unwrap_err();
    assert!(matches!(err, StorageError::DigestMismatch { .. }));
}

#[tokio::test]
async fn test_edited_log_with_recomputed_digest_fails_audit() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let sink = Arc::new(FsProvenanceSink::new(&cfg.provenance_dir).unwrap());
    let report = scripted(cfg, sink.clone())
        .run(CancellationToken::new())
        .await
        .unwrap();

    // Someone rewrites history consistently enough to pass the digest check.
    let mut forged = report.log.clone();
    forged.cycles[0].metrics = CycleMetrics::new(1.0, 1.0, 1.0);
    let audit = audit_log(&forged, None);
    assert!(!audit.is_consistent());
    assert!(audit
        .findings
        .contains(&AuditFinding::PassedCycleNotFinal { cycle: 1 }));
}

#[tokio::test]
async fn test_nan_measurement_is_recorded_as_readable_failure() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let sink = Arc::new(FsProvenanceSink::new(&cfg.provenance_dir).unwrap());
    let scoping = ScopingStages::from_config(&cfg);
    let orchestrator = ExpeditionOrchestrator::new(
        cfg,
        scoping,
        LoopStages {
            extractor: Arc::new(ScriptedExtractor::healthy()),
            generator: Arc::new(ScriptedGenerator::healthy()),
            executor: Arc::new(ScriptedExecutor::sequence(vec![
                CycleMetrics::new(f64::NAN, 1.0, 1.0),
                CycleMetrics::new(0.99, 0.97, 0.95),
            ])),
        },
        ProvenanceRecorder::new(sink.clone()),
    )
    .unwrap();

    let report = orchestrator.run(CancellationToken::new()).await.unwrap();
    assert_eq!(report.outcome(), RunOutcome::Success);

    let stored = sink.read_log(&report.log.run_id).await.unwrap();
    assert_eq!(stored, report.log);
    assert_eq!(stored.cycles[0].failed_stages, vec![StageKind::Execution]);
    assert_eq!(stored.cycles[0].metrics, CycleMetrics::zero());

    let execution = stored
        .stages
        .iter()
        .find(|s| s.stage == StageKind::Execution && s.cycle == Some(1))
        .unwrap();
    assert!(execution.output.is_none());
    assert_eq!(
        execution.errors,
        vec!["execution reported invalid primary_pass_rate NaN".to_string()]
    );

    assert_eq!(sink.list_runs(None).await.unwrap().len(), 1);
    assert!(audit_log(&stored, None).is_consistent());
}

#[cfg(unix)]
#[tokio::test]
async fn test_command_stages_and_builtin_finalizers() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    let sh = |script: &str| Some(CommandSpec::new("sh", &["-c", script]));
    cfg.stages = StageCommands {
        extraction: sh(
            r#"cat >/dev/null; echo '{"entity_count":12,"relationship_count":4,"store_ref":"kb://payments"}'"#,
        ),
        generation: sh(r#"cat >/dev/null; echo '{"scenario_count":30,"location":"scenarios/"}'"#),
        execution: sh(
            r#"cat >/dev/null; echo '{"primary_pass_rate":0.98,"coverage_ratio":0.97,"completeness_ratio":0.94,"gaps":[]}'"#,
        ),
        ..StageCommands::default()
    };
    let sink = Arc::new(FsProvenanceSink::new(&cfg.provenance_dir).unwrap());
    let out_dir = cfg.output_dir.clone();
    let orchestrator =
        ExpeditionOrchestrator::from_config(cfg, ProvenanceRecorder::new(sink.clone())).unwrap();

    let report = orchestrator.run(CancellationToken::new()).await.unwrap();
    assert_eq!(report.outcome(), RunOutcome::Success);
    assert_eq!(report.log.cycle_count(), 1);

    let FinalizationReport::Succeeded { artifacts } = &report.log.finalization else {
        panic!("unexpected finalization: {:?}", report.log.finalization);
    };
    assert_eq!(artifacts.len(), 2);
    let run_out = out_dir.join(&report.log.run_id);
    assert!(run_out.join("manifest.json").exists());
    assert!(run_out.join("learnings.json").exists());
}
