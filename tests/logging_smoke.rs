use std::fs;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use apex_survival::{
    log_app_start, log_run_configured, run_pipeline, LoggingConfig, PipelineConfig,
};
use tempfile::tempdir;
use tracing::dispatcher::with_default;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriter;

#[derive(Clone, Default)]
struct SharedWriter {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
    fn output_string(&self) -> String {
        let bytes = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        String::from_utf8_lossy(&bytes).to_string()
    }
}

struct SharedWriterGuard {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture_logs(max_level: Level, f: impl FnOnce()) -> String {
    let writer = SharedWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_max_level(max_level)
        .with_writer(writer.clone())
        .finish();
    let dispatch = tracing::Dispatch::new(subscriber);

    with_default(&dispatch, f);
    writer.output_string()
}

fn pipeline_config(root: &Path) -> PipelineConfig {
    PipelineConfig {
        raw_dir: root.join("raw"),
        processed_dir: root.join("processed"),
        ..PipelineConfig::default()
    }
}

fn write_history(raw_dir: &Path) {
    fs::create_dir_all(raw_dir).unwrap();
    let mut csv = String::from("my_duration,my_damage,my_kills,distance,shots_fired\n");
    for i in 0..20 {
        csv.push_str(&format!(
            "{},{},{},{},{}\n",
            400 + i * 15,
            120 + i * 40,
            i % 4,
            900 + i * 55,
            50 + i * 3
        ));
    }
    fs::write(raw_dir.join("history.csv"), csv).unwrap();
}

#[test]
fn successful_run_emits_stage_events() {
    let dir = tempdir().unwrap();
    let cfg = pipeline_config(dir.path());
    write_history(&cfg.raw_dir);

    let logs = capture_logs(Level::INFO, || {
        run_pipeline(&cfg, "history.csv").expect("pipeline should succeed");
    });

    for event in [
        "pipeline.run.start",
        "schema.normalize.finish",
        "features.derive.finish",
        "pipeline.persist.finish",
        "trainer.fit.start",
        "trainer.fit.finish",
        "pipeline.run.finish",
    ] {
        assert!(
            logs.contains(&format!("\"event\":\"{event}\"")),
            "missing {event} in {logs}"
        );
    }
    assert!(!logs.contains("\"event\":\"pipeline.run.error\""));
    assert!(!logs.contains("\"event\":\"loader.source.read\""));
}

#[test]
fn source_reads_are_logged_at_debug() {
    let dir = tempdir().unwrap();
    let cfg = pipeline_config(dir.path());
    write_history(&cfg.raw_dir);

    let logs = capture_logs(Level::DEBUG, || {
        run_pipeline(&cfg, "history.csv").unwrap();
    });

    assert!(logs.contains("\"event\":\"loader.source.read\""));
}

#[test]
fn failed_run_emits_error_event() {
    let dir = tempdir().unwrap();
    let cfg = pipeline_config(dir.path());

    let logs = capture_logs(Level::INFO, || {
        run_pipeline(&cfg, "missing.csv").expect_err("source does not exist");
    });

    assert!(logs.contains("\"event\":\"pipeline.run.error\""));
    assert!(logs.contains("missing.csv"));
    assert!(!logs.contains("\"event\":\"pipeline.run.finish\""));
}

#[test]
fn binary_lifecycle_helpers_emit_baseline_events() {
    let logs = capture_logs(Level::INFO, || {
        log_app_start(&LoggingConfig::default());
        log_run_configured(
            Path::new("data/raw/history.csv"),
            Path::new("data/processed/out.csv"),
            "survival_time",
        );
    });

    assert!(logs.contains("\"event\":\"app.start\""));
    assert!(logs.contains("\"event\":\"run.configured\""));
    assert!(logs.contains("\"target_column\":\"survival_time\""));
}
