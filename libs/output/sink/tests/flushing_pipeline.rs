//! End-to-end behaviour of an assembled output: timer, queue, sender and
//! error handlers together.

use output_sink::test_utils::{CollectingSender, FailingSender, SlowSender};
use output_sink::{
    Batch, ConfigError, ErrorHandlers, Output, OutputPlugin, OutputRegistry, OutputsConfig,
    PluginConfig, Record, SendFailure, Sender, SignalFxOutput, Sink, SinkConfig, SinkError,
};
use std::collections::HashSet;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn counting_handler(counter: &Arc<AtomicUsize>) -> impl Fn(&SendFailure) -> Result<(), SinkError> {
    let counter = Arc::clone(counter);
    move |_: &SendFailure| -> Result<(), SinkError> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn single_record_is_flushed_once_on_first_tick() {
    let sender = Arc::new(CollectingSender::new());
    let config = SinkConfig::with_defaults("test").with_flush_interval(Duration::from_millis(100));
    let output = assert_ok!(Output::assemble(
        config,
        sender.clone(),
        ErrorHandlers::logging()
    ));

    assert_ok!(output.accept(Record::gauge("cpu", 0.5)));
    tokio::time::sleep(Duration::from_millis(110)).await;

    assert_eq!(sender.batch_count(), 1);
    assert_eq!(sender.records()[0].name, "cpu");

    // Later ticks find nothing to send
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(sender.batch_count(), 1);
    assert_eq!(sender.record_count(), 1);

    output.shutdown().await;
    assert_eq!(sender.record_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn failing_sender_never_blocks_ingress() {
    let sender = Arc::new(FailingSender::new());
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let handlers = ErrorHandlers::new(Vec::new())
        .with_handler(counting_handler(&first))
        .with_handler(counting_handler(&second));

    let config = SinkConfig::with_defaults("failing").with_flush_interval(Duration::from_millis(100));
    let output = Output::assemble(config, sender.clone(), handlers).unwrap();

    for round in 0..10 {
        for i in 0..10 {
            assert_ok!(output.accept(Record::gauge(format!("m{}-{}", round, i), i as f64)));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let snapshot = output.shutdown().await;
    let failures = sender.attempts();

    assert!(failures > 0);
    assert_eq!(snapshot.records_accepted, 100);
    assert_eq!(snapshot.records_failed, 100);
    assert_eq!(snapshot.batches_failed as usize, failures);
    assert_eq!(first.load(Ordering::SeqCst), failures);
    assert_eq!(second.load(Ordering::SeqCst), failures);
}

#[tokio::test]
async fn shutdown_delivers_everything_buffered() {
    let sender = Arc::new(CollectingSender::new());
    let config = SinkConfig::with_defaults("test").with_flush_interval(Duration::from_secs(3600));
    let output = Output::assemble(config, sender.clone(), ErrorHandlers::logging()).unwrap();

    let n = 1_000;
    let ingress = output.ingress();
    for i in 0..n {
        ingress.accept(Record::counter(format!("m{}", i), i as f64)).unwrap();
    }

    let snapshot = output.shutdown().await;
    assert_eq!(snapshot.records_delivered, n as u64);
    assert_eq!(snapshot.records_lost(), 0);
    assert!(sender.is_closed());

    let values: Vec<f64> = sender.records().iter().map(|r| r.value).collect();
    assert_eq!(values.len(), n);
    assert!(values.windows(2).all(|w| w[0] < w[1]));

    assert_err!(ingress.accept(Record::gauge("late", 1.0)));
}

#[tokio::test(start_paused = true)]
async fn empty_batches_are_never_sent() {
    let sender = Arc::new(CollectingSender::new());
    let config = SinkConfig::with_defaults("idle").with_flush_interval(Duration::from_millis(50));
    let output = Output::assemble(config, sender.clone(), ErrorHandlers::logging()).unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(output.flush(), None);

    let snapshot = output.shutdown().await;
    assert_eq!(sender.batch_count(), 0);
    assert_eq!(snapshot.batches_flushed, 0);
}

#[tokio::test(start_paused = true)]
async fn backlog_drops_oldest_batch_and_reports_it() {
    let sender = Arc::new(SlowSender::new(Duration::from_secs(1)));
    let drops = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&drops);
    let handlers = ErrorHandlers::logging().with_handler(move |f: &SendFailure| -> Result<(), SinkError> {
        if f.error.is_drop() {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    });

    let config = SinkConfig::with_defaults("slow")
        .with_flush_interval(Duration::from_secs(3600))
        .with_queue_capacity(2)
        .with_shutdown_grace(Duration::from_secs(30));
    let output = Output::assemble(config, sender.clone(), handlers).unwrap();

    for i in 0..5 {
        output.accept(Record::gauge(format!("m{}", i), i as f64)).unwrap();
        assert!(output.flush().is_some());
        tokio::task::yield_now().await;
    }

    let snapshot = output.shutdown().await;
    let dropped = drops.load(Ordering::SeqCst);

    // One send in flight plus two queued; the rest were evicted
    assert!(dropped >= 2, "dropped {}", dropped);
    assert_eq!(snapshot.batches_dropped as usize, dropped);
    assert_eq!(snapshot.records_delivered + snapshot.records_dropped, 5);
    assert_eq!(sender.inner().record_count() as u64, snapshot.records_delivered);

    // The newest batch always survives eviction
    assert!(sender.inner().records().iter().any(|r| r.name == "m4"));
}

#[tokio::test(start_paused = true)]
async fn grace_expiry_accounts_for_every_record() {
    let sender = Arc::new(SlowSender::new(Duration::from_secs(1)));
    let reported = Arc::new(AtomicUsize::new(0));
    let handlers = ErrorHandlers::new(Vec::new()).with_handler(counting_handler(&reported));

    let config = SinkConfig::with_defaults("slow")
        .with_flush_interval(Duration::from_secs(3600))
        .with_shutdown_grace(Duration::from_millis(1500));
    let output = Output::assemble(config, sender.clone(), handlers).unwrap();

    for i in 0..4 {
        output.accept(Record::gauge(format!("m{}", i), i as f64)).unwrap();
        assert!(output.flush().is_some());
    }
    tokio::task::yield_now().await;

    // First send completes, second is cut off by the grace period, the
    // last two never leave the queue
    let snapshot = output.shutdown().await;
    assert_eq!(snapshot.records_accepted, 4);
    assert_eq!(snapshot.records_delivered, 1);
    assert_eq!(snapshot.records_failed, 1);
    assert_eq!(snapshot.records_dropped, 2);
    assert_eq!(
        snapshot.records_delivered + snapshot.records_lost(),
        snapshot.records_accepted
    );
    assert_eq!(reported.load(Ordering::SeqCst), 3);
    assert!(sender.inner().is_closed());

    // Nothing is sent once the sender is closed, and the abandoned send
    // finishing late changes no counter
    let started = sender.started();
    assert_eq!(started, 2);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(sender.started(), started);

    let later = output.metrics();
    assert_eq!(later.records_delivered, 1);
    assert_eq!(later.records_lost(), 3);
    assert_eq!(reported.load(Ordering::SeqCst), 3);
}

#[derive(Debug)]
struct PanickingSender;

#[async_trait::async_trait]
impl Sender for PanickingSender {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn send(&self, _batch: &Batch) -> Result<(), SinkError> {
        panic!("encoder bug")
    }
}

#[tokio::test]
async fn panicking_sender_is_reported_as_failure() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&seen);
    let handlers = ErrorHandlers::new(Vec::new()).with_handler(move |f: &SendFailure| -> Result<(), SinkError> {
        captured.lock().unwrap().push(f.error.to_string());
        Ok(())
    });

    let config = SinkConfig::with_defaults("panicking");
    let output = Output::assemble(config, Arc::new(PanickingSender), handlers).unwrap();

    output.accept(Record::gauge("cpu", 0.5)).unwrap();
    output.flush();
    output.accept(Record::gauge("cpu", 0.6)).unwrap();
    let snapshot = output.shutdown().await;

    assert_eq!(snapshot.records_accepted, 2);
    assert_eq!(snapshot.batches_failed, 2);
    assert_eq!(snapshot.records_lost(), 2);

    let errors = seen.lock().unwrap();
    assert_eq!(errors.len(), 2);
    assert!(errors[0].contains("sender panicked: encoder bug"), "unexpected error: {}", errors[0]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_lose_nothing() {
    let sender = Arc::new(CollectingSender::new());
    let config = SinkConfig::with_defaults("busy")
        .with_flush_interval(Duration::from_millis(5))
        .with_queue_capacity(1_024);
    let output = Output::assemble(config, sender.clone(), ErrorHandlers::logging()).unwrap();

    let producers = 8;
    let per_producer = 500;
    let tasks: Vec<_> = (0..producers)
        .map(|p| {
            let ingress = output.ingress();
            tokio::spawn(async move {
                for i in 0..per_producer {
                    ingress
                        .accept(Record::gauge(format!("p{}-{}", p, i), i as f64))
                        .unwrap();
                    if i % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let snapshot = output.shutdown().await;
    assert_eq!(snapshot.records_dropped, 0);

    let names: Vec<String> = sender.records().into_iter().map(|r| r.name).collect();
    let unique: HashSet<_> = names.iter().collect();
    assert_eq!(names.len(), producers * per_producer);
    assert_eq!(unique.len(), names.len());
}

#[tokio::test]
async fn credential_only_config_uses_defaults() {
    let config = OutputsConfig::from_toml_str(
        r#"
[[output]]
type = "signalfx"
auth_token = "secret"
"#,
    )
    .unwrap();

    let PluginConfig::Signalfx(signalfx) = &config.outputs[0] else {
        panic!("expected signalfx entry");
    };
    let plugin = SignalFxOutput::new(signalfx).unwrap();
    let sink = plugin.sink_config();

    assert_eq!(plugin.id(), "signalfx");
    assert_eq!(sink.source_name, "ffwd/java");
    assert_eq!(sink.flush_interval, Duration::from_millis(500));
    assert_eq!(sink.io_timeout, Duration::from_millis(10_000));

    // Building never touches the network
    let output = plugin.build().unwrap();
    assert!(output.is_running());
    output.shutdown().await;
}

#[test]
fn missing_credential_fails_construction() {
    let config = OutputsConfig::from_toml_str("[[output]]\ntype = \"signalfx\"\nflushInterval = 250\n")
        .unwrap();

    let err = config.outputs[0].into_plugin().err().unwrap();
    assert_eq!(err, ConfigError::MissingField("authToken"));
    assert_eq!(err.to_string(), "authToken: must be defined");
}

#[tokio::test]
async fn registry_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[[output]]
type = "debug"
id = "console"
flushInterval = 1000

[[output]]
type = "signalfx"
id = "sfx"
authToken = "secret"
endpoint = "http://127.0.0.1:9"
"#
    )
    .unwrap();

    let config = OutputsConfig::from_file(file.path()).unwrap();
    let registry = OutputRegistry::build(&config).unwrap();

    assert_eq!(registry.len(), 2);
    let console = registry.get("console").unwrap();
    assert_eq!(console.config().flush_interval, Duration::from_secs(1));
    assert!(registry.get("sfx").is_some());

    let snapshots = registry.shutdown_all().await;
    assert!(snapshots.iter().all(|s| s.records_accepted == 0));
}
