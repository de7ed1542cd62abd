//! bpmn-stream-node — runs the engine's partitions in one process.
//!
//! Reads config from `BPMN_STREAM_CONFIG` (default: config/engine.yaml),
//! deploys every process definition in `processes_dir`, starts one stream
//! processor per partition and runs until ctrl-c.
//!
//! Positional arguments are BPMN process ids; one instance of each is
//! created at startup, spread over the partitions.

use anyhow::{bail, Context, Result};
use bpmn_stream_core::config::EngineConfig;
use bpmn_stream_core::exporter::ExporterDirectorHandle;
use bpmn_stream_core::model::yaml::load_process_dir;
use bpmn_stream_core::record::{ProcessInstanceCreationIntent, ProcessInstanceCreationRecord};
use bpmn_stream_core::stream::monitor::IdleStateMonitor;
use bpmn_stream_core::{
    ExporterDirector, LogAppendEntry, LogStream, LoggingExporter, ProcessRegistry,
    StreamProcessor, StreamProcessorHandle, SystemClock, NO_KEY, NO_POSITION,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

struct Partition {
    log: LogStream,
    processor: StreamProcessorHandle,
    monitor: Arc<IdleStateMonitor>,
    exporter: ExporterDirectorHandle,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bpmn_stream_core=info,bpmn_stream_node=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::from_env().context("Failed to load engine config")?;

    let mut registry = ProcessRegistry::new();
    for process in load_process_dir(&config.processes_dir)? {
        info!(process = %process.bpmn_process_id, "Deployed process");
        registry.deploy(process);
    }
    if registry.is_empty() {
        warn!(dir = %config.processes_dir, "No process definitions found");
    }
    let processes = Arc::new(registry);

    let clock = Arc::new(SystemClock);
    let mut partitions = Vec::with_capacity(config.partition_count as usize);
    for partition_id in 1..=config.partition_count {
        let log = LogStream::new(partition_id, config.log.clone(), clock.clone());
        let processor = StreamProcessor::builder(log.clone(), processes.clone())
            .config(config.processor.clone())
            .build()
            .start();

        let monitor = IdleStateMonitor::new(processor.progress(), &config.monitor);
        log.register_commit_listener(monitor.clone());
        let exporter = ExporterDirector::start(&log, vec![Box::new(LoggingExporter)]);

        partitions.push(Partition {
            log,
            processor,
            monitor,
            exporter,
        });
    }
    info!(
        partitions = partitions.len(),
        processes = processes.len(),
        "bpmn-stream-node started"
    );

    for (i, bpmn_process_id) in std::env::args().skip(1).enumerate() {
        if processes.get(&bpmn_process_id).is_none() {
            bail!("Unknown process '{bpmn_process_id}'");
        }
        let partition = &partitions[i % partitions.len()];
        let position = partition
            .log
            .new_writer()
            .try_write(
                vec![LogAppendEntry::command(
                    NO_KEY,
                    ProcessInstanceCreationIntent::Create,
                    ProcessInstanceCreationRecord {
                        bpmn_process_id: bpmn_process_id.clone(),
                        process_instance_key: NO_KEY,
                        variables: Default::default(),
                    },
                )],
                NO_POSITION,
            )
            .with_context(|| format!("Failed to start an instance of '{bpmn_process_id}'"))?;
        info!(
            partition = partition.log.partition_id(),
            position,
            process = %bpmn_process_id,
            "Requested process instance"
        );
    }

    for partition in &partitions {
        let partition_id = partition.log.partition_id();
        partition
            .monitor
            .on_idle(move || info!(partition = partition_id, "Partition idle"));
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Shutting down");

    for partition in partitions {
        partition.processor.close().await;
        partition.exporter.close().await;
        partition.log.close();
    }
    Ok(())
}
