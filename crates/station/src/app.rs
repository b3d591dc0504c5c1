//! Task wiring and shutdown

use crate::settings::{SensorBackend, StationConfig};
use acquisition::AcquisitionTask;
use aht10_sensor::{SensorReader, SimulatedSensor};
use anyhow::Context;
use connectivity::{LinkManager, ReadySignal, SystemClock, TcpProbeLink, TimeSync};
use metrics_exporter_prometheus::PrometheusBuilder;
use ring_buffer::{BufferStats, RingBuffer};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uplink::{DrainTask, MqttPublisher, PublishSchedule, RecordFormatter};

/// What was left when the station stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Buffer counters at shutdown
    pub stats: BufferStats,
    /// Unread samples released with the buffer
    pub discarded: usize,
}

/// Run until Ctrl-C
pub async fn run(config: StationConfig) -> anyhow::Result<ShutdownReport> {
    run_until(config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    })
    .await
}

/// Start every task, run until `shutdown` resolves, then tear down
pub async fn run_until<F>(config: StationConfig, shutdown: F) -> anyhow::Result<ShutdownReport>
where
    F: Future<Output = ()>,
{
    if let Some(listen) = &config.metrics.listen {
        let addr: SocketAddr = listen
            .parse()
            .with_context(|| format!("invalid metrics.listen address '{}'", listen))?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!("Metrics exporter listening on {}", addr);
    }

    let buffer = Arc::new(RingBuffer::new(config.buffer.capacity)?);
    let link_ready = ReadySignal::new();
    let time_synced = ReadySignal::new();

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let link = TcpProbeLink::new(&config.mqtt.host, config.mqtt.port);
    let manager = LinkManager::new(link, link_ready.clone(), config.link_config());
    tasks.push(tokio::spawn(manager.run()));

    let sync = TimeSync::new(
        SystemClock,
        link_ready.clone(),
        time_synced.clone(),
        config.time_sync_config(),
    );
    tasks.push(tokio::spawn(sync.run()));

    let formatter = RecordFormatter::new(
        &config.identity.owner,
        &config.identity.hardware,
        config.utc_offset()?,
    );
    let drain = DrainTask::new(
        MqttPublisher::new(config.mqtt_config()),
        SystemClock,
        Arc::clone(&buffer),
        formatter,
        link_ready.clone(),
        time_synced.clone(),
        config.uplink_config(),
    );
    let trigger = match config.schedule() {
        PublishSchedule::AfterEachSample => Some(drain.trigger()),
        PublishSchedule::Aligned { .. } => None,
    };
    tasks.push(tokio::spawn(drain.run()));

    if let Some(task) = spawn_acquisition(&config, &buffer, &time_synced, trigger) {
        tasks.push(task);
    }

    info!(
        "Station running: {} task(s), buffer capacity {}",
        tasks.len(),
        buffer.capacity()
    );

    shutdown.await;

    for task in &tasks {
        task.abort();
    }
    for task in tasks {
        let _ = task.await;
    }

    let stats = buffer.stats();
    let discarded = match Arc::try_unwrap(buffer) {
        Ok(buffer) => buffer.teardown(),
        Err(shared) => {
            warn!("Ring buffer still shared at shutdown, draining instead");
            shared.drain_all().len()
        }
    };

    Ok(ShutdownReport { stats, discarded })
}

fn spawn_acquisition(
    config: &StationConfig,
    buffer: &Arc<RingBuffer>,
    time_synced: &ReadySignal,
    trigger: Option<Arc<Notify>>,
) -> Option<JoinHandle<()>> {
    match config.sensor.backend {
        SensorBackend::Simulated => Some(spawn_reader(
            SimulatedSensor::new(config.sensor.seed),
            config,
            buffer,
            time_synced,
            trigger,
        )),
        SensorBackend::Aht10 => open_aht10(config)
            .map(|sensor| spawn_reader(sensor, config, buffer, time_synced, trigger)),
    }
}

#[cfg(target_os = "linux")]
fn open_aht10(config: &StationConfig) -> Option<impl SensorReader + 'static> {
    use aht10_sensor::{Aht10, LinuxI2c};

    match LinuxI2c::open(&config.sensor.bus) {
        Ok(bus) => Some(Aht10::with_address(bus, config.sensor.address)),
        Err(e) => {
            error!(
                "Failed to open I2C bus {}, acquisition disabled: {}",
                config.sensor.bus, e
            );
            None
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn open_aht10(config: &StationConfig) -> Option<SimulatedSensor> {
    error!(
        "AHT10 backend needs Linux i2c-dev ({}), acquisition disabled",
        config.sensor.bus
    );
    None
}

fn spawn_reader<S>(
    sensor: S,
    config: &StationConfig,
    buffer: &Arc<RingBuffer>,
    time_synced: &ReadySignal,
    trigger: Option<Arc<Notify>>,
) -> JoinHandle<()>
where
    S: SensorReader + 'static,
{
    let mut task = AcquisitionTask::new(
        sensor,
        SystemClock,
        Arc::clone(buffer),
        time_synced.clone(),
        config.acquisition_config(),
    );
    if let Some(trigger) = trigger {
        task = task.with_trigger(trigger);
    }

    tokio::spawn(async move {
        if let Err(e) = task.run().await {
            error!("Acquisition task stopped: {}", e);
        }
    })
}
