//! Builds the configured report sink and whatever drains it.

use std::sync::Arc;

use highlander_agents::{
    ChannelSink, CombatReport, MemorySink, NullSink, ReportSink, TracingSink,
};
use highlander_core::config::ReportConfig;
use highlander_core::SinkKind;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The sink handed to the population, plus its consumer side.
pub struct ReportPipeline {
    sink: Arc<dyn ReportSink>,
    memory: Option<Arc<MemorySink>>,
    drain: Option<JoinHandle<u64>>,
}

impl ReportPipeline {
    /// Build the sink selected by `config`.
    ///
    /// The channel sink gets a drain task on the current runtime that logs
    /// each report at `debug` and counts them.
    pub fn build(config: &ReportConfig) -> Self {
        match config.sink {
            SinkKind::Tracing => Self::plain(Arc::new(TracingSink)),
            SinkKind::Null => Self::plain(Arc::new(NullSink)),
            SinkKind::Memory => {
                let memory = Arc::new(MemorySink::new());
                let sink: Arc<dyn ReportSink> = memory.clone();
                Self {
                    sink,
                    memory: Some(memory),
                    drain: None,
                }
            }
            SinkKind::Channel => {
                let (sink, rx) = ChannelSink::new(config.channel_capacity);
                Self {
                    sink: Arc::new(sink),
                    memory: None,
                    drain: Some(tokio::spawn(drain(rx))),
                }
            }
        }
    }

    fn plain(sink: Arc<dyn ReportSink>) -> Self {
        Self {
            sink,
            memory: None,
            drain: None,
        }
    }

    /// Shared handle for the population.
    pub fn sink(&self) -> Arc<dyn ReportSink> {
        Arc::clone(&self.sink)
    }

    /// Wait for the consumer side to finish and log what it saw.
    ///
    /// Call after the population has been dropped, so the channel's last
    /// sender is gone and the drain task can end.
    pub async fn finish(self) {
        let Self { sink, memory, drain } = self;
        drop(sink);

        if let Some(memory) = memory {
            info!(reports = memory.len(), "Memory sink collected reports");
        }
        if let Some(drain) = drain {
            match drain.await {
                Ok(reports) => info!(reports, "Report channel drained"),
                Err(e) => warn!(error = %e, "Report drain task failed"),
            }
        }
    }
}

async fn drain(mut rx: mpsc::Receiver<CombatReport>) -> u64 {
    let mut count: u64 = 0;
    while let Some(report) = rx.recv().await {
        debug!(target: "highlander::combat", "{report}");
        count = count.saturating_add(1);
    }
    count
}
