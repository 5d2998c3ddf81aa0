//! Services opened from configuration for one CLI invocation.

use std::sync::Arc;

use cutlog_common::clock::system_clock;
use cutlog_common::config::AppConfig;
use cutlog_project_model::layout::ArtifactLayout;
use cutlog_render_engine::{CommandTranscoder, RenderQueue, RenderServices};

pub struct Context {
    pub config: AppConfig,
    pub services: RenderServices,
}

impl Context {
    pub fn open(config: AppConfig) -> anyhow::Result<Self> {
        let layout = ArtifactLayout::new(&config.storage_root);
        let transcoder = Arc::new(CommandTranscoder::new(&config.render.transcoder_program));
        let services = RenderServices::open(layout, system_clock(), &config.edit_log, transcoder)?;
        tracing::debug!(root = %config.storage_root.display(), "Opened storage root");
        Ok(Self { config, services })
    }

    /// Start a render queue; resumes any unfinished jobs on this root.
    pub fn start_queue(&self) -> anyhow::Result<RenderQueue> {
        Ok(RenderQueue::start(
            self.services.clone(),
            &self.config.render,
            self.config.retention,
        )?)
    }
}
