//! Orchestration for the Crumb attribution engine.
//!
//! [`Engine`] owns a store handle, the key layout and the tuning knobs, and
//! hands out the components that do the work: the index build job, journey
//! reconstruction, single and bulk attribution, and progress bookkeeping.
//! Every store call goes through [`client::KvClient`], which bounds it with a
//! timeout.

pub mod attribute;
pub mod client;
pub mod config;
pub mod deadline;
pub mod error;
pub mod indexer;
pub mod journey;
pub mod progress;
pub mod scanner;

use std::sync::Arc;

use crumb_core::{keys::KeySpace, store::KvStore};

pub use self::{
  attribute::{AttributionRequest, Attributor, DateRange, QueryType},
  config::EngineConfig,
  deadline::Deadline,
  error::{Error, Result},
  indexer::IndexBuilder,
  journey::JourneyReconstructor,
};
use self::{client::KvClient, progress::ProgressController};

pub struct Engine<S> {
  client: KvClient<S>,
  keys:   KeySpace,
  config: EngineConfig,
}

impl<S: KvStore> Engine<S> {
  pub fn new(store: Arc<S>, keys: KeySpace, config: EngineConfig) -> Result<Self> {
    config.validate()?;
    if keys.pageview_patterns.is_empty() || keys.conversion_patterns.is_empty() {
      return Err(Error::Config(
        "keys.pageview_patterns and keys.conversion_patterns must not be empty".into(),
      ));
    }
    Ok(Self {
      client: KvClient::new(store, config.call_timeout()),
      keys,
      config,
    })
  }

  pub fn keys(&self) -> &KeySpace { &self.keys }

  pub fn config(&self) -> &EngineConfig { &self.config }

  /// A deadline for one invocation, starting now.
  pub fn deadline(&self) -> Deadline { self.config.deadline() }

  pub fn indexer(&self) -> IndexBuilder<'_, S> {
    IndexBuilder::new(&self.client, &self.keys, &self.config)
  }

  pub fn reconstructor(&self) -> JourneyReconstructor<'_, S> {
    JourneyReconstructor::new(&self.client, &self.keys)
  }

  pub fn attributor(&self) -> Attributor<'_, S> {
    Attributor::new(&self.client, &self.keys, &self.config)
  }

  pub fn progress(&self) -> ProgressController<'_, S> {
    ProgressController::new(&self.client, self.config.progress_ttl_secs)
  }
}

#[cfg(test)]
mod tests;
