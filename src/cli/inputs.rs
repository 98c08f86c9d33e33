//! Turning configuration and arguments into a pipeline

use crate::cache::LayerCache;
use crate::cli::args::InputArgs;
use crate::config::{Config, ConfigManager};
use crate::error::PlinthResult;
use crate::manifest::Manifest;
use crate::pipeline::{Pipeline, Provisioning};
use crate::step::{
    BaseProvider, CommandBuilder, CommandInstaller, CommandTemplate, ImageBase, SourceTree,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Read the manifest and source tree and assemble the canonical pipeline.
///
/// `timeout` overrides the configured per-step limits when set.
pub async fn load_pipeline(
    input: &InputArgs,
    config: &Config,
    timeout: Option<Duration>,
) -> PlinthResult<Pipeline> {
    let manifest = Manifest::load(&input.manifest).await?;
    debug!(
        "Loaded {} requirement(s) from {}",
        manifest.len(),
        input.manifest.display()
    );

    let source = SourceTree::scan(&input.source, &config.source.ignore).await?;

    let base: Arc<dyn BaseProvider> = match &config.base.rootfs {
        Some(dir) => Arc::new(ImageBase::with_rootfs(config.base.image.clone(), dir).await?),
        None => Arc::new(ImageBase::new(config.base.image.clone())),
    };
    let installer = CommandInstaller::new(CommandTemplate::new(config.install.command.clone())?);
    let builder = CommandBuilder::new(CommandTemplate::new(config.build.command.clone())?);

    Ok(Pipeline::provisioning(Provisioning {
        base,
        manifest: Arc::new(manifest),
        installer: Arc::new(installer),
        source: Arc::new(source),
        builder: Arc::new(builder),
        workdir: config.source.workdir.clone(),
        install_timeout: timeout.or_else(|| config.install.timeout()),
        build_timeout: timeout.or_else(|| config.build.timeout()),
    }))
}

/// The configured persistent cache, or an in-memory one when caching is off
pub async fn open_cache(config: &Config, no_cache: bool) -> PlinthResult<Arc<LayerCache>> {
    if no_cache || !config.cache.enabled {
        debug!("Layer cache disabled, using in-memory cache");
        return Ok(Arc::new(LayerCache::in_memory()));
    }
    let dir = ConfigManager::cache_dir(config);
    Ok(Arc::new(LayerCache::open(&dir).await?))
}
