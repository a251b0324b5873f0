//! The plugin engine.
//!
//! Runs every plugin of a build against one image. Plugins run concurrently
//! and independently: a failing plugin does not stop its siblings, and every
//! plugin that succeeds has its files delivered to the sink. Once all plugins
//! have finished, the first failure in declaration order is returned.

use std::sync::Arc;

use prost::Message;
use prost_types::compiler::{CodeGeneratorRequest, CodeGeneratorResponse};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::reflect::{PackageReflector, PackageTree, SchemaReflector};
use super::request::{ClientGeneratorResponse, PluginResponse, client_request, protocol_request};
use super::sink::FileSink;
use super::{BuildPlugin, PluginError, PluginKind, RunType, builtin};
use crate::image::SourceImage;
use crate::runner::{Invocation, Runner};

/// What a successful plugin produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginReport {
  pub plugin: String,
  /// Paths written to the sink, after applying the plugin's `out` prefix.
  pub files: Vec<String>,
}

/// Dispatches plugins to runners and hands their output to a sink.
pub struct PluginEngine {
  local: Arc<dyn Runner>,
  container: Arc<dyn Runner>,
  reflector: Arc<dyn SchemaReflector>,
  parallelism: usize,
}

/// Everything one plugin task needs, owned so it can be spawned.
struct Task {
  plugin: BuildPlugin,
  payload: Payload,
  local: Arc<dyn Runner>,
  container: Arc<dyn Runner>,
  sink: Arc<dyn FileSink>,
  cancel: CancellationToken,
}

enum Payload {
  Protocol(CodeGeneratorRequest),
  Client(Vec<u8>),
}

impl PluginEngine {
  pub fn new(local: Arc<dyn Runner>, container: Arc<dyn Runner>) -> Self {
    Self {
      local,
      container,
      reflector: Arc::new(PackageReflector),
      parallelism: std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4),
    }
  }

  pub fn with_reflector(mut self, reflector: Arc<dyn SchemaReflector>) -> Self {
    self.reflector = reflector;
    self
  }

  /// Limit how many plugins run at once. Zero is treated as one.
  pub fn with_parallelism(mut self, parallelism: usize) -> Self {
    self.parallelism = parallelism.max(1);
    self
  }

  /// Run `plugins` for `bundle` against `image`.
  ///
  /// Requests are built up front, so every plugin sees the same image
  /// regardless of scheduling.
  pub async fn run(
    &self,
    bundle: &str,
    image: &SourceImage,
    plugins: &[BuildPlugin],
    sink: Arc<dyn FileSink>,
    cancel: &CancellationToken,
  ) -> Result<Vec<PluginReport>, PluginError> {
    if plugins.is_empty() {
      return Err(PluginError::NoPluginsConfigured {
        bundle: bundle.to_string(),
      });
    }
    info!(bundle, plugins = plugins.len(), "running plugins");

    let tree = plugins
      .iter()
      .any(|p| p.kind == PluginKind::Client)
      .then(|| self.reflector.reflect(image));

    let semaphore = Arc::new(Semaphore::new(self.parallelism));
    let mut join_set = JoinSet::new();
    let mut results: Vec<Option<Result<PluginReport, PluginError>>> = plugins.iter().map(|_| None).collect();

    for (index, plugin) in plugins.iter().enumerate() {
      let payload = match payload(image, tree.as_ref(), plugin) {
        Ok(payload) => payload,
        Err(e) => {
          results[index] = Some(Err(e));
          continue;
        }
      };
      let task = Task {
        plugin: plugin.clone(),
        payload,
        local: self.local.clone(),
        container: self.container.clone(),
        sink: sink.clone(),
        cancel: cancel.child_token(),
      };
      let semaphore = semaphore.clone();

      join_set.spawn(async move {
        let _permit = semaphore.acquire_owned().await;
        (index, task.run().await)
      });
    }

    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok((index, result)) => results[index] = Some(result),
        Err(e) => error!(bundle, error = %e, "plugin task panicked"),
      }
    }

    let mut reports = Vec::with_capacity(plugins.len());
    let mut first_error = None;
    for (plugin, result) in plugins.iter().zip(results) {
      let result = result.unwrap_or_else(|| {
        Err(PluginError::Aborted {
          plugin: plugin.name.clone(),
          message: "task did not complete".to_string(),
        })
      });
      match result {
        Ok(report) => reports.push(report),
        Err(e) if first_error.is_none() => first_error = Some(e),
        Err(e) => error!(bundle, plugin = %plugin.name, error = %e, "plugin failed"),
      }
    }

    match first_error {
      Some(e) => Err(e),
      None => Ok(reports),
    }
  }
}

fn payload(image: &SourceImage, tree: Option<&PackageTree>, plugin: &BuildPlugin) -> Result<Payload, PluginError> {
  let payload = match (plugin.kind, tree) {
    (PluginKind::Client, Some(tree)) => Payload::Client(client_request(tree, plugin).encode_to_vec()),
    (PluginKind::Client, None) => Payload::Client(client_request(&PackageTree::default(), plugin).encode_to_vec()),
    (PluginKind::Protocol, _) => {
      let request = protocol_request(image, plugin).map_err(|source| PluginError::Request {
        plugin: plugin.name.clone(),
        source,
      })?;
      Payload::Protocol(request)
    }
  };
  Ok(payload)
}

impl Task {
  async fn run(self) -> Result<PluginReport, PluginError> {
    let name = self.plugin.name.clone();
    debug!(plugin = %name, run = self.plugin.run.label(), "starting plugin");

    let response = self.respond().await?;
    if let Some(message) = response.error {
      return Err(PluginError::Reported { plugin: name, message });
    }

    let mut written = Vec::with_capacity(response.files.len());
    for file in response.files {
      let path = self.plugin.output_path(&file.path);
      self
        .sink
        .put_file(&path, &file.content)
        .map_err(|source| PluginError::Sink {
          plugin: name.clone(),
          path: path.clone(),
          source,
        })?;
      written.push(path);
    }

    info!(plugin = %name, files = written.len(), "plugin finished");
    Ok(PluginReport { plugin: name, files: written })
  }

  async fn respond(&self) -> Result<PluginResponse, PluginError> {
    let plugin = &self.plugin;
    let (runner, program, args) = match &plugin.run {
      RunType::Builtin { name } => {
        let Payload::Protocol(request) = &self.payload else {
          return Err(PluginError::UnsupportedPluginType {
            plugin: plugin.name.clone(),
            reason: format!("{} plugins cannot run as builtins", plugin.kind),
          });
        };
        let generate = builtin::lookup(name).ok_or_else(|| PluginError::UnsupportedPluginType {
          plugin: plugin.name.clone(),
          reason: format!("unknown builtin '{name}'"),
        })?;
        return Ok(generate(request).into());
      }
      RunType::Local { command, args } => (&self.local, command, args),
      RunType::Container { image, args } => (&self.container, image, args),
    };

    let input = match &self.payload {
      Payload::Protocol(request) => request.encode_to_vec(),
      Payload::Client(bytes) => bytes.clone(),
    };
    let invocation = Invocation {
      plugin: &plugin.name,
      program,
      args,
    };
    let output = runner
      .run(&invocation, input, &self.cancel)
      .await
      .map_err(|source| PluginError::Transport {
        plugin: plugin.name.clone(),
        source,
      })?;

    let invalid = |source| PluginError::InvalidResponse {
      plugin: plugin.name.clone(),
      source,
    };
    let response = match &self.payload {
      Payload::Protocol(_) => CodeGeneratorResponse::decode(output.as_slice())
        .map_err(invalid)?
        .into(),
      Payload::Client(_) => ClientGeneratorResponse::decode(output.as_slice())
        .map_err(invalid)?
        .into(),
    };
    Ok(response)
  }
}
