//! Container runner.
//!
//! Each invocation gets a fresh container: create, start attached with the
//! request on stdin, collect stdout, remove. Images are provisioned once per
//! runner, however many plugins share them and however many run at once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::auth::RegistryAuth;
use super::engine::{ContainerEngine, ContainerSpec, EngineError};
use super::{Invocation, RunError, Runner};

/// Runs plugins in containers.
pub struct ContainerRunner {
  engine: Arc<dyn ContainerEngine>,
  auth: RegistryAuth,
  pulled: Mutex<HashMap<String, Arc<OnceCell<()>>>>,
}

impl ContainerRunner {
  pub fn new(engine: Arc<dyn ContainerEngine>, auth: RegistryAuth) -> Self {
    Self {
      engine,
      auth,
      pulled: Mutex::new(HashMap::new()),
    }
  }

  fn image_cell(&self, image: &str) -> Arc<OnceCell<()>> {
    let mut pulled = self.pulled.lock().unwrap_or_else(|e| e.into_inner());
    pulled.entry(image.to_string()).or_default().clone()
  }

  /// Make `image` available locally, pulling it at most once.
  ///
  /// Pulls start anonymous. When the registry refuses, the pull is retried
  /// once with the credential of the first matching auth rule. A failed
  /// provision is not memoized, so a later call tries again.
  pub async fn ensure_image(&self, image: &str) -> Result<(), RunError> {
    let cell = self.image_cell(image);
    cell.get_or_try_init(|| self.provision(image)).await?;
    Ok(())
  }

  async fn provision(&self, image: &str) -> Result<(), RunError> {
    if self.engine.image_exists(image).await? {
      debug!(image, "image already present");
      return Ok(());
    }

    match self.engine.pull(image, None).await {
      Ok(()) => Ok(()),
      Err(EngineError::Unauthorized { message, .. }) => {
        let Some(credential) = self.auth.credential_for(image).await? else {
          return Err(EngineError::Unauthorized {
            image: image.to_string(),
            message,
          }
          .into());
        };
        info!(image, "retrying pull with registry credentials");
        self.engine.pull(image, Some(&credential)).await?;
        Ok(())
      }
      Err(e) => Err(e.into()),
    }
  }

  async fn run_in_container(&self, guard: &ContainerGuard, invocation: &Invocation<'_>, input: Vec<u8>) -> Result<Vec<u8>, RunError> {
    let output = self
      .engine
      .run_attached(&guard.id, invocation.plugin, input)
      .await?;

    if !output.success() {
      return Err(RunError::NonZeroExit {
        program: invocation.program.to_string(),
        code: output.code,
        stderr: output.stderr,
      });
    }
    Ok(output.stdout)
  }
}

/// Owns a created container until it is removed.
///
/// Dropping the guard without calling [`ContainerGuard::release`] (when the
/// run future itself is dropped) removes the container in the background.
struct ContainerGuard {
  engine: Arc<dyn ContainerEngine>,
  id: String,
  released: bool,
}

impl ContainerGuard {
  async fn release(mut self) {
    self.released = true;
    if let Err(e) = self.engine.remove(&self.id).await {
      warn!(container = %self.id, error = %e, "failed to remove container");
    }
  }
}

impl Drop for ContainerGuard {
  fn drop(&mut self) {
    if self.released {
      return;
    }
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
      warn!(container = %self.id, "no runtime available to remove container");
      return;
    };
    let engine = self.engine.clone();
    let id = std::mem::take(&mut self.id);
    handle.spawn(async move {
      if let Err(e) = engine.remove(&id).await {
        warn!(container = %id, error = %e, "failed to remove container");
      }
    });
  }
}

#[async_trait]
impl Runner for ContainerRunner {
  /// Provisioning and the attached run are cancellable. Container creation
  /// always runs to completion, so a created container is owned by a guard
  /// and removed before this returns, whatever the outcome.
  async fn run(
    &self,
    invocation: &Invocation<'_>,
    input: Vec<u8>,
    cancel: &CancellationToken,
  ) -> Result<Vec<u8>, RunError> {
    info!(plugin = %invocation.plugin, image = %invocation.program, "running container plugin");
    let cancelled = || RunError::Cancelled {
      program: invocation.program.to_string(),
    };

    tokio::select! {
      biased;
      _ = cancel.cancelled() => return Err(cancelled()),
      result = self.ensure_image(invocation.program) => result?,
    }

    let id = self
      .engine
      .create(&ContainerSpec {
        image: invocation.program,
        args: invocation.args,
        plugin: invocation.plugin,
      })
      .await?;
    let guard = ContainerGuard {
      engine: self.engine.clone(),
      id,
      released: false,
    };

    let result = if cancel.is_cancelled() {
      Err(cancelled())
    } else {
      tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(cancelled()),
        result = self.run_in_container(&guard, invocation, input) => result,
      }
    };
    guard.release().await;
    result
  }
}

#[cfg(test)]
pub(crate) mod testutil {
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use std::time::Duration;

  use super::super::auth::RegistryCredential;
  use super::super::engine::ContainerOutput;
  use super::*;

  /// In-memory engine that echoes stdin and records lifecycle calls.
  #[derive(Default)]
  pub struct FakeEngine {
    pub present: Mutex<Vec<String>>,
    /// Images whose anonymous pull is refused.
    pub private: Mutex<Vec<String>>,
    pub pulls: Mutex<Vec<(String, Option<RegistryCredential>)>>,
    pub created: AtomicUsize,
    pub removed: Mutex<Vec<String>>,
    /// Exit code reported by containers.
    pub exit_code: Mutex<Option<i32>>,
    /// Delay inside pulls and runs.
    pub delay: Mutex<Option<Duration>>,
    /// Delay inside container creation.
    pub create_delay: Mutex<Option<Duration>>,
    pub fail_pulls: AtomicBool,
  }

  impl FakeEngine {
    pub fn new() -> Self {
      let engine = Self::default();
      *engine.exit_code.lock().unwrap() = Some(0);
      engine
    }

    pub fn pull_count(&self) -> usize {
      self.pulls.lock().unwrap().len()
    }

    pub fn removed_count(&self) -> usize {
      self.removed.lock().unwrap().len()
    }

    async fn pause(&self) {
      let delay = *self.delay.lock().unwrap();
      if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
      }
    }
  }

  #[async_trait]
  impl ContainerEngine for FakeEngine {
    async fn image_exists(&self, image: &str) -> Result<bool, EngineError> {
      Ok(self.present.lock().unwrap().iter().any(|i| i == image))
    }

    async fn pull(&self, image: &str, credential: Option<&RegistryCredential>) -> Result<(), EngineError> {
      self.pause().await;
      self.pulls.lock().unwrap().push((image.to_string(), credential.cloned()));
      if self.fail_pulls.load(Ordering::SeqCst) {
        return Err(EngineError::PullFailed {
          image: image.to_string(),
          message: "manifest unknown".to_string(),
        });
      }
      if credential.is_none() && self.private.lock().unwrap().iter().any(|i| i == image) {
        return Err(EngineError::Unauthorized {
          image: image.to_string(),
          message: "authentication required".to_string(),
        });
      }
      self.present.lock().unwrap().push(image.to_string());
      Ok(())
    }

    async fn create(&self, _spec: &ContainerSpec<'_>) -> Result<String, EngineError> {
      let delay = *self.create_delay.lock().unwrap();
      if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
      }
      let n = self.created.fetch_add(1, Ordering::SeqCst);
      Ok(format!("container-{n}"))
    }

    async fn run_attached(&self, _id: &str, _plugin: &str, input: Vec<u8>) -> Result<ContainerOutput, EngineError> {
      self.pause().await;
      let code = *self.exit_code.lock().unwrap();
      Ok(ContainerOutput {
        code,
        stdout: input,
        stderr: if code == Some(0) { String::new() } else { "plugin failed".to_string() },
      })
    }

    async fn remove(&self, id: &str) -> Result<(), EngineError> {
      self.removed.lock().unwrap().push(id.to_string());
      Ok(())
    }
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use serial_test::serial;

  use super::super::auth::testutil::StaticToken;
  use super::super::auth::{AuthKind, AuthRule, RegistryCredential};
  use super::testutil::FakeEngine;
  use super::*;

  fn runner(engine: Arc<FakeEngine>) -> ContainerRunner {
    ContainerRunner::new(engine, RegistryAuth::anonymous())
  }

  fn invocation<'a>(image: &'a str, args: &'a [String]) -> Invocation<'a> {
    Invocation {
      plugin: "go",
      program: image,
      args,
    }
  }

  mod provisioning {
    use super::*;

    #[tokio::test]
    async fn present_image_is_not_pulled() {
      let engine = Arc::new(FakeEngine::new());
      engine.present.lock().unwrap().push("acme/go:1".to_string());

      runner(engine.clone()).ensure_image("acme/go:1").await.unwrap();

      assert_eq!(engine.pull_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_runs_pull_once() {
      let engine = Arc::new(FakeEngine::new());
      *engine.delay.lock().unwrap() = Some(Duration::from_millis(20));
      let runner = runner(engine.clone());

      let runs = (0..5).map(|_| runner.ensure_image("acme/go:1"));
      futures::future::try_join_all(runs).await.unwrap();

      assert_eq!(engine.pull_count(), 1);
    }

    #[tokio::test]
    async fn failed_pull_is_retried_on_next_call() {
      let engine = Arc::new(FakeEngine::new());
      engine.fail_pulls.store(true, std::sync::atomic::Ordering::SeqCst);
      let runner = runner(engine.clone());

      let first = runner.ensure_image("acme/go:1").await;
      assert!(matches!(first, Err(RunError::Engine(EngineError::PullFailed { .. }))));

      engine.fail_pulls.store(false, std::sync::atomic::Ordering::SeqCst);
      runner.ensure_image("acme/go:1").await.unwrap();

      assert_eq!(engine.pull_count(), 2);
    }

    #[tokio::test]
    #[serial]
    async fn unauthorized_pull_retries_with_credentials() {
      let engine = Arc::new(FakeEngine::new());
      engine.private.lock().unwrap().push("ghcr.io/acme/go:1".to_string());
      let rules = vec![AuthRule {
        registry: "ghcr.io/acme/*".to_string(),
        auth: AuthKind::Token {
          token_env: "ACME_TOKEN".to_string(),
        },
      }];
      let auth = RegistryAuth::new(&rules, Arc::new(StaticToken::new("u", "p"))).unwrap();
      let runner = ContainerRunner::new(engine.clone(), auth);

      temp_env::async_with_vars([("ACME_TOKEN", Some("secret"))], runner.ensure_image("ghcr.io/acme/go:1"))
        .await
        .unwrap();

      let pulls = engine.pulls.lock().unwrap().clone();
      assert_eq!(pulls.len(), 2);
      assert_eq!(pulls[0].1, None);
      assert_eq!(pulls[1].1, Some(RegistryCredential::Token("secret".to_string())));
    }

    #[tokio::test]
    async fn unauthorized_without_matching_rule_fails() {
      let engine = Arc::new(FakeEngine::new());
      engine.private.lock().unwrap().push("ghcr.io/acme/go:1".to_string());

      let result = runner(engine.clone()).ensure_image("ghcr.io/acme/go:1").await;

      assert!(matches!(result, Err(RunError::Engine(EngineError::Unauthorized { .. }))));
      assert_eq!(engine.pull_count(), 1);
    }
  }

  mod running {
    use super::*;

    #[tokio::test]
    async fn returns_stdout_and_removes_container() {
      let engine = Arc::new(FakeEngine::new());

      let output = runner(engine.clone())
        .run(&invocation("acme/go:1", &[]), b"request".to_vec(), &CancellationToken::new())
        .await
        .unwrap();

      assert_eq!(output, b"request");
      assert_eq!(engine.removed_count(), 1);
    }

    #[tokio::test]
    async fn failing_container_is_removed() {
      let engine = Arc::new(FakeEngine::new());
      *engine.exit_code.lock().unwrap() = Some(2);

      let result = runner(engine.clone())
        .run(&invocation("acme/go:1", &[]), Vec::new(), &CancellationToken::new())
        .await;

      match result {
        Err(RunError::NonZeroExit { code, stderr, .. }) => {
          assert_eq!(code, Some(2));
          assert_eq!(stderr, "plugin failed");
        }
        other => panic!("expected non-zero exit, got {other:?}"),
      }
      assert_eq!(engine.removed_count(), 1);
    }

    fn cancel_after(delay: Duration) -> CancellationToken {
      let cancel = CancellationToken::new();
      let trigger = cancel.clone();
      tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        trigger.cancel();
      });
      cancel
    }

    #[tokio::test]
    async fn cancelled_run_removes_container_before_returning() {
      let engine = Arc::new(FakeEngine::new());
      engine.present.lock().unwrap().push("acme/go:1".to_string());
      *engine.delay.lock().unwrap() = Some(Duration::from_secs(30));
      let runner = runner(engine.clone());

      let result = runner
        .run(&invocation("acme/go:1", &[]), Vec::new(), &cancel_after(Duration::from_millis(50)))
        .await;

      assert!(matches!(result, Err(RunError::Cancelled { .. })));
      assert_eq!(*engine.removed.lock().unwrap(), ["container-0"]);
    }

    #[tokio::test]
    async fn cancel_during_create_removes_created_container() {
      let engine = Arc::new(FakeEngine::new());
      engine.present.lock().unwrap().push("acme/go:1".to_string());
      *engine.create_delay.lock().unwrap() = Some(Duration::from_millis(200));
      let runner = runner(engine.clone());

      let result = runner
        .run(&invocation("acme/go:1", &[]), Vec::new(), &cancel_after(Duration::from_millis(20)))
        .await;

      assert!(matches!(result, Err(RunError::Cancelled { .. })));
      assert_eq!(engine.created.load(std::sync::atomic::Ordering::SeqCst), 1);
      assert_eq!(*engine.removed.lock().unwrap(), ["container-0"]);
    }

    #[tokio::test]
    async fn cancel_during_pull_creates_nothing() {
      let engine = Arc::new(FakeEngine::new());
      *engine.delay.lock().unwrap() = Some(Duration::from_secs(30));
      let runner = runner(engine.clone());

      let result = runner
        .run(&invocation("acme/go:1", &[]), Vec::new(), &cancel_after(Duration::from_millis(20)))
        .await;

      assert!(matches!(result, Err(RunError::Cancelled { .. })));
      assert_eq!(engine.created.load(std::sync::atomic::Ordering::SeqCst), 0);
      assert_eq!(engine.removed_count(), 0);
    }
  }
}
