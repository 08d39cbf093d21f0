//! Background convergence of a controller's gamma ramp.
//!
//! Each monitor owns one [`GammaApplier`]. Requests only move the shared
//! target; at most one task per applier walks the hardware towards it,
//! pausing between writes, and exits once the last written level matches
//! the target or it is asked to stop.

use std::pin::pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::{JoinHandle, spawn_blocking};
use tokio::time::sleep;

use crate::backend::{ControllerId, DisplayBackend};
use crate::errors::*;
use crate::gamma::GammaTables;
use crate::util::lock;

make_log_macro!(debug, "applier");
make_log_macro!(warn, "applier");

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A worker was started for the new target.
    Spawned,
    /// A worker is already running and will pick the new target up.
    Coalesced,
    /// The hardware already shows the target.
    Converged,
    /// No tokio runtime to run a worker on; nothing was written.
    Unavailable,
}

struct ApplierState {
    target: u32,
    tables: Arc<GammaTables>,
    last_applied: Option<u32>,
    active: bool,
    kill: bool,
    writes: u64,
}

struct Shared {
    state: Mutex<ApplierState>,
    stop: Notify,
}

pub struct GammaApplier {
    controller: ControllerId,
    interval: Duration,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl GammaApplier {
    pub fn new(controller: ControllerId, tables: Arc<GammaTables>, interval: Duration) -> Self {
        Self {
            controller,
            interval,
            shared: Arc::new(Shared {
                state: Mutex::new(ApplierState {
                    target: 0,
                    tables,
                    last_applied: None,
                    active: false,
                    kill: false,
                    writes: 0,
                }),
                stop: Notify::new(),
            }),
            worker: None,
        }
    }

    /// Move the target to `percent`, spawning a worker on the current tokio
    /// runtime if none is running.
    pub fn request(
        &mut self,
        backend: &Arc<dyn DisplayBackend>,
        percent: u32,
        tables: &Arc<GammaTables>,
    ) -> ApplyOutcome {
        let mut state = lock(&self.shared.state);
        state.target = percent;
        state.tables = Arc::clone(tables);
        if state.active {
            return ApplyOutcome::Coalesced;
        }
        if state.last_applied == Some(percent) {
            return ApplyOutcome::Converged;
        }
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("{}: can not apply gamma: {}", self.controller, e);
                return ApplyOutcome::Unavailable;
            }
        };
        state.active = true;
        state.kill = false;
        drop(state);

        // A previous worker cleared `active` as its last action, so its
        // handle can be let go.
        self.worker = Some(runtime.spawn(run(
            Arc::clone(&self.shared),
            Arc::clone(backend),
            self.controller,
            self.interval,
        )));
        debug!("{}: worker started for {}%", self.controller, percent);
        ApplyOutcome::Spawned
    }

    /// Record a level read back from the hardware, unless a worker is busy.
    pub fn sync_applied(&self, percent: u32) {
        let mut state = lock(&self.shared.state);
        if !state.active {
            state.target = percent;
            state.last_applied = Some(percent);
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared.state).active
    }

    pub fn last_applied(&self) -> Option<u32> {
        lock(&self.shared.state).last_applied
    }

    pub fn target(&self) -> u32 {
        lock(&self.shared.state).target
    }

    /// Number of ramps written to hardware so far.
    pub fn writes(&self) -> u64 {
        lock(&self.shared.state).writes
    }

    /// Wait until the worker, if any, has converged and exited.
    pub async fn wait(&mut self) {
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!("{}: gamma worker failed: {}", self.controller, e);
                lock(&self.shared.state).active = false;
            }
        }
    }

    /// Ask the worker to stop and wait until it has exited.
    pub async fn stop(&mut self) {
        lock(&self.shared.state).kill = true;
        self.shared.stop.notify_waiters();
        self.wait().await;
    }
}

impl Drop for GammaApplier {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            lock(&self.shared.state).kill = true;
            self.shared.stop.notify_waiters();
            worker.abort();
        }
    }
}

async fn run(
    shared: Arc<Shared>,
    backend: Arc<dyn DisplayBackend>,
    controller: ControllerId,
    interval: Duration,
) {
    loop {
        let (target, tables) = {
            let mut state = lock(&shared.state);
            if state.kill || state.last_applied == Some(state.target) {
                state.active = false;
                debug!("{}: worker done at {:?}", controller, state.last_applied);
                return;
            }
            (state.target, Arc::clone(&state.tables))
        };

        let backend = Arc::clone(&backend);
        let written = spawn_blocking(move || backend.set_gamma(controller, tables.get(target)))
            .await
            .error("gamma write did not complete")
            .and_then(|written| written);
        if let Err(e) = written {
            warn!("{}: failed to set gamma: {}", controller, e);
            lock(&shared.state).active = false;
            return;
        }

        let mut stopped = pin!(shared.stop.notified());
        stopped.as_mut().enable();
        {
            let mut state = lock(&shared.state);
            state.last_applied = Some(target);
            state.writes += 1;
            if state.kill {
                continue;
            }
        }
        // Rate limit, but wake up at once when asked to stop.
        tokio::select! {
            () = sleep(interval) => {}
            () = stopped => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gamma::GammaCurve;
    use crate::testing::{Call, FakeBackend, wait_until};

    fn setup(
        interval_ms: u64,
    ) -> (Arc<FakeBackend>, Arc<dyn DisplayBackend>, GammaApplier, Arc<GammaTables>) {
        let fake = Arc::new(FakeBackend::new());
        let backend: Arc<dyn DisplayBackend> = fake.clone();
        let tables = Arc::new(GammaTables::new(GammaCurve::LINEAR, 256));
        let applier = GammaApplier::new(
            ControllerId(7),
            Arc::clone(&tables),
            Duration::from_millis(interval_ms),
        );
        (fake, backend, applier, tables)
    }

    #[tokio::test]
    async fn single_request_writes_once_and_goes_idle() {
        let (fake, backend, mut applier, tables) = setup(10);
        assert_eq!(applier.request(&backend, 40, &tables), ApplyOutcome::Spawned);
        applier.wait().await;
        assert!(!applier.is_running());
        assert_eq!(applier.last_applied(), Some(40));
        assert_eq!(applier.writes(), 1);
        assert_eq!(fake.gamma_writes(ControllerId(7)), vec![tables.get(40).clone()]);
    }

    #[tokio::test]
    async fn request_for_current_level_is_a_no_op() {
        let (fake, backend, mut applier, tables) = setup(10);
        applier.sync_applied(55);
        assert_eq!(applier.request(&backend, 55, &tables), ApplyOutcome::Converged);
        assert!(!applier.is_running());
        assert!(fake.gamma_writes(ControllerId(7)).is_empty());
    }

    #[test]
    fn request_without_runtime_writes_nothing() {
        let (fake, backend, mut applier, tables) = setup(10);
        assert_eq!(applier.request(&backend, 30, &tables), ApplyOutcome::Unavailable);
        assert!(!applier.is_running());
        assert_eq!(applier.target(), 30);
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn rapid_requests_coalesce_into_one_extra_write() {
        let (fake, backend, mut applier, tables) = setup(300);
        assert_eq!(applier.request(&backend, 50, &tables), ApplyOutcome::Spawned);
        assert!(wait_until(|| fake.gamma_writes(ControllerId(7)).len() == 1).await);

        for percent in 51..=60 {
            assert_eq!(
                applier.request(&backend, percent, &tables),
                ApplyOutcome::Coalesced
            );
        }
        applier.wait().await;

        let writes = fake.gamma_writes(ControllerId(7));
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1], *tables.get(60));
        assert_eq!(applier.last_applied(), Some(60));
    }

    #[tokio::test]
    async fn stop_interrupts_the_pause() {
        let (fake, backend, mut applier, tables) = setup(2000);
        applier.request(&backend, 20, &tables);
        assert!(wait_until(|| fake.gamma_writes(ControllerId(7)).len() == 1).await);
        applier.request(&backend, 80, &tables);

        let started = std::time::Instant::now();
        applier.stop().await;
        assert!(started.elapsed() < Duration::from_millis(1500));
        assert!(!applier.is_running());
        assert_eq!(fake.gamma_writes(ControllerId(7)).len(), 1);
    }

    #[tokio::test]
    async fn failed_write_ends_the_worker() {
        let (fake, backend, mut applier, tables) = setup(10);
        fake.fail_gamma_writes(true);
        applier.request(&backend, 30, &tables);
        applier.wait().await;
        assert!(!applier.is_running());
        assert_eq!(applier.last_applied(), None);
        assert!(fake.calls().contains(&Call::SetGamma(ControllerId(7))));
    }
}
