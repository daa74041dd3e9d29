//! Bounded location-fetch sub-task.
//!
//! After the primary alert SMS goes out, the dispatcher starts one of these
//! to chase a fresher high-accuracy fix and text it as a follow-up. The task
//! is a small state machine, `Idle -> Awaiting -> Delivered | Expired`:
//!
//! - at most one acquisition is ever in flight; starting again while
//!   awaiting only swaps the target number in place;
//! - a wake guard keeps the host from suspending while the request is
//!   outstanding, and is held exactly as long as the request lives;
//! - a deadline (10 minutes by default) bounds the wait; expiry is a silent,
//!   expected outcome.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::logging;
use crate::sms::{format_current_location_message, Fix, SmsSender};
use crate::wlog;

/// Requested accuracy class for a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accuracy {
    Coarse,
    Fine,
}

/// Requested power class for a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Power {
    Low,
    High,
}

/// Provider selection criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Criteria {
    pub accuracy: Accuracy,
    pub power: Power,
}

impl Criteria {
    /// The class used for emergency follow-ups.
    pub fn fine_high_power() -> Self {
        Self {
            accuracy: Accuracy::Fine,
            power: Power::High,
        }
    }
}

/// Platform geolocation seam.
pub trait LocationSource: Send + Sync {
    /// Cached fix, returned with no acquisition delay.
    fn last_known(&self) -> Option<Fix>;

    /// Name of the best enabled provider for the criteria, if any.
    fn best_provider(&self, criteria: &Criteria) -> Option<String>;

    /// Request exactly one fix from `provider`. Dropping the receiver
    /// abandons (cancels) the request.
    fn request_single_fix(&self, provider: &str) -> oneshot::Receiver<Fix>;
}

/// Wake-equivalent resource seam. The guard keeps the host awake until
/// dropped; every exit path of the fetch task drops it.
pub trait WakeSource: Send + Sync {
    fn acquire(&self) -> WakeGuard;
}

/// RAII handle for the wake-equivalent resource.
pub struct WakeGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl WakeGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

}

impl Drop for WakeGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// How long to wait for a fix before giving up.
    pub deadline: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(600),
        }
    }
}

/// The single in-flight acquisition, if any.
struct Awaiting {
    target_number: String,
}

/// Owns the fetch state machine. Create inside a tokio runtime.
pub struct LocationFetcher {
    config: FetcherConfig,
    source: Arc<dyn LocationSource>,
    wake: Arc<dyn WakeSource>,
    sms: Arc<dyn SmsSender>,
    runtime: Handle,
    awaiting: Arc<Mutex<Option<Awaiting>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LocationFetcher {
    /// Captures the current runtime handle; must be called from within one.
    pub fn new(
        config: FetcherConfig,
        source: Arc<dyn LocationSource>,
        wake: Arc<dyn WakeSource>,
        sms: Arc<dyn SmsSender>,
    ) -> Self {
        Self {
            config,
            source,
            wake,
            sms,
            runtime: Handle::current(),
            awaiting: Arc::new(Mutex::new(None)),
            task: Mutex::new(None),
        }
    }

    /// Begin (or retarget) the fetch for `target_number`.
    ///
    /// If a fix is already being awaited this only updates the number the
    /// follow-up SMS will go to; it never starts a second acquisition.
    pub fn start(&self, target_number: &str) {
        {
            let mut awaiting = self.awaiting.lock().expect("fetcher state poisoned");
            if let Some(pending) = awaiting.as_mut() {
                wlog!(
                    "location: fetch already awaiting, retargeting to {}",
                    logging::device_id(target_number)
                );
                pending.target_number = target_number.to_string();
                return;
            }

            // Guard first, then the request; both or neither.
            let guard = self.wake.acquire();
            let criteria = Criteria::fine_high_power();
            let Some(provider) = self.source.best_provider(&criteria) else {
                wlog!("location: no provider matches fine/high-power criteria, aborting fetch");
                drop(guard);
                return;
            };
            let rx = self.source.request_single_fix(&provider);
            wlog!("location: awaiting single fix from provider '{provider}'");

            *awaiting = Some(Awaiting {
                target_number: target_number.to_string(),
            });

            let deadline = self.config.deadline;
            let awaiting_handle = Arc::clone(&self.awaiting);
            let sms = Arc::clone(&self.sms);
            let handle = self.runtime.spawn(async move {
                // The guard moves into the task; dropping the task on any
                // path (delivery, deadline, abort) releases it.
                let _guard = guard;
                let mut rx = rx;
                tokio::select! {
                    fix = &mut rx => match fix {
                        Ok(fix) => {
                            // Always the latest target; it may have been
                            // retargeted since the task started.
                            let number = awaiting_handle
                                .lock()
                                .expect("fetcher state poisoned")
                                .as_ref()
                                .map(|pending| pending.target_number.clone());
                            if let Some(number) = number {
                                let body = format_current_location_message(&fix);
                                if let Err(error) = sms.send(&number, &body) {
                                    wlog!("location: follow-up sms failed: {error}");
                                } else {
                                    wlog!(
                                        "location: fresh fix sent to {}",
                                        logging::device_id(&number)
                                    );
                                }
                            }
                        }
                        Err(_) => {
                            wlog!("location: fix request abandoned by provider");
                        }
                    },
                    _ = sleep(deadline) => {
                        wlog!("location: no fix within deadline, ending fetch");
                    }
                }
                awaiting_handle
                    .lock()
                    .expect("fetcher state poisoned")
                    .take();
            });

            let mut task = self.task.lock().expect("fetcher task poisoned");
            *task = Some(handle);
        }
    }

    /// Explicit teardown: cancel the outstanding request and release the
    /// wake resource.
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().expect("fetcher task poisoned").take() {
            handle.abort();
        }
        self.awaiting
            .lock()
            .expect("fetcher state poisoned")
            .take();
    }

    /// Whether a fix is currently being awaited.
    pub fn is_awaiting(&self) -> bool {
        self.awaiting
            .lock()
            .expect("fetcher state poisoned")
            .is_some()
    }

    /// The number the follow-up would currently go to.
    pub fn target_number(&self) -> Option<String> {
        self.awaiting
            .lock()
            .expect("fetcher state poisoned")
            .as_ref()
            .map(|pending| pending.target_number.clone())
    }
}
