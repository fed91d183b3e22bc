use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use deepresearch_common::{DeepResearchError, Result};

/// Enforces the concurrency discipline of §4.3/§9: a global concurrency
/// cap, a per-domain mutual exclusion + cooldown so a single host is never
/// hit by two fetches back to back, and a single global PDF-extraction
/// mutex (PDF parsing is memory-heavy and deliberately serialized).
///
/// Lock order is always: global semaphore, then (for PDFs) the PDF mutex,
/// then the per-domain mutex. Cooldown is recorded while still holding the
/// domain mutex so a concurrent waiter always observes the fresh timestamp.
pub struct Scheduler {
    global: Semaphore,
    domain_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    domain_cooldown: Mutex<HashMap<String, Instant>>,
    pdf_lock: Mutex<()>,
    cool_down: Duration,
}

/// RAII handle returned by [`Scheduler::acquire`]; releases the domain
/// mutex and global permit together when dropped.
pub struct FetchPermit<'a> {
    _domain_guard: tokio::sync::OwnedMutexGuard<()>,
    _global_permit: tokio::sync::SemaphorePermit<'a>,
}

impl Scheduler {
    pub fn new(concurrent_limit: usize, cool_down_secs: f64) -> Self {
        Self {
            global: Semaphore::new(concurrent_limit.max(1)),
            domain_locks: Mutex::new(HashMap::new()),
            domain_cooldown: Mutex::new(HashMap::new()),
            pdf_lock: Mutex::new(()),
            cool_down: Duration::from_secs_f64(cool_down_secs.max(0.0)),
        }
    }

    async fn domain_lock(&self, domain: &str) -> Arc<Mutex<()>> {
        let mut locks = self.domain_locks.lock().await;
        locks
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the global permit and the per-domain slot, waiting out any
    /// remaining per-domain cooldown, or returning
    /// `DeepResearchError::SchedulerCancelled` if `cancel` fires first.
    pub async fn acquire<'a>(&'a self, domain: &str, cancel: &CancellationToken) -> Result<FetchPermit<'a>> {
        let global_permit = tokio::select! {
            permit = self.global.acquire() => permit.expect("semaphore never closed"),
            _ = cancel.cancelled() => {
                return Err(DeepResearchError::SchedulerCancelled(domain.to_string()));
            }
        };

        let domain_arc = self.domain_lock(domain).await;
        let domain_guard = tokio::select! {
            guard = domain_arc.lock_owned() => guard,
            _ = cancel.cancelled() => {
                return Err(DeepResearchError::SchedulerCancelled(domain.to_string()));
            }
        };

        let wait = {
            let cooldowns = self.domain_cooldown.lock().await;
            cooldowns
                .get(domain)
                .and_then(|last| self.cool_down.checked_sub(last.elapsed()))
        };
        if let Some(remaining) = wait {
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                _ = cancel.cancelled() => {
                    return Err(DeepResearchError::SchedulerCancelled(domain.to_string()));
                }
            }
        }

        Ok(FetchPermit {
            _domain_guard: domain_guard,
            _global_permit: global_permit,
        })
    }

    /// Record that `domain` was just fetched, resetting its cooldown
    /// clock. Must be called while the `FetchPermit` for that domain is
    /// still held, so no concurrent waiter can slip in ahead of it.
    pub async fn record_fetch(&self, domain: &str) {
        let mut cooldowns = self.domain_cooldown.lock().await;
        cooldowns.insert(domain.to_string(), Instant::now());
    }

    /// Serializes PDF extraction work. Acquired after the global permit,
    /// released before it (drop order: this guard first, then the
    /// `FetchPermit` returned by `acquire`).
    pub async fn acquire_pdf_lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.pdf_lock.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_on_same_domain_waits_for_cooldown() {
        let scheduler = Scheduler::new(4, 0.05);
        let cancel = CancellationToken::new();

        let start = Instant::now();
        {
            let permit = scheduler.acquire("example.com", &cancel).await.unwrap();
            scheduler.record_fetch("example.com").await;
            drop(permit);
        }
        let _permit2 = scheduler.acquire("example.com", &cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn different_domains_do_not_share_cooldown() {
        let scheduler = Scheduler::new(4, 10.0);
        let cancel = CancellationToken::new();

        let permit_a = scheduler.acquire("a.com", &cancel).await.unwrap();
        scheduler.record_fetch("a.com").await;
        drop(permit_a);

        let start = Instant::now();
        let _permit_b = scheduler.acquire("b.com", &cancel).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn cancellation_interrupts_acquire() {
        let scheduler = Scheduler::new(1, 0.0);
        let cancel = CancellationToken::new();
        let _held = scheduler.acquire("x.com", &cancel).await.unwrap();

        cancel.cancel();
        let result = scheduler.acquire("y.com", &cancel).await;
        assert!(result.is_err());
    }
}
