//! Bounded job runner.
//!
//! Runs asynchronous jobs with at most `K` in flight. The first `K` jobs
//! start in submission order; each completion launches exactly one queued
//! job. A failing job rejects the whole batch immediately. Jobs already
//! running are neither awaited nor cancelled: they run as detached tokio
//! tasks once the batch has returned.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};

/// Why a batch was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError<E> {
    /// A job returned an error
    #[error("{0}")]
    Job(E),
    /// A job's task was cancelled before it produced a value
    #[error("a job was cancelled before it finished")]
    Cancelled,
}

/// Which end of the queue refills a freed slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplenishOrder {
    /// Oldest queued job first
    #[default]
    Fifo,
    /// Newest queued job first
    Lifo,
}

/// Runs jobs with a fixed concurrency cap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRunner {
    max_in_flight: usize,
    order: ReplenishOrder,
}

impl BatchRunner {
    /// Create a runner allowing `max_in_flight` concurrent jobs (at least one)
    #[must_use]
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight: max_in_flight.max(1),
            order: ReplenishOrder::Fifo,
        }
    }

    /// Set the replenishment order
    #[must_use]
    pub const fn with_order(mut self, order: ReplenishOrder) -> Self {
        self.order = order;
        self
    }

    /// Concurrency cap
    #[must_use]
    pub const fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Run every job, returning their values in submission order
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Job`] with the error of the first job to fail,
    /// without waiting for the jobs that are still running, or
    /// [`BatchError::Cancelled`] if a job's task was cancelled. A job that
    /// panics resumes the panic in the caller.
    pub async fn run<T, E, F, Fut>(&self, jobs: Vec<F>) -> Result<Vec<T>, BatchError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let total = jobs.len();
        let mut queue: VecDeque<(usize, F)> = jobs.into_iter().enumerate().collect();
        let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(total).collect();
        let mut in_flight = FuturesUnordered::new();

        while in_flight.len() < self.max_in_flight {
            let Some((index, job)) = queue.pop_front() else {
                break;
            };
            in_flight.push(spawn_job(index, job));
        }

        while let Some(joined) = in_flight.next().await {
            // Returning drops the remaining handles, which detaches their tasks
            let (index, value) = settle(joined)?;
            slots[index] = Some(value);

            if let Some((index, job)) = self.next_job(&mut queue) {
                in_flight.push(spawn_job(index, job));
            }
        }

        slots
            .into_iter()
            .map(|slot| slot.ok_or(BatchError::Cancelled))
            .collect()
    }

    fn next_job<F>(&self, queue: &mut VecDeque<(usize, F)>) -> Option<(usize, F)> {
        match self.order {
            ReplenishOrder::Fifo => queue.pop_front(),
            ReplenishOrder::Lifo => queue.pop_back(),
        }
    }
}

/// Unpack a joined task, resuming its panic if it had one
fn settle<T, E>(
    joined: Result<(usize, Result<T, E>), JoinError>,
) -> Result<(usize, T), BatchError<E>> {
    match joined {
        Ok((index, Ok(value))) => Ok((index, value)),
        Ok((_, Err(e))) => Err(BatchError::Job(e)),
        Err(join_err) => match join_err.try_into_panic() {
            Ok(payload) => std::panic::resume_unwind(payload),
            Err(_) => Err(BatchError::Cancelled),
        },
    }
}

fn spawn_job<T, E, F, Fut>(index: usize, job: F) -> JoinHandle<(usize, Result<T, E>)>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    tokio::spawn(async move { (index, job().await) })
}
