//! Admission control
//!
//! A fixed pool of execution slots. Submissions that find every slot taken
//! wait in line. Only the job at the front of the line waits on the slots,
//! and it draws its sequence number on reaching the front, so jobs are
//! admitted in sequence order.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, instrument};

use crate::process::ScratchFile;
use crate::session::SubmitError;

/// A submission waiting for a slot
#[derive(Debug)]
pub(crate) struct Job {
    submitted_at: Instant,
    pub(crate) scratch: ScratchFile,
    _place: QueuePlace,
}

/// A job that has been granted a slot
#[derive(Debug)]
pub(crate) struct AdmittedJob {
    pub(crate) sequence: u64,
    pub(crate) queued_for: Duration,
    pub(crate) scratch: ScratchFile,
    pub(crate) permit: OwnedSemaphorePermit,
}

/// Counts a job as queued for as long as it lives
#[derive(Debug)]
struct QueuePlace {
    queued: Arc<AtomicUsize>,
}

impl Drop for QueuePlace {
    fn drop(&mut self) {
        self.queued.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug)]
pub(crate) struct Admission {
    slots: Arc<Semaphore>,
    capacity: usize,
    max_queued: Option<usize>,
    queued: Arc<AtomicUsize>,
    /// Fair lock whose holder is the front of the line. Guards the last
    /// sequence number handed out.
    line: Mutex<u64>,
}

impl Admission {
    pub(crate) fn new(capacity: usize, max_queued: Option<usize>) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            max_queued,
            queued: Arc::new(AtomicUsize::new(0)),
            line: Mutex::new(0),
        }
    }

    /// Put a job in the queue
    pub(crate) fn enqueue(&self, scratch: ScratchFile) -> Result<Job, SubmitError> {
        if self.slots.is_closed() {
            return Err(SubmitError::ShuttingDown);
        }

        loop {
            let current = self.queued.load(Ordering::Acquire);
            if let Some(max) = self.max_queued
                && current >= max
            {
                return Err(SubmitError::QueueFull { max });
            }
            if self
                .queued
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }

        debug!(queued = self.queued(), "job enqueued");

        Ok(Job {
            submitted_at: Instant::now(),
            scratch,
            _place: QueuePlace {
                queued: self.queued.clone(),
            },
        })
    }

    /// Wait until a slot is free and hand it to the job.
    ///
    /// Jobs are admitted in the order they started waiting, which is also
    /// the order of their sequence numbers. Dropping the future gives up the
    /// place in line.
    #[instrument(skip_all)]
    pub(crate) async fn admit(&self, job: Job) -> Result<AdmittedJob, SubmitError> {
        let mut front = self.line.lock().await;
        *front += 1;
        let sequence = *front;
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SubmitError::ShuttingDown)?;
        drop(front);

        let Job {
            submitted_at,
            scratch,
            _place,
        } = job;
        drop(_place);

        let queued_for = submitted_at.elapsed();
        debug!(sequence, queued_ms = queued_for.as_millis() as u64, "job admitted");

        Ok(AdmittedJob {
            sequence,
            queued_for,
            scratch,
            permit,
        })
    }

    /// Refuse new jobs and fail the ones still waiting
    pub(crate) fn close(&self) {
        self.slots.close();
    }

    /// Jobs waiting for a slot
    pub(crate) fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}
