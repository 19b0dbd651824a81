// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `worker` module decouples the polyphase synthesis filter onto one persistent thread per
//! channel.
//!
//! Synthesis dominates the cost of a decoded frame, and the two channels of a granule are
//! independent once the hybrid stage has run, so the decode thread hands each channel's spectral
//! buffers to its worker and immediately continues with the next frame. Two buffers rotate
//! between the decode thread and each worker over a pair of bounded channels: the decode thread
//! fills one while the worker filters the other, and blocks only when collecting the previous
//! frame's PCM. This bounds the pipeline depth to one frame and makes PCM ordering deterministic
//! regardless of scheduling.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};

use crate::common::SAMPLES_PER_GRANULE;
use crate::synthesis::{self, SynthesisState};

/// The spectral buffers for the granules of one frame, one channel. Filled by the decode thread
/// (requantization through hybrid synthesis operate in place), filtered by a worker.
pub struct GranuleBuffers {
    pub xr: [[f32; SAMPLES_PER_GRANULE]; 2],
    pub n_granules: usize,
}

impl GranuleBuffers {
    fn new(n_granules: usize) -> Box<Self> {
        Box::new(GranuleBuffers { xr: [[0.0; SAMPLES_PER_GRANULE]; 2], n_granules })
    }
}

/// One channel's work unit: the spectral buffers to filter and the PCM block to fill.
pub struct SynthesisJob {
    pub bufs: Box<GranuleBuffers>,
    pub pcm: Box<[f32; 2 * SAMPLES_PER_GRANULE]>,
}

/// A persistent synthesis worker thread for a single channel.
///
/// The worker lives for the whole track. It is shut down cooperatively: dropping the job sender
/// disconnects the worker's receive loop, after which the thread exits and is joined.
pub struct SynthesisWorker {
    jobs: Option<SyncSender<SynthesisJob>>,
    results: Receiver<SynthesisJob>,
    handle: Option<JoinHandle<()>>,
}

impl SynthesisWorker {
    /// Spawn the worker for channel `ch`.
    pub fn spawn(ch: usize) -> SynthesisWorker {
        let (job_tx, job_rx) = sync_channel::<SynthesisJob>(1);
        let (result_tx, result_rx) = sync_channel::<SynthesisJob>(1);

        let name = if ch == 0 { "synthesis-0" } else { "synthesis-1" };

        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                let mut state = SynthesisState::default();

                // Runs until the job sender is dropped or the result receiver goes away, both of
                // which signal shutdown.
                while let Ok(mut job) = job_rx.recv() {
                    for gr in 0..job.bufs.n_granules {
                        let xr = &mut job.bufs.xr[gr];

                        synthesis::frequency_inversion(xr);

                        let out = &mut job.pcm
                            [gr * SAMPLES_PER_GRANULE..(gr + 1) * SAMPLES_PER_GRANULE];
                        synthesis::synthesis(&mut state, 18, &xr[..], out);
                    }

                    if result_tx.send(job).is_err() {
                        break;
                    }
                }
            })
            .expect("failed to spawn synthesis worker");

        SynthesisWorker { jobs: Some(job_tx), results: result_rx, handle: Some(handle) }
    }

    /// Allocate the pair of buffer sets that will rotate through this worker.
    pub fn allocate_buffers(n_granules: usize) -> (SynthesisJob, SynthesisJob) {
        let job = || SynthesisJob {
            bufs: GranuleBuffers::new(n_granules),
            pcm: Box::new([0.0; 2 * SAMPLES_PER_GRANULE]),
        };
        (job(), job())
    }

    /// Hand a filled buffer set to the worker. The channel holds one job, and the caller only
    /// submits after collecting the previous frame, so this never blocks in the steady state.
    pub fn submit(&mut self, job: SynthesisJob) {
        let jobs = self.jobs.as_ref().expect("worker already shut down");
        match jobs.try_send(job) {
            Ok(()) => (),
            // The slot can only be full if the caller broke the submit/collect cadence.
            Err(TrySendError::Full(_)) => panic!("synthesis worker job slot full"),
            // A disconnected worker means the thread panicked; propagate.
            Err(TrySendError::Disconnected(_)) => panic!("synthesis worker terminated"),
        }
    }

    /// Wait for the previously submitted buffers, now carrying PCM. This is the decode thread's
    /// only blocking point.
    pub fn collect(&mut self) -> SynthesisJob {
        self.results.recv().expect("synthesis worker terminated")
    }
}

impl Drop for SynthesisWorker {
    fn drop(&mut self) {
        // Disconnect the job channel to stop the worker, then join it. Any in-flight result is
        // dropped with the receiver.
        self.jobs = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_worker_round_trip() {
        let mut worker = SynthesisWorker::spawn(0);
        let (mut job, _spare) = SynthesisWorker::allocate_buffers(2);

        // A DC spectrum must produce some non-zero PCM once filtered.
        for gr in 0..2 {
            for s in job.bufs.xr[gr].iter_mut() {
                *s = 0.5;
            }
        }

        worker.submit(job);
        let job = worker.collect();

        assert!(job.pcm.iter().any(|&s| s != 0.0));
    }

    #[test]
    fn verify_worker_is_deterministic() {
        let run = || {
            let mut worker = SynthesisWorker::spawn(0);
            let (mut job, _spare) = SynthesisWorker::allocate_buffers(2);

            for gr in 0..2 {
                for (i, s) in job.bufs.xr[gr].iter_mut().enumerate() {
                    *s = ((i * 31 + gr * 7) % 97) as f32 / 97.0 - 0.5;
                }
            }

            worker.submit(job);
            worker.collect().pcm
        };

        let a = run();
        let b = run();
        assert!(a.iter().zip(b.iter()).all(|(x, y)| x == y));
    }
}
