// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! In-order execution streams.
//!
//! Each stream owns a worker thread draining a FIFO channel. The first
//! failing submission poisons the stream: later work is skipped and every
//! `synchronize` reports the stored status.

use super::memory::DeviceMemory;
use crate::Status;
use parking_lot::Mutex;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

pub(crate) type Work = Box<dyn FnOnce(&mut DeviceMemory) -> Result<(), Status> + Send>;

enum Job {
    Run { label: &'static str, work: Work },
    Fence(mpsc::Sender<()>),
}

pub(crate) struct StreamWorker {
    id: u64,
    sender: Option<mpsc::Sender<Job>>,
    error: Arc<Mutex<Option<Status>>>,
    thread: Option<JoinHandle<()>>,
}

impl StreamWorker {
    pub(crate) fn spawn(id: u64, memory: Arc<Mutex<DeviceMemory>>) -> Result<Self, Status> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let error = Arc::new(Mutex::new(None));
        let sticky = Arc::clone(&error);

        let thread = std::thread::Builder::new()
            .name(format!("emu-stream-{id}"))
            .spawn(move || {
                for job in receiver {
                    match job {
                        Job::Run { label, work } => {
                            if sticky.lock().is_some() {
                                tracing::trace!(stream = id, op = label, "skipped on failed stream");
                                continue;
                            }
                            let result = {
                                let mut mem = memory.lock();
                                work(&mut *mem)
                            };
                            if let Err(status) = result {
                                tracing::debug!(stream = id, op = label, %status, "kernel failed");
                                *sticky.lock() = Some(status);
                            }
                        }
                        Job::Fence(done) => {
                            let _ = done.send(());
                        }
                    }
                }
            })
            .map_err(|_| Status::INTERNAL)?;

        Ok(Self {
            id,
            sender: Some(sender),
            error,
            thread: Some(thread),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn submit(&self, label: &'static str, work: Work) -> Status {
        match &self.sender {
            Some(sender) if sender.send(Job::Run { label, work }).is_ok() => Status::SUCCESS,
            _ => Status::INTERNAL,
        }
    }

    pub(crate) fn synchronize(&self) -> Status {
        let (done_tx, done_rx) = mpsc::channel();
        let Some(sender) = &self.sender else {
            return Status::INTERNAL;
        };
        if sender.send(Job::Fence(done_tx)).is_err() || done_rx.recv().is_err() {
            return Status::INTERNAL;
        }
        self.error.lock().unwrap_or(Status::SUCCESS)
    }
}

impl Drop for StreamWorker {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        self.sender.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(stream = self.id, "stream worker panicked");
            }
        }
    }
}
