// =============================================================================
// Worker — one dedicated OS thread per pool slot
// =============================================================================
//
// A worker owns the receiving end of a job channel and runs jobs one at a
// time. If the handler panics the thread unwinds and the job's reply sender
// is dropped, which the pool observes as a worker fault. Terminating a worker
// only closes its channel: a job already running finishes in the background
// and its reply goes nowhere.
// =============================================================================

use std::sync::mpsc;
use std::thread;

use tokio::sync::oneshot;
use tracing::debug;

use super::task::{Task, TaskHandler, TaskOutput};

/// A task handed to a worker thread.
pub(crate) struct Job {
    pub task_id: u64,
    pub task: Task,
    pub reply: oneshot::Sender<TaskOutput>,
}

pub(crate) struct Worker {
    pub index: usize,
    pub generation: u32,
    sender: mpsc::Sender<Job>,
}

impl Worker {
    /// Spawn the thread for slot `index`.
    pub fn spawn(pool: &str, index: usize, generation: u32, handler: TaskHandler) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let name = format!("{pool}-w{index}.{generation}");

        thread::Builder::new()
            .name(name.clone())
            .spawn(move || run(&name, receiver, handler))?;

        Ok(Self {
            index,
            generation,
            sender,
        })
    }

    /// Hand a job to the thread. Returns the job back if the thread is gone.
    pub fn send(&self, job: Job) -> Result<(), Job> {
        self.sender.send(job).map_err(|e| e.0)
    }

    /// Close the job channel; the thread exits once its current job ends.
    pub fn terminate(self) {
        debug!(worker = self.index, generation = self.generation, "worker terminated");
        drop(self.sender);
    }
}

fn run(name: &str, receiver: mpsc::Receiver<Job>, handler: TaskHandler) {
    while let Ok(job) = receiver.recv() {
        debug!(worker = name, task_id = job.task_id, kind = %job.task.kind(), "job started");
        let output = handler(job.task);
        // The caller may have timed out already.
        let _ = job.reply.send(output);
    }
    debug!(worker = name, "worker thread exiting");
}
