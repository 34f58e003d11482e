//! Run orchestration: split the input, spawn pinned workers, join.

use std::thread;

use thiserror::Error;
use tracing::{debug, error};

use crate::combiner::{EmitSink, Mapper};
use crate::cpu_count;
use crate::splitter::{SplitError, Splitter};
use crate::task;

#[derive(Debug, Error)]
pub enum RunError {
    /// The splitter refused the requested chunking; nothing was processed.
    #[error("input split failed: {0}")]
    Split(#[from] SplitError),
    /// Workers are pinned one per CPU, so a split may not produce more
    /// chunks than there are online CPUs.
    #[error("too many chunks: {nchunk} produced, at most {ncpu} supported")]
    TooManyChunks { nchunk: usize, ncpu: usize },
}

/// Drives mappers over a splitter's chunks into a shared store or
/// pipeline.
///
/// Each `run` spawns fresh workers and joins them all before returning;
/// there is no pool reuse. The sink keeps its contents across runs, so
/// iterative workloads accumulate until the caller resets explicitly.
pub struct Runtime<'s, Sp, S> {
    splitter: &'s mut Sp,
    sink: &'s S,
}

impl<'s, Sp, S> Runtime<'s, Sp, S>
where
    Sp: Splitter,
{
    pub fn new(splitter: &'s mut Sp, sink: &'s S) -> Self {
        Self { splitter, sink }
    }

    /// Execute one full pass over the input with `ntask` workers; 0 means
    /// one per online CPU. Worker `t` is pinned to CPU `t` and owns
    /// chunk `t`.
    pub fn run<M>(&mut self, mapper: M, ntask: usize) -> Result<(), RunError>
    where
        M: Mapper<<Sp::Chunk as IntoIterator>::Item>,
        S: EmitSink<M::Key, M::Value>,
    {
        let ncpu = cpu_count();
        let ntask = if ntask == 0 { ncpu } else { ntask };
        if let Err(err) = self.splitter.split(ntask) {
            error!(ntask, %err, "split failed");
            return Err(err.into());
        }
        let nchunk = self.splitter.size();
        if nchunk > ncpu {
            error!(nchunk, ncpu, "more chunks than online cpus");
            return Err(RunError::TooManyChunks { nchunk, ncpu });
        }
        debug!(ntask, nchunk, "starting workers");
        let splitter = &*self.splitter;
        let sink = self.sink;
        thread::scope(|scope| {
            for t in 0..nchunk {
                let chunk = splitter.chunk(t);
                let mapper = mapper.clone();
                scope.spawn(move || task::run_chunk(t, chunk, mapper, sink));
            }
        });
        Ok(())
    }
}
