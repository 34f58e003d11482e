//! Worker body: one thread, one CPU, one chunk.

use tracing::warn;

use crate::combiner::{EmitSink, Emitter, Mapper};

/// Drive `mapper` over every record of `chunk`, delivering emits into
/// `sink`. Runs on the worker's own thread; the worker's lifetime is
/// exactly this call.
pub(crate) fn run_chunk<C, M, S>(cpuid: usize, chunk: C, mut mapper: M, sink: &S)
where
    C: IntoIterator,
    M: Mapper<C::Item>,
    S: EmitSink<M::Key, M::Value>,
{
    if let Err(err) = pin_current_thread(cpuid) {
        warn!(cpuid, %err, "cpu affinity not set, worker runs unpinned");
    }
    let mut em = Emitter::new(sink);
    for record in chunk {
        mapper.map(record, &mut em);
    }
}

#[cfg(target_os = "linux")]
fn pin_current_thread(cpu: usize) -> std::io::Result<()> {
    // SAFETY: cpu_set_t is plain data and sched_setaffinity only reads
    // the set; tid 0 targets the calling thread.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(cpu % libc::CPU_SETSIZE as usize, &mut set);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn pin_current_thread(_cpu: usize) -> std::io::Result<()> {
    Ok(())
}
