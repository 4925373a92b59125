use std::io;

use rama::telemetry::tracing;

pub use libc::rlim_t;

/// Open file descriptor limit (`RLIMIT_NOFILE`) of this process.
///
/// Every virtual user keeps a pooled connection open,
/// so large runs need more than the usual default of 1024.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NofileLimit {
    pub soft: rlim_t,
    pub hard: rlim_t,
}

impl NofileLimit {
    pub fn current() -> io::Result<Self> {
        let mut lim = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        // SAFETY: `lim` is a valid, exclusively borrowed rlimit
        if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut lim) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            soft: lim.rlim_cur,
            hard: lim.rlim_max,
        })
    }

    /// Soft limit to apply in order to get `wanted` descriptors,
    /// `None` if the current soft limit already suffices.
    ///
    /// Never exceeds the hard limit.
    pub fn raised_soft(&self, wanted: rlim_t) -> Option<rlim_t> {
        let soft = wanted.min(self.hard);
        (soft > self.soft).then_some(soft)
    }

    fn apply(&self) -> io::Result<()> {
        let lim = libc::rlimit {
            rlim_cur: self.soft,
            rlim_max: self.hard,
        };
        // SAFETY: `lim` is a valid rlimit, only read by the call
        if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &lim) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Raise the soft descriptor limit up to `wanted`, capped by the hard limit.
///
/// Returns the limit in effect afterwards.
pub fn raise_nofile(wanted: rlim_t) -> io::Result<NofileLimit> {
    let current = NofileLimit::current()?;
    let Some(soft) = current.raised_soft(wanted) else {
        tracing::debug!(soft = current.soft, %wanted, "ulimit: current soft limit suffices");
        return Ok(current);
    };

    let raised = NofileLimit { soft, ..current };
    raised.apply()?;
    tracing::info!(from = current.soft, to = soft, "ulimit: raised soft limit");

    if soft < wanted {
        tracing::warn!(
            hard = current.hard,
            %wanted,
            "ulimit: hard limit is below the wanted amount of descriptors",
        );
    }
    Ok(raised)
}
