//! Cycle counter access and cycle-domain measurements.
//!
//! The counter is the sole timing source of the benchmark. Samples are raw
//! register values; no conversion to wall-clock units is ever performed, and
//! two samples are only compared by subtraction within one [`Measurement`].

use serde::Serialize;
use std::fmt;

/// A raw sample of the free-running cycle counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct CycleTimestamp(pub u64);

impl CycleTimestamp {
    /// Raw counter value.
    #[inline]
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CycleTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read the hardware cycle counter.
///
/// Compiles down to a single register read on x86_64 (`rdtsc`), aarch64
/// (`CNTVCT_EL0`) and riscv64 (`rdcycle`). Other targets fall back to a
/// monotonic nanosecond clock anchored at first use.
#[inline(always)]
#[must_use]
pub fn read_cycles() -> CycleTimestamp {
    CycleTimestamp(arch::read())
}

#[cfg(target_arch = "x86_64")]
mod arch {
    #[inline(always)]
    pub(super) fn read() -> u64 {
        // SAFETY: RDTSC is available on every x86_64 CPU and only reads the
        // timestamp counter.
        #[allow(unused_unsafe)]
        unsafe {
            core::arch::x86_64::_rdtsc()
        }
    }
}

#[cfg(target_arch = "aarch64")]
mod arch {
    #[inline(always)]
    pub(super) fn read() -> u64 {
        let counter: u64;
        // SAFETY: CNTVCT_EL0 is readable from EL0 and the read has no side effects.
        unsafe {
            core::arch::asm!(
                "mrs {}, cntvct_el0",
                out(reg) counter,
                options(nomem, nostack, preserves_flags),
            );
        }
        counter
    }
}

#[cfg(target_arch = "riscv64")]
mod arch {
    #[inline(always)]
    pub(super) fn read() -> u64 {
        let counter: u64;
        // SAFETY: rdcycle reads the cycle CSR and has no side effects.
        unsafe {
            core::arch::asm!(
                "rdcycle {}",
                out(reg) counter,
                options(nomem, nostack, preserves_flags),
            );
        }
        counter
    }
}

#[cfg(not(any(
    target_arch = "x86_64",
    target_arch = "aarch64",
    target_arch = "riscv64"
)))]
mod arch {
    use std::sync::OnceLock;
    use std::time::Instant;

    static EPOCH: OnceLock<Instant> = OnceLock::new();

    #[inline(always)]
    pub(super) fn read() -> u64 {
        let epoch = EPOCH.get_or_init(Instant::now);
        u64::try_from(epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Source of cycle samples.
///
/// Probes are generic over the source so that tests can drive them with a
/// scripted counter; production code uses [`HardwareCounter`].
pub trait CycleSource: Send + Sync {
    /// Take one sample.
    fn read_cycles(&self) -> CycleTimestamp;
}

/// The processor's own cycle counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct HardwareCounter;

impl CycleSource for HardwareCounter {
    #[inline(always)]
    fn read_cycles(&self) -> CycleTimestamp {
        read_cycles()
    }
}

/// Elapsed cycles between two samples of one measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Elapsed {
    /// `end >= start`; the plain difference.
    Cycles(u64),
    /// `end < start`: the counter wrapped (or the samples came from different
    /// counter domains). Holds the difference modulo 2^64, which is only
    /// meaningful if exactly one wrap occurred.
    Wrapped(u64),
}

impl Elapsed {
    /// The duration in cycles, or `None` when the measurement wrapped.
    #[must_use]
    pub fn cycles(self) -> Option<u64> {
        match self {
            Self::Cycles(n) => Some(n),
            Self::Wrapped(_) => None,
        }
    }

    /// Returns true if the counter wrapped between the two samples.
    #[must_use]
    pub fn is_wrapped(self) -> bool {
        matches!(self, Self::Wrapped(_))
    }
}

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cycles(n) => write!(f, "{n}"),
            Self::Wrapped(n) => write!(f, "wrapped ({n})"),
        }
    }
}

/// A pair of samples bracketing one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Measurement {
    /// Sample taken immediately before the operation.
    pub start: CycleTimestamp,
    /// Sample taken immediately after the operation.
    pub end: CycleTimestamp,
}

impl Measurement {
    /// Create a measurement from two samples.
    #[must_use]
    pub fn new(start: CycleTimestamp, end: CycleTimestamp) -> Self {
        Self { start, end }
    }

    /// Compute the elapsed cycles, flagging wraparound.
    #[must_use]
    pub fn elapsed(&self) -> Elapsed {
        if self.end >= self.start {
            Elapsed::Cycles(self.end.0 - self.start.0)
        } else {
            Elapsed::Wrapped(self.end.0.wrapping_sub(self.start.0))
        }
    }
}
