//! Timed probe: brackets one synchronous operation with counter samples.

use bench_common::cycles::{CycleSource, CycleTimestamp, HardwareCounter, Measurement};

/// Wraps an operation between two reads of a cycle source.
///
/// The start sample is the last thing done before the operation and the end
/// sample the first thing done after it returns. Errors from the operation
/// are propagated unchanged and the in-flight measurement is dropped.
#[derive(Debug, Clone, Default)]
pub struct Probe<C: CycleSource = HardwareCounter> {
    source: C,
}

impl Probe<HardwareCounter> {
    /// Probe backed by the hardware cycle counter.
    #[must_use]
    pub fn hardware() -> Self {
        Self {
            source: HardwareCounter,
        }
    }
}

impl<C: CycleSource> Probe<C> {
    /// Probe backed by an arbitrary cycle source.
    pub fn new(source: C) -> Self {
        Self { source }
    }

    /// The underlying cycle source.
    pub fn source(&self) -> &C {
        &self.source
    }

    /// A single counter sample.
    #[inline(always)]
    pub fn sample(&self) -> CycleTimestamp {
        self.source.read_cycles()
    }

    /// Measure a fallible operation.
    ///
    /// # Errors
    ///
    /// Returns whatever `op` returns; no measurement is produced in that case.
    #[inline(always)]
    pub fn measure<T, E>(
        &self,
        op: impl FnOnce() -> Result<T, E>,
    ) -> Result<(T, Measurement), E> {
        let start = self.source.read_cycles();
        let result = op();
        let end = self.source.read_cycles();
        result.map(|value| (value, Measurement::new(start, end)))
    }

    /// Measure an infallible operation.
    #[inline(always)]
    pub fn time<T>(&self, op: impl FnOnce() -> T) -> (T, Measurement) {
        let start = self.source.read_cycles();
        let value = op();
        let end = self.source.read_cycles();
        (value, Measurement::new(start, end))
    }
}
