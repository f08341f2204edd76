use std::num::NonZero;

// A poisoned lock means some pool bookkeeping was interrupted halfway, so the free/managed
// partition of at least one chunk can no longer be trusted.
pub(crate) const ERR_POISONED_LOCK: &str = "encountered poisoned lock - pool bookkeeping \
    may be inconsistent and slots could be handed out twice";

/// Number of slots per chunk when neither a population nor a byte budget is configured.
pub(crate) const DEFAULT_CHUNK_POPULATION: NonZero<usize> = NonZero::new(10).unwrap();

/// Share of the capacity, in percent, at which admission requests trigger a global sweep.
pub(crate) const DEFAULT_SWEEP_THRESHOLD_PERCENT: u8 = 75;

pub(crate) const MAX_SWEEP_THRESHOLD_PERCENT: u8 = 100;
