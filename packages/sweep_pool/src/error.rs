use thiserror::Error;

/// Errors that can occur when allocating from a pool or configuring the process-wide pools.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Every chunk of the pool was full and the [`Coordinator`][crate::Coordinator] refused to
    /// let the pool add another chunk because the memory capacity would be exceeded.
    ///
    /// The coordinator may have swept every attached pool before refusing. Dropping handles and
    /// sweeping again may free enough slots for a later allocation to succeed.
    #[error(
        "cannot grow pool of {type_name} by {requested_bytes} bytes: \
         {usage_bytes} of {capacity_bytes} bytes already in use"
    )]
    GrowthDenied {
        /// Name of the item type of the pool that attempted to grow.
        type_name: &'static str,

        /// Size of the chunk the pool attempted to add.
        requested_bytes: usize,

        /// Memory committed by all pools of the coordinator when the request was evaluated.
        usage_bytes: usize,

        /// The hard capacity configured on the coordinator.
        capacity_bytes: usize,
    },

    /// The process-wide pools were configured after they had already been initialized, either
    /// by an earlier configuration call or by first use.
    #[error("the process-wide pools are already initialized and can no longer be configured")]
    AlreadyInitialized,
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;
