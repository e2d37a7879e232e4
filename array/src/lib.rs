//! Host arrays mirrored to accelerator memory.
//!
//! A [`MirrorArray`] lives on the host and is copied to a device only when
//! asked, and only if the device copy is missing or stale. Copies back to the
//! host overwrite the host storage in place. Coherence is tracked per
//! storage, not per view: every slice, index, reshape or clone of an array
//! resolves the same [`CoherenceState`] through the session's
//! [`IdentityCache`].
//!
//! ```text
//!   set / assign / fill / op=        push_to_device            pull_to_host
//!            │                             │                         │
//!            ▼                             ▼                         ▼
//!   mark_host_mutated ──► CoherenceState ◄── TransferEngine ──► DeviceRegistry ──► CommandQueue
//!                          (dirty, copied,                      (resolve device,
//!                           buffers, pending)                    one queue per device)
//! ```
//!
//! A [`Session`] scopes the identity cache and the default device. If its
//! configured device cannot be found, transfers report
//! [`TransferOutcome::NoDevice`] and the arrays stay host-only.

pub mod array;
pub mod coherence;
pub mod error;
pub mod identity;
mod ops;
pub mod session;
mod storage;
pub mod store;
pub mod transfer;

pub use array::MirrorArray;
pub use coherence::{CoherenceState, Location, PendingTransfer};
pub use error::{Error, Result};
pub use identity::{IdentityCache, SharedState, StorageKey};
pub use session::Session;
pub use store::BufferStore;
pub use transfer::{TransferEngine, TransferOptions, TransferOutcome};

pub use mirror_device as device;
pub use mirror_dtype as dtype;
