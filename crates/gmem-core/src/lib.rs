//! gmem - Global memory addressing and one-sided transfers for a PGAS runtime

pub mod backend;
pub mod config;
pub mod dtype;
pub mod error;
pub mod gptr;
pub mod layout;
pub mod plan;
pub mod queue;
pub mod rma;
pub mod shm;
pub mod translation;
pub mod types;
pub mod units;

pub use backend::mem::{MemBackend, MemFabric};
pub use backend::shm::ShmBackend;
pub use backend::{OneSided, RmaBackend};
pub use config::{RmaConfig, ShmConfig};
pub use dtype::DType;
pub use error::{Error, Result};
pub use gptr::GlobalPtr;
pub use layout::LayoutDescriptor;
pub use plan::{convert, BlockCopy, TransferPlan};
pub use queue::{select_queue, QueueManager};
pub use rma::{Rma, RmaHandle};
pub use translation::{SegmentHandle, SegmentTable};
pub use types::{BackendSegment, QueueId, SegmentId, TeamIndex, UnitId};
pub use units::{Identity, TeamUnits, UnitMapper};
