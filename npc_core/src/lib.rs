//! `npc_core`
//!
//! Client-side NPC simulation and packet synchronization.
//!
//! Design goals:
//! - NPCs exist only in the packets sent to each viewer; nothing is
//!   registered with the hosting server.
//! - Per-viewer packet order is strict; viewers are independent.
//! - Protocol differences stay inside the codecs.
//! - No `unsafe`.

pub mod config;
pub mod dispatch;
pub mod entity;
pub mod error;
pub mod event;
pub mod host;
pub mod math;
pub mod meta;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod tracker;
pub mod viewer;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::entity::*;
    pub use crate::error::*;
    pub use crate::event::*;
    pub use crate::host::*;
    pub use crate::math::*;
    pub use crate::protocol::{Animation, Codec, CodecTable, Hand, InboundEvent, InteractAction, ProtocolVersion};
    pub use crate::router::{InteractCallback, InteractContext, RouteOutcome};
    pub use crate::tracker::EdgeState;
    pub use crate::viewer::*;
}
