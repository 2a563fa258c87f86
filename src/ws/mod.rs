pub mod color;
pub mod connctx;
pub mod registry;
pub mod room;

pub use color::presence_color;
pub use connctx::ConnCtx;
pub use registry::{RegistryLimits, RoomRegistry};
pub use room::{JoinSnapshot, LeaveOutcome, Member, MemberSender, Presence, Room, OUTBOUND_QUEUE_CAPACITY};
