pub mod outbound;
pub mod reply_cache;
pub mod reply_channel;
pub mod resolution_module;

pub use outbound::{NetEvent, OutboundEntry, OutboundHandle, OutboundQuery, OutboundSender, UpstreamReply};
pub use reply_cache::ReplyCache;
pub use reply_channel::{CallbackOutcome, ClientAnswer, ClientQuery, MeshCallback, ReplyChannel};
pub use resolution_module::{ModuleEnv, ModuleEvent, ModuleExtState, ModuleQState, ResolutionModule};
