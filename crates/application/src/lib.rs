//! meshdns application layer: the ports the query mesh is built against.
pub mod ports;

pub use ports::{
    CallbackOutcome, ClientAnswer, ClientQuery, MeshCallback, ModuleEnv, ModuleEvent, ModuleExtState,
    ModuleQState, NetEvent, OutboundEntry, OutboundHandle, OutboundQuery, OutboundSender,
    ReplyCache, ReplyChannel, ResolutionModule, UpstreamReply,
};
