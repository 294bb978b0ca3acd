// # Chat Core
//
// Real-time chat fabric: room/member/message persistence with encrypted
// content, a rolling-window rate limiter, the in-process connection index,
// the cross-node pub/sub bridge, and the WebSocket command protocol.
//
// - **model**: domain records (rooms, members, messages, reactions)
// - **store**: process-local tables shared by the repositories
// - **repository**: type-narrow operations per aggregate root
// - **rate_limit**: rolling-window admission over the rate-limit log
// - **filter**: prohibited-word content filter
// - **connections**: connection/user/room indices for this node
// - **pubsub**: room-channel envelopes and brokers (loopback, Redis)
// - **protocol**: client/server frame types
// - **service**: command handling and HTTP-surface operations

pub mod connections;
pub mod filter;
pub mod model;
pub mod protocol;
pub mod pubsub;
pub mod rate_limit;
pub mod repository;
pub mod service;
pub mod store;

pub use connections::{ConnectionId, ConnectionManager};
pub use filter::{ContentFilter, PROHIBITED_WORDS_KEY};
pub use model::{Member, MemberRole, Message, MessageType, Reaction, Room, RoomType};
pub use protocol::{CommandType, WsCommand, WsResponse};
pub use pubsub::{
    room_channel, start_redis_listener, ChatBroker, ChatFabric, LoopbackBroker, RedisChatBroker,
    RoomEnvelope,
};
pub use rate_limit::{RateLimiter, DEFAULT_MAX_EVENTS, DEFAULT_WINDOW_SECS};
pub use repository::{
    MemberRepository, MessageRepository, ReactionRepository, RoomPage, RoomRepository,
    CONTENT_UNAVAILABLE,
};
pub use service::{ChatService, RoomSummary};
pub use store::ChatStore;
