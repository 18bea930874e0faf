//! Domain types and models for the session-resilience layer.

pub mod connection;
pub mod endpoint;
pub mod environment;
pub mod event;
pub mod ids;
pub mod query;
pub mod request;
pub mod token;
pub mod user;

pub use connection::{ConnectionId, ConnectionState, DisconnectSource};
pub use endpoint::{Endpoint, EndpointPath, HttpMethod};
pub use environment::EnvironmentState;
pub use event::{ChatEvent, MissingEventsPayload};
pub use ids::{ChannelId, MessageId};
pub use query::{ChannelListQuery, ChannelPage};
pub use request::QueuedRequest;
pub use token::Token;
pub use user::{UserId, UserInfo};
