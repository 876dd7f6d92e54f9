pub mod connection;
pub mod handler;
pub mod messages;
pub mod reconnect;

pub use connection::{channel_address, ConnectionManager};
pub use handler::{DeliveredEvent, RoomProtocolHandler};
pub use messages::{decode_event, msg_types, RoomEvent, RoomIntent};
pub use reconnect::{ConnectionState, ReconnectMachine, ReconnectPolicy, Step};
