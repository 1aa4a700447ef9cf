pub mod address;
pub mod call;
pub mod connection;
pub mod wake;

pub use address::{Address, AddressError};
pub use call::{BroadcastSession, Call, CallState};
pub use connection::{AutoSleep, ConcurrencyMode, Connection, ConnectionStatus, WakeHandler, WakeMode};
pub use wake::{PendingWakeCall, WakeProfile};
