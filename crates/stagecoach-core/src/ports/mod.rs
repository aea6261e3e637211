//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」: the remote transfer service, the
//! local cache filesystem and the clock. `impls` holds the adapters.

pub mod clock;
pub mod local_store;
pub mod remote;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::local_store::LocalStore;
pub use self::remote::{
    DeleteRequest, RemoteEndpoint, RemoteError, RemoteErrorKind, TransferRequest,
};
