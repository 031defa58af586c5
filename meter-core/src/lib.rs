pub mod clock;
pub mod db;
pub mod domain;
pub mod error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use db::{Backlog, Store};
pub use error::StoreError;
