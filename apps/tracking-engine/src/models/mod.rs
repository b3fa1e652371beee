//! Domain models shared across the engine.

mod instrument;
mod order;
mod position;
mod quote;

pub use instrument::Instrument;
pub use order::{Order, OrderSide, OrderStatus, lots_in_orders};
pub use position::{Position, Positions};
pub use quote::TopOfBook;
