pub mod channel;
pub mod error;
pub mod events;
pub mod status;

pub use channel::{Delivery, Dispatcher, EventHandler, EventPublisher, RetryPolicy};
pub use error::{ApiResponse, ServiceError};
pub use events::{OrderPlaced, PaymentSettled};
pub use status::{OrderStatus, PaymentStatus};
