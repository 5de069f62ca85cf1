//! # Sagaflow Runtime
//!
//! Saga coordinators and their collaborators.
//!
//! ## Core Components
//!
//! - **Command saga**: create → log parameters → validate → execute → complete → notify
//! - **Query saga**: create → log parameters → validate → request projections →
//!   run projections → collate → output
//! - **Notification fan-out**: concurrent, join-all delivery to pluggable transports
//! - **Retry**: bounded attempts with exponential backoff around each step
//!
//! Coordinators keep no state between steps. Each step folds the operation's
//! log and acts only if the step is still pending, so any run can be redriven.
//!
//! ## Example
//!
//! ```ignore
//! use sagaflow_runtime::{CommandSaga, CommandSagaConfig, TransportRegistry};
//!
//! let saga = CommandSaga::new(
//!     CommandSagaConfig::new("leagues", "create-league"),
//!     CreateLeague,
//!     store,
//!     TransportRegistry::new(),
//!     Arc::new(SystemClock),
//! );
//!
//! let run = saga.run(&request, &hooks).await;
//! assert!(run.result.is_success());
//! ```

/// Command saga coordinator
pub mod command_saga;

/// Coordinator configuration
pub mod config;

/// Saga error taxonomy
pub mod error;

/// Notification fan-out
pub mod fanout;

/// Event log helpers
pub mod journal;

/// Prometheus metrics for observability
pub mod metrics;

/// Query saga coordinator
pub mod query_saga;

/// Retry logic with exponential backoff
pub mod retry;

/// Step invocation
pub mod step;

/// Notification and output transports
pub mod transport;

/// Client-side waiting on queries
pub mod wait;

pub use command_saga::{CommandContext, CommandHandler, CommandRun, CommandSaga, ExecuteOutcome};
pub use config::{CommandSagaConfig, QuerySagaConfig, WaitOptions};
pub use error::SagaError;
pub use fanout::{FanOutReport, NotificationFanOut};
pub use query_saga::{ProcessedProjections, QueryHandler, QueryRun, QuerySaga};
pub use retry::RetryPolicy;
pub use step::{HandlerFuture, StepResult, Validation};
pub use transport::{NotificationTransport, TransportError, TransportKind, TransportRegistry};
pub use wait::{QueryHandle, QueryWaitOutcome, spawn_and_wait};
