//! `Flowline` Core: event messages, tracking tokens, segments, and the
//! contracts of every collaborator an event processor is wired with.

pub mod correlation;
pub mod error_handling;
pub mod handler;
pub mod hash;
pub mod interceptor;
pub mod invoker;
pub mod message;
pub mod monitor;
pub mod saga_store;
pub mod segment;
pub mod sequencing;
pub mod source;
pub mod token_store;
pub mod transaction;
pub mod unit_of_work;

pub use correlation::{CorrelationDataProvider, MessageOriginProvider};
pub use error_handling::{
    ErrorContext, ErrorHandler, ListenerInvocationErrorHandler, LoggingErrorHandler,
    PropagatingErrorHandler,
};
pub use handler::{AsAny, EventHandler};
pub use interceptor::{CorrelationDataInterceptor, InterceptorChain, MessageHandlerInterceptor};
pub use invoker::EventHandlerInvoker;
pub use message::{EventMessage, MetaData, TrackedEventMessage, TrackingToken};
pub use monitor::{MessageMonitor, MonitorCallback, NoOpMessageMonitor};
pub use saga_store::{InMemorySagaStore, SagaStore};
pub use segment::Segment;
pub use sequencing::{SequencingPolicy, SequentialPerAggregatePolicy};
pub use source::{
    EventBus, InMemoryEventBus, Registration, StreamableMessageSource, SubscribableMessageSource,
};
pub use token_store::{InMemoryTokenStore, TokenStore};
pub use transaction::{
    NoTransactionManager, RollbackConfiguration, RollbackConfigurationType, Transaction,
    TransactionManager,
};
pub use unit_of_work::UnitOfWork;
