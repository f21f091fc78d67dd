//! `Flowline` Processing: assigns event handlers to event processors,
//! resolves per-group and per-processor overrides, and owns the processors'
//! lifecycle.
//!
//! The entry point is [`EventProcessingModule`]: register handlers, sagas,
//! assignment rules, processor builders and overrides, then call
//! [`initialize`](EventProcessingModule::initialize) with a [`Configuration`]
//! and [`start`](EventProcessingModule::start).

pub mod assignment;
pub mod component;
pub mod config;
pub mod context;
pub mod error;
pub mod interceptor;
pub mod invoker;
pub mod lifecycle;
pub mod module;
pub mod overrides;
pub mod processor;
pub mod saga;
pub mod selector;

pub use assignment::ProcessorNameResolver;
pub use component::Component;
pub use config::{
    Configuration, ConfigurationBuilder, InitialPosition, MessageMonitorFactory, ProcessingSettings,
    TrackingProcessorSettings,
};
pub use context::ProcessingContext;
pub use error::ConfigError;
pub use interceptor::InterceptorRegistry;
pub use invoker::{MultiEventHandlerInvoker, SimpleEventHandlerInvoker};
pub use lifecycle::{ModuleConfiguration, ModuleLifecycle};
pub use module::EventProcessingModule;
pub use overrides::{OverrideRegistry, OverrideTable};
pub use processor::{
    EventProcessor, EventProcessorBuilder, SubscribingEventProcessor, TrackingEventProcessor,
};
pub use saga::{SagaConfiguration, SimpleSagaConfiguration};
pub use selector::{ProcessorSelector, SelectorChain};
