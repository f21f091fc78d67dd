//! Handler interceptors and the chain that runs them.
//!
//! Interceptors wrap the dispatch of every event inside a processor. Each one
//! receives the unit of work and the remainder of the chain, and decides
//! whether (and how) to proceed.

use std::sync::Arc;

use crate::correlation::CorrelationDataProvider;
use crate::handler::AsAny;
use crate::unit_of_work::UnitOfWork;

/// Terminal step of an interceptor chain, typically the handler invoker.
pub type ChainTarget<'a> = &'a (dyn Fn(&UnitOfWork) -> anyhow::Result<()> + 'a);

// ---------------------------------------------------------------------------
// MessageHandlerInterceptor
// ---------------------------------------------------------------------------

/// Cross-cutting logic wrapped around event dispatch.
pub trait MessageHandlerInterceptor: AsAny {
    /// Intercept the handling of the unit's message.
    ///
    /// Implementations call [`InterceptorChain::proceed`] to continue; not
    /// calling it suppresses dispatch of the message.
    ///
    /// # Errors
    ///
    /// Errors from the remainder of the chain or from the interceptor itself.
    fn handle(&self, uow: &mut UnitOfWork, chain: InterceptorChain<'_>) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// InterceptorChain
// ---------------------------------------------------------------------------

/// The remaining interceptors plus the terminal target.
pub struct InterceptorChain<'a> {
    interceptors: &'a [Arc<dyn MessageHandlerInterceptor>],
    target: ChainTarget<'a>,
}

impl<'a> InterceptorChain<'a> {
    #[must_use]
    pub fn new(
        interceptors: &'a [Arc<dyn MessageHandlerInterceptor>],
        target: ChainTarget<'a>,
    ) -> Self {
        Self {
            interceptors,
            target,
        }
    }

    /// Invokes the next interceptor, or the target when none are left.
    ///
    /// # Errors
    ///
    /// Propagates whatever the next interceptor or the target returns.
    pub fn proceed(self, uow: &mut UnitOfWork) -> anyhow::Result<()> {
        match self.interceptors.split_first() {
            Some((next, rest)) => next.handle(uow, InterceptorChain::new(rest, self.target)),
            None => (self.target)(&*uow),
        }
    }
}

// ---------------------------------------------------------------------------
// CorrelationDataInterceptor
// ---------------------------------------------------------------------------

/// Registers correlation data from every provider on the unit of work before
/// proceeding, so outgoing messages carry it.
pub struct CorrelationDataInterceptor {
    providers: Vec<Arc<dyn CorrelationDataProvider>>,
}

impl CorrelationDataInterceptor {
    #[must_use]
    pub fn new(providers: Vec<Arc<dyn CorrelationDataProvider>>) -> Self {
        Self { providers }
    }
}

impl MessageHandlerInterceptor for CorrelationDataInterceptor {
    fn handle(&self, uow: &mut UnitOfWork, chain: InterceptorChain<'_>) -> anyhow::Result<()> {
        for provider in &self.providers {
            let data = provider.correlation_data_for(uow.message());
            uow.register_correlation_data(data);
        }
        chain.proceed(uow)
    }
}
