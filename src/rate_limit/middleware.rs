use crate::error::GuardError;
use crate::rate_limit::{ActionType, RateLimiter};
use crate::store::WindowStore;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// Requests that carry a caller identity and tier.
pub trait RateLimitSubject {
    /// Stable identifier of the caller.
    fn subject_id(&self) -> &str;

    /// Whether the caller is on the premium tier.
    fn is_premium(&self) -> bool {
        false
    }
}

/// A layer that consumes one unit of `action` per request before calling through.
#[derive(Debug)]
pub struct RateLimitLayer<S> {
    limiter: Arc<RateLimiter<S>>,
    action: ActionType,
}

impl<S> Clone for RateLimitLayer<S> {
    fn clone(&self) -> Self {
        Self { limiter: self.limiter.clone(), action: self.action }
    }
}

impl<S> RateLimitLayer<S> {
    /// Limit every request of the wrapped service as `action`.
    pub fn new(limiter: Arc<RateLimiter<S>>, action: ActionType) -> Self {
        Self { limiter, action }
    }
}

impl<Svc, S> Layer<Svc> for RateLimitLayer<S> {
    type Service = RateLimitService<Svc, S>;

    fn layer(&self, service: Svc) -> Self::Service {
        RateLimitService { inner: service, limiter: self.limiter.clone(), action: self.action }
    }
}

/// Middleware service that enforces one action's limit.
#[derive(Debug)]
pub struct RateLimitService<Svc, S> {
    inner: Svc,
    limiter: Arc<RateLimiter<S>>,
    action: ActionType,
}

impl<Svc: Clone, S> Clone for RateLimitService<Svc, S> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), limiter: self.limiter.clone(), action: self.action }
    }
}

impl<Svc, S, Req> Service<Req> for RateLimitService<Svc, S>
where
    Svc: Service<Req> + Clone + Send + 'static,
    Svc::Future: Send + 'static,
    S: WindowStore + 'static,
    Req: RateLimitSubject + Send + 'static,
{
    type Response = Svc::Response;
    type Error = GuardError<Svc::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(GuardError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let limiter = self.limiter.clone();
        let action = self.action;
        let subject = req.subject_id().to_owned();
        let premium = req.is_premium();
        // The ready instance is the one we were polled on.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            limiter
                .acquire(&subject, action, premium)
                .await
                .map_err(|e| e.widen::<Svc::Error>())?;
            inner.call(req).await.map_err(GuardError::Inner)
        })
    }
}
