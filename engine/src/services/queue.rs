use crate::error::WalletError;
use futures_util::future::BoxFuture;
use itertools::Itertools;
use log::{debug, warn};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use wallet_storage_signal::context::Context;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServiceQueueError {
    #[error("service {service} returned an empty result")]
    EmptyResult { service: String },

    #[error("service {service} failed: {message}")]
    ServiceFailed { service: String, message: String },

    #[error("all services failed: [{}]", .0.iter().join("; "))]
    AllFailed(Vec<ServiceQueueError>),

    #[error("no services configured")]
    NoServices,

    #[error("cancelled")]
    Cancelled,
}

impl From<ServiceQueueError> for WalletError {
    fn from(err: ServiceQueueError) -> Self {
        match err {
            ServiceQueueError::Cancelled => WalletError::Cancelled,
            ServiceQueueError::NoServices => WalletError::Configuration(err.to_string()),
            other => WalletError::TransientService(other.to_string()),
        }
    }
}

type ServiceFn<A, R> = dyn Fn(Context, A) -> BoxFuture<'static, Result<R, WalletError>> + Send + Sync;

pub struct NamedService<A, R> {
    name: String,
    service: Arc<ServiceFn<A, R>>,
}

impl<A, R> Clone for NamedService<A, R> {
    fn clone(&self) -> Self {
        NamedService { name: self.name.clone(), service: self.service.clone() }
    }
}

impl<A, R> NamedService<A, R> {
    pub fn new<F, Fut>(name: impl Into<String>, service: F) -> Self
    where
        F: Fn(Context, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, WalletError>> + Send + 'static,
    {
        NamedService { name: name.into(), service: Arc::new(move |ctx, args| Box::pin(service(ctx, args))) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Tries equivalent services in order and returns the first non-empty result.
/// An empty result is the default value of `R` and counts as a failure.
pub struct ServiceQueue<A, R> {
    name: String,
    services: Vec<NamedService<A, R>>,
}

impl<A, R> Clone for ServiceQueue<A, R> {
    fn clone(&self) -> Self {
        ServiceQueue { name: self.name.clone(), services: self.services.clone() }
    }
}

impl<A, R> ServiceQueue<A, R>
where
    A: Clone + Send + 'static,
    R: Default + PartialEq + Send + 'static,
{
    pub fn new(name: impl Into<String>, services: Vec<NamedService<A, R>>) -> Self {
        ServiceQueue { name: name.into(), services }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run(&self, ctx: &Context, args: A) -> Result<R, ServiceQueueError> {
        if self.services.is_empty() {
            return Err(ServiceQueueError::NoServices);
        }
        let mut failures = Vec::with_capacity(self.services.len());
        for service in &self.services {
            if ctx.is_cancelled() {
                return Err(ServiceQueueError::Cancelled);
            }
            let call = (service.service)(ctx.clone(), args.clone());
            let result = tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(ServiceQueueError::Cancelled),
                result = call => result,
            };
            match result {
                Ok(value) if value == R::default() => {
                    warn!("{}: service {} returned an empty result", self.name, service.name);
                    failures.push(ServiceQueueError::EmptyResult { service: service.name.clone() });
                }
                Ok(value) => {
                    debug!("{}: served by {}", self.name, service.name);
                    return Ok(value);
                }
                Err(err) => {
                    warn!("{}: service {} failed: {}", self.name, service.name, err);
                    failures.push(ServiceQueueError::ServiceFailed { service: service.name.clone(), message: err.to_string() });
                }
            }
        }
        Err(ServiceQueueError::AllFailed(failures))
    }
}
