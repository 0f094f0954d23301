//! Timeout supervisor (spec §4.7, §5): cancels and returns 408 once the
//! per-request deadline elapses, even if the upstream is still running — any
//! response it eventually returns is discarded.
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::StatusCode,
    Error as ActixError, HttpResponse,
};
use futures::future::LocalBoxFuture;

#[derive(Clone)]
pub struct RequestTimeout {
    pub duration: Duration,
}

impl<S, B> Transform<S, ServiceRequest> for RequestTimeout
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = ActixError> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = ActixError;
    type Transform = RequestTimeoutMiddleware<S>;
    type InitError = ();
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(RequestTimeoutMiddleware {
            service: Rc::new(RefCell::new(service)),
            duration: self.duration,
        }))
    }
}

pub struct RequestTimeoutMiddleware<S> {
    service: Rc<RefCell<S>>,
    duration: Duration,
}

impl<S, B> Service<ServiceRequest> for RequestTimeoutMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = ActixError> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = ActixError;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let duration = self.duration;
        let http_req = req.request().clone();

        Box::pin(async move {
            match tokio::time::timeout(duration, service.call(req)).await {
                Ok(result) => result.map(|res| res.map_into_left_body()),
                Err(_) => {
                    warn!("request exceeded {:?} deadline, returning 408", duration);
                    let response = HttpResponse::build(StatusCode::REQUEST_TIMEOUT)
                        .json(pgai_common::Envelope::<()>::err(
                            &pgai_common::ApiError::new(pgai_common::ErrorKind::GatewayTimeout),
                            pgai_common::new_request_id(),
                            false,
                        ));
                    Ok(ServiceResponse::new(http_req, response).map_into_right_body())
                }
            }
        })
    }
}
