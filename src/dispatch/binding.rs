use crate::controller::{Arguments, ErasedHandler, ParamDescriptor, ParamKind, ParamValue};
use crate::di::ErasedInstance;
use crate::dispatch::RequestContext;
use crate::dispatch::form::{FormDataParser, extract_payload};
use crate::dispatch::reply::ReplyWriter;
use crate::exception::RequestError;
use crate::guard::Guard;
use crate::ratelimit::{RateLimitConfig, RateLimiter};
use axum::{
    body::Body,
    http::Request,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// A compiled route wired to its controller instance.
///
/// Each request runs the same fixed sequence: rate limit, parameter
/// extraction, guard, handler, reply conversion.
#[derive(Clone)]
pub(crate) struct RouteBinding {
    pub handler_name: &'static str,
    pub controller: ErasedInstance,
    pub handler: ErasedHandler,
    pub params: Arc<[ParamDescriptor]>,
    pub guard: Option<Arc<dyn Guard>>,
    pub rate_limit: Option<RateLimitConfig>,
    pub limiter: RateLimiter,
    pub form_parser: Arc<dyn FormDataParser>,
    pub writer: ReplyWriter,
    pub body_limit: usize,
}

impl RouteBinding {
    pub async fn dispatch(self, request: Request<Body>) -> Response {
        let ctx = match RequestContext::from_request(request, self.body_limit).await {
            Ok(ctx) => Arc::new(ctx),
            Err(err) => return err.into_response(),
        };

        let decision = match &self.rate_limit {
            Some(config) => match self.limiter.check(&ctx, config) {
                Some(decision) if !decision.allowed => return decision.rejection(config),
                decision => decision,
            },
            None => None,
        };

        let mut response = match self.run(&ctx).await {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(handler = self.handler_name, error = %err, "Route handler failed");
                err.into_response()
            }
        };
        if let Some(decision) = decision {
            response.headers_mut().extend(decision.headers());
        }
        response
    }

    async fn run(&self, ctx: &Arc<RequestContext>) -> Result<Response, RequestError> {
        let args = self.extract(ctx).await?;

        if let Some(guard) = &self.guard {
            if !guard.validate(ctx).await {
                return Err(RequestError::Unauthorized);
            }
        }

        let reply = (self.handler)(self.controller.clone(), args).await?;
        Ok(self.writer.write(reply))
    }

    async fn extract(&self, ctx: &Arc<RequestContext>) -> Result<Arguments, RequestError> {
        let len = self
            .params
            .iter()
            .filter_map(ParamDescriptor::index)
            .max()
            .map_or(0, |max| max + 1);
        let mut values = vec![ParamValue::Missing; len];

        for param in self.params.iter() {
            let Some(index) = param.index() else { continue };
            values[index] = match param.kind() {
                ParamKind::Request => ParamValue::Request(ctx.clone()),
                ParamKind::FormData => {
                    let form = ctx.form_data(self.form_parser.as_ref()).await?;
                    ParamValue::FormData(extract_payload(form, &param.form_data)?)
                }
                _ => param.extract(ctx)?,
            };
        }
        Ok(Arguments::new(values))
    }
}
