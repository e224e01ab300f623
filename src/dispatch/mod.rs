//! Request dispatch: per-request context, form data, and reply conversion.

mod binding;
mod context;
pub mod form;
mod reply;

pub(crate) use binding::RouteBinding;
pub use context::{RequestContext, RequestContextBuilder};
pub use form::{
    FormData, FormDataOptions, FormDataParser, FormDataPayload, FormValue, MultipartParser,
    UploadedFile,
};
pub use reply::Reply;
pub(crate) use reply::ReplyWriter;
